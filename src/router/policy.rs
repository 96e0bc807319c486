//! The policy hook chain consulted before a frame is routed: chat
//! filters, search restrictions, private-message restrictions.

use crate::proto::AdcMessage;
use crate::user::User;

/// Outcome of a single policy hook. `Default` means "no opinion, ask the
/// next hook"; the chain's overall verdict is the first non-`Default`
/// answer, or `Allow` if every hook abstains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyVerdict {
    Allow,
    Deny,
    Default,
}

/// One policy check in the chain. `source` is the sending user; `msg` is
/// the frame about to be routed.
pub trait PolicyHook {
    fn check(&self, source: &User, msg: &AdcMessage) -> PolicyVerdict;
}

/// An ordered sequence of [`PolicyHook`]s, consulted in registration
/// order. The first `Allow`/`Deny` short-circuits; an empty chain (or one
/// where every hook abstains) allows by default.
#[derive(Default)]
pub struct PolicyChain {
    hooks: Vec<Box<dyn PolicyHook>>,
}

impl PolicyChain {
    pub fn new() -> Self {
        PolicyChain::default()
    }

    pub fn register(&mut self, hook: Box<dyn PolicyHook>) {
        self.hooks.push(hook);
    }

    pub fn evaluate(&self, source: &User, msg: &AdcMessage) -> PolicyVerdict {
        for hook in &self.hooks {
            match hook.check(source, msg) {
                PolicyVerdict::Default => continue,
                verdict => return verdict,
            }
        }
        PolicyVerdict::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Sid;
    use crate::net::Token;
    use crate::user::UserQuotas;

    struct AlwaysDeny;
    impl PolicyHook for AlwaysDeny {
        fn check(&self, _source: &User, _msg: &AdcMessage) -> PolicyVerdict {
            PolicyVerdict::Deny
        }
    }

    struct Abstain;
    impl PolicyHook for Abstain {
        fn check(&self, _source: &User, _msg: &AdcMessage) -> PolicyVerdict {
            PolicyVerdict::Default
        }
    }

    fn quotas() -> UserQuotas {
        UserQuotas {
            max_sendbuf_bytes: 1 << 20,
            max_recvbuf_bytes: 64 << 10,
            ratelimit_frames: 20,
            ratelimit_window: std::time::Duration::from_secs(1),
        }
    }

    fn user() -> User {
        User::new(Sid::new(1).unwrap(), "127.0.0.1".parse().unwrap(), Token(1), quotas())
    }

    #[test]
    fn empty_chain_allows() {
        let chain = PolicyChain::new();
        let msg = AdcMessage::parse(b"BMSG AAAB Hi\n").unwrap();
        assert_eq!(chain.evaluate(&user(), &msg), PolicyVerdict::Allow);
    }

    #[test]
    fn abstaining_hooks_fall_through_to_allow() {
        let mut chain = PolicyChain::new();
        chain.register(Box::new(Abstain));
        chain.register(Box::new(Abstain));
        let msg = AdcMessage::parse(b"BMSG AAAB Hi\n").unwrap();
        assert_eq!(chain.evaluate(&user(), &msg), PolicyVerdict::Allow);
    }

    #[test]
    fn first_deny_short_circuits() {
        let mut chain = PolicyChain::new();
        chain.register(Box::new(Abstain));
        chain.register(Box::new(AlwaysDeny));
        let msg = AdcMessage::parse(b"BMSG AAAB Hi\n").unwrap();
        assert_eq!(chain.evaluate(&user(), &msg), PolicyVerdict::Deny);
    }
}
