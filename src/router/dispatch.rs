//! Routes one accepted `normal`-stage frame to its recipients, per
//! context character (§4.J).

use crate::identity::Sid;
use crate::proto::{AdcMessage, Context, FeatureToken};
use crate::user::UserManager;

/// The routing decision for one frame, independent of delivery — the
/// caller hands `frame_bytes` (the message's own `cache()`) to each SID
/// listed here via its connection's sendbuf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Deliver to every SID listed.
    Deliver(Vec<Sid>),
    /// Consumed by the hub itself; no peer delivery (context `H`).
    ToHub,
    /// Not acceptable from a client in any routing context (`C`/`I`).
    Rejected,
}

/// Routes `msg` against the current user set. `sender` is the frame's
/// already-validated source SID (for contexts that carry one).
pub fn route(msg: &AdcMessage, users: &UserManager) -> RouteOutcome {
    match msg.context() {
        Context::B => RouteOutcome::Deliver(users.iter().map(|u| u.sid).collect()),
        Context::D | Context::U => match msg.target() {
            Some(target) if users.lookup_by_sid(target).is_some() => RouteOutcome::Deliver(vec![target]),
            _ => RouteOutcome::Deliver(Vec::new()),
        },
        Context::E => {
            let mut recipients = Vec::new();
            if let Some(source) = msg.source() {
                recipients.push(source);
            }
            if let Some(target) = msg.target() {
                if users.lookup_by_sid(target).is_some() && Some(target) != msg.source() {
                    recipients.push(target);
                }
            }
            RouteOutcome::Deliver(recipients)
        },
        Context::F => {
            let filter = msg.feature_filter();
            let recipients = users
                .iter()
                .filter(|u| feature_filter_matches(filter, |feat| u.has_feature(feat)))
                .map(|u| u.sid)
                .collect();
            RouteOutcome::Deliver(recipients)
        },
        Context::H => RouteOutcome::ToHub,
        Context::C | Context::I => RouteOutcome::Rejected,
    }
}

/// True if every `+FEAT` token is satisfied and no `-FEAT` token is,
/// per the user's own feature membership test `has`.
fn feature_filter_matches(filter: &[FeatureToken], has: impl Fn(&str) -> bool) -> bool {
    filter.iter().all(|tok| has(&tok.feature) == tok.include)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Token;
    use crate::user::{User, UserQuotas};

    fn quotas() -> UserQuotas {
        UserQuotas {
            max_sendbuf_bytes: 1 << 20,
            max_recvbuf_bytes: 64 << 10,
            ratelimit_frames: 20,
            ratelimit_window: std::time::Duration::from_secs(1),
        }
    }

    fn user(sid: u32) -> User {
        User::new(Sid::new(sid).unwrap(), "127.0.0.1".parse().unwrap(), Token(sid as usize), quotas())
    }

    #[test]
    fn broadcast_goes_to_everyone() {
        let mut users = UserManager::new();
        users.add(user(1));
        users.add(user(2));
        let msg = AdcMessage::parse(b"BMSG AAAB Hi\n").unwrap();
        let RouteOutcome::Deliver(mut recipients) = route(&msg, &users) else {
            panic!("expected deliver");
        };
        recipients.sort();
        assert_eq!(recipients, vec![Sid::new(1).unwrap(), Sid::new(2).unwrap()]);
    }

    #[test]
    fn direct_drops_silently_when_target_absent() {
        let users = UserManager::new();
        let msg = AdcMessage::parse(b"DMSG AAAB AAAC Hi\n").unwrap();
        assert_eq!(route(&msg, &users), RouteOutcome::Deliver(Vec::new()));
    }

    #[test]
    fn echo_delivers_to_source_and_target() {
        let mut users = UserManager::new();
        users.add(user(2));
        users.add(user(3));
        let msg = AdcMessage::parse(b"EMSG AAAB AAAC Hi\n").unwrap();
        let RouteOutcome::Deliver(mut recipients) = route(&msg, &users) else {
            panic!("expected deliver");
        };
        recipients.sort();
        assert_eq!(recipients, vec![Sid::new(2).unwrap(), Sid::new(3).unwrap()]);
    }

    #[test]
    fn feature_broadcast_filters_by_support() {
        let mut users = UserManager::new();
        users.add(user(1));
        users.add(user(2));
        users.lookup_by_sid_mut(Sid::new(1).unwrap()).unwrap().features.insert("TCP4".to_owned());
        let msg = AdcMessage::parse(b"FMSG AAAB +TCP4 Hi\n").unwrap();
        assert_eq!(route(&msg, &users), RouteOutcome::Deliver(vec![Sid::new(1).unwrap()]));
    }

    #[test]
    fn to_hub_is_not_delivered() {
        let users = UserManager::new();
        let msg = AdcMessage::parse(b"HSCH AAAB query\n").unwrap();
        assert_eq!(route(&msg, &users), RouteOutcome::ToHub);
    }
}
