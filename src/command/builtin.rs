//! Built-in operator commands: `help` (lists commands the caller may
//! invoke, or describes one by name) and `userdel` (the admin-plugin-backed
//! deletion flow from §8 scenario 6).

use crate::cfg::enums::Credentials;
use crate::command::grammar::ArgValue;
use crate::command::registry::{Command, CommandRegistry};
use crate::router::plugin::PluginVerdict;

/// Registers the hub's built-in commands. Call once, after any
/// deployment-specific commands have been registered, so `help`'s
/// snapshot of sibling commands is complete.
pub fn register_builtins(registry: &mut CommandRegistry) {
    registry.register(Command::new(
        "userdel",
        Credentials::Operator,
        "n",
        "userdel <nick> - deletes a user's account via the auth plugin",
        Box::new(|args, ctx| {
            let ArgValue::BareNick(nick) = &args[0] else {
                unreachable!("grammar guarantees BareNick at position 0")
            };
            match ctx.auth.delete_user(nick) {
                PluginVerdict::Deny => format!("*** userdel: could not delete \"{nick}\""),
                PluginVerdict::Allow | PluginVerdict::Default => {
                    if let Some(user) = ctx.users.lookup_by_nick_mut(nick) {
                        user.credentials = Credentials::None;
                    }
                    format!("*** userdel: User \"{nick}\" deleted.")
                },
            }
        }),
    ));

    let mut descriptions = registry.descriptions();
    descriptions.push((
        "help".to_owned(),
        Credentials::None,
        "help [command] - lists commands you may invoke, or describes one".to_owned(),
    ));

    registry.register(Command::new(
        "help",
        Credentials::None,
        "c?",
        "help [command] - lists commands you may invoke, or describes one",
        Box::new(move |args, ctx| match args.first() {
            Some(ArgValue::CommandPrefix(prefix)) => match descriptions.iter().find(|(p, ..)| p == prefix) {
                Some((_, _, help)) => format!("*** {prefix}: {help}"),
                None => format!("*** unknown command: {prefix}"),
            },
            _ => {
                let available: Vec<&str> = descriptions
                    .iter()
                    .filter(|(_, min, _)| ctx.caller_credentials >= *min)
                    .map(|(p, ..)| p.as_str())
                    .collect();
                format!("*** available commands: {}", available.join(", "))
            },
        }),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::registry::CommandContext;
    use crate::identity::Sid;
    use crate::net::Token;
    use crate::router::plugin::AuthUserInfo;
    use crate::router::AuthPlugin;
    use crate::user::{User, UserManager, UserQuotas};

    struct FakeAuth {
        deleted: Vec<String>,
    }

    impl AuthPlugin for FakeAuth {
        fn get_user(&self, _nick: &str) -> Option<AuthUserInfo> {
            None
        }

        fn register_user(&mut self, _info: &AuthUserInfo) -> PluginVerdict {
            PluginVerdict::Default
        }

        fn update_user(&mut self, _info: &AuthUserInfo) -> PluginVerdict {
            PluginVerdict::Default
        }

        fn delete_user(&mut self, nick: &str) -> PluginVerdict {
            self.deleted.push(nick.to_owned());
            PluginVerdict::Allow
        }

        fn get_user_list(&self, _substr: &str) -> Vec<AuthUserInfo> {
            Vec::new()
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

    #[test]
    fn userdel_deletes_and_demotes_online_user() {
        let mut registry = CommandRegistry::new();
        register_builtins(&mut registry);

        let mut users = UserManager::new();
        users.add(User::new(Sid::new(1).unwrap(), "127.0.0.1".parse().unwrap(), Token(1), quotas()));
        users.assign_identity(Sid::new(1).unwrap(), "C".repeat(39), "alice".to_owned());

        let mut auth = FakeAuth { deleted: Vec::new() };
        let mut ctx = CommandContext {
            users: &mut users,
            auth: &mut auth,
            caller_sid: Sid::new(2).unwrap(),
            caller_credentials: Credentials::Operator,
        };

        let (status, text) = registry.dispatch("userdel alice", &mut ctx);
        assert_eq!(status, crate::command::status::CommandStatus::Ok);
        assert_eq!(text, "*** userdel: User \"alice\" deleted.");
        assert_eq!(auth.deleted, vec!["alice".to_owned()]);
        assert_eq!(
            users.lookup_by_nick("alice").unwrap().credentials,
            Credentials::None
        );
    }

    #[test]
    fn help_lists_commands_available_to_caller() {
        let mut registry = CommandRegistry::new();
        register_builtins(&mut registry);

        let mut users = UserManager::new();
        let mut auth = FakeAuth { deleted: Vec::new() };
        let mut ctx = CommandContext {
            users: &mut users,
            auth: &mut auth,
            caller_sid: Sid::new(1).unwrap(),
            caller_credentials: Credentials::User,
        };

        let (status, text) = registry.dispatch("help", &mut ctx);
        assert_eq!(status, crate::command::status::CommandStatus::Ok);
        assert!(text.contains("help"));
        assert!(!text.contains("userdel"));
    }

    #[test]
    fn help_describes_a_specific_command() {
        let mut registry = CommandRegistry::new();
        register_builtins(&mut registry);

        let mut users = UserManager::new();
        let mut auth = FakeAuth { deleted: Vec::new() };
        let mut ctx = CommandContext {
            users: &mut users,
            auth: &mut auth,
            caller_sid: Sid::new(1).unwrap(),
            caller_credentials: Credentials::Admin,
        };

        let (status, text) = registry.dispatch("help userdel", &mut ctx);
        assert_eq!(status, crate::command::status::CommandStatus::Ok);
        assert!(text.starts_with("*** userdel:"));
    }
}
