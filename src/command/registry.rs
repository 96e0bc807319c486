//! The command registry: `(prefix, credential minimum, argument spec,
//! handler)` tuples, looked up and dispatched by [`CommandRegistry::dispatch`].

use crate::cfg::enums::Credentials;
use crate::command::grammar::{compile, parse_args, ArgValue, Grammar};
use crate::command::status::CommandStatus;
use crate::identity::Sid;
use crate::router::AuthPlugin;
use crate::user::UserManager;

/// Everything a command handler needs beyond its parsed arguments.
pub struct CommandContext<'a> {
    pub users: &'a mut UserManager,
    pub auth: &'a mut dyn AuthPlugin,
    pub caller_sid: Sid,
    pub caller_credentials: Credentials,
}

pub type Handler = Box<dyn Fn(&[ArgValue], &mut CommandContext) -> String>;

pub struct Command {
    pub prefix: String,
    pub min_credentials: Credentials,
    pub grammar: Grammar,
    pub help: String,
    pub handler: Handler,
}

impl Command {
    pub fn new(prefix: &str, min_credentials: Credentials, grammar_spec: &str, help: &str, handler: Handler) -> Self {
        Command {
            prefix: prefix.to_owned(),
            min_credentials,
            grammar: compile(grammar_spec),
            help: help.to_owned(),
            handler,
        }
    }
}

#[derive(Default)]
pub struct CommandRegistry {
    commands: Vec<Command>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        CommandRegistry::default()
    }

    pub fn register(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn find(&self, prefix: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.prefix == prefix)
    }

    fn prefixes(&self) -> Vec<String> {
        self.commands.iter().map(|c| c.prefix.clone()).collect()
    }

    /// A snapshot of `(prefix, credential minimum, help text)` for every
    /// registered command, in registration order. Used by the built-in
    /// `help` command, which needs to describe its siblings but (like
    /// every handler) only receives a [`CommandContext`], not the
    /// registry itself.
    pub fn descriptions(&self) -> Vec<(String, Credentials, String)> {
        self.commands.iter().map(|c| (c.prefix.clone(), c.min_credentials, c.help.clone())).collect()
    }

    /// Prefixes the caller (at `credentials`) may invoke, in registration
    /// order — the list `help` with no argument returns.
    pub fn available_to(&self, credentials: Credentials) -> Vec<&str> {
        self.commands
            .iter()
            .filter(|c| credentials >= c.min_credentials)
            .map(|c| c.prefix.as_str())
            .collect()
    }

    /// Splits `line` (already stripped of its leading `!`/`+` trigger
    /// character) into a command prefix and the remaining argument text,
    /// parses arguments against the registered grammar, checks the
    /// caller's credentials, and runs the handler.
    ///
    /// Returns the status and the text to report back to the caller.
    pub fn dispatch(&self, line: &str, ctx: &mut CommandContext) -> (CommandStatus, String) {
        let line = line.trim();
        let (prefix, rest) = match line.split_once(char::is_whitespace) {
            Some((p, r)) => (p, r),
            None => (line, ""),
        };

        let Some(command) = self.find(prefix) else {
            return (CommandStatus::NotFound, format!("*** unknown command: {prefix}"));
        };

        if ctx.caller_credentials < command.min_credentials {
            return (CommandStatus::AccessDenied, "*** access denied".to_owned());
        }

        let known = self.prefixes();
        let values = match parse_args(&command.grammar, rest, Some(ctx.users), Some(&known)) {
            Ok(values) => values,
            Err(status) => return (status, format!("*** {prefix}: {status}")),
        };

        let response = (command.handler)(&values, ctx);
        (CommandStatus::Ok, response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Token;
    use crate::user::{User, UserQuotas};

    struct NullAuth;
    impl AuthPlugin for NullAuth {
        fn get_user(&self, _nick: &str) -> Option<crate::router::AuthUserInfo> {
            None
        }
        fn register_user(&mut self, _info: &crate::router::AuthUserInfo) -> crate::router::PluginVerdict {
            crate::router::PluginVerdict::Default
        }
        fn update_user(&mut self, _info: &crate::router::AuthUserInfo) -> crate::router::PluginVerdict {
            crate::router::PluginVerdict::Default
        }
        fn delete_user(&mut self, _nick: &str) -> crate::router::PluginVerdict {
            crate::router::PluginVerdict::Default
        }
        fn get_user_list(&self, _substr: &str) -> Vec<crate::router::AuthUserInfo> {
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

    fn registry() -> CommandRegistry {
        let mut registry = CommandRegistry::new();
        registry.register(Command::new(
            "echo",
            Credentials::User,
            "+m",
            "echo <text>",
            Box::new(|args, _ctx| match &args[0] {
                ArgValue::Token(text) => format!("*** {text}"),
                _ => unreachable!(),
            }),
        ));
        registry.register(Command::new(
            "kick",
            Credentials::Operator,
            "n",
            "kick <nick>",
            Box::new(|_args, _ctx| "*** kicked".to_owned()),
        ));
        registry
    }

    #[test]
    fn dispatch_runs_matching_handler() {
        let registry = registry();
        let mut users = UserManager::new();
        let mut auth = NullAuth;
        let mut ctx = CommandContext {
            users: &mut users,
            auth: &mut auth,
            caller_sid: Sid::new(1).unwrap(),
            caller_credentials: Credentials::User,
        };
        let (status, text) = registry.dispatch("echo hello world", &mut ctx);
        assert_eq!(status, CommandStatus::Ok);
        assert_eq!(text, "*** hello world");
    }

    #[test]
    fn dispatch_rejects_unknown_prefix() {
        let registry = registry();
        let mut users = UserManager::new();
        let mut auth = NullAuth;
        let mut ctx = CommandContext {
            users: &mut users,
            auth: &mut auth,
            caller_sid: Sid::new(1).unwrap(),
            caller_credentials: Credentials::Admin,
        };
        let (status, _) = registry.dispatch("bogus", &mut ctx);
        assert_eq!(status, CommandStatus::NotFound);
    }

    #[test]
    fn dispatch_enforces_credential_minimum() {
        let registry = registry();
        let mut users = UserManager::new();
        let mut auth = NullAuth;
        let mut ctx = CommandContext {
            users: &mut users,
            auth: &mut auth,
            caller_sid: Sid::new(1).unwrap(),
            caller_credentials: Credentials::User,
        };
        let (status, _) = registry.dispatch("kick alice", &mut ctx);
        assert_eq!(status, CommandStatus::AccessDenied);
    }

    #[test]
    fn available_to_filters_by_credential() {
        let registry = registry();
        assert_eq!(registry.available_to(Credentials::User), vec!["echo"]);
        let mut admin_list = registry.available_to(Credentials::Admin);
        admin_list.sort();
        assert_eq!(admin_list, vec!["echo", "kick"]);
    }
}
