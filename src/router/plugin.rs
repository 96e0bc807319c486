//! Plugin capability surface: auth (consumed synchronously, an answer is
//! required before admission/command processing can continue) and the
//! hub event hooks (fire-and-forget notifications), expressed as two
//! traits rather than the original's function-pointer table — grounded
//! on spec.md §9's "express as a polymorphic plugin trait/interface".

use std::net::IpAddr;

use crate::cfg::enums::Credentials;
use crate::proto::AdcMessage;

/// Answer shape shared by every auth plugin operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginVerdict {
    Allow,
    Deny,
    Default,
}

/// A user record as the auth plugin sees it — independent of
/// [`crate::user::User`], which also carries live connection state the
/// plugin has no business touching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUserInfo {
    pub nick: String,
    pub password: String,
    pub credentials: Credentials,
    pub last_activity: u64,
}

/// The external authentication store (§6, "consumed"). A concrete
/// implementation (SQLite-backed, file-backed, ...) is out of this
/// crate's scope; this trait is the seam it plugs into.
pub trait AuthPlugin {
    fn get_user(&self, nick: &str) -> Option<AuthUserInfo>;
    fn register_user(&mut self, info: &AuthUserInfo) -> PluginVerdict;
    fn update_user(&mut self, info: &AuthUserInfo) -> PluginVerdict;
    fn delete_user(&mut self, nick: &str) -> PluginVerdict;
    fn get_user_list(&self, substr: &str) -> Vec<AuthUserInfo>;
}

/// Hub-lifecycle event hooks (§9's dispatch table), each with a no-op
/// default so a plugin can implement only the ones it cares about.
pub trait HubPlugin {
    fn on_user_login(&mut self, _nick: &str, _address: IpAddr) {}
    fn on_user_logout(&mut self, _nick: &str) {}
    fn on_chat_msg(&mut self, _nick: &str, _msg: &AdcMessage) {}
    fn on_private_msg(&mut self, _from: &str, _to: &str, _msg: &AdcMessage) {}
    fn on_search(&mut self, _nick: &str, _msg: &AdcMessage) {}
    fn on_search_result(&mut self, _nick: &str, _msg: &AdcMessage) {}
    fn on_p2p_connect(&mut self, _from: &str, _to: &str) {}
    fn on_p2p_revconnect(&mut self, _from: &str, _to: &str) {}
    fn on_user_nick_change(&mut self, _old_nick: &str, _new_nick: &str) {}
    fn on_user_login_error(&mut self, _nick: &str, _reason: &str) {}
}
