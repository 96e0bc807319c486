//! Indexes the connected user set by SID, CID, and nick (case-folded),
//! and delivers broadcasts/direct sends.
//!
//! The three indexes are plain `HashMap`s rather than the teacher's
//! `DashMap`: the hub's concurrency model (§5) is single-threaded
//! cooperative, so there is no concurrent-insertion hazard to guard
//! against — see DESIGN.md for this recorded simplification.

use std::collections::HashMap;

use crate::identity::Sid;
use crate::proto::AdcMessage;
use crate::user::User;

/// A predicate used by [`UserManager::broadcast`] to select recipients,
/// e.g. "supports feature X" or "credentials at least operator".
pub trait BroadcastPredicate {
    fn matches(&self, user: &User) -> bool;
}

impl<F: Fn(&User) -> bool> BroadcastPredicate for F {
    fn matches(&self, user: &User) -> bool {
        self(user)
    }
}

/// Accepts everyone; the common case for a plain `B`-context broadcast.
pub struct Everyone;
impl BroadcastPredicate for Everyone {
    fn matches(&self, _user: &User) -> bool {
        true
    }
}

#[derive(Default)]
pub struct UserManager {
    by_sid: HashMap<Sid, User>,
    cid_to_sid: HashMap<String, Sid>,
    nick_to_sid: HashMap<String, Sid>,
}

impl UserManager {
    pub fn new() -> Self {
        UserManager::default()
    }

    pub fn len(&self) -> usize {
        self.by_sid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_sid.is_empty()
    }

    /// Inserts a freshly SID-allocated user with no CID/nick yet (the
    /// narrow window between SID allocation and identity assignment).
    pub fn add(&mut self, user: User) {
        self.by_sid.insert(user.sid, user);
    }

    /// Registers the CID/nick for a user already present by SID, once its
    /// `BINF` has been validated. Atomic across both maps.
    pub fn assign_identity(&mut self, sid: Sid, cid: String, nick: String) {
        if let Some(user) = self.by_sid.get_mut(&sid) {
            if !user.cid.is_empty() {
                self.cid_to_sid.remove(&user.cid);
            }
            if !user.nick.is_empty() {
                self.nick_to_sid.remove(&user.nick.to_lowercase());
            }
            self.cid_to_sid.insert(cid.clone(), sid);
            self.nick_to_sid.insert(nick.to_lowercase(), sid);
            user.cid = cid;
            user.nick = nick;
        }
    }

    /// Removes a user from all three indexes at once.
    pub fn remove(&mut self, sid: Sid) -> Option<User> {
        let user = self.by_sid.remove(&sid)?;
        if !user.cid.is_empty() {
            self.cid_to_sid.remove(&user.cid);
        }
        if !user.nick.is_empty() {
            self.nick_to_sid.remove(&user.nick.to_lowercase());
        }
        Some(user)
    }

    pub fn lookup_by_sid(&self, sid: Sid) -> Option<&User> {
        self.by_sid.get(&sid)
    }

    pub fn lookup_by_sid_mut(&mut self, sid: Sid) -> Option<&mut User> {
        self.by_sid.get_mut(&sid)
    }

    pub fn lookup_by_cid(&self, cid: &str) -> Option<&User> {
        let sid = self.cid_to_sid.get(cid)?;
        self.by_sid.get(sid)
    }

    pub fn lookup_by_nick(&self, nick: &str) -> Option<&User> {
        let sid = self.nick_to_sid.get(&nick.to_lowercase())?;
        self.by_sid.get(sid)
    }

    pub fn lookup_by_nick_mut(&mut self, nick: &str) -> Option<&mut User> {
        let sid = self.nick_to_sid.get(&nick.to_lowercase())?;
        self.by_sid.get_mut(sid)
    }

    pub fn existing_cids(&self) -> std::collections::HashSet<String> {
        self.cid_to_sid.keys().cloned().collect()
    }

    pub fn existing_nicks_casefold(&self) -> std::collections::HashSet<String> {
        self.nick_to_sid.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &User> {
        self.by_sid.values()
    }

    /// Returns the serialized frames that satisfy `predicate`, one per
    /// matching user, for the caller to hand to each user's connection.
    /// Delivery itself happens through the connection table the hub
    /// owns, since `UserManager` has no I/O access — this keeps the
    /// single-threaded cooperative model's "no suspension between
    /// begin/end of iteration" invariant trivially true.
    pub fn broadcast(&self, _msg: &AdcMessage, predicate: &dyn BroadcastPredicate) -> Vec<Sid> {
        self.by_sid.values().filter(|u| predicate.matches(u)).map(|u| u.sid).collect()
    }
}
