//! The per-user record: identity, credentials, features, quotas, flags,
//! and the owned INF cache.
//!
//! Flags are a `bitflags!` set, grounded on the teacher's
//! `models::login::common::LoginFlags`.

use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Instant;

use crate::cfg::enums::Credentials;
use crate::identity::Sid;
use crate::net::io_loop::Token;
use crate::proto::AdcMessage;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UserFlags: u8 {
        const TLS      = 0b0000_0001;
        const PASSIVE  = 0b0000_0010;
        const HUB_BOT  = 0b0000_0100;
    }
}

/// Per-user resource limits, seeded from [`crate::cfg::config::Limits`]
/// but mutable per-connection (an operator command may raise/lower a
/// specific user's ceiling).
#[derive(Debug, Clone, Copy)]
pub struct UserQuotas {
    pub max_sendbuf_bytes: u32,
    pub max_recvbuf_bytes: u32,
    /// Max frames accepted per `ratelimit_window`.
    pub ratelimit_frames: u32,
    pub ratelimit_window: std::time::Duration,
}

/// Rolling counters for a user's connection lifetime.
#[derive(Debug, Clone, Copy)]
pub struct UserTimers {
    pub connected_at: Instant,
    pub last_activity: Instant,
}

impl UserTimers {
    pub fn new() -> Self {
        let now = Instant::now();
        UserTimers {
            connected_at: now,
            last_activity: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

impl Default for UserTimers {
    fn default() -> Self {
        Self::new()
    }
}

/// One connected (or connecting) user.
///
/// `cid`/`nick` are empty until the `BINF` that carries them has been
/// validated (see [`crate::user::info::validate_inf`]); the narrow window
/// where only the SID is known is represented by `cid`/`nick` being empty
/// rather than an `Option`, since the index never inserts a user into its
/// CID/nick maps until both are set (see [`crate::user::manager`]).
pub struct User {
    pub sid: Sid,
    pub cid: String,
    pub nick: String,
    pub credentials: Credentials,
    pub features: HashSet<String>,
    pub address: IpAddr,
    pub info: Option<AdcMessage>,
    pub quotas: UserQuotas,
    pub flags: UserFlags,
    pub timers: UserTimers,
    pub conn_token: Token,
}

impl User {
    pub fn new(sid: Sid, address: IpAddr, conn_token: Token, quotas: UserQuotas) -> Self {
        User {
            sid,
            cid: String::new(),
            nick: String::new(),
            credentials: Credentials::None,
            features: HashSet::new(),
            address,
            info: None,
            quotas,
            flags: UserFlags::empty(),
            timers: UserTimers::new(),
            conn_token,
        }
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    pub fn is_identified(&self) -> bool {
        !self.cid.is_empty() && !self.nick.is_empty()
    }
}
