// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::cfg::enums::{Credentials, YesNo};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Listener / transport settings.
    pub network: NetworkConfig,
    /// TLS adapter settings.
    pub tls: TlsConfig,
    /// Probe redirect settings (HTTP and NMDC).
    pub redirects: RedirectConfig,
    /// Admission and resource limits.
    pub limits: Limits,
    /// Per-connection timeouts, in seconds.
    pub timeouts: Timeouts,
    /// Identity the hub presents to clients.
    pub identity: HubIdentity,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct NetworkConfig {
    /// Address to bind the listener to, e.g. `"0.0.0.0"` or `"any"`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP port to listen on.
    pub port: u16,
}

fn default_bind_address() -> String {
    "any".to_owned()
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TlsConfig {
    /// Whether the TLS adapter is available on this listener at all.
    pub enable: YesNo,
    /// Whether a plaintext ADC connection is redirected/rejected.
    #[serde(default)]
    pub require: YesNo,
    /// Optional `adc://` address offered to non-TLS clients when `require`
    /// is set; if empty, the connection is simply closed.
    #[serde(default)]
    pub require_redirect_addr: String,
    /// PEM certificate chain file.
    pub cert_file: String,
    /// PEM private key file.
    pub key_file: String,
    /// Minimum protocol version: `"tls1.2"` or `"tls1.3"`.
    #[serde(default = "default_min_version")]
    pub min_version: String,
}

fn default_min_version() -> String {
    "tls1.2".to_owned()
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct RedirectConfig {
    /// `dchub://`-style address sent on NMDC probe timeout; empty disables
    /// the NMDC redirect banner.
    #[serde(default)]
    pub nmdc_redirect_addr: String,
    /// HTTP redirect target for the 307 response; empty sends 501 instead.
    #[serde(default)]
    pub http_redirect_addr: String,
    /// Skip responding to HTTP probes entirely.
    #[serde(default)]
    pub ignore_http: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Limits {
    /// SID pool capacity; also the hard cap on concurrently connected
    /// users.
    pub max_users: u32,
    /// Per-address concurrent connection cap.
    #[serde(default = "default_max_connections_per_address")]
    pub max_connections_per_address: u32,
    /// Default per-user send buffer ceiling, in bytes.
    #[serde(default = "default_max_sendbuf")]
    pub max_sendbuf_bytes: u32,
    /// Per-user receive buffer ceiling, in bytes; a single frame larger
    /// than this disconnects the sender.
    #[serde(default = "default_max_recvbuf")]
    pub max_recvbuf_bytes: u32,
    /// Maximum nick length accepted in `BINF` during identify.
    #[serde(default = "default_max_nick_len")]
    pub max_nick_len: usize,
    /// Minimum credential level required to pass admission into `normal`;
    /// unregistered (`get_user` miss) connections are treated as
    /// [`Credentials::None`].
    #[serde(default)]
    pub min_join_credentials: Credentials,
}

fn default_max_nick_len() -> usize {
    32
}

fn default_max_connections_per_address() -> u32 {
    4
}

fn default_max_sendbuf() -> u32 {
    1 << 20
}

fn default_max_recvbuf() -> u32 {
    64 << 10
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Timeouts {
    /// Protocol probe timeout before the connection is classified
    /// "unknown" / NMDC and dropped.
    #[serde(rename = "probe_seconds", with = "serde_secs")]
    pub probe: Duration,
    /// Time allotted to complete the login handshake (`identify`/`verify`).
    #[serde(rename = "handshake_seconds", with = "serde_secs")]
    pub handshake: Duration,
    /// Idle timeout once in the `normal` state.
    #[serde(rename = "idle_seconds", with = "serde_secs")]
    pub idle: Duration,
    /// TLS handshake timeout.
    #[serde(rename = "tls_handshake_seconds", with = "serde_secs")]
    pub tls_handshake: Duration,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct HubIdentity {
    /// Hub name advertised in the user list / INF.
    pub name: String,
    /// Hub description, shown to joining clients.
    #[serde(default)]
    pub description: String,
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config = serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(self.network.port != 0, "network.port must not be 0");
        ensure!(self.limits.max_users >= 1, "limits.max_users must be >= 1");
        ensure!(
            self.limits.max_users <= crate::identity::Sid::MAX,
            "limits.max_users must fit in the 20-bit SID space"
        );
        ensure!(!self.identity.name.is_empty(), "identity.name must not be empty");

        if self.tls.enable.as_bool() {
            ensure!(!self.tls.cert_file.is_empty(), "tls.cert_file is required when tls.enable is Yes");
            ensure!(!self.tls.key_file.is_empty(), "tls.key_file is required when tls.enable is Yes");
        } else if self.tls.require.as_bool() {
            // Can't require what isn't enabled; normalize rather than hard fail.
            self.tls.require = YesNo::No;
        }

        Ok(())
    }
}

/// Serde helper for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
