// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use adc_hub::cfg::cli::resolve_config_path;
use adc_hub::cfg::config::Config;
use adc_hub::cfg::logger::init_logger;
use adc_hub::hub::Hub;
use adc_hub::router::plugin::{AuthUserInfo, PluginVerdict};
use adc_hub::router::{AuthPlugin, HubPlugin};
use anyhow::{Context, Result};
use tracing::info;

/// Reference auth backend: an in-process user table with no persistence.
///
/// The real auth store (§6 of the protocol this hub speaks) is a
/// SQLite-backed plugin maintained outside this crate; this stand-in
/// exists only so the binary has something to run against out of the
/// box, and is not meant to serve a production hub.
struct MemoryAuth {
    users: HashMap<String, AuthUserInfo>,
}

impl MemoryAuth {
    fn new() -> Self {
        Self { users: HashMap::new() }
    }
}

impl AuthPlugin for MemoryAuth {
    fn get_user(&self, nick: &str) -> Option<AuthUserInfo> {
        self.users.get(nick).cloned()
    }

    fn register_user(&mut self, info: &AuthUserInfo) -> PluginVerdict {
        if self.users.contains_key(&info.nick) {
            return PluginVerdict::Deny;
        }
        self.users.insert(info.nick.clone(), info.clone());
        PluginVerdict::Allow
    }

    fn update_user(&mut self, info: &AuthUserInfo) -> PluginVerdict {
        if !self.users.contains_key(&info.nick) {
            return PluginVerdict::Deny;
        }
        self.users.insert(info.nick.clone(), info.clone());
        PluginVerdict::Allow
    }

    fn delete_user(&mut self, nick: &str) -> PluginVerdict {
        if self.users.remove(nick).is_some() {
            PluginVerdict::Allow
        } else {
            PluginVerdict::Deny
        }
    }

    fn get_user_list(&self, substr: &str) -> Vec<AuthUserInfo> {
        self.users.values().filter(|u| u.nick.contains(substr)).cloned().collect()
    }
}

/// No hooks of its own; event/chat plugins are external collaborators.
struct NoopPlugin;

impl HubPlugin for NoopPlugin {}

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let logger_config = args.next().unwrap_or_else(|| "config/logger.yaml".to_owned());
    let hub_config = args.next().unwrap_or_else(|| "config/hub.yaml".to_owned());

    let _logger_guard = init_logger(&logger_config).context("failed to initialize logger")?;

    let config = resolve_config_path(&hub_config)
        .and_then(Config::load_from_file)
        .context("failed to resolve or load hub config")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown))
        .context("failed to register SIGTERM handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))
        .context("failed to register SIGINT handler")?;

    let mut hub = Hub::new(config, MemoryAuth::new(), NoopPlugin).context("failed to initialize hub")?;

    info!("starting hub");
    hub.run(&shutdown)
}
