use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use adc_hub::cfg::config::{Config, HubIdentity, Limits, NetworkConfig, RedirectConfig, TlsConfig, Timeouts};
use adc_hub::cfg::enums::{Credentials, YesNo};
use adc_hub::hub::Hub;
use adc_hub::router::plugin::{AuthUserInfo, PluginVerdict};
use adc_hub::router::{AuthPlugin, HubPlugin};

#[derive(Default)]
pub struct TestAuth {
    pub users: HashMap<String, AuthUserInfo>,
}

impl AuthPlugin for TestAuth {
    fn get_user(&self, nick: &str) -> Option<AuthUserInfo> {
        self.users.get(nick).cloned()
    }

    fn register_user(&mut self, info: &AuthUserInfo) -> PluginVerdict {
        self.users.insert(info.nick.clone(), info.clone());
        PluginVerdict::Allow
    }

    fn update_user(&mut self, info: &AuthUserInfo) -> PluginVerdict {
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

#[derive(Default)]
pub struct TestPlugin;

impl HubPlugin for TestPlugin {}

pub fn test_config(port: u16, max_users: u32, min_join_credentials: Credentials) -> Config {
    Config {
        network: NetworkConfig { bind_address: "127.0.0.1".to_owned(), port },
        tls: TlsConfig {
            enable: YesNo::No,
            require: YesNo::No,
            require_redirect_addr: String::new(),
            cert_file: String::new(),
            key_file: String::new(),
            min_version: "tls1.2".to_owned(),
        },
        redirects: RedirectConfig::default(),
        limits: Limits {
            max_users,
            max_connections_per_address: 8,
            max_sendbuf_bytes: 1 << 20,
            max_recvbuf_bytes: 64 << 10,
            max_nick_len: 32,
            min_join_credentials,
        },
        timeouts: Timeouts {
            probe: Duration::from_secs(10),
            handshake: Duration::from_secs(10),
            idle: Duration::from_secs(600),
            tls_handshake: Duration::from_secs(10),
        },
        identity: HubIdentity { name: "TestHub".to_owned(), description: "integration test hub".to_owned() },
    }
}

pub struct RunningHub {
    pub addr: SocketAddr,
    pub shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for RunningHub {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Spawns a hub bound to an OS-assigned loopback port on a background
/// thread and returns once the listener is up.
pub fn spawn_hub(config: Config) -> RunningHub {
    spawn_hub_with_auth(config, TestAuth::default())
}

/// Like [`spawn_hub`], but with a pre-populated auth plugin (e.g. to seed
/// an operator account before any client connects).
pub fn spawn_hub_with_auth(config: Config, auth: TestAuth) -> RunningHub {
    let mut hub = Hub::new(config, auth, TestPlugin).expect("hub construction");
    let addr = hub.local_addr().expect("bound listener has a local addr");
    let shutdown = Arc::new(AtomicBool::new(false));
    let thread_shutdown = Arc::clone(&shutdown);
    let handle = std::thread::spawn(move || {
        let _ = hub.run(&thread_shutdown);
    });
    RunningHub { addr, shutdown, handle: Some(handle) }
}

/// Reads from `stream` until the accumulated text contains at least
/// `want_lines` LF-terminated frames, or a short timeout elapses.
pub fn read_frames(stream: &mut TcpStream, want_lines: usize) -> Vec<String> {
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let lines = buf.iter().filter(|&&b| b == b'\n').count();
        if lines >= want_lines {
            break;
        }
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => break,
            Err(e) => panic!("read failed: {e}"),
        }
    }
    let text = String::from_utf8(buf).expect("frames are valid utf-8");
    text.split_inclusive('\n').map(|s| s.to_owned()).collect()
}

pub fn send(stream: &mut TcpStream, frame: &str) {
    stream.write_all(frame.as_bytes()).unwrap();
}
