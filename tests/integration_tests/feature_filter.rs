use std::net::TcpStream;

use adc_hub::cfg::enums::Credentials;
use adc_hub::identity::base32_encode_bytes;
use sha2::{Digest, Sha256};

use crate::integration_tests::common::{read_frames, send, spawn_hub, test_config};

const ALICE_CID: &str = "AN7ZMSLIEBL53OPTM7WXGSTXUS3XOY6KQS5LBGX";
const BOB_CID: &str = "BN7ZMSLIEBL53OPTM7WXGSTXUS3XOY6KQS5LBGX";

fn extract_sid(frame: &str) -> String {
    frame.trim_end().split(' ').nth(1).expect("ISID carries a sid token").to_owned()
}

fn extract_challenge(frame: &str) -> String {
    frame.trim_end().split(' ').nth(1).expect("IGPA carries a challenge token").to_owned()
}

/// Joins with an extra `SU` (supported features) field so the feature
/// broadcast test can exercise real per-user feature membership.
fn join_with_features(stream: &mut TcpStream, cid: &str, nick: &str, pid: &str, features: &str) -> String {
    send(stream, "HSUP ADBASE\n");
    let greeting = read_frames(stream, 3);
    let sid = extract_sid(&greeting[1]);

    send(stream, &format!("BINF {sid} ID{cid} NI{nick} PI{pid} SU{features}\n"));
    let challenge_frame = read_frames(stream, 1);
    let challenge = extract_challenge(&challenge_frame[0]);

    let mut hasher = Sha256::new();
    hasher.update(challenge.as_bytes());
    hasher.update(pid.as_bytes());
    let pd = base32_encode_bytes(&hasher.finalize());
    send(stream, &format!("BINF {sid} PD{pd}\n"));
    sid
}

#[test]
fn feature_broadcast_only_reaches_supporting_clients() {
    let hub = spawn_hub(test_config(0, 64, Credentials::None));

    let mut alice = TcpStream::connect(hub.addr).unwrap();
    let alice_sid = join_with_features(&mut alice, ALICE_CID, "alice", "alicepid", "TCP4");
    let _ = read_frames(&mut alice, 1); // own join broadcast

    let mut bob = TcpStream::connect(hub.addr).unwrap();
    join_with_features(&mut bob, BOB_CID, "bob", "bobpid", "");
    let _ = read_frames(&mut bob, 1); // roster with alice
    let _ = read_frames(&mut alice, 1); // alice sees bob's join

    // Only clients advertising TCP4 should receive this search.
    send(&mut alice, &format!("FSCH {alice_sid} +TCP4 ANfoo\n"));

    let alice_frame = read_frames(&mut alice, 1);
    assert_eq!(alice_frame.len(), 1, "alice supports TCP4, should receive the search");
    assert!(alice_frame[0].starts_with("FSCH"));

    // Bob never advertised TCP4: give the hub a moment and confirm nothing arrives.
    bob.set_read_timeout(Some(std::time::Duration::from_millis(300))).unwrap();
    let mut probe = [0u8; 16];
    use std::io::Read;
    match bob.read(&mut probe) {
        Ok(0) => {},
        Ok(n) => panic!("bob should not have received the filtered search, got {:?}", &probe[..n]),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {},
        Err(e) => panic!("unexpected read error: {e}"),
    }
}
