use std::net::TcpStream;

use adc_hub::cfg::enums::Credentials;
use adc_hub::identity::base32_encode_bytes;
use sha2::{Digest, Sha256};

use crate::integration_tests::common::{read_frames, send, spawn_hub, test_config};

const ALICE_CID: &str = "AN7ZMSLIEBL53OPTM7WXGSTXUS3XOY6KQS5LBGX";
const BOB_CID: &str = "BN7ZMSLIEBL53OPTM7WXGSTXUS3XOY6KQS5LBGX";

fn extract_sid(frame: &str) -> String {
    // "ISID AAAB\n" -> "AAAB"
    frame.trim_end().split(' ').nth(1).expect("ISID carries a sid token").to_owned()
}

fn extract_challenge(frame: &str) -> String {
    // "IGPA <challenge>\n" -> "<challenge>"
    frame.trim_end().split(' ').nth(1).expect("IGPA carries a challenge token").to_owned()
}

fn respond_to_challenge(challenge: &str, pid: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(challenge.as_bytes());
    hasher.update(pid.as_bytes());
    base32_encode_bytes(&hasher.finalize())
}

fn join(stream: &mut TcpStream, cid: &str, nick: &str, pid: &str) -> String {
    send(stream, "HSUP ADBASE\n");
    // ISUP + ISID + IINF
    let greeting = read_frames(stream, 3);
    assert_eq!(greeting.len(), 3, "expected ISUP/ISID/IINF, got {greeting:?}");
    assert!(greeting[0].starts_with("ISUP"), "{greeting:?}");
    let sid = extract_sid(&greeting[1]);
    assert!(greeting[2].starts_with("IINF"), "{greeting:?}");

    send(stream, &format!("BINF {sid} ID{cid} NI{nick} PI{pid}\n"));
    let challenge_frame = read_frames(stream, 1);
    assert_eq!(challenge_frame.len(), 1);
    let challenge = extract_challenge(&challenge_frame[0]);

    let pd = respond_to_challenge(&challenge, pid);
    send(stream, &format!("BINF {sid} PD{pd}\n"));
    sid
}

#[test]
fn second_client_sees_first_clients_info_on_join() {
    let hub = spawn_hub(test_config(0, 64, Credentials::None));
    let mut alice = TcpStream::connect(hub.addr).unwrap();
    let alice_sid = join(&mut alice, ALICE_CID, "alice", "alicepid");

    // Alice should see her own BINF broadcast right after admission.
    let alice_join_broadcast = read_frames(&mut alice, 1);
    assert_eq!(alice_join_broadcast.len(), 1);
    assert!(alice_join_broadcast[0].starts_with(&format!("BINF {alice_sid}")));

    let mut bob = TcpStream::connect(hub.addr).unwrap();
    let bob_sid = join(&mut bob, BOB_CID, "bob", "bobpid");

    // Bob receives the existing roster (alice) enqueued directly to him...
    let bob_roster = read_frames(&mut bob, 1);
    assert_eq!(bob_roster.len(), 1);
    assert!(bob_roster[0].contains("NIalice"));

    // ...and alice sees bob's join broadcast.
    let alice_sees_bob = read_frames(&mut alice, 1);
    assert_eq!(alice_sees_bob.len(), 1);
    assert!(alice_sees_bob[0].starts_with(&format!("BINF {bob_sid}")));
    assert!(alice_sees_bob[0].contains("NIbob"));
}

#[test]
fn direct_message_is_delivered_only_to_target() {
    let hub = spawn_hub(test_config(0, 64, Credentials::None));
    let mut alice = TcpStream::connect(hub.addr).unwrap();
    let alice_sid = join(&mut alice, ALICE_CID, "alice", "alicepid");
    let _ = read_frames(&mut alice, 1); // own join broadcast

    let mut bob = TcpStream::connect(hub.addr).unwrap();
    let bob_sid = join(&mut bob, BOB_CID, "bob", "bobpid");
    let _ = read_frames(&mut bob, 1); // roster containing alice
    let _ = read_frames(&mut alice, 1); // alice sees bob's join

    send(&mut alice, &format!("DMSG {alice_sid} {bob_sid} hello\n"));
    let delivered = read_frames(&mut bob, 1);
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].starts_with(&format!("DMSG {alice_sid} {bob_sid}")));
    assert!(delivered[0].contains("hello"));
}
