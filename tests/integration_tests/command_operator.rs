use std::net::TcpStream;

use adc_hub::cfg::enums::Credentials;
use adc_hub::identity::base32_encode_bytes;
use adc_hub::proto::AdcMessage;
use adc_hub::router::plugin::AuthUserInfo;
use sha2::{Digest, Sha256};

use crate::integration_tests::common::{read_frames, send, spawn_hub_with_auth, test_config, TestAuth};

const OP_CID: &str = "CN7ZMSLIEBL53OPTM7WXGSTXUS3XOY6KQS5LBGX";
const ALICE_CID: &str = "AN7ZMSLIEBL53OPTM7WXGSTXUS3XOY6KQS5LBGX";

fn extract_sid(frame: &str) -> String {
    frame.trim_end().split(' ').nth(1).expect("ISID carries a sid token").to_owned()
}

fn extract_challenge(frame: &str) -> String {
    frame.trim_end().split(' ').nth(1).expect("IGPA carries a challenge token").to_owned()
}

fn join(stream: &mut TcpStream, cid: &str, nick: &str, pid: &str) -> String {
    send(stream, "HSUP ADBASE\n");
    let greeting = read_frames(stream, 3);
    assert_eq!(greeting.len(), 3, "expected ISUP/ISID/IINF, got {greeting:?}");
    let sid = extract_sid(&greeting[1]);

    send(stream, &format!("BINF {sid} ID{cid} NI{nick} PI{pid}\n"));
    let challenge_frame = read_frames(stream, 1);
    let challenge = extract_challenge(&challenge_frame[0]);

    let mut hasher = Sha256::new();
    hasher.update(challenge.as_bytes());
    hasher.update(pid.as_bytes());
    let pd = base32_encode_bytes(&hasher.finalize());
    send(stream, &format!("BINF {sid} PD{pd}\n"));
    sid
}

/// Mirrors the operator-command scenario: an operator deletes a
/// registered nick's account through the auth plugin and the hub
/// acknowledges over `ISTA`.
#[test]
fn operator_userdel_succeeds_via_auth_plugin() {
    let mut auth = TestAuth::default();
    auth.users.insert(
        "op".to_owned(),
        AuthUserInfo { nick: "op".to_owned(), password: String::new(), credentials: Credentials::Operator, last_activity: 0 },
    );
    auth.users.insert(
        "alice".to_owned(),
        AuthUserInfo { nick: "alice".to_owned(), password: String::new(), credentials: Credentials::None, last_activity: 0 },
    );

    let hub = spawn_hub_with_auth(test_config(0, 64, Credentials::None), auth);

    let mut alice = TcpStream::connect(hub.addr).unwrap();
    join(&mut alice, ALICE_CID, "alice", "alicepid");
    let _ = read_frames(&mut alice, 1); // alice's own join broadcast

    let mut op = TcpStream::connect(hub.addr).unwrap();
    let op_sid = join(&mut op, OP_CID, "op", "oppid");
    let _ = read_frames(&mut op, 1); // op's own join broadcast
    let _ = read_frames(&mut alice, 1); // alice sees op's join

    send(&mut op, &format!("BMSG {op_sid} !userdel\\salice\n"));
    let reply = read_frames(&mut op, 1);
    assert_eq!(reply.len(), 1);
    let msg = AdcMessage::parse(reply[0].as_bytes()).expect("well-formed ISTA frame");
    assert_eq!(msg.command(), "ISTA");
    assert_eq!(msg.get_argument(1), Some("*** userdel: User \"alice\" deleted."));
}

/// An unprivileged user's `userdel` attempt is rejected by credential
/// gating before the auth plugin is ever consulted.
#[test]
fn non_operator_cannot_run_userdel() {
    let hub = spawn_hub_with_auth(test_config(0, 64, Credentials::None), TestAuth::default());

    let mut alice = TcpStream::connect(hub.addr).unwrap();
    let alice_sid = join(&mut alice, ALICE_CID, "alice", "alicepid");
    let _ = read_frames(&mut alice, 1);

    send(&mut alice, &format!("BMSG {alice_sid} !userdel\\sbob\n"));
    let reply = read_frames(&mut alice, 1);
    let msg = AdcMessage::parse(reply[0].as_bytes()).expect("well-formed ISTA frame");
    assert_eq!(msg.get_argument(1), Some("*** access denied"));
}
