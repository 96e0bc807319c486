//! `BINF` validation (first INF) and merge semantics (subsequent INFs).

use std::collections::HashSet;

use thiserror::Error;

use crate::proto::AdcMessage;
use crate::user::record::User;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InfError {
    #[error("missing ID (CID) field")]
    MissingCid,
    #[error("CID is not well-formed (must be 39 base32 characters)")]
    MalformedCid,
    #[error("CID is already in use by another connected user")]
    DuplicateCid,
    #[error("missing NI (nick) field")]
    MissingNick,
    #[error("nick is empty or exceeds the configured length bound")]
    BadNickLength,
    #[error("nick has leading whitespace or a control character")]
    BadNickChars,
    #[error("nick is already in use (case-insensitive)")]
    DuplicateNick,
}

/// Fields pulled out of a validated `BINF`, ready to populate a [`crate::user::User`].
#[derive(Debug, Clone)]
pub struct ParsedInf {
    pub cid: String,
    pub nick: String,
}

fn is_well_formed_cid(cid: &str) -> bool {
    cid.len() == 39 && cid.bytes().all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b))
}

fn is_well_formed_nick(nick: &str, max_len: usize) -> Result<(), InfError> {
    if nick.is_empty() || nick.chars().count() > max_len {
        return Err(InfError::BadNickLength);
    }
    if nick.starts_with(char::is_whitespace) {
        return Err(InfError::BadNickChars);
    }
    if nick.chars().any(|c| c.is_control()) {
        return Err(InfError::BadNickChars);
    }
    Ok(())
}

/// Validates the identity fields of a first `BINF`, per §4.G: CID
/// well-formed and unique, nick well-formed, length-bounded, unique
/// (case-insensitive), no leading whitespace, no control characters.
///
/// Feature-set consistency and the CID/PID challenge exchange are checked
/// by the session handshake (§4.H), which has access to the issued `GPA`
/// challenge; this function only validates the fields this module owns.
pub fn validate_inf(
    msg: &AdcMessage,
    existing_cids: &HashSet<String>,
    existing_nicks_casefold: &HashSet<String>,
    max_nick_len: usize,
) -> Result<ParsedInf, InfError> {
    let cid = msg.get_named_argument(*b"ID").ok_or(InfError::MissingCid)?;
    if !is_well_formed_cid(cid) {
        return Err(InfError::MalformedCid);
    }
    if existing_cids.contains(cid) {
        return Err(InfError::DuplicateCid);
    }

    let nick = msg.get_named_argument(*b"NI").ok_or(InfError::MissingNick)?;
    is_well_formed_nick(nick, max_nick_len)?;
    if existing_nicks_casefold.contains(&nick.to_lowercase()) {
        return Err(InfError::DuplicateNick);
    }

    Ok(ParsedInf {
        cid: cid.to_owned(),
        nick: nick.to_owned(),
    })
}

/// Merges an update `BINF` into the user's stored info: a field present
/// with a non-empty value replaces the stored one, a field present with
/// an empty value is removed, and a field absent from `msg` is left
/// untouched. Operates over every named argument in `msg`, not a fixed
/// field list, since ADC clients may send vendor extension fields.
///
/// The stored cache is seeded from `msg`'s own source SID (never from a
/// placeholder), so the cached `BINF` that later gets broadcast/relayed
/// always carries the user's real SID rather than the hub's reserved slot
/// 0. `SU` is additionally split on `,` into `user.features`, since that
/// is the field §4.J's feature-broadcast routing filters on. `PI`, the
/// identify-stage PID challenge material, is never part of the cache
/// broadcast to other users and is stripped after every merge.
pub fn user_update_info(user: &mut User, msg: &AdcMessage) {
    let base = user.info.get_or_insert_with(|| {
        let header = match msg.source() {
            Some(sid) => format!("BINF {sid}\n"),
            None => "BINF AAAA\n".to_owned(),
        };
        AdcMessage::parse(header.as_bytes()).expect("static frame")
    });
    for idx in 0..msg.arg_count() {
        let Some((name, value)) = msg.named_argument_at(idx) else {
            continue;
        };
        if value.is_empty() {
            base.remove_named_argument(name);
        } else {
            base.replace_named_argument(name, value.to_owned());
        }
        if name == *b"SU" {
            if value.is_empty() {
                user.features.clear();
            } else {
                user.features = value.split(',').map(str::to_owned).collect();
            }
        }
    }
    base.remove_named_argument(*b"PI");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cid() -> String {
        "AN7ZMSLIEBL53OPTM7WXGSTXUS3XOY6KQS5LBGX".chars().take(39).collect()
    }

    #[test]
    fn accepts_well_formed_fresh_identity() {
        let frame = format!("BINF AAAB ID{} NIalice\n", sample_cid());
        let msg = AdcMessage::parse(frame.as_bytes()).unwrap();
        let parsed = validate_inf(&msg, &HashSet::new(), &HashSet::new(), 32).unwrap();
        assert_eq!(parsed.nick, "alice");
    }

    #[test]
    fn rejects_duplicate_cid() {
        let cid = sample_cid();
        let frame = format!("BINF AAAB ID{cid} NIalice\n");
        let msg = AdcMessage::parse(frame.as_bytes()).unwrap();
        let mut cids = HashSet::new();
        cids.insert(cid);
        assert_eq!(
            validate_inf(&msg, &cids, &HashSet::new(), 32).unwrap_err(),
            InfError::DuplicateCid
        );
    }

    #[test]
    fn rejects_duplicate_nick_case_insensitively() {
        let frame = format!("BINF AAAB ID{} NIAlice\n", sample_cid());
        let msg = AdcMessage::parse(frame.as_bytes()).unwrap();
        let mut nicks = HashSet::new();
        nicks.insert("alice".to_owned());
        assert_eq!(
            validate_inf(&msg, &HashSet::new(), &nicks, 32).unwrap_err(),
            InfError::DuplicateNick
        );
    }

    #[test]
    fn rejects_malformed_cid_length() {
        let frame = "BINF AAAB IDshort NIalice\n";
        let msg = AdcMessage::parse(frame.as_bytes()).unwrap();
        assert_eq!(
            validate_inf(&msg, &HashSet::new(), &HashSet::new(), 32).unwrap_err(),
            InfError::MalformedCid
        );
    }

    fn quotas() -> crate::user::UserQuotas {
        crate::user::UserQuotas {
            max_sendbuf_bytes: 1 << 20,
            max_recvbuf_bytes: 64 << 10,
            ratelimit_frames: 20,
            ratelimit_window: std::time::Duration::from_secs(1),
        }
    }

    fn make_user(sid_str: &str) -> User {
        let sid = crate::identity::Sid::new(crate::identity::string_to_sid(sid_str)).unwrap();
        User::new(sid, "127.0.0.1".parse().unwrap(), crate::net::io_loop::Token(1), quotas())
    }

    #[test]
    fn update_merges_clears_and_preserves() {
        let mut user = make_user("AAAB");
        user.info = Some(AdcMessage::parse(b"BINF AAAB NIalice DEold SL3\n").unwrap());
        let update = AdcMessage::parse(b"BINF AAAB DEnew SL\n").unwrap();
        user_update_info(&mut user, &update);
        let info = user.info.unwrap();
        assert_eq!(info.get_named_argument(*b"NI"), Some("alice"));
        assert_eq!(info.get_named_argument(*b"DE"), Some("new"));
        assert_eq!(info.get_named_argument(*b"SL"), None);
    }

    #[test]
    fn update_seeds_cache_with_the_frame_own_source_sid_not_the_hub_slot() {
        let mut user = make_user("AAAC");
        let first = AdcMessage::parse(b"BINF AAAC NIalice\n").unwrap();
        user_update_info(&mut user, &first);
        let info = user.info.as_ref().unwrap();
        assert_eq!(info.source().unwrap().to_string(), "AAAC");
        assert_ne!(info.source().unwrap().to_string(), "AAAA");
    }

    #[test]
    fn update_strips_the_private_pid_challenge_field() {
        let mut user = make_user("AAAB");
        let identify = AdcMessage::parse(b"BINF AAAB IDabc NIalice PIsecret\n").unwrap();
        user_update_info(&mut user, &identify);
        let info = user.info.as_ref().unwrap();
        assert_eq!(info.get_named_argument(*b"PI"), None);
        assert_eq!(info.get_named_argument(*b"NI"), Some("alice"));
    }

    #[test]
    fn update_splits_su_into_features() {
        let mut user = make_user("AAAB");
        let inf = AdcMessage::parse(b"BINF AAAB NIalice SUADC0,TCP4,UDP4\n").unwrap();
        user_update_info(&mut user, &inf);
        assert!(user.features.contains("TCP4"));
        assert!(user.features.contains("UDP4"));
        assert!(user.features.contains("ADC0"));
    }

    #[test]
    fn update_clears_features_when_su_is_emptied() {
        let mut user = make_user("AAAB");
        let inf = AdcMessage::parse(b"BINF AAAB NIalice SUTCP4\n").unwrap();
        user_update_info(&mut user, &inf);
        assert!(user.features.contains("TCP4"));

        let clear = AdcMessage::parse(b"BINF AAAB SU\n").unwrap();
        user_update_info(&mut user, &clear);
        assert!(user.features.is_empty());
    }
}
