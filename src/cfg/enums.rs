// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use serde::{Deserialize, Serialize};

/// Boolean enumeration with string serialization support.
///
/// Represents yes/no values with support for various string representations
/// including "Yes"/"No", "true"/"false", and "1"/"0".
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum YesNo {
    #[serde(
        rename = "Yes",
        alias = "yes",
        alias = "YES",
        alias = "true",
        alias = "True",
        alias = "1"
    )]
    Yes,
    #[serde(
        rename = "No",
        alias = "no",
        alias = "NO",
        alias = "false",
        alias = "False",
        alias = "0"
    )]
    No,
}
impl fmt::Display for YesNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            YesNo::Yes => "Yes",
            YesNo::No => "No",
        })
    }
}
impl From<bool> for YesNo {
    fn from(b: bool) -> Self {
        if b { YesNo::Yes } else { YesNo::No }
    }
}
impl YesNo {
    pub fn as_bool(self) -> bool {
        matches!(self, YesNo::Yes)
    }
}
impl Default for YesNo {
    fn default() -> Self {
        YesNo::No
    }
}

/// Totally ordered credential levels governing command access, matching
/// the order named in the glossary. `Ord` follows declaration order
/// (lowest privilege first), so `credentials >= Credentials::Operator`
/// is a meaningful admission check.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum Credentials {
    #[default]
    None,
    Bot,
    Ubot,
    Opbot,
    Opubot,
    Guest,
    User,
    Operator,
    Super,
    Link,
    Admin,
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Credentials::None => "none",
            Credentials::Bot => "bot",
            Credentials::Ubot => "ubot",
            Credentials::Opbot => "opbot",
            Credentials::Opubot => "opubot",
            Credentials::Guest => "guest",
            Credentials::User => "user",
            Credentials::Operator => "operator",
            Credentials::Super => "super",
            Credentials::Link => "link",
            Credentials::Admin => "admin",
        })
    }
}

impl std::str::FromStr for Credentials {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "none" => Credentials::None,
            "bot" => Credentials::Bot,
            "ubot" => Credentials::Ubot,
            "opbot" => Credentials::Opbot,
            "opubot" => Credentials::Opubot,
            "guest" => Credentials::Guest,
            "user" => Credentials::User,
            "operator" => Credentials::Operator,
            "super" => Credentials::Super,
            "link" => Credentials::Link,
            "admin" => Credentials::Admin,
            _ => return Err(()),
        })
    }
}

/// Hub-internal log verbosity scale, distinct from `tracing`'s level
/// filter: this is the closed vocabulary the hub reports in its own
/// diagnostic counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Verbosity {
    Fatal = 0,
    Error = 1,
    Warning = 2,
    User = 3,
    Info = 4,
    Debug = 5,
    Trace = 6,
    Dump = 7,
    Memory = 8,
    Protocol = 9,
    Plugin = 10,
}

/// Maps a raw verbosity code to its name; out-of-range values return
/// `"unknown"`.
pub fn hub_log_verbosity_to_string(code: u8) -> &'static str {
    match code {
        0 => "fatal",
        1 => "error",
        2 => "warning",
        3 => "user",
        4 => "info",
        5 => "debug",
        6 => "trace",
        7 => "dump",
        8 => "memory",
        9 => "protocol",
        10 => "plugin",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_strings_match_spec() {
        let expected = [
            "fatal", "error", "warning", "user", "info", "debug", "trace", "dump", "memory",
            "protocol", "plugin",
        ];
        for (i, name) in expected.iter().enumerate() {
            assert_eq!(hub_log_verbosity_to_string(i as u8), *name);
        }
        assert_eq!(hub_log_verbosity_to_string(11), "unknown");
        assert_eq!(hub_log_verbosity_to_string(255), "unknown");
    }

    #[test]
    fn credentials_are_totally_ordered() {
        assert!(Credentials::None < Credentials::Guest);
        assert!(Credentials::Guest < Credentials::Operator);
        assert!(Credentials::Operator < Credentials::Admin);
    }
}
