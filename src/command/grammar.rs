//! The argument grammar (§4.K): a glyph string describes the shape of a
//! command's arguments; [`parse_args`] walks it alongside the raw
//! argument text and produces either a [`Vec<ArgValue>`] or the
//! [`CommandStatus`] that explains why it couldn't.

use std::net::IpAddr;
use std::str::FromStr;

use crate::cfg::enums::Credentials;
use crate::command::status::CommandStatus;
use crate::identity::address::{parse_address, parse_range, AddressRange};
use crate::user::UserManager;

/// One glyph of the grammar, after `?`/`+` modifiers have been folded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Glyph {
    Integer,
    UserByNick,
    UserByCid,
    CommandPrefix,
    Credential,
    BareNick,
    Address,
    Range,
    Token,
}

impl Glyph {
    fn from_char(c: char) -> Option<Self> {
        match c {
            'N' => Some(Glyph::Integer),
            'u' => Some(Glyph::UserByNick),
            'i' => Some(Glyph::UserByCid),
            'c' => Some(Glyph::CommandPrefix),
            'C' => Some(Glyph::Credential),
            'n' => Some(Glyph::BareNick),
            'a' => Some(Glyph::Address),
            'r' => Some(Glyph::Range),
            'm' | 'p' | 's' => Some(Glyph::Token),
            _ => None,
        }
    }
}

/// One position in a command's argument specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgSpec {
    pub glyph: Glyph,
    pub optional: bool,
    /// Consumes the remainder of the line verbatim instead of a single
    /// space-delimited token.
    pub rest_of_line: bool,
}

pub type Grammar = Vec<ArgSpec>;

/// Compiles a grammar string (e.g. `"n?+m"`) into a [`Grammar`]. `?` and
/// `+` are modifiers on the glyph that immediately follows them.
pub fn compile(spec: &str) -> Grammar {
    let mut grammar = Vec::new();
    let mut optional = false;
    let mut rest_of_line = false;
    for c in spec.chars() {
        match c {
            '?' => optional = true,
            '+' => rest_of_line = true,
            other => {
                if let Some(glyph) = Glyph::from_char(other) {
                    grammar.push(ArgSpec {
                        glyph,
                        optional,
                        rest_of_line,
                    });
                    optional = false;
                    rest_of_line = false;
                }
            },
        }
    }
    grammar
}

/// A single resolved argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Integer(i64),
    UserNick(String),
    UserCid(String),
    CommandPrefix(String),
    Credential(Credentials),
    BareNick(String),
    Address(IpAddr),
    Range(AddressRange),
    Token(String),
}

/// Parses `line` against `grammar`. `users`/`known_commands` provide the
/// resolution data `u`/`i`/`c` need; pass `None` for either in contexts
/// where no such commands are registered (tests, or a grammar that never
/// uses those glyphs).
pub fn parse_args(
    grammar: &Grammar,
    line: &str,
    users: Option<&UserManager>,
    known_commands: Option<&[String]>,
) -> Result<Vec<ArgValue>, CommandStatus> {
    let mut remaining = line.trim_start();
    let mut values = Vec::with_capacity(grammar.len());

    for spec in grammar {
        if remaining.is_empty() {
            if spec.optional {
                continue;
            }
            return Err(CommandStatus::MissingArgs);
        }

        let token = if spec.rest_of_line {
            let tok = remaining;
            remaining = "";
            tok.trim()
        } else {
            match remaining.split_once(char::is_whitespace) {
                Some((tok, rest)) => {
                    remaining = rest.trim_start();
                    tok
                },
                None => {
                    let tok = remaining;
                    remaining = "";
                    tok
                },
            }
        };

        values.push(parse_one(spec.glyph, token, users, known_commands)?);
    }

    Ok(values)
}

fn parse_one(
    glyph: Glyph,
    token: &str,
    users: Option<&UserManager>,
    known_commands: Option<&[String]>,
) -> Result<ArgValue, CommandStatus> {
    match glyph {
        Glyph::Integer => token.parse::<i64>().map(ArgValue::Integer).map_err(|_| CommandStatus::BadInteger),
        Glyph::UserByNick => {
            let found = users.and_then(|u| u.lookup_by_nick(token));
            match found {
                Some(_) => Ok(ArgValue::UserNick(token.to_owned())),
                None => Err(CommandStatus::BadNick),
            }
        },
        Glyph::UserByCid => {
            let found = users.and_then(|u| u.lookup_by_cid(token));
            match found {
                Some(_) => Ok(ArgValue::UserCid(token.to_owned())),
                None => Err(CommandStatus::BadCid),
            }
        },
        Glyph::CommandPrefix => match known_commands {
            Some(list) if list.iter().any(|p| p == token) => Ok(ArgValue::CommandPrefix(token.to_owned())),
            _ => Err(CommandStatus::BadCommand),
        },
        Glyph::Credential => Credentials::from_str(token).map(ArgValue::Credential).map_err(|_| CommandStatus::BadCredentials),
        Glyph::BareNick => Ok(ArgValue::BareNick(token.to_owned())),
        Glyph::Address => parse_address(token).map(ArgValue::Address).map_err(|_| CommandStatus::BadAddress),
        Glyph::Range => parse_range(token).map(ArgValue::Range).map_err(|_| CommandStatus::BadRange),
        Glyph::Token => Ok(ArgValue::Token(token.to_owned())),
    }
}
