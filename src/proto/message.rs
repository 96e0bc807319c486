//! The ADC message: a cached, mutable record for a single protocol frame.
//!
//! The cached-mutable-record design — a struct that owns a serialized
//! representation, exposes structural mutators, and re-derives that
//! representation on every edit — is grounded on the teacher's
//! `models::data_fromat::PDUWithData`, generalized from a binary
//! per-field-offset builder to a textual token-list editor since ADC
//! frames are text, not fixed-offset binary PDUs.

use std::fmt;

use crate::identity::Sid;
use crate::proto::error::ParseError;
use crate::proto::escape::{escape, unescape};

/// The context character of a 4-char command token; determines routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Context {
    /// Broadcast.
    B,
    /// Server info, client-to-hub.
    I,
    /// To hub.
    H,
    /// Direct.
    D,
    /// Echo.
    E,
    /// Feature broadcast.
    F,
    /// Client-to-client direct (never echoed).
    U,
    /// Server-originated control.
    C,
}

impl Context {
    pub const fn as_char(self) -> char {
        match self {
            Context::B => 'B',
            Context::I => 'I',
            Context::H => 'H',
            Context::D => 'D',
            Context::E => 'E',
            Context::F => 'F',
            Context::U => 'U',
            Context::C => 'C',
        }
    }

    /// Whether a frame in this context carries a source SID token.
    pub const fn has_source(self) -> bool {
        matches!(self, Context::B | Context::D | Context::E | Context::F)
    }

    /// Whether a frame in this context carries a target SID token.
    pub const fn has_target(self) -> bool {
        matches!(self, Context::D | Context::E)
    }

    /// Whether a frame in this context carries a feature filter list.
    pub const fn has_feature_filter(self) -> bool {
        matches!(self, Context::F)
    }
}

impl TryFrom<char> for Context {
    type Error = ParseError;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            'B' => Ok(Context::B),
            'I' => Ok(Context::I),
            'H' => Ok(Context::H),
            'D' => Ok(Context::D),
            'E' => Ok(Context::E),
            'F' => Ok(Context::F),
            'U' => Ok(Context::U),
            'C' => Ok(Context::C),
            other => Err(ParseError::UnknownContext(other)),
        }
    }
}

/// Routing priority hint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// A `+FEAT`/`-FEAT` filter token (context `F` only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureToken {
    pub include: bool,
    pub feature: String,
}

impl fmt::Display for FeatureToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", if self.include { '+' } else { '-' }, self.feature)
    }
}

/// A single argument: either a 2-letter-named field (`NIalice`) or a bare
/// positional token. Values are stored unescaped; escaping happens only at
/// serialization time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    Positional(String),
    Named([u8; 2], String),
}

impl Argument {
    pub fn value(&self) -> &str {
        match self {
            Argument::Positional(v) => v,
            Argument::Named(_, v) => v,
        }
    }

    pub fn name(&self) -> Option<[u8; 2]> {
        match self {
            Argument::Named(n, _) => Some(*n),
            Argument::Positional(_) => None,
        }
    }

    fn to_wire_token(&self) -> String {
        match self {
            Argument::Positional(v) => escape(v),
            Argument::Named(name, v) => {
                format!("{}{}{}", name[0] as char, name[1] as char, escape(v))
            }
        }
    }
}

/// Classifies a raw (still-escaped) token as named or positional using the
/// real ADC wire convention: a named field's key is exactly two ASCII
/// bytes, the first an uppercase letter and the second an uppercase letter
/// or digit (covers `ID`, `NI`, `I4`, `I6`, `HN`, ...).
fn classify_token(raw: &str) -> Result<Argument, ParseError> {
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_uppercase() && (bytes[1].is_ascii_uppercase() || bytes[1].is_ascii_digit()) {
        let name = [bytes[0], bytes[1]];
        let value = unescape(&raw[2..])?;
        Ok(Argument::Named(name, value))
    } else {
        Ok(Argument::Positional(unescape(raw)?))
    }
}

fn parse_sid_token(tok: &str) -> Result<Sid, ParseError> {
    if tok.len() != 4 || !tok.bytes().all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b)) {
        return Err(ParseError::BadSid(tok.to_owned()));
    }
    let value = crate::identity::string_to_sid(tok);
    Sid::new(value).ok_or_else(|| ParseError::BadSid(tok.to_owned()))
}

/// A parsed, editable ADC frame. `cache` always reflects the current
/// structural content; every mutator rebuilds it before returning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdcMessage {
    context: Context,
    kind: [u8; 3],
    source: Option<Sid>,
    target: Option<Sid>,
    feature_filter: Vec<FeatureToken>,
    arguments: Vec<Argument>,
    terminated: bool,
    priority: Priority,
    cache: String,
}

impl AdcMessage {
    /// Parses a frame without checking source-SID identity.
    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.is_empty() {
            return Err(ParseError::Empty);
        }
        if buf.contains(&0u8) {
            return Err(ParseError::EmbeddedNul);
        }
        let text = std::str::from_utf8(buf).map_err(|_| ParseError::InvalidUtf8)?;
        let lf_count = text.matches('\n').count();
        if lf_count != 1 || !text.ends_with('\n') {
            return Err(ParseError::BadFraming);
        }
        let body = &text[..text.len() - 1];

        let mut tokens = body.split(' ');
        let command_tok = tokens.next().ok_or(ParseError::Empty)?;
        if command_tok.chars().count() != 4 {
            return Err(ParseError::BadCommandLength);
        }
        let mut chars = command_tok.chars();
        let context = Context::try_from(chars.next().expect("checked len"))?;
        let type_chars: Vec<char> = chars.collect();
        if type_chars.len() != 3 || !type_chars.iter().all(|c| c.is_ascii_uppercase()) {
            return Err(ParseError::BadCommandType);
        }
        let kind = [type_chars[0] as u8, type_chars[1] as u8, type_chars[2] as u8];

        let mut rest: Vec<&str> = tokens.collect();
        let mut idx = 0;

        let source = if context.has_source() {
            let tok = rest.get(idx).copied().ok_or(ParseError::MissingSource)?;
            idx += 1;
            Some(parse_sid_token(tok)?)
        } else {
            None
        };

        let target = if context.has_target() {
            let tok = rest.get(idx).copied().ok_or(ParseError::MissingTarget)?;
            idx += 1;
            Some(parse_sid_token(tok)?)
        } else {
            None
        };

        let mut feature_filter = Vec::new();
        if context.has_feature_filter() {
            while let Some(tok) = rest.get(idx) {
                let bytes = tok.as_bytes();
                let sign = match bytes.first() {
                    Some(b'+') => true,
                    Some(b'-') => false,
                    _ => break,
                };
                if bytes.len() != 5 || !bytes[1..].iter().all(|b| b.is_ascii_alphanumeric()) {
                    break;
                }
                feature_filter.push(FeatureToken {
                    include: sign,
                    feature: tok[1..].to_owned(),
                });
                idx += 1;
            }
        }

        let remaining: Vec<&str> = rest.split_off(idx);
        let mut arguments = Vec::with_capacity(remaining.len());
        for tok in remaining {
            arguments.push(classify_token(tok)?);
        }

        let mut msg = AdcMessage {
            context,
            kind,
            source,
            target,
            feature_filter,
            arguments,
            terminated: true,
            priority: Priority::default(),
            cache: String::new(),
        };
        msg.rebuild_cache();
        Ok(msg)
    }

    /// Parses and additionally requires `source` to equal `session_sid`.
    pub fn parse_verify(buf: &[u8], session_sid: Sid) -> Result<Self, ParseError> {
        let msg = Self::parse(buf)?;
        if let Some(actual) = msg.source {
            if actual != session_sid {
                return Err(ParseError::SourceMismatch {
                    expected: session_sid,
                    actual,
                });
            }
        }
        Ok(msg)
    }

    pub fn context(&self) -> Context {
        self.context
    }

    pub fn command(&self) -> String {
        format!(
            "{}{}{}{}",
            self.context.as_char(),
            self.kind[0] as char,
            self.kind[1] as char,
            self.kind[2] as char
        )
    }

    pub fn source(&self) -> Option<Sid> {
        self.source
    }

    pub fn target(&self) -> Option<Sid> {
        self.target
    }

    pub fn feature_filter(&self) -> &[FeatureToken] {
        &self.feature_filter
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    /// The serialized frame, always reflecting the current structure.
    pub fn cache(&self) -> &str {
        &self.cache
    }

    /// True if no payload (source/target/feature filter/arguments) follows
    /// the command token.
    pub fn is_empty(&self) -> bool {
        self.source.is_none()
            && self.target.is_none()
            && self.feature_filter.is_empty()
            && self.arguments.is_empty()
    }

    pub fn get_argument(&self, index: usize) -> Option<&str> {
        self.arguments.get(index).map(Argument::value)
    }

    pub fn get_named_argument(&self, name: [u8; 2]) -> Option<&str> {
        self.arguments.iter().find_map(|a| match a {
            Argument::Named(n, v) if *n == name => Some(v.as_str()),
            _ => None,
        })
    }

    pub fn has_named_argument(&self, name: [u8; 2]) -> usize {
        self.arguments
            .iter()
            .filter(|a| matches!(a, Argument::Named(n, _) if *n == name))
            .count()
    }

    pub fn get_named_argument_index(&self, name: [u8; 2]) -> Option<usize> {
        self.arguments
            .iter()
            .position(|a| matches!(a, Argument::Named(n, _) if *n == name))
    }

    /// Total number of arguments (named and positional).
    pub fn arg_count(&self) -> usize {
        self.arguments.len()
    }

    /// The name/value pair at `index`, or `None` if it's positional or
    /// out of range.
    pub fn named_argument_at(&self, index: usize) -> Option<([u8; 2], &str)> {
        match self.arguments.get(index)? {
            Argument::Named(name, value) => Some((*name, value)),
            Argument::Positional(_) => None,
        }
    }

    pub fn add_argument(&mut self, text: impl Into<String>) {
        self.arguments.push(Argument::Positional(text.into()));
        self.rebuild_cache();
    }

    pub fn add_named_argument(&mut self, name: [u8; 2], value: impl Into<String>) {
        self.arguments.push(Argument::Named(name, value.into()));
        self.rebuild_cache();
    }

    pub fn add_named_argument_int(&mut self, name: [u8; 2], value: i64) {
        self.add_named_argument(name, value.to_string());
    }

    pub fn add_named_argument_uint64(&mut self, name: [u8; 2], value: u64) {
        self.add_named_argument(name, value.to_string());
    }

    /// Removes every occurrence of `name`, returning the count removed.
    pub fn remove_named_argument(&mut self, name: [u8; 2]) -> usize {
        let before = self.arguments.len();
        self.arguments
            .retain(|a| !matches!(a, Argument::Named(n, _) if *n == name));
        let removed = before - self.arguments.len();
        if removed > 0 {
            self.rebuild_cache();
        }
        removed
    }

    /// Replaces the first occurrence's value, or appends a new named
    /// argument if `name` is not present.
    pub fn replace_named_argument(&mut self, name: [u8; 2], value: impl Into<String>) {
        let value = value.into();
        if let Some(slot) = self.arguments.iter_mut().find(|a| matches!(a, Argument::Named(n, _) if *n == name)) {
            *slot = Argument::Named(name, value);
        } else {
            self.arguments.push(Argument::Named(name, value));
        }
        self.rebuild_cache();
    }

    /// Idempotent: appends the trailing LF if absent.
    pub fn terminate(&mut self) {
        if !self.terminated {
            self.terminated = true;
            self.rebuild_cache();
        }
    }

    /// Idempotent: strips the trailing LF if present.
    pub fn unterminate(&mut self) {
        if self.terminated {
            self.terminated = false;
            self.rebuild_cache();
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Deep clone, independent of the source.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    fn rebuild_cache(&mut self) {
        let mut out = self.command();
        if let Some(sid) = self.source {
            out.push(' ');
            out.push_str(&sid.to_string());
        }
        if let Some(sid) = self.target {
            out.push(' ');
            out.push_str(&sid.to_string());
        }
        for tok in &self.feature_filter {
            out.push(' ');
            out.push_str(&tok.to_string());
        }
        for arg in &self.arguments {
            out.push(' ');
            out.push_str(&arg.to_wire_token());
        }
        if self.terminated {
            out.push('\n');
        }
        self.cache = out;
    }
}
