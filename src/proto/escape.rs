//! ADC argument escaping: `\s` ↔ space, `\n` ↔ LF, `\\` ↔ `\`.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnescapeError {
    #[error("dangling backslash at end of argument")]
    DanglingEscape,
    #[error("unknown escape sequence '\\{0}'")]
    UnknownEscape(char),
}

/// Escapes space, LF, and backslash. Inverse of [`unescape`] for any input
/// not containing a raw space or LF (those never occur pre-escape in a
/// well-formed frame, but this function does not assert that).
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            ' ' => out.push_str("\\s"),
            '\n' => out.push_str("\\n"),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape`]. Any backslash sequence other than `\s`, `\n`,
/// `\\` is an error.
pub fn unescape(input: &str) -> Result<String, UnescapeError> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('s') => out.push(' '),
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => return Err(UnescapeError::UnknownEscape(other)),
            None => return Err(UnescapeError::DanglingEscape),
        }
    }
    Ok(out)
}
