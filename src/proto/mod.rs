//! The ADC wire format: message parsing/editing/serialization and the
//! escape rules it relies on.

pub mod error;
pub mod escape;
pub mod message;

pub use error::ParseError;
pub use escape::{escape, unescape, UnescapeError};
pub use message::{AdcMessage, Argument, Context, FeatureToken, Priority};
