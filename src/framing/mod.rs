//! Pluggable message framers for the TCP pipe (spec.md §4.2).
//!
//! A [`Framer`] splits an inbound byte stream into discrete messages
//! and writes outbound messages with a chosen framing discipline.

mod delimited;
mod length_prefixed;
mod raw;

pub use delimited::DelimiterFramer;
pub use length_prefixed::LengthPrefixedFramer;
pub use raw::RawFramer;

use crate::error::StormError;

/// Strategy that splits an inbound TCP byte stream into discrete
/// messages and serializes outbound ones.
pub trait Framer: Send + Sync {
    /// Attempts to consume a complete message from the front of
    /// `buffer`. On success, the consumed prefix is drained from
    /// `buffer` and the message bytes are returned. Returns `Ok(None)`
    /// (buffer left intact) when more bytes are needed.
    fn try_read_message(&self, buffer: &mut Vec<u8>) -> Result<Option<Vec<u8>>, StormError>;

    /// Appends `message`, framed, to `out`.
    fn write_frame(&self, message: &[u8], out: &mut Vec<u8>);
}
