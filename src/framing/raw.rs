use crate::error::StormError;
use crate::framing::Framer;

/// No framing: one call consumes all currently available bytes and
/// returns them as a single message. Used when the application handles
/// message boundaries itself (spec.md §4.2).
#[derive(Debug, Default, Clone, Copy)]
pub struct RawFramer;

impl Framer for RawFramer {
    fn try_read_message(&self, buffer: &mut Vec<u8>) -> Result<Option<Vec<u8>>, StormError> {
        if buffer.is_empty() {
            return Ok(None);
        }
        Ok(Some(std::mem::take(buffer)))
    }

    fn write_frame(&self, message: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumes_everything_available() {
        let framer = RawFramer;
        let mut buf = b"hello world".to_vec();
        let msg = framer.try_read_message(&mut buf).unwrap();
        assert_eq!(msg, Some(b"hello world".to_vec()));
        assert!(buf.is_empty());
    }

    #[test]
    fn empty_buffer_needs_more() {
        let framer = RawFramer;
        let mut buf = Vec::new();
        assert_eq!(framer.try_read_message(&mut buf).unwrap(), None);
    }

    #[test]
    fn write_frame_is_identity() {
        let framer = RawFramer;
        let mut out = Vec::new();
        framer.write_frame(b"abc", &mut out);
        assert_eq!(out, b"abc");
    }
}
