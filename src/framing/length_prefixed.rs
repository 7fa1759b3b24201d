use crate::error::StormError;
use crate::framing::Framer;

/// 4-byte big-endian length header then payload (spec.md §4.2).
/// Maximum payload is 16 MiB; an oversize length fails with an
/// invalid-data error.
pub const MAX_LENGTH_PREFIXED_PAYLOAD: usize = 16 * 1024 * 1024;

#[derive(Debug, Default, Clone, Copy)]
pub struct LengthPrefixedFramer;

impl Framer for LengthPrefixedFramer {
    fn try_read_message(&self, buffer: &mut Vec<u8>) -> Result<Option<Vec<u8>>, StormError> {
        if buffer.len() < 4 {
            return Ok(None);
        }

        let len = u32::from_be_bytes(buffer[0..4].try_into().unwrap()) as usize;
        if len > MAX_LENGTH_PREFIXED_PAYLOAD {
            return Err(StormError::Framing(format!(
                "length-prefixed payload of {len} bytes exceeds the {MAX_LENGTH_PREFIXED_PAYLOAD} byte maximum"
            )));
        }

        let total = 4 + len;
        if buffer.len() < total {
            return Ok(None);
        }

        let mut rest = buffer.split_off(total);
        let payload = buffer.split_off(4);
        std::mem::swap(buffer, &mut rest);
        Ok(Some(payload))
    }

    fn write_frame(&self, message: &[u8], out: &mut Vec<u8>) {
        let len = message.len() as u32;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(message);
    }
}
