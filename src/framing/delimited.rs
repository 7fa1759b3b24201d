use crate::error::StormError;
use crate::framing::Framer;

/// Splits on a configurable single byte (default newline `0x0A`); the
/// delimiter is stripped on read and appended on write (spec.md §4.2).
#[derive(Debug, Clone, Copy)]
pub struct DelimiterFramer {
    delimiter: u8,
}

impl Default for DelimiterFramer {
    fn default() -> Self {
        Self { delimiter: b'\n' }
    }
}

impl DelimiterFramer {
    pub fn new(delimiter: u8) -> Self {
        Self { delimiter }
    }
}

impl Framer for DelimiterFramer {
    fn try_read_message(&self, buffer: &mut Vec<u8>) -> Result<Option<Vec<u8>>, StormError> {
        let Some(pos) = buffer.iter().position(|&b| b == self.delimiter) else {
            return Ok(None);
        };

        let mut rest = buffer.split_off(pos + 1);
        buffer.truncate(pos);
        let message = std::mem::take(buffer);
        std::mem::swap(buffer, &mut rest);
        Ok(Some(message))
    }

    fn write_frame(&self, message: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(message);
        out.push(self.delimiter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_delimiter_is_newline() {
        let framer = DelimiterFramer::default();
        let mut wire = Vec::new();
        framer.write_frame(b"hello", &mut wire);
        assert_eq!(wire, b"hello\n");

        let msg = framer.try_read_message(&mut wire).unwrap();
        assert_eq!(msg, Some(b"hello".to_vec()));
        assert!(wire.is_empty());
    }

    #[test]
    fn needs_more_bytes_without_delimiter() {
        let framer = DelimiterFramer::default();
        let mut buf = b"partial".to_vec();
        assert_eq!(framer.try_read_message(&mut buf).unwrap(), None);
        assert_eq!(buf, b"partial");
    }

    #[test]
    fn custom_delimiter() {
        let framer = DelimiterFramer::new(b';');
        let mut wire = Vec::new();
        framer.write_frame(b"a", &mut wire);
        framer.write_frame(b"b", &mut wire);
        assert_eq!(wire, b"a;b;");

        let first = framer.try_read_message(&mut wire).unwrap();
        assert_eq!(first, Some(b"a".to_vec()));
        let second = framer.try_read_message(&mut wire).unwrap();
        assert_eq!(second, Some(b"b".to_vec()));
    }
}
