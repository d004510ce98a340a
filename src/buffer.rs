use std::mem;

/// Error returned when the read cursor is advanced past the write cursor.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error)]
#[display("advancing the read cursor by {advance} bytes, but only {readable} bytes are readable")]
pub struct AdvanceError {
    pub advance: usize,
    pub readable: usize,
}

/// Resizable byte region with a read/write cursor pair.
///
/// Bytes are appended at the write cursor (the end of the underlying vector)
/// and consumed from the read cursor; the unread range is
/// `[read cursor, write cursor)`. There is no explicit flip between write and
/// read mode: both cursors are live at all times. Growth is unbounded - the
/// maximum-size policy belongs to the caller.
#[derive(Clone, Debug, Default)]
pub struct Buffer {
    data: Vec<u8>,
    read: usize,
}

impl Buffer {
    pub fn new() -> Self { Self::default() }

    /// Appends bytes at the write cursor, growing capacity as needed.
    pub fn append(&mut self, bytes: &[u8]) { self.data.extend_from_slice(bytes); }

    /// The unread byte range `[read cursor, write cursor)`.
    pub fn readable(&self) -> &[u8] { &self.data[self.read..] }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize { self.data.len() - self.read }

    /// Number of bytes already consumed through [`Self::advance_read`].
    pub fn consumed(&self) -> usize { self.read }

    /// Whether all appended bytes have been consumed.
    pub fn is_empty(&self) -> bool { self.remaining() == 0 }

    /// Moves the read cursor forward by `n` bytes.
    pub fn advance_read(&mut self, n: usize) -> Result<(), AdvanceError> {
        if n > self.remaining() {
            return Err(AdvanceError {
                advance: n,
                readable: self.remaining(),
            });
        }
        self.read += n;
        Ok(())
    }

    /// Discards already-consumed bytes and resets the read cursor, removing
    /// fragmentation at the cost of moving the unread tail.
    pub fn compact(&mut self) {
        if self.read == 0 {
            return;
        }
        self.data.drain(..self.read);
        self.read = 0;
    }

    /// Removes and returns all unread bytes, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<u8> {
        self.compact();
        mem::take(&mut self.data)
    }

    /// Drops all content and resets both cursors.
    pub fn clear(&mut self) {
        self.data.clear();
        self.read = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read() {
        let mut buf = Buffer::new();
        assert!(buf.is_empty());

        buf.append(b"hello");
        buf.append(b" world");
        assert_eq!(buf.readable(), b"hello world");
        assert_eq!(buf.remaining(), 11);

        buf.advance_read(6).unwrap();
        assert_eq!(buf.readable(), b"world");
        assert_eq!(buf.consumed(), 6);
    }

    #[test]
    fn advance_past_write_cursor_fails() {
        let mut buf = Buffer::new();
        buf.append(b"abc");
        assert_eq!(buf.advance_read(4), Err(AdvanceError {
            advance: 4,
            readable: 3,
        }));
        // The failed advance must not move the cursor.
        assert_eq!(buf.readable(), b"abc");
    }

    #[test]
    fn compact_discards_consumed_prefix() {
        let mut buf = Buffer::new();
        buf.append(b"request-1");
        buf.advance_read(8).unwrap();
        buf.compact();
        assert_eq!(buf.consumed(), 0);
        assert_eq!(buf.readable(), b"1");

        buf.append(b"23");
        assert_eq!(buf.readable(), b"123");
    }

    #[test]
    fn take_drains_unread_bytes() {
        let mut buf = Buffer::new();
        buf.append(b"ping\npong\n");
        buf.advance_read(5).unwrap();
        assert_eq!(buf.take(), b"pong\n");
        assert!(buf.is_empty());
        assert_eq!(buf.consumed(), 0);
    }

    #[test]
    fn clear_resets_cursors() {
        let mut buf = Buffer::new();
        buf.append(b"stale");
        buf.advance_read(2).unwrap();
        buf.clear();
        assert!(buf.is_empty());
        buf.append(b"fresh");
        assert_eq!(buf.readable(), b"fresh");
    }
}
