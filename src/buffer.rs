//! Growable byte queue used for connection input and output.

use crate::reactor::poller::unix::{sys_read, sys_write};

use std::io;
use std::os::fd::RawFd;

/// Initial capacity of a connection buffer.
pub const INITIAL_CAPACITY: usize = 1024;

/// A byte queue with a read cursor and a write cursor.
///
/// Bytes between the two cursors are readable. Appending writes at the
/// write cursor; reading, consuming and draining to a descriptor
/// advance the read cursor. The backing store is never shrunk: when
/// space runs out the unread bytes are first shifted to the front, and
/// the store only grows (geometrically) if that is not enough.
///
/// Invariant: `read_index <= write_index <= capacity()`.
#[derive(Debug, Clone)]
pub struct Buffer {
    data: Vec<u8>,
    read_index: usize,
    write_index: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            read_index: 0,
            write_index: 0,
        }
    }

    /// Number of bytes that can be read.
    pub fn readable_size(&self) -> usize {
        self.write_index - self.read_index
    }

    /// Number of bytes that can be appended without moving or growing.
    pub fn writable_size(&self) -> usize {
        self.data.len() - self.write_index
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_index == self.write_index
    }

    /// The readable bytes, without consuming them.
    pub fn peek(&self) -> &[u8] {
        &self.data[self.read_index..self.write_index]
    }

    /// The readable bytes, mutably, for in-place transforms.
    pub fn peek_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.read_index..self.write_index]
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.make_room(bytes.len());
        self.data[self.write_index..self.write_index + bytes.len()].copy_from_slice(bytes);
        self.write_index += bytes.len();
    }

    pub fn append_byte(&mut self, byte: u8) {
        self.append(&[byte]);
    }

    /// Removes and returns the next byte.
    pub fn read_byte(&mut self) -> Option<u8> {
        let byte = self.peek().first().copied()?;
        self.consume(1);
        Some(byte)
    }

    /// Removes and returns up to `n` bytes.
    pub fn read(&mut self, n: usize) -> Vec<u8> {
        let n = n.min(self.readable_size());
        let bytes = self.data[self.read_index..self.read_index + n].to_vec();
        self.consume(n);
        bytes
    }

    /// Discards up to `n` readable bytes and returns how many were discarded.
    ///
    /// Asking for more than [`readable_size`](Self::readable_size) is
    /// clamped.
    pub fn consume(&mut self, n: usize) -> usize {
        let n = n.min(self.readable_size());
        self.read_index += n;

        if self.read_index == self.write_index {
            self.read_index = 0;
            self.write_index = 0;
        }

        n
    }

    /// Discards every readable byte.
    pub fn clear(&mut self) {
        self.read_index = 0;
        self.write_index = 0;
    }

    /// Performs one `read(2)` of at most `chunk` bytes into the spare space.
    ///
    /// Returns `Ok(0)` at end of stream. `WouldBlock` and other errors
    /// are returned untouched; the buffer is unchanged in that case.
    pub fn read_from_fd(&mut self, fd: RawFd, chunk: usize) -> io::Result<usize> {
        self.make_room(chunk);

        let end = self.write_index + chunk;
        let n = sys_read(fd, &mut self.data[self.write_index..end])?;
        self.write_index += n;

        Ok(n)
    }

    /// Performs one `write(2)` of the readable bytes.
    ///
    /// Only the bytes the descriptor accepted are consumed; the rest
    /// stay readable so the write can be retried.
    pub fn write_to_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        if self.is_empty() {
            return Ok(0);
        }

        let n = sys_write(fd, self.peek())?;
        self.consume(n);

        Ok(n)
    }

    /// Ensures at least `additional` writable bytes.
    fn make_room(&mut self, additional: usize) {
        if self.writable_size() >= additional {
            return;
        }

        let readable = self.readable_size();

        // Compacting is enough when the consumed prefix covers the shortfall.
        if self.read_index + self.writable_size() >= additional {
            self.data.copy_within(self.read_index..self.write_index, 0);
            self.read_index = 0;
            self.write_index = readable;
            return;
        }

        let needed = self.write_index + additional;
        let mut capacity = self.data.len().max(1);
        while capacity < needed {
            capacity *= 2;
        }
        self.data.resize(capacity, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    fn assert_invariant(buffer: &Buffer) {
        assert!(buffer.read_index <= buffer.write_index);
        assert!(buffer.write_index <= buffer.capacity());
    }

    #[test]
    fn test_append_and_read() {
        let mut buffer = Buffer::with_capacity(4);
        buffer.append(b"hello");
        assert_eq!(buffer.readable_size(), 5);
        assert!(buffer.capacity() >= 5);

        assert_eq!(buffer.read(2), b"he");
        assert_eq!(buffer.peek(), b"llo");
        assert_eq!(buffer.read_byte(), Some(b'l'));
        assert_invariant(&buffer);
    }

    #[test]
    fn test_over_consume_is_clamped() {
        let mut buffer = Buffer::new();
        buffer.append(b"abc");

        assert_eq!(buffer.consume(10), 3);
        assert!(buffer.is_empty());
        assert_eq!(buffer.read(5), Vec::<u8>::new());
        assert_eq!(buffer.read_byte(), None);
        assert_invariant(&buffer);
    }

    #[test]
    fn test_growth_is_geometric() {
        let mut buffer = Buffer::with_capacity(8);
        buffer.append(&[1; 9]);
        assert_eq!(buffer.capacity(), 16);

        buffer.append(&[2; 40]);
        assert_eq!(buffer.capacity(), 64);
        assert_eq!(buffer.readable_size(), 49);
    }

    #[test]
    fn test_compacts_before_growing() {
        let mut buffer = Buffer::with_capacity(8);
        buffer.append(b"abcdef");
        buffer.consume(4);

        // 2 readable, 2 writable, 4 reclaimable: compaction suffices.
        buffer.append(b"wxyz");
        assert_eq!(buffer.capacity(), 8);
        assert_eq!(buffer.peek(), b"efwxyz");
        assert_invariant(&buffer);
    }

    #[test]
    fn test_cursors_reset_when_drained() {
        let mut buffer = Buffer::with_capacity(8);
        buffer.append(b"abcd");
        buffer.consume(4);

        assert_eq!(buffer.writable_size(), 8);
    }

    #[test]
    fn test_invariant_under_interleaving() {
        let mut buffer = Buffer::with_capacity(3);

        for round in 0..200usize {
            let chunk = vec![round as u8; round % 7 + 1];
            buffer.append(&chunk);
            assert_invariant(&buffer);

            buffer.consume(round % 5);
            assert_invariant(&buffer);

            if round % 11 == 0 {
                buffer.read(buffer.readable_size() / 2);
                assert_invariant(&buffer);
            }
        }
    }

    #[test]
    fn test_read_from_fd_and_eof() {
        let (mut left, right) = UnixStream::pair().unwrap();
        std::io::Write::write_all(&mut left, b"ping").unwrap();
        drop(left);

        let mut buffer = Buffer::with_capacity(2);
        assert_eq!(buffer.read_from_fd(right.as_raw_fd(), 16).unwrap(), 4);
        assert_eq!(buffer.peek(), b"ping");
        assert_eq!(buffer.read_from_fd(right.as_raw_fd(), 16).unwrap(), 0);
        assert_invariant(&buffer);
    }

    #[test]
    fn test_partial_drain_keeps_remainder() {
        let (left, right) = UnixStream::pair().unwrap();
        left.set_nonblocking(true).unwrap();

        let payload = vec![b'x'; 4 * 1024 * 1024];
        let mut buffer = Buffer::new();
        buffer.append(&payload);

        let mut written = 0;
        loop {
            match buffer.write_to_fd(left.as_raw_fd()) {
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
            assert_invariant(&buffer);
        }

        assert!(written > 0);
        assert!(written < payload.len(), "socket accepted the whole payload");
        assert_eq!(buffer.readable_size(), payload.len() - written);
        assert_invariant(&buffer);

        // Appending after a partial drain keeps the queue order intact.
        buffer.append(b"tail");
        assert_eq!(&buffer.peek()[buffer.readable_size() - 4..], b"tail");
        assert_invariant(&buffer);

        drop(right);
    }
}
