//! Incremental byte accumulator for streamed request/response bodies.
//!
//! Unlike [`crate::http::request::Parser`]'s fixed single-shot buffer (sized once per the
//! connection's [`crate::limits::ReqLimits`] and filled by exactly one `read()`), a
//! [`BufferList`] grows as bytes arrive across multiple reads — the shape needed for
//! [`crate::Request::read`]/`read_all`, which pull a request body that may not have
//! arrived in the same TCP segment as the headers.

/// A growable byte buffer with independent write and read cursors.
///
/// Bytes are appended at the tail (`append`) and consumed from the head (`fill`,
/// `snapshot`); `rewind` un-consumes without discarding, for callers that peek before
/// deciding how much to take.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct BufferList {
    data: Vec<u8>,
    read_pos: usize,
}

impl BufferList {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            read_pos: 0,
        }
    }

    /// Appends newly received bytes to the tail.
    pub(crate) fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Total bytes appended, including already-consumed ones.
    pub(crate) fn count(&self) -> usize {
        self.data.len()
    }

    /// Bytes available to read but not yet consumed.
    pub(crate) fn readable_bytes(&self) -> usize {
        self.data.len() - self.read_pos
    }

    /// Returns the unconsumed bytes without advancing the read cursor.
    pub(crate) fn snapshot(&self) -> &[u8] {
        &self.data[self.read_pos..]
    }

    /// Copies as many unconsumed bytes as fit into `into`, advancing the read cursor by
    /// the number copied. Returns that count.
    pub(crate) fn fill(&mut self, into: &mut [u8]) -> usize {
        let n = into.len().min(self.readable_bytes());
        into[..n].copy_from_slice(&self.data[self.read_pos..self.read_pos + n]);
        self.read_pos += n;
        n
    }

    /// Drains every unconsumed byte into `into`, advancing the read cursor to the tail.
    pub(crate) fn fill_growable(&mut self, into: &mut Vec<u8>) -> usize {
        let n = self.readable_bytes();
        into.extend_from_slice(&self.data[self.read_pos..]);
        self.read_pos = self.data.len();
        n
    }

    /// Moves the read cursor back by `n` bytes (e.g. after a partial parse). Saturates at 0.
    pub(crate) fn rewind(&mut self, n: usize) {
        self.read_pos = self.read_pos.saturating_sub(n);
    }

    /// Clears both the data and the cursor, keeping the allocated capacity.
    pub(crate) fn reset(&mut self) {
        self.data.clear();
        self.read_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_fill_round_trips() {
        let mut b = BufferList::with_capacity(16);
        b.append(b"hello");
        b.append(b" world");

        let mut out = [0u8; 11];
        assert_eq!(b.fill(&mut out), 11);
        assert_eq!(&out, b"hello world");
        assert_eq!(b.readable_bytes(), 0);
    }

    #[test]
    fn fill_respects_destination_size() {
        let mut b = BufferList::with_capacity(16);
        b.append(b"abcdef");

        let mut out = [0u8; 3];
        assert_eq!(b.fill(&mut out), 3);
        assert_eq!(&out, b"abc");
        assert_eq!(b.readable_bytes(), 3);
        assert_eq!(b.snapshot(), b"def");
    }

    #[test]
    fn rewind_un_consumes() {
        let mut b = BufferList::with_capacity(16);
        b.append(b"abcdef");

        let mut out = [0u8; 4];
        b.fill(&mut out);
        b.rewind(2);
        assert_eq!(b.snapshot(), b"cdef");
    }

    #[test]
    fn reset_clears_everything() {
        let mut b = BufferList::with_capacity(16);
        b.append(b"data");
        b.reset();
        assert_eq!(b.count(), 0);
        assert_eq!(b.readable_bytes(), 0);
    }

    #[test]
    fn fill_growable_drains_all_unconsumed() {
        let mut b = BufferList::with_capacity(16);
        b.append(b"payload");

        let mut out = Vec::new();
        assert_eq!(b.fill_growable(&mut out), 7);
        assert_eq!(out, b"payload");
        assert_eq!(b.readable_bytes(), 0);
    }
}
