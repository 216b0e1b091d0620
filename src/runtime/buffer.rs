//! Per-connection byte buffers.
//!
//! Two halves of every connection's data plane:
//! - `LineFramer`: accumulates inbound bytes and splits them into lines.
//! - `OutboundQueue`: ordered chunks waiting for the socket to accept them.
//!
//! ## Partial Writes
//!
//! Sockets are non-blocking, so a write may take only a prefix of a chunk.
//! The unsent suffix goes back to the front of the queue and flushing stops
//! until the next writable notification. Bytes reach the socket in exactly
//! the order they were enqueued.

use bytes::{Buf, Bytes, BytesMut};
use memchr::memchr;
use std::collections::VecDeque;
use std::io::{self, Write};

/// Accumulates raw bytes and yields trimmed, newline-delimited lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: BytesMut,
}

/// Result of feeding a read into the framer.
#[derive(Debug)]
pub enum Feed<'a> {
    /// Zero-length read: the peer closed its side.
    Closed,
    /// Data was buffered; iterate to pull complete lines.
    Lines(Lines<'a>),
}

impl Feed<'_> {
    pub fn is_closed(&self) -> bool {
        matches!(self, Feed::Closed)
    }
}

/// Lazy iterator over the complete lines currently buffered.
///
/// Dropping it early is fine: unconsumed lines stay in the framer.
#[derive(Debug)]
pub struct Lines<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Lines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.framer.next_line()
    }
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
        }
    }

    /// Append `data` and return the lines it completes.
    pub fn feed(&mut self, data: &[u8]) -> Feed<'_> {
        if data.is_empty() {
            return Feed::Closed;
        }
        self.buf.extend_from_slice(data);
        Feed::Lines(Lines { framer: self })
    }

    /// Pull the next complete line, if any.
    pub fn next_line(&mut self) -> Option<String> {
        let i = memchr(b'\n', &self.buf)?;
        let raw = self.buf.split_to(i + 1);
        let text = String::from_utf8_lossy(&raw[..i]);
        Some(text.trim_matches(|c: char| c.is_ascii_whitespace()).to_string())
    }

    /// Bytes held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// What happened during a flush attempt.
#[derive(Debug)]
pub enum FlushOutcome {
    /// Every queued byte was accepted.
    Drained,
    /// The socket stopped accepting bytes; the rest waits for the next tick.
    Pending,
    /// Write failed; the connection should be closed.
    Failed(io::Error),
}

/// FIFO of chunks awaiting transmission.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    chunks: VecDeque<Bytes>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk to the back of the queue. Empty chunks are dropped.
    pub fn enqueue(&mut self, chunk: impl Into<Bytes>) {
        let chunk = chunk.into();
        if !chunk.is_empty() {
            self.chunks.push_back(chunk);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Number of chunks waiting.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Total bytes waiting.
    pub fn pending_bytes(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }

    /// Write chunks front to back until the queue is empty or `writer` pushes back.
    pub fn flush<W: Write + ?Sized>(&mut self, writer: &mut W) -> FlushOutcome {
        while let Some(mut chunk) = self.chunks.pop_front() {
            match writer.write(&chunk) {
                Ok(0) => {
                    self.chunks.push_front(chunk);
                    return FlushOutcome::Failed(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "write returned 0",
                    ));
                }
                Ok(n) if n < chunk.len() => {
                    chunk.advance(n);
                    self.chunks.push_front(chunk);
                    return FlushOutcome::Pending;
                }
                Ok(_) => {}
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.chunks.push_front(chunk);
                    return FlushOutcome::Pending;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                    self.chunks.push_front(chunk);
                }
                Err(e) => {
                    self.chunks.push_front(chunk);
                    return FlushOutcome::Failed(e);
                }
            }
        }
        FlushOutcome::Drained
    }

    /// Discard everything still queued.
    pub fn clear(&mut self) {
        self.chunks.clear();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Writer that follows a script: each step accepts up to N bytes,
    /// or fails with the given error kind. Past the script it accepts everything.
    pub(crate) struct ScriptedWriter {
        pub(crate) written: Vec<u8>,
        script: VecDeque<Result<usize, io::ErrorKind>>,
    }

    impl ScriptedWriter {
        pub(crate) fn new(script: Vec<Result<usize, io::ErrorKind>>) -> Self {
            Self {
                written: Vec::new(),
                script: script.into(),
            }
        }
    }

    impl Write for ScriptedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self.script.pop_front() {
                Some(Ok(limit)) => {
                    let n = limit.min(buf.len());
                    self.written.extend_from_slice(&buf[..n]);
                    Ok(n)
                }
                Some(Err(kind)) => Err(io::Error::new(kind, "scripted")),
                None => {
                    self.written.extend_from_slice(buf);
                    Ok(buf.len())
                }
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn collect_lines(framer: &mut LineFramer, data: &[u8]) -> Vec<String> {
        match framer.feed(data) {
            Feed::Lines(lines) => lines.collect(),
            Feed::Closed => Vec::new(),
        }
    }

    #[test]
    fn test_framer_crlf_and_lf() {
        let mut framer = LineFramer::new();
        let lines = collect_lines(&mut framer, b"hello\r\nworld\n");
        assert_eq!(lines, vec!["hello", "world"]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_framer_trims_surrounding_whitespace() {
        let mut framer = LineFramer::new();
        let lines = collect_lines(&mut framer, b"   say hi  \r\n \t \n");
        assert_eq!(lines, vec!["say hi", ""]);
    }

    #[test]
    fn test_framer_keeps_partial_line() {
        let mut framer = LineFramer::new();
        assert!(collect_lines(&mut framer, b"look").is_empty());
        assert_eq!(framer.pending(), 4);

        let lines = collect_lines(&mut framer, b"\nsay a");
        assert_eq!(lines, vec!["look"]);
        assert_eq!(framer.pending(), 5);
    }

    #[test]
    fn test_framer_empty_read_is_closed() {
        let mut framer = LineFramer::new();
        assert!(framer.feed(b"").is_closed());
        assert!(!framer.feed(b"x").is_closed());
    }

    #[test]
    fn test_framer_lines_are_restartable() {
        let mut framer = LineFramer::new();
        match framer.feed(b"one\ntwo\nthree\n") {
            Feed::Lines(mut lines) => assert_eq!(lines.next().as_deref(), Some("one")),
            Feed::Closed => panic!("unexpected close"),
        }

        assert_eq!(framer.next_line().as_deref(), Some("two"));
        assert_eq!(framer.next_line().as_deref(), Some("three"));
        assert_eq!(framer.next_line(), None);
    }

    #[test]
    fn test_framer_invalid_utf8_is_lossy() {
        let mut framer = LineFramer::new();
        let lines = collect_lines(&mut framer, b"a\xffb\n");
        assert_eq!(lines, vec!["a\u{fffd}b"]);
    }

    #[test]
    fn test_framer_fragmentation_transparent() {
        let stream: &[u8] = b"alice\r\n  alice \nsay hello there\r\n\n tell bob hi\nquit\r\ntrailing";

        let mut whole = LineFramer::new();
        let expected = collect_lines(&mut whole, stream);
        assert_eq!(expected.len(), 6);

        // Every single split point
        for cut in 0..=stream.len() {
            let mut framer = LineFramer::new();
            let mut got = Vec::new();
            for part in [&stream[..cut], &stream[cut..]] {
                if !part.is_empty() {
                    got.extend(collect_lines(&mut framer, part));
                }
            }
            assert_eq!(got, expected, "split at {cut}");
            assert_eq!(framer.pending(), b"trailing".len());
        }

        // Byte at a time
        let mut framer = LineFramer::new();
        let mut got = Vec::new();
        for b in stream.chunks(1) {
            got.extend(collect_lines(&mut framer, b));
        }
        assert_eq!(got, expected);
    }

    #[test]
    fn test_queue_drains_in_order() {
        let mut queue = OutboundQueue::new();
        queue.enqueue("first ");
        queue.enqueue(String::from("second "));
        queue.enqueue(b"third".to_vec());
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pending_bytes(), 18);

        let mut out = Vec::new();
        assert!(matches!(queue.flush(&mut out), FlushOutcome::Drained));
        assert_eq!(out, b"first second third");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_short_write_replays_suffix() {
        let mut queue = OutboundQueue::new();
        queue.enqueue("hello ");
        queue.enqueue("world");

        let mut writer = ScriptedWriter::new(vec![Ok(3)]);
        assert!(matches!(queue.flush(&mut writer), FlushOutcome::Pending));
        assert_eq!(writer.written, b"hel");
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pending_bytes(), 8);

        assert!(matches!(queue.flush(&mut writer), FlushOutcome::Drained));
        assert_eq!(writer.written, b"hello world");
    }

    #[test]
    fn test_queue_would_block_keeps_everything() {
        let mut queue = OutboundQueue::new();
        queue.enqueue("abc");

        let mut writer = ScriptedWriter::new(vec![Err(io::ErrorKind::WouldBlock)]);
        assert!(matches!(queue.flush(&mut writer), FlushOutcome::Pending));
        assert!(writer.written.is_empty());
        assert_eq!(queue.pending_bytes(), 3);

        assert!(matches!(queue.flush(&mut writer), FlushOutcome::Drained));
        assert_eq!(writer.written, b"abc");
    }

    #[test]
    fn test_queue_interrupted_is_retried() {
        let mut queue = OutboundQueue::new();
        queue.enqueue("abc");

        let mut writer = ScriptedWriter::new(vec![Err(io::ErrorKind::Interrupted)]);
        assert!(matches!(queue.flush(&mut writer), FlushOutcome::Drained));
        assert_eq!(writer.written, b"abc");
    }

    #[test]
    fn test_queue_hard_error_stops_flushing() {
        let mut queue = OutboundQueue::new();
        queue.enqueue("abc");
        queue.enqueue("def");

        let mut writer = ScriptedWriter::new(vec![Ok(3), Err(io::ErrorKind::BrokenPipe)]);
        match queue.flush(&mut writer) {
            FlushOutcome::Failed(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(writer.written, b"abc");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_queue_zero_write_fails() {
        let mut queue = OutboundQueue::new();
        queue.enqueue("abc");

        let mut writer = ScriptedWriter::new(vec![Ok(0)]);
        match queue.flush(&mut writer) {
            FlushOutcome::Failed(e) => assert_eq!(e.kind(), io::ErrorKind::WriteZero),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_queue_empty_chunks_ignored() {
        let mut queue = OutboundQueue::new();
        queue.enqueue("");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_interleaved_partial_flushes_preserve_bytes() {
        // Deterministic spread of write sizes, including zero-progress ticks
        let sizes = [1usize, 0, 7, 2, 13, 0, 5, 64, 3];
        let mut queue = OutboundQueue::new();
        let mut expected = Vec::new();
        let mut writer = ScriptedWriter::new(Vec::new());

        for round in 0..40usize {
            let chunk = format!("chunk-{round}:{}|", "x".repeat(round % 9));
            expected.extend_from_slice(chunk.as_bytes());
            queue.enqueue(chunk);

            let size = sizes[round % sizes.len()];
            let step = if size == 0 {
                Err(io::ErrorKind::WouldBlock)
            } else {
                Ok(size)
            };
            writer.script.push_back(step);
            let _ = queue.flush(&mut writer);
        }

        assert!(matches!(queue.flush(&mut writer), FlushOutcome::Drained));
        assert_eq!(writer.written, expected);
    }
}
