//! Inbound byte absorption and self-synchronizing token framing.
//!
//! Each read-readiness cycle pushes freshly received bytes through an
//! optional transform hook into a growable buffer. With framing enabled the
//! buffer is then scanned backward for the configured token: everything up
//! to and including the token is delivered as one message, trailing bytes
//! carry over to the next cycle in the partial buffer. Without framing every
//! absorption delivers immediately.

use bytes::{Bytes, BytesMut};

use crate::config::FramingConfig;

/// Hook applied to freshly absorbed bytes before they are appended.
pub type TransformFn = Box<dyn FnMut(&mut BytesMut) + Send + 'static>;

/// Per-connection inbound pipeline.
///
/// Invariant: between absorption cycles at most one of the read buffer and
/// the partial buffer is non-empty.
pub struct ReadPipeline {
    buf: BytesMut,
    partial: BytesMut,
    framing: Option<FramingConfig>,
    transform: Option<TransformFn>,
}

impl ReadPipeline {
    pub fn new(framing: Option<FramingConfig>) -> Self {
        Self {
            buf: BytesMut::new(),
            partial: BytesMut::new(),
            framing,
            transform: None,
        }
    }

    /// Install or clear the receive transform.
    pub fn set_transform(&mut self, transform: Option<TransformFn>) {
        self.transform = transform;
    }

    /// Absorb one chunk, returning the bytes to deliver to the owner, if
    /// any.
    pub fn absorb(&mut self, chunk: &[u8]) -> Option<Bytes> {
        debug_assert!(
            self.buf.is_empty() || self.partial.is_empty(),
            "read and partial buffers both carry bytes"
        );
        if !self.partial.is_empty() {
            // Carry-over from the previous self-sync cycle comes first.
            self.buf = std::mem::take(&mut self.partial);
        }

        let mut fresh = BytesMut::from(chunk);
        if let Some(transform) = self.transform.as_mut() {
            transform(&mut fresh);
        }
        self.buf.extend_from_slice(&fresh);

        match &self.framing {
            Some(framing) => match rfind_token(&self.buf, &framing.token) {
                Some(end) => {
                    let frame = self.buf.split_to(end).freeze();
                    self.partial = self.buf.split();
                    Some(frame)
                }
                None if self.buf.len() >= framing.max_buffer => {
                    // Framing failure path: flush whole rather than grow
                    // without bound.
                    tracing::debug!(
                        len = self.buf.len(),
                        cap = framing.max_buffer,
                        "no token under buffer cap, flushing unframed"
                    );
                    Some(self.buf.split().freeze())
                }
                None => None,
            },
            None => {
                if self.buf.is_empty() {
                    None
                } else {
                    Some(self.buf.split().freeze())
                }
            }
        }
    }

    /// Bytes currently held across both buffers.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len() + self.partial.len()
    }

    /// Discard everything held. Used on disconnect.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.partial.clear();
    }
}

impl std::fmt::Debug for ReadPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadPipeline")
            .field("buffered", &self.buffered())
            .field("framing", &self.framing)
            .finish()
    }
}

/// Reverse-scan `haystack` for the last occurrence of `token`, returning
/// the index just past it.
fn rfind_token(haystack: &[u8], token: &[u8]) -> Option<usize> {
    if token.is_empty() || haystack.len() < token.len() {
        return None;
    }
    (0..=haystack.len() - token.len())
        .rev()
        .find(|&start| &haystack[start..start + token.len()] == token)
        .map(|start| start + token.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FramingConfig;

    fn framed(token: &[u8], max: usize) -> ReadPipeline {
        ReadPipeline::new(Some(FramingConfig {
            token: token.to_vec(),
            max_buffer: max,
        }))
    }

    #[test]
    fn rfind_token_finds_last_occurrence() {
        assert_eq!(rfind_token(b"a\nb\nc", b"\n"), Some(4));
        assert_eq!(rfind_token(b"abc", b"\n"), None);
        assert_eq!(rfind_token(b"END", b"END"), Some(3));
        assert_eq!(rfind_token(b"", b"\n"), None);
    }

    #[test]
    fn raw_mode_delivers_every_cycle() {
        let mut pipeline = ReadPipeline::new(None);
        assert_eq!(pipeline.absorb(b"abc").unwrap(), Bytes::from_static(b"abc"));
        assert_eq!(pipeline.absorb(b"d").unwrap(), Bytes::from_static(b"d"));
        assert_eq!(pipeline.buffered(), 0);
    }

    #[test]
    fn holds_until_token_arrives() {
        // Token "\n", cap 8; "ab" arrives first, then "cdefg\n".
        let mut pipeline = framed(b"\n", 8);
        assert!(pipeline.absorb(b"ab").is_none());
        let frame = pipeline.absorb(b"cdefg\n").unwrap();
        assert_eq!(frame, Bytes::from_static(b"abcdefg\n"));
        assert_eq!(pipeline.buffered(), 0);
    }

    #[test]
    fn trailing_bytes_carry_to_next_cycle() {
        let mut pipeline = framed(b"\n", 64);
        let frame = pipeline.absorb(b"one\ntwo").unwrap();
        assert_eq!(frame, Bytes::from_static(b"one\n"));
        assert_eq!(pipeline.buffered(), 3);
        let frame = pipeline.absorb(b"\n").unwrap();
        assert_eq!(frame, Bytes::from_static(b"two\n"));
    }

    #[test]
    fn multi_token_chunk_delivers_one_message() {
        // Backward scan: a single absorption holding several tokens goes
        // out as one delivery ending at the last token.
        let mut pipeline = framed(b"\n", 64);
        let frame = pipeline.absorb(b"a\nb\nc\nrest").unwrap();
        assert_eq!(frame, Bytes::from_static(b"a\nb\nc\n"));
        assert_eq!(pipeline.buffered(), 4);
    }

    #[test]
    fn byte_at_a_time_is_idempotent() {
        let input = b"alpha\nbeta\ngamma\n";
        let mut whole = framed(b"\n", 1024);
        let at_once = whole.absorb(input).unwrap();

        let mut pipeline = framed(b"\n", 1024);
        let mut frames: Vec<Bytes> = Vec::new();
        for byte in input.iter() {
            if let Some(frame) = pipeline.absorb(std::slice::from_ref(byte)) {
                frames.push(frame);
            }
        }
        assert_eq!(frames.len(), 3);
        for frame in &frames {
            assert!(frame.ends_with(b"\n"));
        }
        let rejoined: Vec<u8> = frames.iter().flat_map(|f| f.iter().copied()).collect();
        assert_eq!(rejoined, at_once.to_vec());
        assert_eq!(pipeline.buffered(), 0);
    }

    #[test]
    fn cap_overflow_flushes_unframed() {
        let mut pipeline = framed(b"\n", 4);
        assert!(pipeline.absorb(b"ab").is_none());
        let flushed = pipeline.absorb(b"cd").unwrap();
        assert_eq!(flushed, Bytes::from_static(b"abcd"));
        assert_eq!(pipeline.buffered(), 0);
    }

    #[test]
    fn transform_rewrites_fresh_bytes_only() {
        let mut pipeline = framed(b"\n", 64);
        pipeline.set_transform(Some(Box::new(|chunk: &mut BytesMut| {
            chunk.iter_mut().for_each(|b| *b = b.to_ascii_uppercase());
        })));
        assert!(pipeline.absorb(b"ab").is_none());
        let frame = pipeline.absorb(b"c\n").unwrap();
        assert_eq!(frame, Bytes::from_static(b"ABC\n"));
    }
}
