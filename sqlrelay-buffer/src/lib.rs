//! Copy-free segmented byte-stream buffer chain.
//!
//! A chain is an ordered sequence of [`Segment`]s, each a `(start, end)`
//! window into a backing block shared (by reference count) with any chain
//! produced by [`BufferChain::clone_chain`]. Bytes are never copied except
//! when a caller explicitly asks for a sub-range via `clone_portion`.

use std::sync::Arc;

use sqlrelay_common::error::{GatewayError, Result};

/// Payload type tag carried on every segment of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
    Undefined,
    PlainSql,
    MysqlWire,
}

impl Default for PayloadType {
    fn default() -> Self {
        PayloadType::Undefined
    }
}

/// One window into a shared backing block.
#[derive(Debug, Clone)]
struct Segment {
    backing: Arc<Vec<u8>>,
    start: usize,
    end: usize,
    payload_type: PayloadType,
}

impl Segment {
    fn len(&self) -> usize {
        self.end - self.start
    }

    fn bytes(&self) -> &[u8] {
        &self.backing[self.start..self.end]
    }
}

/// An owned, ordered sequence of segments. An empty chain (no segments) is
/// the Rust-idiomatic equivalent of a `nil` head in the original
/// linked-list design.
#[derive(Debug, Clone, Default)]
pub struct BufferChain {
    segments: Vec<Segment>,
}

impl BufferChain {
    /// Allocates a fresh, empty chain backed by a single block of `size`
    /// bytes capacity. `start == end`: the segment carries no valid bytes
    /// until filled.
    pub fn allocate(size: usize) -> Self {
        BufferChain {
            segments: vec![Segment {
                backing: Arc::new(Vec::with_capacity(size)),
                start: 0,
                end: 0,
                payload_type: PayloadType::Undefined,
            }],
        }
    }

    /// An empty chain with no segments at all.
    pub fn empty() -> Self {
        BufferChain { segments: Vec::new() }
    }

    /// Whether every segment in the chain reports its backing as sole-owned.
    /// Mutation through [`fill`](Self::fill) is only permitted while this
    /// holds for the segment being filled.
    fn single_owner(backing: &Arc<Vec<u8>>) -> bool {
        Arc::strong_count(backing) == 1
    }

    /// Appends `bytes` to the last segment's backing block, extending its
    /// valid range. Only legal while that segment's backing is sole-owned
    /// (i.e. the chain has not yet been cloned) and there is remaining
    /// capacity — mirrors "mutated only by its sole owner in the chain".
    pub fn fill(&mut self, bytes: &[u8]) -> Result<()> {
        let seg = self
            .segments
            .last_mut()
            .ok_or_else(|| GatewayError::ResourceExhausted("fill on empty chain".to_string()))?;
        if !Self::single_owner(&seg.backing) {
            return Err(GatewayError::ResourceExhausted(
                "cannot mutate a shared backing block".to_string(),
            ));
        }
        let backing = Arc::get_mut(&mut seg.backing)
            .expect("single_owner checked above");
        if backing.len() + bytes.len() > backing.capacity() {
            return Err(GatewayError::ResourceExhausted(
                "backing block capacity exceeded".to_string(),
            ));
        }
        backing.extend_from_slice(bytes);
        seg.end += bytes.len();
        Ok(())
    }

    /// Concatenates `self` and `tail` with no copy; `self` becomes empty
    /// iff both were empty.
    pub fn append(mut self, tail: BufferChain) -> BufferChain {
        if self.segments.is_empty() {
            return tail;
        }
        self.segments.extend(tail.segments);
        self
    }

    /// Advances the logical start of the chain by up to `n` bytes, freeing
    /// any segment that becomes fully consumed. Returns `None` when the
    /// chain is fully drained (the `nil` head case).
    pub fn consume(mut self, mut n: usize) -> Option<BufferChain> {
        while n > 0 && !self.segments.is_empty() {
            let seg = &mut self.segments[0];
            let available = seg.len();
            if n < available {
                seg.start += n;
                n = 0;
            } else {
                n -= available;
                self.segments.remove(0);
            }
        }
        if self.segments.is_empty() {
            None
        } else {
            Some(self)
        }
    }

    /// Sum of `end - start` across every segment.
    pub fn length(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }

    /// Flattens the logical byte-stream into a single owned `Vec`. Used by
    /// callers that need contiguous bytes (e.g. handing a full packet to a
    /// decoder); not part of the zero-copy fast path.
    pub fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.length());
        for seg in &self.segments {
            out.extend_from_slice(seg.bytes());
        }
        out
    }

    /// A new chain of new segments pointing at the same backing blocks;
    /// refcounts are incremented (via `Arc::clone`), chain structure is
    /// independent.
    pub fn clone_chain(&self) -> BufferChain {
        BufferChain {
            segments: self.segments.clone(),
        }
    }

    /// A cloned chain whose segments together cover exactly
    /// `[offset, offset + len)` of the logical byte-stream.
    pub fn clone_portion(&self, offset: usize, len: usize) -> Result<BufferChain> {
        if offset + len > self.length() {
            return Err(GatewayError::ProtocolMalformed(format!(
                "clone_portion out of range: offset={} len={} total={}",
                offset,
                len,
                self.length()
            )));
        }
        let mut segments = Vec::new();
        let mut skip = offset;
        let mut remaining = len;
        for seg in &self.segments {
            if remaining == 0 {
                break;
            }
            let seg_len = seg.len();
            if skip >= seg_len {
                skip -= seg_len;
                continue;
            }
            let start = seg.start + skip;
            let take = std::cmp::min(seg_len - skip, remaining);
            segments.push(Segment {
                backing: seg.backing.clone(),
                start,
                end: start + take,
                payload_type: seg.payload_type,
            });
            remaining -= take;
            skip = 0;
        }
        Ok(BufferChain { segments })
    }

    /// Like [`clone_chain`](Self::clone_chain) but tags every segment of
    /// the result with `payload_type`.
    pub fn clone_transform(&self, payload_type: PayloadType) -> BufferChain {
        let mut cloned = self.clone_chain();
        cloned.set_type(payload_type);
        cloned
    }

    /// Tags every segment in-place.
    pub fn set_type(&mut self, payload_type: PayloadType) {
        for seg in &mut self.segments {
            seg.payload_type = payload_type;
        }
    }

    pub fn payload_type(&self) -> PayloadType {
        self.segments
            .first()
            .map(|s| s.payload_type)
            .unwrap_or(PayloadType::Undefined)
    }

    /// Number of distinct backing blocks still referenced by this chain's
    /// segments that are sole-owned (refcount 1). Test-only visibility hook
    /// for the reference-counting invariant.
    #[cfg(test)]
    fn sole_owned_backing_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| Arc::strong_count(&s.backing) == 1)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_chain(bytes: &[u8]) -> BufferChain {
        let mut chain = BufferChain::allocate(bytes.len());
        chain.fill(bytes).unwrap();
        chain
    }

    #[test]
    fn length_tracks_cumulative_unconsumed_bytes() {
        let a = filled_chain(b"hello ");
        let b = filled_chain(b"world");
        let chain = a.append(b);
        assert_eq!(chain.length(), 11);
        let chain = chain.consume(6).unwrap();
        assert_eq!(chain.length(), 5);
        assert_eq!(chain.bytes(), b"world");
    }

    #[test]
    fn consume_to_empty_returns_none() {
        let chain = filled_chain(b"abc");
        assert!(chain.consume(3).is_none());
    }

    #[test]
    fn clone_keeps_backing_alive_only_while_referenced() {
        let original = filled_chain(b"shared");
        assert_eq!(original.sole_owned_backing_count(), 1);

        let cloned = original.clone_chain();
        assert_eq!(original.sole_owned_backing_count(), 0);
        assert_eq!(cloned.sole_owned_backing_count(), 0);

        drop(cloned);
        assert_eq!(original.sole_owned_backing_count(), 1);

        let consumed = original.consume(6);
        assert!(consumed.is_none());
    }

    #[test]
    fn clone_portion_matches_byte_range() {
        let chain = filled_chain(b"0123456789");
        let portion = chain.clone_portion(2, 4).unwrap();
        assert_eq!(portion.bytes(), b"2345");
        assert_eq!(chain.bytes()[2..6].to_vec(), portion.bytes());
    }

    #[test]
    fn clone_portion_spans_multiple_segments() {
        let a = filled_chain(b"abc");
        let b = filled_chain(b"defgh");
        let chain = a.append(b);
        let portion = chain.clone_portion(1, 5).unwrap();
        assert_eq!(portion.bytes(), b"bcdef");
    }

    #[test]
    fn clone_portion_out_of_range_is_rejected() {
        let chain = filled_chain(b"abc");
        assert!(chain.clone_portion(0, 10).is_err());
    }

    #[test]
    fn set_type_tags_every_segment() {
        let a = filled_chain(b"abc");
        let b = filled_chain(b"def");
        let mut chain = a.append(b);
        chain.set_type(PayloadType::MysqlWire);
        assert_eq!(chain.payload_type(), PayloadType::MysqlWire);
    }

    #[test]
    fn clone_transform_does_not_mutate_source() {
        let chain = filled_chain(b"abc");
        let transformed = chain.clone_transform(PayloadType::PlainSql);
        assert_eq!(transformed.payload_type(), PayloadType::PlainSql);
        assert_eq!(chain.payload_type(), PayloadType::Undefined);
    }

    #[test]
    fn no_cycles_traversal_terminates_within_segment_count() {
        let mut chain = BufferChain::empty();
        for i in 0..5 {
            chain = chain.append(filled_chain(format!("seg{}", i).as_bytes()));
        }
        let segment_count = chain.segments.len();
        let mut steps = 0;
        let mut remaining = chain;
        while let Some(next) = remaining.consume(1) {
            remaining = next;
            steps += 1;
            assert!(steps <= segment_count * 16, "traversal did not terminate");
        }
    }

    #[test]
    fn fill_rejects_mutation_of_shared_backing() {
        let mut chain = filled_chain(b"abc");
        let _clone = chain.clone_chain();
        assert!(chain.fill(b"more").is_err());
    }
}
