//! Reassembly of chunked RPC requests arriving on the message log.

use std::num::NonZeroUsize;

use lru::LruCache;
use tracing::warn;

#[derive(Debug, Default)]
struct Partial {
    bytes: Vec<u8>,
    next_expected: i32,
}

/// Buffers partial requests by rpc id until their final chunk arrives.
///
/// Both the partial buffers and the set of completed ids are bounded LRUs,
/// so a controller that never sends the last chunk cannot grow memory
/// without limit.
pub struct Reassembler {
    pending: LruCache<String, Partial>,
    completed: LruCache<String, ()>,
}

impl Reassembler {
    /// Tracks at most `capacity` messages in flight and as many completed ids.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            pending: LruCache::new(capacity),
            completed: LruCache::new(capacity),
        }
    }

    /// Number of rpc ids with buffered chunks.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Accepts chunk `current` of `total` for `rpc_id`, returning the whole
    /// payload once the final chunk has been seen.
    pub fn accept(&mut self, rpc_id: &str, current: i32, total: i32, bytes: &[u8]) -> Option<Vec<u8>> {
        if total < 1 || current < 0 || current >= total {
            warn!(rpc_id, current, total, "Ignoring chunk with invalid numbering");
            return None;
        }
        if self.completed.contains(rpc_id) {
            warn!(rpc_id, current, "Ignoring chunk for an already dispatched request");
            return None;
        }

        if current + 1 < total {
            if !self.pending.contains(rpc_id) {
                if let Some((evicted, _)) = self.pending.push(rpc_id.to_string(), Partial::default()) {
                    warn!(rpc_id = %evicted, "Reassembly buffer full, dropped partial request");
                }
            }
            if let Some(partial) = self.pending.get_mut(rpc_id) {
                if current >= partial.next_expected {
                    partial.bytes.extend_from_slice(bytes);
                    partial.next_expected = current + 1;
                } else {
                    warn!(
                        rpc_id,
                        current,
                        expected = partial.next_expected,
                        "Ignoring duplicate or out-of-order chunk"
                    );
                }
            }
            return None;
        }

        let payload = if total == 1 {
            bytes.to_vec()
        } else {
            let Some(mut partial) = self.pending.pop(rpc_id) else {
                warn!(rpc_id, total, "Final chunk arrived without earlier chunks");
                return None;
            };
            partial.bytes.extend_from_slice(bytes);
            partial.bytes
        };
        self.completed.put(rpc_id.to_string(), ());
        Some(payload)
    }
}
