//! Splitting of payloads into message-log chunks.

/// Number of chunks `len` bytes split into with chunks of `max_buffer_size`.
pub fn chunk_count(len: usize, max_buffer_size: usize) -> usize {
    if max_buffer_size == 0 || len == 0 {
        1
    } else {
        len.div_ceil(max_buffer_size)
    }
}

/// Splits `payload` into ordered chunks of at most `max_buffer_size` bytes.
///
/// A size of 0 disables chunking. An empty payload still yields one (empty)
/// chunk so that every message is carried by at least one record.
pub fn split(payload: &[u8], max_buffer_size: usize) -> Vec<&[u8]> {
    if max_buffer_size == 0 || payload.is_empty() {
        return vec![payload];
    }
    payload.chunks(max_buffer_size).collect()
}
