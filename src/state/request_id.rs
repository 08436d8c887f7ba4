use std::sync::atomic::{AtomicU64, Ordering};

/// Prefix shared by every completion id.
pub(crate) const COMPLETION_ID_PREFIX: &str = "chatcmpl-";

/// Lock-free completion id source: a random per-process seed XOR a counter,
/// rendered as 32 lowercase hex digits.
pub(crate) struct RequestIdGenerator {
    seed: u128,
    counter: AtomicU64,
}

impl RequestIdGenerator {
    #[must_use]
    pub(crate) fn new() -> Self {
        let seed_hi = u128::from(fastrand::u64(..));
        let seed_lo = u128::from(fastrand::u64(..));
        Self {
            seed: (seed_hi << 64) | seed_lo,
            counter: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    #[must_use]
    pub(crate) fn request_uuid(&self, request_seq: u64) -> uuid::Uuid {
        uuid::Uuid::from_u128(self.seed ^ u128::from(request_seq))
    }

    #[must_use]
    pub(crate) fn next_completion_id(&self) -> String {
        let uuid = self.request_uuid(self.next_seq());
        let mut id = String::with_capacity(COMPLETION_ID_PREFIX.len() + 32);
        id.push_str(COMPLETION_ID_PREFIX);
        id.push_str(uuid.simple().encode_lower(&mut uuid::Uuid::encode_buffer()));
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_id_shape() {
        let ids = RequestIdGenerator::new();
        let id = ids.next_completion_id();
        let hex = id.strip_prefix(COMPLETION_ID_PREFIX).unwrap();
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_completion_ids_are_unique() {
        let ids = RequestIdGenerator::new();
        let first = ids.next_completion_id();
        let second = ids.next_completion_id();
        assert_ne!(first, second);
    }
}
