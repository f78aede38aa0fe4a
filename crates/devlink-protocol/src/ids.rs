use std::sync::atomic::{AtomicI32, Ordering};

/// Allocates correlation ids for outgoing requests.
///
/// Ids start at 1 and increase monotonically. Replies echo the id so the
/// requester can match them; the counter wraps back to 1 rather than going
/// non-positive.
#[derive(Debug)]
pub struct RequestIds {
    next: AtomicI32,
}

impl RequestIds {
    pub const fn new() -> Self {
        Self {
            next: AtomicI32::new(1),
        }
    }

    /// Returns the next id.
    pub fn next_id(&self) -> i32 {
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(if current == i32::MAX { 1 } else { current + 1 })
            })
            .unwrap_or_else(|current| current)
    }
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_increase_from_one() {
        let ids = RequestIds::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
        assert_eq!(ids.next_id(), 3);
    }

    #[test]
    fn test_ids_wrap_to_one() {
        let ids = RequestIds {
            next: AtomicI32::new(i32::MAX),
        };
        assert_eq!(ids.next_id(), i32::MAX);
        assert_eq!(ids.next_id(), 1);
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let ids = std::sync::Arc::new(RequestIds::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || (0..100).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<i32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 400);
    }
}
