//! Lock-free dispatch queue for first attempts.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Distributes input rows to the first-attempt worker pool.
///
/// Workers call [`next()`](DispatchQueue::next) to atomically claim the
/// next row; every row is handed out exactly once.
pub struct DispatchQueue<T> {
    items: Vec<T>,
    cursor: AtomicUsize,
}

impl<T> DispatchQueue<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Claim the next row (lock-free).
    pub fn next(&self) -> Option<&T> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.items.get(i)
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn hands_out_in_order() {
        let q = DispatchQueue::new(vec!["a", "b", "c"]);
        assert_eq!(q.total(), 3);
        assert_eq!(q.next(), Some(&"a"));
        assert_eq!(q.next(), Some(&"b"));
        assert_eq!(q.next(), Some(&"c"));
        assert_eq!(q.next(), None);
    }

    #[test]
    fn empty_queue() {
        let q: DispatchQueue<u32> = DispatchQueue::new(Vec::new());
        assert_eq!(q.total(), 0);
        assert_eq!(q.next(), None);
    }

    #[test]
    fn concurrent_claims_are_disjoint() {
        let q = Arc::new(DispatchQueue::new((0..1000).collect::<Vec<u32>>()));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let q = q.clone();
            handles.push(std::thread::spawn(move || {
                let mut claimed = Vec::new();
                while let Some(v) = q.next() {
                    claimed.push(*v);
                }
                claimed
            }));
        }
        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..1000).collect::<Vec<u32>>());
    }
}
