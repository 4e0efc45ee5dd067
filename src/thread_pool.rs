//! A scoped worker pool for running a function over a slice of work items in
//! parallel, used by the dependency scan's pre-stat phase.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;

/// Run `f` over every item of `items` using up to `num_threads` workers,
/// returning the results in item order.  Items are claimed with an atomic
/// cursor so each appears exactly once.
pub fn parallel_map<T: Sync, R: Send>(
    num_threads: usize,
    items: &[T],
    f: impl Fn(&T) -> R + Sync,
) -> Vec<R> {
    let next = AtomicUsize::new(0);
    std::thread::scope(|s| {
        let (tx, rx) = mpsc::channel();
        for _ in 0..num_threads.min(items.len()) {
            let tx = tx.clone();
            let next = &next;
            let f = &f;
            s.spawn(move || loop {
                let i = next.fetch_add(1, Ordering::SeqCst);
                if i >= items.len() {
                    break;
                }
                if tx.send((i, f(&items[i]))).is_err() {
                    break;
                }
            });
        }
        drop(tx);
        let mut results: Vec<Option<R>> = (0..items.len()).map(|_| None).collect();
        for (i, r) in rx {
            results[i] = Some(r);
        }
        results
            .into_iter()
            .map(|r| r.expect("worker delivered every claimed item"))
            .collect()
    })
}
