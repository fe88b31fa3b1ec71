use core::sync::atomic::{AtomicU32, Ordering};

/// Pending rotation counter shared between the sensor interrupt and the
/// main polling loop.
///
/// The interrupt handler calls [`EdgeCounter::on_edge`], which is a single
/// relaxed fetch-add: no locks, no allocation, no interrupt masking. The
/// poller drains it with [`EdgeCounter::take_and_clear`], an atomic swap with
/// zero, so an edge landing between the read and the clear can neither be
/// lost nor counted twice.
///
/// The counter wraps at `u32::MAX`. Between two polls (tens of
/// milliseconds) that is unreachable, so overflow is an accepted limitation
/// rather than an error path.
///
/// ```rust,ignore
/// static ROTATIONS: EdgeCounter = EdgeCounter::new();
///
/// // In the GPIO falling-edge handler
/// ROTATIONS.on_edge();
///
/// // In the main loop
/// odometer.poll(&ROTATIONS, &mut platform, now_ms);
/// ```
#[derive(Debug, Default)]
pub struct EdgeCounter {
    pending: AtomicU32,
}

impl EdgeCounter {
    pub const fn new() -> Self {
        Self {
            pending: AtomicU32::new(0),
        }
    }

    /// Record one sensor edge. Safe to call from interrupt context.
    #[inline]
    pub fn on_edge(&self) {
        self.pending.fetch_add(1, Ordering::Relaxed);
    }

    /// Return the number of edges since the previous call and reset to zero.
    #[inline]
    pub fn take_and_clear(&self) -> u32 {
        self.pending.swap(0, Ordering::AcqRel)
    }

    /// Edges recorded but not yet drained.
    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_take_and_clear_resets() {
        let counter = EdgeCounter::new();
        counter.on_edge();
        counter.on_edge();
        counter.on_edge();
        assert_eq!(counter.take_and_clear(), 3);
        assert_eq!(counter.take_and_clear(), 0);
    }

    #[test]
    fn test_concurrent_edges_are_never_lost() {
        const EDGES_PER_THREAD: u32 = 10_000;
        let counter = Arc::new(EdgeCounter::new());

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..EDGES_PER_THREAD {
                        counter.on_edge();
                    }
                })
            })
            .collect();

        // Drain concurrently with the producers
        let mut drained = 0u32;
        while producers.iter().any(|p| !p.is_finished()) {
            drained += counter.take_and_clear();
        }
        for producer in producers {
            producer.join().unwrap();
        }
        drained += counter.take_and_clear();

        assert_eq!(drained, 4 * EDGES_PER_THREAD, "every edge drained exactly once");
    }
}
