use std::sync::{Mutex, MutexGuard};

/// An ordering domain for transaction batches.
///
/// Batches queued through the same sequencer are applied, and their
/// completions delivered, in submission order. Batches on different
/// sequencers are only serialized against each other by the store's apply
/// lock and may interleave in any order.
#[derive(Debug)]
pub struct Sequencer {
    name: String,
    /// Batches applied through this sequencer. Held for the whole submission.
    applied: Mutex<u64>,
}

impl Sequencer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            applied: Mutex::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of batches applied so far.
    pub fn applied(&self) -> u64 {
        *self.applied.lock().expect("sequencer lock poisoned")
    }

    pub(crate) fn enter(&self) -> MutexGuard<'_, u64> {
        self.applied.lock().expect("sequencer lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn counts_submissions() {
        let seq = Sequencer::new("osr");
        *seq.enter() += 1;
        *seq.enter() += 1;
        assert_eq!(seq.applied(), 2);
        assert_eq!(seq.name(), "osr");
    }

    #[test]
    fn enter_is_exclusive() {
        let seq = Arc::new(Sequencer::new("shared"));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let seq = Arc::clone(&seq);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let mut n = seq.enter();
                        let before = *n;
                        thread::yield_now();
                        *n = before + 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(seq.applied(), 400);
    }
}
