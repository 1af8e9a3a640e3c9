use std::sync::{Arc, Mutex};

/// A value shared between the loops and the public API.
///
/// Reads take an immutable snapshot, writes replace the value wholesale. There is no way to
/// patch a value in place, so a reader never sees a half-applied reconfiguration.
#[derive(Debug, Default)]
pub struct Shared<T> {
    value: Mutex<Arc<T>>,
}

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Mutex::new(Arc::new(value)),
        }
    }

    pub fn snapshot(&self) -> Arc<T> {
        self.value.lock().unwrap().clone()
    }

    pub fn replace(&self, value: T) {
        *self.value.lock().unwrap() = Arc::new(value);
    }

    /// Builds a replacement from the current value while holding the lock.
    ///
    /// Two concurrent updates of different fields therefore never lose each other.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let mut value = self.value.lock().unwrap();
        *value = Arc::new(f(&value));
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn snapshot_is_stable_across_replace() {
        let shared = Shared::new(vec![1, 2]);
        let before = shared.snapshot();
        shared.replace(vec![3]);

        assert_eq!(*before, vec![1, 2]);
        assert_eq!(*shared.snapshot(), vec![3]);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let shared = Arc::new(Shared::new(0u32));
        let handles = (0..8)
            .map(|_| {
                let shared = shared.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        shared.update(|value| value + 1);
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*shared.snapshot(), 800);
    }
}
