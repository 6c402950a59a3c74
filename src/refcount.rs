//! Reference counting for requests backed by pooled transport buffers.
//!
//! A [`RefCounted`] is created when a frame is decoded. Every path that needs
//! the request beyond the current call (the sliding window, the replication
//! engine, a completion task) takes a [`Retained`] guard. The release action
//! fires exactly once: when the last guard goes away, or, if nothing ever
//! retained the request, when the last handle is dropped.

use std::{
    fmt,
    ops::Deref,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst},
        Arc, Mutex,
    },
};

struct Inner<T> {
    value: T,
    count: AtomicUsize,
    released: AtomicBool,
    on_release: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl<T> Inner<T> {
    fn retain(&self) {
        let previous = self.count.fetch_add(1, SeqCst);
        if previous == 0 {
            assert!(!self.released.load(SeqCst), "retain after release");
        }
    }

    fn release(&self) -> bool {
        let previous = self.count.fetch_sub(1, SeqCst);
        assert!(previous > 0, "release without retain");
        previous == 1 && self.fire()
    }

    fn fire(&self) -> bool {
        if self
            .released
            .compare_exchange(false, true, SeqCst, SeqCst)
            .is_err()
        {
            return false;
        }
        if let Some(on_release) = self.on_release.lock().unwrap().take() {
            on_release()
        }
        true
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        // never retained
        self.fire();
    }
}

pub struct RefCounted<T>(Arc<Inner<T>>);

impl<T> Clone for RefCounted<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> RefCounted<T> {
    pub fn wrap(value: T, on_release: impl FnOnce() + Send + 'static) -> Self {
        Self(Arc::new(Inner {
            value,
            count: AtomicUsize::new(0),
            released: AtomicBool::new(false),
            on_release: Mutex::new(Some(Box::new(on_release))),
        }))
    }

    pub fn get(&self) -> &T {
        &self.0.value
    }

    pub fn retain(&self) -> Retained<T> {
        self.0.retain();
        Retained {
            inner: self.0.clone(),
            armed: true,
        }
    }

    pub fn ref_count(&self) -> usize {
        self.0.count.load(SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.0.released.load(SeqCst)
    }
}

impl<T: fmt::Debug> fmt::Debug for RefCounted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCounted")
            .field("value", &self.0.value)
            .field("count", &self.ref_count())
            .field("released", &self.is_released())
            .finish()
    }
}

/// One outstanding hold on a [`RefCounted`] value, given up on drop or by an
/// explicit [`Retained::release`].
pub struct Retained<T> {
    inner: Arc<Inner<T>>,
    armed: bool,
}

impl<T> Retained<T> {
    /// Returns whether this release was the one that freed the value.
    pub fn release(mut self) -> bool {
        self.armed = false;
        self.inner.release()
    }
}

impl<T> Deref for Retained<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner.value
    }
}

impl<T> Clone for Retained<T> {
    fn clone(&self) -> Self {
        self.inner.retain();
        Self {
            inner: self.inner.clone(),
            armed: true,
        }
    }
}

impl<T> Drop for Retained<T> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.release();
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Retained<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Retained").field(&self.inner.value).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn counted() -> (RefCounted<&'static str>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let value = RefCounted::wrap("request", {
            let count = count.clone();
            move || {
                count.fetch_add(1, SeqCst);
            }
        });
        (value, count)
    }

    #[test]
    fn release_fires_after_last_holder() {
        let (value, count) = counted();
        let first = value.retain();
        let second = first.clone();
        assert_eq!(value.ref_count(), 2);
        assert!(!first.release());
        assert_eq!(count.load(SeqCst), 0);
        assert_eq!(*second, "request");
        assert!(second.release());
        assert_eq!(count.load(SeqCst), 1);
        assert!(value.is_released());
        drop(value);
        assert_eq!(count.load(SeqCst), 1);
    }

    #[test]
    fn never_retained_releases_on_drop() {
        let (value, count) = counted();
        let other = value.clone();
        drop(value);
        assert_eq!(count.load(SeqCst), 0);
        drop(other);
        assert_eq!(count.load(SeqCst), 1);
    }

    #[test]
    fn concurrent_holders_release_once() {
        const K: usize = 16;
        for _ in 0..100 {
            let (value, count) = counted();
            let guards = (0..K).map(|_| value.retain()).collect::<Vec<_>>();
            let freed = thread::scope(|s| {
                let tasks = guards
                    .into_iter()
                    .map(|guard| s.spawn(move || guard.release()))
                    .collect::<Vec<_>>();
                tasks
                    .into_iter()
                    .map(|task| task.join().unwrap())
                    .filter(|&freed| freed)
                    .count()
            });
            assert_eq!(freed, 1);
            assert_eq!(count.load(SeqCst), 1);
            drop(value);
            assert_eq!(count.load(SeqCst), 1);
        }
    }

    #[test]
    #[should_panic(expected = "retain after release")]
    fn retain_after_release_is_fault() {
        let (value, _) = counted();
        value.retain().release();
        let _ = value.retain();
    }
}
