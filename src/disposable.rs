use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::task::JoinHandle;
use tracing::debug;

/// A cancelable unit of background work: a timer, a subscription forwarder,
/// an in-flight request. Disposing is idempotent and also happens on drop.
pub struct Disposable {
    cleanup: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Disposable {
    pub fn new(cleanup: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cleanup: Mutex::new(Some(Box::new(cleanup))),
        }
    }

    /// Wraps a spawned task; disposing aborts it.
    pub fn from_task(handle: JoinHandle<()>) -> Self {
        Self::new(move || handle.abort())
    }

    pub fn dispose(&self) {
        let cleanup = self.cleanup.lock().unwrap().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
}

impl Drop for Disposable {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Owns the disposables scoped to one publisher or room session. Tearing the
/// set down runs every cleanup exactly once; late additions are disposed on
/// arrival.
pub struct DisposableSet {
    items: Mutex<Vec<Disposable>>,
    disposed: AtomicBool,
}

impl DisposableSet {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn add(&self, disposable: Disposable) {
        if self.disposed.load(Ordering::Acquire) {
            debug!("Disposable added to torn-down set, disposing immediately");
            disposable.dispose();
            return;
        }

        self.items.lock().unwrap().push(disposable);
    }

    pub fn add_task(&self, handle: JoinHandle<()>) {
        self.add(Disposable::from_task(handle));
    }

    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let items = std::mem::take(&mut *self.items.lock().unwrap());
        for item in &items {
            item.dispose();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Default for DisposableSet {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DisposableSet {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    #[test]
    fn dispose_runs_cleanup_exactly_once() {
        let count = Arc::new(AtomicU32::new(0));
        let counted = count.clone();
        let disposable = Disposable::new(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        disposable.dispose();
        disposable.dispose();
        drop(disposable);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn set_dispose_is_idempotent_and_covers_late_additions() {
        let count = Arc::new(AtomicU32::new(0));
        let set = DisposableSet::new();

        for _ in 0..3 {
            let counted = count.clone();
            set.add(Disposable::new(move || {
                counted.fetch_add(1, Ordering::SeqCst);
            }));
        }

        set.dispose();
        set.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 3);

        // Added after teardown: cleaned up immediately.
        let counted = count.clone();
        set.add(Disposable::new(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn disposing_a_task_aborts_it() {
        let flag = Arc::new(AtomicBool::new(false));
        let flagged = flag.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            flagged.store(true, Ordering::SeqCst);
        });

        let disposable = Disposable::from_task(handle);
        disposable.dispose();

        tokio::task::yield_now().await;
        assert!(!flag.load(Ordering::SeqCst));
    }
}
