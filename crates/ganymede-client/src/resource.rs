//! Registry of open views and transfers that must be released when the
//! session ends.

use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tracing::debug;

/// Something holding session resources that can be released on demand.
#[async_trait]
pub trait Disposable: Send + Sync {
    /// Short description for log lines.
    fn describe(&self) -> String;

    /// Release the resource. Must tolerate being called more than once.
    async fn dispose(&self);
}

/// Weak list of open resources; dropped resources simply vanish from it.
#[derive(Default)]
pub struct ResourceRegistry {
    entries: Mutex<Vec<Weak<dyn Disposable>>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Disposable + 'static>(&self, resource: &Arc<T>) {
        let weak: Weak<T> = Arc::downgrade(resource);
        let weak: Weak<dyn Disposable> = weak;
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.retain(|w| w.strong_count() > 0);
        entries.push(weak);
    }

    /// Number of registered resources still alive.
    pub fn live_count(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.iter().filter(|w| w.strong_count() > 0).count()
    }

    /// Dispose every live resource and empty the registry.
    pub async fn dispose_all(&self) -> usize {
        let drained: Vec<Weak<dyn Disposable>> = {
            let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
            entries.drain(..).collect()
        };

        let mut disposed = 0;
        for resource in drained.iter().filter_map(Weak::upgrade) {
            debug!(resource = %resource.describe(), "disposing");
            resource.dispose().await;
            disposed += 1;
        }
        disposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    #[async_trait]
    impl Disposable for Counter {
        fn describe(&self) -> String {
            "counter".into()
        }

        async fn dispose(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn disposes_live_resources_once() {
        let registry = ResourceRegistry::new();
        let kept = Arc::new(Counter(AtomicUsize::new(0)));
        let dropped = Arc::new(Counter(AtomicUsize::new(0)));
        registry.register(&kept);
        registry.register(&dropped);
        drop(dropped);

        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.dispose_all().await, 1);
        assert_eq!(kept.0.load(Ordering::SeqCst), 1);

        // Registry is empty afterwards.
        assert_eq!(registry.dispose_all().await, 0);
        assert_eq!(kept.0.load(Ordering::SeqCst), 1);
    }
}
