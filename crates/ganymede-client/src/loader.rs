//! Background population of detail views.
//!
//! An [`AsyncLoader`] shows a placeholder the moment it is created and runs
//! the population (a remote fetch plus view construction) on its own task.
//! The task writes its result into a single-slot [`watch`] channel exactly
//! once; the slot is both the displayed content and the load flag, so
//! watchers never see one without the other.
//!
//! Consumers can poll ([`AsyncLoader::content`]), wait with a ceiling
//! ([`AsyncLoader::wait_for_load`]) or attach a continuation
//! ([`AsyncLoader::on_complete`]).

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use ganymede_core::{GResult, Invid, ObjectView};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::resource::Disposable;
use crate::session::SessionHandle;

/// What the container currently displays.
#[derive(Debug)]
pub enum LoadState<V> {
    /// Placeholder (progress indicator) still showing.
    Pending,
    /// Population finished; the realized content.
    Loaded(Arc<V>),
    /// Population failed; terminal.
    Failed(String),
}

impl<V> Clone for LoadState<V> {
    fn clone(&self) -> Self {
        match self {
            Self::Pending => Self::Pending,
            Self::Loaded(v) => Self::Loaded(v.clone()),
            Self::Failed(reason) => Self::Failed(reason.clone()),
        }
    }
}

impl<V> LoadState<V> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Whether the load reached a terminal state (loaded or failed).
    pub fn is_done(&self) -> bool {
        !self.is_pending()
    }

    pub fn loaded(&self) -> Option<&Arc<V>> {
        match self {
            Self::Loaded(v) => Some(v),
            _ => None,
        }
    }
}

/// One background load and its completion slot.
pub struct AsyncLoader<V> {
    label: String,
    slot: Arc<watch::Sender<LoadState<V>>>,
    ceiling: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<V: Send + Sync + 'static> AsyncLoader<V> {
    /// Show the placeholder and start `populate` on a background task.
    ///
    /// An `Err` from `populate`, or a panic inside it, moves the loader to
    /// [`LoadState::Failed`] so waiters return immediately.
    pub fn spawn<F>(label: impl Into<String>, ceiling: Duration, populate: F) -> Arc<Self>
    where
        F: Future<Output = GResult<V>> + Send + 'static,
    {
        let label = label.into();
        let (tx, _rx) = watch::channel(LoadState::Pending);
        let slot = Arc::new(tx);

        let producer = slot.clone();
        let task_label = label.clone();
        let task = tokio::spawn(async move {
            let state = match AssertUnwindSafe(populate).catch_unwind().await {
                Ok(Ok(value)) => LoadState::Loaded(Arc::new(value)),
                Ok(Err(e)) => {
                    error!(label = %task_label, error = %e, "load failed");
                    LoadState::Failed(e.to_string())
                }
                Err(_) => {
                    error!(label = %task_label, "load panicked");
                    LoadState::Failed("loader panicked".to_string())
                }
            };
            complete(&producer, &task_label, state);
        });

        Arc::new(Self {
            label,
            slot,
            ceiling,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Snapshot of what the container displays right now.
    pub fn content(&self) -> LoadState<V> {
        self.slot.borrow().clone()
    }

    /// Whether the load reached a terminal state.
    pub fn is_loaded(&self) -> bool {
        self.slot.borrow().is_done()
    }

    /// Wait until the load is done, but never longer than the ceiling.
    ///
    /// On expiry this returns the current (still pending) state and logs a
    /// warning; the load itself keeps running.
    pub async fn wait_for_load(&self) -> LoadState<V> {
        let mut rx = self.slot.subscribe();
        let waited = tokio::time::timeout(self.ceiling, async {
            rx.wait_for(LoadState::is_done).await.map(|state| state.clone())
        })
        .await;

        match waited {
            Ok(Ok(state)) => state,
            Ok(Err(_)) => self.content(),
            Err(_) => {
                warn!(
                    label = %self.label,
                    ceiling_secs = self.ceiling.as_secs(),
                    "gave up waiting for load"
                );
                self.content()
            }
        }
    }

    /// Run `f` with the terminal state once the load is done.
    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(LoadState<V>) + Send + 'static,
    {
        let mut rx = self.slot.subscribe();
        tokio::spawn(async move {
            let state = match rx.wait_for(LoadState::is_done).await {
                Ok(state) => state.clone(),
                Err(_) => return,
            };
            f(state);
        });
    }

    /// Abort a running population and show a terminal failure instead.
    pub fn cancel(&self) {
        if let Some(task) = self.task.lock().unwrap_or_else(|p| p.into_inner()).take() {
            task.abort();
        }
        complete(&self.slot, &self.label, LoadState::Failed("disposed".into()));
    }
}

/// Swap the placeholder for `state`. Only the first terminal state sticks.
fn complete<V>(slot: &watch::Sender<LoadState<V>>, label: &str, state: LoadState<V>) {
    let replaced = slot.send_if_modified(|current| {
        if current.is_pending() {
            *current = state;
            true
        } else {
            false
        }
    });
    if !replaced {
        debug!(%label, "load already finished, result ignored");
    }
}

impl<V> Drop for AsyncLoader<V> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().unwrap_or_else(|p| p.into_inner()).take() {
            task.abort();
        }
    }
}

#[async_trait]
impl<V: Send + Sync + 'static> Disposable for AsyncLoader<V> {
    fn describe(&self) -> String {
        format!("view {}", self.label)
    }

    async fn dispose(&self) {
        self.cancel();
    }
}

/// Loader for the detail view of one object, fetched through `session`.
pub fn spawn_object_view(
    session: Arc<SessionHandle>,
    invid: Invid,
    ceiling: Duration,
) -> Arc<AsyncLoader<ObjectView>> {
    AsyncLoader::spawn(invid.to_string(), ceiling, async move {
        let mut view = session.view_object(invid).await?;
        // Editable fields first, otherwise server order.
        view.fields.sort_by_key(|f| !f.editable);
        Ok(view)
    })
}
