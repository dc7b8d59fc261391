//! Registry of dynamically registered event sources.
//!
//! A source is a bounded channel of payloads plus the handler the control
//! loop runs for each payload. Sources can be registered and unregistered
//! from anywhere, including from inside a handler while the loop is
//! dispatching: the [`Registrar`] only stages the change and wakes the loop,
//! and the loop folds all staged changes into its wait set at the next
//! iteration boundary.
//!
//! # Example
//!
//! ```ignore
//! use serial_bridge::dispatch::Registrar;
//! use serial_bridge::queue::QueueKind;
//!
//! let (id, tx) = registrar.register("telemetry", 16, |ctx: &mut BridgeContext, payload: Bytes| {
//!     ctx.enqueue(QueueKind::Tx, payload);
//!     Ok(())
//! });
//! tx.send(bytes::Bytes::from_static(b"ping")).await?;
//! registrar.unregister(id);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::{mpsc, Notify};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{StreamMap, StreamNotifyClose};

use crate::context::BridgeContext;
use crate::error::Result;

/// Opaque handle of a registered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handler invoked on the control loop for each payload of a source.
///
/// An error pauses the bridge for the configured cool-down.
pub trait SourceHandler: Send {
    fn handle(&mut self, ctx: &mut BridgeContext, payload: Bytes) -> Result<()>;
}

impl<F> SourceHandler for F
where
    F: FnMut(&mut BridgeContext, Bytes) -> Result<()> + Send,
{
    fn handle(&mut self, ctx: &mut BridgeContext, payload: Bytes) -> Result<()> {
        self(ctx, payload)
    }
}

enum RegistrationChange {
    Register {
        id: SourceId,
        name: String,
        rx: mpsc::Receiver<Bytes>,
        handler: Box<dyn SourceHandler>,
    },
    Unregister {
        id: SourceId,
    },
}

#[derive(Default)]
struct Staging {
    changes: Mutex<Vec<RegistrationChange>>,
    next_id: AtomicU64,
}

impl Staging {
    fn lock(&self) -> MutexGuard<'_, Vec<RegistrationChange>> {
        self.changes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Cloneable front end for (un)registering sources.
#[derive(Clone)]
pub struct Registrar {
    staging: Arc<Staging>,
    notify: Arc<Notify>,
}

impl Registrar {
    pub(crate) fn new() -> Self {
        Self {
            staging: Arc::new(Staging::default()),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Register a source.
    ///
    /// Returns the source handle and the sender that feeds it. The source is
    /// dropped from the wait set once unregistered or once every sender is
    /// gone.
    pub fn register<H>(&self, name: &str, capacity: usize, handler: H) -> (SourceId, mpsc::Sender<Bytes>)
    where
        H: SourceHandler + 'static,
    {
        let id = SourceId(self.staging.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.stage(RegistrationChange::Register {
            id,
            name: name.to_string(),
            rx,
            handler: Box::new(handler),
        });
        (id, tx)
    }

    /// Unregister a source. Payloads still queued for it are dropped.
    pub fn unregister(&self, id: SourceId) {
        self.stage(RegistrationChange::Unregister { id });
    }

    fn stage(&self, change: RegistrationChange) {
        self.staging.lock().push(change);
        // Permits do not stack, so a burst of changes wakes the loop once.
        self.notify.notify_one();
    }

    /// Resolves when staged changes are waiting.
    pub(crate) async fn changed(&self) {
        self.notify.notified().await;
    }

    fn take_staged(&self) -> Vec<RegistrationChange> {
        std::mem::take(&mut *self.staging.lock())
    }
}

impl fmt::Debug for Registrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registrar")
            .field("staged", &self.staging.lock().len())
            .finish()
    }
}

struct SourceEntry {
    name: String,
    handler: Box<dyn SourceHandler>,
}

/// The control loop's view of registered sources.
pub struct SourceRegistry {
    registrar: Registrar,
    streams: StreamMap<SourceId, StreamNotifyClose<ReceiverStream<Bytes>>>,
    entries: HashMap<SourceId, SourceEntry>,
}

impl SourceRegistry {
    pub fn new(registrar: Registrar) -> Self {
        Self {
            registrar,
            streams: StreamMap::new(),
            entries: HashMap::new(),
        }
    }

    /// Fold staged changes into the wait set. Returns how many were applied.
    pub fn apply_staged(&mut self) -> usize {
        let changes = self.registrar.take_staged();
        let count = changes.len();

        for change in changes {
            match change {
                RegistrationChange::Register {
                    id,
                    name,
                    rx,
                    handler,
                } => {
                    tracing::debug!(source = %name, %id, "Source registered");
                    self.streams
                        .insert(id, StreamNotifyClose::new(ReceiverStream::new(rx)));
                    self.entries.insert(id, SourceEntry { name, handler });
                }
                RegistrationChange::Unregister { id } => self.remove(id),
            }
        }

        if count > 0 {
            tracing::debug!(changes = count, sources = self.entries.len(), "Wait set rebuilt");
        }
        count
    }

    /// Drop a source from the wait set.
    pub fn remove(&mut self, id: SourceId) {
        self.streams.remove(&id);
        match self.entries.remove(&id) {
            Some(entry) => tracing::debug!(source = %entry.name, %id, "Source unregistered"),
            None => tracing::warn!(%id, "Unregister of unknown source"),
        }
    }

    /// Next payload from any source; `None` in the payload means the source
    /// closed. Pending forever while nothing is registered.
    pub async fn next(&mut self) -> (SourceId, Option<Bytes>) {
        use tokio_stream::StreamExt;

        match self.streams.next().await {
            Some(item) => item,
            None => std::future::pending().await,
        }
    }

    /// Run the handler of `id` on the payload.
    ///
    /// A payload for a source that is no longer registered is logged and
    /// dropped.
    pub fn dispatch(&mut self, ctx: &mut BridgeContext, id: SourceId, payload: Bytes) -> Result<()> {
        match self.entries.get_mut(&id) {
            Some(entry) => entry.handler.handle(ctx, payload),
            None => {
                tracing::warn!(%id, len = payload.len(), "Payload for unknown source ignored");
                Ok(())
            }
        }
    }

    /// Name a source was registered under.
    pub fn name(&self, id: SourceId) -> Option<&str> {
        self.entries.get(&id).map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
