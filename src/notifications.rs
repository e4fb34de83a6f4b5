use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::{runtime::Handle, sync::mpsc, time};
use tokio_util::sync::CancellationToken;

/// One-shot local notification announcing the end of a rest period.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RestNotification {
    pub id: String,
    pub after_secs: u64,
    pub title: String,
    pub body: String,
}

pub trait Notifier: Send + Sync {
    fn schedule(&self, notification: &RestNotification) -> Result<()>;
    fn cancel(&self, id: &str) -> Result<()>;
    fn cancel_all(&self) -> Result<()>;
}

type PendingMap = HashMap<String, (u64, CancellationToken)>;

/// In-process scheduler: every pending notification is a sleeping tokio task
/// that delivers into a channel unless its token is cancelled first.
pub struct LocalNotifier {
    runtime: Handle,
    pending: Arc<Mutex<PendingMap>>,
    delivered_tx: mpsc::UnboundedSender<RestNotification>,
    generation: Mutex<u64>,
}

impl LocalNotifier {
    pub fn new(runtime: Handle) -> (Self, mpsc::UnboundedReceiver<RestNotification>) {
        let (delivered_tx, delivered_rx) = mpsc::unbounded_channel();
        let notifier = Self {
            runtime,
            pending: Arc::new(Mutex::new(HashMap::new())),
            delivered_tx,
            generation: Mutex::new(0),
        };
        (notifier, delivered_rx)
    }

    /// Binds to the runtime of the calling task.
    pub fn current() -> Result<(Self, mpsc::UnboundedReceiver<RestNotification>)> {
        let runtime = Handle::try_current()
            .map_err(|err| anyhow!("notifier requires a tokio runtime: {err}"))?;
        Ok(Self::new(runtime))
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    fn next_generation(&self) -> u64 {
        let mut guard = self.generation.lock().unwrap_or_else(|p| p.into_inner());
        *guard = guard.wrapping_add(1);
        *guard
    }
}

fn lock(pending: &Mutex<PendingMap>) -> std::sync::MutexGuard<'_, PendingMap> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Notifier for LocalNotifier {
    fn schedule(&self, notification: &RestNotification) -> Result<()> {
        let token = CancellationToken::new();
        let generation = self.next_generation();

        if let Some((_, previous)) = lock(&self.pending).insert(
            notification.id.clone(),
            (generation, token.clone()),
        ) {
            previous.cancel();
        }

        let pending = self.pending.clone();
        let delivered_tx = self.delivered_tx.clone();
        let notification = notification.clone();
        let delay = Duration::from_secs(notification.after_secs);

        debug!(
            "Scheduling notification {} in {}s",
            notification.id, notification.after_secs
        );

        self.runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = time::sleep(delay) => {
                    {
                        let mut guard = lock(&pending);
                        if matches!(guard.get(&notification.id), Some((g, _)) if *g == generation) {
                            guard.remove(&notification.id);
                        }
                    }
                    info!("Delivering notification {}: {}", notification.id, notification.body);
                    let _ = delivered_tx.send(notification);
                }
            }
        });

        Ok(())
    }

    fn cancel(&self, id: &str) -> Result<()> {
        if let Some((_, token)) = lock(&self.pending).remove(id) {
            debug!("Cancelled notification {}", id);
            token.cancel();
        }
        Ok(())
    }

    fn cancel_all(&self) -> Result<()> {
        let drained: Vec<_> = lock(&self.pending).drain().collect();
        for (id, (_, token)) in drained {
            debug!("Cancelled notification {}", id);
            token.cancel();
        }
        Ok(())
    }
}
