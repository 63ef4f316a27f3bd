//! Out-of-band delivery of replies that missed the passive-reply window.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use zhiweijz_core::ExternalId;

use crate::services::Notifier;

/// Queue capacity.
pub const CAPACITY: usize = 256;

#[derive(Debug)]
struct Notification {
    recipient: ExternalId,
    text: String,
}

/// Bounded queue drained by a single background worker.
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<Notification>,
}

impl NotificationQueue {
    /// Start the worker on the current runtime.
    #[must_use]
    pub fn spawn(notifier: Arc<dyn Notifier>) -> (Self, JoinHandle<()>) {
        Self::spawn_with_capacity(notifier, CAPACITY)
    }

    #[must_use]
    pub fn spawn_with_capacity(
        notifier: Arc<dyn Notifier>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Notification>(capacity);

        let worker = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                match notifier
                    .notify(&notification.recipient, &notification.text)
                    .await
                {
                    Ok(()) => debug!(recipient = %notification.recipient, "Deferred reply sent"),
                    Err(e) => warn!(
                        recipient = %notification.recipient,
                        error = %e,
                        "Failed to send deferred reply"
                    ),
                }
            }
            debug!("Notification queue closed");
        });

        (Self { tx }, worker)
    }

    /// Enqueue without waiting. Returns `false` if the message was dropped.
    pub fn push(&self, recipient: ExternalId, text: String) -> bool {
        match self.tx.try_send(Notification { recipient, text }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(recipient = %dropped.recipient, "Notification queue full, dropping reply");
                false
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                warn!(recipient = %dropped.recipient, "Notification worker stopped, dropping reply");
                false
            }
        }
    }
}
