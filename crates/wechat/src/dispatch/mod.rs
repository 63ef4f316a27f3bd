//! Time-bounded dispatch of webhook deliveries.
//!
//! The platform waits five seconds for a passive reply. Business logic runs
//! on its own task and races a per-kind budget; if the budget wins, the
//! delivery is acknowledged and the handler's eventual text goes out through
//! the [`NotificationQueue`].

pub mod notify;
pub mod stats;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::binding::BindingError;
use crate::config::WebhookConfig;
use crate::services::CollaboratorError;
use crate::wechat::{InboundMessage, MessageKind, Reply};

pub use notify::NotificationQueue;
pub use stats::{ProcessedMessage, ProcessingStats, StatsSnapshot};

/// Failure inside a message handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error(transparent)]
    Binding(#[from] BindingError),
}

/// Business logic behind the chat channel.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Returns the text to show the sender, or `None` for no visible reply.
    async fn handle(&self, message: &InboundMessage) -> Result<Option<String>, HandlerError>;
}

/// Reply budgets per message kind.
#[derive(Debug, Clone, Copy)]
pub struct Budgets {
    /// Text, events and anything unrecognized
    pub text: Duration,
    /// Voice and image, which take longer to interpret
    pub media: Duration,
}

impl Budgets {
    #[must_use]
    pub const fn for_kind(&self, kind: MessageKind) -> Duration {
        match kind {
            MessageKind::Voice | MessageKind::Image => self.media,
            MessageKind::Text | MessageKind::Event | MessageKind::Other => self.text,
        }
    }
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            text: Duration::from_secs(4),
            media: Duration::from_secs(8),
        }
    }
}

impl From<&WebhookConfig> for Budgets {
    fn from(config: &WebhookConfig) -> Self {
        Self {
            text: config.text_budget,
            media: config.media_budget,
        }
    }
}

/// What the webhook should answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handler finished within budget
    Replied(Reply),
    /// Budget ran out; the handler keeps running
    Deferred,
    /// Handler failed or panicked within budget
    Failed,
}

impl DispatchOutcome {
    /// The passive reply for this outcome.
    #[must_use]
    pub fn into_reply(self) -> Reply {
        match self {
            Self::Replied(reply) => reply,
            Self::Deferred | Self::Failed => Reply::Ack,
        }
    }
}

/// Races handlers against their budgets.
#[derive(Clone)]
pub struct Dispatcher {
    handler: Arc<dyn MessageHandler>,
    budgets: Budgets,
    stats: ProcessingStats,
    notifications: Option<NotificationQueue>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("budgets", &self.budgets)
            .field("notifications", &self.notifications.is_some())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        handler: Arc<dyn MessageHandler>,
        budgets: Budgets,
        stats: ProcessingStats,
        notifications: Option<NotificationQueue>,
    ) -> Self {
        Self {
            handler,
            budgets,
            stats,
            notifications,
        }
    }

    #[must_use]
    pub const fn stats(&self) -> &ProcessingStats {
        &self.stats
    }

    /// Run the handler for `message` within its budget.
    #[instrument(skip(self, message), fields(kind = %message.kind(), sender = %message.external_id))]
    pub async fn dispatch(&self, message: InboundMessage) -> DispatchOutcome {
        let kind = message.kind();
        let budget = self.budgets.for_kind(kind);
        let started = Instant::now();

        let handler = Arc::clone(&self.handler);
        let task_message = message.clone();
        let mut task = tokio::spawn(async move { handler.handle(&task_message).await });

        match tokio::time::timeout(budget, &mut task).await {
            Ok(result) => {
                let outcome = match into_text(result) {
                    Ok(text) => {
                        debug!(elapsed_ms = started.elapsed().as_millis(), "Handler replied");
                        DispatchOutcome::Replied(Reply::text(&message, text.unwrap_or_default()))
                    }
                    Err(()) => DispatchOutcome::Failed,
                };
                self.stats.record(
                    kind,
                    !matches!(outcome, DispatchOutcome::Failed),
                    false,
                    started.elapsed(),
                );
                outcome
            }
            Err(_) => {
                info!(budget_ms = budget.as_millis(), "Reply budget exceeded, deferring");
                let stats = self.stats.clone();
                let notifications = self.notifications.clone();
                let recipient = message.external_id;

                tokio::spawn(async move {
                    let result = into_text(task.await);
                    stats.record(kind, result.is_ok(), true, started.elapsed());

                    let Ok(Some(text)) = result else { return };
                    if text.trim().is_empty() {
                        return;
                    }
                    match notifications {
                        Some(queue) => {
                            queue.push(recipient, text);
                        }
                        None => warn!("No notifier configured, dropping deferred reply"),
                    }
                });

                DispatchOutcome::Deferred
            }
        }
    }
}

fn into_text(
    result: Result<Result<Option<String>, HandlerError>, JoinError>,
) -> Result<Option<String>, ()> {
    match result {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => {
            warn!(error = %e, "Message handler failed");
            Err(())
        }
        Err(e) => {
            error!(error = %e, "Message handler panicked");
            Err(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use tokio::sync::Mutex;

    use super::*;
    use crate::services::Notifier;
    use crate::wechat::MessagePayload;
    use zhiweijz_core::ExternalId;

    /// Sleeps for a fixed time, then answers with the message text.
    struct SlowEcho(Duration);

    #[async_trait]
    impl MessageHandler for SlowEcho {
        async fn handle(&self, message: &InboundMessage) -> Result<Option<String>, HandlerError> {
            tokio::time::sleep(self.0).await;
            match &message.payload {
                MessagePayload::Text { content } => Ok(Some(format!("echo: {content}"))),
                _ => Ok(Some("done".to_string())),
            }
        }
    }

    struct Failing;

    #[async_trait]
    impl MessageHandler for Failing {
        async fn handle(&self, _: &InboundMessage) -> Result<Option<String>, HandlerError> {
            Err(CollaboratorError::Api {
                service: "inference",
                message: "boom".to_string(),
            }
            .into())
        }
    }

    struct Panicking;

    #[async_trait]
    impl MessageHandler for Panicking {
        async fn handle(&self, _: &InboundMessage) -> Result<Option<String>, HandlerError> {
            panic!("handler bug");
        }
    }

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn notify(&self, _: &ExternalId, text: &str) -> Result<(), CollaboratorError> {
            self.sent.lock().await.push(text.to_string());
            Ok(())
        }
    }

    fn message(payload: MessagePayload) -> InboundMessage {
        InboundMessage {
            message_id: Some("1001".to_string()),
            external_id: ExternalId::parse("openid-1").unwrap(),
            account_id: "gh_account".to_string(),
            created_at: Some(1_700_000_000),
            payload,
        }
    }

    fn text(content: &str) -> InboundMessage {
        message(MessagePayload::Text {
            content: content.to_string(),
        })
    }

    fn dispatcher(handler: Arc<dyn MessageHandler>, queue: Option<NotificationQueue>) -> Dispatcher {
        Dispatcher::new(handler, Budgets::default(), ProcessingStats::new(), queue)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_within_budget() {
        let dispatcher = dispatcher(Arc::new(SlowEcho(Duration::from_millis(3900))), None);
        let outcome = dispatcher.dispatch(text("午餐 35")).await;

        assert_eq!(
            outcome.into_reply().content(),
            Some("echo: 午餐 35"),
        );
        assert_eq!(dispatcher.stats().snapshot().succeeded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_text_over_budget_defers() {
        let dispatcher = dispatcher(Arc::new(SlowEcho(Duration::from_millis(4100))), None);
        let outcome = dispatcher.dispatch(text("午餐 35")).await;
        assert_eq!(outcome, DispatchOutcome::Deferred);
        assert_eq!(outcome.into_reply(), Reply::Ack);
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_gets_longer_budget() {
        let dispatcher = dispatcher(Arc::new(SlowEcho(Duration::from_secs(6))), None);
        let voice = message(MessagePayload::Voice {
            media_id: Some("media-1".to_string()),
            format: Some("amr".to_string()),
            recognition: None,
        });

        let outcome = dispatcher.dispatch(voice).await;
        assert!(matches!(outcome, DispatchOutcome::Replied(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_reply_reaches_notifier() {
        let recorder = Arc::new(Recorder::default());
        let (queue, _worker) = NotificationQueue::spawn(recorder.clone());
        let dispatcher = dispatcher(Arc::new(SlowEcho(Duration::from_secs(6))), Some(queue));

        let outcome = dispatcher.dispatch(text("打车 20")).await;
        assert_eq!(outcome, DispatchOutcome::Deferred);

        tokio::time::sleep(Duration::from_secs(3)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(*recorder.sent.lock().await, vec!["echo: 打车 20".to_string()]);
        let snapshot = dispatcher.stats().snapshot();
        assert_eq!(snapshot.total, 1);
        assert!(snapshot.recent_messages.first().unwrap().deferred);
    }

    #[tokio::test]
    async fn test_handler_error_acknowledges() {
        let dispatcher = dispatcher(Arc::new(Failing), None);
        let outcome = dispatcher.dispatch(text("午餐 35")).await;

        assert_eq!(outcome, DispatchOutcome::Failed);
        assert_eq!(outcome.into_reply(), Reply::Ack);
        assert_eq!(dispatcher.stats().snapshot().succeeded, 0);
    }

    #[tokio::test]
    async fn test_handler_panic_acknowledges() {
        let dispatcher = dispatcher(Arc::new(Panicking), None);
        let outcome = dispatcher.dispatch(text("午餐 35")).await;
        assert_eq!(outcome, DispatchOutcome::Failed);
    }

    #[tokio::test]
    async fn test_no_text_acknowledges() {
        struct Silent;

        #[async_trait]
        impl MessageHandler for Silent {
            async fn handle(&self, _: &InboundMessage) -> Result<Option<String>, HandlerError> {
                Ok(None)
            }
        }

        let outcome = dispatcher(Arc::new(Silent), None)
            .dispatch(text("hi"))
            .await;
        assert_eq!(outcome, DispatchOutcome::Replied(Reply::Ack));
    }
}
