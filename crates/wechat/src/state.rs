//! Application state shared across handlers.

use std::sync::Arc;

use secrecy::SecretString;
use sqlx::PgPool;
use tracing::info;

use crate::binding::{BindingService, TicketError, TicketSigner};
use crate::config::{ServiceConfig, WechatConfig};
use crate::db::{BindingStore, PgBindingStore};
use crate::dedup::DeliveryDeduplicator;
use crate::dispatch::{Budgets, Dispatcher, NotificationQueue, ProcessingStats};
use crate::services::{
    AccountStore, CredentialVerifier, IdentityResolver, InferenceService, Notifier,
    PasswordCredentialVerifier, PgAccountStore, SmartAccountingClient, ThrottledVerifier,
    WechatMessageHandler,
};
use crate::wechat::WechatClient;

/// Error assembling application state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("invalid inference URL: {0}")]
    InferenceUrl(#[from] url::ParseError),
    #[error("invalid binding secret: {0}")]
    BindingSecret(#[from] TicketError),
}

/// External capabilities the service is wired against.
///
/// Optional capabilities are checked where they are used.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn BindingStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub credentials: Arc<dyn CredentialVerifier>,
    pub identity: Option<Arc<dyn IdentityResolver>>,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub inference: Option<Arc<dyn InferenceService>>,
}

impl Collaborators {
    /// Production wiring: `PostgreSQL` stores, the WeChat API, and the
    /// inference service when configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the inference URL is unusable.
    pub fn from_pool(config: &ServiceConfig, pool: &PgPool) -> Result<Self, StateError> {
        let accounts = PgAccountStore::new(pool.clone());
        let wechat = config.wechat.as_ref().map(WechatClient::new);

        let inference: Option<Arc<dyn InferenceService>> = match &config.inference {
            Some(inference) => Some(Arc::new(SmartAccountingClient::new(inference)?)),
            None => None,
        };

        Ok(Self {
            store: Arc::new(PgBindingStore::new(pool.clone())),
            accounts: Arc::new(accounts.clone()),
            credentials: Arc::new(PasswordCredentialVerifier::new(accounts)),
            identity: wechat
                .clone()
                .map(|c| Arc::new(c) as Arc<dyn IdentityResolver>),
            notifier: wechat.map(|c| Arc::new(c) as Arc<dyn Notifier>),
            inference,
        })
    }
}

/// Everything the webhook and binding pages need once WeChat is configured.
pub struct WechatIntegration {
    pub app_id: String,
    pub token: SecretString,
    pub identity: Option<Arc<dyn IdentityResolver>>,
    pub bindings: BindingService,
    pub dispatcher: Dispatcher,
    pub dedup: DeliveryDeduplicator,
}

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServiceConfig,
    store: Arc<dyn BindingStore>,
    stats: ProcessingStats,
    inference_available: bool,
    wechat: Option<WechatIntegration>,
}

impl AppState {
    /// Wire the service. Must be called within a Tokio runtime when a
    /// notifier is present, since the notification worker is spawned here.
    ///
    /// # Errors
    ///
    /// Returns an error if the binding secret cannot key the ticket MAC.
    pub fn new(config: ServiceConfig, collaborators: Collaborators) -> Result<Self, StateError> {
        let stats = ProcessingStats::new();
        let inference_available = collaborators.inference.is_some();

        let wechat = match &config.wechat {
            Some(wechat) => Some(Self::integration(
                &config,
                wechat,
                &collaborators,
                stats.clone(),
            )?),
            None => {
                info!("WeChat not configured, webhook and binding pages disabled");
                None
            }
        };

        Ok(Self {
            inner: Arc::new(AppStateInner {
                store: collaborators.store,
                stats,
                inference_available,
                wechat,
                config,
            }),
        })
    }

    fn integration(
        config: &ServiceConfig,
        wechat: &WechatConfig,
        collaborators: &Collaborators,
        stats: ProcessingStats,
    ) -> Result<WechatIntegration, StateError> {
        let tickets = TicketSigner::new(&wechat.binding_secret)?;
        let credentials: Arc<dyn CredentialVerifier> =
            Arc::new(ThrottledVerifier::new(Arc::clone(&collaborators.credentials)));

        let bindings = BindingService::new(
            Arc::clone(&collaborators.store),
            Arc::clone(&collaborators.accounts),
            credentials,
            tickets,
        );

        let handler = WechatMessageHandler::new(
            bindings.clone(),
            collaborators.inference.clone(),
            &config.base_url,
        );

        // worker runs for the life of the process
        let notifications = collaborators
            .notifier
            .clone()
            .map(|notifier| NotificationQueue::spawn(notifier).0);

        let dispatcher = Dispatcher::new(
            Arc::new(handler),
            Budgets::from(&config.webhook),
            stats,
            notifications,
        );

        Ok(WechatIntegration {
            app_id: wechat.app_id.clone(),
            token: wechat.token.clone(),
            identity: collaborators.identity.clone(),
            bindings,
            dispatcher,
            dedup: DeliveryDeduplicator::new(config.webhook.dedup_window),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn BindingStore> {
        &self.inner.store
    }

    #[must_use]
    pub fn stats(&self) -> &ProcessingStats {
        &self.inner.stats
    }

    #[must_use]
    pub fn inference_available(&self) -> bool {
        self.inner.inference_available
    }

    /// The WeChat integration, if configured.
    #[must_use]
    pub fn wechat(&self) -> Option<&WechatIntegration> {
        self.inner.wechat.as_ref()
    }
}
