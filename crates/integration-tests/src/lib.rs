//! Integration test harness for the WeChat service.
//!
//! Builds the real router over in-memory collaborators so scenarios run
//! without `PostgreSQL` or network access.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p zhiweijz-integration-tests
//! ```

#![allow(clippy::missing_panics_doc, clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use secrecy::{ExposeSecret, SecretString};
use tower::ServiceExt;

use zhiweijz_core::{AccountBookId, AccountBookKind, Email, ExternalId, UserId};
use zhiweijz_wechat::config::{ServiceConfig, WebhookConfig, WechatConfig};
use zhiweijz_wechat::db::MemoryBindingStore;
use zhiweijz_wechat::models::{AccountBook, AccountUser};
use zhiweijz_wechat::services::{
    AccountStore, CollaboratorError, CredentialRejection, CredentialVerifier, IdentityResolver,
    InferenceRequest, InferenceService, Notifier,
};
use zhiweijz_wechat::state::{AppState, Collaborators};
use zhiweijz_wechat::wechat::signature;

pub const TOKEN: &str = "Wx7pQ2rL9sT4vK8mN3bH";
pub const APP_ID: &str = "wx4f2c8e1a9b7d3650";
pub const ACCOUNT_ID: &str = "gh_7a1c2e3f4b5d";
pub const BASE_URL: &str = "https://wx.zhiweijz.test";
pub const PASSWORD: &str = "correct horse";
const BINDING_SECRET: &str = "kR8#vN2q!Lp5@Xz9$Tm4&Hw7*Jc3^Bd6";

// =============================================================================
// In-memory collaborators
// =============================================================================

/// Users and books of the main application.
#[derive(Debug, Default)]
pub struct FakeAccounts {
    users: Mutex<Vec<(AccountUser, String)>>,
    books: Mutex<Vec<(UserId, AccountBook)>>,
}

impl FakeAccounts {
    /// Register an active user with [`PASSWORD`].
    pub fn add_user(&self, name: &str, email: &str) -> UserId {
        let user = AccountUser {
            id: UserId::generate(),
            name: name.to_string(),
            email: Email::parse(email).expect("valid email"),
            is_active: true,
        };
        let id = user.id;
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((user, PASSWORD.to_string()));
        id
    }

    pub fn add_book(&self, owner: UserId, name: &str, is_default: bool) -> AccountBookId {
        let book = AccountBook {
            id: AccountBookId::generate(),
            name: name.to_string(),
            kind: AccountBookKind::Personal,
            is_default,
            family_name: None,
        };
        let id = book.id;
        self.books
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((owner, book));
        id
    }

    fn books_of(&self, user_id: UserId) -> Vec<AccountBook> {
        let mut books: Vec<AccountBook> = self
            .books
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(owner, _)| *owner == user_id)
            .map(|(_, book)| book.clone())
            .collect();
        books.sort_by_key(|b| !b.is_default);
        books
    }
}

#[async_trait]
impl AccountStore for FakeAccounts {
    async fn find_user(&self, id: UserId) -> Result<Option<AccountUser>, CollaboratorError> {
        Ok(self
            .users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(user, _)| user.id == id)
            .map(|(user, _)| user.clone()))
    }

    async fn account_books(&self, user_id: UserId) -> Result<Vec<AccountBook>, CollaboratorError> {
        Ok(self.books_of(user_id))
    }

    async fn accessible_book(
        &self,
        user_id: UserId,
        book_id: AccountBookId,
    ) -> Result<Option<AccountBook>, CollaboratorError> {
        Ok(self.books_of(user_id).into_iter().find(|b| b.id == book_id))
    }
}

#[async_trait]
impl CredentialVerifier for FakeAccounts {
    async fn verify(
        &self,
        _external_id: &ExternalId,
        email: &Email,
        password: &SecretString,
    ) -> Result<AccountUser, CredentialRejection> {
        let users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        let (user, stored) = users
            .iter()
            .find(|(user, _)| &user.email == email)
            .ok_or(CredentialRejection::NotFound)?;
        if stored != password.expose_secret() {
            return Err(CredentialRejection::WrongPassword);
        }
        Ok(user.clone())
    }
}

/// OAuth codes the platform would hand out.
#[derive(Debug, Default)]
pub struct FakeIdentity {
    codes: Mutex<HashMap<String, ExternalId>>,
}

impl FakeIdentity {
    pub fn issue(&self, code: &str, openid: &str) {
        self.codes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(code.to_string(), ExternalId::parse(openid).expect("valid openid"));
    }
}

#[async_trait]
impl IdentityResolver for FakeIdentity {
    async fn resolve(&self, code: &str) -> Result<ExternalId, CollaboratorError> {
        self.codes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(code)
            .cloned()
            .ok_or_else(|| CollaboratorError::Api {
                service: "wechat",
                message: "errcode 40029: invalid code".to_string(),
            })
    }
}

/// Inference service that records requests and answers after a delay.
#[derive(Debug)]
pub struct RecordingInference {
    delay: Duration,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl RecordingInference {
    pub const REPLY: &'static str = "记账成功：餐饮 35元";

    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self {
            delay,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl InferenceService for RecordingInference {
    async fn interpret(&self, request: InferenceRequest) -> Result<String, CollaboratorError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        tokio::time::sleep(self.delay).await;
        Ok(Self::REPLY.to_string())
    }
}

/// Notifier that keeps every message it was asked to send.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(ExternalId, String)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(ExternalId, String)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Poll until at least `count` messages were sent or `within` elapses.
    pub async fn wait_for(&self, count: usize, within: Duration) -> Vec<(ExternalId, String)> {
        let poll = async {
            loop {
                let sent = self.sent();
                if sent.len() >= count {
                    return sent;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(within, poll)
            .await
            .unwrap_or_else(|_| self.sent())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, recipient: &ExternalId, text: &str) -> Result<(), CollaboratorError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((recipient.clone(), text.to_string()));
        Ok(())
    }
}

// =============================================================================
// Test context
// =============================================================================

/// Service configuration for tests; no environment is read.
#[must_use]
pub fn test_config(webhook: WebhookConfig, configured: bool) -> ServiceConfig {
    ServiceConfig {
        database_url: SecretString::from("postgres://unused@localhost/zhiweijz"),
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 3000,
        base_url: BASE_URL.to_string(),
        wechat: configured.then(|| WechatConfig {
            app_id: APP_ID.to_string(),
            app_secret: SecretString::from("3f9a1c7e5b2d8f4a6c0e9b1d7f3a5c8e"),
            token: SecretString::from(TOKEN),
            binding_secret: SecretString::from(BINDING_SECRET),
        }),
        webhook,
        inference: None,
        sentry_dsn: None,
        sentry_environment: None,
        sentry_sample_rate: 0.0,
        sentry_traces_sample_rate: 0.0,
    }
}

/// Webhook settings with the browser check off.
#[must_use]
pub fn webhook_config() -> WebhookConfig {
    WebhookConfig {
        require_client_browser: false,
        ..WebhookConfig::default()
    }
}

/// Router plus handles on every fake behind it.
pub struct TestContext {
    pub app: Router,
    pub state: AppState,
    pub store: Arc<MemoryBindingStore>,
    pub accounts: Arc<FakeAccounts>,
    pub identity: Arc<FakeIdentity>,
    pub inference: Arc<RecordingInference>,
    pub notifier: Arc<RecordingNotifier>,
}

/// A buffered response.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TestContext {
    /// Configured service with instant inference.
    pub fn new() -> Self {
        Self::build(webhook_config(), true, Duration::ZERO)
    }

    /// Must be called within a Tokio runtime.
    pub fn build(webhook: WebhookConfig, configured: bool, inference_delay: Duration) -> Self {
        let store = Arc::new(MemoryBindingStore::new());
        let accounts = Arc::new(FakeAccounts::default());
        let identity = Arc::new(FakeIdentity::default());
        let inference = Arc::new(RecordingInference::new(inference_delay));
        let notifier = Arc::new(RecordingNotifier::default());

        let collaborators = Collaborators {
            store: store.clone(),
            accounts: accounts.clone(),
            credentials: accounts.clone(),
            identity: Some(identity.clone()),
            notifier: Some(notifier.clone()),
            inference: Some(inference.clone()),
        };

        let state = AppState::new(test_config(webhook, configured), collaborators)
            .expect("state builds");

        Self {
            app: zhiweijz_wechat::app(state.clone()),
            state,
            store,
            accounts,
            identity,
            inference,
            notifier,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body collects")
            .to_bytes();

        TestResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(
            Request::builder()
                .uri(uri)
                .body(Body::empty())
                .expect("valid request"),
        )
        .await
    }

    /// POST a url-encoded form.
    pub async fn post_form(&self, uri: &str, fields: &[(&str, &str)]) -> TestResponse {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        self.send(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .expect("valid request"),
        )
        .await
    }

    /// POST a correctly signed delivery.
    pub async fn deliver(&self, body: &str) -> TestResponse {
        self.deliver_with(&signed_query("1718000000", "8472615"), body)
            .await
    }

    /// POST a delivery with an arbitrary query string.
    pub async fn deliver_with(&self, query: &str, body: &str) -> TestResponse {
        self.send(
            Request::builder()
                .method(Method::POST)
                .uri(format!("/webhook?{query}"))
                .header(header::CONTENT_TYPE, "text/xml")
                .body(Body::from(body.to_string()))
                .expect("valid request"),
        )
        .await
    }

    /// Walk the binding pages for `openid` and select `book`.
    ///
    /// Returns the final response.
    pub async fn bind(&self, openid: &str, email: &str, book: AccountBookId) -> TestResponse {
        let code = format!("code-{openid}");
        self.identity.issue(&code, openid);

        let page = self.get(&format!("/bind?code={code}")).await;
        assert_eq!(page.status, StatusCode::OK, "{}", page.body);
        let ticket = hidden_value(&page.body, "ticket").expect("form carries a ticket");

        let selection = self
            .post_form(
                "/bind",
                &[
                    ("externalId", openid),
                    ("ticket", &ticket),
                    ("email", email),
                    ("password", PASSWORD),
                ],
            )
            .await;
        assert_eq!(selection.status, StatusCode::OK, "{}", selection.body);

        self.select(openid, &selection.body, book).await
    }

    /// Submit a book choice from a rendered selection page.
    pub async fn select(&self, openid: &str, page: &str, book: AccountBookId) -> TestResponse {
        let ticket = hidden_value(page, "ticket").expect("selection carries a ticket");
        let user_id = hidden_value(page, "userId").expect("selection carries the user");
        self.post_form(
            "/bind",
            &[
                ("externalId", openid),
                ("ticket", &ticket),
                ("userId", &user_id),
                ("accountBookId", &book.to_string()),
            ],
        )
        .await
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Payload helpers
// =============================================================================

/// Query string with a valid signature for [`TOKEN`].
#[must_use]
pub fn signed_query(timestamp: &str, nonce: &str) -> String {
    let signature = signature::compute(TOKEN, timestamp, nonce);
    format!("signature={signature}&timestamp={timestamp}&nonce={nonce}")
}

/// Text message envelope as the platform sends it.
#[must_use]
pub fn text_xml(openid: &str, msg_id: u64, content: &str) -> String {
    format!(
        "<xml><ToUserName><![CDATA[{ACCOUNT_ID}]]></ToUserName>\
         <FromUserName><![CDATA[{openid}]]></FromUserName>\
         <CreateTime>1718000000</CreateTime>\
         <MsgType><![CDATA[text]]></MsgType>\
         <Content><![CDATA[{content}]]></Content>\
         <MsgId>{msg_id}</MsgId></xml>"
    )
}

/// Event envelope; events carry no message id.
#[must_use]
pub fn event_xml(openid: &str, event: &str, key: Option<&str>, create_time: i64) -> String {
    let key = key
        .map(|k| format!("<EventKey><![CDATA[{k}]]></EventKey>"))
        .unwrap_or_default();
    format!(
        "<xml><ToUserName><![CDATA[{ACCOUNT_ID}]]></ToUserName>\
         <FromUserName><![CDATA[{openid}]]></FromUserName>\
         <CreateTime>{create_time}</CreateTime>\
         <MsgType><![CDATA[event]]></MsgType>\
         <Event><![CDATA[{event}]]></Event>{key}</xml>"
    )
}

/// Value of a hidden form field in a rendered page.
#[must_use]
pub fn hidden_value(html: &str, name: &str) -> Option<String> {
    let marker = format!("name=\"{name}\" value=\"");
    let start = html.find(&marker)? + marker.len();
    let rest = html.get(start..)?;
    let end = rest.find('"')?;
    rest.get(..end).map(str::to_string)
}
