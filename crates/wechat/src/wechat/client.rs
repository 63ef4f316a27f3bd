//! WeChat official-account API client.
//!
//! Covers the calls this service makes: the OAuth code exchange behind the
//! binding page, customer-service messages for deferred replies, and menu
//! creation. The server access token is cached for slightly less than its
//! two-hour lifetime.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use zhiweijz_core::ExternalId;

use super::error::WechatError;
use crate::config::WechatConfig;
use crate::services::{CollaboratorError, IdentityResolver, Notifier};

/// WeChat API base URL.
const WECHAT_API_BASE: &str = "https://api.weixin.qq.com";

/// Browser-side OAuth authorization endpoint.
const OAUTH_AUTHORIZE_URL: &str = "https://open.weixin.qq.com/connect/oauth2/authorize";

/// Access tokens live for 7200 s; refresh a little early.
const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(7000);

const SERVICE: &str = "wechat";

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

impl ApiStatus {
    fn into_result(self) -> Result<(), WechatError> {
        if self.errcode == 0 {
            Ok(())
        } else {
            Err(WechatError::Api {
                code: self.errcode,
                message: self.errmsg,
            })
        }
    }
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: Option<String>,
    #[serde(flatten)]
    status: ApiStatus,
}

#[derive(Debug, Deserialize)]
struct OauthTokenResponse {
    openid: Option<String>,
    #[serde(flatten)]
    status: ApiStatus,
}

#[derive(Debug, Serialize)]
struct CustomTextMessage<'a> {
    touser: &'a str,
    msgtype: &'static str,
    text: TextBody<'a>,
}

#[derive(Debug, Serialize)]
struct TextBody<'a> {
    content: &'a str,
}

/// Custom menu definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Menu {
    pub button: Vec<MenuButton>,
}

/// One top-level menu button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MenuButton {
    /// Opens a URL in the in-app browser
    View { name: String, url: String },
    /// Pushes a `CLICK` event with `key`
    Click { name: String, key: String },
}

// =============================================================================
// Client
// =============================================================================

/// Client for the WeChat official-account API.
#[derive(Clone)]
pub struct WechatClient {
    inner: Arc<WechatClientInner>,
}

struct WechatClientInner {
    client: Client,
    api_base: String,
    app_id: String,
    app_secret: SecretString,
    tokens: Cache<(), String>,
}

impl std::fmt::Debug for WechatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WechatClient")
            .field("api_base", &self.inner.api_base)
            .field("app_id", &self.inner.app_id)
            .field("app_secret", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl WechatClient {
    /// Create a client for the public WeChat API.
    #[must_use]
    pub fn new(config: &WechatConfig) -> Self {
        Self::with_api_base(config, WECHAT_API_BASE)
    }

    /// Create a client against another API host (used by tests).
    #[must_use]
    pub fn with_api_base(config: &WechatConfig, api_base: &str) -> Self {
        let tokens = Cache::builder()
            .max_capacity(1)
            .time_to_live(ACCESS_TOKEN_TTL)
            .build();

        Self {
            inner: Arc::new(WechatClientInner {
                client: Client::builder()
                    .timeout(Duration::from_secs(10))
                    .build()
                    .unwrap_or_default(),
                api_base: api_base.trim_end_matches('/').to_string(),
                app_id: config.app_id.clone(),
                app_secret: config.app_secret.clone(),
                tokens,
            }),
        }
    }

    /// Browser URL that sends the user through silent (`snsapi_base`) OAuth
    /// and back to `redirect_uri` with a `code`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the built-in endpoint fails to parse.
    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<Url, url::ParseError> {
        authorize_url(&self.inner.app_id, redirect_uri, state)
    }

    /// Server access token, fetched once and cached.
    ///
    /// # Errors
    ///
    /// Returns error if the token request fails or WeChat refuses it.
    pub async fn access_token(&self) -> Result<String, WechatError> {
        self.inner
            .tokens
            .try_get_with((), self.fetch_access_token())
            .await
            .map_err(|e| match Arc::try_unwrap(e) {
                Ok(err) => err,
                Err(shared) => WechatError::Request(shared.to_string()),
            })
    }

    #[instrument(skip(self))]
    async fn fetch_access_token(&self) -> Result<String, WechatError> {
        let response: AccessTokenResponse = self
            .inner
            .client
            .get(format!("{}/cgi-bin/token", self.inner.api_base))
            .query(&[
                ("grant_type", "client_credential"),
                ("appid", self.inner.app_id.as_str()),
                ("secret", self.inner.app_secret.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| WechatError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| WechatError::Response(e.to_string()))?;

        response.status.into_result()?;
        let token = response
            .access_token
            .ok_or_else(|| WechatError::Response("missing access_token".to_string()))?;
        debug!("WeChat access token refreshed");
        Ok(token)
    }

    /// Exchange an OAuth `code` for the user's `openid`.
    ///
    /// # Errors
    ///
    /// Returns error if the exchange fails or the code was already used.
    #[instrument(skip(self, code))]
    pub async fn exchange_code(&self, code: &str) -> Result<ExternalId, WechatError> {
        let response: OauthTokenResponse = self
            .inner
            .client
            .get(format!("{}/sns/oauth2/access_token", self.inner.api_base))
            .query(&[
                ("appid", self.inner.app_id.as_str()),
                ("secret", self.inner.app_secret.expose_secret()),
                ("code", code),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| WechatError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| WechatError::Response(e.to_string()))?;

        response.status.into_result()?;
        let openid = response
            .openid
            .ok_or_else(|| WechatError::Response("missing openid".to_string()))?;
        ExternalId::parse(&openid).map_err(|e| WechatError::InvalidIdentity(e.to_string()))
    }

    /// Send a customer-service text message.
    ///
    /// Only allowed within 48 hours of the user's last interaction.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or WeChat rejects the message.
    #[instrument(skip(self, content), fields(recipient = %recipient))]
    pub async fn send_text(&self, recipient: &ExternalId, content: &str) -> Result<(), WechatError> {
        let token = self.access_token().await?;
        let message = CustomTextMessage {
            touser: recipient.as_str(),
            msgtype: "text",
            text: TextBody { content },
        };
        self.post_json("/cgi-bin/message/custom/send", &token, &message)
            .await
    }

    /// Replace the official account's custom menu.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or WeChat rejects the menu.
    #[instrument(skip(self, menu))]
    pub async fn create_menu(&self, menu: &Menu) -> Result<(), WechatError> {
        let token = self.access_token().await?;
        self.post_json("/cgi-bin/menu/create", &token, menu).await
    }

    async fn post_json<T: Serialize + Sync>(
        &self,
        path: &str,
        token: &str,
        body: &T,
    ) -> Result<(), WechatError> {
        let status: ApiStatus = self
            .inner
            .client
            .post(format!("{}{path}", self.inner.api_base))
            .query(&[("access_token", token)])
            .json(body)
            .send()
            .await
            .map_err(|e| WechatError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| WechatError::Response(e.to_string()))?;

        if let Err(err) = status.into_result() {
            // 40001/42001: token revoked or expired early
            if let WechatError::Api {
                code: 40001 | 42001,
                ..
            } = err
            {
                warn!("WeChat rejected cached access token, dropping it");
                self.inner.tokens.invalidate(&()).await;
            }
            return Err(err);
        }
        Ok(())
    }
}

/// Browser URL for silent (`snsapi_base`) OAuth on behalf of `app_id`.
///
/// # Errors
///
/// Returns an error only if the built-in endpoint fails to parse.
pub fn authorize_url(app_id: &str, redirect_uri: &str, state: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(OAUTH_AUTHORIZE_URL)?;
    url.query_pairs_mut()
        .append_pair("appid", app_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", "snsapi_base")
        .append_pair("state", state);
    url.set_fragment(Some("wechat_redirect"));
    Ok(url)
}

/// Menu installed by `zwjz-cli wechat menu`.
///
/// `bind_authorize_url` should come from [`WechatClient::authorize_url`].
#[must_use]
pub fn default_menu(bind_authorize_url: &str, website: &str) -> Menu {
    let website = website.trim_end_matches('/');
    Menu {
        button: vec![
            MenuButton::View {
                name: "访问官网".to_string(),
                url: website.to_string(),
            },
            MenuButton::View {
                name: "账号绑定".to_string(),
                url: bind_authorize_url.to_string(),
            },
            MenuButton::View {
                name: "下载App".to_string(),
                url: format!("{website}/downloads"),
            },
        ],
    }
}

impl From<WechatError> for CollaboratorError {
    fn from(err: WechatError) -> Self {
        match err {
            WechatError::Request(message) => Self::Request {
                service: SERVICE,
                message,
            },
            other => Self::Api {
                service: SERVICE,
                message: other.to_string(),
            },
        }
    }
}

#[async_trait]
impl IdentityResolver for WechatClient {
    async fn resolve(&self, code: &str) -> Result<ExternalId, CollaboratorError> {
        Ok(self.exchange_code(code).await?)
    }
}

#[async_trait]
impl Notifier for WechatClient {
    async fn notify(&self, recipient: &ExternalId, text: &str) -> Result<(), CollaboratorError> {
        Ok(self.send_text(recipient, text).await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use serde_json::json;

    use super::*;

    fn config() -> WechatConfig {
        WechatConfig {
            app_id: "wx_app".to_string(),
            app_secret: SecretString::from("app-secret-value"),
            token: SecretString::from("token"),
            binding_secret: SecretString::from("binding"),
        }
    }

    #[test]
    fn test_authorize_url() {
        let client = WechatClient::new(&config());
        let url = client
            .authorize_url("https://wx.zhiweijz.cn/bind", "binding")
            .unwrap();
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert_eq!(url.host_str(), Some("open.weixin.qq.com"));
        assert_eq!(url.fragment(), Some("wechat_redirect"));
        assert!(query.contains(&("appid".to_string(), "wx_app".to_string())));
        assert!(query.contains(&(
            "redirect_uri".to_string(),
            "https://wx.zhiweijz.cn/bind".to_string()
        )));
        assert!(query.contains(&("scope".to_string(), "snsapi_base".to_string())));
    }

    #[test]
    fn test_menu_serialization() {
        let menu = default_menu("https://auth", "https://www.zhiweijz.cn/");
        let value = serde_json::to_value(&menu).unwrap();
        assert_eq!(
            value,
            json!({
                "button": [
                    {"type": "view", "name": "访问官网", "url": "https://www.zhiweijz.cn"},
                    {"type": "view", "name": "账号绑定", "url": "https://auth"},
                    {"type": "view", "name": "下载App", "url": "https://www.zhiweijz.cn/downloads"}
                ]
            })
        );

        let click = MenuButton::Click {
            name: "查看余额".to_string(),
            key: "BALANCE".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&click).unwrap(),
            json!({"type": "click", "name": "查看余额", "key": "BALANCE"})
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        let output = format!("{:?}", WechatClient::new(&config()));
        assert!(output.contains("[REDACTED]"));
        assert!(!output.contains("app-secret-value"));
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/sns/oauth2/access_token")
                    .query_param("code", "code-1")
                    .query_param("grant_type", "authorization_code");
                then.status(200)
                    .json_body(json!({"access_token": "t", "openid": "openid-user-1"}));
            })
            .await;

        let client = WechatClient::with_api_base(&config(), &server.base_url());
        let openid = client.exchange_code("code-1").await.unwrap();
        assert_eq!(openid.as_str(), "openid-user-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_exchange_code_api_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/sns/oauth2/access_token");
                then.status(200)
                    .json_body(json!({"errcode": 40029, "errmsg": "invalid code"}));
            })
            .await;

        let client = WechatClient::with_api_base(&config(), &server.base_url());
        let err = client.exchange_code("used").await.unwrap_err();
        assert!(matches!(err, WechatError::Api { code: 40029, .. }));
    }

    #[tokio::test]
    async fn test_send_text_reuses_cached_token() {
        let server = MockServer::start_async().await;
        let token = server
            .mock_async(|when, then| {
                when.method(GET).path("/cgi-bin/token");
                then.status(200)
                    .json_body(json!({"access_token": "tok-1", "expires_in": 7200}));
            })
            .await;
        let send = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/cgi-bin/message/custom/send")
                    .query_param("access_token", "tok-1")
                    .body_includes("\"touser\":\"openid-user-1\"")
                    .body_includes("记账成功");
                then.status(200).json_body(json!({"errcode": 0, "errmsg": "ok"}));
            })
            .await;

        let client = WechatClient::with_api_base(&config(), &server.base_url());
        let recipient = ExternalId::parse("openid-user-1").unwrap();
        client.send_text(&recipient, "记账成功").await.unwrap();
        client.send_text(&recipient, "记账成功").await.unwrap();

        token.assert_calls_async(1).await;
        send.assert_calls_async(2).await;
    }
}
