//! Smart-accounting inference service client.
//!
//! The service records transactions parsed from chat input and answers with
//! a short summary.
//!
//! # Contract
//!
//! `POST {SMART_ACCOUNTING_URL}/api/wechat/smart-accounting` with a bearer
//! key and a JSON body:
//!
//! ```json
//! {"user_id": "…", "account_book_id": "…", "input": {"type": "text", "content": "午餐 35"}}
//! ```
//!
//! Statistics questions are sent as
//! `{"type": "query", "query": "time_range", "start": "2026-03-01", "end": "2026-03-11", "period": "month"}`;
//! `limit` accompanies `recent` and the date fields only `time_range`.
//!
//! The response is `{"success": bool, "message": "…"}`; `message` is shown to
//! the user either way.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use url::Url;

use zhiweijz_core::{AccountBookId, UserId};

use super::{CollaboratorError, InferenceInput, InferenceRequest, InferenceService, StatsQuery};
use crate::config::InferenceConfig;

const SERVICE: &str = "smart-accounting";

/// Endpoint path under the configured base URL.
const ENDPOINT: &str = "api/wechat/smart-accounting";

#[derive(Debug, Serialize)]
struct RequestBody<'a> {
    user_id: UserId,
    account_book_id: AccountBookId,
    input: InputBody<'a>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum InputBody<'a> {
    Text {
        content: &'a str,
    },
    Voice {
        media_id: Option<&'a str>,
        transcription: Option<&'a str>,
    },
    Image {
        url: Option<&'a str>,
        media_id: Option<&'a str>,
    },
    Query {
        query: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        limit: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        start: Option<NaiveDate>,
        #[serde(skip_serializing_if = "Option::is_none")]
        end: Option<NaiveDate>,
        #[serde(skip_serializing_if = "Option::is_none")]
        period: Option<&'static str>,
    },
}

impl InputBody<'static> {
    fn query(query: StatsQuery) -> Self {
        let (limit, range) = match query {
            StatsQuery::Recent { limit } => (Some(limit), None),
            StatsQuery::TimeRange { start, end, period } => (None, Some((start, end, period))),
            StatsQuery::Balance | StatsQuery::Categories | StatsQuery::Budget => (None, None),
        };
        Self::Query {
            query: query.as_str(),
            limit,
            start: range.map(|(start, _, _)| start),
            end: range.map(|(_, end, _)| end),
            period: range.map(|(_, _, period)| period.as_str()),
        }
    }
}

impl<'a> From<&'a InferenceInput> for InputBody<'a> {
    fn from(input: &'a InferenceInput) -> Self {
        match input {
            InferenceInput::Text(content) => Self::Text { content },
            InferenceInput::Voice {
                media_id,
                transcription,
            } => Self::Voice {
                media_id: media_id.as_deref(),
                transcription: transcription.as_deref(),
            },
            InferenceInput::Image { url, media_id } => Self::Image {
                url: url.as_deref(),
                media_id: media_id.as_deref(),
            },
            InferenceInput::Query(query) => InputBody::query(*query),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: String,
}

/// HTTP client for the smart-accounting service.
#[derive(Clone)]
pub struct SmartAccountingClient {
    client: Client,
    endpoint: Url,
    api_key: SecretString,
}

impl std::fmt::Debug for SmartAccountingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartAccountingClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl SmartAccountingClient {
    /// # Errors
    ///
    /// Returns an error if the endpoint URL cannot be derived from the base.
    pub fn new(config: &InferenceConfig) -> Result<Self, url::ParseError> {
        let mut base = config.url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            endpoint: base.join(ENDPOINT)?,
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl InferenceService for SmartAccountingClient {
    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    async fn interpret(&self, request: InferenceRequest) -> Result<String, CollaboratorError> {
        let body = RequestBody {
            user_id: request.user_id,
            account_book_id: request.account_book_id,
            input: InputBody::from(&request.input),
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| CollaboratorError::Request {
                service: SERVICE,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::Api {
                service: SERVICE,
                message: format!("HTTP {status}"),
            });
        }

        let body: ResponseBody = response.json().await.map_err(|e| CollaboratorError::Api {
            service: SERVICE,
            message: format!("invalid response: {e}"),
        })?;

        if !body.success {
            tracing::info!(message = %body.message, "Inference declined input");
        }
        Ok(body.message)
    }
}
