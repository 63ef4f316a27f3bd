//! Account-binding pages.
//!
//! Opened from the official-account menu inside the WeChat browser. The
//! OAuth `code` identifies the visitor; every later form post carries the
//! signed ticket issued when the page was rendered.

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Form,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use secrecy::SecretString;
use serde::Deserialize;
use tracing::{info, instrument};

use zhiweijz_core::{AccountBookId, Email, ExternalId, UserId};

use crate::binding::{BindingError, BindingPage, Selection};
use crate::error::{AppError, Result};
use crate::filters;
use crate::models::{AccountBook, AccountUser};
use crate::state::{AppState, WechatIntegration};
use crate::wechat::client::authorize_url;

/// OAuth `state` round-tripped through the authorize redirect.
const OAUTH_STATE: &str = "binding";

const CREDENTIALS_REJECTED: &str = "邮箱或密码错误，请重试。";
const INVALID_EMAIL: &str = "请输入有效的邮箱地址。";

// =============================================================================
// Form Types
// =============================================================================

/// Query parameters on the OAuth redirect.
#[derive(Debug, Deserialize)]
pub struct BindQuery {
    pub code: Option<String>,
}

/// Credentials or book selection, posted to the same endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindForm {
    pub external_id: String,
    pub ticket: String,
    pub email: Option<String>,
    pub password: Option<String>,
    pub user_id: Option<String>,
    pub account_book_id: Option<String>,
}

/// Unbind confirmation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnbindForm {
    pub external_id: String,
    pub ticket: String,
}

// =============================================================================
// Templates
// =============================================================================

/// Credentials form.
#[derive(Template, WebTemplate)]
#[template(path = "bind/form.html")]
pub struct FormTemplate {
    pub external_id: String,
    pub ticket: String,
    pub email: String,
    pub error: Option<&'static str>,
}

/// One selectable book.
#[derive(Debug, Clone)]
pub struct BookOption {
    pub id: String,
    pub name: String,
    pub label: String,
    pub is_default: bool,
    pub selected: bool,
}

/// Book selection, optionally with the unbind action.
#[derive(Template, WebTemplate)]
#[template(path = "bind/select.html")]
pub struct SelectTemplate {
    pub external_id: String,
    pub ticket: String,
    pub user_id: String,
    pub user_name: String,
    /// Name and label of the book currently bound
    pub current: Option<String>,
    pub books: Vec<BookOption>,
    pub rebinding: bool,
}

#[derive(Template, WebTemplate)]
#[template(path = "bind/success.html")]
pub struct SuccessTemplate {
    pub user_name: String,
    pub book_name: String,
    pub book_label: String,
}

#[derive(Template, WebTemplate)]
#[template(path = "bind/unbound.html")]
pub struct UnboundTemplate;

impl SelectTemplate {
    fn new(
        external_id: &ExternalId,
        ticket: String,
        user: &AccountUser,
        current: Option<&AccountBook>,
        books: &[AccountBook],
    ) -> Self {
        let books = books
            .iter()
            .map(|book| BookOption {
                id: book.id.to_string(),
                name: book.name.clone(),
                label: book.kind_label(),
                is_default: book.is_default,
                selected: current.is_some_and(|c| c.id == book.id),
            })
            .collect();

        Self {
            external_id: external_id.to_string(),
            ticket,
            user_id: user.id.to_string(),
            user_name: user.display_name(),
            current: current.map(|c| format!("{} {}", c.name, c.kind_label())),
            books,
            rebinding: current.is_some(),
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

fn integration(state: &AppState) -> Result<&WechatIntegration> {
    state.wechat().ok_or(AppError::NotConfigured)
}

fn is_client_browser(headers: &HeaderMap) -> bool {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ua| ua.contains("MicroMessenger"))
}

fn parse_external_id(raw: &str) -> Result<ExternalId> {
    ExternalId::parse(raw).map_err(|e| AppError::BadRequest(e.to_string()))
}

/// Open the binding page.
///
/// Without a `code` the visitor is sent through the platform's silent OAuth
/// authorization, which redirects back here with one.
#[instrument(skip(state, headers, query))]
pub async fn page(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<BindQuery>,
) -> Result<Response> {
    let wechat = integration(&state)?;

    if state.config().webhook.require_client_browser && !is_client_browser(&headers) {
        return Err(AppError::ClientBrowserRequired);
    }

    let Some(code) = query.code.filter(|c| !c.trim().is_empty()) else {
        let url = authorize_url(&wechat.app_id, &state.config().bind_url(), OAUTH_STATE)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        return Ok(Redirect::to(url.as_str()).into_response());
    };

    let identity = wechat.identity.as_ref().ok_or(AppError::NotConfigured)?;
    let external_id = identity.resolve(&code).await?;

    let page = match wechat.bindings.open(&external_id).await? {
        BindingPage::Form { ticket } => FormTemplate {
            external_id: external_id.to_string(),
            ticket,
            email: String::new(),
            error: None,
        }
        .into_response(),
        BindingPage::Rebind {
            ticket,
            user,
            current,
            books,
        } => {
            let mut page = SelectTemplate::new(&external_id, ticket, &user, current.as_ref(), &books);
            // bound without a usable book still offers unbinding
            page.rebinding = true;
            page.into_response()
        }
    };
    Ok(page)
}

/// Submit credentials or a book selection.
#[instrument(skip(state, form))]
pub async fn submit(State(state): State<AppState>, Form(form): Form<BindForm>) -> Result<Response> {
    let wechat = integration(&state)?;
    let external_id = parse_external_id(&form.external_id)?;

    match (form.email, form.password, form.user_id, form.account_book_id) {
        (Some(email), Some(password), _, _) => {
            let Ok(email) = Email::parse(&email) else {
                return Ok(credentials_form(&external_id, form.ticket, email, INVALID_EMAIL));
            };
            let password = SecretString::from(password);

            match wechat
                .bindings
                .submit_credentials(&external_id, &form.ticket, &email, &password)
                .await
            {
                Ok(verified) => Ok(SelectTemplate::new(
                    &external_id,
                    verified.ticket,
                    &verified.user,
                    None,
                    &verified.books,
                )
                .into_response()),
                Err(BindingError::CredentialsRejected) => Ok(credentials_form(
                    &external_id,
                    form.ticket,
                    email.as_str().to_string(),
                    CREDENTIALS_REJECTED,
                )),
                Err(e) => Err(e.into()),
            }
        }
        (_, _, Some(user_id), Some(book_id)) => {
            let user_id =
                UserId::parse(&user_id).map_err(|e| AppError::BadRequest(e.to_string()))?;
            let book_id =
                AccountBookId::parse(&book_id).map_err(|e| AppError::BadRequest(e.to_string()))?;

            let Selection {
                binding,
                book,
                changed,
            } = wechat
                .bindings
                .select_account_book(&external_id, &form.ticket, user_id, book_id)
                .await?;
            info!(%external_id, version = binding.version, changed, "Binding page selection");

            let user_name = wechat
                .bindings
                .summary(&external_id)
                .await?
                .and_then(|summary| summary.user)
                .map(|user| user.display_name())
                .unwrap_or_default();

            Ok(SuccessTemplate {
                user_name,
                book_label: book.kind_label(),
                book_name: book.name,
            }
            .into_response())
        }
        _ => Err(AppError::BadRequest("incomplete binding form".to_string())),
    }
}

/// Remove the binding.
#[instrument(skip(state, form))]
pub async fn unbind(
    State(state): State<AppState>,
    Form(form): Form<UnbindForm>,
) -> Result<impl IntoResponse> {
    let wechat = integration(&state)?;
    let external_id = parse_external_id(&form.external_id)?;

    wechat.bindings.unbind(&external_id, &form.ticket).await?;
    Ok(UnboundTemplate)
}

fn credentials_form(
    external_id: &ExternalId,
    ticket: String,
    email: String,
    error: &'static str,
) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        FormTemplate {
            external_id: external_id.to_string(),
            ticket,
            email,
            error: Some(error),
        },
    )
        .into_response()
}
