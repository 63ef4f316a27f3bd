//! Unified error handling with Sentry integration.
//!
//! Binding-page handlers return `Result<T, AppError>`. Errors render the
//! error page with a fixed, user-facing message; server-side failures are
//! captured to Sentry first. The chat channel never surfaces these and
//! always acknowledges with `success` instead.

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::binding::BindingError;
use crate::db::RepositoryError;
use crate::filters;
use crate::services::CollaboratorError;

/// Application-level error type for the binding pages.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("binding error: {0}")]
    Binding(#[from] BindingError),

    #[error("database error: {0}")]
    Database(#[from] RepositoryError),

    /// An external service failed.
    #[error("upstream error: {0}")]
    Upstream(#[from] CollaboratorError),

    /// WeChat integration is not configured.
    #[error("WeChat integration not configured")]
    NotConfigured,

    /// Page opened outside the WeChat in-app browser.
    #[error("not opened in WeChat")]
    ClientBrowserRequired,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Error page.
#[derive(Template, WebTemplate)]
#[template(path = "bind/error.html")]
pub struct ErrorTemplate {
    pub title: &'static str,
    pub message: &'static str,
    /// Show the "reopen binding page" link
    pub retry: bool,
}

impl AppError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Binding(err) => match err {
                BindingError::InvalidTicket(_) | BindingError::InvalidTransition(_) => {
                    StatusCode::BAD_REQUEST
                }
                BindingError::CredentialsRejected => StatusCode::UNAUTHORIZED,
                BindingError::Throttled => StatusCode::TOO_MANY_REQUESTS,
                BindingError::OwnershipViolation => StatusCode::FORBIDDEN,
                BindingError::Conflict => StatusCode::CONFLICT,
                BindingError::Upstream(_) => StatusCode::SERVICE_UNAVAILABLE,
                BindingError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Upstream(_) | Self::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            Self::ClientBrowserRequired => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    const fn page(&self) -> (&'static str, &'static str, bool) {
        match self {
            Self::Binding(err) => match err {
                BindingError::InvalidTicket(_) => {
                    ("页面已过期", "绑定页面已过期，请重新打开绑定页面。", true)
                }
                BindingError::InvalidTransition(_) => (
                    "操作无效",
                    "当前绑定状态不支持此操作，请重新打开绑定页面。",
                    true,
                ),
                BindingError::CredentialsRejected => {
                    ("登录失败", "邮箱或密码错误，请重试。", true)
                }
                BindingError::Throttled => ("尝试次数过多", "尝试次数过多，请稍后再试。", false),
                BindingError::OwnershipViolation => {
                    ("无权访问", "您无权使用该账本，请重新选择。", true)
                }
                BindingError::Conflict => ("请重试", "绑定信息已被更新，请重新操作。", true),
                BindingError::Upstream(_) => {
                    ("服务暂不可用", "服务暂时不可用，请稍后重试。", true)
                }
                BindingError::Repository(_) => ("出错了", "服务器内部错误，请稍后重试。", true),
            },
            Self::Upstream(_) => ("服务暂不可用", "服务暂时不可用，请稍后重试。", true),
            Self::NotConfigured => ("服务未开启", "微信服务尚未配置，请联系管理员。", false),
            Self::ClientBrowserRequired => (
                "请在微信中打开",
                "请在微信客户端内打开此页面完成绑定。",
                false,
            ),
            Self::BadRequest(_) => ("请求无效", "请求参数无效，请重新打开绑定页面。", true),
            Self::Database(_) | Self::Internal(_) => {
                ("出错了", "服务器内部错误，请稍后重试。", true)
            }
        }
    }

    const fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::Internal(_)
                | Self::Upstream(_)
                | Self::Binding(BindingError::Repository(_) | BindingError::Upstream(_))
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        } else {
            tracing::warn!(error = %self, "Request rejected");
        }

        let (title, message, retry) = self.page();
        let page = ErrorTemplate {
            title,
            message,
            retry,
        };
        (self.status(), page).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;
