//! Official-account menu management.
//!
//! # Usage
//!
//! ```bash
//! # Publish the default menu
//! zwjz-cli wechat menu
//!
//! # Print the menu JSON without publishing
//! zwjz-cli wechat menu --dry-run
//! ```
//!
//! Uses the same environment as the service (`ZWJZ_BASE_URL` and the
//! `WECHAT_*` group).

use thiserror::Error;

use zhiweijz_wechat::config::{ConfigError, ServiceConfig};
use zhiweijz_wechat::wechat::client::{WechatClient, default_menu};
use zhiweijz_wechat::wechat::WechatError;

/// Default OAuth `state` for the binding entry, matching the binding page.
const BIND_STATE: &str = "binding";

#[derive(Debug, Error)]
pub enum MenuError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("WeChat is not configured (set WECHAT_APP_ID and related variables)")]
    NotConfigured,

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Menu serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WeChat API error: {0}")]
    Wechat(#[from] WechatError),
}

/// Build the default menu and publish it, or print it with `dry_run`.
///
/// # Errors
///
/// Returns an error if configuration is incomplete or the API rejects the
/// menu.
pub async fn publish(website: &str, dry_run: bool) -> Result<(), MenuError> {
    let config = ServiceConfig::from_env()?;
    let wechat = config.wechat.as_ref().ok_or(MenuError::NotConfigured)?;

    let client = WechatClient::new(wechat);
    let bind_url = client.authorize_url(&config.bind_url(), BIND_STATE)?;
    let menu = default_menu(bind_url.as_str(), website);

    if dry_run {
        #[allow(clippy::print_stdout)]
        {
            println!("{}", serde_json::to_string_pretty(&menu)?);
        }
        return Ok(());
    }

    tracing::info!(buttons = menu.button.len(), "Publishing menu...");
    client.create_menu(&menu).await?;
    tracing::info!("Menu published");
    Ok(())
}
