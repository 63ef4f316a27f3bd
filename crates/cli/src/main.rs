//! Zhiweijz CLI - Database migrations and official-account management.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! zwjz-cli migrate
//!
//! # Publish the official-account menu
//! zwjz-cli wechat menu --website https://www.zhiweijz.cn
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "zwjz-cli")]
#[command(author, version, about = "Zhiweijz WeChat CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Manage the official account
    Wechat {
        #[command(subcommand)]
        action: WechatAction,
    },
}

#[derive(Subcommand)]
enum WechatAction {
    /// Publish the default custom menu
    Menu {
        /// Public website linked from the menu
        #[arg(short, long, default_value = "https://www.zhiweijz.cn")]
        website: String,

        /// Print the menu JSON instead of publishing it
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Wechat { action } => match action {
            WechatAction::Menu { website, dry_run } => {
                commands::menu::publish(&website, dry_run).await?;
            }
        },
    }
    Ok(())
}
