//! Storefront Sync CLI - drive a sync session from the terminal.
//!
//! # Usage
//!
//! ```bash
//! # Stream live price events until Ctrl-C
//! sfs-cli watch
//!
//! # Guest cart, persisted to STOREFRONT_STATE_PATH
//! sfs-cli cart add 42 2
//! sfs-cli cart show
//!
//! # Authenticated cart (merges the guest cart on first use)
//! sfs-cli cart --user 7 show
//!
//! # Favorites
//! sfs-cli favorites --user 7 toggle 42
//! ```
//!
//! # Commands
//!
//! - `watch` - Log price events and connection changes
//! - `cart` - Show or change the session cart
//! - `favorites` - Show or toggle favorites

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

use storefront_sync_client::config::ClientConfig;
use storefront_sync_client::session::SessionContext;
use storefront_sync_client::telemetry;
use storefront_sync_core::{ProductId, UserId};

mod commands;

use commands::CliError;

#[derive(Parser)]
#[command(name = "sfs-cli")]
#[command(author, version, about = "Storefront Sync CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream live price events until interrupted
    Watch {
        /// Also subscribe to this user's notifications
        #[arg(short, long)]
        user: Option<UserId>,
    },
    /// Show or change the cart
    Cart {
        /// Act on this user's cart instead of the guest cart
        #[arg(short, long)]
        user: Option<UserId>,

        #[command(subcommand)]
        action: CartAction,
    },
    /// Show or toggle favorites
    Favorites {
        /// Logged-in user
        #[arg(short, long)]
        user: UserId,

        #[command(subcommand)]
        action: FavoritesAction,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// List cart lines and the total
    Show,
    /// Add units of a product
    Add { product_id: ProductId, quantity: i64 },
    /// Set the quantity of a line (below 1 removes it)
    Set { product_id: ProductId, quantity: i64 },
    /// Remove a line
    Remove { product_id: ProductId },
    /// Empty the cart
    Clear,
}

#[derive(Subcommand)]
enum FavoritesAction {
    /// List favorites
    Show,
    /// Add or remove a product
    Toggle { product_id: ProductId },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing_subscriber::fmt::init();
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    let _sentry = telemetry::init(&config);

    if let Err(e) = run(cli, &config).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: &ClientConfig) -> Result<(), CliError> {
    let session = SessionContext::from_config(config)?;
    match cli.command {
        Commands::Watch { user } => commands::watch::run(&session, user).await?,
        Commands::Cart { user, action } => {
            session.resume(user).await?;
            match action {
                CartAction::Show => commands::cart::show(&session),
                CartAction::Add {
                    product_id,
                    quantity,
                } => commands::cart::add(&session, product_id, quantity).await?,
                CartAction::Set {
                    product_id,
                    quantity,
                } => commands::cart::set(&session, product_id, quantity).await,
                CartAction::Remove { product_id } => {
                    commands::cart::remove(&session, product_id).await;
                }
                CartAction::Clear => commands::cart::clear(&session).await,
            }
        }
        Commands::Favorites { user, action } => {
            session.resume(Some(user)).await?;
            match action {
                FavoritesAction::Show => commands::favorites::show(&session),
                FavoritesAction::Toggle { product_id } => {
                    commands::favorites::toggle(&session, product_id).await?;
                }
            }
        }
    }
    Ok(())
}
