//! # LegacyGuard Delivery Service
//!
//! Runs the time-capsule delivery workflow: the HTTP gateway, the
//! scheduled dispatch loop, and the supporting storage.
//!
//! Usage:
//!   legacyguard                                # Start gateway + delivery loop
//!   legacyguard --run-pass                     # One dispatch pass, print report
//!   legacyguard --issue-token jana@example.com # Mint an API token
//!   legacyguard --port 9000                    # Custom gateway port

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use legacyguard_core::LegacyGuardConfig;
use legacyguard_core::types::{Profile, ProfileStatus};
use legacyguard_delivery::Dispatcher;
use legacyguard_gateway::AppState;
use legacyguard_store::Store;

#[derive(Parser)]
#[command(
    name = "legacyguard",
    version,
    about = "🕊️ LegacyGuard — time-capsule delivery service"
)]
struct Cli {
    /// Config file path (default: ~/.legacyguard/config.toml)
    #[arg(long)]
    config: Option<String>,

    /// Override the gateway port
    #[arg(short, long)]
    port: Option<u16>,

    /// Run a single dispatch pass, print the report as JSON, and exit
    #[arg(long)]
    run_pass: bool,

    /// Create a profile (if needed) for this email and print a fresh API token
    #[arg(long, value_name = "EMAIL")]
    issue_token: Option<String>,

    /// Full name used when --issue-token creates a new profile
    #[arg(long, default_value = "")]
    full_name: String,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "legacyguard=debug,tower_http=debug"
    } else {
        "legacyguard=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    // Config: flag > env > default path; a missing file means defaults.
    let config_path = cli
        .config
        .map(|p| PathBuf::from(expand_path(&p)))
        .or_else(|| std::env::var("LEGACYGUARD_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(LegacyGuardConfig::default_path);
    let mut config = if config_path.exists() {
        LegacyGuardConfig::load_from(&config_path)?
    } else {
        tracing::info!(
            "No config at {}, using defaults",
            config_path.display()
        );
        LegacyGuardConfig::default()
    };
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    let db_path = PathBuf::from(expand_path(&config.database.path));
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let store = Arc::new(Store::open(&db_path)?);
    tracing::info!("💾 Store opened: {}", db_path.display());

    if let Some(email) = cli.issue_token {
        let profile = match store.get_profile_by_email(&email)? {
            Some(p) => p,
            None => {
                let full_name = if cli.full_name.is_empty() {
                    email.split('@').next().unwrap_or(&email).to_string()
                } else {
                    cli.full_name.clone()
                };
                let now = Utc::now();
                let profile = Profile {
                    id: uuid::Uuid::new_v4().to_string(),
                    email: email.clone(),
                    full_name,
                    status: ProfileStatus::Active,
                    created_at: now,
                    updated_at: now,
                };
                store.upsert_profile(&profile)?;
                tracing::info!("Profile created for {email}");
                profile
            }
        };
        let token = format!("lg_{}", uuid::Uuid::new_v4().simple());
        store.insert_api_token(&token, &profile.id)?;
        println!("user_id: {}", profile.id);
        println!("token:   {token}");
        return Ok(());
    }

    let mailer = legacyguard_mailer::build_mailer(&config.mailer)?;
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        mailer.clone(),
        &config.delivery,
        &config.app_url,
    ));

    if cli.run_pass {
        let report = dispatcher.run_pass().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    // Scheduled passes run in the background; the gateway owns the
    // foreground.
    let loop_dispatcher = dispatcher.clone();
    let delivery_config = config.delivery.clone();
    tokio::spawn(async move {
        legacyguard_delivery::engine::run_delivery_loop(loop_dispatcher, delivery_config).await;
    });

    let state = AppState {
        config,
        store,
        mailer,
        dispatcher,
    };
    legacyguard_gateway::start(state).await
}
