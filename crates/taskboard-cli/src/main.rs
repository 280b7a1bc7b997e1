//! Taskboard CLI - log in to a Taskboard server and keep the session alive.
//!
//! The session is persisted between runs (file or OS keychain, see
//! `TASKBOARD_STORAGE`), so `taskboard login` once and later commands pick
//! the tokens up again.

use std::io::{self, Write};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use taskboard_core::auth::AccessClaims;
use taskboard_core::{AuthClient, Config, SessionEvent, SessionManager, StorageBackend};

#[derive(Parser)]
#[command(name = "taskboard", version, about = "Taskboard session client")]
struct Cli {
    /// Auth service base URL (overrides config and TASKBOARD_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Where to keep the session: file, keyring or memory
    #[arg(long, global = true)]
    storage: Option<StorageBackend>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in with email and password
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// End the saved session
    Logout,
    /// Show the logged-in user
    Whoami,
    /// Show session state and token expiry
    Status,
    /// Exchange the refresh token for a new pair now
    Refresh,
    /// Keep the session alive, printing lifecycle events until Ctrl+C
    Watch,
    /// Create an account
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
    /// Confirm an account with the emailed one-time code
    VerifyOtp {
        #[arg(long)]
        email: String,
        #[arg(long)]
        otp: String,
    },
    /// Send a new one-time code
    ResendOtp {
        #[arg(long)]
        email: String,
    },
    /// Start a password reset
    ForgotPassword {
        #[arg(long)]
        email: String,
    },
    /// Finish a password reset with the emailed one-time code
    ResetPassword {
        #[arg(long)]
        email: String,
        #[arg(long)]
        otp: String,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();
    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }
    if let Some(storage) = cli.storage {
        config.storage = storage;
    }
    info!(api = %config.api_base_url, storage = ?config.storage, "Taskboard CLI starting");

    match cli.command {
        Command::Login { email } => login(&mut config, email).await,
        Command::Logout => {
            let session = SessionManager::from_config(&config)?;
            session.restore();
            session.logout();
            eprintln!("Logged out.");
            Ok(())
        }
        Command::Whoami => {
            let session = restored_session(&config)?;
            let user = session.current_user().await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
            Ok(())
        }
        Command::Status => status(&config),
        Command::Refresh => {
            let session = restored_session(&config)?;
            session.refresh().await?;
            eprintln!("Session refreshed.");
            Ok(())
        }
        Command::Watch => watch(&config).await,
        Command::Register { name, email } => {
            let password = read_password("Password: ")?;
            print_json(client(&config)?.register(&name, &email, &password).await?)
        }
        Command::VerifyOtp { email, otp } => {
            print_json(client(&config)?.verify_otp(&email, &otp).await?)
        }
        Command::ResendOtp { email } => print_json(client(&config)?.resend_otp(&email).await?),
        Command::ForgotPassword { email } => {
            print_json(client(&config)?.forgot_password(&email).await?)
        }
        Command::ResetPassword { email, otp } => {
            let password = read_password("New password: ")?;
            print_json(
                client(&config)?
                    .reset_password(&email, &otp, &password)
                    .await?,
            )
        }
    }
}

fn client(config: &Config) -> Result<AuthClient> {
    Ok(AuthClient::new(
        &config.api_base_url,
        config.request_timeout(),
    )?)
}

fn restored_session(config: &Config) -> Result<SessionManager> {
    let session = SessionManager::from_config(config)?;
    if !session.restore() {
        anyhow::bail!("Not logged in. Run `taskboard login` first.");
    }
    Ok(session)
}

fn print_json(value: serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn read_password(prompt: &str) -> Result<String> {
    rpassword::prompt_password(prompt).context("Failed to read password")
}

fn prompt(label: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(default) => eprint!("{} [{}]: ", label, default),
        None => eprint!("{}: ", label),
    }
    io::stderr().flush()?;

    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("Failed to read input")?;
    let line = line.trim();
    Ok(match (line.is_empty(), default) {
        (true, Some(default)) => default.to_string(),
        _ => line.to_string(),
    })
}

async fn login(config: &mut Config, email: Option<String>) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => prompt("Email", config.last_email.as_deref())?,
    };
    let password = read_password("Password: ")?;

    let session = SessionManager::from_config(config)?;
    let user = session.login(&email, &password).await?;

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        tracing::warn!(error = %e, "Failed to save config");
    }

    eprintln!("Logged in as {} <{}>", user.display_name(), user.email);
    Ok(())
}

fn status(config: &Config) -> Result<()> {
    let session = SessionManager::from_config(config)?;
    if !session.restore() {
        println!("status: {}", taskboard_core::SessionStatus::LoggedOut);
        return Ok(());
    }
    println!("status: {}", session.status());

    if let Some(tokens) = session.tokens() {
        match AccessClaims::decode(&tokens.access_token) {
            Ok(claims) => {
                if let Some(ref sub) = claims.sub {
                    println!("subject: {}", sub);
                }
                if let Some(expires_at) = claims.expires_at() {
                    let remaining = (expires_at - Utc::now()).num_minutes().max(0);
                    println!("access token expires: {} ({}m)", expires_at.to_rfc3339(), remaining);
                }
            }
            Err(_) => println!("access token: unreadable, will refresh on next use"),
        }
    }
    Ok(())
}

async fn watch(config: &Config) -> Result<()> {
    let session = restored_session(config)?;
    let mut events = session.subscribe();
    eprintln!("Watching session ({}); Ctrl+C to stop.", session.status());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Stopped.");
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(SessionEvent::LoggedOut) => {
                    eprintln!("Session ended. Run `taskboard login` to start a new one.");
                    return Ok(());
                }
                Ok(event) => eprintln!("{:?}", event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return Ok(()),
            },
        }
    }
}
