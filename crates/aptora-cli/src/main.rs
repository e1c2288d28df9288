//! Aptora CLI - log in to the Aptora trading backend from a terminal.
//!
//! Drives the same session store a UI would: stored sessions are restored on
//! start, access tokens are renewed in the background, and an expired
//! session sends the user back to `aptora login`.

use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use aptora_core::config::TokenStorageKind;
use aptora_core::models::Registration;
use aptora_core::{ApiError, AuthState, Config, SessionEvent, SessionStore};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "\
Usage: aptora [--ephemeral] <command> [args]

Commands:
  login [email]                 Log in (prompts for password)
  register <email> <username> [--referral <code>]
  logout                        End the session and forget stored tokens
  whoami                        Show the logged-in user
  refresh                       Exchange the refresh token for a new access token
  profile <username>            Show another user's public profile
  check-username <username>     Check whether a username is free
  forgot-password <email>       Send a password reset link
  reset-password <token>        Set a new password from a reset link
  link-wallet <address>         Attach a wallet address to the account
  watch                         Keep the session alive until it ends

Options:
  --ephemeral                   Keep tokens in memory only";

/// Log file name in the cache directory
const LOG_FILE: &str = "aptora.log";

/// Initialize the tracing subscriber for logging.
/// Returns the guard that flushes the log file on drop.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.cache_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let ephemeral = take_flag(&mut args, "--ephemeral");

    let mut config = Config::load().context("Failed to load configuration")?;
    if ephemeral {
        config.token_storage = TokenStorageKind::Memory;
    }

    let _guard = init_tracing(&config);
    info!(api = %config.api_base_url, "Aptora CLI starting");

    let Some(command) = args.first().cloned() else {
        println!("{}", USAGE);
        return Ok(());
    };
    let rest = &args[1..];

    let store = SessionStore::from_config(&config)?;
    store.initialize().await;

    let result = match command.as_str() {
        "login" => login(&store, &mut config, rest).await,
        "register" => register(&store, rest).await,
        "logout" => {
            store.logout().await;
            println!("Logged out.");
            Ok(())
        }
        "whoami" => whoami(&store.state()),
        "refresh" => {
            require_session(&store.state())?;
            store.refresh_access_token().await?;
            println!("Access token refreshed.");
            Ok(())
        }
        "profile" => {
            let username = arg(rest, 0, "username")?;
            let profile = store.api().user_profile_by_username(username).await?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
            Ok(())
        }
        "check-username" => {
            let username = arg(rest, 0, "username")?;
            if store.api().check_username(username).await? {
                println!("{} is available", username);
            } else {
                println!("{} is already taken", username);
            }
            Ok(())
        }
        "forgot-password" => {
            let email = arg(rest, 0, "email")?;
            store.api().forgot_password(email).await?;
            println!("If an account with {} exists, a reset link is on its way.", email);
            Ok(())
        }
        "reset-password" => {
            let token = arg(rest, 0, "token")?;
            let password = rpassword::prompt_password("New password: ")?;
            let confirm = rpassword::prompt_password("Confirm password: ")?;
            store.api().reset_password(token, &password, Some(&confirm)).await?;
            println!("Password updated. You can log in now.");
            Ok(())
        }
        "link-wallet" => {
            let wallet = arg(rest, 0, "address")?;
            let user = store.set_wallet_address(wallet).await?;
            println!(
                "Linked wallet {} (profile {}).",
                wallet,
                user.profile_address.as_deref().unwrap_or("-")
            );
            Ok(())
        }
        "watch" => watch(&store).await,
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    };

    if let Err(ref e) = result {
        if let Some(ApiError::SessionExpired(_)) = e.downcast_ref::<ApiError>() {
            eprintln!("Your session has expired. Run `aptora login` to sign in again.");
        }
    }

    info!("Aptora CLI shutting down");
    result
}

fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
    let before = args.len();
    args.retain(|a| a != flag);
    args.len() != before
}

fn take_option(args: &mut Vec<String>, name: &str) -> Result<Option<String>> {
    let Some(pos) = args.iter().position(|a| a == name) else {
        return Ok(None);
    };
    if pos + 1 >= args.len() {
        bail!("{} needs a value", name);
    }
    let value = args.remove(pos + 1);
    args.remove(pos);
    Ok(Some(value))
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("Missing <{}>\n\n{}", name, USAGE))
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn require_session(state: &AuthState) -> Result<()> {
    if !state.is_authenticated {
        bail!("Not logged in. Run `aptora login` first.");
    }
    Ok(())
}

async fn login(store: &SessionStore, config: &mut Config, args: &[String]) -> Result<()> {
    let email = match args.first() {
        Some(email) => email.clone(),
        None => match config.last_email.clone() {
            Some(last) => {
                let entered = prompt(&format!("Email [{}]: ", last))?;
                if entered.is_empty() { last } else { entered }
            }
            None => prompt("Email: ")?,
        },
    };
    let password = rpassword::prompt_password("Password: ")?;

    let user = store.login(&email, &password).await?;
    println!("Logged in as {}.", user.display_name());

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        tracing::warn!(error = %e, "Failed to save config");
    }
    Ok(())
}

async fn register(store: &SessionStore, args: &[String]) -> Result<()> {
    let mut args = args.to_vec();
    let referral_code = take_option(&mut args, "--referral")?;
    let email = arg(&args, 0, "email")?.to_string();
    let username = arg(&args, 1, "username")?.to_string();

    let username_free = username_available(store.api().check_username(&username).await)?;
    if !username_free {
        bail!("Please choose an available username");
    }

    let password = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    let registration = Registration {
        email,
        username,
        password,
        confirm_password: Some(confirm),
        referral_code,
    };

    let user = store.register(&registration).await?;
    println!("Welcome, {}!", user.display_name());
    Ok(())
}

/// An unreachable availability check is not fatal; the server decides at
/// registration. Any other failure, local validation included, is.
fn username_available(check: Result<bool, ApiError>) -> Result<bool> {
    match check {
        Ok(free) => Ok(free),
        Err(ApiError::Network(e)) => {
            tracing::warn!(error = %e, "Username availability check failed");
            Ok(true)
        }
        Err(e) => Err(e.into()),
    }
}

fn whoami(state: &AuthState) -> Result<()> {
    require_session(state)?;
    if let Some(ref user) = state.user {
        println!("{}", serde_json::to_string_pretty(user)?);
    }
    Ok(())
}

/// Hold the session open and report renewals until it ends.
async fn watch(store: &SessionStore) -> Result<()> {
    require_session(&store.state())?;
    let mut events = store.events();
    println!("Watching session; access token renews in the background.");

    loop {
        match events.recv().await {
            Ok(SessionEvent::Refreshed) => println!("Access token renewed."),
            Ok(SessionEvent::LoggedIn) => println!("Session replaced."),
            Ok(SessionEvent::LoggedOut) => {
                println!("Logged out.");
                return Ok(());
            }
            Ok(SessionEvent::Expired) => {
                return Err(ApiError::SessionExpired("renewal failed".to_string()).into());
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}
