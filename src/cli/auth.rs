//! CLI handlers for sign-in, tokens, status, and the developer account.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::PortcullisConfig;
use crate::device::DeviceCodeIdentityClient;
use crate::error::AuthError;
use crate::orchestrator::AuthOrchestrator;

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Handle `portcullis sign-in`.
pub async fn handle_sign_in(config: &PortcullisConfig) -> CliResult {
    let auth = AuthOrchestrator::from_config(config);
    println!("🔗 Opening your browser to sign in...");
    match auth.sign_in().await {
        Ok(profile) => {
            println!("✅ Signed in as {}", profile.display_name);
            Ok(())
        }
        Err(err) => fail(err),
    }
}

/// Handle `portcullis token`.
pub async fn handle_token(config: &PortcullisConfig, reveal: bool) -> CliResult {
    let auth = AuthOrchestrator::from_config(config);
    match auth.ensure_valid_token().await {
        Ok(token) => {
            if reveal {
                println!("{}", token.authorization_header());
            } else {
                println!(
                    "✅ {} token valid until {} (use --reveal to print it)",
                    token.token_type,
                    token.expires_at.format("%Y-%m-%d %H:%M")
                );
            }
            Ok(())
        }
        Err(err) => fail(err),
    }
}

/// Handle `portcullis profile`.
pub async fn handle_profile(config: &PortcullisConfig) -> CliResult {
    let auth = AuthOrchestrator::from_config(config);
    if let Err(err) = auth.ensure_valid_token().await {
        return fail(err);
    }
    match auth.profile().await {
        Ok(profile) => {
            println!("👤 {}", profile.display_name);
            println!("   id: {}", profile.id);
            if let Some(avatar) = profile.avatar_url {
                println!("   skin: {avatar}");
            }
            Ok(())
        }
        Err(err) => fail(err),
    }
}

/// Handle `portcullis status`.
pub async fn handle_status(config: &PortcullisConfig) -> CliResult {
    let auth = AuthOrchestrator::from_config(config);

    println!("🔐 Authentication Status\n");
    match auth.cached_account().await {
        Ok(Some(account)) => println!(
            "  Game account: ✅ {}",
            account.username.as_deref().unwrap_or(&account.account_id)
        ),
        Ok(None) => println!("  Game account: ❌ Not signed in"),
        Err(e) => println!("  Game account: ⚠️  Error: {e}"),
    }

    match DeviceCodeIdentityClient::from_config(config) {
        Ok(developer) => match developer.saved_account().await {
            Ok(Some(account)) => {
                let login = account
                    .profile
                    .as_ref()
                    .map(|p| p.login.as_str())
                    .unwrap_or("connected");
                println!("  Developer:    ✅ {login}");
            }
            Ok(None) => println!("  Developer:    ❌ Not connected"),
            Err(e) => println!("  Developer:    ⚠️  Error: {e}"),
        },
        Err(e) => println!("  Developer:    ⚠️  {e}"),
    }

    println!("\n📁 Files:");
    println!("  token cache: {}", config.token_cache_path().display());
    println!("  preferences: {}", config.preferences_path().display());
    Ok(())
}

/// Handle `portcullis sign-out`.
pub async fn handle_sign_out(config: &PortcullisConfig) -> CliResult {
    AuthOrchestrator::from_config(config).sign_out().await;
    println!("✅ Signed out");
    Ok(())
}

/// Handle `portcullis developer connect`.
pub async fn handle_developer_connect(config: &PortcullisConfig, timeout: Option<u64>) -> CliResult {
    let client = DeviceCodeIdentityClient::from_config(config)?;
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let result = client
        .start_device_flow(
            |code, url, expires_in| {
                println!("🔗 Visit: {url}");
                println!("📋 Enter code: {code}");
                println!("⏳ Waiting for authorization (code expires in {}m)...", expires_in / 60);
            },
            timeout.map(Duration::from_secs),
            cancel,
        )
        .await;

    match result {
        Ok(account) => {
            match account.profile {
                Some(profile) => println!("✅ Connected as {}", profile.login),
                None => println!("✅ Developer account connected"),
            }
            Ok(())
        }
        Err(err) => fail(err),
    }
}

/// Handle `portcullis developer status`.
pub async fn handle_developer_status(config: &PortcullisConfig) -> CliResult {
    let client = DeviceCodeIdentityClient::from_config(config)?;
    match client.saved_account().await? {
        Some(account) => match account.profile {
            Some(profile) => {
                println!("✅ Connected as {}", profile.login);
                if let Some(name) = profile.name {
                    println!("   name: {name}");
                }
            }
            None => println!("✅ Connected (profile unavailable)"),
        },
        None => println!("❌ No developer account connected"),
    }
    Ok(())
}

/// Handle `portcullis developer disconnect`.
pub async fn handle_developer_disconnect(config: &PortcullisConfig) -> CliResult {
    DeviceCodeIdentityClient::from_config(config)?
        .disconnect()
        .await?;
    println!("✅ Developer account disconnected");
    Ok(())
}

fn fail(err: AuthError) -> CliResult {
    eprintln!("❌ {}", err.user_notice().message());
    Err(err.into())
}
