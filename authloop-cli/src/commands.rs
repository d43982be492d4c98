//! CLI subcommand handlers.

use crate::Commands;
use authloop_core::{
    Authenticator, HttpOAuthClient, JsonTokenStore, ListenerConfig, SystemBrowser, Token,
    TokenStore, load_config,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    config_file: Option<&Path>,
    token_file: &Path,
) -> anyhow::Result<()> {
    match command {
        Commands::Status => {
            let store = JsonTokenStore::new(token_file);
            println!("Token file: {}", store.path().display());
            match store.get_token() {
                Some(token) => {
                    println!("Status: authenticated ({})", describe_expiry(&token));
                    println!(
                        "Refresh token: {}",
                        if token.refresh_token.is_some() {
                            "present"
                        } else {
                            "none"
                        }
                    );
                }
                None => {
                    println!("Status: no token stored. Run `authloop login` to authenticate.");
                }
            }
            Ok(())
        }

        Commands::Login {
            force,
            timeout_secs,
            cert,
            key,
        } => {
            let config = load_config(config_file)
                .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
            let client = HttpOAuthClient::new(config);

            println!("Starting OAuth login...");
            println!("Redirect URI: {}", client.config().redirect_uri);
            println!("(Make sure this URI is registered in your provider's app settings)");
            println!();

            let mut listener = ListenerConfig::new(&client.config().redirect_uri);
            if let Some(secs) = timeout_secs {
                listener = listener.with_timeout(Some(Duration::from_secs(secs)));
            }
            let listener = match (cert, key) {
                (Some(cert), Some(key)) => listener.with_tls_materials(cert, key),
                (None, None) => listener,
                _ => anyhow::bail!("--cert and --key must be given together"),
            };

            println!("Opening your browser for authentication...");

            let mut auth = Authenticator::new(
                Arc::new(client),
                Box::new(SystemBrowser),
                Box::new(JsonTokenStore::new(token_file)),
                listener,
            );

            let token = if force {
                auth.interactive_authorize().await
            } else {
                auth.get_token().await
            }
            .map_err(|e| anyhow::anyhow!("OAuth login failed: {}", e))?;

            println!("Successfully authenticated ({}).", describe_expiry(&token));
            Ok(())
        }

        Commands::Logout => {
            let store = JsonTokenStore::new(token_file);
            if token_file.exists() {
                store.delete_token();
                println!("Stored token removed.");
            } else {
                println!("No token stored.");
            }
            Ok(())
        }

        Commands::Refresh => {
            let current = JsonTokenStore::new(token_file)
                .get_token()
                .ok_or_else(|| anyhow::anyhow!("No token stored. Run `authloop login` first."))?;
            if current.refresh_token.is_none() {
                anyhow::bail!("No refresh token available. Re-login with `authloop login`.");
            }

            let config = load_config(config_file)
                .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
            let client = HttpOAuthClient::new(config);

            println!("Refreshing token...");

            let listener = ListenerConfig::new(&client.config().redirect_uri);
            let mut auth = Authenticator::new(
                Arc::new(client),
                Box::new(SystemBrowser),
                Box::new(JsonTokenStore::new(token_file)),
                listener,
            );

            match auth.force_refresh().await {
                Some(token) => {
                    println!("Token refreshed ({}).", describe_expiry(&token));
                    Ok(())
                }
                None => anyhow::bail!("Token refresh failed. Re-run with -v to see the cause."),
            }
        }
    }
}

/// Human-readable expiry summary for status output.
fn describe_expiry(token: &Token) -> String {
    match token.expires_in_secs() {
        Some(remaining) if remaining > 0 => format!("expires in {remaining}s"),
        Some(_) => "expired".to_string(),
        None => "no expiry".to_string(),
    }
}
