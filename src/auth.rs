//! OAuth2 sign-in for the Gmail account being monitored

use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2, Gmail};
use std::env;
use std::path::Path;
use tracing::{debug, info};
use yup_oauth2::ApplicationSecret;

use crate::error::{AutoReplyError, Result};

/// Read the inbox and send replies; nothing else
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.send",
];

pub const CLIENT_ID_VAR: &str = "GMAIL_CLIENT_ID";
pub const CLIENT_SECRET_VAR: &str = "GMAIL_CLIENT_SECRET";
pub const REDIRECT_URI_VAR: &str = "GMAIL_REDIRECT_URI";

/// Type alias for Gmail Hub to simplify type signatures
pub type GmailHub =
    Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// Sign in and build a Gmail hub.
///
/// Credentials come from `credentials_path` when it exists, otherwise from the
/// `GMAIL_CLIENT_ID` / `GMAIL_CLIENT_SECRET` environment variables. With
/// `force` the cached token is discarded so the browser consent runs again.
pub async fn connect(credentials_path: &Path, token_cache_path: &Path, force: bool) -> Result<GmailHub> {
    if force && token_cache_path.exists() {
        info!("Discarding cached token at {}", token_cache_path.display());
        tokio::fs::remove_file(token_cache_path).await?;
    }

    let secret = if credentials_path.exists() {
        yup_oauth2::read_application_secret(credentials_path)
            .await
            .map_err(|e| AutoReplyError::AuthError(format!("Failed to read credentials: {}", e)))?
    } else {
        debug!(
            "{} not found, reading client credentials from environment",
            credentials_path.display()
        );
        secret_from_env()?
    };

    let auth = yup_oauth2::InstalledFlowAuthenticator::builder(
        secret,
        yup_oauth2::InstalledFlowReturnMethod::HTTPRedirect,
    )
    .persist_tokens_to_disk(token_cache_path)
    .build()
    .await
    .map_err(|e| AutoReplyError::AuthError(format!("Failed to build authenticator: {}", e)))?;

    // Obtain the token up front so consent covers both scopes before polling starts
    auth.token(SCOPES)
        .await
        .map_err(|e| AutoReplyError::AuthError(format!("Failed to obtain token: {}", e)))?;

    if token_cache_path.exists() {
        secure_token_file(token_cache_path).await?;
    }

    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .map_err(|e| AutoReplyError::AuthError(format!("Failed to load TLS roots: {}", e)))?
                .https_or_http()
                .enable_http1()
                .build(),
        );

    Ok(Gmail::new(client, auth))
}

fn secret_from_env() -> Result<ApplicationSecret> {
    build_secret(
        env::var(CLIENT_ID_VAR).ok(),
        env::var(CLIENT_SECRET_VAR).ok(),
        env::var(REDIRECT_URI_VAR).ok(),
    )
}

fn build_secret(
    client_id: Option<String>,
    client_secret: Option<String>,
    redirect_uri: Option<String>,
) -> Result<ApplicationSecret> {
    let client_id = client_id
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AutoReplyError::ConfigError(format!("{} not set", CLIENT_ID_VAR)))?;
    let client_secret = client_secret
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AutoReplyError::ConfigError(format!("{} not set", CLIENT_SECRET_VAR)))?;

    Ok(ApplicationSecret {
        client_id,
        client_secret,
        auth_uri: "https://accounts.google.com/o/oauth2/auth".to_string(),
        token_uri: "https://oauth2.googleapis.com/token".to_string(),
        redirect_uris: vec![redirect_uri.unwrap_or_else(|| "http://localhost:8080".to_string())],
        ..Default::default()
    })
}

/// Restrict the token cache to the owner (0600)
#[cfg(unix)]
pub async fn secure_token_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o600);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(windows)]
pub async fn secure_token_file(_path: &Path) -> Result<()> {
    Ok(())
}
