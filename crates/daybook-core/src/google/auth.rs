//! OAuth2 Authorization Code flow for Google, plus keyring token storage.
//!
//! 1. Opens the browser to the consent URL (with a CSRF state parameter)
//! 2. Runs a tiny localhost HTTP listener to receive the callback
//! 3. Exchanges the code for an access token (+ refresh token)
//! 4. Stores tokens in the OS keyring
//!
//! [`KeyringTokenSource`] is the production [`TokenSource`]: it loads the
//! stored tokens and refreshes them when expired (60s buffer). Any state
//! where no valid token can be produced maps to [`ApiError::NoCredential`].

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::client::{ApiError, TokenSource};
use crate::error::OAuthError;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar.events";
const TASKS_SCOPE: &str = "https://www.googleapis.com/auth/tasks";

const OAUTH_REDIRECT_PORT: u16 = 19824;
const OAUTH_CALLBACK_TIMEOUT_SECS: u64 = 180;
const TOKEN_TIMEOUT_SECS: u64 = 30;

const TOKENS_KEY: &str = "google_tokens";
const ACCOUNT_KEY: &str = "google_account";
const CLIENT_ID_KEY: &str = "google_client_id";
const CLIENT_SECRET_KEY: &str = "google_client_secret";

/// Thin wrapper around the OS keyring for credential storage.
pub mod keyring_store {
    const SERVICE: &str = "daybook";

    pub fn get(key: &str) -> Result<Option<String>, keyring::Error> {
        let entry = keyring::Entry::new(SERVICE, key)?;
        match entry.get_password() {
            Ok(pw) => Ok(Some(pw)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn set(key: &str, value: &str) -> Result<(), keyring::Error> {
        let entry = keyring::Entry::new(SERVICE, key)?;
        entry.set_password(value)
    }

    pub fn delete(key: &str) -> Result<(), keyring::Error> {
        let entry = keyring::Entry::new(SERVICE, key)?;
        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix timestamp.
    pub expires_at: Option<i64>,
    pub token_type: String,
    pub scope: Option<String>,
}

#[derive(Debug, Clone)]
struct OAuthCredentials {
    client_id: String,
    client_secret: String,
}

impl OAuthCredentials {
    /// Load client credentials: environment first, keyring second.
    fn load() -> Result<Self, OAuthError> {
        let from_env = |var: &str, key: &str| -> Result<Option<String>, OAuthError> {
            if let Ok(v) = std::env::var(var) {
                if !v.trim().is_empty() {
                    return Ok(Some(v));
                }
            }
            keyring_store::get(key).map_err(|e| OAuthError::Keyring(e.to_string()))
        };

        let client_id = from_env("GOOGLE_CLIENT_ID", CLIENT_ID_KEY)?;
        let client_secret = from_env("GOOGLE_CLIENT_SECRET", CLIENT_SECRET_KEY)?;

        match (client_id, client_secret) {
            (Some(client_id), Some(client_secret)) => Ok(Self {
                client_id,
                client_secret,
            }),
            _ => Err(OAuthError::CredentialsNotConfigured),
        }
    }
}

/// Persist Google OAuth client credentials to the OS keyring.
pub fn set_client_credentials(client_id: &str, client_secret: &str) -> Result<(), OAuthError> {
    keyring_store::set(CLIENT_ID_KEY, client_id).map_err(|e| OAuthError::Keyring(e.to_string()))?;
    keyring_store::set(CLIENT_SECRET_KEY, client_secret)
        .map_err(|e| OAuthError::Keyring(e.to_string()))
}

fn redirect_uri() -> String {
    format!("http://localhost:{OAUTH_REDIRECT_PORT}/callback")
}

fn build_auth_url(creds: &OAuthCredentials, state: &str) -> String {
    let scopes = format!("{CALENDAR_SCOPE} {TASKS_SCOPE}");
    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&state={}",
        GOOGLE_AUTH_URL,
        urlencoding::encode(&creds.client_id),
        urlencoding::encode(&redirect_uri()),
        urlencoding::encode(&scopes),
        urlencoding::encode(state),
    )
}

/// Generate a random state parameter for CSRF protection.
fn generate_csrf_state() -> Result<String, OAuthError> {
    use base64::prelude::*;
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| OAuthError::AuthorizationFailed(format!("random state: {e}")))?;
    Ok(BASE64_URL_SAFE_NO_PAD.encode(bytes))
}

/// Run the full OAuth2 flow: open browser -> listen for callback ->
/// exchange code -> store tokens. `account` labels the connected account
/// for status display and cursor keying.
pub async fn authorize(account: Option<&str>) -> Result<OAuthTokens, OAuthError> {
    let creds = OAuthCredentials::load()?;
    let state = generate_csrf_state()?;
    let auth_url = build_auth_url(&creds, &state);

    let listener = TcpListener::bind(("127.0.0.1", OAUTH_REDIRECT_PORT))
        .map_err(|e| OAuthError::AuthorizationFailed(format!("bind callback port: {e}")))?;
    listener
        .set_nonblocking(true)
        .map_err(|e| OAuthError::AuthorizationFailed(e.to_string()))?;

    open::that(&auth_url).map_err(|e| OAuthError::AuthorizationFailed(format!("open browser: {e}")))?;

    let code = wait_for_callback(
        &listener,
        &state,
        Duration::from_secs(OAUTH_CALLBACK_TIMEOUT_SECS),
    )?;

    let tokens = exchange_code(&creds, &code).await?;
    store_tokens(&tokens)?;
    if let Some(account) = account {
        keyring_store::set(ACCOUNT_KEY, account).map_err(|e| OAuthError::Keyring(e.to_string()))?;
    }
    Ok(tokens)
}

fn wait_for_callback(
    listener: &TcpListener,
    expected_state: &str,
    timeout: Duration,
) -> Result<String, OAuthError> {
    let deadline = Instant::now() + timeout;

    loop {
        if Instant::now() >= deadline {
            return Err(OAuthError::CallbackTimeout {
                timeout_secs: timeout.as_secs(),
            });
        }

        match listener.accept() {
            Ok((mut stream, _addr)) => {
                let mut buf = [0u8; 8192];
                let n = stream
                    .read(&mut buf)
                    .map_err(|e| OAuthError::InvalidCallback(e.to_string()))?;
                if n == 0 {
                    continue;
                }

                let request = String::from_utf8_lossy(&buf[..n]);
                let first_line = request.lines().next().unwrap_or_default();
                let target = first_line.split_whitespace().nth(1).unwrap_or_default();

                let parsed = url::Url::parse(&format!("http://localhost{target}"))
                    .map_err(|e| OAuthError::InvalidCallback(e.to_string()))?;
                if parsed.path() != "/callback" {
                    respond_html(&mut stream, "404 Not Found", "Not found");
                    continue;
                }

                let mut code = None;
                let mut returned_state = None;
                let mut error = None;
                for (k, v) in parsed.query_pairs() {
                    match k.as_ref() {
                        "code" => code = Some(v.to_string()),
                        "state" => returned_state = Some(v.to_string()),
                        "error" => error = Some(v.to_string()),
                        _ => {}
                    }
                }

                if let Some(err) = error {
                    respond_html(&mut stream, "400 Bad Request", "Authorization canceled");
                    return Err(OAuthError::AuthorizationFailed(err));
                }
                if returned_state.as_deref() != Some(expected_state) {
                    respond_html(&mut stream, "400 Bad Request", "State mismatch");
                    return Err(OAuthError::InvalidCallback(
                        "state mismatch - possible CSRF".to_string(),
                    ));
                }
                let Some(code) = code else {
                    respond_html(&mut stream, "400 Bad Request", "Missing code");
                    return Err(OAuthError::InvalidCallback("missing code".to_string()));
                };

                respond_html(
                    &mut stream,
                    "200 OK",
                    "Authentication successful. You can close this tab and return to Daybook.",
                );
                return Ok(code);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => return Err(OAuthError::InvalidCallback(e.to_string())),
        }
    }
}

fn respond_html(stream: &mut std::net::TcpStream, status: &str, message: &str) {
    let body = format!("<html><body><h2>Daybook</h2><p>{message}</p></body></html>");
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len(),
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

/// Exchange an authorization code for tokens.
async fn exchange_code(creds: &OAuthCredentials, code: &str) -> Result<OAuthTokens, OAuthError> {
    let params = [
        ("client_id", creds.client_id.as_str()),
        ("client_secret", creds.client_secret.as_str()),
        ("code", code),
        ("grant_type", "authorization_code"),
        ("redirect_uri", &redirect_uri()),
    ];
    token_request(&params)
        .await
        .map_err(OAuthError::TokenExchangeFailed)
}

/// Refresh an access token using a refresh token. Google usually omits the
/// refresh token from the response, so the original one is carried over.
async fn refresh_tokens(creds: &OAuthCredentials, refresh: &str) -> Result<OAuthTokens, OAuthError> {
    let params = [
        ("client_id", creds.client_id.as_str()),
        ("client_secret", creds.client_secret.as_str()),
        ("refresh_token", refresh),
        ("grant_type", "refresh_token"),
    ];
    let mut tokens = token_request(&params)
        .await
        .map_err(OAuthError::TokenRefreshFailed)?;
    if tokens.refresh_token.is_none() {
        tokens.refresh_token = Some(refresh.to_string());
    }
    Ok(tokens)
}

async fn token_request(params: &[(&str, &str)]) -> Result<OAuthTokens, String> {
    let client = Client::builder()
        .timeout(Duration::from_secs(TOKEN_TIMEOUT_SECS))
        .build()
        .map_err(|e| e.to_string())?;
    let resp = client
        .post(GOOGLE_TOKEN_URL)
        .form(params)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    let body: serde_json::Value = resp.json().await.map_err(|e| e.to_string())?;
    if let Some(error) = body.get("error") {
        return Err(error.to_string());
    }

    let expires_in = body.get("expires_in").and_then(|v| v.as_i64());
    Ok(OAuthTokens {
        access_token: body["access_token"].as_str().unwrap_or_default().to_string(),
        refresh_token: body
            .get("refresh_token")
            .and_then(|v| v.as_str())
            .map(String::from),
        expires_at: expires_in.map(|ei| chrono::Utc::now().timestamp() + ei),
        token_type: body["token_type"].as_str().unwrap_or("Bearer").to_string(),
        scope: body.get("scope").and_then(|v| v.as_str()).map(String::from),
    })
}

/// Load stored tokens from the keyring.
pub fn load_tokens() -> Option<OAuthTokens> {
    keyring_store::get(TOKENS_KEY)
        .ok()
        .flatten()
        .and_then(|json| serde_json::from_str(&json).ok())
}

fn store_tokens(tokens: &OAuthTokens) -> Result<(), OAuthError> {
    let json = serde_json::to_string(tokens)
        .map_err(|e| OAuthError::TokenExchangeFailed(e.to_string()))?;
    keyring_store::set(TOKENS_KEY, &json).map_err(|e| OAuthError::Keyring(e.to_string()))
}

/// Remove all stored Google state.
pub fn logout() -> Result<(), OAuthError> {
    for key in [TOKENS_KEY, ACCOUNT_KEY] {
        keyring_store::delete(key).map_err(|e| OAuthError::Keyring(e.to_string()))?;
    }
    Ok(())
}

/// Whether stored tokens are expired (with 60s buffer).
pub fn is_expired(tokens: &OAuthTokens) -> bool {
    match tokens.expires_at {
        Some(exp) => chrono::Utc::now().timestamp() > exp - 60,
        None => false,
    }
}

/// Whether the user has authenticated with Google.
pub fn is_authenticated() -> bool {
    load_tokens().is_some()
}

/// Keyring-backed token source for the sync engine.
pub struct KeyringTokenSource;

impl KeyringTokenSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for KeyringTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenSource for KeyringTokenSource {
    async fn access_token(&self) -> Result<String, ApiError> {
        let Some(tokens) = load_tokens() else {
            return Err(ApiError::NoCredential);
        };

        if !is_expired(&tokens) {
            return Ok(tokens.access_token);
        }

        let Some(refresh) = tokens.refresh_token.as_deref() else {
            return Err(ApiError::NoCredential);
        };
        let Ok(creds) = OAuthCredentials::load() else {
            return Err(ApiError::NoCredential);
        };

        match refresh_tokens(&creds, refresh).await {
            Ok(refreshed) => {
                if store_tokens(&refreshed).is_err() {
                    tracing::warn!("failed to persist refreshed Google tokens");
                }
                Ok(refreshed.access_token)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Google token refresh failed");
                Err(ApiError::NoCredential)
            }
        }
    }

    fn account(&self) -> String {
        keyring_store::get(ACCOUNT_KEY)
            .ok()
            .flatten()
            .unwrap_or_else(|| "default".to_string())
    }
}
