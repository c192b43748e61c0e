//! OAuth authorization-code login and token refresh.
//!
//! `gpack login` binds a one-shot listener on localhost, sends the user to
//! the consent page, waits for the redirect carrying the code and exchanges
//! it for tokens. Tokens land in the [`CredentialStore`].

use crate::config::Settings;
use crate::credentials::{AuthSession, ClientCredentials, CredentialRecord, CredentialStore};
use crate::error::{Error, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use reqwest::blocking::Client;
use reqwest::Url;
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

/// Access to files created by this app only.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";
pub const CALLBACK_PATH: &str = "/oauth2callback";

const SUCCESS_PAGE: &str = "Authentication successful! You can close this tab.";
const FAILURE_PAGE: &str = "Authentication failed. You can close this tab.";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Fields returned by the token endpoint. Any of them may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
    /// Lifetime in seconds.
    pub expires_in: Option<i64>,
}

impl TokenResponse {
    /// Copies present fields into `record`, leaving absent ones untouched.
    pub fn apply(&self, record: &mut CredentialRecord, now_millis: i64) {
        if let Some(v) = &self.access_token {
            record.access_token = Some(v.clone());
        }
        if let Some(v) = &self.refresh_token {
            record.refresh_token = Some(v.clone());
        }
        if let Some(v) = &self.scope {
            record.scope = Some(v.clone());
        }
        if let Some(v) = &self.token_type {
            record.token_type = Some(v.clone());
        }
        if let Some(secs) = self.expires_in {
            record.expiry_date = Some(now_millis.saturating_add(secs.saturating_mul(1000)));
        }
    }
}

/// The authorization server.
pub trait OAuthProvider {
    fn authorization_url(&self, client: &ClientCredentials, redirect_uri: &str) -> Result<String>;

    fn exchange_code(
        &self,
        client: &ClientCredentials,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse>;

    fn refresh(&self, client: &ClientCredentials, refresh_token: &str) -> Result<TokenResponse>;
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    error_description: Option<String>,
}

/// Google's OAuth 2.0 endpoints.
#[derive(Debug, Clone)]
pub struct GoogleOAuth {
    http: Client,
    auth_endpoint: String,
    token_endpoint: String,
}

impl GoogleOAuth {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            http: Client::builder().timeout(Duration::from_secs(30)).build()?,
            auth_endpoint: settings.auth_endpoint.clone(),
            token_endpoint: settings.token_endpoint.clone(),
        })
    }

    fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self.http.post(&self.token_endpoint).form(form).send()?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json()?);
        }
        let body = response.text().unwrap_or_default();
        let message = match serde_json::from_str::<OAuthErrorBody>(&body) {
            Ok(e) => match e.error_description {
                Some(description) => format!("{}: {}", e.error, description),
                None => e.error,
            },
            Err(_) => body,
        };
        Err(Error::Remote {
            status: status.as_u16(),
            message,
        })
    }
}

impl OAuthProvider for GoogleOAuth {
    fn authorization_url(&self, client: &ClientCredentials, redirect_uri: &str) -> Result<String> {
        let url = Url::parse_with_params(
            &self.auth_endpoint,
            &[
                ("client_id", client.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", DRIVE_SCOPE),
                ("access_type", "offline"),
            ],
        )
        .map_err(|e| Error::Custom(format!("Invalid authorization endpoint: {}", e)))?;
        Ok(url.into())
    }

    #[instrument(skip_all)]
    fn exchange_code(
        &self,
        client: &ClientCredentials,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", client.client_id.as_str()),
            ("client_secret", client.client_secret.as_str()),
            ("redirect_uri", redirect_uri),
        ])
    }

    #[instrument(skip_all)]
    fn refresh(&self, client: &ClientCredentials, refresh_token: &str) -> Result<TokenResponse> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client.client_id.as_str()),
            ("client_secret", client.client_secret.as_str()),
        ])
    }
}

/// One-shot HTTP listener that captures the authorization code.
pub struct CallbackListener {
    listener: std::net::TcpListener,
}

type CodeSlot = Arc<Mutex<Option<oneshot::Sender<Result<String>>>>>;

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    error: Option<String>,
}

impl CallbackListener {
    /// Binds `127.0.0.1:<port>`. Port 0 picks a free port.
    pub fn bind(port: u16) -> Result<Self> {
        let listener = std::net::TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }

    pub fn port(&self) -> Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    pub fn redirect_uri(&self) -> Result<String> {
        Ok(format!("http://localhost:{}{}", self.port()?, CALLBACK_PATH))
    }

    /// Blocks until a callback request arrives or `timeout` elapses.
    ///
    /// The first request to the callback path settles the wait; other paths
    /// get a 404. The server is shut down and the port released on return.
    pub fn wait_for_code(self, timeout: Duration) -> Result<String> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(serve_until_callback(self.listener, timeout))
    }
}

async fn serve_until_callback(listener: std::net::TcpListener, timeout: Duration) -> Result<String> {
    let listener = tokio::net::TcpListener::from_std(listener)?;
    let (code_tx, code_rx) = oneshot::channel::<Result<String>>();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let slot: CodeSlot = Arc::new(Mutex::new(Some(code_tx)));

    let app = Router::new()
        .route(CALLBACK_PATH, get(receive_callback))
        .with_state(slot);
    let server = tokio::spawn(std::future::IntoFuture::into_future(
        axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = stop_rx.await;
        }),
    ));

    let outcome = match tokio::time::timeout(timeout, code_rx).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) => Err(Error::Callback("listener stopped unexpectedly".to_string())),
        Err(_) => {
            warn!(?timeout, "No authorization callback received.");
            Err(Error::CallbackTimeout)
        }
    };

    let _ = stop_tx.send(());
    match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
        Ok(Ok(Ok(()))) => debug!("Callback listener closed."),
        Ok(Ok(Err(e))) => warn!(error = %e, "Callback listener failed during shutdown."),
        Ok(Err(e)) => warn!(error = %e, "Callback listener task panicked."),
        Err(_) => debug!("Dropping callback connections still open."),
    }
    outcome
}

async fn receive_callback(
    State(slot): State<CodeSlot>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, &'static str) {
    let (status, page, outcome) = match (params.code, params.error) {
        (Some(code), _) if !code.trim().is_empty() => {
            (StatusCode::OK, SUCCESS_PAGE, Ok(code.trim().to_string()))
        }
        (_, Some(error)) => (StatusCode::BAD_REQUEST, FAILURE_PAGE, Err(Error::Callback(error))),
        _ => (
            StatusCode::BAD_REQUEST,
            "Missing authorization code.",
            Err(Error::Callback("callback carried no authorization code".to_string())),
        ),
    };
    let sender = slot.lock().ok().and_then(|mut pending| pending.take());
    match sender {
        Some(tx) => {
            let _ = tx.send(outcome);
        }
        None => debug!("Callback already settled, ignoring repeat request."),
    }
    (status, page)
}

/// User interaction needed during login.
pub trait LoginPrompt {
    /// Asked when client credentials are already stored.
    fn replace_saved_client(&mut self) -> Result<bool>;

    fn client_credentials(&mut self) -> Result<ClientCredentials>;

    /// Shows the consent URL; the listener is already accepting when this is called.
    fn show_authorization_url(&mut self, url: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    AlreadyAuthenticated,
    LoggedIn,
}

pub struct AuthorizationFlow<'a, P: OAuthProvider + ?Sized> {
    store: &'a CredentialStore,
    provider: &'a P,
    callback_port: u16,
    timeout: Duration,
}

impl<'a, P: OAuthProvider + ?Sized> AuthorizationFlow<'a, P> {
    pub fn new(store: &'a CredentialStore, provider: &'a P, settings: &Settings) -> Self {
        Self {
            store,
            provider,
            callback_port: settings.callback_port,
            timeout: settings.callback_timeout(),
        }
    }

    #[instrument(skip_all)]
    pub fn run(&self, prompt: &mut dyn LoginPrompt) -> Result<LoginOutcome> {
        let record = self.store.load()?;
        if record.access_token.as_deref().is_some_and(|t| !t.is_empty()) {
            info!("Access token already stored, skipping login.");
            return Ok(LoginOutcome::AlreadyAuthenticated);
        }

        let mut client = record.client_credentials();
        if client.is_some() && prompt.replace_saved_client()? {
            client = None;
        }
        let client = match client {
            Some(client) => client,
            None => {
                let client = prompt.client_credentials()?;
                self.store.update(|r| {
                    r.client_id = Some(client.client_id.clone());
                    r.client_secret = Some(client.client_secret.clone());
                    Ok(())
                })?;
                client
            }
        };

        let listener = CallbackListener::bind(self.callback_port)?;
        let redirect_uri = listener.redirect_uri()?;
        let url = self.provider.authorization_url(&client, &redirect_uri)?;
        prompt.show_authorization_url(&url);

        let code = listener.wait_for_code(self.timeout)?;
        debug!("Authorization code received.");
        let tokens = self.provider.exchange_code(&client, &code, &redirect_uri)?;
        let now = Utc::now().timestamp_millis();
        self.store.update(|r| {
            tokens.apply(r, now);
            Ok(())
        })?;
        info!("Login complete.");
        Ok(LoginOutcome::LoggedIn)
    }
}

/// Loads the stored session, refreshing an expired access token when possible.
pub fn authenticated_session<P: OAuthProvider + ?Sized>(
    store: &CredentialStore,
    provider: &P,
) -> Result<AuthSession> {
    let session = store.session()?;
    let now = Utc::now().timestamp_millis();
    if !session.is_expired(now) {
        return Ok(session);
    }
    let refresh_token = match session.refresh_token.clone() {
        Some(token) => token,
        None => {
            warn!("Access token expired and no refresh token is stored.");
            return Ok(session);
        }
    };
    info!("Refreshing expired access token.");
    let tokens = provider.refresh(&session.client, &refresh_token)?;
    let record = store.update(|r| {
        tokens.apply(r, now);
        Ok(())
    })?;
    record.session().ok_or(Error::NotAuthenticated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::thread;
    use std::time::Instant;

    fn browse(port: u16, target: &str) -> (u16, String) {
        let response = reqwest::blocking::get(format!("http://127.0.0.1:{}{}", port, target)).unwrap();
        let status = response.status().as_u16();
        (status, response.text().unwrap())
    }

    #[test]
    fn listener_captures_code_and_ignores_other_paths() {
        let listener = CallbackListener::bind(0).unwrap();
        let port = listener.port().unwrap();
        let browser = thread::spawn(move || {
            let miss = browse(port, "/favicon.ico");
            let hit = browse(port, "/oauth2callback?code=4%2Fabc&scope=x");
            (miss, hit)
        });

        let code = listener.wait_for_code(Duration::from_secs(5)).unwrap();
        let ((miss_status, _), (hit_status, page)) = browser.join().unwrap();
        assert_eq!(code, "4/abc");
        assert_eq!(miss_status, 404);
        assert_eq!(hit_status, 200);
        assert_eq!(page, SUCCESS_PAGE);
    }

    #[test]
    fn idle_connection_does_not_hold_up_the_callback() {
        let listener = CallbackListener::bind(0).unwrap();
        let port = listener.port().unwrap();
        let browser = thread::spawn(move || {
            // Browsers open speculative connections that never send a request.
            let _idle = TcpStream::connect(("127.0.0.1", port)).unwrap();
            let started = Instant::now();
            let hit = browse(port, "/oauth2callback?code=abc");
            (hit, started.elapsed())
        });

        let code = listener.wait_for_code(Duration::from_secs(10)).unwrap();
        let ((status, page), elapsed) = browser.join().unwrap();
        assert_eq!(code, "abc");
        assert_eq!(status, 200);
        assert_eq!(page, SUCCESS_PAGE);
        assert!(elapsed < Duration::from_secs(2), "callback took {:?}", elapsed);
    }

    #[test]
    fn listener_is_closed_after_the_callback() {
        let listener = CallbackListener::bind(0).unwrap();
        let port = listener.port().unwrap();
        let browser = thread::spawn(move || browse(port, "/oauth2callback?code=abc"));
        listener.wait_for_code(Duration::from_secs(5)).unwrap();
        browser.join().unwrap();

        assert!(TcpListener::bind(("127.0.0.1", port)).is_ok());
    }

    #[test]
    fn consent_denial_fails_the_wait() {
        let listener = CallbackListener::bind(0).unwrap();
        let port = listener.port().unwrap();
        let browser = thread::spawn(move || browse(port, "/oauth2callback?error=access_denied"));

        let result = listener.wait_for_code(Duration::from_secs(5));
        let (status, page) = browser.join().unwrap();
        assert_eq!(status, 400);
        assert_eq!(page, FAILURE_PAGE);
        assert!(matches!(result, Err(Error::Callback(msg)) if msg == "access_denied"));
    }

    #[test]
    fn wait_times_out_without_a_callback() {
        let listener = CallbackListener::bind(0).unwrap();
        let result = listener.wait_for_code(Duration::from_millis(100));
        assert!(matches!(result, Err(Error::CallbackTimeout)));
    }

    #[test]
    fn token_response_leaves_absent_fields_untouched() {
        let mut record = CredentialRecord {
            refresh_token: Some("keep-me".into()),
            scope: Some("old".into()),
            ..Default::default()
        };
        let tokens = TokenResponse {
            access_token: Some("new".into()),
            expires_in: Some(3600),
            ..Default::default()
        };
        tokens.apply(&mut record, 1_000);

        assert_eq!(record.access_token.as_deref(), Some("new"));
        assert_eq!(record.refresh_token.as_deref(), Some("keep-me"));
        assert_eq!(record.scope.as_deref(), Some("old"));
        assert_eq!(record.expiry_date, Some(3_601_000));
    }

    #[test]
    fn huge_token_lifetime_saturates_instead_of_overflowing() {
        let mut record = CredentialRecord::default();
        let tokens = TokenResponse {
            expires_in: Some(i64::MAX),
            ..Default::default()
        };
        tokens.apply(&mut record, 1_000);

        assert_eq!(record.expiry_date, Some(i64::MAX));
    }

    #[test]
    fn authorization_url_requests_offline_drive_access() {
        let provider = GoogleOAuth::new(&Settings::default()).unwrap();
        let client = ClientCredentials {
            client_id: "cid".into(),
            client_secret: "secret".into(),
        };
        let url = provider
            .authorization_url(&client, "http://localhost:3000/oauth2callback")
            .unwrap();
        let parsed = Url::parse(&url).unwrap();
        let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();

        assert!(pairs.contains(&("client_id".into(), "cid".into())));
        assert!(pairs.contains(&("access_type".into(), "offline".into())));
        assert!(pairs.contains(&("scope".into(), DRIVE_SCOPE.into())));
        assert!(!url.contains("secret"));
    }
}
