//! GLPI session token lifecycle.
//!
//! One `SessionManager` is shared by every caller. The token slot sits behind
//! an async mutex held across the handshake, so concurrent callers queue up
//! behind an in-flight refresh instead of starting their own.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, ClientBuilder, Method};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::api_types::ApiSessionResponse;
use crate::config::{Config, Credentials, HttpConfig};
use crate::error::{Error, Result};

/// Credential issued by `initSession`.
#[derive(Debug, Clone)]
pub struct SessionToken {
  pub value: String,
  pub acquired_at: DateTime<Utc>,
  pub expires_at: Option<DateTime<Utc>>,
}

impl SessionToken {
  fn is_valid(&self) -> bool {
    self.expires_at.map_or(true, |expiry| Utc::now() < expiry)
  }

  fn age(&self) -> chrono::Duration {
    Utc::now() - self.acquired_at
  }
}

/// Response body fully read, so it can outlive retries.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
  pub status: u16,
  pub headers: HeaderMap,
  pub body: String,
}

impl UpstreamResponse {
  /// 206 carries a truncated result set and is as good as 200.
  pub fn is_success(&self) -> bool {
    matches!(self.status, 200 | 206)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(name).and_then(|v| v.to_str().ok())
  }

  pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
    serde_json::from_str(&self.body).map_err(|e| Error::Decode(e.to_string()))
  }

  fn is_rejection(&self) -> bool {
    self.status == 401
      || (self.status == 400 && self.body.contains("ERROR_SESSION_TOKEN_INVALID"))
  }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
  /// REST root, e.g. https://glpi.example.com/apirest.php
  pub base_url: String,
  pub credentials: Credentials,
  pub app_token: Option<String>,
  pub session_lifetime: Option<Duration>,
  pub max_retries: u32,
}

impl SessionSettings {
  pub fn from_config(config: &Config, credentials: Credentials) -> Self {
    Self {
      base_url: config.glpi.url.trim_end_matches('/').to_string(),
      credentials,
      app_token: config.glpi.app_token.clone(),
      session_lifetime: config.glpi.session_lifetime_secs.map(Duration::from_secs),
      max_retries: config.http.max_retries,
    }
  }
}

/// Create the shared HTTP client. Every request gets a hard timeout.
pub fn create_http_client(config: &HttpConfig) -> Result<Client> {
  ClientBuilder::new()
    .timeout(Duration::from_secs(config.timeout_secs))
    .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
    .user_agent(format!("glpidash/{}", env!("CARGO_PKG_VERSION")))
    .build()
    .map_err(|e| Error::unavailable(None, format!("Failed to create HTTP client: {}", e)))
}

pub struct SessionManager {
  http: Client,
  settings: SessionSettings,
  token: Mutex<Option<SessionToken>>,
}

impl SessionManager {
  pub fn new(http: Client, settings: SessionSettings) -> Self {
    Self {
      http,
      settings,
      token: Mutex::new(None),
    }
  }

  /// Make sure a usable token is held. Never fails; `false` means the
  /// handshake did not succeed and callers should degrade.
  pub async fn ensure_authenticated(&self) -> bool {
    match self.current_token().await {
      Ok(_) => true,
      Err(e) => {
        warn!("GLPI authentication failed: {}", e);
        false
      }
    }
  }

  /// Drop the held token; the next call re-authenticates.
  pub async fn invalidate(&self) {
    *self.token.lock().await = None;
  }

  /// Send an authenticated request.
  ///
  /// Transient failures are retried up to `max_retries`. A rejected token is
  /// refreshed once and the request replayed once; anything after that is
  /// returned to the caller as an error.
  pub async fn authenticated_request(
    &self,
    method: Method,
    path: &str,
    params: &[(String, String)],
  ) -> Result<UpstreamResponse> {
    let token = self.current_token().await?;
    let response = self.send_with_retry(&method, path, params, &token).await?;

    if !response.is_rejection() {
      return check_success(path, response);
    }

    warn!(path, "GLPI rejected the session token, re-authenticating");
    let token = self.refresh_after_rejection(&token).await?;
    let response = self.send_with_retry(&method, path, params, &token).await?;

    if response.is_rejection() {
      self.invalidate().await;
      return Err(Error::AuthenticationFailure(format!(
        "token rejected again after re-authentication ({})",
        path
      )));
    }
    check_success(path, response)
  }

  /// End the upstream session. Errors are logged, not returned.
  pub async fn close(&self) {
    let Some(token) = self.token.lock().await.take() else {
      return;
    };

    let result = self
      .request(Method::GET, "killSession", &[])
      .header("Session-Token", &token.value)
      .send()
      .await;
    match result {
      Ok(resp) => debug!(status = resp.status().as_u16(), "GLPI session closed"),
      Err(e) => warn!("Failed to close GLPI session: {}", e),
    }
  }

  async fn current_token(&self) -> Result<String> {
    let mut slot = self.token.lock().await;
    if let Some(token) = slot.as_ref().filter(|t| t.is_valid()) {
      return Ok(token.value.clone());
    }

    let token = self.handshake().await?;
    let value = token.value.clone();
    *slot = Some(token);
    Ok(value)
  }

  /// Replace `rejected` unless another caller already did.
  async fn refresh_after_rejection(&self, rejected: &str) -> Result<String> {
    let mut slot = self.token.lock().await;
    if let Some(token) = slot.as_ref() {
      if token.value != rejected && token.is_valid() {
        debug!("Token already refreshed by a concurrent caller");
        return Ok(token.value.clone());
      }
      debug!(held_secs = token.age().num_seconds(), "Dropping rejected session token");
    }

    *slot = None;
    let token = self.handshake().await?;
    let value = token.value.clone();
    *slot = Some(token);
    Ok(value)
  }

  async fn handshake(&self) -> Result<SessionToken> {
    let this = self;
    let response = with_retry(self.settings.max_retries, || async move {
      let mut builder = this.request(Method::GET, "initSession", &[]);
      builder = match &this.settings.credentials {
        Credentials::UserToken(token) => {
          builder.header("Authorization", format!("user_token {}", token))
        }
        Credentials::Basic { username, password } => builder.basic_auth(username, Some(password)),
      };
      let response = read_response(builder.send().await?).await?;
      classify(response)
    })
    .await?;

    if response.status != 200 {
      return Err(Error::AuthenticationFailure(format!(
        "initSession returned {}",
        response.status
      )));
    }

    let parsed: ApiSessionResponse = response
      .json()
      .map_err(|e| Error::AuthenticationFailure(format!("bad initSession body: {}", e)))?;

    let acquired_at = Utc::now();
    let expires_at = self
      .settings
      .session_lifetime
      .and_then(|lifetime| chrono::Duration::from_std(lifetime).ok())
      .map(|lifetime| acquired_at + lifetime);

    info!("Authenticated against GLPI");
    Ok(SessionToken {
      value: parsed.session_token,
      acquired_at,
      expires_at,
    })
  }

  async fn send_with_retry(
    &self,
    method: &Method,
    path: &str,
    params: &[(String, String)],
    token: &str,
  ) -> Result<UpstreamResponse> {
    let this = self;
    with_retry(self.settings.max_retries, || async move {
      let builder = this
        .request(method.clone(), path, params)
        .header("Session-Token", token);
      let response = read_response(builder.send().await?).await?;
      debug!(path, status = response.status, "GLPI response");
      classify(response)
    })
    .await
  }

  fn request(
    &self,
    method: Method,
    path: &str,
    params: &[(String, String)],
  ) -> reqwest::RequestBuilder {
    let url = format!("{}/{}", self.settings.base_url, path.trim_start_matches('/'));
    let mut builder = self.http.request(method, url);
    if !params.is_empty() {
      builder = builder.query(params);
    }
    if let Some(app_token) = &self.settings.app_token {
      builder = builder.header("App-Token", app_token);
    }
    builder
  }
}

async fn read_response(response: reqwest::Response) -> Result<UpstreamResponse> {
  let status = response.status().as_u16();
  let headers = response.headers().clone();
  let body = response.text().await?;
  Ok(UpstreamResponse {
    status,
    headers,
    body,
  })
}

/// Turn retryable statuses into errors so `with_retry` can see them.
fn classify(response: UpstreamResponse) -> Result<UpstreamResponse> {
  let err = Error::unavailable(Some(response.status), truncate(&response.body));
  if err.is_transient() {
    Err(err)
  } else {
    Ok(response)
  }
}

fn check_success(path: &str, response: UpstreamResponse) -> Result<UpstreamResponse> {
  if response.is_success() {
    Ok(response)
  } else {
    Err(Error::unavailable(
      Some(response.status),
      format!("{} returned {}: {}", path, response.status, truncate(&response.body)),
    ))
  }
}

fn truncate(body: &str) -> String {
  body.chars().take(200).collect()
}

/// Retry policy for transient errors
pub async fn with_retry<F, Fut, T>(max_retries: u32, operation: F) -> Result<T>
where
  F: Fn() -> Fut,
  Fut: std::future::Future<Output = Result<T>>,
{
  let mut attempt = 0;
  loop {
    match operation().await {
      Ok(result) => return Ok(result),
      Err(e) if e.is_transient() && attempt < max_retries => {
        attempt += 1;
        let backoff_ms = 2u64.pow(attempt - 1) * 100; // 100ms, 200ms, 400ms
        warn!(
          "Request failed (attempt {}/{}), retrying in {}ms: {}",
          attempt,
          max_retries + 1,
          backoff_ms,
          e
        );
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
      }
      Err(e) => return Err(e),
    }
  }
}
