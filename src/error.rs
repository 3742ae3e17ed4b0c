//! Error taxonomy for upstream access, filter validation and decoding.
//!
//! Partial results and cache misses are not errors: the first is carried by
//! `SearchResult::is_partial`, the second by an absent cache value.

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
  /// The handshake failed, or a rejected token could not be refreshed.
  #[error("Authentication with GLPI failed: {0}")]
  AuthenticationFailure(String),

  /// Network failure, timeout, or a status other than 200/206 after retries.
  #[error("GLPI is unavailable: {message}")]
  UpstreamUnavailable { status: Option<u16>, message: String },

  /// Caller-supplied filter rejected before any upstream call.
  #[error("Invalid filter: {message}")]
  Validation {
    message: String,
    details: Vec<String>,
  },

  /// Upstream answered with a body we could not make sense of.
  #[error("Failed to decode GLPI response: {0}")]
  Decode(String),
}

impl Error {
  pub fn unavailable(status: Option<u16>, message: impl Into<String>) -> Self {
    Self::UpstreamUnavailable {
      status,
      message: message.into(),
    }
  }

  /// Whether another attempt at the same request may succeed.
  pub fn is_transient(&self) -> bool {
    match self {
      Self::UpstreamUnavailable { status: None, .. } => true,
      Self::UpstreamUnavailable {
        status: Some(code),
        ..
      } => matches!(code, 429 | 500 | 502 | 503 | 504),
      _ => false,
    }
  }

  pub fn status(&self) -> Option<u16> {
    match self {
      Self::UpstreamUnavailable { status, .. } => *status,
      _ => None,
    }
  }
}

impl From<reqwest::Error> for Error {
  fn from(err: reqwest::Error) -> Self {
    let status = err.status().map(|s| s.as_u16());
    let message = if err.is_timeout() {
      "request timed out".to_string()
    } else if err.is_connect() {
      format!("connection failed: {}", err)
    } else {
      err.to_string()
    };
    Self::UpstreamUnavailable { status, message }
  }
}

/// Structured failure handed to callers outside the service layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
  pub message: String,
  pub details: Vec<String>,
}

impl From<&Error> for ErrorReport {
  fn from(err: &Error) -> Self {
    let details = match err {
      Error::Validation { details, .. } => details.clone(),
      Error::AuthenticationFailure(reason) => vec![reason.clone()],
      _ => err
        .status()
        .map(|code| format!("upstream status {}", code))
        .into_iter()
        .collect(),
    };
    Self {
      message: err.to_string(),
      details,
    }
  }
}

impl From<Error> for ErrorReport {
  fn from(err: Error) -> Self {
    Self::from(&err)
  }
}
