// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
use std::{
  sync::Arc,
  time::{Duration, SystemTime},
};

use futures::future::BoxFuture;

/// A bearer token scoped to one audience
#[derive(Clone, PartialEq, Eq)]
pub struct SecurityToken {
  pub token: String,
  pub token_type: String,
  pub audience: String,
  pub expires_at: SystemTime,
}

impl SecurityToken {
  pub fn is_expired_at(&self, now: SystemTime) -> bool {
    self.expires_at <= now
  }
}

impl std::fmt::Debug for SecurityToken {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SecurityToken")
      .field("token_type", &self.token_type)
      .field("audience", &self.audience)
      .field("expires_at", &self.expires_at)
      .finish_non_exhaustive()
  }
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum TokenProviderError {
  #[error("Audience '{0}' cannot be signed for")]
  InvalidAudience(String),
  #[error("Token time to live {0:?} puts the expiry out of range")]
  InvalidTimeToLive(Duration),
  #[error("Signing key was rejected: {0}")]
  InvalidKey(String),
  #[error("Token source failed: {0}")]
  Source(
    #[source]
    #[cfg_attr(feature = "backtrace", backtrace)]
    Arc<dyn std::error::Error + Send + Sync + 'static>,
  ),
}

/// Issues tokens for claims-based security exchanges
#[cfg_attr(test, mockall::automock)]
pub trait TokenProvider: Send + Sync {
  /// Produces a token for `audience` granting `required_claims`, within `timeout`
  fn get_token(
    &self,
    audience: &str,
    required_claims: &[String],
    timeout: Duration,
  ) -> BoxFuture<'static, Result<SecurityToken, TokenProviderError>>;
}
