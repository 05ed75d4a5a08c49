// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::future::{BoxFuture, FutureExt};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::traits::{SecurityToken, TokenProvider, TokenProviderError};

type HmacSha256 = Hmac<Sha256>;

pub const SAS_TOKEN_TYPE: &str = "servicebus.windows.net:sastoken";
pub const DEFAULT_TOKEN_TIME_TO_LIVE: Duration = Duration::from_secs(60 * 60);

/// Signs shared access signatures locally from a named key
///
/// Claims are granted by the key's own access rights, so they do not alter the signature.
pub struct SharedAccessSignatureTokenProvider {
  key_name: String,
  key: String,
  token_time_to_live: Duration,
}

impl SharedAccessSignatureTokenProvider {
  pub fn new<N: Into<String>, K: Into<String>>(key_name: N, key: K) -> Self {
    Self::with_time_to_live(key_name, key, DEFAULT_TOKEN_TIME_TO_LIVE)
  }

  pub fn with_time_to_live<N: Into<String>, K: Into<String>>(
    key_name: N,
    key: K,
    token_time_to_live: Duration,
  ) -> Self {
    Self {
      key_name: key_name.into(),
      key: key.into(),
      token_time_to_live,
    }
  }

  pub fn key_name(&self) -> &str {
    &self.key_name
  }

  /// Builds `SharedAccessSignature sr=..&sig=..&se=..&skn=..` for `resource` expiring at `expires_at`
  pub fn build_signature(
    &self,
    resource: &str,
    expires_at: SystemTime,
  ) -> Result<String, TokenProviderError> {
    if resource.trim().is_empty() {
      return Err(TokenProviderError::InvalidAudience(resource.to_owned()));
    }
    let expiry = expires_at
      .duration_since(UNIX_EPOCH)
      .map_err(|_| TokenProviderError::InvalidAudience(resource.to_owned()))?
      .as_secs();
    let encoded_resource = urlencoding::encode(resource);
    let mut mac = HmacSha256::new_from_slice(self.key.as_bytes())
      .map_err(|e| TokenProviderError::InvalidKey(e.to_string()))?;
    mac.update(format!("{}\n{}", encoded_resource, expiry).as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());
    Ok(format!(
      "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
      encoded_resource,
      urlencoding::encode(&signature),
      expiry,
      urlencoding::encode(&self.key_name),
    ))
  }
}

impl std::fmt::Debug for SharedAccessSignatureTokenProvider {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SharedAccessSignatureTokenProvider")
      .field("key_name", &self.key_name)
      .field("token_time_to_live", &self.token_time_to_live)
      .finish_non_exhaustive()
  }
}

impl TokenProvider for SharedAccessSignatureTokenProvider {
  fn get_token(
    &self,
    audience: &str,
    _required_claims: &[String],
    _timeout: Duration,
  ) -> BoxFuture<'static, Result<SecurityToken, TokenProviderError>> {
    let result = SystemTime::now()
      .checked_add(self.token_time_to_live)
      .ok_or(TokenProviderError::InvalidTimeToLive(self.token_time_to_live))
      .and_then(|expires_at| {
        self
          .build_signature(audience, expires_at)
          .map(|token| SecurityToken {
            token,
            token_type: SAS_TOKEN_TYPE.to_owned(),
            audience: audience.to_owned(),
            expires_at,
          })
      });
    futures::future::ready(result).boxed()
  }
}
