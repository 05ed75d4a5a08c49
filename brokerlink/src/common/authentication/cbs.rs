// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
//! The claims-based security node of a connection

use std::time::SystemTime;

use url::Url;

use super::traits::{TokenProvider, TokenProviderError};
use crate::{
  common::protocol::{
    extensions::ConnectionExtension,
    traits::{AmqpConnection, ProtocolError},
  },
  util::{Deadline, TimeoutError},
};

/// Address of the node accepting put-token requests on every connection
pub const CBS_ADDRESS: &str = "$cbs";
pub const PUT_TOKEN_OPERATION: &str = "put-token";

const STATUS_OK: u16 = 200;
const STATUS_ACCEPTED: u16 = 202;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutTokenRequest {
  pub token_type: String,
  pub token: String,
  /// The put-token `name`: the address the token authorizes
  pub audience: String,
  pub expiration: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutTokenResponse {
  pub status_code: u16,
  pub status_description: Option<String>,
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum CbsError {
  #[error("Connection has no claims-based security link registered")]
  NotRegistered,
  #[error("Token provider failed for audience '{audience}': {source}")]
  TokenProvider {
    audience: String,
    #[source]
    source: TokenProviderError,
  },
  #[error("Token provider returned an expired token for audience '{audience}'")]
  ExpiredToken { audience: String },
  #[error("Put-token for '{audience}' was rejected with status {status_code}{}", .status_description.as_deref().map(|d| format!(": {}", d)).unwrap_or_default())]
  Rejected {
    audience: String,
    status_code: u16,
    status_description: Option<String>,
  },
  #[error("Put-token for '{audience}' failed: {source}")]
  Protocol {
    audience: String,
    #[source]
    source: ProtocolError,
  },
  #[error(transparent)]
  TimedOut(#[from] TimeoutError),
}

/// Sends tokens to a connection's CBS node
///
/// The node is a single request/response pair per connection, so requests from concurrent link
/// creations are sent one at a time.
#[derive(Debug, Default)]
pub struct CbsLink {
  in_flight: tokio::sync::Mutex<()>,
}

impl ConnectionExtension for CbsLink {}

impl CbsLink {
  pub fn new() -> Self {
    Default::default()
  }

  /// Obtains a token for `resource` and authorizes `audience` with it on `connection`.
  ///
  /// Returns the token's expiry. Every wait is bounded by `deadline`.
  #[tracing::instrument(
    level = "debug",
    skip(self, connection, token_provider, address, deadline),
    fields(address = %address),
    err
  )]
  pub async fn send_token(
    &self,
    connection: &dyn AmqpConnection,
    token_provider: &dyn TokenProvider,
    address: &Url,
    audience: &str,
    resource: &str,
    required_claims: &[String],
    deadline: &Deadline,
  ) -> Result<SystemTime, CbsError> {
    let token = deadline
      .run("acquire token", |remaining| {
        token_provider.get_token(resource, required_claims, remaining)
      })
      .await?
      .map_err(|source| CbsError::TokenProvider {
        audience: audience.to_owned(),
        source,
      })?;
    if token.is_expired_at(SystemTime::now()) {
      return Err(CbsError::ExpiredToken {
        audience: audience.to_owned(),
      });
    }
    let expiration = token.expires_at;
    let request = PutTokenRequest {
      token_type: token.token_type,
      token: token.token,
      audience: audience.to_owned(),
      expiration,
    };

    let _exclusive = deadline
      .run("await cbs link", |_| self.in_flight.lock())
      .await?;
    let response = deadline
      .run(PUT_TOKEN_OPERATION, |remaining| {
        connection.put_token(request, remaining)
      })
      .await?
      .map_err(|source| CbsError::Protocol {
        audience: audience.to_owned(),
        source,
      })?;
    match response.status_code {
      STATUS_OK | STATUS_ACCEPTED => {
        tracing::debug!(status = response.status_code, "Token accepted");
        Ok(expiration)
      }
      status_code => Err(CbsError::Rejected {
        audience: audience.to_owned(),
        status_code,
        status_description: response.status_description,
      }),
    }
  }
}
