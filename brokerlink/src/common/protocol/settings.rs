// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
//! Settings handed to the protocol engine for transports, connections, sessions, and links

use std::{collections::BTreeMap, fmt, sync::Arc};

use url::Url;

/// Symbol-keyed properties exchanged in open and attach frames
pub type Fields = BTreeMap<String, String>;

pub const AMQP_PORT: u16 = 5672;
pub const AMQPS_PORT: u16 = 5671;
pub const WS_PORT: u16 = 80;
pub const WSS_PORT: u16 = 443;

pub const DEFAULT_MAX_FRAME_SIZE: u32 = 256 * 1024;

/// Remote connection property in which brokers announce their product name
pub const PRODUCT_PROPERTY: &str = "product";

/// AMQP 1.0.0
pub const AMQP_VERSION: (u8, u8, u8) = (1, 0, 0);

/// How transport security is established for a connection
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransportSecurity {
  None,
  /// TLS wraps the transport from its first byte
  Tls,
  /// A plain connect followed by an in-band upgrade to TLS
  TlsUpgrade,
}

impl TransportSecurity {
  pub fn is_secure(&self) -> bool {
    !matches!(self, Self::None)
  }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportSettingsError {
  #[error("Endpoint '{0}' must name a host")]
  MissingHost(String),
  #[error("Endpoint scheme '{0}' is not supported; expected amqp, amqps, ws, or wss")]
  UnsupportedScheme(String),
  #[error("Host '{0}' is not a valid TLS server name")]
  InvalidServerName(String),
}

/// Where and how to connect, derived from an endpoint URI
#[derive(Clone)]
pub struct TransportSettings {
  host: String,
  port: u16,
  security: TransportSecurity,
  use_web_sockets: bool,
  server_name: Option<rustls::ServerName>,
  tls_config: Option<Arc<rustls::ClientConfig>>,
}

impl TransportSettings {
  /// Derives transport parameters from the endpoint's scheme and port.
  ///
  /// `amqps` and `wss` are secure. A secure scheme on the plain AMQP port connects without TLS
  /// and upgrades in-band; any other port wraps the transport directly.
  pub fn from_endpoint(endpoint: &Url) -> Result<Self, TransportSettingsError> {
    let scheme = endpoint.scheme().to_ascii_lowercase();
    let (secure, use_web_sockets, default_port) = match scheme.as_str() {
      "amqp" => (false, false, AMQP_PORT),
      "amqps" => (true, false, AMQPS_PORT),
      "ws" => (false, true, WS_PORT),
      "wss" => (true, true, WSS_PORT),
      other => return Err(TransportSettingsError::UnsupportedScheme(other.to_owned())),
    };
    let host = endpoint
      .host_str()
      .ok_or_else(|| TransportSettingsError::MissingHost(endpoint.to_string()))?
      .to_owned();
    let port = endpoint.port().unwrap_or(default_port);
    let security = match (secure, port) {
      (false, _) => TransportSecurity::None,
      (true, AMQP_PORT) => TransportSecurity::TlsUpgrade,
      (true, _) => TransportSecurity::Tls,
    };
    let server_name = if security.is_secure() {
      let name = rustls::ServerName::try_from(host.as_str())
        .map_err(|_| TransportSettingsError::InvalidServerName(host.clone()))?;
      Some(name)
    } else {
      None
    };
    Ok(Self {
      host,
      port,
      security,
      use_web_sockets,
      server_name,
      tls_config: None,
    })
  }

  pub fn with_tls_config(mut self, tls_config: Arc<rustls::ClientConfig>) -> Self {
    self.tls_config = Some(tls_config);
    self
  }

  pub fn host(&self) -> &str {
    &self.host
  }

  pub fn port(&self) -> u16 {
    self.port
  }

  pub fn security(&self) -> TransportSecurity {
    self.security
  }

  pub fn use_web_sockets(&self) -> bool {
    self.use_web_sockets
  }

  pub fn server_name(&self) -> Option<&rustls::ServerName> {
    self.server_name.as_ref()
  }

  pub fn tls_config(&self) -> Option<&Arc<rustls::ClientConfig>> {
    self.tls_config.as_ref()
  }
}

impl fmt::Debug for TransportSettings {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TransportSettings")
      .field("host", &self.host)
      .field("port", &self.port)
      .field("security", &self.security)
      .field("use_web_sockets", &self.use_web_sockets)
      .field("has_tls_config", &self.tls_config.is_some())
      .finish_non_exhaustive()
  }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SaslPlainCredentials {
  pub username: String,
  pub password: String,
}

impl fmt::Debug for SaslPlainCredentials {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SaslPlainCredentials")
      .field("username", &self.username)
      .finish_non_exhaustive()
  }
}

/// Protocol-level settings negotiated before the open handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmqpSettings {
  pub protocol_version: (u8, u8, u8),
  /// SASL PLAIN credentials, if the endpoint or connection string supplied them
  pub sasl_plain: Option<SaslPlainCredentials>,
  /// Authenticate through CBS tokens rather than SASL credentials
  pub use_cbs_tokens: bool,
}

impl Default for AmqpSettings {
  fn default() -> Self {
    Self {
      protocol_version: AMQP_VERSION,
      sasl_plain: None,
      use_cbs_tokens: false,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
  pub container_id: String,
  pub host_name: String,
  pub max_frame_size: u32,
  pub properties: Fields,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSettings {
  pub properties: Fields,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Role {
  Sender,
  Receiver,
}

/// A link endpoint's node address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Terminus {
  pub address: String,
}

impl Terminus {
  pub fn new<T: Into<String>>(address: T) -> Self {
    Self {
      address: address.into(),
    }
  }

  /// An address left for the link creator to fill in
  pub fn unaddressed() -> Self {
    Default::default()
  }

  pub fn is_unaddressed(&self) -> bool {
    self.address.is_empty()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
  pub role: Role,
  pub link_name: String,
  pub source: Option<Terminus>,
  pub target: Option<Terminus>,
  pub properties: Fields,
}

impl LinkSettings {
  /// A sending link whose target is filled with the entity address at attach time
  pub fn sender() -> Self {
    Self {
      role: Role::Sender,
      link_name: String::new(),
      source: None,
      target: Some(Terminus::unaddressed()),
      properties: Fields::new(),
    }
  }

  /// A receiving link whose source is filled with the entity address at attach time
  pub fn receiver() -> Self {
    Self {
      role: Role::Receiver,
      link_name: String::new(),
      source: Some(Terminus::unaddressed()),
      target: None,
      properties: Fields::new(),
    }
  }
}
