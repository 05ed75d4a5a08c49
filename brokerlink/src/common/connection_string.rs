// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
//! `Key=Value;` connection strings describing a broker namespace and, optionally, one entity

use std::{fmt, str::FromStr};

use serde::{Deserializer, Serializer};
use url::Url;

const KEY_VALUE_SEPARATOR: char = '=';
const KEY_VALUE_PAIR_DELIMITER: char = ';';
const ENDPOINT_SCHEME: &str = "amqps";
const ENDPOINT_HOST_SUFFIX: &str = ".servicebus.windows.net";

const ENDPOINT_CONFIG_NAME: &str = "Endpoint";
const SHARED_ACCESS_KEY_NAME_CONFIG_NAME: &str = "SharedAccessKeyName";
const SHARED_ACCESS_KEY_CONFIG_NAME: &str = "SharedAccessKey";
const SASL_PLAIN_USERNAME_CONFIG_NAME: &str = "SaslPlainUsername";
const SASL_PLAIN_PASSWORD_CONFIG_NAME: &str = "SaslPlainPassword";
const ENTITY_PATH_CONFIG_NAME: &str = "EntityPath";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStringError {
  #[error("Value for the connection string parameter name '{key}' was not found")]
  MissingValue { key: String },
  #[error("Illegal connection string parameter name '{key}'")]
  UnknownKey { key: String },
  #[error("Endpoint '{value}' is not a valid URI: {source}")]
  InvalidEndpoint {
    value: String,
    #[source]
    source: url::ParseError,
  },
  #[error("Endpoint '{0}' must name a host")]
  EndpointWithoutHost(String),
  #[error("{0} must not be empty or whitespace")]
  MissingArgument(&'static str),
}

/// Parsed form of a connection string
///
/// Credentials embedded in the endpoint's user-info are moved into the SASL PLAIN fields, and
/// the stored endpoint never carries them.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionStringBuilder {
  endpoint: Option<Url>,
  entity_path: Option<String>,
  sas_key_name: Option<String>,
  sas_key: Option<String>,
  sasl_plain_username: Option<String>,
  sasl_plain_password: Option<String>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
  value.as_deref().filter(|v| !v.trim().is_empty())
}

impl ConnectionStringBuilder {
  pub fn new() -> Self {
    Default::default()
  }

  /// Builds a shared-access connection for a namespace.
  ///
  /// Namespaces containing a `.` are taken to be fully-qualified host names.
  pub fn from_parts(
    namespace_name: &str,
    entity_path: Option<&str>,
    shared_access_key_name: &str,
    shared_access_key: &str,
  ) -> Result<Self, ConnectionStringError> {
    if namespace_name.trim().is_empty() {
      return Err(ConnectionStringError::MissingArgument("namespaceName"));
    }
    if shared_access_key_name.trim().is_empty() {
      return Err(ConnectionStringError::MissingArgument("sharedAccessKeyName"));
    }
    if shared_access_key.trim().is_empty() {
      return Err(ConnectionStringError::MissingArgument("sharedAccessKey"));
    }
    let endpoint = if namespace_name.contains('.') {
      format!("{}://{}", ENDPOINT_SCHEME, namespace_name)
    } else {
      format!(
        "{}://{}{}",
        ENDPOINT_SCHEME, namespace_name, ENDPOINT_HOST_SUFFIX
      )
    };
    let mut builder = Self::new();
    builder.set_endpoint_str(&endpoint)?;
    builder.entity_path = entity_path.map(str::to_owned);
    builder.sas_key_name = Some(shared_access_key_name.to_owned());
    builder.sas_key = Some(shared_access_key.to_owned());
    Ok(builder)
  }

  pub fn endpoint(&self) -> Option<&Url> {
    self.endpoint.as_ref()
  }

  pub fn entity_path(&self) -> Option<&str> {
    self.entity_path.as_deref()
  }

  pub fn sas_key_name(&self) -> Option<&str> {
    self.sas_key_name.as_deref()
  }

  pub fn sas_key(&self) -> Option<&str> {
    self.sas_key.as_deref()
  }

  pub fn sasl_plain_username(&self) -> Option<&str> {
    self.sasl_plain_username.as_deref()
  }

  pub fn sasl_plain_password(&self) -> Option<&str> {
    self.sasl_plain_password.as_deref()
  }

  pub fn with_entity_path<T: Into<String>>(mut self, entity_path: T) -> Self {
    self.entity_path = Some(entity_path.into());
    self
  }

  pub fn with_shared_access_key<N: Into<String>, K: Into<String>>(
    mut self,
    key_name: N,
    key: K,
  ) -> Self {
    self.sas_key_name = Some(key_name.into());
    self.sas_key = Some(key.into());
    self
  }

  pub fn with_sasl_plain<U: Into<String>, P: Into<String>>(
    mut self,
    username: U,
    password: P,
  ) -> Self {
    self.sasl_plain_username = Some(username.into());
    self.sasl_plain_password = Some(password.into());
    self
  }

  /// Parses and stores an endpoint, extracting any user-info as SASL PLAIN credentials
  pub fn set_endpoint_str(&mut self, value: &str) -> Result<(), ConnectionStringError> {
    let mut uri = Url::parse(value).map_err(|source| ConnectionStringError::InvalidEndpoint {
      value: value.to_owned(),
      source,
    })?;
    if uri.host_str().is_none() {
      return Err(ConnectionStringError::EndpointWithoutHost(value.to_owned()));
    }
    if !uri.username().is_empty() {
      // Stored percent-encoded, exactly as the URI carries it
      self.sasl_plain_username = Some(uri.username().to_owned());
      if let Some(password) = uri.password() {
        self.sasl_plain_password = Some(password.to_owned());
      }
    }
    // Hosted URIs always accept credential edits
    let _ = uri.set_username("");
    let _ = uri.set_password(None);
    self.endpoint = Some(uri);
    Ok(())
  }

  /// Connection string addressing the namespace alone
  pub fn namespace_connection_string(&self) -> String {
    let mut rendered = String::new();
    let mut push = |key: &str, value: &str| {
      rendered.push_str(key);
      rendered.push(KEY_VALUE_SEPARATOR);
      rendered.push_str(value);
      rendered.push(KEY_VALUE_PAIR_DELIMITER);
    };
    if let Some(endpoint) = &self.endpoint {
      push(ENDPOINT_CONFIG_NAME, endpoint.as_str());
    }
    let optional_pairs = [
      (SHARED_ACCESS_KEY_NAME_CONFIG_NAME, &self.sas_key_name),
      (SHARED_ACCESS_KEY_CONFIG_NAME, &self.sas_key),
      (SASL_PLAIN_USERNAME_CONFIG_NAME, &self.sasl_plain_username),
      (SASL_PLAIN_PASSWORD_CONFIG_NAME, &self.sasl_plain_password),
    ];
    for (key, value) in optional_pairs {
      if let Some(value) = non_blank(value) {
        push(key, value);
      }
    }
    rendered
  }

  /// Connection string addressing the configured entity; fails if no entity path is set
  pub fn entity_connection_string(&self) -> Result<String, ConnectionStringError> {
    let entity_path =
      non_blank(&self.entity_path).ok_or(ConnectionStringError::MissingArgument("EntityPath"))?;
    Ok(format!(
      "{}{}{}{}{}",
      self.namespace_connection_string(),
      ENTITY_PATH_CONFIG_NAME,
      KEY_VALUE_SEPARATOR,
      entity_path,
      KEY_VALUE_PAIR_DELIMITER
    ))
  }

  fn parse_into(&mut self, connection_string: &str) -> Result<(), ConnectionStringError> {
    let pairs = connection_string
      .split(KEY_VALUE_PAIR_DELIMITER)
      .filter(|pair| !pair.is_empty());
    for pair in pairs {
      let (key, value) = match pair.split_once(KEY_VALUE_SEPARATOR) {
        Some((key, value)) => (key.trim(), value.trim()),
        None => {
          return Err(ConnectionStringError::MissingValue {
            key: pair.trim().to_owned(),
          })
        }
      };
      let is = |name: &str| key.eq_ignore_ascii_case(name);
      if is(ENDPOINT_CONFIG_NAME) {
        self.set_endpoint_str(value)?;
      } else if is(ENTITY_PATH_CONFIG_NAME) {
        self.entity_path = Some(value.to_owned());
      } else if is(SHARED_ACCESS_KEY_NAME_CONFIG_NAME) {
        self.sas_key_name = Some(value.to_owned());
      } else if is(SHARED_ACCESS_KEY_CONFIG_NAME) {
        self.sas_key = Some(value.to_owned());
      } else if is(SASL_PLAIN_USERNAME_CONFIG_NAME) {
        self.sasl_plain_username = Some(value.to_owned());
      } else if is(SASL_PLAIN_PASSWORD_CONFIG_NAME) {
        self.sasl_plain_password = Some(value.to_owned());
      } else {
        return Err(ConnectionStringError::UnknownKey {
          key: key.to_owned(),
        });
      }
    }
    Ok(())
  }
}

impl FromStr for ConnectionStringBuilder {
  type Err = ConnectionStringError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut builder = Self::new();
    if !s.trim().is_empty() {
      builder.parse_into(s)?;
    }
    Ok(builder)
  }
}

impl fmt::Display for ConnectionStringBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.entity_connection_string() {
      Ok(entity) => f.write_str(&entity),
      Err(_) => f.write_str(&self.namespace_connection_string()),
    }
  }
}

impl fmt::Debug for ConnectionStringBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let redacted = |secret: &Option<String>| secret.as_ref().map(|_| "<redacted>");
    f.debug_struct("ConnectionStringBuilder")
      .field("endpoint", &self.endpoint.as_ref().map(Url::as_str))
      .field("entity_path", &self.entity_path)
      .field("sas_key_name", &self.sas_key_name)
      .field("sas_key", &redacted(&self.sas_key))
      .field("sasl_plain_username", &self.sasl_plain_username)
      .field("sasl_plain_password", &redacted(&self.sasl_plain_password))
      .finish()
  }
}

impl serde::Serialize for ConnectionStringBuilder {
  fn serialize<S>(&self, serializer: S) -> Result<<S as Serializer>::Ok, <S as Serializer>::Error>
  where
    S: Serializer,
  {
    serializer.collect_str(self)
  }
}

impl<'de> serde::de::Deserialize<'de> for ConnectionStringBuilder {
  fn deserialize<D>(deserializer: D) -> Result<Self, <D as Deserializer<'de>>::Error>
  where
    D: Deserializer<'de>,
  {
    let s: String = serde::Deserialize::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
  }
}
