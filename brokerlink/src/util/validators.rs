// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
use anyhow::{Error as AnyErr, Result};
use std::{path::Path, time::Duration};

use crate::common::{connection_string::ConnectionStringBuilder, entity_path::TopologyModel};

pub fn validate_existing_file(v: &str) -> Result<(), String> {
  if !Path::new(&v).exists() {
    Err(String::from("A file must exist at the given path"))
  } else {
    Ok(())
  }
}

pub fn parse_connection_string(v: &str) -> Result<ConnectionStringBuilder> {
  let builder = v.parse::<ConnectionStringBuilder>()?;
  if builder.endpoint().is_none() {
    return Err(AnyErr::msg("Connection string must contain an Endpoint"));
  }
  Ok(builder)
}

pub fn parse_topology(v: &str) -> Result<TopologyModel> {
  v.parse::<TopologyModel>().map_err(Into::into)
}

pub fn parse_timeout_secs(v: &str) -> Result<Duration> {
  match v.parse::<u64>() {
    Ok(0) => Err(AnyErr::msg("Timeout must be at least one second")),
    Ok(secs) => Ok(Duration::from_secs(secs)),
    Err(_) => Err(AnyErr::msg("Timeout must be a whole number of seconds")),
  }
}

pub fn validate_connection_string(v: &str) -> Result<(), String> {
  parse_connection_string(v)
    .map(|_| ())
    .map_err(|e| e.to_string())
}

pub fn validate_topology(v: &str) -> Result<(), String> {
  parse_topology(v).map(|_| ()).map_err(|e| e.to_string())
}

pub fn validate_timeout_secs(v: &str) -> Result<(), String> {
  parse_timeout_secs(v).map(|_| ()).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;

  #[test]
  fn connection_string_requires_endpoint() {
    assert!(validate_connection_string("EntityPath=queue").is_err());
    assert!(validate_connection_string("Endpoint=amqp://localhost:5672").is_ok());
  }

  #[test]
  fn timeouts_are_positive_seconds() {
    assert_eq!(parse_timeout_secs("30").unwrap(), Duration::from_secs(30));
    assert!(validate_timeout_secs("0").is_err());
    assert!(validate_timeout_secs("soon").is_err());
  }

  #[test]
  fn files_must_exist() {
    assert!(validate_existing_file(env!("CARGO_MANIFEST_DIR")).is_ok());
    assert!(validate_existing_file("/definitely/not/a/real/path.pem").is_err());
  }

  #[test]
  fn topology_names() {
    assert_eq!(parse_topology("artemis").unwrap(), TopologyModel::Artemis);
    assert!(validate_topology("rabbit").is_err());
  }
}
