// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
use std::{
  path::{Path, PathBuf},
  str::FromStr,
  sync::Arc,
  time::Duration,
};

use anyhow::{Context, Error as AnyErr, Result};
use brokerlink::{
  client::{
    link_creator::{ManagementLinkCreator, SendReceiveLinkCreator},
    BusConnection, ConnectionOptions,
  },
  common::{
    connection_string::ConnectionStringBuilder,
    entity_path::EntityPath,
    protocol::{memory::InMemoryEngine, settings::LinkSettings, AmqpLink, AmqpObject},
  },
  util::validators::{parse_connection_string, parse_timeout_secs},
};
use clap::ArgMatches;

use crate::inspect::entity_path_arg_handling;

#[derive(Debug)]
pub struct LinkArgs {
  pub connection_string: ConnectionStringBuilder,
  pub entity_path: EntityPath,
  pub receiver: bool,
  pub claims: Vec<String>,
  pub product: Option<String>,
  pub operation_timeout: Duration,
  pub authority_cert: Option<PathBuf>,
}

pub fn link_arg_handling(args: &'_ ArgMatches) -> Result<LinkArgs> {
  let authority_cert_path = args
    .value_of("authority")
    .map(PathBuf::from_str)
    // flip Option<Result<T, E>> to Result<Option<T>, E>
    .map_or(Ok(None), |v| v.map(Some))?;
  Ok(LinkArgs {
    connection_string: parse_connection_string(
      args
        .value_of("connection-string")
        .context("Connection string is required")?,
    )?,
    entity_path: entity_path_arg_handling(args)?,
    receiver: args.is_present("receiver"),
    claims: args
      .values_of("claim")
      .map(|claims| claims.map(String::from).collect())
      .unwrap_or_default(),
    product: args.value_of("product").map(String::from),
    operation_timeout: parse_timeout_secs(args.value_of("timeout").unwrap_or("60"))?,
    authority_cert: authority_cert_path,
  })
}

fn load_authority(path: &Path) -> Result<Arc<rustls::ClientConfig>> {
  let cert_pem = std::fs::read(path).context("Failed reading authority cert file")?;
  let certificates = rustls_pemfile::certs(&mut cert_pem.as_slice())
    .context("Failed parsing authority cert file")?;
  if certificates.is_empty() {
    return Err(AnyErr::msg("No root authority"));
  }
  let mut roots = rustls::RootCertStore::empty();
  let (added, ignored) = roots.add_parsable_certificates(&certificates);
  tracing::debug!(added, ignored, "Loaded root authorities");
  let config = rustls::ClientConfig::builder()
    .with_safe_defaults()
    .with_root_certificates(roots)
    .with_no_client_auth();
  Ok(Arc::new(config))
}

fn describe_link(link: &dyn AmqpLink) -> serde_json::Value {
  let settings = link.settings();
  serde_json::json!({
    "name": link.name(),
    "role": format!("{:?}", settings.role),
    "source": settings.source.as_ref().map(|t| t.address.as_str()),
    "target": settings.target.as_ref().map(|t| t.address.as_str()),
    "state": format!("{:?}", link.state()),
  })
}

pub async fn link_main(config: LinkArgs) -> Result<()> {
  let engine = match &config.product {
    Some(product) => InMemoryEngine::new().with_product(product.as_str()),
    None => InMemoryEngine::new(),
  };
  let engine = Arc::new(engine);
  let options = ConnectionOptions {
    operation_timeout: config.operation_timeout,
    tls_config: match &config.authority_cert {
      Some(path) => Some(load_authority(path)?),
      None => None,
    },
    ..Default::default()
  };
  let bus = Arc::new(BusConnection::new(
    &config.connection_string,
    engine.clone(),
    options,
  )?);
  let token_provider = bus.token_provider();

  let link = if matches!(config.entity_path, EntityPath::Management(_)) {
    let creator = ManagementLinkCreator::new(
      config.entity_path.clone(),
      Arc::clone(&bus),
      config.claims.clone(),
      token_provider,
    );
    let link = creator.create_and_open_link().await?;
    serde_json::json!({
      "sender": describe_link(link.sender().as_ref()),
      "receiver": describe_link(link.receiver().as_ref()),
      "reply_to": link.reply_to(),
    })
  } else {
    let settings = if config.receiver {
      LinkSettings::receiver()
    } else {
      LinkSettings::sender()
    };
    let creator = SendReceiveLinkCreator::new(
      config.entity_path.clone(),
      Arc::clone(&bus),
      config.claims.clone(),
      token_provider,
      settings,
    );
    let link = creator.create_and_open_link().await?;
    describe_link(link.as_ref())
  };

  let connection = engine
    .last_connection()
    .context("In-memory broker recorded no connection")?;
  let summary = serde_json::json!({
    "entity": config.entity_path.to_string(),
    "topology": bus.capabilities().topology_model()?,
    "connection": connection.identifier().inner(),
    "put_token_requests": connection
      .put_token_requests()
      .iter()
      .map(|request| request.audience.as_str())
      .collect::<Vec<_>>(),
    "link": link,
  });
  println!("{}", serde_json::to_string_pretty(&summary)?);
  bus.close().await?;
  Ok(())
}
