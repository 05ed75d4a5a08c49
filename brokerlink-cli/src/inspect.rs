// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
use anyhow::{Context, Result};
use brokerlink::{
  common::{
    connection_string::ConnectionStringBuilder,
    entity_path::{EntityPath, TopologyModel},
  },
  util::validators::{parse_connection_string, parse_topology},
};
use clap::ArgMatches;

/// Builds the entity path named by the shared entity arguments
pub fn entity_path_arg_handling(args: &ArgMatches) -> Result<EntityPath> {
  let name = args
    .value_of("entity")
    .context("Entity name is required")?;
  let path = match (args.value_of("subscription"), args.is_present("dead-letter")) {
    (Some(subscription), true) => EntityPath::subscription_dead_letter(name, subscription)?,
    (Some(subscription), false) => EntityPath::subscription(name, subscription)?,
    (None, true) => EntityPath::dead_letter_queue(name)?,
    (None, false) => match args.value_of("kind") {
      Some("queue") => EntityPath::queue(name)?,
      Some("topic") => EntityPath::topic(name)?,
      _ => EntityPath::entity(name)?,
    },
  };
  Ok(if args.is_present("management") {
    path.management()
  } else {
    path
  })
}

#[derive(Debug)]
pub struct ParseArgs {
  pub connection_string: ConnectionStringBuilder,
}

pub fn parse_arg_handling(args: &ArgMatches) -> Result<ParseArgs> {
  let connection_string = args
    .value_of("connection-string")
    .context("Connection string is required")?;
  Ok(ParseArgs {
    connection_string: parse_connection_string(connection_string)?,
  })
}

pub fn parse_main(config: ParseArgs) -> Result<()> {
  let builder = &config.connection_string;
  let summary = serde_json::json!({
    "endpoint": builder.endpoint().map(|e| e.as_str()),
    "entity_path": builder.entity_path(),
    "shared_access_key_name": builder.sas_key_name(),
    "has_shared_access_key": builder.sas_key().is_some(),
    "sasl_plain_username": builder.sasl_plain_username(),
    "has_sasl_plain_password": builder.sasl_plain_password().is_some(),
    "namespace_connection_string": builder.namespace_connection_string(),
  });
  println!("{}", serde_json::to_string_pretty(&summary)?);
  Ok(())
}

#[derive(Debug)]
pub struct ResolveArgs {
  pub entity_path: EntityPath,
  pub topology: TopologyModel,
}

pub fn resolve_arg_handling(args: &ArgMatches) -> Result<ResolveArgs> {
  Ok(ResolveArgs {
    entity_path: entity_path_arg_handling(args)?,
    topology: parse_topology(args.value_of("topology").unwrap_or("servicebus"))?,
  })
}

pub fn resolve_main(config: ResolveArgs) -> Result<()> {
  let summary = serde_json::json!({
    "entity": config.entity_path.to_string(),
    "topology": config.topology,
    "address": config.entity_path.resolve(config.topology),
  });
  println!("{}", serde_json::to_string_pretty(&summary)?);
  Ok(())
}
