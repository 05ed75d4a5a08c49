// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
#![warn(unused_imports)]

use anyhow::Result;
use brokerlink::util;
use clap::{Arg, ArgMatches, Command};

use util::validators::{
  validate_connection_string, validate_existing_file, validate_timeout_secs, validate_topology,
};

mod inspect;
mod link;

fn entity_args(command: Command<'static>) -> Command<'static> {
  command
    .arg(
      Arg::new("entity")
        .help("Queue, topic, or entity name")
        .takes_value(true)
        .required(true),
    )
    .arg(
      Arg::new("kind")
        .long("kind")
        .short('k')
        .possible_values(["entity", "queue", "topic"])
        .default_value("entity")
        .takes_value(true),
    )
    .arg(
      Arg::new("subscription")
        .help("Address a subscription of the named topic")
        .long("subscription")
        .short('s')
        .takes_value(true),
    )
    .arg(
      Arg::new("dead-letter")
        .help("Address the dead-letter sub-queue")
        .long("dead-letter")
        .short('d'),
    )
    .arg(
      Arg::new("management")
        .help("Address the management node")
        .long("management")
        .short('m'),
    )
}

fn main() -> Result<()> {
  let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("brokerlink=debug,info"));
  let collector = tracing_subscriber::fmt()
    .pretty()
    .with_env_filter(env_filter)
    .finish();
  tracing::subscriber::set_global_default(collector)?;
  let app = Command::new(env!("CARGO_BIN_NAME"))
    .version(env!("CARGO_PKG_VERSION"))
    .about(env!("CARGO_PKG_DESCRIPTION"))
    .subcommand(
      Command::new("parse")
        .about("Parse a connection string and print its normalized form")
        .arg(
          Arg::new("connection-string")
            .validator(validate_connection_string)
            .takes_value(true)
            .required(true),
        ),
    )
    .subcommand(entity_args(
      Command::new("resolve")
        .about("Resolve an entity to its wire address")
        .arg(
          Arg::new("topology")
            .long("topology")
            .short('t')
            .validator(validate_topology)
            .default_value("servicebus")
            .takes_value(true),
        ),
    ))
    .subcommand(entity_args(
      Command::new("link")
        .about("Create and open a link against an in-memory broker")
        .arg(
          Arg::new("connection-string")
            .long("connection-string")
            .short('c')
            .validator(validate_connection_string)
            .takes_value(true)
            .required(true),
        )
        .arg(
          Arg::new("receiver")
            .help("Open a receiving link instead of a sending link")
            .long("receiver")
            .short('r'),
        )
        .arg(
          Arg::new("claim")
            .help("Claim required of the link's token; may be repeated")
            .long("claim")
            .takes_value(true)
            .multiple_occurrences(true),
        )
        .arg(
          Arg::new("product")
            .help("Product name the in-memory broker announces")
            .long("product")
            .short('p')
            .takes_value(true),
        )
        .arg(
          Arg::new("timeout")
            .help("Operation timeout in seconds")
            .long("timeout")
            .validator(validate_timeout_secs)
            .default_value("60")
            .takes_value(true),
        )
        .arg(
          Arg::new("authority")
            .help("PEM file of root certificates trusted for secure endpoints")
            .long("authority")
            .short('a')
            .validator(validate_existing_file)
            .takes_value(true)
            .required(false),
        ),
    ))
    .subcommand_required(true)
    .arg_required_else_help(true);
  let matches = app.get_matches();
  let mode = matches.subcommand_name().unwrap_or("<No subcommand?>");
  let rt = tokio::runtime::Builder::new_multi_thread()
    .thread_name("tokio-reactor-worker")
    .enable_all()
    .build()?;
  match rt.block_on(main_args_handler(&matches)) {
    Err(err) => {
      tracing::error!(mode = mode, err = ?err, "dispatch_command_failure");
      Err(err)
    }
    Ok(_) => {
      tracing::info!("{} exited successfully", mode);
      Ok(())
    }
  }
}

async fn main_args_handler(matches: &'_ ArgMatches) -> Result<()> {
  match matches.subcommand() {
    Some(("parse", opts)) => {
      let config = inspect::parse_arg_handling(opts)?;
      inspect::parse_main(config)
    }
    Some(("resolve", opts)) => {
      let config = inspect::resolve_arg_handling(opts)?;
      tracing::debug!("Resolving with config {:?}", config);
      inspect::resolve_main(config)
    }
    Some(("link", opts)) => {
      let config = link::link_arg_handling(opts)?;
      tracing::info!("Creating link with config {:#?}", config);
      link::link_main(config).await
    }
    _ => Err(anyhow::Error::msg("Subcommand is marked as required")),
  }
}
