// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
//! Connection management, link creation, and entity addressing for AMQP message broker clients
//!
//! A [`BusConnection`](client::BusConnection) owns one lazily created, fault-tolerant protocol
//! connection. [Link creators](client::link_creator) acquire it, authenticate over claims-based
//! security, and open sessions and links on it, all under a single operation deadline.
//! [`EntityPath`](common::entity_path::EntityPath) turns logical entity names into the wire
//! addresses expected by whichever broker topology answered the handshake.

pub mod client;
pub mod common;
pub mod util;

pub mod prelude {
  pub use crate::client::{
    link_creator::{LinkCreator, ManagementLinkCreator, SendReceiveLinkCreator},
    BusConnection, ConnectionOptions,
  };
  pub use crate::common::{
    capabilities::ConnectionCapabilities,
    connection_string::ConnectionStringBuilder,
    entity_path::{EntityPath, TopologyModel},
  };
}
