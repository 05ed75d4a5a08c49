// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use super::entity_path::TopologyModel;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Broker topology has not been discovered; no connection has completed opening")]
pub struct TopologyNotDiscovered;

/// Facts discovered about the broker during the open handshake of a connection
///
/// Shared by every link built on a client's connection. Empty until the first connection
/// finishes opening, and rewritten by each replacement connection.
#[derive(Default)]
pub struct ConnectionCapabilities {
  topology: ArcSwapOption<TopologyModel>,
}

impl ConnectionCapabilities {
  pub fn new() -> Self {
    Default::default()
  }

  pub fn topology_model(&self) -> Result<TopologyModel, TopologyNotDiscovered> {
    self
      .topology
      .load()
      .as_deref()
      .copied()
      .ok_or(TopologyNotDiscovered)
  }

  pub fn is_discovered(&self) -> bool {
    self.topology.load().is_some()
  }

  pub(crate) fn set_topology_model(&self, topology: TopologyModel) {
    self.topology.store(Some(Arc::new(topology)));
  }
}

impl std::fmt::Debug for ConnectionCapabilities {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ConnectionCapabilities")
      .field("topology", &self.topology.load().as_deref())
      .finish()
  }
}
