// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
//! The seam between connection orchestration and an AMQP protocol engine
//!
//! Frame encoding, the TLS handshake, and flow control live behind these traits. Orchestration
//! only opens, closes, and inspects the objects an engine hands out.

use std::{fmt::Debug, sync::Arc, time::Duration};

use downcast_rs::{impl_downcast, Downcast};
use futures::future::BoxFuture;

use super::{
  extensions::Extensions,
  id::ObjectId,
  settings::{AmqpSettings, ConnectionSettings, Fields, LinkSettings, SessionSettings, TransportSettings},
};
use crate::common::authentication::cbs::{PutTokenRequest, PutTokenResponse};

#[derive(thiserror::Error, Debug, Clone)]
pub enum ProtocolError {
  #[error("Transport failure: {0}")]
  Transport(
    #[source]
    #[cfg_attr(feature = "backtrace", backtrace)]
    Arc<dyn std::error::Error + Send + Sync + 'static>,
  ),
  #[error("Remote peer refused {operation}: {condition}{}", .description.as_deref().map(|d| format!(" ({})", d)).unwrap_or_default())]
  Rejected {
    operation: &'static str,
    condition: String,
    description: Option<String>,
  },
  #[error("Object {0} is closed")]
  Closed(ObjectId),
  #[error("{0} did not complete within its timeout")]
  TimedOut(&'static str),
}

impl ProtocolError {
  pub fn transport<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
    Self::Transport(Arc::new(error))
  }
}

impl From<std::io::Error> for ProtocolError {
  fn from(error: std::io::Error) -> Self {
    Self::transport(error)
  }
}

/// Lifecycle states shared by connections, sessions, and links
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ObjectState {
  Start,
  OpenSent,
  Opened,
  CloseSent,
  End,
  Faulted,
}

impl ObjectState {
  pub fn is_open(&self) -> bool {
    matches!(self, Self::Opened)
  }

  /// Closed or faulted; the object will never open again
  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::End | Self::Faulted)
  }
}

/// An object with an open/close lifecycle on the wire
pub trait AmqpObject: Debug + Send + Sync {
  fn identifier(&self) -> ObjectId;

  fn state(&self) -> ObjectState;

  fn open<'a>(&'a self, timeout: Duration) -> BoxFuture<'a, Result<(), ProtocolError>>;

  fn close<'a>(&'a self, timeout: Duration) -> BoxFuture<'a, Result<(), ProtocolError>>;

  /// Tears the object down locally without waiting on the peer
  fn abort(&self);

  fn is_open(&self) -> bool {
    self.state().is_open()
  }
}

impl<T> AmqpObject for Arc<T>
where
  T: AmqpObject + ?Sized,
{
  fn identifier(&self) -> ObjectId {
    self.as_ref().identifier()
  }

  fn state(&self) -> ObjectState {
    self.as_ref().state()
  }

  fn open<'a>(&'a self, timeout: Duration) -> BoxFuture<'a, Result<(), ProtocolError>> {
    self.as_ref().open(timeout)
  }

  fn close<'a>(&'a self, timeout: Duration) -> BoxFuture<'a, Result<(), ProtocolError>> {
    self.as_ref().close(timeout)
  }

  fn abort(&self) {
    self.as_ref().abort()
  }
}

pub trait AmqpConnection: AmqpObject {
  fn settings(&self) -> &ConnectionSettings;

  fn container_id(&self) -> &str {
    &self.settings().container_id
  }

  /// Properties the peer announced in its open frame; empty before the connection opens
  fn remote_properties(&self) -> Fields;

  fn extensions(&self) -> &Extensions;

  fn create_session(
    &self,
    settings: SessionSettings,
  ) -> Result<Arc<dyn AmqpSession>, ProtocolError>;

  /// Sends one put-token request to the connection's CBS node and awaits its status
  fn put_token<'a>(
    &'a self,
    request: PutTokenRequest,
    timeout: Duration,
  ) -> BoxFuture<'a, Result<PutTokenResponse, ProtocolError>>;
}

pub trait AmqpSession: AmqpObject {
  fn connection_identifier(&self) -> ObjectId;

  /// Constructs a link with `identifier` and attaches it to this session, without opening it
  fn attach_link(
    &self,
    identifier: ObjectId,
    settings: LinkSettings,
  ) -> Result<Arc<dyn AmqpLink>, ProtocolError>;
}

pub trait AmqpLink: AmqpObject {
  fn settings(&self) -> &LinkSettings;

  fn name(&self) -> &str {
    &self.settings().link_name
  }

  fn session_identifier(&self) -> ObjectId;
}

/// An established byte transport, owned by the engine that produced it
pub trait Transport: Downcast + Debug + Send {}
impl_downcast!(Transport);

pub type BoxedTransport = Box<dyn Transport>;

/// Produces transports and protocol connections
pub trait ProtocolEngine: Send + Sync {
  /// Establishes the byte transport, including any TLS wrapping or upgrade
  fn connect<'a>(
    &'a self,
    amqp_settings: &'a AmqpSettings,
    transport_settings: &'a TransportSettings,
    timeout: Duration,
  ) -> BoxFuture<'a, Result<BoxedTransport, ProtocolError>>;

  /// Wraps a transport in an unopened protocol connection
  fn create_connection(
    &self,
    transport: BoxedTransport,
    amqp_settings: AmqpSettings,
    connection_settings: ConnectionSettings,
  ) -> Result<Arc<dyn AmqpConnection>, ProtocolError>;
}
