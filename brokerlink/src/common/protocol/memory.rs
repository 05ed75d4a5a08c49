// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
//! A loopback protocol engine which never touches the network
//!
//! Every object opens instantly unless told otherwise, and the engine can be configured to fail
//! or stall any step, which makes it suitable for exercising connection and link orchestration.

use std::{
  sync::{
    atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering},
    Arc, Mutex, MutexGuard,
  },
  time::Duration,
};

use arc_swap::{ArcSwap, ArcSwapOption};
use futures::future::{BoxFuture, FutureExt};

use super::{
  extensions::Extensions,
  id::ObjectId,
  settings::{
    AmqpSettings, ConnectionSettings, Fields, LinkSettings, SessionSettings, TransportSecurity,
    TransportSettings, PRODUCT_PROPERTY,
  },
  traits::{
    AmqpConnection, AmqpLink, AmqpObject, AmqpSession, BoxedTransport, ObjectState,
    ProtocolEngine, ProtocolError, Transport,
  },
};
use crate::common::authentication::cbs::{PutTokenRequest, PutTokenResponse};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex
    .lock()
    .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct Behaviour {
  product: ArcSwapOption<String>,
  connect_delay: ArcSwap<Duration>,
  failing_connects: AtomicUsize,
  fail_session_open: AtomicBool,
  fail_link_open: AtomicBool,
  put_token_status: AtomicU16,
  put_token_delay: ArcSwap<Duration>,
}

impl Default for Behaviour {
  fn default() -> Self {
    Self {
      product: ArcSwapOption::empty(),
      connect_delay: ArcSwap::from_pointee(Duration::ZERO),
      failing_connects: AtomicUsize::new(0),
      fail_session_open: AtomicBool::new(false),
      fail_link_open: AtomicBool::new(false),
      put_token_status: AtomicU16::new(202),
      put_token_delay: ArcSwap::from_pointee(Duration::ZERO),
    }
  }
}

#[derive(Debug)]
pub struct InMemoryTransport {
  host: String,
  port: u16,
  security: TransportSecurity,
}

impl InMemoryTransport {
  pub fn host(&self) -> &str {
    &self.host
  }

  pub fn port(&self) -> u16 {
    self.port
  }

  pub fn security(&self) -> TransportSecurity {
    self.security
  }
}

impl Transport for InMemoryTransport {}

#[derive(Debug, Default)]
pub struct InMemoryEngine {
  behaviour: Arc<Behaviour>,
  connect_attempts: AtomicUsize,
  connections: Mutex<Vec<Arc<InMemoryConnection>>>,
}

impl InMemoryEngine {
  pub fn new() -> Self {
    Default::default()
  }

  /// Announces `product` in the open frame of every connection created afterward
  pub fn with_product<T: Into<String>>(self, product: T) -> Self {
    self.set_product(Some(product.into()));
    self
  }

  pub fn set_product(&self, product: Option<String>) {
    self.behaviour.product.store(product.map(Arc::new));
  }

  /// Fails the next `count` transport connects
  pub fn fail_next_connects(&self, count: usize) {
    self.behaviour.failing_connects.store(count, Ordering::SeqCst);
  }

  /// Stalls every transport connect by `delay`
  pub fn set_connect_delay(&self, delay: Duration) {
    self.behaviour.connect_delay.store(Arc::new(delay));
  }

  pub fn fail_session_open(&self, fail: bool) {
    self.behaviour.fail_session_open.store(fail, Ordering::SeqCst);
  }

  pub fn fail_link_open(&self, fail: bool) {
    self.behaviour.fail_link_open.store(fail, Ordering::SeqCst);
  }

  /// Status with which the CBS node answers put-token requests
  pub fn set_put_token_status(&self, status_code: u16) {
    self
      .behaviour
      .put_token_status
      .store(status_code, Ordering::SeqCst);
  }

  /// Stalls every put-token response by `delay`
  pub fn set_put_token_delay(&self, delay: Duration) {
    self.behaviour.put_token_delay.store(Arc::new(delay));
  }

  pub fn connect_attempts(&self) -> usize {
    self.connect_attempts.load(Ordering::SeqCst)
  }

  /// Connections created so far, oldest first
  pub fn connections(&self) -> Vec<Arc<InMemoryConnection>> {
    lock(&self.connections).clone()
  }

  pub fn last_connection(&self) -> Option<Arc<InMemoryConnection>> {
    lock(&self.connections).last().cloned()
  }
}

impl ProtocolEngine for InMemoryEngine {
  fn connect<'a>(
    &'a self,
    _amqp_settings: &'a AmqpSettings,
    transport_settings: &'a TransportSettings,
    _timeout: Duration,
  ) -> BoxFuture<'a, Result<BoxedTransport, ProtocolError>> {
    async move {
      self.connect_attempts.fetch_add(1, Ordering::SeqCst);
      let delay = **self.behaviour.connect_delay.load();
      if !delay.is_zero() {
        tokio::time::sleep(delay).await;
      }
      let should_fail = self
        .behaviour
        .failing_connects
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
      if should_fail {
        tracing::debug!(host = transport_settings.host(), "Refusing in-memory connect");
        return Err(ProtocolError::transport(std::io::Error::new(
          std::io::ErrorKind::ConnectionRefused,
          "in-memory connect refused",
        )));
      }
      let transport: BoxedTransport = Box::new(InMemoryTransport {
        host: transport_settings.host().to_owned(),
        port: transport_settings.port(),
        security: transport_settings.security(),
      });
      Ok(transport)
    }
    .boxed()
  }

  fn create_connection(
    &self,
    transport: BoxedTransport,
    _amqp_settings: AmqpSettings,
    connection_settings: ConnectionSettings,
  ) -> Result<Arc<dyn AmqpConnection>, ProtocolError> {
    let transport = transport.downcast::<InMemoryTransport>().map_err(|foreign| {
      ProtocolError::transport(std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!("in-memory engine cannot drive transport {:?}", foreign),
      ))
    })?;
    let connection = Arc::new(InMemoryConnection {
      id: ObjectId::next(),
      settings: connection_settings,
      transport,
      state: Arc::new(ArcSwap::from_pointee(ObjectState::Start)),
      remote_properties: ArcSwap::from_pointee(Fields::new()),
      extensions: Extensions::new(),
      put_token_requests: Mutex::new(Vec::new()),
      sessions_created: AtomicUsize::new(0),
      behaviour: Arc::clone(&self.behaviour),
    });
    lock(&self.connections).push(Arc::clone(&connection));
    Ok(connection)
  }
}

type SharedState = Arc<ArcSwap<ObjectState>>;

fn current(state: &SharedState) -> ObjectState {
  **state.load()
}

fn transition(state: &SharedState, to: ObjectState) {
  state.store(Arc::new(to));
}

/// Moves `state` to open, refusing objects which have already ended
fn open_state(id: ObjectId, state: &SharedState) -> Result<(), ProtocolError> {
  if current(state).is_terminal() {
    return Err(ProtocolError::Closed(id));
  }
  transition(state, ObjectState::Opened);
  Ok(())
}

#[derive(Debug)]
pub struct InMemoryConnection {
  id: ObjectId,
  settings: ConnectionSettings,
  transport: Box<InMemoryTransport>,
  state: SharedState,
  remote_properties: ArcSwap<Fields>,
  extensions: Extensions,
  put_token_requests: Mutex<Vec<PutTokenRequest>>,
  sessions_created: AtomicUsize,
  behaviour: Arc<Behaviour>,
}

impl InMemoryConnection {
  pub fn transport(&self) -> &InMemoryTransport {
    &self.transport
  }

  /// Simulates the peer dropping the connection
  pub fn kill(&self) {
    tracing::debug!(connection = %self.id, "Faulting in-memory connection");
    transition(&self.state, ObjectState::Faulted);
  }

  pub fn sessions_created(&self) -> usize {
    self.sessions_created.load(Ordering::SeqCst)
  }

  /// Put-token requests the CBS node has received, oldest first
  pub fn put_token_requests(&self) -> Vec<PutTokenRequest> {
    lock(&self.put_token_requests).clone()
  }
}

impl AmqpObject for InMemoryConnection {
  fn identifier(&self) -> ObjectId {
    self.id
  }

  fn state(&self) -> ObjectState {
    current(&self.state)
  }

  fn open<'a>(&'a self, _timeout: Duration) -> BoxFuture<'a, Result<(), ProtocolError>> {
    let opened = open_state(self.id, &self.state).map(|()| {
      let mut remote = Fields::new();
      if let Some(product) = self.behaviour.product.load_full() {
        remote.insert(PRODUCT_PROPERTY.to_owned(), product.as_ref().clone());
      }
      self.remote_properties.store(Arc::new(remote));
    });
    futures::future::ready(opened).boxed()
  }

  fn close<'a>(&'a self, _timeout: Duration) -> BoxFuture<'a, Result<(), ProtocolError>> {
    self.abort();
    futures::future::ready(Ok(())).boxed()
  }

  fn abort(&self) {
    if !current(&self.state).is_terminal() {
      transition(&self.state, ObjectState::End);
    }
  }
}

impl AmqpConnection for InMemoryConnection {
  fn settings(&self) -> &ConnectionSettings {
    &self.settings
  }

  fn remote_properties(&self) -> Fields {
    self.remote_properties.load().as_ref().clone()
  }

  fn extensions(&self) -> &Extensions {
    &self.extensions
  }

  fn create_session(
    &self,
    _settings: SessionSettings,
  ) -> Result<Arc<dyn AmqpSession>, ProtocolError> {
    if !self.is_open() {
      return Err(ProtocolError::Closed(self.id));
    }
    self.sessions_created.fetch_add(1, Ordering::SeqCst);
    Ok(Arc::new(InMemorySession {
      id: ObjectId::next(),
      connection_id: self.id,
      connection_state: Arc::clone(&self.state),
      state: Arc::new(ArcSwap::from_pointee(ObjectState::Start)),
      behaviour: Arc::clone(&self.behaviour),
    }))
  }

  fn put_token<'a>(
    &'a self,
    request: PutTokenRequest,
    _timeout: Duration,
  ) -> BoxFuture<'a, Result<PutTokenResponse, ProtocolError>> {
    async move {
      if !self.is_open() {
        return Err(ProtocolError::Closed(self.id));
      }
      lock(&self.put_token_requests).push(request);
      let delay = **self.behaviour.put_token_delay.load();
      if !delay.is_zero() {
        tokio::time::sleep(delay).await;
      }
      let status_code = self.behaviour.put_token_status.load(Ordering::SeqCst);
      let status_description = match status_code {
        200 | 202 => None,
        _ => Some("Unauthorized".to_owned()),
      };
      Ok(PutTokenResponse {
        status_code,
        status_description,
      })
    }
    .boxed()
  }
}

#[derive(Debug)]
pub struct InMemorySession {
  id: ObjectId,
  connection_id: ObjectId,
  connection_state: SharedState,
  state: SharedState,
  behaviour: Arc<Behaviour>,
}

impl AmqpObject for InMemorySession {
  fn identifier(&self) -> ObjectId {
    self.id
  }

  fn state(&self) -> ObjectState {
    match current(&self.connection_state) {
      connection if connection.is_terminal() => connection,
      _ => current(&self.state),
    }
  }

  fn open<'a>(&'a self, _timeout: Duration) -> BoxFuture<'a, Result<(), ProtocolError>> {
    let opened = if !current(&self.connection_state).is_open() {
      Err(ProtocolError::Closed(self.connection_id))
    } else if self.behaviour.fail_session_open.load(Ordering::SeqCst) {
      transition(&self.state, ObjectState::Faulted);
      Err(ProtocolError::Rejected {
        operation: "begin",
        condition: "amqp:resource-limit-exceeded".to_owned(),
        description: Some("in-memory session refused".to_owned()),
      })
    } else {
      open_state(self.id, &self.state)
    };
    futures::future::ready(opened).boxed()
  }

  fn close<'a>(&'a self, _timeout: Duration) -> BoxFuture<'a, Result<(), ProtocolError>> {
    self.abort();
    futures::future::ready(Ok(())).boxed()
  }

  fn abort(&self) {
    if !current(&self.state).is_terminal() {
      transition(&self.state, ObjectState::End);
    }
  }
}

impl AmqpSession for InMemorySession {
  fn connection_identifier(&self) -> ObjectId {
    self.connection_id
  }

  fn attach_link(
    &self,
    identifier: ObjectId,
    settings: LinkSettings,
  ) -> Result<Arc<dyn AmqpLink>, ProtocolError> {
    if current(&self.state).is_terminal() {
      return Err(ProtocolError::Closed(self.id));
    }
    Ok(Arc::new(InMemoryLink {
      id: identifier,
      session_id: self.id,
      settings,
      session_state: Arc::clone(&self.state),
      state: Arc::new(ArcSwap::from_pointee(ObjectState::Start)),
      behaviour: Arc::clone(&self.behaviour),
    }))
  }
}

#[derive(Debug)]
pub struct InMemoryLink {
  id: ObjectId,
  session_id: ObjectId,
  settings: LinkSettings,
  session_state: SharedState,
  state: SharedState,
  behaviour: Arc<Behaviour>,
}

impl AmqpObject for InMemoryLink {
  fn identifier(&self) -> ObjectId {
    self.id
  }

  fn state(&self) -> ObjectState {
    current(&self.state)
  }

  fn open<'a>(&'a self, _timeout: Duration) -> BoxFuture<'a, Result<(), ProtocolError>> {
    let opened = if !current(&self.session_state).is_open() {
      Err(ProtocolError::Closed(self.session_id))
    } else if self.behaviour.fail_link_open.load(Ordering::SeqCst) {
      transition(&self.state, ObjectState::Faulted);
      Err(ProtocolError::Rejected {
        operation: "attach",
        condition: "amqp:not-found".to_owned(),
        description: Some(format!(
          "no node at '{}'",
          self
            .settings
            .target
            .as_ref()
            .or(self.settings.source.as_ref())
            .map(|t| t.address.as_str())
            .unwrap_or_default()
        )),
      })
    } else {
      open_state(self.id, &self.state)
    };
    futures::future::ready(opened).boxed()
  }

  fn close<'a>(&'a self, _timeout: Duration) -> BoxFuture<'a, Result<(), ProtocolError>> {
    self.abort();
    futures::future::ready(Ok(())).boxed()
  }

  fn abort(&self) {
    if !current(&self.state).is_terminal() {
      transition(&self.state, ObjectState::End);
    }
  }
}

impl AmqpLink for InMemoryLink {
  fn settings(&self) -> &LinkSettings {
    &self.settings
  }

  fn session_identifier(&self) -> ObjectId {
    self.session_id
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use url::Url;

  use super::InMemoryEngine;
  use crate::common::protocol::{
    settings::{
      AmqpSettings, ConnectionSettings, LinkSettings, SessionSettings, TransportSettings,
      PRODUCT_PROPERTY,
    },
    AmqpConnection, AmqpObject, ObjectId, ObjectState, ProtocolEngine, ProtocolError,
  };

  const TIMEOUT: Duration = Duration::from_secs(5);

  async fn open_connection(engine: &InMemoryEngine) -> std::sync::Arc<dyn AmqpConnection> {
    let amqp = AmqpSettings::default();
    let transport =
      TransportSettings::from_endpoint(&Url::parse("amqp://localhost").unwrap()).unwrap();
    let transport = engine.connect(&amqp, &transport, TIMEOUT).await.unwrap();
    let connection = engine
      .create_connection(
        transport,
        amqp,
        ConnectionSettings {
          container_id: "container".into(),
          host_name: "localhost".into(),
          max_frame_size: 1024,
          properties: Default::default(),
        },
      )
      .unwrap();
    connection.open(TIMEOUT).await.unwrap();
    connection
  }

  #[tokio::test]
  async fn product_is_announced_after_open() {
    let engine = InMemoryEngine::new().with_product("apache-activemq-artemis");
    let connection = open_connection(&engine).await;
    assert_eq!(
      connection.remote_properties().get(PRODUCT_PROPERTY).map(String::as_str),
      Some("apache-activemq-artemis")
    );
    assert_eq!(engine.connect_attempts(), 1);
  }

  #[tokio::test]
  async fn injected_connect_failures_are_consumed() {
    let engine = InMemoryEngine::new();
    engine.fail_next_connects(1);
    let amqp = AmqpSettings::default();
    let transport =
      TransportSettings::from_endpoint(&Url::parse("amqp://localhost").unwrap()).unwrap();
    assert!(matches!(
      engine.connect(&amqp, &transport, TIMEOUT).await,
      Err(ProtocolError::Transport(_))
    ));
    assert!(engine.connect(&amqp, &transport, TIMEOUT).await.is_ok());
    assert_eq!(engine.connect_attempts(), 2);
  }

  #[tokio::test]
  async fn killed_connections_fault_their_sessions() {
    let engine = InMemoryEngine::new();
    let connection = open_connection(&engine).await;
    let session = connection.create_session(SessionSettings::default()).unwrap();
    session.open(TIMEOUT).await.unwrap();
    let link = session
      .attach_link(ObjectId::next(), LinkSettings::sender())
      .unwrap();
    link.open(TIMEOUT).await.unwrap();

    engine.last_connection().unwrap().kill();
    assert_eq!(connection.state(), ObjectState::Faulted);
    assert_eq!(session.state(), ObjectState::Faulted);
    assert!(connection.create_session(SessionSettings::default()).is_err());
  }

  #[tokio::test]
  async fn closed_objects_do_not_reopen() {
    let engine = InMemoryEngine::new();
    let connection = open_connection(&engine).await;
    connection.close(TIMEOUT).await.unwrap();
    assert_eq!(connection.state(), ObjectState::End);
    assert!(matches!(
      connection.open(TIMEOUT).await,
      Err(ProtocolError::Closed(_))
    ));
  }
}
