// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
//! Holds one lazily created protocol object, recreating it after it faults

use std::{
  fmt::Debug,
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard,
  },
  time::Duration,
};

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::{
  common::protocol::{AmqpObject, ProtocolError},
  util::TimeoutError,
};

#[derive(thiserror::Error, Debug, Clone)]
pub enum FaultTolerantError<E> {
  #[error("Object was closed and will not be recreated")]
  Closed,
  #[error(transparent)]
  TimedOut(#[from] TimeoutError),
  #[error("Object creation failed: {0}")]
  Creation(#[source] E),
  #[error("Object creation was interrupted before completing")]
  Interrupted,
}

type Factory<T, E> = Box<dyn Fn(Duration) -> BoxFuture<'static, Result<Arc<T>, E>> + Send + Sync>;

type Creation<T, E> = Shared<BoxFuture<'static, Result<Arc<T>, FaultTolerantError<E>>>>;

enum Slot<T: ?Sized, E> {
  Vacant,
  Live(Arc<T>),
  /// A creation is in flight; every caller awaits the same attempt
  Pending {
    generation: u64,
    creation: Creation<T, E>,
  },
  Closed,
}

impl<T: ?Sized, E> Slot<T, E> {
  fn is_pending(&self, generation: u64) -> bool {
    matches!(self, Slot::Pending { generation: pending, .. } if *pending == generation)
  }
}

struct Inner<T: ?Sized, E> {
  operation: &'static str,
  factory: Factory<T, E>,
  slot: Mutex<Slot<T, E>>,
  generations: AtomicU64,
}

impl<T: ?Sized, E> Inner<T, E> {
  fn slot(&self) -> MutexGuard<'_, Slot<T, E>> {
    self
      .slot
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

/// Creates its object on first use and shares it until it faults or the holder is closed.
///
/// At most one creation runs at a time. Callers arriving while one is in flight wait on it and
/// receive its outcome, including its error. Failed creations leave nothing behind, so the next
/// caller starts over.
pub struct FaultTolerantObject<T: ?Sized, E> {
  inner: Arc<Inner<T, E>>,
}

impl<T, E> FaultTolerantObject<T, E>
where
  T: AmqpObject + ?Sized + 'static,
  E: Clone + Debug + Send + Sync + 'static,
{
  /// `operation` names the creation in timeout errors and logs
  pub fn new<F>(operation: &'static str, factory: F) -> Self
  where
    F: Fn(Duration) -> BoxFuture<'static, Result<Arc<T>, E>> + Send + Sync + 'static,
  {
    Self {
      inner: Arc::new(Inner {
        operation,
        factory: Box::new(factory),
        slot: Mutex::new(Slot::Vacant),
        generations: AtomicU64::new(0),
      }),
    }
  }

  /// Returns the live object, creating one if there is none, waiting at most `timeout`
  pub async fn get_or_create(&self, timeout: Duration) -> Result<Arc<T>, FaultTolerantError<E>> {
    let creation = {
      let mut slot = self.inner.slot();
      match &*slot {
        Slot::Closed => return Err(FaultTolerantError::Closed),
        Slot::Live(object) if object.is_open() => return Ok(Arc::clone(object)),
        Slot::Pending { creation, .. } => creation.clone(),
        Slot::Live(_) | Slot::Vacant => {
          if let Slot::Live(dead) = &*slot {
            tracing::debug!(
              operation = self.inner.operation,
              object = %dead.identifier(),
              state = ?dead.state(),
              "Discarding object which is no longer open"
            );
            dead.abort();
          }
          let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
          let creation = Self::start_creation(&self.inner, generation, timeout);
          *slot = Slot::Pending {
            generation,
            creation: creation.clone(),
          };
          creation
        }
      }
    };
    tokio::time::timeout(timeout, creation)
      .await
      .map_err(|_elapsed| TimeoutError::new(self.inner.operation, timeout))?
  }

  /// Returns the current object only if it is open, never starting a creation
  pub fn try_get(&self) -> Option<Arc<T>> {
    match &*self.inner.slot() {
      Slot::Live(object) if object.is_open() => Some(Arc::clone(object)),
      _ => None,
    }
  }

  pub fn is_closed(&self) -> bool {
    matches!(&*self.inner.slot(), Slot::Closed)
  }

  /// Closes the current object, if any, and refuses all later requests.
  ///
  /// A creation still in flight closes its object as soon as it completes.
  pub async fn close(&self, timeout: Duration) -> Result<(), ProtocolError> {
    let previous = std::mem::replace(&mut *self.inner.slot(), Slot::Closed);
    match previous {
      Slot::Live(object) if !object.state().is_terminal() => {
        tracing::debug!(operation = self.inner.operation, object = %object.identifier(), "Closing");
        object.close(timeout).await
      }
      _ => Ok(()),
    }
  }

  /// The attempt runs on its own task and completes whether or not anyone awaits it
  fn start_creation(inner: &Arc<Inner<T, E>>, generation: u64, timeout: Duration) -> Creation<T, E> {
    let attempt = (inner.factory)(timeout);
    let task = tokio::spawn({
      let inner = Arc::clone(inner);
      async move {
        let result = attempt.await.map_err(FaultTolerantError::Creation);
        let closed = {
          let mut slot = inner.slot();
          let closed = matches!(&*slot, Slot::Closed);
          if slot.is_pending(generation) {
            *slot = match &result {
              Ok(object) => Slot::Live(Arc::clone(object)),
              Err(_) => Slot::Vacant,
            };
          }
          closed
        };
        match result {
          Ok(object) if closed => {
            tracing::debug!(
              operation = inner.operation,
              object = %object.identifier(),
              "Holder closed during creation; discarding new object"
            );
            object.abort();
            Err(FaultTolerantError::Closed)
          }
          Err(error) => {
            tracing::debug!(operation = inner.operation, ?error, "Creation failed");
            Err(error)
          }
          ok => ok,
        }
      }
    });
    let inner = Arc::clone(inner);
    async move {
      task.await.unwrap_or_else(|join_error| {
        tracing::warn!(operation = inner.operation, %join_error, "Creation task did not complete");
        let mut slot = inner.slot();
        if slot.is_pending(generation) {
          *slot = Slot::Vacant;
        }
        Err(FaultTolerantError::Interrupted)
      })
    }
    .boxed()
    .shared()
  }
}

impl<T: ?Sized, E> Debug for FaultTolerantObject<T, E> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let state = match &*self.inner.slot() {
      Slot::Vacant => "vacant",
      Slot::Live(_) => "live",
      Slot::Pending { .. } => "pending",
      Slot::Closed => "closed",
    };
    f.debug_struct("FaultTolerantObject")
      .field("operation", &self.inner.operation)
      .field("state", &state)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use std::{sync::Arc, time::Duration};

  use futures::FutureExt;
  use url::Url;

  use super::{FaultTolerantError, FaultTolerantObject};
  use crate::common::protocol::{
    memory::InMemoryEngine,
    settings::{AmqpSettings, ConnectionSettings, TransportSettings},
    AmqpConnection, AmqpObject, ProtocolEngine, ProtocolError,
  };

  const TIMEOUT: Duration = Duration::from_secs(10);

  async fn open(
    engine: Arc<InMemoryEngine>,
    timeout: Duration,
  ) -> Result<Arc<dyn AmqpConnection>, ProtocolError> {
    let amqp = AmqpSettings::default();
    let transport = TransportSettings::from_endpoint(&Url::parse("amqp://localhost").unwrap())
      .map_err(ProtocolError::transport)?;
    let transport = engine.connect(&amqp, &transport, timeout).await?;
    let connection = engine.create_connection(
      transport,
      amqp,
      ConnectionSettings {
        container_id: "fault-tolerant-test".into(),
        host_name: "localhost".into(),
        max_frame_size: 1024,
        properties: Default::default(),
      },
    )?;
    connection.open(timeout).await?;
    Ok(connection)
  }

  fn manager(engine: &Arc<InMemoryEngine>) -> FaultTolerantObject<dyn AmqpConnection, ProtocolError> {
    let engine = Arc::clone(engine);
    FaultTolerantObject::new("open connection", move |timeout| {
      open(Arc::clone(&engine), timeout).boxed()
    })
  }

  #[tokio::test]
  async fn live_object_is_reused() {
    let engine = Arc::new(InMemoryEngine::new());
    let manager = manager(&engine);
    assert!(manager.try_get().is_none());
    let first = manager.get_or_create(TIMEOUT).await.unwrap();
    let second = manager.get_or_create(TIMEOUT).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(engine.connect_attempts(), 1);
    assert!(manager.try_get().is_some());
  }

  #[tokio::test]
  async fn faulted_object_is_replaced() {
    let engine = Arc::new(InMemoryEngine::new());
    let manager = manager(&engine);
    let first = manager.get_or_create(TIMEOUT).await.unwrap();
    engine.last_connection().unwrap().kill();
    assert!(manager.try_get().is_none());

    let second = manager.get_or_create(TIMEOUT).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.is_open());
    assert_eq!(engine.connect_attempts(), 2);
  }

  #[tokio::test]
  async fn failed_creation_leaves_nothing_behind() {
    let engine = Arc::new(InMemoryEngine::new());
    engine.fail_next_connects(1);
    let manager = manager(&engine);
    assert!(matches!(
      manager.get_or_create(TIMEOUT).await,
      Err(FaultTolerantError::Creation(ProtocolError::Transport(_)))
    ));
    assert!(manager.get_or_create(TIMEOUT).await.is_ok());
    assert_eq!(engine.connect_attempts(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn concurrent_callers_share_one_creation() {
    let engine = Arc::new(InMemoryEngine::new());
    engine.set_connect_delay(Duration::from_secs(1));
    let manager = manager(&engine);

    let results =
      futures::future::join_all((0..8).map(|_| manager.get_or_create(TIMEOUT))).await;
    let connections: Vec<_> = results.into_iter().map(Result::unwrap).collect();
    assert!(connections.iter().all(|c| Arc::ptr_eq(c, &connections[0])));
    assert_eq!(engine.connect_attempts(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn concurrent_callers_share_one_failure() {
    let engine = Arc::new(InMemoryEngine::new());
    engine.set_connect_delay(Duration::from_secs(1));
    engine.fail_next_connects(1);
    let manager = manager(&engine);

    let results =
      futures::future::join_all((0..8).map(|_| manager.get_or_create(TIMEOUT))).await;
    assert!(results
      .iter()
      .all(|r| matches!(r, Err(FaultTolerantError::Creation(ProtocolError::Transport(_))))));
    assert_eq!(engine.connect_attempts(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn waiters_are_bounded_by_their_own_timeout() {
    let engine = Arc::new(InMemoryEngine::new());
    engine.set_connect_delay(Duration::from_secs(30));
    let manager = manager(&engine);

    match manager.get_or_create(Duration::from_secs(1)).await {
      Err(FaultTolerantError::TimedOut(e)) => assert_eq!(e.operation(), "open connection"),
      other => panic!("Expected a timeout, got {:?}", other.map(|c| c.identifier())),
    }
    // The abandoned attempt is still in flight and later callers join it
    let connection = manager.get_or_create(Duration::from_secs(60)).await.unwrap();
    assert!(connection.is_open());
    assert_eq!(engine.connect_attempts(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn creation_finishes_after_its_callers_give_up() {
    let engine = Arc::new(InMemoryEngine::new());
    engine.set_connect_delay(Duration::from_secs(30));
    let manager = manager(&engine);

    let abandoned =
      tokio::time::timeout(Duration::from_secs(1), manager.get_or_create(Duration::from_secs(60)))
        .await;
    assert!(abandoned.is_err());
    tokio::time::sleep(Duration::from_secs(100)).await;

    // Nobody awaited the attempt, yet it completed and published its connection
    let created = manager.try_get().expect("connection created without waiters");
    let connection = manager.get_or_create(Duration::from_secs(60)).await.unwrap();
    assert!(Arc::ptr_eq(&created, &connection));
    assert_eq!(engine.connect_attempts(), 1);
  }

  #[tokio::test]
  async fn closed_manager_rejects_requests() {
    let engine = Arc::new(InMemoryEngine::new());
    let manager = manager(&engine);
    let connection = manager.get_or_create(TIMEOUT).await.unwrap();
    manager.close(TIMEOUT).await.unwrap();
    assert!(!connection.is_open());
    assert!(manager.is_closed());
    assert!(matches!(
      manager.get_or_create(TIMEOUT).await,
      Err(FaultTolerantError::Closed)
    ));
    // Closing twice is harmless
    manager.close(TIMEOUT).await.unwrap();
  }

  #[tokio::test(start_paused = true)]
  async fn creation_completing_after_close_is_discarded() {
    let engine = Arc::new(InMemoryEngine::new());
    engine.set_connect_delay(Duration::from_secs(1));
    let manager = manager(&engine);

    let (created, ()) = futures::future::join(manager.get_or_create(TIMEOUT), async {
      tokio::task::yield_now().await;
      manager.close(TIMEOUT).await.unwrap();
    })
    .await;
    assert!(matches!(created, Err(FaultTolerantError::Closed)));
    assert!(!engine.last_connection().unwrap().is_open());
  }
}
