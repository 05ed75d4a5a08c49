// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
//! An absolute deadline shared by every step of a multi-step network operation

use std::{future::Future, time::Duration};

use tokio::time::Instant;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} timed out; the operation budget of {timeout:?} was exhausted")]
pub struct TimeoutError {
  operation: &'static str,
  timeout: Duration,
}

impl TimeoutError {
  pub fn new(operation: &'static str, timeout: Duration) -> Self {
    Self { operation, timeout }
  }

  /// The step which found the budget exhausted
  pub fn operation(&self) -> &'static str {
    self.operation
  }

  /// The overall budget of the operation the step belonged to
  pub fn timeout(&self) -> Duration {
    self.timeout
  }
}

/// A point in time computed once at the start of an operation.
///
/// Each step asks for its own remaining budget instead of decrementing a shared counter, so
/// steps which overrun do not need to report how much they consumed.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
  started: Instant,
  timeout: Duration,
}

impl Deadline {
  pub fn after(timeout: Duration) -> Self {
    Self {
      started: Instant::now(),
      timeout,
    }
  }

  pub fn timeout(&self) -> Duration {
    self.timeout
  }

  pub fn elapsed(&self) -> Duration {
    self.started.elapsed()
  }

  /// Remaining budget, saturating at zero
  pub fn remaining(&self) -> Duration {
    self.timeout.saturating_sub(self.started.elapsed())
  }

  pub fn is_expired(&self) -> bool {
    self.remaining().is_zero()
  }

  /// Remaining budget for `operation`, or a timeout if none is left to start it with
  pub fn remaining_for(&self, operation: &'static str) -> Result<Duration, TimeoutError> {
    match self.remaining() {
      remaining if remaining.is_zero() => Err(TimeoutError::new(operation, self.timeout)),
      remaining => Ok(remaining),
    }
  }

  /// Runs a step with whatever budget remains, bounding its wait by that same budget.
  ///
  /// The step is never constructed if the deadline has already passed.
  pub async fn run<F, Fut, T>(&self, operation: &'static str, step: F) -> Result<T, TimeoutError>
  where
    F: FnOnce(Duration) -> Fut,
    Fut: Future<Output = T>,
  {
    let remaining = self.remaining_for(operation)?;
    tokio::time::timeout(remaining, step(remaining))
      .await
      .map_err(|_elapsed| TimeoutError::new(operation, self.timeout))
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
  };

  use super::Deadline;

  #[tokio::test(start_paused = true)]
  async fn remaining_shrinks_with_elapsed_time() {
    let deadline = Deadline::after(Duration::from_secs(10));
    tokio::time::advance(Duration::from_secs(4)).await;
    assert_eq!(deadline.remaining(), Duration::from_secs(6));
    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(deadline.remaining(), Duration::ZERO);
    assert!(deadline.is_expired());
  }

  #[tokio::test(start_paused = true)]
  async fn exhausted_budget_never_starts_the_step() {
    let deadline = Deadline::after(Duration::from_secs(1));
    tokio::time::advance(Duration::from_secs(1)).await;
    let started = AtomicBool::new(false);
    let err = deadline
      .run("open session", |_| async {
        started.store(true, Ordering::SeqCst);
      })
      .await
      .unwrap_err();
    assert!(!started.load(Ordering::SeqCst), "Step must not run");
    assert_eq!(err.operation(), "open session");
    assert_eq!(err.timeout(), Duration::from_secs(1));
  }

  #[tokio::test(start_paused = true)]
  async fn step_receives_remaining_budget_and_is_bounded_by_it() {
    let deadline = Deadline::after(Duration::from_secs(5));
    tokio::time::advance(Duration::from_secs(2)).await;
    let seen = deadline.run("probe", |remaining| async move { remaining }).await;
    assert_eq!(seen.unwrap(), Duration::from_secs(3));

    let stalled = deadline
      .run("stall", |_| tokio::time::sleep(Duration::from_secs(60)))
      .await;
    assert_eq!(stalled.unwrap_err().operation(), "stall");
  }
}
