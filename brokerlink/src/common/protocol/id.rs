// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

/// Runtime identifier of a connection, session, or link, unique within the process
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ObjectId(u64);

impl ObjectId {
  pub fn new(inner: u64) -> ObjectId {
    Self(inner)
  }

  pub fn inner(&self) -> u64 {
    self.0
  }

  /// Allocates from the process-wide generator
  pub fn next() -> ObjectId {
    static GENERATOR: MonotonicAtomicGenerator = MonotonicAtomicGenerator::new(1);
    GENERATOR.next()
  }
}

impl From<u64> for ObjectId {
  fn from(inner: u64) -> Self {
    Self::new(inner)
  }
}

impl From<ObjectId> for u64 {
  fn from(id: ObjectId) -> Self {
    id.inner()
  }
}

impl std::fmt::Debug for ObjectId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("ObjectId").field(&self.inner()).finish()
  }
}

impl std::fmt::Display for ObjectId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    std::fmt::Display::fmt(&self.0, f)
  }
}

pub struct MonotonicAtomicGenerator {
  next: std::sync::atomic::AtomicU64,
}

impl MonotonicAtomicGenerator {
  pub const fn new(next: u64) -> Self {
    Self {
      next: std::sync::atomic::AtomicU64::new(next),
    }
  }

  pub fn next(&self) -> ObjectId {
    ObjectId::new(self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
  }
}
