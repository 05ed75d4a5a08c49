// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
//! Typed capabilities attached to a connection after it opens

use std::{any::TypeId, fmt::Debug, sync::Arc};

use dashmap::DashMap;
use downcast_rs::{impl_downcast, DowncastSync};

/// A capability which may be registered on a connection, at most once per type
pub trait ConnectionExtension: DowncastSync + Debug {}
impl_downcast!(sync ConnectionExtension);

/// A registry of extensions, queried by concrete type
#[derive(Default)]
pub struct Extensions {
  items: DashMap<TypeId, Arc<dyn ConnectionExtension>>,
}

impl Extensions {
  pub fn new() -> Self {
    Default::default()
  }

  pub fn find<T: ConnectionExtension>(&self) -> Option<Arc<T>> {
    let item = self.items.get(&TypeId::of::<T>())?.value().clone();
    item.downcast_arc::<T>().ok()
  }

  pub fn contains<T: ConnectionExtension>(&self) -> bool {
    self.items.contains_key(&TypeId::of::<T>())
  }

  /// Registers `extension` unless one of its type is already present.
  ///
  /// Returns the registered instance, which is the pre-existing one if there was one.
  pub fn get_or_insert<T: ConnectionExtension>(&self, extension: T) -> Arc<T> {
    self.get_or_insert_with(move || extension)
  }

  pub fn get_or_insert_with<T: ConnectionExtension, F: FnOnce() -> T>(&self, create: F) -> Arc<T> {
    let entry = self
      .items
      .entry(TypeId::of::<T>())
      .or_insert_with(|| Arc::new(create()) as Arc<dyn ConnectionExtension>)
      .value()
      .clone();
    match entry.downcast_arc::<T>() {
      Ok(extension) => extension,
      Err(_) => unreachable!("Extensions are keyed by their own type id"),
    }
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

impl Debug for Extensions {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_list()
      .entries(self.items.iter().map(|item| format!("{:?}", item.value())))
      .finish()
  }
}
