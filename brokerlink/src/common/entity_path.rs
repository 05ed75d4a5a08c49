// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
//! Logical entity addresses and their topology-dependent wire forms
//!
//! An [`EntityPath`] names a queue, topic, or subscription, optionally decorated to address its
//! dead-letter queue or its management node. Resolution is a pure function of the path and the
//! [`TopologyModel`] discovered on the connection; nothing is cached, so a path may be resolved
//! against any topology at any time.

use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

pub const PATH_DELIMITER: &str = "/";
pub const SUBSCRIPTIONS_SEGMENT: &str = "Subscriptions";
/// Dead-letter sub-queue segment appended under the standard topology
pub const DEAD_LETTER_SEGMENT: &str = "$deadletter";
/// The broker-wide dead-letter address exposed by Artemis brokers
pub const ARTEMIS_DEAD_LETTER_ADDRESS: &str = "DLQ";
pub const ARTEMIS_SUBSCRIPTION_SEPARATOR: &str = "::";
/// Well-known node accepting management requests for an entity
pub const MANAGEMENT_ADDRESS: &str = "$management";

/// Broker family on the far side of a connection, governing address syntax
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyModel {
  /// Standard topology: sub-entities are `/`-separated path segments
  ServiceBus,
  /// ActiveMQ Artemis: fully-qualified queue names and one dead-letter address
  Artemis,
}

impl Default for TopologyModel {
  fn default() -> Self {
    Self::ServiceBus
  }
}

impl TopologyModel {
  const ARTEMIS_PRODUCT_PREFIX: &'static str = "apache-activemq-artemis";

  /// Selects a topology from the `product` a peer announced during the open handshake
  pub fn from_product(product: Option<&str>) -> Self {
    let is_artemis = product
      .and_then(|product| product.get(..Self::ARTEMIS_PRODUCT_PREFIX.len()))
      .map_or(false, |prefix| {
        prefix.eq_ignore_ascii_case(Self::ARTEMIS_PRODUCT_PREFIX)
      });
    if is_artemis {
      Self::Artemis
    } else {
      Self::ServiceBus
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::ServiceBus => "servicebus",
      Self::Artemis => "artemis",
    }
  }
}

impl fmt::Display for TopologyModel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown topology model {0:?}; expected \"servicebus\" or \"artemis\"")]
pub struct UnknownTopologyModel(String);

impl FromStr for TopologyModel {
  type Err = UnknownTopologyModel;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "servicebus" | "service-bus" => Ok(Self::ServiceBus),
      "artemis" => Ok(Self::Artemis),
      _ => Err(UnknownTopologyModel(s.to_owned())),
    }
  }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EntityPathError {
  #[error("{0} must not be empty or whitespace")]
  EmptyName(&'static str),
}

/// A validated, non-blank entity name
#[derive(Clone, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct EntityName(Arc<str>);

impl EntityName {
  pub fn new<T: AsRef<str>>(name: T, what: &'static str) -> Result<Self, EntityPathError> {
    let name = name.as_ref();
    if name.trim().is_empty() {
      return Err(EntityPathError::EmptyName(what));
    }
    Ok(Self(Arc::from(name)))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Debug for EntityName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(&*self.0, f)
  }
}

impl fmt::Display for EntityName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueuePath(EntityName);

impl QueuePath {
  pub fn new<T: AsRef<str>>(queue_name: T) -> Result<Self, EntityPathError> {
    EntityName::new(queue_name, "Queue name").map(Self)
  }

  pub fn name(&self) -> &EntityName {
    &self.0
  }

  fn resolve(&self, _topology: TopologyModel) -> String {
    self.0.as_str().to_owned()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPath(EntityName);

impl TopicPath {
  pub fn new<T: AsRef<str>>(topic_name: T) -> Result<Self, EntityPathError> {
    EntityName::new(topic_name, "Topic name").map(Self)
  }

  pub fn name(&self) -> &EntityName {
    &self.0
  }

  fn resolve(&self, _topology: TopologyModel) -> String {
    self.0.as_str().to_owned()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionPath {
  topic: TopicPath,
  subscription: EntityName,
}

impl SubscriptionPath {
  pub fn new<T: AsRef<str>, S: AsRef<str>>(
    topic_name: T,
    subscription_name: S,
  ) -> Result<Self, EntityPathError> {
    Ok(Self {
      topic: TopicPath::new(topic_name)?,
      subscription: EntityName::new(subscription_name, "Subscription name")?,
    })
  }

  pub fn topic(&self) -> &TopicPath {
    &self.topic
  }

  pub fn subscription_name(&self) -> &EntityName {
    &self.subscription
  }

  fn resolve(&self, topology: TopologyModel) -> String {
    let topic = self.topic.resolve(topology);
    match topology {
      TopologyModel::Artemis => {
        format!("{}{}{}", topic, ARTEMIS_SUBSCRIPTION_SEPARATOR, self.subscription)
      }
      TopologyModel::ServiceBus => format!(
        "{}{}{}{}{}",
        topic, PATH_DELIMITER, SUBSCRIPTIONS_SEGMENT, PATH_DELIMITER, self.subscription
      ),
    }
  }
}

/// Logical address of an entity or one of its sub-addresses
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityPath {
  /// An entity of unspecified kind, addressed by its name alone
  Entity(EntityName),
  Queue(QueuePath),
  Topic(TopicPath),
  Subscription(SubscriptionPath),
  /// The dead-letter sub-queue of a queue
  DeadLetterQueue(QueuePath),
  /// The dead-letter sub-queue of a subscription
  SubscriptionDeadLetter(SubscriptionPath),
  /// The management node of another path
  Management(Box<EntityPath>),
}

impl EntityPath {
  pub fn entity<T: AsRef<str>>(name: T) -> Result<Self, EntityPathError> {
    EntityName::new(name, "Entity path").map(Self::Entity)
  }

  pub fn queue<T: AsRef<str>>(queue_name: T) -> Result<Self, EntityPathError> {
    QueuePath::new(queue_name).map(Self::Queue)
  }

  pub fn topic<T: AsRef<str>>(topic_name: T) -> Result<Self, EntityPathError> {
    TopicPath::new(topic_name).map(Self::Topic)
  }

  pub fn subscription<T: AsRef<str>, S: AsRef<str>>(
    topic_name: T,
    subscription_name: S,
  ) -> Result<Self, EntityPathError> {
    SubscriptionPath::new(topic_name, subscription_name).map(Self::Subscription)
  }

  pub fn dead_letter_queue<T: AsRef<str>>(queue_name: T) -> Result<Self, EntityPathError> {
    QueuePath::new(queue_name).map(Self::DeadLetterQueue)
  }

  pub fn subscription_dead_letter<T: AsRef<str>, S: AsRef<str>>(
    topic_name: T,
    subscription_name: S,
  ) -> Result<Self, EntityPathError> {
    SubscriptionPath::new(topic_name, subscription_name).map(Self::SubscriptionDeadLetter)
  }

  /// Wraps this path to address its management node
  pub fn management(self) -> Self {
    Self::Management(Box::new(self))
  }

  /// Produces the wire address of this path under `topology`
  pub fn resolve(&self, topology: TopologyModel) -> String {
    match self {
      Self::Entity(name) => name.as_str().to_owned(),
      Self::Queue(queue) => queue.resolve(topology),
      Self::Topic(topic) => topic.resolve(topology),
      Self::Subscription(subscription) => subscription.resolve(topology),
      Self::DeadLetterQueue(_) | Self::SubscriptionDeadLetter(_)
        if topology == TopologyModel::Artemis =>
      {
        ARTEMIS_DEAD_LETTER_ADDRESS.to_owned()
      }
      Self::DeadLetterQueue(queue) => {
        format!("{}{}{}", queue.resolve(topology), PATH_DELIMITER, DEAD_LETTER_SEGMENT)
      }
      // No dead-letter suffix is added here; the subscription's address is used as-is.
      Self::SubscriptionDeadLetter(subscription) => subscription.resolve(topology),
      Self::Management(inner) => {
        format!("{}{}{}", inner.resolve(topology), PATH_DELIMITER, MANAGEMENT_ADDRESS)
      }
    }
  }

  /// The plain entity name this path was built from, regardless of decoration
  pub fn base_name(&self) -> &EntityName {
    match self {
      Self::Entity(name) => name,
      Self::Queue(queue) | Self::DeadLetterQueue(queue) => queue.name(),
      Self::Topic(topic) => topic.name(),
      Self::Subscription(subscription) | Self::SubscriptionDeadLetter(subscription) => {
        subscription.topic().name()
      }
      Self::Management(inner) => inner.base_name(),
    }
  }
}

impl fmt::Display for EntityPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(self.base_name(), f)
  }
}

pub fn format_dead_letter_path<T: AsRef<str>>(entity_path: T) -> Result<EntityPath, EntityPathError> {
  EntityPath::dead_letter_queue(entity_path)
}

pub fn format_subscription_path<T: AsRef<str>, S: AsRef<str>>(
  topic_path: T,
  subscription_name: S,
) -> Result<EntityPath, EntityPathError> {
  EntityPath::subscription(topic_path, subscription_name)
}
