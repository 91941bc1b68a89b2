//! Structured query keys and invalidation filters.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Logical resource tag, e.g. `quotes` or `system-health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Resource(&'static str);

impl Resource {
  pub const fn new(name: &'static str) -> Self {
    Self(name)
  }

  pub fn name(&self) -> &'static str {
    self.0
  }
}

impl fmt::Display for Resource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.0)
  }
}

/// A single query parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamValue {
  Bool(bool),
  Int(i64),
  Text(String),
}

impl From<bool> for ParamValue {
  fn from(value: bool) -> Self {
    Self::Bool(value)
  }
}

impl From<i64> for ParamValue {
  fn from(value: i64) -> Self {
    Self::Int(value)
  }
}

impl From<u32> for ParamValue {
  fn from(value: u32) -> Self {
    Self::Int(i64::from(value))
  }
}

impl From<&str> for ParamValue {
  fn from(value: &str) -> Self {
    Self::Text(value.to_string())
  }
}

impl From<String> for ParamValue {
  fn from(value: String) -> Self {
    Self::Text(value)
  }
}

impl fmt::Display for ParamValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Bool(b) => write!(f, "{}", b),
      Self::Int(i) => write!(f, "{}", i),
      Self::Text(s) => write!(f, "{:?}", s),
    }
  }
}

/// Canonical parameter record.
///
/// Parameters are kept sorted by name and absent values are never stored, so
/// two records describing the same parameters compare and hash equal no matter
/// the order they were built in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a parameter, replacing any previous value under the same name.
  pub fn with(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
    self.0.insert(name.to_string(), value.into());
    self
  }

  /// Add a parameter only when a value is present.
  pub fn with_opt<V: Into<ParamValue>>(self, name: &str, value: Option<V>) -> Self {
    match value {
      Some(v) => self.with(name, v),
      None => self,
    }
  }

  pub fn get(&self, name: &str) -> Option<&ParamValue> {
    self.0.get(name)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v))
  }
}

/// Identity of one cache entry: a resource tag plus its parameter record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
  resource: Resource,
  params: Params,
}

impl QueryKey {
  pub fn new(resource: Resource, params: Params) -> Self {
    Self { resource, params }
  }

  /// Key for a resource without parameters.
  pub fn resource_only(resource: Resource) -> Self {
    Self::new(resource, Params::new())
  }

  pub fn resource(&self) -> Resource {
    self.resource
  }

  pub fn params(&self) -> &Params {
    &self.params
  }

  /// Stable fixed-length digest of the key, used in logs and persisted records.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.to_string().as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.resource)?;
    if self.params.is_empty() {
      return Ok(());
    }
    f.write_str("{")?;
    for (i, (name, value)) in self.params.iter().enumerate() {
      if i > 0 {
        f.write_str(",")?;
      }
      write!(f, "{}={}", name, value)?;
    }
    f.write_str("}")
  }
}

/// Selects cache entries for invalidation or removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFilter {
  /// Exactly one key.
  Exact(QueryKey),
  /// Every key of a resource, whatever its parameters.
  Resource(Resource),
  /// Every key.
  All,
}

impl KeyFilter {
  pub fn matches(&self, key: &QueryKey) -> bool {
    match self {
      Self::Exact(k) => k == key,
      Self::Resource(r) => key.resource == *r,
      Self::All => true,
    }
  }
}

impl From<QueryKey> for KeyFilter {
  fn from(key: QueryKey) -> Self {
    Self::Exact(key)
  }
}

impl From<Resource> for KeyFilter {
  fn from(resource: Resource) -> Self {
    Self::Resource(resource)
  }
}
