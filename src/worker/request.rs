//! Request and response snapshots handled by the offline worker.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// How the request was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  Navigate,
  SameOrigin,
  Cors,
  NoCors,
}

/// What the response will be used as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
  Document,
  Script,
  Style,
  Image,
  Font,
  Empty,
}

/// An outgoing request seen by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub destination: Destination,
}

impl FetchRequest {
  /// A plain subresource GET.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::Cors,
      destination: Destination::Empty,
    }
  }

  /// A page navigation.
  pub fn navigate(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::Navigate,
      destination: Destination::Document,
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate || self.destination == Destination::Document
  }

  /// Stable identity of the request inside a store: method plus URL,
  /// ignoring any fragment.
  pub fn request_hash(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);

    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(url.as_str().as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for FetchRequest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// Where a response came from, as far as caching is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
  /// Same-origin response
  Basic,
  /// Cross-origin response with CORS headers
  Cors,
  /// Cross-origin response the caller cannot read
  Opaque,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
    }
  }
}

impl FromStr for ResponseType {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "basic" => Ok(Self::Basic),
      "cors" => Ok(Self::Cors),
      "opaque" => Ok(Self::Opaque),
      other => Err(eyre!("Unknown response type: {}", other)),
    }
  }
}

/// A fully read response: status, headers and body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
  pub url: Url,
  pub status: u16,
  pub response_type: ResponseType,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl StoredResponse {
  pub fn new(url: Url, status: u16, response_type: ResponseType, body: impl Into<Vec<u8>>) -> Self {
    Self {
      url,
      status,
      response_type,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}
