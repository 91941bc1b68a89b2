//! Network capability of the offline worker.

use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use std::time::Duration;
use tracing::debug;
use url::{Origin, Url};

use super::request::{FetchRequest, RequestMode, ResponseType, StoredResponse};

/// Performs requests the cache could not answer.
///
/// `Err` means the request failed at the network layer. HTTP error statuses
/// are returned as responses.
pub trait Network: Send + Sync {
  fn fetch(&self, request: &FetchRequest) -> BoxFuture<'static, Result<StoredResponse>>;
}

/// Classify a response as seen from `origin`.
pub fn response_type(origin: &Origin, request: &FetchRequest) -> ResponseType {
  if request.url.origin() == *origin {
    ResponseType::Basic
  } else if request.mode == RequestMode::NoCors {
    ResponseType::Opaque
  } else {
    ResponseType::Cors
  }
}

/// reqwest-backed network.
pub struct HttpNetwork {
  http: reqwest::Client,
  origin: Origin,
}

impl HttpNetwork {
  /// Network for a worker serving `scope`.
  pub fn new(scope: &Url, timeout: Duration) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      origin: scope.origin(),
    })
  }
}

impl Network for HttpNetwork {
  fn fetch(&self, request: &FetchRequest) -> BoxFuture<'static, Result<StoredResponse>> {
    let http = self.http.clone();
    let request = request.clone();
    let kind = response_type(&self.origin, &request);

    async move {
      let response = http
        .request(request.method.clone(), request.url.clone())
        .send()
        .await
        .map_err(|e| eyre!("Network request {} failed: {}", request, e))?;

      let status = response.status().as_u16();
      let url = response.url().clone();
      let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
          value
            .to_str()
            .ok()
            .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
      let body = response
        .bytes()
        .await
        .map_err(|e| eyre!("Failed to read body of {}: {}", request, e))?;

      debug!(%request, status, bytes = body.len(), "network response");
      Ok(StoredResponse {
        url,
        status,
        response_type: kind,
        headers,
        body: body.to_vec(),
      })
    }
    .boxed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_response_type_by_origin() {
    let scope = Url::parse("http://localhost:3000/").unwrap();
    let origin = scope.origin();

    let local = FetchRequest::get(scope.join("/index.html").unwrap());
    assert_eq!(response_type(&origin, &local), ResponseType::Basic);

    let cdn = FetchRequest::get(
      Url::parse("https://cdnjs.cloudflare.com/ajax/libs/tailwindcss/2.2.19/tailwind.min.css")
        .unwrap(),
    );
    assert_eq!(response_type(&origin, &cdn), ResponseType::Cors);

    let mut opaque = cdn.clone();
    opaque.mode = RequestMode::NoCors;
    assert_eq!(response_type(&origin, &opaque), ResponseType::Opaque);
  }
}
