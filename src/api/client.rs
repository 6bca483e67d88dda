use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

use crate::config::ApiConfig;
use crate::context::AppContext;

/// Response envelope wrapped around every API payload. `code == 0` is success.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
  pub code: i64,
  #[serde(default)]
  pub msg: String,
  pub data: Option<T>,
}

impl<T> ApiResponse<T> {
  /// Fail on a business error code.
  fn check(self) -> Result<Self> {
    if self.code == 0 {
      Ok(self)
    } else {
      error!(code = self.code, msg = %self.msg, "business error");
      if self.msg.is_empty() {
        Err(eyre!("Request failed"))
      } else {
        Err(eyre!("{}", self.msg))
      }
    }
  }
}

/// Human-readable message for a non-success HTTP status.
pub fn status_message(status: StatusCode) -> String {
  match status {
    StatusCode::BAD_REQUEST => "Invalid request parameters".to_string(),
    StatusCode::UNAUTHORIZED => "Unauthorized, please log in".to_string(),
    StatusCode::FORBIDDEN => "Access denied".to_string(),
    StatusCode::NOT_FOUND => "Resource not found".to_string(),
    StatusCode::INTERNAL_SERVER_ERROR => "Internal server error".to_string(),
    other => format!("Connection error {}", other.as_u16()),
  }
}

/// HTTP transport: attaches the session token, unwraps the envelope, and
/// maps failures to readable errors. A 401 starts the session-expiry flow.
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
  ctx: Arc<AppContext>,
}

impl ApiClient {
  pub fn new(config: &ApiConfig, ctx: Arc<AppContext>) -> Result<Self> {
    // Url::join replaces the last segment unless the base ends with '/'
    let mut base = config.base_url.trim_end_matches('/').to_string();
    base.push('/');
    let base_url =
      Url::parse(&base).map_err(|e| eyre!("Invalid API URL {}: {}", config.base_url, e))?;

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      ctx,
    })
  }

  fn url(&self, path: &str) -> Result<Url> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| eyre!("Invalid request path {}: {}", path, e))
  }

  fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
    let url = self.url(path)?;
    let builder = self.http.request(method, url);
    Ok(match self.ctx.token() {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    })
  }

  pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
    let request = self.request(Method::GET, path)?;
    self.send(request, path).await
  }

  pub async fn get_query<T: DeserializeOwned>(
    &self,
    path: &str,
    query: &[(&str, String)],
  ) -> Result<T> {
    let request = self.request(Method::GET, path)?.query(query);
    self.send(request, path).await
  }

  pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
    &self,
    path: &str,
    body: &B,
  ) -> Result<T> {
    let request = self.request(Method::POST, path)?.json(body);
    self.send(request, path).await
  }

  /// POST without a body, ignoring any payload.
  pub async fn post_empty(&self, path: &str) -> Result<()> {
    let request = self.request(Method::POST, path)?;
    self.send_unit(request, path).await
  }

  /// POST with query parameters and no body, ignoring any payload.
  pub async fn post_query(&self, path: &str, query: &[(&str, String)]) -> Result<()> {
    let request = self.request(Method::POST, path)?.query(query);
    self.send_unit(request, path).await
  }

  pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
    &self,
    path: &str,
    body: &B,
  ) -> Result<T> {
    let request = self.request(Method::PUT, path)?.json(body);
    self.send(request, path).await
  }

  /// PUT with query parameters and no body, ignoring any payload.
  pub async fn put_query(&self, path: &str, query: &[(&str, String)]) -> Result<()> {
    let request = self.request(Method::PUT, path)?.query(query);
    self.send_unit(request, path).await
  }

  pub async fn delete(&self, path: &str) -> Result<()> {
    let request = self.request(Method::DELETE, path)?;
    self.send_unit(request, path).await
  }

  async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, path: &str) -> Result<T> {
    self
      .send_envelope::<T>(request, path)
      .await?
      .data
      .ok_or_else(|| eyre!("Response from {} has no data", path))
  }

  async fn send_unit(&self, request: RequestBuilder, path: &str) -> Result<()> {
    self
      .send_envelope::<serde_json::Value>(request, path)
      .await
      .map(|_| ())
  }

  async fn send_envelope<T: DeserializeOwned>(
    &self,
    request: RequestBuilder,
    path: &str,
  ) -> Result<ApiResponse<T>> {
    debug!(path, "request sent");

    let response = request.send().await.map_err(|e| {
      error!(path, error = %e, "request failed");
      eyre!("Network connection error")
    })?;

    let status = response.status();
    if !status.is_success() {
      error!(path, status = status.as_u16(), "response error");
      if status == StatusCode::UNAUTHORIZED {
        self.ctx.handle_session_expired();
      }
      return Err(eyre!("{}", status_message(status)));
    }

    let envelope: ApiResponse<T> = response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse response from {}: {}", path, e))?;

    envelope.check()
  }
}
