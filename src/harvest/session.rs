//! Authenticated HTTP session with transparent access-token refresh.
//!
//! Every call goes through [`Session::send`]. A 401 response triggers one
//! token refresh followed by one retry of the same request; any failure after
//! that is returned to the caller.

use reqwest::{Client, Method, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use url::Url;

use super::api_types::{ApiRefreshRequest, ApiRefreshResponse};
use crate::error::{Error, Result};

pub const DEFAULT_API_URL: &str = "https://api.harvestapp.com/api/v2/";
pub const DEFAULT_REFRESH_URL: &str = "https://scythe.seancollings.dev/refresh";
const USER_AGENT: &str = concat!("Scythe CLI/", env!("CARGO_PKG_VERSION"));
const ACCOUNT_HEADER: &str = "Harvest-Account-Id";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
  pub access_token: String,
  pub refresh_token: String,
}

/// Where to send requests and which account they are for
#[derive(Debug, Clone)]
pub struct SessionConfig {
  pub base_url: Url,
  pub refresh_url: Url,
  pub account_id: String,
}

impl SessionConfig {
  pub fn new(account_id: impl Into<String>) -> Result<Self> {
    Ok(Self {
      base_url: Url::parse(DEFAULT_API_URL)?,
      refresh_url: Url::parse(DEFAULT_REFRESH_URL)?,
      account_id: account_id.into(),
    })
  }

  pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
    // Url::join drops the last segment unless the base ends with a slash
    let base_url = if base_url.ends_with('/') {
      base_url.to_string()
    } else {
      format!("{}/", base_url)
    };
    self.base_url = Url::parse(&base_url)?;
    Ok(self)
  }

  pub fn with_refresh_url(mut self, refresh_url: &str) -> Result<Self> {
    self.refresh_url = Url::parse(refresh_url)?;
    Ok(self)
  }
}

/// A request that can be sent more than once.
#[derive(Debug, Clone)]
pub struct ApiRequest {
  pub method: Method,
  /// Path relative to the API base URL
  pub path: String,
  pub query: Vec<(String, String)>,
  pub body: Option<serde_json::Value>,
}

impl ApiRequest {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      query: Vec::new(),
      body: None,
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::GET, path)
  }

  pub fn post(path: impl Into<String>) -> Self {
    Self::new(Method::POST, path)
  }

  pub fn patch(path: impl Into<String>) -> Self {
    Self::new(Method::PATCH, path)
  }

  pub fn delete(path: impl Into<String>) -> Self {
    Self::new(Method::DELETE, path)
  }

  pub fn query(mut self, query: Vec<(String, String)>) -> Self {
    self.query.extend(query);
    self
  }

  pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self> {
    self.body = Some(serde_json::to_value(body)?);
    Ok(self)
  }
}

type RefreshCallback = Arc<dyn Fn(&Credentials) + Send + Sync>;

/// HTTP session for the Harvest API.
///
/// Clones share credentials, so a refresh seen by one clone is seen by all.
#[derive(Clone)]
pub struct Session {
  http: Client,
  config: SessionConfig,
  credentials: Arc<Mutex<Credentials>>,
  on_refresh: Option<RefreshCallback>,
}

impl Session {
  pub fn new(config: SessionConfig, credentials: Credentials) -> Result<Self> {
    let http = Client::builder().user_agent(USER_AGENT).build()?;

    Ok(Self {
      http,
      config,
      credentials: Arc::new(Mutex::new(credentials)),
      on_refresh: None,
    })
  }

  /// Register a callback invoked with the new credentials after every
  /// successful refresh, so the caller can persist them.
  pub fn on_refresh(mut self, callback: impl Fn(&Credentials) + Send + Sync + 'static) -> Self {
    self.on_refresh = Some(Arc::new(callback));
    self
  }

  /// Current in-memory credentials.
  #[cfg(test)]
  pub fn credentials(&self) -> Credentials {
    self.lock().clone()
  }

  fn lock(&self) -> MutexGuard<'_, Credentials> {
    self.credentials.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Send a request, refreshing the access token once if it was rejected.
  pub async fn send(&self, request: &ApiRequest) -> Result<Response> {
    match self.dispatch(request).await {
      Err(e) if e.is_unauthorized() => {
        tracing::info!(method = %request.method, path = %request.path, "access token rejected, refreshing");

        if let Err(refresh_error) = self.refresh().await {
          tracing::warn!(error = %refresh_error, "token refresh failed");
          return Err(e.into_refresh_failure(refresh_error));
        }

        self.dispatch(request).await
      }
      result => result,
    }
  }

  /// Send a request and decode the JSON response body.
  pub async fn send_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T> {
    let bytes = self.send(request).await?.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
  }

  /// Send a request and ignore the response body.
  pub async fn send_empty(&self, request: &ApiRequest) -> Result<()> {
    self.send(request).await?;
    Ok(())
  }

  /// Exchange the refresh token for a new access token.
  ///
  /// On success the in-memory credentials are replaced and the refresh
  /// callback runs once.
  pub async fn refresh(&self) -> Result<Credentials> {
    let refresh_token = self.lock().refresh_token.clone();

    let response = self
      .http
      .post(self.config.refresh_url.clone())
      .json(&ApiRefreshRequest {
        refresh_token: &refresh_token,
      })
      .send()
      .await?;
    let bytes = check_response(response).await?.bytes().await?;
    let data: ApiRefreshResponse = serde_json::from_slice(&bytes)?;

    let credentials = Credentials {
      access_token: data.access_token,
      refresh_token: data.refresh_token.unwrap_or(refresh_token),
    };
    *self.lock() = credentials.clone();
    tracing::info!("access token refreshed");

    if let Some(callback) = &self.on_refresh {
      callback(&credentials);
    }

    Ok(credentials)
  }

  /// Send one attempt with the current credentials.
  async fn dispatch(&self, request: &ApiRequest) -> Result<Response> {
    let url = self
      .config
      .base_url
      .join(request.path.trim_start_matches('/'))?;
    let access_token = self.lock().access_token.clone();

    let mut builder = self
      .http
      .request(request.method.clone(), url)
      .bearer_auth(access_token)
      .header(ACCOUNT_HEADER, &self.config.account_id);

    if !request.query.is_empty() {
      builder = builder.query(&request.query);
    }
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    tracing::debug!(method = %request.method, path = %request.path, "sending request");
    let response = builder.send().await?;
    check_response(response).await
  }
}

/// Turn any non-2xx response into [`Error::Request`].
async fn check_response(response: Response) -> Result<Response> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }

  let body = response.text().await.unwrap_or_default();
  tracing::debug!(status = status.as_u16(), "request failed");
  Err(Error::Request { status, body })
}
