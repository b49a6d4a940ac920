use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Header attached to every response served out of the cache store.
pub const SERVED_FROM_HEADER: &str = "x-served-from";

/// HTTP method of an intercepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
  Options,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
      Method::Options => "OPTIONS",
    }
  }

  /// Verbs whose failed delivery is queued for replay.
  pub fn is_mutating(&self) -> bool {
    matches!(self, Method::Post | Method::Put | Method::Delete)
  }

  /// Verbs that never carry a request body.
  pub fn is_bodiless(&self) -> bool {
    matches!(self, Method::Get | Method::Head)
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Method {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "HEAD" => Ok(Method::Head),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "PATCH" => Ok(Method::Patch),
      "DELETE" => Ok(Method::Delete),
      "OPTIONS" => Ok(Method::Options),
      other => Err(eyre!("Unsupported HTTP method: {}", other)),
    }
  }
}

/// Whether a request is a top-level page navigation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  Navigate,
  #[default]
  Other,
}

/// Credentials policy for outgoing requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Credentials {
  Omit,
  #[default]
  SameOrigin,
  Include,
}

/// Serialized form of an absolute URL with any fragment removed, so that
/// equivalent spellings share one identity. Unparseable input is kept as is.
pub fn normalize_url(raw: impl Into<String>) -> String {
  let raw = raw.into();
  match Url::parse(&raw) {
    Ok(mut url) => {
      url.set_fragment(None);
      url.to_string()
    }
    Err(_) => raw,
  }
}

/// An outgoing request issued by a controlled page
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  /// Absolute URL
  pub url: String,
  pub headers: Vec<(String, String)>,
  pub body: Option<String>,
  pub mode: RequestMode,
  pub credentials: Credentials,
}

impl Request {
  pub fn new(method: Method, url: impl Into<String>) -> Self {
    Self {
      method,
      url: normalize_url(url),
      headers: Vec::new(),
      body: None,
      mode: RequestMode::Other,
      credentials: Credentials::default(),
    }
  }

  pub fn get(url: impl Into<String>) -> Self {
    Self::new(Method::Get, url)
  }

  /// A GET navigation request, as issued when a page is loaded.
  pub fn navigate(url: impl Into<String>) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: impl Into<String>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn with_credentials(mut self, credentials: Credentials) -> Self {
    self.credentials = credentials;
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Path component of the URL, or the raw URL when it cannot be parsed.
  pub fn path(&self) -> String {
    Url::parse(&self.url)
      .map(|u| u.path().to_string())
      .unwrap_or_else(|_| self.url.clone())
  }

  /// Identity used by the cache store. Only GET requests are cacheable.
  pub fn cache_key(&self) -> Option<RequestKey> {
    (self.method == Method::Get).then(|| RequestKey::new(self.method, &self.url))
  }
}

/// Request identity inside a cache namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: Method,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: Method, url: impl Into<String>) -> Self {
    Self {
      method,
      url: normalize_url(url),
    }
  }

  pub fn get(url: impl Into<String>) -> Self {
    Self::new(Method::Get, url)
  }
}

/// Response type as classified by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
  /// Same-origin response
  Basic,
  /// Cross-origin response with readable body
  Cors,
  /// Cross-origin response with no readable status or body
  Opaque,
  /// Synthesized error response
  Error,
}

/// Where a response handed back to a page came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Live response from the network
  Network,
  /// Served from the cache store
  Cache,
  /// Cached offline page substituted for a failed navigation
  OfflineFallback,
  /// Built locally because neither network nor cache could answer
  Synthesized,
}

impl fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ResponseSource::Network => "network",
      ResponseSource::Cache => "cache",
      ResponseSource::OfflineFallback => "offline-fallback",
      ResponseSource::Synthesized => "synthesized",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub response_type: ResponseType,
  pub source: ResponseSource,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
      response_type: ResponseType::Basic,
      source: ResponseSource::Network,
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_type(mut self, response_type: ResponseType) -> Self {
    self.response_type = response_type;
    self
  }

  /// Plain-text 503 returned when a request can be served neither live nor from cache.
  pub fn service_unavailable() -> Self {
    Self {
      status: 503,
      headers: vec![("content-type".to_string(), "text/plain".to_string())],
      body: b"Service Unavailable".to_vec(),
      response_type: ResponseType::Error,
      source: ResponseSource::Synthesized,
    }
  }

  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}
