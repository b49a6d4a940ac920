use crate::config::Config;
use crate::net::types::{Credentials, Method, Request, Response, ResponseSource, ResponseType};
use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use url::Url;

/// Live transport used by the router, the lifecycle manager and the replay loop.
///
/// `fetch` rejects only when the request never produced a response (DNS,
/// connection refused, TLS). Error statuses come back as `Ok` responses.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// reqwest-backed network client
#[derive(Clone)]
pub struct HttpNetwork {
  /// Client sharing a cookie jar, used for `Credentials::Include`
  client: reqwest::Client,
  /// Client that never sends cookies
  anonymous: reqwest::Client,
  origin: Url,
}

impl HttpNetwork {
  pub fn new(config: &Config) -> Result<Self> {
    let client = reqwest::Client::builder()
      .cookie_store(true)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    let anonymous = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      anonymous,
      origin: config.origin_url()?,
    })
  }

  fn is_same_origin(&self, url: &Url) -> bool {
    url.origin() == self.origin.origin()
  }

  /// Whether a request to `url` carries the shared cookie jar.
  fn sends_cookies(&self, credentials: Credentials, url: &Url) -> bool {
    match credentials {
      Credentials::Include => true,
      Credentials::SameOrigin => self.is_same_origin(url),
      Credentials::Omit => false,
    }
  }

  fn response_type(&self, url: &Url) -> ResponseType {
    if self.is_same_origin(url) {
      ResponseType::Basic
    } else {
      ResponseType::Cors
    }
  }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Head => reqwest::Method::HEAD,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Patch => reqwest::Method::PATCH,
    Method::Delete => reqwest::Method::DELETE,
    Method::Options => reqwest::Method::OPTIONS,
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let url = Url::parse(&request.url).map_err(|e| eyre!("Invalid URL {}: {}", request.url, e))?;
    let response_type = self.response_type(&url);

    let client = if self.sends_cookies(request.credentials, &url) {
      &self.client
    } else {
      &self.anonymous
    };

    let mut builder = client.request(to_reqwest_method(request.method), url);
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      if !request.method.is_bodiless() {
        builder = builder.body(body.clone());
      }
    }

    let resp = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {} {}: {}", request.method, request.url, e))?;

    let status = resp.status().as_u16();
    let headers = resp
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = resp
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response {
      status,
      headers,
      body: body.to_vec(),
      response_type,
      source: ResponseSource::Network,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn network() -> HttpNetwork {
    HttpNetwork::new(&Config::default()).unwrap()
  }

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_same_origin_responses_are_basic() {
    let network = network();
    assert_eq!(
      network.response_type(&url("http://localhost:3000/static/js/main.js")),
      ResponseType::Basic
    );
    assert_eq!(
      network.response_type(&url("http://localhost:8080/static/js/main.js")),
      ResponseType::Cors
    );
    assert_eq!(
      network.response_type(&url("https://localhost:3000/")),
      ResponseType::Cors
    );
    assert_eq!(
      network.response_type(&url("https://cdn.example.com/lib.js")),
      ResponseType::Cors
    );
  }

  #[test]
  fn test_cookie_selection_follows_credentials_mode() {
    let network = network();
    let own = url("http://localhost:3000/api/hunters");
    let foreign = url("https://cdn.example.com/lib.js");

    assert!(network.sends_cookies(Credentials::Include, &own));
    assert!(network.sends_cookies(Credentials::Include, &foreign));
    assert!(network.sends_cookies(Credentials::SameOrigin, &own));
    assert!(!network.sends_cookies(Credentials::SameOrigin, &foreign));
    assert!(!network.sends_cookies(Credentials::Omit, &own));
  }

  #[test]
  fn test_invalid_origin_fails_construction() {
    let config = Config {
      origin: "not a url".to_string(),
      ..Config::default()
    };
    assert!(HttpNetwork::new(&config).is_err());
  }
}
