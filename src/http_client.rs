use anyhow::{Context, Result};
use reqwest::cookie::Jar;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};
use url::Url;

/// HTTP method enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    GET,
    POST,
    PUT,
    PATCH,
    DELETE,
}

impl HttpMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::GET => reqwest::Method::GET,
            HttpMethod::POST => reqwest::Method::POST,
            HttpMethod::PUT => reqwest::Method::PUT,
            HttpMethod::PATCH => reqwest::Method::PATCH,
            HttpMethod::DELETE => reqwest::Method::DELETE,
        }
    }
}

/// An outbound request. Cloneable so it can be replayed unchanged apart from
/// its headers.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    /// Header names are stored lower-cased
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::POST, url)
    }

    /// Add or replace a header
    pub fn with_header(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.set_header(key, value);
        self
    }

    /// Set a raw body
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `data` as the JSON body
    pub fn with_json<T: Serialize>(self, data: &T) -> Result<Self> {
        let body = serde_json::to_string(data)?;
        Ok(self
            .with_header("content-type", "application/json")
            .with_body(body))
    }

    pub fn set_header(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.headers
            .insert(key.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn remove_header(&mut self, key: &str) {
        self.headers.remove(&key.to_ascii_lowercase());
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// A very simple version that only holds response data
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleHttpResponse {
    /// HTTP status code
    status_code: u16,
    /// Response body
    body: String,
    /// Response headers, names lower-cased
    headers: HashMap<String, String>,
}

impl SimpleHttpResponse {
    /// Create a new response
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status_code: status,
            body: body.into(),
            headers: HashMap::new(),
        }
    }

    /// Add a header
    pub fn with_header(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(key.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Get the status code
    pub fn status(&self) -> u16 {
        self.status_code
    }

    /// Get a reference to the response body
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Case-insensitive header lookup
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Get the body as text (consumes the response)
    pub fn text(self) -> String {
        self.body
    }

    /// Parse body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Check if successful (2xx status)
    pub fn is_success(&self) -> bool {
        self.status_code >= 200 && self.status_code < 300
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status_code == http::StatusCode::UNAUTHORIZED.as_u16()
    }
}

/// Trait for HTTP client operations, allowing for mocking
#[async_trait::async_trait]
pub trait HttpClient: Send + Sync {
    /// Send a request and collect the whole response
    async fn execute(&self, request: HttpRequest) -> Result<SimpleHttpResponse>;

    /// Overwrite the named cookie with an empty, already-expired value
    fn expire_cookie(&self, name: &str);

    /// Perform HTTP GET request and return a SimpleHttpResponse
    async fn get(&self, url: &str, headers: HashMap<String, String>) -> Result<SimpleHttpResponse> {
        let mut request = HttpRequest::get(url);
        for (key, value) in headers {
            request.set_header(key, value);
        }
        self.execute(request).await
    }
}

/// Implementation of HttpClient using reqwest. Cookies set by the backend
/// (the refresh credential) live in a jar shared by every request, the way a
/// browser keeps same-origin cookies.
pub struct ReqwestHttpClient {
    /// Internal reqwest client
    client: reqwest::Client,
    /// Cookie jar attached to `client`
    cookies: Arc<Jar>,
    /// Origin the jar's cookies belong to
    origin: Url,
}

impl ReqwestHttpClient {
    /// Create a client whose cookies are scoped to `base_url`
    pub fn new(base_url: &str) -> Result<Self> {
        let origin =
            Url::parse(base_url).with_context(|| format!("invalid base url: {}", base_url))?;
        let cookies = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&cookies))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            cookies,
            origin,
        })
    }

    /// Put a raw `Set-Cookie` style value into the jar
    pub fn set_cookie(&self, cookie: &str) {
        self.cookies.add_cookie_str(cookie, &self.origin);
    }
}

#[async_trait::async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<SimpleHttpResponse> {
        trace!(method = ?request.method, url = %request.url, "Sending request");
        let mut builder = self
            .client
            .request(request.method.as_reqwest(), &request.url);

        // Add headers
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        // Send request
        let response = builder.send().await?;

        // Convert to SimpleHttpResponse
        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|value| (k.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.text().await?;

        let mut result = SimpleHttpResponse::new(status, body);
        for (key, value) in headers {
            result = result.with_header(key, value);
        }

        Ok(result)
    }

    fn expire_cookie(&self, name: &str) {
        debug!(cookie = %name, "Expiring cookie");
        self.set_cookie(&format!(
            "{}=; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Path=/",
            name
        ));
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[tokio::test]
    async fn test_mock_http_client() -> Result<()> {
        use mock::MockHttpClient;

        let client = MockHttpClient::new();
        client.mock_response("https://example.com/api", 200, "Hello, world!");

        let test_data = serde_json::json!({"id": 1, "nickname": "dailog"});
        client.mock_json("https://example.com/api/json", 200, &test_data)?;
        client.mock_response("https://example.com/api/error", 404, "Not found");

        let response = client.get("https://example.com/api", HashMap::new()).await?;
        assert_eq!(response.status(), 200);
        assert_eq!(response.text(), "Hello, world!");

        let response = client
            .get("https://example.com/api/json", HashMap::new())
            .await?;
        assert_eq!(response.header("Content-Type"), Some("application/json"));
        let json: serde_json::Value = response.json()?;
        assert_eq!(json, test_data);

        let response = client
            .get("https://example.com/api/error", HashMap::new())
            .await?;
        assert_eq!(response.status(), 404);

        // Missing URL
        let result = client
            .get("https://example.com/not-found", HashMap::new())
            .await;
        assert!(result.is_err());

        let requests = client.get_requests();
        assert_eq!(requests.len(), 4);
        assert_eq!(requests[0].url, "https://example.com/api");
        assert_eq!(requests[0].method, HttpMethod::GET);

        Ok(())
    }

    #[tokio::test]
    async fn test_mock_queue_is_consumed_then_sticky() -> Result<()> {
        use mock::MockHttpClient;

        let client = MockHttpClient::new();
        let url = "https://example.com/api/posts";
        client.queue_response(url, SimpleHttpResponse::new(401, "expired"));
        client.queue_response(url, SimpleHttpResponse::new(200, "ok"));

        assert_eq!(client.execute(HttpRequest::get(url)).await?.status(), 401);
        assert_eq!(client.execute(HttpRequest::get(url)).await?.status(), 200);
        assert_eq!(client.execute(HttpRequest::get(url)).await?.status(), 200);

        client.queue_transport_error("https://example.com/down", "connection refused");
        assert!(client
            .execute(HttpRequest::get("https://example.com/down"))
            .await
            .is_err());

        client.expire_cookie("refresh");
        assert_eq!(client.expired_cookies(), vec!["refresh".to_string()]);
        Ok(())
    }

    #[test]
    fn test_request_headers_are_case_insensitive() {
        let mut request = HttpRequest::get("https://example.com")
            .with_header("Authorization", "Bearer old");
        request.set_header("authorization", "Bearer new");
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.header("AUTHORIZATION"), Some("Bearer new"));

        request.remove_header("Authorization");
        assert!(request.header("authorization").is_none());
    }

    #[test]
    fn test_json_body_sets_content_type() -> Result<()> {
        let request = HttpRequest::post("https://example.com/api/auth/login")
            .with_json(&serde_json::json!({"email": "a@b.co"}))?;
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.body.as_deref(), Some(r#"{"email":"a@b.co"}"#));
        Ok(())
    }

    #[test]
    fn test_reqwest_client_rejects_bad_base_url() {
        assert!(ReqwestHttpClient::new("not a url").is_err());
        assert!(ReqwestHttpClient::new("http://localhost:8080").is_ok());
    }
}
