//! Outbound API gateway client and its interceptor chain.
//!
//! Every call the portal makes to its backing services goes through a single
//! [`GatewayClient`]. The client carries one interceptor pair: a request
//! handler that may add headers, and a response success/error pair. The error
//! handler classifies failures and raises the unauthenticated signal for the
//! ones that mean the session is gone, then re-propagates the original error
//! untouched.

use reqwest::Method;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{Error, Result};
use crate::session::UnauthenticatedSignal;

/// Outbound request descriptor, shaped before any interceptor runs.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        let mut req = Self::new(Method::POST, url);
        req.body = Some(body);
        req
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

/// Response snapshot handed to the success interceptor and then the caller.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// What a failed exchange means for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    /// The session is gone; the unauthenticated signal must fire.
    AuthFailure,
    /// Some other failure; propagated without session side effects.
    OtherError,
}

/// Classifies an exchange by status code and request URL.
///
/// 401 always means the session is gone. 403 means the same, except for the
/// account probe: that endpoint answers 403 for anonymous callers as part of
/// its contract, so a 403 from a URL ending in `/account` stays an ordinary
/// error.
pub fn classify(status: u16, url: &str) -> ResponseClass {
    match status {
        200..=299 => ResponseClass::Success,
        401 => ResponseClass::AuthFailure,
        403 if !is_account_probe(url) => ResponseClass::AuthFailure,
        _ => ResponseClass::OtherError,
    }
}

fn is_account_probe(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().ends_with("/account"),
        // Relative URL: strip query and fragment by hand.
        Err(_) => url
            .split(|c| c == '?' || c == '#')
            .next()
            .unwrap_or(url)
            .ends_with("/account"),
    }
}

pub type RequestHook = Box<dyn Fn(ApiRequest) -> ApiRequest + Send + Sync>;
pub type ResponseHook = Box<dyn Fn(ApiResponse) -> ApiResponse + Send + Sync>;
pub type ErrorHook = Box<dyn Fn(&Error) + Send + Sync>;

/// One request handler plus the matched response success/error pair.
pub struct InterceptorPair {
    pub on_request: RequestHook,
    pub on_response: ResponseHook,
    pub on_error: ErrorHook,
}

/// The authentication interceptors installed at startup.
///
/// The request handler and the success handler are identities: headers the
/// caller set are never rewritten, and success bodies pass through unchanged.
/// The error handler raises `signal` for auth failures and nothing else.
pub fn auth_interceptors(signal: UnauthenticatedSignal) -> InterceptorPair {
    InterceptorPair {
        on_request: Box::new(|req| req),
        on_response: Box::new(|resp| resp),
        on_error: Box::new(move |err| {
            if let Error::Gateway { status, url } = err {
                if classify(*status, url) == ResponseClass::AuthFailure {
                    tracing::debug!(status, url = %url, "session rejected by gateway");
                    signal.raise();
                }
            }
        }),
    }
}

/// Shared HTTP client for the portal's outbound API calls.
pub struct GatewayClient {
    base_url: String,
    http: reqwest::Client,
    default_headers: Vec<(String, String)>,
    interceptors: Option<InterceptorPair>,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            http: reqwest::Client::new(),
            default_headers: vec![("accept".to_string(), "application/json".to_string())],
            interceptors: None,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for an API path.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// Installs the authentication interceptors.
    ///
    /// Called once at startup. Installing a second pair replaces the first;
    /// there is never more than one pair on a client.
    pub fn install(&mut self, signal: UnauthenticatedSignal) {
        self.install_interceptors(auth_interceptors(signal));
    }

    pub fn install_interceptors(&mut self, pair: InterceptorPair) {
        self.interceptors = Some(pair);
    }

    pub fn interceptors(&self) -> Option<&InterceptorPair> {
        self.interceptors.as_ref()
    }

    /// Adds a header applied to every request that did not set it itself.
    pub fn with_default_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.execute(ApiRequest::get(self.url(path))).await
    }

    pub async fn post(&self, path: &str, body: serde_json::Value) -> Result<ApiResponse> {
        self.execute(ApiRequest::post(self.url(path), body)).await
    }

    /// Runs one exchange through the interceptor chain.
    ///
    /// Order: the request handler shapes the request, default headers fill in
    /// whatever is still absent, the exchange runs, and the matching response
    /// handler fires. Failures reach the error handler for its side effect and
    /// are then returned to the caller unchanged.
    pub async fn execute(&self, req: ApiRequest) -> Result<ApiResponse> {
        let mut req = match &self.interceptors {
            Some(pair) => (pair.on_request)(req),
            None => req,
        };
        for (name, value) in &self.default_headers {
            if !req.has_header(name) {
                req.headers.push((name.clone(), value.clone()));
            }
        }

        let request_url = req.url.clone();
        let outcome = self.dispatch(req).await;
        match outcome {
            Ok(resp) if resp.is_success() => Ok(match &self.interceptors {
                Some(pair) => (pair.on_response)(resp),
                None => resp,
            }),
            Ok(resp) => {
                let err = Error::Gateway {
                    status: resp.status,
                    url: request_url,
                };
                self.run_error_hook(&err);
                Err(err)
            }
            Err(err) => {
                self.run_error_hook(&err);
                Err(err)
            }
        }
    }

    fn run_error_hook(&self, err: &Error) {
        if let Some(pair) = &self.interceptors {
            (pair.on_error)(err);
        }
    }

    async fn dispatch(&self, req: ApiRequest) -> Result<ApiResponse> {
        let mut builder = self.http.request(req.method.clone(), &req.url);
        for (name, value) in &req.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }
        let resp = builder.send().await?;
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
        let body = resp.text().await?;
        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
