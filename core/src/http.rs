//! HTTP transport types and the `Transport` seam.
//!
//! # Design
//! Requests and responses are plain data. The dispatcher builds an
//! `HttpRequest`, hands it to a `Transport`, and interprets the returned
//! `HttpResponse`. Non-2xx statuses come back as data, never as transport
//! errors, so status interpretation stays in one place.
//!
//! `UreqTransport` is the production transport. Tests substitute a scripted
//! transport that records every request and every pacing pause.

use std::io;
use std::time::Duration;

use crate::error::ApiError;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// An HTTP request described as plain data.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    /// Value of the first header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// An HTTP response described as plain data.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes requests on behalf of the client.
pub trait Transport {
    /// Perform one round-trip. Only connection-level failures are errors.
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError>;

    /// Block for the pacing interval between paginated requests.
    fn pause(&self, interval: Duration) {
        if !interval.is_zero() {
            std::thread::sleep(interval);
        }
    }
}

impl<T: Transport + ?Sized> Transport for &T {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
        (**self).execute(request)
    }

    fn pause(&self, interval: Duration) {
        (**self).pause(interval)
    }
}

/// Blocking transport backed by a `ureq` agent.
///
/// Retries connection failures up to `max_retries` times. A request that
/// reached the server is never retried.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
    max_retries: u32,
}

impl UreqTransport {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build()
            .new_agent();
        Self { agent, max_retries }
    }

    fn call_once(&self, request: &HttpRequest) -> Result<ureq::http::Response<ureq::Body>, ureq::Error> {
        let url = request.url.as_str();
        match (request.method, request.body.as_deref()) {
            (HttpMethod::Get, _) => with_headers(self.agent.get(url), &request.headers).call(),
            (HttpMethod::Post, Some(body)) => {
                with_headers(self.agent.post(url), &request.headers).send(body.as_bytes())
            }
            (HttpMethod::Post, None) => {
                with_headers(self.agent.post(url), &request.headers).send_empty()
            }
            (HttpMethod::Put, Some(body)) => {
                with_headers(self.agent.put(url), &request.headers).send(body.as_bytes())
            }
            (HttpMethod::Put, None) => with_headers(self.agent.put(url), &request.headers).send_empty(),
            (HttpMethod::Delete, Some(body)) => with_headers(self.agent.delete(url), &request.headers)
                .force_send_body()
                .send(body.as_bytes()),
            (HttpMethod::Delete, None) => {
                with_headers(self.agent.delete(url), &request.headers).call()
            }
        }
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
        let mut response = with_retries(self.max_retries, request, || self.call_once(request))
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Run `attempt` until it returns a response, fails with an error other than
/// a connection failure, or `max_retries` retries are spent. Any response,
/// whatever its status, ends the loop.
fn with_retries<R>(
    max_retries: u32,
    request: &HttpRequest,
    mut attempt: impl FnMut() -> Result<R, ureq::Error>,
) -> Result<R, ureq::Error> {
    let mut retries = 0;
    loop {
        match attempt() {
            Err(err) if retries < max_retries && is_connection_failure(&err) => {
                retries += 1;
                tracing::warn!(
                    method = request.method.as_str(),
                    url = %request.url,
                    attempt = retries,
                    error = %err,
                    "connection failed, retrying"
                );
            }
            result => return result,
        }
    }
}

fn with_headers<B>(
    mut builder: ureq::RequestBuilder<B>,
    headers: &[(String, String)],
) -> ureq::RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

/// Failures where the request never reached the server.
fn is_connection_failure(err: &ureq::Error) -> bool {
    match err {
        ureq::Error::ConnectionFailed | ureq::Error::HostNotFound => true,
        ureq::Error::Io(e) => e.kind() == io::ErrorKind::ConnectionRefused,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = HttpRequest {
            method: HttpMethod::Get,
            url: "http://localhost/api/apps".to_string(),
            headers: vec![("Authorization".to_string(), "Bearer x".to_string())],
            body: None,
        };
        assert_eq!(req.header("authorization"), Some("Bearer x"));
        assert_eq!(req.header("content-type"), None);
    }

    #[test]
    fn success_range_is_2xx() {
        let mut resp = HttpResponse {
            status: 204,
            headers: Vec::new(),
            body: String::new(),
        };
        assert!(resp.is_success());
        resp.status = 302;
        assert!(!resp.is_success());
    }

    #[test]
    fn refused_connection_is_retryable() {
        let err = ureq::Error::Io(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(is_connection_failure(&err));
        assert!(is_connection_failure(&ureq::Error::ConnectionFailed));
        let err = ureq::Error::Io(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(!is_connection_failure(&err));
    }

    fn version_request() -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: "http://localhost/api/version".to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    #[test]
    fn connection_failures_are_retried_max_retries_times() {
        let mut calls = 0;
        let result: Result<u16, _> = with_retries(3, &version_request(), || {
            calls += 1;
            Err(ureq::Error::ConnectionFailed)
        });
        assert!(matches!(result, Err(ureq::Error::ConnectionFailed)));
        assert_eq!(calls, 4);
    }

    #[test]
    fn zero_retries_means_one_attempt() {
        let mut calls = 0;
        let result: Result<u16, _> = with_retries(0, &version_request(), || {
            calls += 1;
            Err(ureq::Error::HostNotFound)
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn responses_are_never_retried() {
        for status in [200_u16, 404, 503] {
            let mut calls = 0;
            let result = with_retries(3, &version_request(), || {
                calls += 1;
                Ok(status)
            });
            assert_eq!(result.unwrap(), status);
            assert_eq!(calls, 1);
        }
    }

    #[test]
    fn recovery_after_refused_connection() {
        let mut calls = 0;
        let result = with_retries(3, &version_request(), || {
            calls += 1;
            if calls < 3 {
                Err(ureq::Error::Io(io::Error::from(io::ErrorKind::ConnectionRefused)))
            } else {
                Ok(200_u16)
            }
        });
        assert_eq!(result.unwrap(), 200);
        assert_eq!(calls, 3);
    }

    #[test]
    fn failures_after_connecting_are_not_retried() {
        let mut calls = 0;
        let result: Result<u16, _> = with_retries(3, &version_request(), || {
            calls += 1;
            Err(ureq::Error::Io(io::Error::from(io::ErrorKind::UnexpectedEof)))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn unreachable_host_exhausts_retries() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let transport = UreqTransport::new(Duration::from_secs(2), 1);
        let req = HttpRequest {
            method: HttpMethod::Get,
            url: format!("http://{addr}/api/version"),
            headers: Vec::new(),
            body: None,
        };
        let err = transport.execute(&req).unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
    }
}
