use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::Bytes;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::service::Service as HyperService;
use hyper::{Request, Response, StatusCode, Uri, body::Incoming as IncomingBody};
use hyper_util::rt::TokioIo;
use log::{debug, trace, warn};
use tokio::net::TcpStream;
use url::Url;

use crate::acme::ACME_CHALLENGE_PREFIX;
use crate::error::ProxyError;
use crate::tls::CertificateManager;

pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Headers that only describe a single hop and are never forwarded
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "upgrade",
];

/// The backend requests are forwarded to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    /// `host:port` to connect to
    address: String,
}

impl Upstream {
    pub fn from_url(url: &Url) -> Result<Self, ProxyError> {
        let host = url.host_str().ok_or_else(|| ProxyError::ConfigError {
            field: "upstream".to_string(),
            message: format!("`{url}` has no host"),
        })?;
        let port = url.port_or_known_default().unwrap_or(80);

        Ok(Upstream {
            address: format!("{host}:{port}"),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

/// Serves http-01 validation requests and forwards everything else to the upstream.
///
/// One instance is cloned per accepted connection via [`ProxyService::for_connection`] so the
/// forwarding headers know who the client is.
#[derive(Clone)]
pub struct ProxyService {
    manager: CertificateManager,
    upstream: Arc<Upstream>,
    remote: Option<SocketAddr>,
    tls: bool,
}

impl ProxyService {
    pub fn new(manager: CertificateManager, upstream: Upstream) -> Self {
        debug!("Creating a proxy service for upstream {}", upstream.address);
        ProxyService {
            manager,
            upstream: Arc::new(upstream),
            remote: None,
            tls: false,
        }
    }

    pub fn for_connection(&self, remote: SocketAddr, tls: bool) -> Self {
        ProxyService {
            manager: self.manager.clone(),
            upstream: self.upstream.clone(),
            remote: Some(remote),
            tls,
        }
    }

    /// Answer an http-01 validation request, `None` when no matching token is pending
    pub fn challenge_response(&self, host: &str, path: &str) -> Option<Response<ProxyBody>> {
        let body = self.manager.http01_response(host, path)?;
        trace!("Answering http-01 challenge for {host}{path}");

        let mut response = Response::new(full(body));
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        Some(response)
    }

    async fn handle_request(
        &self,
        req: Request<IncomingBody>,
    ) -> Result<Response<ProxyBody>, ProxyError> {
        if req.uri().path().starts_with(ACME_CHALLENGE_PREFIX) {
            let host = request_host(req.headers(), req.uri()).unwrap_or_default();
            return Ok(self
                .challenge_response(&host, req.uri().path())
                .unwrap_or_else(|| status_response(StatusCode::NOT_FOUND)));
        }

        self.forward(req).await
    }

    async fn forward(&self, req: Request<IncomingBody>) -> Result<Response<ProxyBody>, ProxyError> {
        let req = self.prepare(req)?;

        let stream = TcpStream::connect(self.upstream.address())
            .await
            .map_err(|e| {
                ProxyError::Upstream(format!("failed to connect to {}: {e}", self.upstream.address))
            })?;

        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!("Upstream connection closed with error: {err}");
            }
        });

        let response = sender
            .send_request(req)
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        Ok(response.map(|body| body.boxed()))
    }

    /// Rewrite the request for the upstream: origin-form target, no hop-by-hop headers, and the
    /// `X-Forwarded-*` family describing the original client.
    pub fn prepare<B>(&self, req: Request<B>) -> Result<Request<B>, ProxyError> {
        let (mut parts, body) = req.into_parts();
        let host = request_host(&parts.headers, &parts.uri);

        let target = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        parts.uri = target
            .parse::<Uri>()
            .map_err(|e| ProxyError::GenericError(format!("Invalid request target: {e}")))?;

        for name in HOP_BY_HOP {
            parts.headers.remove(name);
        }

        if let Some(remote) = self.remote {
            let ip = remote.ip().to_string();
            let forwarded_for = match parts
                .headers
                .get(&X_FORWARDED_FOR)
                .and_then(|v| v.to_str().ok())
            {
                Some(existing) => format!("{existing}, {ip}"),
                None => ip,
            };
            parts
                .headers
                .insert(X_FORWARDED_FOR, header_value(&forwarded_for)?);
        }

        let proto = if self.tls { "https" } else { "http" };
        parts
            .headers
            .insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto));

        if let Some(host) = host {
            parts
                .headers
                .insert(X_FORWARDED_HOST, header_value(&host)?);
            if !parts.headers.contains_key(header::HOST) {
                parts.headers.insert(header::HOST, header_value(&host)?);
            }
        }

        Ok(Request::from_parts(parts, body))
    }

    fn handle_error(&self, err: ProxyError) -> Response<ProxyBody> {
        match err {
            ProxyError::Upstream(message) => {
                warn!("Upstream request failed: {message}");
                status_response(StatusCode::BAD_GATEWAY)
            }
            err => {
                warn!("Failed to handle request: {err}");
                status_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

/// The host a request was addressed to, from the `Host` header or an absolute-form target
pub fn request_host(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|authority| authority.to_string()))
}

fn header_value(value: &str) -> Result<HeaderValue, ProxyError> {
    HeaderValue::from_str(value)
        .map_err(|e| ProxyError::GenericError(format!("Invalid header value `{value}`: {e}")))
}

fn full(body: impl Into<Bytes>) -> ProxyBody {
    Full::new(body.into())
        .map_err(|never| match never {})
        .boxed()
}

fn status_response(status: StatusCode) -> Response<ProxyBody> {
    let mut response = Response::new(full(status.canonical_reason().unwrap_or_default()));
    *response.status_mut() = status;
    response
}

impl HyperService<Request<IncomingBody>> for ProxyService {
    type Response = Response<ProxyBody>;
    type Error = ProxyError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<IncomingBody>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move {
            match service.handle_request(req).await {
                Ok(response) => Ok(response),
                Err(e) => Ok(service.handle_error(e)),
            }
        })
    }
}
