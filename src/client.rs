//! HTTP client whose every connection goes through the gate.
//!
//! [`GuardedConnector`] plugs a [`GuardedDialer`] into hyper's connector
//! slot, so the check runs on the resolved address of every new connection
//! the pool opens. [`build_client`] wraps it in a rustls connector and wires
//! the result into a pooled hyper-util client speaking `http` and `https`
//! (HTTP/1.1, and HTTP/2 when ALPN selects it). Redirects are not followed.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use http::Uri;
use hyper::body::Body;
use hyper_rustls::{builderstates::WantsSchemes, HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::Client,
    rt::{TokioExecutor, TokioIo, TokioTimer},
};
use tokio::net::TcpStream;
use tower::Service;

use crate::{dialer::GuardedDialer, error::DialError, policy::Policy};

/// A hyper connector that dials through a [`GuardedDialer`].
///
/// By default only `http` URIs are accepted, the same way hyper's own
/// `HttpConnector` behaves. Disable that with
/// [`enforce_http`](Self::enforce_http) when wrapping this connector in a TLS
/// connector.
#[derive(Debug, Clone)]
pub struct GuardedConnector {
    dialer: GuardedDialer,
    enforce_http: bool,
}

impl GuardedConnector {
    /// Creates a connector over `dialer`.
    pub fn new(dialer: GuardedDialer) -> Self {
        Self {
            dialer,
            enforce_http: true,
        }
    }

    /// Whether to reject URIs whose scheme is not `http`.
    pub fn enforce_http(mut self, enforce: bool) -> Self {
        self.enforce_http = enforce;
        self
    }

    async fn dial(&self, uri: Uri) -> Result<TokioIo<TcpStream>, DialError> {
        let invalid = |reason| DialError::InvalidTarget {
            uri: uri.to_string(),
            reason,
        };

        let scheme = uri.scheme_str();
        if self.enforce_http && scheme != Some("http") {
            tracing::debug!(%uri, "refusing non-http URI");
            return Err(invalid("URI scheme is not http"));
        }

        let host = uri.host().ok_or_else(|| invalid("URI has no host"))?;
        let port = match (uri.port_u16(), scheme) {
            (Some(port), _) => port,
            (None, Some("https")) => 443,
            (None, Some("http")) => 80,
            (None, _) => return Err(invalid("URI has no port and no known scheme")),
        };

        let stream = self.dialer.connect(host, port).await?;
        Ok(TokioIo::new(stream))
    }
}

impl Service<Uri> for GuardedConnector {
    type Response = TokioIo<TcpStream>;
    type Error = DialError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let connector = self.clone();
        Box::pin(async move { connector.dial(uri).await })
    }
}

/// Pool and timeout settings for [`build_client`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Per-address connect timeout (default 30s)
    pub connect_timeout: Option<Duration>,
    /// How long an idle pooled connection is kept (default 90s)
    pub pool_idle_timeout: Option<Duration>,
    /// Idle connections kept per host (default 100)
    pub max_idle_per_host: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Some(crate::dialer::DEFAULT_CONNECT_TIMEOUT),
            pool_idle_timeout: Some(Duration::from_secs(90)),
            max_idle_per_host: 100,
        }
    }
}

/// A pooled HTTP client whose connections are gated, with TLS on top.
pub type GuardedClient<B> = Client<HttpsConnector<GuardedConnector>, B>;

/// Builds an HTTP client enforcing `policy` on every connection.
///
/// Server certificates are verified against the platform's native root
/// store, which is loaded here; an error is returned when it cannot be read
/// or holds no certificates. A request to a refused address fails with a
/// connect error; use [`Denial::find_in`](crate::Denial::find_in) on it to
/// recover the denial.
///
/// # Examples
///
/// ```no_run
/// use egress_guard::{build_client, ClientOptions, Denial, Policy};
/// use http_body_util::Empty;
/// use hyper::body::Bytes;
///
/// # async fn example() -> std::io::Result<()> {
/// let client = build_client::<Empty<Bytes>>(Policy::default(), &ClientOptions::default())?;
/// let err = client
///     .get("https://127.0.0.1:5000".parse().unwrap())
///     .await
///     .unwrap_err();
/// let denial = Denial::find_in(&err).expect("blocked by policy");
/// assert_eq!(denial.to_string(), "127.0.0.1 is not a public IP address");
/// # Ok(())
/// # }
/// ```
pub fn build_client<B>(
    policy: impl Into<Policy>,
    options: &ClientOptions,
) -> io::Result<GuardedClient<B>>
where
    B: Body + Send,
    B::Data: Send,
{
    let tls = HttpsConnectorBuilder::new()
        .with_provider_and_native_roots(rustls::crypto::ring::default_provider())?;
    Ok(pooled_client(tls, policy, options))
}

/// Like [`build_client`], with a caller-supplied TLS configuration.
///
/// `tls` must not set ALPN protocols; they are filled in for HTTP/1.1 and
/// HTTP/2.
pub fn build_client_with_tls<B>(
    policy: impl Into<Policy>,
    options: &ClientOptions,
    tls: rustls::ClientConfig,
) -> GuardedClient<B>
where
    B: Body + Send,
    B::Data: Send,
{
    pooled_client(
        HttpsConnectorBuilder::new().with_tls_config(tls),
        policy,
        options,
    )
}

fn pooled_client<B>(
    tls: HttpsConnectorBuilder<WantsSchemes>,
    policy: impl Into<Policy>,
    options: &ClientOptions,
) -> GuardedClient<B>
where
    B: Body + Send,
    B::Data: Send,
{
    let dialer = GuardedDialer::new(policy).connect_timeout(options.connect_timeout);
    // The TLS layer hands `https` URIs down unchanged.
    let connector = tls
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(GuardedConnector::new(dialer).enforce_http(false));

    Client::builder(TokioExecutor::new())
        .pool_timer(TokioTimer::new())
        .pool_idle_timeout(options.pool_idle_timeout)
        .pool_max_idle_per_host(options.max_idle_per_host)
        .build(connector)
}
