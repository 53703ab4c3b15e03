use http::{Request, StatusCode, Uri};
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Bytes,
}

/// One outbound GET. Implementations must not retry.
pub trait Transport: Send + Sync + 'static {
    type Error: std::error::Error + Send + 'static;

    fn get(&self, uri: Uri) -> impl Future<Output = Result<Reply, Self::Error>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    type Error = T::Error;

    fn get(&self, uri: Uri) -> impl Future<Output = Result<Reply, Self::Error>> + Send {
        (**self).get(uri)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build request: {0}")]
    Request(#[from] http::Error),
    #[error("request failed: {0}")]
    Client(#[from] hyper_util::client::legacy::Error),
    #[error("failed to read response body: {0}")]
    Body(#[from] hyper::Error),
}

/// Plain-HTTP client relying on hyper's default connection reuse.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client<HttpConnector, Empty<Bytes>>,
}

impl HttpTransport {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    type Error = TransportError;

    async fn get(&self, uri: Uri) -> Result<Reply, TransportError> {
        let request = Request::get(uri).body(Empty::<Bytes>::new())?;
        let response = self.client.request(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();
        Ok(Reply { status, body })
    }
}
