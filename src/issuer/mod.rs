mod transport;

pub use transport::{HttpTransport, Reply, Transport, TransportError};

use crate::config::{ConfigError, TargetConfig};
use crate::pool::Identifier;
use http::{StatusCode, Uri};
use tracing::{error, info};
use url::Url;

/// Endpoint every request is sent to, plus the optional pass-through
/// `endpoint` parameter.
#[derive(Debug, Clone)]
pub struct Target {
    endpoint: Url,
    secondary_endpoint: Option<String>,
}

impl Target {
    pub fn new(mut endpoint: Url, secondary_endpoint: Option<String>) -> Self {
        endpoint.set_fragment(None);
        Self {
            endpoint,
            secondary_endpoint,
        }
    }

    pub fn from_config(config: &TargetConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.endpoint_url()?,
            config.secondary_endpoint.clone(),
        ))
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn uri_for(&self, id: &Identifier) -> Result<Uri, http::uri::InvalidUri> {
        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("id", id.as_str());
            if let Some(secondary) = &self.secondary_endpoint {
                query.append_pair("endpoint", secondary);
            }
        }
        url.as_str().parse()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The target answered with something other than 200.
    Rejected(StatusCode),
    /// No usable response at all.
    Failed(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

pub struct RequestIssuer<T> {
    transport: T,
    target: Target,
}

impl<T: Transport> RequestIssuer<T> {
    pub fn new(transport: T, target: Target) -> Self {
        Self { transport, target }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub async fn issue(&self, id: &Identifier) -> Outcome {
        let uri = match self.target.uri_for(id) {
            Ok(uri) => uri,
            Err(e) => {
                error!("Error building request for id: {}: {}", id, e);
                return Outcome::Failed(e.to_string());
            }
        };

        match self.transport.get(uri).await {
            Ok(reply) if reply.status == StatusCode::OK => {
                info!(
                    "Request sent for id: {}, response: {}",
                    id,
                    String::from_utf8_lossy(&reply.body)
                );
                Outcome::Success
            }
            Ok(reply) => {
                error!("Request for id: {} failed with status {}", id, reply.status);
                Outcome::Rejected(reply.status)
            }
            Err(e) => {
                error!("Error sending request for id: {}: {}", id, e);
                Outcome::Failed(e.to_string())
            }
        }
    }
}
