//! Stand-in target server for local runs and integration tests.

use anyhow::Result;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// 200 with body `accepted <id>`.
    Accept,
    /// Fixed status for every request.
    Status(StatusCode),
    /// Closes the connection without answering on every n-th request.
    DropEvery(u64),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid behavior {0:?}, expected ok, status:<code> or drop:<n>")]
pub struct ParseBehaviorError(String);

impl FromStr for Behavior {
    type Err = ParseBehaviorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseBehaviorError(s.to_string());
        match s.split_once(':') {
            None if s == "ok" => Ok(Behavior::Accept),
            Some(("status", code)) => code
                .parse::<u16>()
                .ok()
                .and_then(|code| StatusCode::from_u16(code).ok())
                .map(Behavior::Status)
                .ok_or_else(invalid),
            Some(("drop", every)) => match every.parse::<u64>() {
                Ok(every) if every > 0 => Ok(Behavior::DropEvery(every)),
                _ => Err(invalid()),
            },
            _ => Err(invalid()),
        }
    }
}

#[derive(Debug, Error)]
#[error("dropping connection on request {0}")]
struct DroppedConnection(u64);

pub struct MockTarget {
    listener: TcpListener,
    behavior: Behavior,
    hits: Arc<AtomicU64>,
}

impl MockTarget {
    pub async fn bind(addr: SocketAddr, behavior: Behavior) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            behavior,
            hits: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared count of requests received so far.
    pub fn hits(&self) -> Arc<AtomicU64> {
        self.hits.clone()
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(
            "Mock target listening on {} ({:?})",
            self.listener.local_addr()?,
            self.behavior
        );

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };
            debug!("New connection from {}", peer);

            let behavior = self.behavior;
            let hits = self.hits.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let hits = hits.clone();
                    async move { respond(req, behavior, &hits) }
                });
                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!("Connection from {} closed: {}", peer, e);
                }
            });
        }

        info!("Mock target stopped");
        Ok(())
    }
}

fn respond(
    req: Request<Incoming>,
    behavior: Behavior,
    hits: &AtomicU64,
) -> Result<Response<Full<Bytes>>, DroppedConnection> {
    let hit = hits.fetch_add(1, Ordering::SeqCst) + 1;
    let id = req
        .uri()
        .query()
        .and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(key, _)| key == "id")
                .map(|(_, value)| value.into_owned())
        })
        .unwrap_or_default();

    let status = match behavior {
        Behavior::Accept => StatusCode::OK,
        Behavior::Status(status) => status,
        Behavior::DropEvery(every) if hit % every == 0 => return Err(DroppedConnection(hit)),
        Behavior::DropEvery(_) => StatusCode::OK,
    };

    let mut response = Response::new(Full::new(Bytes::from(format!("accepted {id}"))));
    *response.status_mut() = status;
    Ok(response)
}
