//! `ControlClient`: a thin HTTP-over-Unix-socket wrapper callers use to talk
//! to the daemon, plus the `ensure_running` spawn helper.
//!
//! `reqwest` has no first-class Unix-socket transport, so this builds a
//! small `hyper-util` legacy client over a `tower::service_fn` connector
//! that dials a fixed `UnixStream` path — the same `hyper`/`hyper-util`/
//! `tower` stack already used on the server side of this API.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::client::legacy::{Client, Error as LegacyClientError};
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::UnixStream;
use tower::service_fn;

use crate::error::DaemonError;

use super::types::{
    HealthResponse, RegisterRequest, RegisterResponse, RegisterRoutesRequest, RunListEntry, ShutdownResponse,
    UpdateRunRequest,
};

/// A `hyper` connection wrapper over a `UnixStream`, satisfying the
/// `hyper_util` legacy client's `Connection` bound. The socket path is
/// fixed per client, so the connector ignores the dialed URI's authority.
#[derive(Debug)]
struct UnixConnection(TokioIo<UnixStream>);

impl Connection for UnixConnection {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

impl tokio::io::AsyncRead for UnixConnection {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.get_mut().0).poll_read(cx, buf)
    }
}

impl tokio::io::AsyncWrite for UnixConnection {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::pin::Pin::new(&mut self.get_mut().0).poll_write(cx, buf)
    }

    fn poll_flush(self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.get_mut().0).poll_flush(cx)
    }

    fn poll_shutdown(self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.get_mut().0).poll_shutdown(cx)
    }
}

/// Library wrapper callers use to talk to a running daemon over its control
/// socket.
#[derive(Clone)]
pub struct ControlClient {
    sock_path: PathBuf,
    inner: Client<UnixConnector, Full<Bytes>>,
}

impl std::fmt::Debug for ControlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlClient").field("sock_path", &self.sock_path).finish()
    }
}

type UnixConnector = tower::util::BoxCloneSyncService<Uri, UnixConnection, std::io::Error>;

impl ControlClient {
    /// Build a client dialing `sock_path` for every request. Does not
    /// connect eagerly; the first request establishes the connection.
    pub fn connect(sock_path: PathBuf) -> Result<Self, DaemonError> {
        let dial_path = sock_path.clone();
        let connector = service_fn(move |_uri: Uri| {
            let dial_path = dial_path.clone();
            async move {
                let stream = UnixStream::connect(&dial_path).await?;
                Ok::<_, std::io::Error>(UnixConnection(TokioIo::new(stream)))
            }
        });
        let inner = Client::builder(TokioExecutor::new()).build(tower::util::BoxCloneSyncService::new(connector));
        Ok(Self { sock_path, inner })
    }

    async fn request<B: Serialize, R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        expected: StatusCode,
    ) -> Result<R, DaemonError> {
        let full_body = match body {
            Some(body) => Full::new(Bytes::from(serde_json::to_vec(body).map_err(|err| DaemonError::Json(err.into()))?)),
            None => Full::new(Bytes::new()),
        };

        let request = Request::builder()
            .method(method)
            .uri(format!("http://localhost{path}"))
            .header("content-type", "application/json")
            .body(full_body)
            .map_err(|err| DaemonError::Transport(err.into()))?;

        let response = self.inner.request(request).await.map_err(|err| DaemonError::Transport(err.into()))?;
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|err| DaemonError::Transport(err.into()))?
            .to_bytes();

        if status != expected {
            return Err(DaemonError::UnexpectedStatus { status: status.as_u16() });
        }

        serde_json::from_slice(&bytes).map_err(|err| DaemonError::Json(err.into()))
    }

    async fn request_no_body<R: DeserializeOwned>(&self, method: Method, path: &str, expected: StatusCode) -> Result<R, DaemonError> {
        self.request::<(), R>(method, path, None, expected).await
    }

    /// `GET /v1/health`.
    pub async fn health(&self) -> Result<HealthResponse, DaemonError> {
        self.request_no_body(Method::GET, "/v1/health", StatusCode::OK).await
    }

    /// `POST /v1/runs`.
    pub async fn register_run(&self, request: &RegisterRequest) -> Result<RegisterResponse, DaemonError> {
        self.request(Method::POST, "/v1/runs", Some(request), StatusCode::CREATED).await
    }

    /// `GET /v1/runs`.
    pub async fn list_runs(&self) -> Result<Vec<RunListEntry>, DaemonError> {
        self.request_no_body(Method::GET, "/v1/runs", StatusCode::OK).await
    }

    /// `PATCH /v1/runs/{token}`.
    pub async fn update_run(&self, token: &str, container_id: &str) -> Result<(), DaemonError> {
        let path = format!("/v1/runs/{token}");
        let body = UpdateRunRequest { container_id: container_id.to_owned() };
        self.expect_no_content(Method::PATCH, &path, Some(&body)).await
    }

    /// `DELETE /v1/runs/{token}`.
    pub async fn unregister_run(&self, token: &str) -> Result<(), DaemonError> {
        let path = format!("/v1/runs/{token}");
        self.expect_no_content::<()>(Method::DELETE, &path, None).await
    }

    /// `POST /v1/routes/{agent}`.
    pub async fn register_routes(&self, agent: &str, services: std::collections::HashMap<String, String>) -> Result<(), DaemonError> {
        let path = format!("/v1/routes/{agent}");
        let body = RegisterRoutesRequest { services };
        self.expect_no_content(Method::POST, &path, Some(&body)).await
    }

    /// `DELETE /v1/routes/{agent}`.
    pub async fn unregister_routes(&self, agent: &str) -> Result<(), DaemonError> {
        let path = format!("/v1/routes/{agent}");
        self.expect_no_content::<()>(Method::DELETE, &path, None).await
    }

    /// `POST /v1/shutdown`. A connection reset while awaiting the response
    /// is treated as success: the daemon tearing its own socket down while
    /// replying is the expected shape of a clean shutdown. A transport
    /// failure while still establishing the connection (daemon never
    /// reached) is not: it is reported back as an error.
    pub async fn shutdown(&self) -> Result<(), DaemonError> {
        match self.request::<(), ShutdownResponse>(Method::POST, "/v1/shutdown", None, StatusCode::OK).await {
            Ok(_) => Ok(()),
            Err(DaemonError::Transport(err)) => {
                let never_connected = err.downcast_ref::<LegacyClientError>().is_some_and(LegacyClientError::is_connect);
                if never_connected {
                    Err(DaemonError::Transport(err))
                } else {
                    Ok(())
                }
            }
            Err(other) => Err(other),
        }
    }

    /// Ensure a daemon is running and connected for `dir`, spawning one if
    /// necessary.
    pub async fn ensure_running(dir: &Path, requested_port: u16) -> Result<Self, DaemonError> {
        crate::core::lifecycle::ensure_running(dir, requested_port)
            .await
            .map_err(DaemonError::from)
    }

    async fn expect_no_content<B: Serialize>(&self, method: Method, path: &str, body: Option<&B>) -> Result<(), DaemonError> {
        let full_body = match body {
            Some(body) => Full::new(Bytes::from(serde_json::to_vec(body).map_err(|err| DaemonError::Json(err.into()))?)),
            None => Full::new(Bytes::new()),
        };
        let request = Request::builder()
            .method(method)
            .uri(format!("http://localhost{path}"))
            .header("content-type", "application/json")
            .body(full_body)
            .map_err(|err| DaemonError::Transport(err.into()))?;

        let response = self.inner.request(request).await.map_err(|err| DaemonError::Transport(err.into()))?;
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            Ok(())
        } else {
            Err(DaemonError::UnexpectedStatus { status: status.as_u16() })
        }
    }
}
