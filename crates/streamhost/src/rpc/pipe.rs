use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use streamhost_wire::MediaServiceState;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::{FingerprintAlgorithm, MediaServiceRpc, RpcError, RpcResult};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    ok: bool,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

/// Control-pipe client for the media service.
///
/// Speaks newline-delimited JSON request/response over the service's unix
/// domain control socket. Calls are strictly serialized: the connection
/// mutex is held from request write to response read, so responses always
/// pair with the request in flight.
pub struct PipeMediaServiceRpc {
    socket_path: PathBuf,
    call_timeout: Duration,
    connection: Mutex<Option<BufStream<UnixStream>>>,
}

impl PipeMediaServiceRpc {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            connection: Mutex::new(None),
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    async fn ensure_connected(
        &self,
        connection: &mut Option<BufStream<UnixStream>>,
    ) -> RpcResult<()> {
        if connection.is_none() {
            let stream = UnixStream::connect(&self.socket_path).await.map_err(|err| {
                tracing::debug!(
                    path = %self.socket_path.display(),
                    error = %err,
                    "media service control socket not reachable"
                );
                RpcError::Unavailable
            })?;
            *connection = Some(BufStream::new(stream));
        }
        Ok(())
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> RpcResult<serde_json::Value> {
        let mut connection = self.connection.lock().await;
        self.ensure_connected(&mut connection).await?;

        let result = timeout(self.call_timeout, async {
            let stream = connection.as_mut().ok_or(RpcError::Unavailable)?;

            let payload = serde_json::to_string(&RpcRequest { method, params })
                .map_err(|err| RpcError::CallFailed(err.to_string()))?;
            stream
                .write_all(payload.as_bytes())
                .await
                .map_err(|_| RpcError::Unavailable)?;
            stream.write_all(b"\n").await.map_err(|_| RpcError::Unavailable)?;
            stream.flush().await.map_err(|_| RpcError::Unavailable)?;

            let mut line = String::new();
            let read = stream
                .read_line(&mut line)
                .await
                .map_err(|_| RpcError::Unavailable)?;
            if read == 0 {
                return Err(RpcError::Unavailable);
            }

            let response: RpcResponse = serde_json::from_str(line.trim())
                .map_err(|err| RpcError::CallFailed(format!("malformed response: {err}")))?;
            if response.ok {
                Ok(response.result)
            } else {
                Err(RpcError::CallFailed(
                    response.error.unwrap_or_else(|| "unspecified error".to_owned()),
                ))
            }
        })
        .await
        .unwrap_or(Err(RpcError::Unavailable));

        // A transport-level failure poisons the connection; reconnect lazily
        // on the next call.
        if matches!(result, Err(RpcError::Unavailable)) {
            *connection = None;
        }
        result
    }
}

#[async_trait]
impl MediaServiceRpc for PipeMediaServiceRpc {
    async fn connect(&self) -> RpcResult<()> {
        let mut connection = self.connection.lock().await;
        self.ensure_connected(&mut connection).await
    }

    async fn start_service(&self, version: &str) -> RpcResult<()> {
        self.call("startService", json!({ "version": version }))
            .await
            .map(|_| ())
    }

    async fn stop_service(&self) -> RpcResult<()> {
        self.call("stopService", json!({})).await.map(|_| ())
    }

    async fn query_status(&self) -> RpcResult<Option<MediaServiceState>> {
        let result = self.call("queryStatus", json!({})).await?;
        if result.is_null() {
            return Ok(None);
        }
        let state: MediaServiceState = serde_json::from_value(result)
            .map_err(|err| RpcError::CallFailed(format!("malformed status: {err}")))?;
        Ok(Some(state))
    }

    async fn issue_client_token(&self, client_id: &str) -> RpcResult<String> {
        let result = self
            .call("issueClientToken", json!({ "clientId": client_id }))
            .await?;
        result
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| RpcError::CallFailed("token response was not a string".to_owned()))
    }

    async fn certificate_fingerprint(
        &self,
        algorithm: FingerprintAlgorithm,
    ) -> RpcResult<String> {
        let result = self
            .call(
                "certificateFingerprint",
                json!({ "algorithm": algorithm.as_str() }),
            )
            .await?;
        result
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| RpcError::CallFailed("fingerprint response was not a string".to_owned()))
    }

    async fn close(&self) -> RpcResult<()> {
        let mut connection = self.connection.lock().await;
        if let Some(mut stream) = connection.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }
}
