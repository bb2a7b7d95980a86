//! JSON-RPC collaborator used to probe the daemon.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, trace};

use crate::daemon_config::DaemonConfig;
use crate::error::RpcError;

pub const DEFAULT_RPC_PORT: u16 = 45443;
pub const DEFAULT_RPC_HOST: &str = "127.0.0.1";

/// Method used as the liveness probe; it needs a running daemon and answers
/// `-15` when the wallet is not encrypted
pub const PROBE_METHOD: &str = "walletlock";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// The daemon RPC surface the bootstrapper depends on
#[async_trait]
pub trait DaemonRpc: Send + Sync {
    /// Point the client at the daemon described by the parsed configuration
    fn initialize_config(&self, config: &DaemonConfig);

    /// Lightweight call that succeeds only once the daemon is serving RPC
    async fn probe(&self) -> Result<(), RpcError>;
}

/// Address and credentials of the daemon's RPC server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcEndpoint {
    pub url: String,
    pub user: String,
    pub password: String,
}

impl RpcEndpoint {
    /// Reads `rpcuser`, `rpcpassword`, `rpcport` and `rpcconnect`
    pub fn from_config(config: &DaemonConfig) -> Self {
        let host = config.get("rpcconnect").unwrap_or(DEFAULT_RPC_HOST);
        let port = config
            .get("rpcport")
            .and_then(|port| port.parse::<u16>().ok())
            .unwrap_or(DEFAULT_RPC_PORT);

        Self {
            url: format!("http://{host}:{port}"),
            user: config.get("rpcuser").unwrap_or_default().to_string(),
            password: config.get("rpcpassword").unwrap_or_default().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: &'static str,
    method: &'a str,
    params: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// JSON-RPC 1.0 client over HTTP with basic auth
#[derive(Debug)]
pub struct JsonRpcClient {
    http: reqwest::Client,
    endpoint: RwLock<Option<RpcEndpoint>>,
}

impl JsonRpcClient {
    pub fn new() -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RpcError::Transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: RwLock::new(None),
        })
    }

    pub fn endpoint(&self) -> Option<RpcEndpoint> {
        self.endpoint
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Issue a call and return the raw `result` value
    pub async fn call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, RpcError> {
        let endpoint = self.endpoint().ok_or(RpcError::NotConfigured)?;
        let request = RpcRequest {
            jsonrpc: "1.0",
            id: "nodeboot",
            method,
            params,
        };

        trace!(method, url = %endpoint.url, "Sending rpc request");
        let response = self
            .http
            .post(&endpoint.url)
            .basic_auth(&endpoint.user, Some(&endpoint.password))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    RpcError::ConnectionRefused(e.to_string())
                } else {
                    RpcError::Transport(e.to_string())
                }
            })?;

        // The daemon reports rpc errors with a non-2xx status and a JSON body
        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RpcError::Transport(format!("HTTP {status}: {e}")))?;

        let parsed: RpcResponse = serde_json::from_value(body.clone())
            .map_err(|e| RpcError::Transport(format!("malformed rpc response: {e}")))?;
        if let Some(error) = parsed.error {
            return Err(RpcError::Daemon {
                code: error.code,
                message: error.message,
            });
        }

        Ok(body
            .get("result")
            .cloned()
            .unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl DaemonRpc for JsonRpcClient {
    fn initialize_config(&self, config: &DaemonConfig) {
        let endpoint = RpcEndpoint::from_config(config);
        debug!(url = %endpoint.url, user = %endpoint.user, "Configured daemon rpc endpoint");
        *self
            .endpoint
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(endpoint);
    }

    async fn probe(&self) -> Result<(), RpcError> {
        self.call(PROBE_METHOD, Vec::new()).await.map(|_| ())
    }
}
