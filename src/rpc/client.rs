// RPC client - Talks XML-RPC to the supervisor over HTTP

use crate::error::{MemmonError, Result};
use crate::process::ManagedProcess;
use crate::rpc::xmlrpc::{decode_response, encode_call, Value};
use crate::rpc::SupervisorControl;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tracing::{debug, warn};

/// Supervisor's default control endpoint
pub const DEFAULT_SERVER_URL: &str = "http://localhost:9001";

/// Path of the XML-RPC handler on the supervisor's HTTP server
const RPC_PATH: &str = "/RPC2";

/// Maximum number of connection attempts per call
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Delay between connection attempts
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Where the supervisor's control interface listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `unix:///path/to/supervisor.sock`
    Unix(PathBuf),
    /// `http://host:port`
    Tcp { host: String, port: u16 },
}

impl Endpoint {
    /// Parse a supervisor server URL
    pub fn parse(server_url: &str) -> Result<Self> {
        if let Some(path) = server_url.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(MemmonError::ConfigError(format!(
                    "Missing socket path in server URL: {}",
                    server_url
                )));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }

        let url = url::Url::parse(server_url).map_err(|e| {
            MemmonError::ConfigError(format!("Invalid server URL {}: {}", server_url, e))
        })?;

        if url.scheme() != "http" {
            return Err(MemmonError::ConfigError(format!(
                "Unsupported server URL scheme: {}",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| {
                MemmonError::ConfigError(format!("Missing host in server URL: {}", server_url))
            })?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);

        Ok(Endpoint::Tcp { host, port })
    }

    /// Value for the HTTP `Host` header
    fn host_header(&self) -> String {
        match self {
            Endpoint::Unix(_) => "localhost".to_string(),
            Endpoint::Tcp { host, port } => format!("{}:{}", host, port),
        }
    }
}

/// XML-RPC client for the supervisor's control interface
pub struct RpcClient {
    endpoint: Endpoint,
    /// Precomputed `Authorization` header value
    authorization: Option<String>,
}

impl RpcClient {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            authorization: None,
        }
    }

    /// Create a client from a `unix://` or `http://` server URL
    pub fn from_url(server_url: &str) -> Result<Self> {
        Ok(Self::new(Endpoint::parse(server_url)?))
    }

    /// Authenticate with HTTP basic auth
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        let token = STANDARD.encode(format!("{}:{}", username, password));
        self.authorization = Some(format!("Basic {}", token));
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Invoke an XML-RPC method and return its decoded result
    pub async fn call(&self, method: &str, params: &[Value]) -> Result<Value> {
        debug!("Calling {}", method);
        let request = self.build_request(&encode_call(method, params));
        let raw = self.send_request(request.as_bytes()).await?;
        let body = parse_http_response(&raw)?;
        decode_response(&body)
    }

    fn build_request(&self, body: &str) -> String {
        let mut request = format!(
            "POST {} HTTP/1.0\r\nHost: {}\r\nUser-Agent: memmon/{}\r\n\
             Content-Type: text/xml\r\nContent-Length: {}\r\n",
            RPC_PATH,
            self.endpoint.host_header(),
            env!("CARGO_PKG_VERSION"),
            body.len()
        );
        if let Some(ref authorization) = self.authorization {
            request.push_str(&format!("Authorization: {}\r\n", authorization));
        }
        request.push_str("\r\n");
        request.push_str(body);
        request
    }

    /// Send a request, retrying only the connection step
    ///
    /// Once connected the request is sent exactly once: stop and start
    /// calls are not idempotent.
    async fn send_request(&self, request: &[u8]) -> Result<Vec<u8>> {
        let mut last_error = None;

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            match self.endpoint {
                Endpoint::Unix(ref path) => match UnixStream::connect(path).await {
                    Ok(stream) => return exchange(stream, request).await,
                    Err(e) => last_error = Some(e),
                },
                Endpoint::Tcp { ref host, port } => {
                    match TcpStream::connect((host.as_str(), port)).await {
                        Ok(stream) => return exchange(stream, request).await,
                        Err(e) => last_error = Some(e),
                    }
                }
            }

            if attempt < MAX_RETRY_ATTEMPTS {
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }

        Err(MemmonError::ConnectionError(format!(
            "{:?} unreachable after {} attempts: {}",
            self.endpoint,
            MAX_RETRY_ATTEMPTS,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

/// Write the request and read until the server closes the connection
async fn exchange<T>(mut stream: T, request: &[u8]) -> Result<Vec<u8>>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(request).await?;
    stream.flush().await?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    Ok(response)
}

/// Extract the body of a `200 OK` HTTP response
fn parse_http_response(raw: &[u8]) -> Result<String> {
    let split = raw
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .ok_or_else(|| MemmonError::HttpError("truncated response headers".to_string()))?;

    let head = String::from_utf8_lossy(&raw[..split]);
    let mut body = &raw[split + 4..];

    let mut lines = head.lines();
    let status_line = lines.next().unwrap_or_default();
    let status = status_line.split_whitespace().nth(1).unwrap_or_default();
    if status != "200" {
        return Err(MemmonError::HttpError(format!(
            "unexpected response: {}",
            status_line
        )));
    }

    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                let length: usize = value.trim().parse().map_err(|_| {
                    MemmonError::HttpError(format!("bad Content-Length: {}", value.trim()))
                })?;
                if body.len() < length {
                    return Err(MemmonError::HttpError("truncated response body".to_string()));
                }
                body = &body[..length];
            }
        }
    }

    Ok(String::from_utf8_lossy(body).into_owned())
}

/// Convert one `getAllProcessInfo` record
fn process_from_info(info: &Value) -> Option<ManagedProcess> {
    let name = info.get("name").and_then(Value::as_str)?;
    let group = info.get("group").and_then(Value::as_str)?;
    let pid = info
        .get("pid")
        .and_then(Value::as_i64)
        .and_then(|pid| u32::try_from(pid).ok())
        .unwrap_or(0);
    Some(ManagedProcess::new(name, group, pid))
}

impl SupervisorControl for RpcClient {
    async fn list_processes(&mut self) -> Result<Vec<ManagedProcess>> {
        let result = self.call("supervisor.getAllProcessInfo", &[]).await?;
        let infos = result.as_array().ok_or_else(|| {
            MemmonError::XmlRpcError("getAllProcessInfo did not return an array".to_string())
        })?;

        let mut processes = Vec::with_capacity(infos.len());
        for info in infos {
            match process_from_info(info) {
                Some(process) => processes.push(process),
                None => warn!("Ignoring malformed process record: {:?}", info),
            }
        }
        Ok(processes)
    }

    async fn stop_process(&mut self, key: &str) -> Result<()> {
        self.call("supervisor.stopProcess", &[key.into(), true.into()])
            .await
            .map(|_| ())
    }

    async fn start_process(&mut self, key: &str) -> Result<()> {
        self.call("supervisor.startProcess", &[key.into(), false.into()])
            .await
            .map(|_| ())
    }
}
