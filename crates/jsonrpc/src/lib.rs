use std::collections::HashMap;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;

mod stderr_capture;

pub use stderr_capture::StderrCapture;

/// JSON-RPC "method not found".
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Default upper bound for the retained tail of a child's stderr.
pub const DEFAULT_STDERR_CAPTURE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Capture at most this many trailing bytes of the child's stderr.
    ///
    /// `None` lets the child inherit the parent's stderr instead.
    pub stderr_capture_bytes: Option<usize>,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            stderr_capture_bytes: Some(DEFAULT_STDERR_CAPTURE_BYTES),
        }
    }
}

/// What `Client::wait_with_timeout` does when the child outlives the grace period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOnTimeout {
    ReturnError,
    Kill { kill_timeout: Duration },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("json-rpc error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

}

type PendingRequests = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, Error>>>>>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;
type SharedWriter = Arc<tokio::sync::Mutex<Option<BoxWriter>>>;

pub struct Client {
    writer: SharedWriter,
    next_id: AtomicU64,
    pending: PendingRequests,
    child: Option<Child>,
    stderr: Option<StderrCapture>,
    task: tokio::task::JoinHandle<()>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("next_id", &self.next_id)
            .field("child_id", &self.child_id())
            .finish_non_exhaustive()
    }
}

impl Client {
    pub async fn spawn_command_with_options(
        mut cmd: Command,
        options: SpawnOptions,
    ) -> Result<Self, Error> {
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        if options.stderr_capture_bytes.is_some() {
            cmd.stderr(Stdio::piped());
        } else {
            cmd.stderr(Stdio::inherit());
        }
        // Last line of defence: the child never outlives a dropped client.
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Protocol("child stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Protocol("child stdout not captured".to_string()))?;
        let stderr = match options.stderr_capture_bytes {
            Some(max_bytes) => child
                .stderr
                .take()
                .map(|stderr| StderrCapture::spawn(stderr, max_bytes)),
            None => None,
        };

        tracing::debug!(pid = ?child.id(), "spawned json-rpc child");

        let mut client = Self::from_parts(stdout, Box::new(stdin));
        client.child = Some(child);
        client.stderr = stderr;
        Ok(client)
    }

    pub async fn connect_io<R, W>(read: R, write: W) -> Result<Self, Error>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Ok(Self::from_parts(read, Box::new(write)))
    }

    fn from_parts<R>(reader: R, writer: BoxWriter) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(Some(writer)));
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let task = spawn_reader_task(reader, pending.clone(), writer.clone());
        Self {
            writer,
            next_id: AtomicU64::new(1),
            pending,
            child: None,
            stderr: None,
            task,
        }
    }

    pub fn child_id(&self) -> Option<u32> {
        self.child.as_ref().and_then(|child| child.id())
    }

    pub fn take_stderr(&mut self) -> Option<StderrCapture> {
        self.stderr.take()
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), Error> {
        let mut msg = Map::new();
        msg.insert("jsonrpc".to_string(), Value::String("2.0".to_string()));
        msg.insert("method".to_string(), Value::String(method.to_string()));
        if let Some(params) = params {
            msg.insert("params".to_string(), params);
        }
        self.write_message(&Value::Object(msg)).await
    }

    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let (tx, rx) = oneshot::channel::<Result<Value, Error>>();
        lock(&self.pending).insert(id, tx);
        // Dropping the request future (e.g. on timeout) forgets the id, so a late
        // response is discarded instead of leaking.
        let _guard = PendingRequestGuard {
            pending: self.pending.clone(),
            id,
        };

        let mut msg = Map::new();
        msg.insert("jsonrpc".to_string(), Value::String("2.0".to_string()));
        msg.insert("id".to_string(), Value::from(id));
        msg.insert("method".to_string(), Value::String(method.to_string()));
        if let Some(params) = params {
            msg.insert("params".to_string(), params);
        }
        self.write_message(&Value::Object(msg)).await?;

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::Protocol("response channel closed".to_string())),
        }
    }

    /// Like [`Client::request`], bounded by `timeout`.
    ///
    /// Expiry abandons only this request; the client stays usable.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, Error> {
        match tokio::time::timeout(timeout, self.request(method, params)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    async fn write_message(&self, msg: &Value) -> Result<(), Error> {
        let mut line = serde_json::to_string(msg)?;
        line.push('\n');
        write_line(&self.writer, &line).await
    }

    /// Closes the write half. A stdio child observes EOF on its stdin.
    pub async fn close(&self) -> Result<(), Error> {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            writer.shutdown().await?;
        }
        Ok(())
    }

    /// Closes the client and waits up to `timeout` for the child process to exit.
    ///
    /// Returns `Ok(None)` when the client was not created from a child process.
    pub async fn wait_with_timeout(
        &mut self,
        timeout: Duration,
        on_timeout: WaitOnTimeout,
    ) -> Result<Option<ExitStatus>, Error> {
        if let Err(err) = self.close().await {
            tracing::debug!(error = %err, "closing json-rpc writer failed");
        }

        let Some(child) = self.child.as_mut() else {
            self.task.abort();
            return Ok(None);
        };

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => match on_timeout {
                WaitOnTimeout::ReturnError => return Err(Error::Timeout(timeout)),
                WaitOnTimeout::Kill { kill_timeout } => {
                    let child_id = child.id();
                    tracing::debug!(?child_id, ?timeout, "child did not exit in time; killing");
                    if let Err(err) = child.start_kill() {
                        if let Some(status) = child.try_wait()? {
                            self.task.abort();
                            return Ok(Some(status));
                        }
                        return Err(Error::Io(err));
                    }
                    match tokio::time::timeout(kill_timeout, child.wait()).await {
                        Ok(status) => status?,
                        Err(_) => return Err(Error::Timeout(kill_timeout)),
                    }
                }
            },
        };

        self.task.abort();
        Ok(Some(status))
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct PendingRequestGuard {
    pending: PendingRequests,
    id: u64,
}

impl Drop for PendingRequestGuard {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.id);
    }
}

async fn write_line(writer: &SharedWriter, line: &str) -> Result<(), Error> {
    let mut guard = writer.lock().await;
    let Some(writer) = guard.as_mut() else {
        return Err(Error::Protocol("client is closed".to_string()));
    };
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[derive(Debug, serde::Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, serde::Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

fn spawn_reader_task<R>(
    reader: R,
    pending: PendingRequests,
    writer: SharedWriter,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let value: Value = match serde_json::from_str(line) {
                        Ok(value) => value,
                        Err(_) => {
                            tracing::debug!(line, "skipping non-json line from server");
                            continue;
                        }
                    };
                    handle_message(value, &pending, &writer).await;
                }
                Ok(None) => {
                    drain_pending(&pending, "server closed connection");
                    return;
                }
                Err(err) => {
                    drain_pending(&pending, &format!("read failed: {err}"));
                    return;
                }
            }
        }
    })
}

async fn handle_message(value: Value, pending: &PendingRequests, writer: &SharedWriter) {
    let method = value
        .get("method")
        .and_then(Value::as_str)
        .map(ToString::to_string);
    let id = value.get("id").cloned();

    match (method, id) {
        (Some(method), Some(id)) => answer_server_request(&method, id, writer).await,
        (Some(method), None) => {
            tracing::debug!(method, "ignoring server notification");
        }
        (None, Some(id)) => route_response(&id, value, pending),
        (None, None) => {
            tracing::debug!("ignoring message without method or id");
        }
    }
}

fn route_response(id: &Value, value: Value, pending: &PendingRequests) {
    let Some(id) = id.as_u64() else {
        tracing::debug!(%id, "ignoring response with non-numeric id");
        return;
    };
    let Some(tx) = lock(pending).remove(&id) else {
        tracing::debug!(id, "dropping response with no waiting request");
        return;
    };

    let response: JsonRpcResponse = match serde_json::from_value(value) {
        Ok(response) => response,
        Err(err) => {
            let _ = tx.send(Err(Error::Protocol(format!("invalid response: {err}"))));
            return;
        }
    };
    if let Some(version) = response.jsonrpc.as_deref() {
        if version != "2.0" {
            let _ = tx.send(Err(Error::Protocol(format!(
                "unsupported jsonrpc version: {version}"
            ))));
            return;
        }
    }

    let outcome = match (response.result, response.error) {
        (_, Some(err)) => Err(Error::Rpc {
            code: err.code,
            message: err.message,
            data: err.data,
        }),
        (Some(result), None) => Ok(result),
        (None, None) => Err(Error::Protocol("missing result".to_string())),
    };
    let _ = tx.send(outcome);
}

async fn answer_server_request(method: &str, id: Value, writer: &SharedWriter) {
    let response = if method == "ping" {
        serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": {} })
    } else {
        tracing::debug!(method, "refusing server request");
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {
                "code": METHOD_NOT_FOUND,
                "message": format!("method not found: {method}"),
            },
        })
    };

    let mut line = match serde_json::to_string(&response) {
        Ok(line) => line,
        Err(err) => {
            tracing::debug!(error = %err, "serialize server request response");
            return;
        }
    };
    line.push('\n');
    if let Err(err) = write_line(writer, &line).await {
        tracing::debug!(error = %err, method, "answer server request");
    }
}

fn drain_pending(pending: &PendingRequests, reason: &str) {
    let pending = std::mem::take(&mut *lock(pending));
    for (_id, tx) in pending {
        let _ = tx.send(Err(Error::Protocol(reason.to_string())));
    }
}
