use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt};

use crate::lock;

/// Bounded tail of a child process's stderr.
///
/// Lines are kept in arrival order; once `max_bytes` is exceeded the oldest lines are
/// evicted, since the end of stderr usually carries the final error.
pub struct StderrCapture {
    buffer: Arc<Mutex<TailBuffer>>,
    task: tokio::task::JoinHandle<()>,
}

struct TailBuffer {
    lines: VecDeque<String>,
    bytes: usize,
    max_bytes: usize,
    truncated: bool,
}

impl TailBuffer {
    fn push(&mut self, line: String) {
        let line = tail_of(line, self.max_bytes);
        self.bytes = self.bytes.saturating_add(line.len());
        self.lines.push_back(line);
        while self.bytes > self.max_bytes {
            let Some(evicted) = self.lines.pop_front() else {
                break;
            };
            self.bytes = self.bytes.saturating_sub(evicted.len());
            self.truncated = true;
        }
    }
}

fn tail_of(line: String, max_bytes: usize) -> String {
    if line.len() <= max_bytes {
        return line;
    }
    let start = line.len() - max_bytes;
    let start = (start..line.len())
        .find(|idx| line.is_char_boundary(*idx))
        .unwrap_or(line.len());
    line[start..].to_string()
}

fn push_line(sink: &Mutex<TailBuffer>, buf: &[u8]) {
    let line = String::from_utf8_lossy(buf).trim_end().to_string();
    tracing::trace!(target: "mcp_jsonrpc::stderr", "{line}");
    lock(sink).push(line);
}

impl StderrCapture {
    pub(crate) fn spawn<R>(reader: R, max_bytes: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let max_bytes = max_bytes.max(1);
        let buffer = Arc::new(Mutex::new(TailBuffer {
            lines: VecDeque::new(),
            bytes: 0,
            max_bytes,
            truncated: false,
        }));
        let sink = buffer.clone();
        let task = tokio::spawn(async move {
            let mut reader = tokio::io::BufReader::new(reader);
            let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX);
            let mut buf = Vec::new();
            loop {
                // Read at most `limit` bytes per step so a line without a newline
                // never holds more than twice the capture size.
                match (&mut reader).take(limit).read_until(b'\n', &mut buf).await {
                    Ok(0) => {
                        if !buf.is_empty() {
                            push_line(&sink, &buf);
                        }
                        return;
                    }
                    Ok(_) if buf.ends_with(b"\n") => {
                        push_line(&sink, &buf);
                        buf.clear();
                    }
                    Ok(_) => {
                        let excess = buf.len().saturating_sub(max_bytes);
                        if excess > 0 {
                            buf.drain(..excess);
                            lock(&sink).truncated = true;
                        }
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "reading child stderr failed");
                        return;
                    }
                }
            }
        });
        Self { buffer, task }
    }

    /// Everything captured so far, newline-joined.
    pub fn contents(&self) -> String {
        let buffer = lock(&self.buffer);
        buffer.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }

    pub fn is_truncated(&self) -> bool {
        lock(&self.buffer).truncated
    }

    /// Waits (bounded) for the stream to reach EOF, then returns the captured text.
    pub async fn finish(mut self, timeout: Duration) -> String {
        let _ = tokio::time::timeout(timeout, &mut self.task).await;
        self.contents()
    }
}

impl Drop for StderrCapture {
    fn drop(&mut self) {
        self.task.abort();
    }
}
