//! Content-Length framed JSON-RPC messages over the LSP stdio transport.
//!
//! A frame is an ASCII header block terminated by a blank line, followed by
//! exactly `Content-Length` bytes of JSON body. `Content-Length` is the only
//! required header; anything else in the block is tolerated and ignored.

use broker_core::error::Error;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Read one framed message from `reader`.
///
/// Returns `Ok(None)` on a clean EOF that lands exactly on a frame boundary
/// (nothing read yet for the next message) — the normal way a transport
/// closes. A `ProtocolFailure` means this one frame was malformed but the
/// stream is otherwise readable; the caller's read loop may continue. Any
/// other `Err` means the stream itself is broken.
pub async fn read_message<R>(reader: &mut R) -> broker_core::Result<Option<Value>>
where
    R: AsyncBufRead + AsyncRead + Unpin,
{
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            if content_length.is_none() {
                return Ok(None);
            }
            return Err(Error::TransportFailure(
                "stream closed mid-frame after headers".to_string(),
            ));
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }

        if let Some(value) = trimmed
            .split_once(':')
            .filter(|(name, _)| name.eq_ignore_ascii_case("Content-Length"))
            .map(|(_, value)| value.trim())
        {
            content_length = Some(value.parse::<usize>().map_err(|_| {
                Error::ProtocolFailure(format!("invalid Content-Length value: {value}"))
            })?);
        }
        // Any other header (Content-Type, etc.) is tolerated and ignored.
    }

    let length = content_length
        .ok_or_else(|| Error::ProtocolFailure("frame missing Content-Length header".into()))?;

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.map_err(|e| {
        Error::TransportFailure(format!("failed reading {length}-byte frame body: {e}"))
    })?;

    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| Error::ProtocolFailure(format!("invalid JSON frame body: {e}")))?;
    Ok(Some(value))
}

/// Write one framed message to `writer`. Callers that write concurrently
/// must serialize through [`FramedWriter`] instead of calling this directly.
pub async fn write_message<W>(writer: &mut W, message: &Value) -> broker_core::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(message)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Serializes concurrent writers onto a single framed stream.
///
/// This is the one lock in the broker that is deliberately held across an
/// `.await` — the whole point is that a header+body write completes as one
/// unit before the next writer's header begins. Every other shared-state
/// lock in this workspace is a synchronous `parking_lot` lock that never
/// spans a suspension point.
pub struct FramedWriter<W> {
    inner: Mutex<W>,
}

impl<W> FramedWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self { inner: Mutex::new(writer) }
    }

    pub async fn write_message(&self, message: &Value) -> broker_core::Result<()> {
        let mut guard = self.inner.lock().await;
        write_message(&mut *guard, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn round_trips_a_message() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let message = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}});

        write_message(&mut server, &message).await.unwrap();
        drop(server);

        let mut reader = BufReader::new(client);
        let parsed = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(parsed, message);
    }

    #[tokio::test]
    async fn round_trips_large_bodies() {
        let (client, mut server) = tokio::io::duplex(32 * 1024 * 1024);
        let big = "x".repeat(16 * 1024 * 1024);
        let message = json!({"jsonrpc": "2.0", "method": "dump", "params": {"blob": big}});

        write_message(&mut server, &message).await.unwrap();
        drop(server);

        let mut reader = BufReader::new(client);
        let parsed = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(parsed, message);
    }

    #[tokio::test]
    async fn clean_eof_before_any_header_is_none() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let mut reader = BufReader::new(client);
        assert!(read_message(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tolerates_unknown_headers() {
        let (client, mut server) = tokio::io::duplex(4096);
        let body = br#"{"jsonrpc":"2.0","method":"ping"}"#;
        let frame = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        server.write_all(frame.as_bytes()).await.unwrap();
        server.write_all(body).await.unwrap();
        drop(server);

        let mut reader = BufReader::new(client);
        let parsed = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(parsed["method"], "ping");
    }

    #[tokio::test]
    async fn missing_content_length_is_protocol_failure() {
        let (client, mut server) = tokio::io::duplex(4096);
        server.write_all(b"X-Custom: 1\r\n\r\n").await.unwrap();
        drop(server);

        let mut reader = BufReader::new(client);
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::ProtocolFailure(_)));
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_interleave() {
        let (client, server) = tokio::io::duplex(1 << 20);
        let writer = std::sync::Arc::new(FramedWriter::new(server));

        let mut handles = Vec::new();
        for i in 0..20 {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                let msg = json!({"jsonrpc": "2.0", "id": i, "method": "noop"});
                writer.write_message(&msg).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        drop(writer);

        let mut reader = BufReader::new(client);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..20 {
            let msg = read_message(&mut reader).await.unwrap().unwrap();
            seen.insert(msg["id"].as_i64().unwrap());
        }
        assert_eq!(seen.len(), 20);
    }
}
