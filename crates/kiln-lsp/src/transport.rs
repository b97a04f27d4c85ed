//! `Content-Length` framing for JSON-RPC over stdio.

use serde_json::Value;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Write one framed message and flush.
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, msg: &Value) -> io::Result<()> {
    let body = serde_json::to_vec(msg).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

/// Read one framed message. `Ok(None)` on a clean EOF between messages.
pub async fn read_message<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<Value>> {
    let mut content_length: Option<usize> = None;
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return if content_length.is_none() {
                Ok(None)
            } else {
                Err(io::Error::new(io::ErrorKind::UnexpectedEof, "eof inside header"))
            };
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            if content_length.is_some() {
                break;
            }
            continue;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                let len = value.trim().parse::<usize>().map_err(|e| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("bad content-length: {e}"))
                })?;
                content_length = Some(len);
            }
        }
    }

    let len = content_length.unwrap_or_default();
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn frames_roundtrip_through_a_pipe() {
        let (client, server) = tokio::io::duplex(4096);
        let (_, mut write_half) = tokio::io::split(client);
        let (read_half, _) = tokio::io::split(server);
        let mut reader = BufReader::new(read_half);

        let msg = serde_json::json!({"jsonrpc": "2.0", "method": "initialized", "params": {}});
        write_message(&mut write_half, &msg).await.unwrap();
        write_message(&mut write_half, &serde_json::json!({"id": 1})).await.unwrap();

        assert_eq!(read_message(&mut reader).await.unwrap(), Some(msg));
        assert_eq!(
            read_message(&mut reader).await.unwrap(),
            Some(serde_json::json!({"id": 1}))
        );
    }

    #[tokio::test]
    async fn eof_before_header_is_none() {
        let mut reader = BufReader::new(&b""[..]);
        assert!(read_message(&mut reader).await.unwrap().is_none());
    }
}
