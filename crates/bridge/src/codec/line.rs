use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

use tabreader_core::message::{self, Message};
use tabreader_core::{Error, Result};

pub const DEFAULT_MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

pub async fn write_line<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: Serialize + ?Sized,
{
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Buffered line reader. Bytes that arrive after a newline are kept for the
/// next call, and a read cut short by its deadline loses nothing.
pub struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_len(inner, DEFAULT_MAX_LINE_BYTES)
    }

    pub fn with_max_len(inner: R, max_len: usize) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
            max_len,
        }
    }

    /// Next line without its terminator (`\n` or `\r\n`).
    ///
    /// `Ok(None)` means the peer closed; an unterminated tail at close is
    /// discarded. `Error::Timeout` means no full line arrived in `deadline`.
    pub async fn read_line(&mut self, deadline: Duration) -> Result<Option<Vec<u8>>> {
        match tokio::time::timeout(deadline, self.next_line()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "no complete line within {}s",
                deadline.as_secs_f64()
            ))),
        }
    }

    /// `read_line` followed by a JSON object parse. Parse failures are
    /// `Error::Protocol`.
    pub async fn read_message(&mut self, deadline: Duration) -> Result<Option<Message>> {
        match self.read_line(deadline).await? {
            Some(line) => message::parse(&line)
                .map(Some)
                .map_err(|e| Error::Protocol(format!("invalid JSON line: {}", e))),
            None => Ok(None),
        }
    }

    async fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if !self.buf.is_empty() {
                    debug!(len = self.buf.len(), "Discarding unterminated line at close");
                    self.buf.clear();
                }
                return Ok(None);
            }

            if let Some(pos) = available.iter().position(|&b| b == b'\n') {
                self.buf.extend_from_slice(&available[..pos]);
                self.reader.consume(pos + 1);
                let mut line = std::mem::take(&mut self.buf);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if line.len() > self.max_len {
                    return Err(self.too_long(line.len()));
                }
                return Ok(Some(line));
            }

            let n = available.len();
            self.buf.extend_from_slice(available);
            self.reader.consume(n);
            if self.buf.len() > self.max_len {
                let len = self.buf.len();
                self.buf.clear();
                return Err(self.too_long(len));
            }
        }
    }

    fn too_long(&self, len: usize) -> Error {
        Error::Protocol(format!(
            "line of at least {} bytes exceeds the {} byte limit",
            len, self.max_len
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    const SECOND: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_line_roundtrip() {
        let original = json!({"action": "extract_current_tab", "strategy": "three-phase"});
        let mut bytes: Vec<u8> = Vec::new();
        write_line(&mut bytes, &original).await.unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));
        assert_eq!(bytes.iter().filter(|&&b| b == b'\n').count(), 1);

        let mut reader = LineReader::new(&bytes[..]);
        let decoded = reader.read_message(SECOND).await.unwrap().unwrap();
        assert_eq!(serde_json::Value::Object(decoded), original);
        assert!(reader.read_line(SECOND).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_multiple_lines_in_one_read_are_kept() {
        let data = b"AUTH abc\r\n{\"a\":1}\n{\"b\":2}\n";
        let mut reader = LineReader::new(&data[..]);
        assert_eq!(reader.read_line(SECOND).await.unwrap().unwrap(), b"AUTH abc");
        assert_eq!(reader.read_line(SECOND).await.unwrap().unwrap(), b"{\"a\":1}");
        assert_eq!(reader.read_line(SECOND).await.unwrap().unwrap(), b"{\"b\":2}");
        assert!(reader.read_line(SECOND).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_line_split_across_writes() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = LineReader::new(rx);
        let writer = tokio::spawn(async move {
            tx.write_all(b"{\"act").await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.write_all(b"ion\":\"x\"}\n").await.unwrap();
        });
        let line = reader.read_line(SECOND).await.unwrap().unwrap();
        assert_eq!(line, b"{\"action\":\"x\"}");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_unterminated_tail_is_close() {
        let mut reader = LineReader::new(&b"{\"a\":1}"[..]);
        assert!(reader.read_line(SECOND).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_line_times_out() {
        let (_tx, rx) = tokio::io::duplex(64);
        let mut reader = LineReader::new(rx);
        let err = reader.read_line(Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_partial_line_survives_timeout() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = LineReader::new(rx);
        tx.write_all(b"{\"a\":").await.unwrap();
        let err = reader
            .read_line(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        tx.write_all(b"1}\n").await.unwrap();
        assert_eq!(reader.read_line(SECOND).await.unwrap().unwrap(), b"{\"a\":1}");
    }

    #[tokio::test]
    async fn test_line_limit() {
        let data = format!("{}\n", "x".repeat(100));
        let mut reader = LineReader::with_max_len(data.as_bytes(), 10);
        assert!(matches!(
            reader.read_line(SECOND).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_read_message_rejects_bad_json() {
        let mut reader = LineReader::new(&b"{oops\n"[..]);
        assert!(matches!(
            reader.read_message(SECOND).await,
            Err(Error::Protocol(_))
        ));
    }
}
