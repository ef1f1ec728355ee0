use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use tabreader_core::message::{self, Message};
use tabreader_core::{Error, Result};

use crate::codec::{encode_frame, read_frame};
use crate::pending::PendingTable;

/// Frames waiting for the stdio writer.
const OUTBOUND_QUEUE: usize = 256;

/// Why the extension read loop stopped. Either way the session is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    /// The extension closed its end of the pipe.
    Closed,
    /// Reading from the pipe failed.
    ReadError,
}

/// The bridge's single stdio connection to the browser extension.
///
/// Outbound frames go through a queue to one writer task, so a pipe the
/// extension has stopped draining never holds up a caller past its deadline.
pub struct ExtensionSession {
    outbound: mpsc::Sender<Vec<u8>>,
    connected: AtomicBool,
    pending: PendingTable,
    received: AtomicU64,
    _writer: JoinHandle<()>,
}

impl ExtensionSession {
    /// Must be called from within a tokio runtime.
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (outbound, rx) = mpsc::channel(OUTBOUND_QUEUE);
        Self {
            outbound,
            connected: AtomicBool::new(false),
            pending: PendingTable::new(),
            received: AtomicU64::new(0),
            _writer: tokio::spawn(write_frames(writer, rx)),
        }
    }

    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of frames received from the extension so far.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Queue one frame for the extension. Fails with
    /// `Error::ExtensionDisconnected` once the writer has stopped.
    pub async fn send(&self, message: &Message) -> Result<()> {
        let frame = encode_frame(message)?;
        self.outbound
            .send(frame)
            .await
            .map_err(|_| Error::ExtensionDisconnected)?;
        debug!(
            request_id = message::request_id(message),
            action = message::action(message).unwrap_or("unknown"),
            "Queued frame for extension"
        );
        Ok(())
    }

    /// Forward `request` and wait for the correlated answer.
    ///
    /// Fails fast with `Error::ExtensionDisconnected`, without consuming an
    /// id, when the extension is not connected. Any `request_id` the caller
    /// put on the request is replaced. `timeout` covers queueing the frame
    /// and waiting for the answer together.
    pub async fn request(&self, mut request: Message, timeout: Duration) -> Result<Message> {
        if !self.is_connected() {
            return Err(Error::ExtensionDisconnected);
        }
        let deadline = Instant::now() + timeout;

        let handle = self.pending.allocate();
        let id = handle.id();
        // The reader may have shut down between the check and the allocation,
        // after it already failed every slot it could see.
        if !self.is_connected() {
            return Err(Error::ExtensionDisconnected);
        }

        message::set_request_id(&mut request, id);
        debug!(
            request_id = id,
            action = message::action(&request).unwrap_or("unknown"),
            "Forwarding request to extension"
        );
        match tokio::time::timeout_at(deadline, self.send(&request)).await {
            Ok(sent) => sent?,
            Err(_) => {
                warn!(request_id = id, "Outbound queue to extension is full");
                return Err(Error::Timeout(format!(
                    "request {} could not be queued within {}s",
                    id,
                    timeout.as_secs_f64()
                )));
            }
        }
        handle
            .wait(deadline.saturating_duration_since(Instant::now()))
            .await
    }

    /// Read frames from the extension until it goes away, routing answers to
    /// their pending requests. The stdio read itself has no deadline: the
    /// extension speaks when it has something to say.
    pub async fn run_reader<R>(&self, mut reader: R) -> ReaderExit
    where
        R: AsyncRead + Unpin,
    {
        self.connected.store(true, Ordering::SeqCst);
        info!("Extension message loop started");

        let exit = loop {
            match read_frame(&mut reader).await {
                Ok(Some(message)) => {
                    self.received.fetch_add(1, Ordering::Relaxed);
                    self.route(message);
                }
                Ok(None) => {
                    info!(received = self.received(), "Extension disconnected");
                    break ReaderExit::Closed;
                }
                Err(Error::Protocol(e)) => {
                    warn!(error = %e, "Discarding malformed frame from extension");
                }
                Err(e) => {
                    error!(error = %e, "Failed to read from extension");
                    break ReaderExit::ReadError;
                }
            }
        };

        self.connected.store(false, Ordering::SeqCst);
        let released = self.pending.fail_all();
        if released > 0 {
            warn!(released, "Released pending requests after extension disconnect");
        }
        exit
    }

    fn route(&self, message: Message) {
        let action = message::action(&message).unwrap_or("unknown").to_string();
        match message::request_id(&message) {
            Some(id) => {
                if self.pending.deliver(id, message) {
                    debug!(request_id = id, action = %action, "Matched response to request");
                } else {
                    debug!(request_id = id, action = %action, "Dropping response with no pending request");
                }
            }
            None => {
                info!(action = %action, "Unsolicited message from extension");
            }
        }
    }
}

async fn write_frames<W>(mut writer: W, mut rx: mpsc::Receiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        let written = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            error!(error = %e, "Failed to write to extension");
            break;
        }
    }
    debug!("Extension writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{extension_pipes, obj};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_request_fails_fast_when_not_connected() {
        let (_ext, _host_in, host_out) = extension_pipes();
        let session = ExtensionSession::new(host_out);
        let err = session
            .request(obj(json!({"action": "ping"})), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExtensionDisconnected));
        assert_eq!(session.pending().last_id(), 0);
    }

    #[tokio::test]
    async fn test_request_roundtrip_through_reader() {
        let (mut ext, host_in, host_out) = extension_pipes();
        let session = Arc::new(ExtensionSession::new(host_out));
        let reader = tokio::spawn({
            let session = session.clone();
            async move { session.run_reader(host_in).await }
        });
        tokio::task::yield_now().await;
        while !session.is_connected() {
            tokio::task::yield_now().await;
        }

        let req = tokio::spawn({
            let session = session.clone();
            async move {
                session
                    .request(
                        obj(json!({"action": "extract_current_tab", "request_id": 999})),
                        Duration::from_secs(5),
                    )
                    .await
            }
        });

        let forwarded = ext.recv().await.unwrap();
        // caller-supplied ids are overwritten
        assert_eq!(forwarded.get("request_id"), Some(&json!(1)));
        assert_eq!(forwarded.get("action"), Some(&json!("extract_current_tab")));
        ext.send(&json!({"status": "success", "content": "hi", "request_id": 1}))
            .await;

        let reply = req.await.unwrap().unwrap();
        assert_eq!(reply.get("content"), Some(&json!("hi")));

        drop(ext);
        assert_eq!(reader.await.unwrap(), ReaderExit::Closed);
        assert!(!session.is_connected());
        assert_eq!(session.received(), 1);
    }

    #[tokio::test]
    async fn test_reader_survives_garbage_and_unsolicited_frames() {
        let (mut ext, host_in, host_out) = extension_pipes();
        let session = Arc::new(ExtensionSession::new(host_out));
        let pending = session.pending().clone();
        let handle = pending.register(5).unwrap();

        let reader = tokio::spawn({
            let session = session.clone();
            async move { session.run_reader(host_in).await }
        });

        ext.send_raw(b"{broken").await;
        ext.send(&json!({"action": "tab_changed"})).await;
        ext.send(&json!({"status": "success", "request_id": 77})).await;
        ext.send(&json!({"status": "success", "request_id": 5})).await;

        let reply = handle.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(reply.get("request_id"), Some(&json!(5)));

        drop(ext);
        assert_eq!(reader.await.unwrap(), ReaderExit::Closed);
        assert_eq!(session.received(), 3);
    }

    #[tokio::test]
    async fn test_disconnect_releases_in_flight_requests() {
        let (mut ext, host_in, host_out) = extension_pipes();
        let session = Arc::new(ExtensionSession::new(host_out));
        let reader = tokio::spawn({
            let session = session.clone();
            async move { session.run_reader(host_in).await }
        });
        while !session.is_connected() {
            tokio::task::yield_now().await;
        }

        let req = tokio::spawn({
            let session = session.clone();
            async move {
                session
                    .request(obj(json!({"action": "slow"})), Duration::from_secs(60))
                    .await
            }
        });
        ext.recv().await.unwrap();
        drop(ext);

        assert!(matches!(
            req.await.unwrap(),
            Err(Error::ExtensionDisconnected)
        ));
        reader.await.unwrap();
        assert!(session.pending().is_empty());

        let err = session
            .request(obj(json!({"action": "again"})), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExtensionDisconnected));
        assert_eq!(session.pending().last_id(), 1);
    }

    #[tokio::test]
    async fn test_request_deadline_covers_a_stalled_pipe() {
        // stdout holds less than one frame and the extension never drains it
        let (host_out, _ext_inbox) = tokio::io::duplex(1024);
        let (_ext_outbox, host_in) = tokio::io::duplex(1024);
        let session = Arc::new(ExtensionSession::new(host_out));
        let reader = tokio::spawn({
            let session = session.clone();
            async move { session.run_reader(host_in).await }
        });
        while !session.is_connected() {
            tokio::task::yield_now().await;
        }

        let padding = "x".repeat(4096);
        let started = Instant::now();
        let first = tokio::time::timeout(
            Duration::from_secs(3),
            session.request(
                obj(json!({"action": "big", "padding": padding})),
                Duration::from_millis(300),
            ),
        )
        .await
        .expect("request outlived its own deadline");
        assert!(matches!(first, Err(Error::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(2));

        // later requests are not queued behind the stuck write
        let second = tokio::time::timeout(
            Duration::from_secs(3),
            session.request(obj(json!({"action": "small"})), Duration::from_millis(300)),
        )
        .await
        .expect("second request outlived its own deadline");
        assert!(matches!(second, Err(Error::Timeout(_))));
        assert!(session.pending().is_empty());
        reader.abort();
    }
}
