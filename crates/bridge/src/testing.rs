use serde_json::Value;
use tokio::io::{AsyncWriteExt, DuplexStream};

use tabreader_core::Message;

use crate::codec::{read_frame, write_frame};

const PIPE_CAPACITY: usize = 64 * 1024;

pub(crate) fn obj(value: Value) -> Message {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// The extension's ends of the two stdio pipes.
pub(crate) struct FakeExtension {
    /// What the host writes to its stdout.
    inbox: DuplexStream,
    /// What the host reads from its stdin.
    outbox: DuplexStream,
}

/// Returns the fake extension plus the host's stdin reader and stdout writer.
pub(crate) fn extension_pipes() -> (FakeExtension, DuplexStream, DuplexStream) {
    let (host_out, inbox) = tokio::io::duplex(PIPE_CAPACITY);
    let (outbox, host_in) = tokio::io::duplex(PIPE_CAPACITY);
    (FakeExtension { inbox, outbox }, host_in, host_out)
}

impl FakeExtension {
    pub(crate) async fn recv(&mut self) -> Option<Message> {
        read_frame(&mut self.inbox).await.expect("frame from host")
    }

    pub(crate) async fn send(&mut self, value: &Value) {
        write_frame(&mut self.outbox, value)
            .await
            .expect("frame to host");
    }

    pub(crate) async fn send_raw(&mut self, payload: &[u8]) {
        let len = payload.len() as u32;
        self.outbox.write_all(&len.to_le_bytes()).await.unwrap();
        self.outbox.write_all(payload).await.unwrap();
    }

    /// Answer every request with `{"status":"success","content":<action>}`
    /// until the host goes away.
    pub(crate) fn spawn_echo(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(request) = self.recv().await {
                let mut reply = request.clone();
                reply.insert("status".into(), Value::from("success"));
                reply.insert(
                    "content".into(),
                    request.get("action").cloned().unwrap_or(Value::Null),
                );
                self.send(&Value::Object(reply)).await;
            }
        })
    }
}
