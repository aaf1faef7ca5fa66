//! A minimal blocking-style async client for the IPC socket (spec
//! §4.5): connect, send one length-delimited `request` frame, read the
//! matching `response` frame, disconnect. Grounded on the same
//! `tokio_util::codec::LengthDelimitedCodec` framing `cccc_core::ipc`
//! uses server-side — the CLI is just the simplest possible client of
//! its own protocol.

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use cccc_core::runtime_home::RuntimeHome;
use futures_util::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

pub struct IpcClient {
    framed: Framed<UnixStream, LengthDelimitedCodec>,
}

impl IpcClient {
    pub async fn connect() -> Result<Self> {
        let home = RuntimeHome::resolve()?;
        let path = home.daemon_socket_path();
        let stream = UnixStream::connect(&path)
            .await
            .with_context(|| format!("failed to connect to daemon socket at {}; is the daemon running?", path.display()))?;
        Ok(Self { framed: Framed::new(stream, LengthDelimitedCodec::new()) })
    }

    /// Sends one `request{op, args, as_actor}` and returns the decoded
    /// `result` payload on success, or an error built from the response's
    /// `error` body.
    pub async fn request(&mut self, op: &str, args: serde_json::Value, as_actor: Option<&str>) -> Result<serde_json::Value> {
        let request = serde_json::json!({
            "type": "request",
            "id": "cli",
            "op": op,
            "args": args,
            "as_actor": as_actor,
        });
        self.framed.send(Bytes::from(serde_json::to_vec(&request)?)).await?;

        let chunk = self.framed.next().await.ok_or_else(|| anyhow!("daemon closed the connection without responding"))??;
        let response: serde_json::Value = serde_json::from_slice(&chunk)?;

        if response["ok"].as_bool().unwrap_or(false) {
            Ok(response["result"].clone())
        } else {
            let code = response["error"]["code"].as_str().unwrap_or("unknown");
            let message = response["error"]["message"].as_str().unwrap_or("request failed");
            Err(anyhow!("{code}: {message}"))
        }
    }
}
