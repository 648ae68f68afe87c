//! Worker IPC protocol
//!
//! Length-delimited JSON over a UNIX stream socket. One request, one
//! response per connection. Both sides of the wire use the helpers here so
//! the framing cannot drift.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::{Error, Result};

/// One evaluation request sent to a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// Serialized strategy flags, passed to the engine verbatim
    pub strategy_args: String,
    /// Target catalog group to probe
    pub target_group: String,
}

/// Aggregated outcome of one evaluation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkerResult {
    pub success: bool,
    #[serde(default)]
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub success_count: usize,
    #[serde(default)]
    pub total_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub passed: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<String>,
}

impl WorkerResult {
    /// A failed evaluation carrying only an error message
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Success percentage over the probe set, 0 when nothing ran
    pub fn success_rate(&self) -> u32 {
        if self.total_count == 0 {
            return 0;
        }
        (self.success_count * 100 / self.total_count) as u32
    }
}

/// Framed transport over any byte stream
pub type JsonFramed<S> = Framed<S, LengthDelimitedCodec>;

/// Wrap a stream in the length-delimited framing used by the protocol
pub fn framed<S: AsyncRead + AsyncWrite>(stream: S) -> JsonFramed<S> {
    Framed::new(stream, LengthDelimitedCodec::new())
}

/// Send one JSON message as a single frame
pub async fn send<S, T>(framed: &mut JsonFramed<S>, msg: &T) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(msg)?;
    framed.send(Bytes::from(payload)).await?;
    Ok(())
}

/// Receive one JSON message from the next frame
pub async fn recv<S, T>(framed: &mut JsonFramed<S>) -> Result<T>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: DeserializeOwned,
{
    let frame = framed.next().await.ok_or(Error::ConnectionClosed)??;
    Ok(serde_json::from_slice(&frame)?)
}
