//! Wire format of the live sync socket
//!
//! Every message in either direction is a JSON document encoded as UTF-16LE
//! and prefixed with its encoded byte length as a 4-byte big-endian integer:
//!
//! ```text
//! ┌──────────────────┬──────────────────────────────────────┐
//! │ length (u32, BE) │ JSON text, UTF-16LE, `length` bytes   │
//! └──────────────────┴──────────────────────────────────────┘
//! ```
//!
//! The listener inside the application decodes exactly this layout, so the
//! encoding must not change.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use livesync_core::prelude::*;

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Upper bound for inbound frames; anything larger is treated as corruption
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Method name of the reload command understood by the listener
pub const RELOAD_METHOD: &str = "Page.reload";

/// Encode text as UTF-16LE bytes
pub fn encode_utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Decode UTF-16LE bytes into a string
pub fn decode_utf16le(bytes: &[u8]) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(Error::protocol(format!(
            "odd UTF-16 payload length {}",
            bytes.len()
        )));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| Error::protocol(format!("invalid UTF-16: {}", e)))
}

/// Build a complete frame (length prefix plus payload) for `text`
pub fn encode_frame(text: &str) -> Result<Vec<u8>> {
    let payload = encode_utf16le(text);
    let length = u32::try_from(payload.len())
        .map_err(|_| Error::protocol(format!("frame of {} bytes is too large", payload.len())))?;

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_BYTES + payload.len());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, text: &str) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let frame = encode_frame(text)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame.
///
/// Returns `Ok(None)` on a clean end of stream before a new frame starts. A
/// stream that ends inside a frame, an oversized length, or an undecodable
/// payload is a protocol error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = [0u8; LENGTH_PREFIX_BYTES];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_BYTES {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::protocol("stream ended inside frame header"));
        }
        filled += n;
    }

    let length = u32::from_be_bytes(prefix) as usize;
    if length > MAX_FRAME_BYTES {
        return Err(Error::protocol(format!(
            "frame length {} exceeds limit of {}",
            length, MAX_FRAME_BYTES
        )));
    }

    let mut payload = vec![0u8; length];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| Error::protocol(format!("stream ended inside frame payload: {}", e)))?;

    decode_utf16le(&payload).map(Some)
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Reload command sent to the listener.
///
/// Serializes as `{"method":"Page.reload","params":{"ignoreCache":false},"id":1}`.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadCommand {
    pub method: &'static str,
    pub params: ReloadParams,
    pub id: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadParams {
    pub ignore_cache: bool,
}

impl ReloadCommand {
    pub fn new(id: u64, ignore_cache: bool) -> Self {
        Self {
            method: RELOAD_METHOD,
            params: ReloadParams { ignore_cache },
            id,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A message received from the listener.
///
/// Listeners that report results reply to a command with the same `id` and
/// either a `result` carrying `didRefresh` or an `error` member.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ListenerReply {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl ListenerReply {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Whether the application confirmed it applied the change.
    ///
    /// An error reply, or a result without `didRefresh: true`, is not a
    /// confirmation.
    pub fn did_refresh(&self) -> bool {
        if self.error.is_some() {
            return false;
        }
        self.result
            .as_ref()
            .and_then(|r| r.get("didRefresh"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
