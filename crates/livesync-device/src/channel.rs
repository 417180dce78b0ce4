//! Live sync transport channel
//!
//! A [`TransportChannel`] owns one socket into a running application. Writes
//! happen on the caller's task; a background reader task decodes inbound
//! frames, forwards listener replies, and records when the remote end goes
//! away.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      TransportChannel                         │
//! │                                                               │
//! │  send_reload() ──frame──▶ write half ─────────▶ application   │
//! │                                                               │
//! │  await_reply() ◀─mpsc─── reader task ◀── read half ◀──────    │
//! │                              │                                │
//! │  state()      ◀─watch────────┘ (RemoteClosed / ProtocolError) │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Teardown happens at most once per channel: the first of an explicit
//! [`TransportChannel::close`], a remote close, or a protocol error wins and
//! later ones are no-ops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::device::BoxedSocket;
use crate::framing::{read_frame, write_frame, ListenerReply, ReloadCommand};
use livesync_core::prelude::*;

/// Capacity of the inbound reply queue
const REPLY_CHANNEL_CAPACITY: usize = 16;

/// Why a channel was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// The process is exiting
    ExitSignal,
    /// The application closed the socket
    RemoteClosed,
    /// A read or write on the socket failed
    ProtocolError,
    /// The owning strategy is being replaced
    Replaced,
    /// The application was restarted and its listener went away
    Restarted,
}

/// Lifecycle state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    Closed(TeardownReason),
}

/// Mark the channel closed unless it already is. Returns true if this call
/// performed the transition.
fn mark_closed(state: &watch::Sender<ChannelState>, reason: TeardownReason) -> bool {
    state.send_if_modified(|current| {
        if *current == ChannelState::Open {
            *current = ChannelState::Closed(reason);
            true
        } else {
            false
        }
    })
}

/// A framed connection to the live sync listener of one application.
pub struct TransportChannel {
    app_identifier: String,
    writer: Option<WriteHalf<BoxedSocket>>,
    /// Last message id handed out; ids start at 1 for every new channel
    last_message_id: u64,
    state_tx: Arc<watch::Sender<ChannelState>>,
    state_rx: watch::Receiver<ChannelState>,
    /// Id the reader forwards replies for; 0 while nothing is outstanding
    awaited_id: Arc<AtomicU64>,
    replies: mpsc::Receiver<ListenerReply>,
    reader: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for TransportChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportChannel")
            .field("app_identifier", &self.app_identifier)
            .field("state", &*self.state_rx.borrow())
            .field("last_message_id", &self.last_message_id)
            .finish()
    }
}

impl TransportChannel {
    /// Take ownership of `socket` and start the reader task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(app_identifier: impl Into<String>, socket: BoxedSocket) -> Self {
        let app_identifier = app_identifier.into();
        let (read_half, write_half) = tokio::io::split(socket);
        let (state_tx, state_rx) = watch::channel(ChannelState::Open);
        let state_tx = Arc::new(state_tx);
        let (reply_tx, replies) = mpsc::channel(REPLY_CHANNEL_CAPACITY);
        let awaited_id = Arc::new(AtomicU64::new(0));

        let reader = tokio::spawn(Self::read_loop(
            app_identifier.clone(),
            read_half,
            reply_tx,
            Arc::clone(&awaited_id),
            Arc::clone(&state_tx),
        ));

        debug!("Live sync channel opened for {}", app_identifier);

        Self {
            app_identifier,
            writer: Some(write_half),
            last_message_id: 0,
            state_tx,
            state_rx,
            awaited_id,
            replies,
            reader: Some(reader),
        }
    }

    /// Background task: decode inbound frames until the stream ends.
    ///
    /// Only replies to the outstanding message are queued, so stale or
    /// unsolicited frames cannot crowd out the one a caller waits for.
    async fn read_loop(
        app_identifier: String,
        mut read_half: ReadHalf<BoxedSocket>,
        reply_tx: mpsc::Sender<ListenerReply>,
        awaited_id: Arc<AtomicU64>,
        state_tx: Arc<watch::Sender<ChannelState>>,
    ) {
        let reason = loop {
            match read_frame(&mut read_half).await {
                Ok(Some(text)) => {
                    trace!("Live sync socket for {} sent: {}", app_identifier, text);
                    match ListenerReply::parse(&text) {
                        Ok(reply) if reply.id == Some(awaited_id.load(Ordering::SeqCst)) => {
                            if reply_tx.try_send(reply).is_err() {
                                trace!("Dropping duplicate listener reply");
                            }
                        }
                        Ok(reply) => trace!("Discarding stale reply for message {:?}", reply.id),
                        Err(e) => debug!("Ignoring non-reply frame: {}", e),
                    }
                }
                Ok(None) => {
                    trace!("Live sync socket for {} closed by remote", app_identifier);
                    break TeardownReason::RemoteClosed;
                }
                Err(e) => {
                    trace!("Live sync socket error for {}: {}", app_identifier, e);
                    break TeardownReason::ProtocolError;
                }
            }
        };

        mark_closed(&state_tx, reason);
    }

    pub fn app_identifier(&self) -> &str {
        &self.app_identifier
    }

    /// Current lifecycle state
    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    /// True while the channel can still carry commands
    pub fn is_open(&self) -> bool {
        self.writer.is_some() && self.state() == ChannelState::Open
    }

    /// Id of the most recently sent message, 0 if none was sent yet
    pub fn last_message_id(&self) -> u64 {
        self.last_message_id
    }

    /// Subscribe to state changes; resolves once the channel closes
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    /// Send a raw JSON document.
    ///
    /// A failed write tears the channel down with
    /// [`TeardownReason::ProtocolError`] and returns [`Error::ProtocolWrite`].
    pub async fn send(&mut self, json: &str) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ChannelClosed);
        }

        let write_result = match self.writer.as_mut() {
            Some(writer) => write_frame(writer, json).await,
            None => return Err(Error::ChannelClosed),
        };

        if let Err(e) = write_result {
            warn!(
                "Live sync write to {} failed, closing channel: {}",
                self.app_identifier, e
            );
            self.close(TeardownReason::ProtocolError).await;
            return Err(Error::protocol_write(e.to_string()));
        }

        Ok(())
    }

    /// Send a reload command and return its message id.
    pub async fn send_reload(&mut self, ignore_cache: bool) -> Result<u64> {
        let id = self.last_message_id + 1;
        let json = ReloadCommand::new(id, ignore_cache).to_json()?;
        // ids are consumed even if the write fails so they are never reused
        self.last_message_id = id;
        // set before writing; the reply may arrive before await_reply runs
        self.awaited_id.store(id, Ordering::SeqCst);
        self.send(&json).await?;
        debug!("Sent reload #{} to {}", id, self.app_identifier);
        Ok(id)
    }

    /// Wait for the listener's reply to message `id`.
    ///
    /// Replies to other ids are discarded. Returns `Ok(None)` on timeout and
    /// [`Error::ChannelClosed`] if the socket closes first.
    pub async fn await_reply(&mut self, id: u64, timeout: Duration) -> Result<Option<ListenerReply>> {
        let replies = &mut self.replies;
        let wait = async {
            loop {
                match replies.recv().await {
                    Some(reply) if reply.id == Some(id) => return Ok(reply),
                    Some(other) => trace!("Skipping reply for message {:?}", other.id),
                    None => return Err(Error::ChannelClosed),
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(reply)) => Ok(Some(reply)),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                debug!(
                    "No reply to message #{} from {} within {:?}",
                    id, self.app_identifier, timeout
                );
                Ok(None)
            }
        }
    }

    /// Tear the channel down.
    ///
    /// Idempotent: returns `true` only for the call that performed the
    /// teardown. The write half is shut down and the reader task stopped.
    pub async fn close(&mut self, reason: TeardownReason) -> bool {
        let performed = mark_closed(&self.state_tx, reason);

        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                trace!("Ignoring shutdown error on {}: {}", self.app_identifier, e);
            }
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        if performed {
            debug!(
                "Live sync channel for {} closed: {:?}",
                self.app_identifier, reason
            );
        }
        performed
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
