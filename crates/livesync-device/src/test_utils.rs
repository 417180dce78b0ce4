//! Test utilities for the device layer
//!
//! Provides an in-memory [`FakeDevice`], a socket whose writes always fail,
//! and helpers for playing the listener side of a live sync socket.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use tokio::io::{duplex, AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;

use crate::device::{BoxedSocket, Device};
use crate::framing::{encode_frame, read_frame, ListenerReply};
use livesync_core::prelude::*;
use livesync_core::Platform;

/// Buffer size of in-memory sockets
const DUPLEX_BUFFER: usize = 64 * 1024;

/// A socket whose reads never complete and whose writes always fail.
#[derive(Debug, Default)]
pub struct FailingStream;

impl AsyncRead for FailingStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for FailingStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "socket write failed",
        )))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Read one frame written by a channel, as the listener would.
pub async fn read_peer_frame(peer: &mut DuplexStream) -> Result<String> {
    read_frame(peer).await?.ok_or(Error::ChannelClosed)
}

/// Spawn a listener that answers every command with `didRefresh`.
///
/// When `reply` is `None` the listener reads commands but never answers,
/// like runtimes without a confirmation channel. The task resolves to the
/// commands it received once the socket closes.
pub fn spawn_listener(mut peer: DuplexStream, reply: Option<bool>) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let mut received = Vec::new();
        while let Ok(Some(text)) = read_frame(&mut peer).await {
            if let Some(did_refresh) = reply {
                if let Some(id) = ListenerReply::parse(&text).ok().and_then(|m| m.id) {
                    let answer = format!(
                        r#"{{"id":{},"result":{{"didRefresh":{}}}}}"#,
                        id, did_refresh
                    );
                    if let Ok(frame) = encode_frame(&answer) {
                        if peer.write_all(&frame).await.is_err() {
                            break;
                        }
                    }
                }
            }
            received.push(text);
        }
        received
    })
}

/// How [`FakeDevice::socket_handle`] behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketMode {
    /// No listener: `socket_handle` returns `None`
    Unavailable,
    /// A fresh in-memory socket per call; the peer end is queued
    Duplex,
    /// A socket whose writes fail
    FailingWrites,
    /// A fresh in-memory socket per call with a listener task on the peer
    /// end, answering every reload with `reply` (see [`spawn_listener`])
    Listening { reply: Option<bool> },
}

/// A recorded device operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOp {
    List(String),
    Push { local: String, remote: String },
    Pull(String),
    Delete(String),
    Socket(String),
    Restart(String),
}

#[derive(Debug)]
struct FakeState {
    files: BTreeMap<String, Vec<u8>>,
    ops: Vec<DeviceOp>,
    listing_override: Option<String>,
    fail_pushes: bool,
    fail_pulls: bool,
    fail_restart: bool,
    socket_mode: SocketMode,
    peers: Vec<DuplexStream>,
    listeners: Vec<JoinHandle<Vec<String>>>,
}

/// In-memory device: a remote file map plus a log of every operation.
#[derive(Debug, Clone)]
pub struct FakeDevice {
    identifier: String,
    platform: Platform,
    state: Arc<Mutex<FakeState>>,
}

impl FakeDevice {
    pub fn new(identifier: &str, platform: Platform) -> Self {
        Self {
            identifier: identifier.to_string(),
            platform,
            state: Arc::new(Mutex::new(FakeState {
                files: BTreeMap::new(),
                ops: Vec::new(),
                listing_override: None,
                fail_pushes: false,
                fail_pulls: false,
                fail_restart: false,
                socket_mode: SocketMode::Unavailable,
                peers: Vec::new(),
                listeners: Vec::new(),
            })),
        }
    }

    pub fn android(identifier: &str) -> Self {
        Self::new(identifier, Platform::Android)
    }

    pub fn ios(identifier: &str) -> Self {
        Self::new(identifier, Platform::IOS)
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a remote file directly
    pub fn put_remote(&self, path: &str, bytes: Vec<u8>) {
        self.lock().files.insert(path.to_string(), bytes);
    }

    /// Contents of a remote file
    pub fn remote(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    pub fn remote_paths(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }

    /// Make `list_remote_file` return this text for every path
    pub fn set_listing_override(&self, listing: Option<String>) {
        self.lock().listing_override = listing;
    }

    pub fn fail_pushes(&self, fail: bool) {
        self.lock().fail_pushes = fail;
    }

    pub fn fail_pulls(&self, fail: bool) {
        self.lock().fail_pulls = fail;
    }

    pub fn fail_restart(&self, fail: bool) {
        self.lock().fail_restart = fail;
    }

    pub fn set_socket_mode(&self, mode: SocketMode) {
        self.lock().socket_mode = mode;
    }

    /// Take the listener end of the oldest socket handed out
    pub fn take_peer(&self) -> Option<DuplexStream> {
        let mut state = self.lock();
        if state.peers.is_empty() {
            None
        } else {
            Some(state.peers.remove(0))
        }
    }

    /// Take the listener task of the oldest socket handed out in
    /// [`SocketMode::Listening`]. It resolves to the commands received once
    /// the channel closes.
    pub fn take_listener(&self) -> Option<JoinHandle<Vec<String>>> {
        let mut state = self.lock();
        if state.listeners.is_empty() {
            None
        } else {
            Some(state.listeners.remove(0))
        }
    }

    pub fn ops(&self) -> Vec<DeviceOp> {
        self.lock().ops.clone()
    }

    pub fn push_count(&self) -> usize {
        self.count(|op| matches!(op, DeviceOp::Push { .. }))
    }

    pub fn pull_count(&self) -> usize {
        self.count(|op| matches!(op, DeviceOp::Pull(_)))
    }

    pub fn restart_count(&self) -> usize {
        self.count(|op| matches!(op, DeviceOp::Restart(_)))
    }

    pub fn socket_requests(&self) -> usize {
        self.count(|op| matches!(op, DeviceOp::Socket(_)))
    }

    fn count(&self, predicate: impl Fn(&DeviceOp) -> bool) -> usize {
        self.lock().ops.iter().filter(|op| predicate(op)).count()
    }
}

impl Device for FakeDevice {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn platform(&self) -> Platform {
        self.platform
    }

    async fn list_remote_file(&self, path: &str) -> Result<Option<String>> {
        let mut state = self.lock();
        state.ops.push(DeviceOp::List(path.to_string()));
        if let Some(listing) = &state.listing_override {
            return Ok(Some(listing.clone()));
        }
        Ok(state.files.contains_key(path).then(|| path.to_string()))
    }

    async fn push_file(&self, local: &Path, remote_path: &str) -> Result<()> {
        let bytes = std::fs::read(local)
            .map_err(|e| Error::device_io(format!("push {}: {}", local.display(), e)))?;
        let mut state = self.lock();
        state.ops.push(DeviceOp::Push {
            local: local.to_string_lossy().into_owned(),
            remote: remote_path.to_string(),
        });
        if state.fail_pushes {
            return Err(Error::device_io(format!("push to {} failed", remote_path)));
        }
        state.files.insert(remote_path.to_string(), bytes);
        Ok(())
    }

    async fn pull_file(&self, remote_path: &str, local_dir: &Path) -> Result<()> {
        let bytes = {
            let mut state = self.lock();
            state.ops.push(DeviceOp::Pull(remote_path.to_string()));
            if state.fail_pulls {
                return Err(Error::device_io(format!("pull of {} failed", remote_path)));
            }
            state.files.get(remote_path).cloned().ok_or_else(|| {
                Error::device_io(format!("remote object '{}' does not exist", remote_path))
            })?
        };
        let name = remote_path.rsplit('/').next().unwrap_or(remote_path);
        std::fs::write(local_dir.join(name), bytes)?;
        Ok(())
    }

    async fn delete_remote_path(&self, path: &str) -> Result<()> {
        let mut state = self.lock();
        state.ops.push(DeviceOp::Delete(path.to_string()));
        let prefix = format!("{}/", path.trim_end_matches('/'));
        state
            .files
            .retain(|key, _| key != path && !key.starts_with(&prefix));
        Ok(())
    }

    async fn socket_handle(&self, app_id: &str) -> Result<Option<BoxedSocket>> {
        let mut state = self.lock();
        state.ops.push(DeviceOp::Socket(app_id.to_string()));
        match state.socket_mode {
            SocketMode::Unavailable => Ok(None),
            SocketMode::FailingWrites => Ok(Some(Box::new(FailingStream))),
            SocketMode::Duplex => {
                let (local, peer) = duplex(DUPLEX_BUFFER);
                state.peers.push(peer);
                Ok(Some(Box::new(local)))
            }
            SocketMode::Listening { reply } => {
                let (local, peer) = duplex(DUPLEX_BUFFER);
                state.listeners.push(spawn_listener(peer, reply));
                Ok(Some(Box::new(local)))
            }
        }
    }

    async fn restart_application(&self, app_id: &str) -> Result<()> {
        let mut state = self.lock();
        state.ops.push(DeviceOp::Restart(app_id.to_string()));
        if state.fail_restart {
            return Err(Error::device_io(format!("could not restart {}", app_id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_fake_device_push_pull() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("a.txt");
        std::fs::write(&local, "hello").unwrap();

        let device = FakeDevice::android("fake");
        device.push_file(&local, "/remote/a.txt").await.unwrap();
        assert_eq!(device.remote("/remote/a.txt").unwrap(), b"hello");

        let out = tempdir().unwrap();
        device.pull_file("/remote/a.txt", out.path()).await.unwrap();
        assert_eq!(std::fs::read(out.path().join("a.txt")).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_fake_device_delete_tree() {
        let device = FakeDevice::android("fake");
        device.put_remote("/r/app/a.js", vec![1]);
        device.put_remote("/r/app/sub/b.js", vec![2]);
        device.put_remote("/r/application", vec![3]);

        device.delete_remote_path("/r/app").await.unwrap();
        assert_eq!(device.remote_paths(), vec!["/r/application".to_string()]);
    }

    #[tokio::test]
    async fn test_fake_device_socket_modes() {
        let device = FakeDevice::ios("fake");
        assert!(device.socket_handle("app").await.unwrap().is_none());

        device.set_socket_mode(SocketMode::Duplex);
        assert!(device.socket_handle("app").await.unwrap().is_some());
        assert!(device.take_peer().is_some());
        assert_eq!(device.socket_requests(), 2);
    }

    #[tokio::test]
    async fn test_listening_socket_answers_reloads() {
        use crate::channel::TransportChannel;
        use std::time::Duration;

        let device = FakeDevice::android("fake");
        device.set_socket_mode(SocketMode::Listening { reply: Some(true) });

        let socket = device.socket_handle("app").await.unwrap().unwrap();
        let mut channel = TransportChannel::open("app", socket);
        let id = channel.send_reload(false).await.unwrap();
        let reply = channel
            .await_reply(id, Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert!(reply.did_refresh());

        channel.close(crate::channel::TeardownReason::ExitSignal).await;
        let received = device.take_listener().unwrap().await.unwrap();
        assert_eq!(received.len(), 1);
    }
}
