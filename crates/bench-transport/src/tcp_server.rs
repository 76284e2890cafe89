//! TCP server moving frames between a client socket and the frame queues.
//!
//! One client is served at a time. While a session is active, further
//! connections are accepted and immediately closed. Each session runs a
//! reader (socket → input queue) and a writer (output queue → socket);
//! when either side ends, pending output is discarded and the link is
//! marked disconnected. Frames already read stay in the input queue.

use crate::frame::FrameDecoder;
use crate::queue::FrameQueue;
use bench_common::error::{BenchError, BenchResult};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Read buffer size per socket read.
const READ_CHUNK: usize = 512;

#[derive(Debug, Default)]
struct LinkInner {
    connected: AtomicBool,
    sessions: AtomicU64,
}

/// Shared view of the client link, readable from the control loop.
#[derive(Debug, Clone, Default)]
pub struct LinkState {
    inner: Arc<LinkInner>,
}

impl LinkState {
    /// Create a disconnected link.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a client session is active.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Number of sessions started so far.
    #[must_use]
    pub fn session_count(&self) -> u64 {
        self.inner.sessions.load(Ordering::Acquire)
    }

    /// Mark a new session as active.
    pub fn mark_connected(&self) {
        self.inner.sessions.fetch_add(1, Ordering::AcqRel);
        self.inner.connected.store(true, Ordering::Release);
    }

    /// Mark the active session as ended.
    pub fn mark_disconnected(&self) {
        self.inner.connected.store(false, Ordering::Release);
    }
}

/// Single-client frame server.
#[derive(Debug)]
pub struct TcpServer {
    listener: TcpListener,
    input: FrameQueue,
    output: FrameQueue,
    link: LinkState,
}

impl TcpServer {
    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::Io`] if the address cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        input: FrameQueue,
        output: FrameQueue,
        link: LinkState,
    ) -> BenchResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BenchError::Io(format!("failed to bind {addr}: {e}")))?;
        info!(addr = %addr, "TCP server listening");

        Ok(Self {
            listener,
            input,
            output,
            link,
        })
    }

    /// Address the server is listening on.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::Io`] if the socket address cannot be queried.
    pub fn local_addr(&self) -> BenchResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve clients until `shutdown` turns true or its sender
    /// is dropped. Waits for the active session to close before returning.
    ///
    /// # Errors
    ///
    /// Currently always returns `Ok`; accept failures are logged and retried.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> BenchResult<()> {
        let mut session: Option<JoinHandle<()>> = None;

        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if self.link.is_connected() {
                            warn!(peer = %peer, "Refusing connection, a client is already connected");
                            drop(stream);
                            continue;
                        }
                        self.link.mark_connected();
                        info!(peer = %peer, session = self.link.session_count(), "Client connected");
                        session = Some(tokio::spawn(run_session(
                            stream,
                            peer,
                            self.input.clone(),
                            self.output.clone(),
                            self.link.clone(),
                            shutdown.clone(),
                        )));
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
            }
        }

        if let Some(handle) = session {
            if let Err(e) = handle.await {
                warn!(error = %e, "Session task failed");
            }
        }
        info!("TCP server stopped");
        Ok(())
    }
}

async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    input: FrameQueue,
    output: FrameQueue,
    link: LinkState,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }
    // Samples produced while nobody was listening are stale
    output.clear();

    let (reader, writer) = stream.into_split();
    let outcome = tokio::select! {
        r = read_loop(reader, input.clone()) => r,
        w = write_loop(writer, output.clone()) => w,
        _ = shutdown.changed() => Ok(()),
    };

    match outcome {
        Ok(()) => info!(peer = %peer, "Client disconnected"),
        Err(e) => warn!(peer = %peer, error = %e, "Client session ended with error"),
    }

    // Frames already read stay queued for the control tick
    output.clear();
    link.mark_disconnected();
}

async fn read_loop(mut reader: OwnedReadHalf, input: FrameQueue) -> BenchResult<()> {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        decoder.extend(&buf[..n]);
        while let Some(frame) = decoder.next_frame()? {
            trace!(id = frame.id(), len = frame.payload().len(), "Frame received");
            input.push(frame);
        }
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, output: FrameQueue) -> BenchResult<()> {
    let mut buf = Vec::new();

    loop {
        let frames = output.drain();
        if frames.is_empty() {
            output.notified().await;
            continue;
        }

        buf.clear();
        for frame in &frames {
            frame.encode_into(&mut buf);
        }
        writer.write_all(&buf).await?;
        trace!(frames = frames.len(), bytes = buf.len(), "Frames sent");
    }
}
