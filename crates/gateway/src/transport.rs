//! Transport seam between the connection state machine and the wire.
//!
//! The gateway owns exactly one link at a time. `Transport::open` hands back
//! the two halves of an established session: a sink the state machine keeps
//! behind its lock for sends, and a stream a dedicated reader task drains.
//! Production traffic runs over websockets; tests and in-process demos use
//! the loopback transport in [`memory`].

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Transport-level failures. All of them are recovered locally by the
/// connection state machine; none escape to dispatch callers.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Websocket protocol or socket error
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    /// The link is closed
    #[error("transport closed")]
    Closed,
}

/// Write half of an established link.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the link from our side. Best effort.
    async fn close(&mut self);
}

/// Read half of an established link.
#[async_trait]
pub trait FrameStream: Send {
    /// Next inbound text frame; `None` once the peer has closed the link.
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>>;
}

/// Opens links to the dispatch endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Dial `endpoint` and return the two halves of the session.
    async fn open(
        &self,
        endpoint: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), TransportError>;
}

/// Production websocket transport.
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn open(
        &self,
        endpoint: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), TransportError> {
        let (ws, _response) = connect_async(endpoint).await?;
        debug!(endpoint, "websocket session established");
        let (sink, stream) = ws.split();
        Ok((Box::new(WsSink { sink }), Box::new(WsStream { stream })))
    }
}

type WsConn = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct WsSink {
    sink: SplitSink<WsConn, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.sink.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
    }
}

struct WsStream {
    stream: SplitStream<WsConn>,
}

#[async_trait]
impl FrameStream for WsStream {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                // Control and binary frames carry no gateway traffic
                Ok(_) => continue,
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}

pub mod memory {
    //! In-process loopback transport.
    //!
    //! Each `open` yields a fresh link plus a [`MemoryPeer`] handle the other
    //! side of the test drives: it reads what the gateway sent and injects
    //! frames toward the gateway. Dropping a peer closes the link.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Peer-side handle for one established loopback link.
    pub struct MemoryPeer {
        /// Frames the gateway wrote on this link
        pub outbound: mpsc::UnboundedReceiver<String>,
        /// Inject frames toward the gateway; dropping this closes the link
        pub inbound: mpsc::UnboundedSender<String>,
    }

    /// Loopback transport with scriptable open failures.
    #[derive(Default)]
    pub struct MemoryTransport {
        fail_next_opens: AtomicU32,
        opens: AtomicU32,
        peers: Mutex<VecDeque<MemoryPeer>>,
    }

    impl MemoryTransport {
        /// Create a loopback transport.
        pub fn new() -> Self {
            Self::default()
        }

        /// Make the next `n` opens fail as if the endpoint refused us.
        pub fn fail_next_opens(&self, n: u32) {
            self.fail_next_opens.store(n, Ordering::SeqCst);
        }

        /// Number of `open` calls observed so far.
        pub fn open_count(&self) -> u32 {
            self.opens.load(Ordering::SeqCst)
        }

        /// Take the peer handle for the oldest established link.
        pub fn take_peer(&self) -> Option<MemoryPeer> {
            self.peers.lock().unwrap().pop_front()
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn open(
            &self,
            _endpoint: &str,
        ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), TransportError> {
            self.opens.fetch_add(1, Ordering::SeqCst);

            let remaining = self.fail_next_opens.load(Ordering::SeqCst);
            if remaining > 0 {
                if remaining != u32::MAX {
                    self.fail_next_opens.store(remaining - 1, Ordering::SeqCst);
                }
                return Err(TransportError::Closed);
            }

            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            self.peers.lock().unwrap().push_back(MemoryPeer {
                outbound: out_rx,
                inbound: in_tx,
            });

            Ok((
                Box::new(MemorySink { tx: out_tx }),
                Box::new(MemoryStream { rx: in_rx }),
            ))
        }
    }

    struct MemorySink {
        tx: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl FrameSink for MemorySink {
        async fn send(&mut self, text: String) -> Result<(), TransportError> {
            self.tx.send(text).map_err(|_| TransportError::Closed)
        }

        async fn close(&mut self) {}
    }

    struct MemoryStream {
        rx: mpsc::UnboundedReceiver<String>,
    }

    #[async_trait]
    impl FrameStream for MemoryStream {
        async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
            self.rx.recv().await.map(Ok)
        }
    }

}
