use crate::{
    chat::Frame,
    dialog::DialogManager,
    entity::{ConnectionId, ConversationKey},
    error::{ChatError, ChatResult},
    registry::{PeerHandle, Registration, Registry},
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::{fmt, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// What the transport handed us on a connection's read side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A chat frame to persist and forward.
    Frame(Frame),
    /// The peer asked to close.
    Close,
    /// Transport housekeeping (ping/pong).
    Control,
}

/// Persists inbound frames and forwards them to the live connections on the
/// other side of the conversation.
#[derive(Debug)]
pub struct MessageRouter {
    registry: Arc<Registry>,
    dialogs: DialogManager,
    outbound_buffer: usize,
}

impl MessageRouter {
    pub fn new(registry: Arc<Registry>, dialogs: DialogManager, outbound_buffer: usize) -> Self {
        Self {
            registry,
            dialogs,
            outbound_buffer: outbound_buffer.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Store a frame sent on `key` and hand it to every connection listening
    /// under the mirror key. Returns how many peers accepted it.
    ///
    /// A peer that cannot take the frame is logged and skipped.
    pub async fn route(&self, key: ConversationKey, frame: Frame) -> ChatResult<usize> {
        self.dialogs.record_message(key, &frame.body()).await?;

        let peers = self.registry.lookup(&key.mirror());
        let mut delivered = 0;
        for peer in peers {
            match peer.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(%key, peer = %peer.id, error = %e, "failed to forward frame"),
            }
        }

        debug!(%key, delivered, "frame routed");
        Ok(delivered)
    }

    /// Drive one connection from open to closed.
    ///
    /// The connection is registered under `key` while this runs and is
    /// unregistered on every exit path. Frames are routed one at a time in
    /// the order they are read. A read failure ends the connection with
    /// [`ChatError::Transport`].
    pub async fn run_connection<S, E, W>(
        &self,
        key: ConversationKey,
        inbound: S,
        outbound: W,
    ) -> ChatResult<()>
    where
        S: Stream<Item = Result<Inbound, E>>,
        E: fmt::Display,
        W: Sink<Frame> + Send + 'static,
        W::Error: fmt::Display + Send,
    {
        let id = ConnectionId::next();
        let (tx, rx) = mpsc::channel(self.outbound_buffer);
        tokio::spawn(write_loop(id, rx, outbound));

        let _registration = Registration::new(self.registry.clone(), key, PeerHandle::new(id, tx));
        info!(%key, conn = %id, "connection open");

        let mut inbound = std::pin::pin!(inbound);
        let outcome = loop {
            match inbound.next().await {
                Some(Ok(Inbound::Frame(frame))) => {
                    if let Err(e) = self.route(key, frame).await {
                        error!(%key, conn = %id, error = %e, "failed to record message, frame dropped");
                    }
                }
                Some(Ok(Inbound::Control)) => {}
                Some(Ok(Inbound::Close)) | None => break Ok(()),
                Some(Err(e)) => break Err(ChatError::Transport(e.to_string())),
            }
        };

        info!(%key, conn = %id, "connection closed");
        outcome
    }
}

/// Drain a connection's outbound queue into its transport. Ends, closing the
/// transport, once every sender is gone or a write fails.
async fn write_loop<W>(id: ConnectionId, mut rx: mpsc::Receiver<Frame>, outbound: W)
where
    W: Sink<Frame>,
    W::Error: fmt::Display,
{
    let mut outbound = std::pin::pin!(outbound);
    while let Some(frame) = rx.recv().await {
        if let Err(e) = outbound.send(frame).await {
            warn!(conn = %id, error = %e, "connection write failed");
            break;
        }
    }

    if let Err(e) = outbound.close().await {
        debug!(conn = %id, error = %e, "error while closing connection");
    }
}
