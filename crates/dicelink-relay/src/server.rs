//! `RelayServer`: the WebSocket accept loop in front of a [`RelayHub`].
//!
//! Each accepted socket gets one task. It reads the client's `hello`,
//! registers an outbound channel with the hub and then feeds every
//! further call to the hub. A separate writer task drains the outbound
//! channel, so replies and pushes reach the client in the order the hub
//! produced them.

use std::net::SocketAddr;
use std::sync::Arc;

use dicelink_protocol::PeerId;
use dicelink_protocol::relay::{HubEvent, RelayCall, RelayOp, RelayReply};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use crate::{RelayConfig, RelayError, RelayHub};

/// A bound relay hub. Call [`run`](Self::run) to start serving.
pub struct RelayServer {
    listener: TcpListener,
    hub: Arc<RelayHub>,
    config: RelayConfig,
}

impl RelayServer {
    /// Binds the listening socket.
    pub async fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .map_err(RelayError::BindFailed)?;
        tracing::info!(addr = %config.bind_addr, "relay hub listening");
        Ok(Self {
            listener,
            hub: Arc::new(RelayHub::new()),
            config,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    /// The hub this server feeds.
    pub fn hub(&self) -> Arc<RelayHub> {
        Arc::clone(&self.hub)
    }

    /// Accepts clients until the task is dropped or aborted.
    pub async fn run(self) -> Result<(), RelayError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let hub = Arc::clone(&self.hub);
                    let config = self.config.clone();
                    tokio::spawn(async move {
                        if let Err(reason) = serve_client(stream, addr, hub, config).await {
                            tracing::debug!(%addr, %reason, "client ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-client handling
// ---------------------------------------------------------------------------

async fn serve_client(
    stream: TcpStream,
    addr: SocketAddr,
    hub: Arc<RelayHub>,
    config: RelayConfig,
) -> Result<(), String> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| format!("websocket upgrade failed: {e}"))?;
    let (mut sink, mut stream) = ws.split();

    let hello = tokio::time::timeout(config.hello_timeout, next_call(&mut stream))
        .await
        .map_err(|_| "no hello in time".to_string())?
        .ok_or_else(|| "closed before hello".to_string())?;
    let RelayOp::Hello { peer_id } = hello.op else {
        let _ = send(&mut sink, &refusal(hello.call_id, "first call must be hello")).await;
        return Err("first call was not hello".into());
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<HubEvent>();
    if !hub.connect(peer_id.clone(), tx.clone()) {
        let _ = send(&mut sink, &refusal(hello.call_id, "peer id already connected")).await;
        return Err(format!("duplicate peer id {peer_id}"));
    }
    tracing::info!(%peer_id, %addr, "client greeted");

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if send(&mut sink, &event).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let _ = tx.send(HubEvent::Reply {
        call_id: hello.call_id,
        reply: RelayReply::Ack,
    });

    let endpoint = addr.to_string();
    while let Some(call) = next_call(&mut stream).await {
        let reply = hub.handle(&peer_id, &endpoint, call);
        if tx.send(reply).is_err() {
            break;
        }
    }

    leave(&hub, &peer_id);
    drop(tx);
    let _ = writer.await;
    Ok(())
}

/// The next decodable call, or `None` once the socket closes. Frames that
/// don't parse are logged and skipped.
async fn next_call(
    stream: &mut futures_util::stream::SplitStream<WebSocketStream<TcpStream>>,
) -> Option<RelayCall> {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str(text.as_str()) {
                Ok(call) => return Some(call),
                Err(e) => tracing::debug!(error = %e, "dropping malformed call"),
            },
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(error = %e, "websocket read failed");
                return None;
            }
        }
    }
    None
}

async fn send<S>(sink: &mut S, event: &HubEvent) -> Result<(), String>
where
    S: Sink<Message> + Unpin,
{
    let text = serde_json::to_string(event).map_err(|e| e.to_string())?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|_| "websocket write failed".to_string())
}

fn refusal(call_id: u64, reason: &str) -> HubEvent {
    HubEvent::Failed {
        call_id,
        reason: reason.to_string(),
    }
}

fn leave(hub: &RelayHub, peer_id: &PeerId) {
    hub.disconnect(peer_id);
    tracing::info!(%peer_id, "client gone");
}
