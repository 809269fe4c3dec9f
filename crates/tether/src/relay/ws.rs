//! Websocket relay client.
//!
//! Maintains one connection to the relay, reconnecting with jittered
//! exponential backoff. Outbound envelopes go through an unbounded queue
//! owned by the connection task, so messages produced while the link is
//! down are delivered after the next successful connect rather than lost.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_protocol::{Envelope, OutboundEnvelope};

use super::RelayTransport;

const RECONNECT_MIN: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handle to the relay connection task.
pub struct WsRelay {
    outbound: mpsc::UnboundedSender<OutboundEnvelope>,
    cancel: CancellationToken,
}

impl WsRelay {
    /// Spawn the connection task. Inbound envelopes arrive on `inbound`;
    /// outbound envelopes queue across reconnects.
    pub fn spawn(url: String, inbound: mpsc::Sender<Envelope>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(run(url, inbound, outbound_rx, cancel.clone()));
        Self {
            outbound: outbound_tx,
            cancel,
        }
    }
}

#[async_trait]
impl RelayTransport for WsRelay {
    async fn send(&self, envelope: OutboundEnvelope) -> Result<()> {
        self.outbound
            .send(envelope)
            .map_err(|_| anyhow::anyhow!("relay connection task has stopped"))
    }

    async fn disconnect(&self) {
        self.cancel.cancel();
    }
}

async fn run(
    url: String,
    inbound: mpsc::Sender<Envelope>,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundEnvelope>,
    cancel: CancellationToken,
) {
    let mut backoff = RECONNECT_MIN;
    loop {
        if cancel.is_cancelled() {
            return;
        }
        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                info!(%url, "connected to relay");
                backoff = RECONNECT_MIN;
                if session(stream, &inbound, &mut outbound_rx, &cancel).await {
                    return;
                }
            }
            Err(e) => warn!(%url, "relay connect failed: {e}"),
        }

        let jitter = Duration::from_millis(rand::rng().random_range(0..250u64));
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(backoff + jitter) => {}
        }
        backoff = (backoff * 2).min(RECONNECT_MAX);
    }
}

/// Drive one connected session. Returns `true` when the task should stop
/// for good, `false` to reconnect.
async fn session(
    stream: WsStream,
    inbound: &mpsc::Sender<Envelope>,
    outbound_rx: &mut mpsc::UnboundedReceiver<OutboundEnvelope>,
    cancel: &CancellationToken,
) -> bool {
    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return true;
            }
            outgoing = outbound_rx.recv() => {
                let Some(envelope) = outgoing else { return true };
                match serde_json::to_string(&envelope) {
                    Ok(text) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            warn!("relay send failed: {e}");
                            return false;
                        }
                    }
                    Err(e) => warn!("envelope serialization failed: {e}"),
                }
            }
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Envelope>(&text) {
                    Ok(envelope) => {
                        if inbound.send(envelope).await.is_err() {
                            return true;
                        }
                    }
                    Err(e) => debug!("unparseable relay frame dropped: {e}"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!("relay connection closed");
                    return false;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("relay read error: {e}");
                    return false;
                }
            }
        }
    }
}
