//! The concrete `ports::Connection`: a persistent OCPP-J WebSocket uplink to
//! the CSMS, built on `tokio-tungstenite`.
//!
//! Grounded on the teacher's `session/connection.rs` for the "hold a sender
//! half, report liveness via an atomic flag" shape — inverted from "the
//! server accepts many inbound sessions" to "the charge point holds one
//! outbound uplink and reconnects it forever". This is the only module in
//! the crate that touches an async runtime: it bridges a background
//! reconnect-and-pump task to the synchronous `Engine::tick` loop over
//! bounded channels, so `Connection::send`/`try_recv` stay non-blocking as
//! `spec.md` §5 requires.

use crate::ports::Connection;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcppSubProtocol {
    V16,
    V201,
}

impl OcppSubProtocol {
    fn header_value(self) -> &'static str {
        match self {
            OcppSubProtocol::V16 => "ocpp1.6",
            OcppSubProtocol::V201 => "ocpp2.0.1",
        }
    }
}

/// Handle passed into `Context::tick`; owns the channel ends. The background
/// pump task is detached (`tokio::spawn`) and lives for the process lifetime,
/// reconnecting on every drop of the socket.
pub struct WsConnection {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
    online: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
}

impl WsConnection {
    /// Spawns the reconnect-and-pump task and returns immediately; the first
    /// `tick()` after the handshake completes will observe `is_online() == true`.
    pub fn connect(url: String, sub_protocol: OcppSubProtocol) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let online = Arc::new(AtomicBool::new(false));
        let connected = Arc::new(AtomicBool::new(false));

        tokio::spawn(pump_forever(
            url,
            sub_protocol,
            outbound_rx,
            inbound_tx,
            online.clone(),
            connected.clone(),
        ));

        Self {
            outbound: outbound_tx,
            inbound: inbound_rx,
            online,
            connected,
        }
    }
}

impl Connection for WsConnection {
    fn send(&mut self, text: &str) -> bool {
        if !self.online.load(Ordering::Relaxed) {
            return false;
        }
        self.outbound.send(text.to_string()).is_ok()
    }

    fn try_recv(&mut self) -> Option<String> {
        self.inbound.try_recv().ok()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }
}

async fn pump_forever(
    url: String,
    sub_protocol: OcppSubProtocol,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    inbound_tx: mpsc::UnboundedSender<String>,
    online: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
) {
    loop {
        connected.store(false, Ordering::Relaxed);
        online.store(false, Ordering::Relaxed);

        let mut request = match url.clone().into_client_request() {
            Ok(request) => request,
            Err(err) => {
                warn!("invalid CSMS URL {url}: {err}");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
                continue;
            }
        };
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", sub_protocol.header_value().parse().unwrap());

        match tokio_tungstenite::connect_async(request).await {
            Ok((stream, _response)) => {
                info!(sub_protocol = sub_protocol.header_value(), "connected to CSMS");
                connected.store(true, Ordering::Relaxed);
                online.store(true, Ordering::Relaxed);

                let (mut sink, mut source) = stream.split();
                loop {
                    tokio::select! {
                        outgoing = outbound_rx.recv() => {
                            let Some(text) = outgoing else {
                                debug!("outbound channel closed; tearing down connection");
                                let _ = sink.close().await;
                                return;
                            };
                            if let Err(err) = sink.send(Message::Text(text)).await {
                                warn!("send failed, will reconnect: {err}");
                                break;
                            }
                        }
                        incoming = source.next() => {
                            match incoming {
                                Some(Ok(Message::Text(text))) => {
                                    let _ = inbound_tx.send(text);
                                }
                                Some(Ok(Message::Close(_))) | None => {
                                    warn!("CSMS closed the connection; will reconnect");
                                    break;
                                }
                                Some(Ok(_)) => {
                                    // Ping/Pong/Binary frames: OCPP-J only uses text frames.
                                }
                                Some(Err(err)) => {
                                    warn!("receive error, will reconnect: {err}");
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            Err(err) => {
                warn!("failed to connect to CSMS at {url}: {err}");
            }
        }

        connected.store(false, Ordering::Relaxed);
        online.store(false, Ordering::Relaxed);
        tokio::time::sleep(RECONNECT_BACKOFF).await;
    }
}
