//! Device WebSocket Handler
//!
//! Validates the identity query parameters during the handshake, registers a
//! session with the hub, and runs the connection's pumps: a writer draining
//! the session's outbound queue plus the two keepalive tickers, and a reader
//! feeding inbound frames to the hub under a transport read deadline.

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, info, warn};

use timesync_core::hub::{
    Hub, Session, APP_PING_PERIOD, SEND_BUFFER, TRANSPORT_PING_PERIOD, TRANSPORT_PONG_WAIT,
    WRITE_WAIT,
};
use timesync_core::model::DeviceKind;
use timesync_core::protocol::WireMessage;

use crate::metrics::BrokerMetrics;

/// Accepts one device connection and runs it to completion.
pub async fn handle_connection(
    stream: TcpStream,
    hub: Arc<Hub>,
    metrics: BrokerMetrics,
    max_message_size: usize,
) {
    let mut identity: Option<(String, DeviceKind)> = None;

    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let query = req.uri().query().unwrap_or("");
        let (device_id, device_type) = parse_device_query(query);

        let Some(device_id) = device_id else {
            return Err(reject("deviceId and deviceType query parameters are required"));
        };
        let Some(device_type) = device_type else {
            return Err(reject("deviceId and deviceType query parameters are required"));
        };
        let Ok(kind) = device_type.parse::<DeviceKind>() else {
            return Err(reject("deviceType must be PSG, WATCH, or MOBILE"));
        };

        identity = Some((device_id, kind));
        Ok(resp)
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            debug!("WebSocket handshake rejected: {}", e);
            metrics.connection_errors.inc();
            return;
        }
    };

    let Some((device_id, kind)) = identity else {
        return;
    };

    metrics.connections_total.inc();
    metrics.connections_active.inc();
    info!("Device connected: {} ({})", device_id, kind);

    let (outbound_tx, outbound_rx) = mpsc::channel(SEND_BUFFER);
    let session = Session::new(device_id.clone(), kind, outbound_tx);
    let token = session.token();
    hub.register(session).await;

    let (write, read) = ws_stream.split();
    let writer = tokio::spawn(write_pump(
        hub.clone(),
        device_id.clone(),
        write,
        outbound_rx,
    ));

    read_pump(&hub, &device_id, read, max_message_size).await;

    // Unregistering drops the session's queue; the writer observes the
    // closed queue, sends a close frame, and exits.
    hub.unregister(&device_id, token).await;
    let _ = writer.await;

    metrics.connections_active.dec();
    info!("Device disconnected: {}", device_id);
}

/// Drains the session's outbound queue onto the socket and drives both
/// keepalives: a transport-level ping and the application-level PING.
async fn write_pump(
    hub: Arc<Hub>,
    device_id: String,
    mut write: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut outbound: mpsc::Receiver<WireMessage>,
) {
    let mut app_ping = interval(APP_PING_PERIOD);
    app_ping.tick().await;
    let mut transport_ping = interval(TRANSPORT_PING_PERIOD);
    transport_ping.tick().await;

    loop {
        tokio::select! {
            queued = outbound.recv() => match queued {
                Some(msg) => {
                    let text = match serde_json::to_string(&msg) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode outbound message for {}: {}", device_id, e);
                            continue;
                        }
                    };
                    if send_with_deadline(&mut write, Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                None => {
                    // The hub closed the queue.
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
            _ = transport_ping.tick() => {
                if send_with_deadline(&mut write, Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            _ = app_ping.tick() => {
                let Some(timestamp) = hub.record_ping_sent(&device_id) else {
                    break;
                };
                let text = match serde_json::to_string(&WireMessage::Ping { timestamp }) {
                    Ok(text) => text,
                    Err(_) => continue,
                };
                if send_with_deadline(&mut write, Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn send_with_deadline(
    write: &mut SplitSink<WebSocketStream<TcpStream>, Message>,
    msg: Message,
) -> Result<(), ()> {
    match timeout(WRITE_WAIT, write.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        _ => Err(()),
    }
}

/// Feeds inbound text frames to the hub. Each read runs under the transport
/// pong deadline; a silent socket fails the read side and tears the session
/// down.
async fn read_pump(
    hub: &Arc<Hub>,
    device_id: &str,
    mut read: SplitStream<WebSocketStream<TcpStream>>,
    max_message_size: usize,
) {
    loop {
        let msg = match timeout(TRANSPORT_PONG_WAIT, read.next()).await {
            Err(_) => {
                warn!("Read deadline expired for {}", device_id);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                warn!("WebSocket error from {}: {}", device_id, e);
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => {
                if text.len() > max_message_size {
                    warn!(
                        "Oversized frame from {} ({} bytes), dropped",
                        device_id,
                        text.len()
                    );
                    continue;
                }
                hub.handle_message(device_id, &text);
            }
            Message::Close(_) => {
                debug!("Device {} sent close", device_id);
                break;
            }
            // Transport ping/pong control frames are handled by tungstenite;
            // devices speak text JSON only.
            _ => {}
        }
    }
}

fn reject(reason: &str) -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some(reason.to_string()));
    *resp.status_mut() = StatusCode::BAD_REQUEST;
    resp
}

/// Pulls `deviceId` and `deviceType` out of the handshake query string.
fn parse_device_query(query: &str) -> (Option<String>, Option<String>) {
    let mut device_id = None;
    let mut device_type = None;

    for pair in query.split('&') {
        let mut parts = pair.splitn(2, '=');
        match (parts.next(), parts.next()) {
            (Some("deviceId"), Some(value)) if !value.is_empty() => {
                device_id = Some(value.to_string());
            }
            (Some("deviceType"), Some(value)) if !value.is_empty() => {
                device_type = Some(value.to_string());
            }
            _ => {}
        }
    }

    (device_id, device_type)
}
