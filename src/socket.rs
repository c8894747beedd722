use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::commands::CommandRouter;
use crate::dispatcher::Dispatcher;
use crate::event::{InboundEvent, SlashCommand};
use crate::slack::SlackClient;

/// Socket Mode envelope. The envelope id must be acknowledged
/// synchronously upon receipt.
#[derive(Debug, Clone, Deserialize)]
struct SocketEnvelope {
    envelope_id: String,
    #[serde(rename = "type")]
    envelope_type: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Serialize)]
struct SocketAck<'a> {
    envelope_id: &'a str,
}

/// Runs one Socket Mode connection to completion: requests a WebSocket
/// URL, then reads frames serially until the server closes or the
/// transport fails. The caller owns reconnection.
pub async fn run_connection(
    slack: &SlackClient,
    dispatcher: &mut Dispatcher,
    router: &CommandRouter,
) -> Result<()> {
    let ws_url = slack
        .connections_open()
        .await
        .context("Failed to open a Socket Mode connection")?;

    let (mut ws, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .context("WebSocket connect failed")?;
    info!("Connected to Slack Socket Mode");

    while let Some(frame) = ws.next().await {
        match frame.context("WebSocket read failed")? {
            WsMessage::Text(text) => {
                if let Flow::Disconnect = handle_frame(text.as_str(), &mut ws, dispatcher, router).await {
                    info!("Server requested disconnect, closing connection");
                    let _ = ws.close(None).await;
                    return Ok(());
                }
            }
            WsMessage::Ping(data) => {
                ws.send(WsMessage::Pong(data))
                    .await
                    .context("Failed to answer WebSocket ping")?;
            }
            WsMessage::Close(_) => {
                info!("WebSocket closed by server");
                return Ok(());
            }
            _ => {}
        }
    }

    info!("WebSocket stream ended");
    Ok(())
}

enum Flow {
    Continue,
    Disconnect,
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Handles one text frame: control messages, then envelope ack and
/// routing. Event handling errors never propagate to the read loop.
async fn handle_frame(
    text: &str,
    ws: &mut WsStream,
    dispatcher: &mut Dispatcher,
    router: &CommandRouter,
) -> Flow {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            debug!("Unparseable Socket Mode frame: {}", e);
            return Flow::Continue;
        }
    };

    match value["type"].as_str() {
        Some("hello") => {
            info!("Received Socket Mode hello");
            return Flow::Continue;
        }
        Some("disconnect") => {
            let reason = value["reason"].as_str().unwrap_or("unknown");
            info!("Slack requested disconnect: {}", reason);
            return Flow::Disconnect;
        }
        _ => {}
    }

    let envelope: SocketEnvelope = match serde_json::from_value(value) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!("Frame is not a Socket Mode envelope: {}", e);
            return Flow::Continue;
        }
    };

    // Ack before processing so the server does not redeliver while a
    // slow action is running.
    let ack = SocketAck {
        envelope_id: &envelope.envelope_id,
    };
    match serde_json::to_string(&ack) {
        Ok(ack_json) => {
            if let Err(e) = ws.send(WsMessage::Text(ack_json.into())).await {
                warn!("Failed to ack envelope {}: {}", envelope.envelope_id, e);
            }
        }
        Err(e) => warn!("Failed to serialize ack: {}", e),
    }

    route_envelope(envelope, dispatcher, router).await;
    Flow::Continue
}

async fn route_envelope(envelope: SocketEnvelope, dispatcher: &mut Dispatcher, router: &CommandRouter) {
    match envelope.envelope_type.as_str() {
        "events_api" => {
            let event: InboundEvent =
                match serde_json::from_value(envelope.payload["event"].clone()) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("Malformed Events API payload: {}", e);
                        return;
                    }
                };
            dispatcher.handle_event(event).await;
        }
        "slash_commands" => {
            let command: SlashCommand = match serde_json::from_value(envelope.payload) {
                Ok(command) => command,
                Err(e) => {
                    warn!("Malformed slash command payload: {}", e);
                    return;
                }
            };
            router.handle(&command).await;
        }
        other => debug!("Ignoring envelope type: {}", other),
    }
}
