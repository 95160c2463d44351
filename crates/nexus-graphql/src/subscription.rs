use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use nexus_types::ChannelMessage;
use nexus_types::api::{GraphQlRequest, MESSAGE_ADDED, MessageAddedData, MessageAddedVariables};
use nexus_types::events::{ClientFrame, ExecutionResult, GRAPHQL_TRANSPORT_WS, ServerFrame};

use crate::config::ClientConfig;
use crate::error::GraphQlError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long the server gets to answer `connection_init`.
const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Buffered pushes before the socket task waits on the consumer.
const CHANNEL_CAPACITY: usize = 256;

/// Live `messageAdded` feed for one channel. Dropping it closes the socket.
pub struct MessageSubscription {
    channel_id: String,
    rx: mpsc::Receiver<ChannelMessage>,
    task: JoinHandle<()>,
}

impl MessageSubscription {
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Next pushed message; `None` once the server ends the subscription or
    /// the connection drops.
    pub async fn next(&mut self) -> Option<ChannelMessage> {
        self.rx.recv().await
    }
}

impl Drop for MessageSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Open a socket, complete the `graphql-transport-ws` handshake and start
/// the `MessageAdded` subscription for `channel_id`. Handshake failures are
/// returned; failures after that end the feed and are logged.
pub async fn subscribe_channel_messages(
    config: &ClientConfig,
    channel_id: &str,
) -> Result<MessageSubscription, GraphQlError> {
    let mut request = config.ws_url.as_str().into_client_request()?;
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static(GRAPHQL_TRANSPORT_WS),
    );

    let (mut socket, _) = connect_async(request).await?;

    let init = ClientFrame::ConnectionInit {
        payload: config.bearer().map(|bearer| json!({ "authorization": bearer })),
    };
    send_frame(&mut socket, &init).await?;

    tokio::time::timeout(ACK_TIMEOUT, wait_for_ack(&mut socket))
        .await
        .map_err(|_| GraphQlError::Protocol("timed out waiting for connection_ack".into()))??;

    let operation_id = Uuid::new_v4().to_string();
    let payload = GraphQlRequest::new(
        &MESSAGE_ADDED,
        MessageAddedVariables {
            channel_id: channel_id.to_string(),
        },
    )?;
    send_frame(
        &mut socket,
        &ClientFrame::Subscribe {
            id: operation_id.clone(),
            payload,
        },
    )
    .await?;

    info!("Subscribed to new messages in {}", channel_id);

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let task = tokio::spawn(run_subscription_loop(
        socket,
        operation_id,
        channel_id.to_string(),
        config.keepalive,
        tx,
    ));

    Ok(MessageSubscription {
        channel_id: channel_id.to_string(),
        rx,
        task,
    })
}

async fn wait_for_ack(socket: &mut Socket) -> Result<(), GraphQlError> {
    while let Some(msg) = socket.next().await {
        match msg? {
            Message::Text(text) => match parse_frame(text.as_str())? {
                ServerFrame::ConnectionAck { .. } => return Ok(()),
                ServerFrame::Ping { .. } => {
                    send_frame(socket, &ClientFrame::Pong { payload: None }).await?;
                }
                other => {
                    return Err(GraphQlError::Protocol(format!(
                        "expected connection_ack, got {:?}",
                        other
                    )));
                }
            },
            Message::Close(frame) => {
                return Err(GraphQlError::Protocol(format!(
                    "server closed during handshake: {:?}",
                    frame
                )));
            }
            _ => {}
        }
    }
    Err(GraphQlError::Protocol("connection closed before connection_ack".into()))
}

async fn run_subscription_loop(
    mut socket: Socket,
    operation_id: String,
    channel_id: String,
    keepalive: Duration,
    tx: mpsc::Sender<ChannelMessage>,
) {
    let mut heartbeat = tokio::time::interval(keepalive);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            incoming = socket.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(frame))) => {
                        info!("Subscription socket for {} closed: {:?}", channel_id, frame);
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        error!("Subscription socket for {} failed: {}", channel_id, e);
                        break;
                    }
                    None => break,
                };

                let frame = match parse_frame(text.as_str()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Ignoring malformed frame: {}", e);
                        continue;
                    }
                };

                if frame.operation_id().is_some_and(|id| id != operation_id) {
                    continue;
                }

                match frame {
                    ServerFrame::Next { payload, .. } => match message_from_result(payload) {
                        Ok(Some(message)) => {
                            if tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!("Subscription push for {} rejected: {}", channel_id, e),
                    },
                    ServerFrame::Error { payload, .. } => {
                        error!("Subscription for {} failed: {}", channel_id, GraphQlError::Graphql(payload));
                        break;
                    }
                    ServerFrame::Complete { .. } => {
                        info!("Server completed subscription for {}", channel_id);
                        break;
                    }
                    ServerFrame::Ping { .. } => {
                        if send_frame(&mut socket, &ClientFrame::Pong { payload: None }).await.is_err() {
                            break;
                        }
                    }
                    ServerFrame::Pong { .. } | ServerFrame::ConnectionAck { .. } => {}
                }
            }
            _ = tx.closed() => {
                debug!("Subscriber for {} went away, completing", channel_id);
                let _ = send_frame(&mut socket, &ClientFrame::Complete { id: operation_id.clone() }).await;
                break;
            }
            _ = heartbeat.tick() => {
                if send_frame(&mut socket, &ClientFrame::Ping { payload: None }).await.is_err() {
                    warn!("Keepalive ping for {} failed, dropping subscription", channel_id);
                    break;
                }
            }
        }
    }

    let _ = socket.close(None).await;
}

async fn send_frame(socket: &mut Socket, frame: &ClientFrame) -> Result<(), GraphQlError> {
    let text = serde_json::to_string(frame)?;
    socket.send(Message::Text(text.into())).await?;
    Ok(())
}

pub(crate) fn parse_frame(text: &str) -> Result<ServerFrame, GraphQlError> {
    Ok(serde_json::from_str(text)?)
}

/// Extract the pushed message from one `next` payload. `Ok(None)` when the
/// server sent a null `messageAdded`.
pub(crate) fn message_from_result(
    result: ExecutionResult,
) -> Result<Option<ChannelMessage>, GraphQlError> {
    if !result.errors.is_empty() {
        return Err(GraphQlError::Graphql(result.errors));
    }
    let Some(data) = result.data else {
        return Ok(None);
    };
    let data: MessageAddedData = serde_json::from_value(data)?;
    Ok(data.message_added)
}
