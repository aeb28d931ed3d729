//! WebSocket transport for the notification feed.

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::transport::{Session, Transport};
use super::types::ConnectionError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketTransport {
    url: String,
    auth_token: Option<String>,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            url: url.into(),
            auth_token,
        }
    }

    async fn open(&self) -> Result<Session, ConnectionError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectionError::Transport(format!("Invalid URL {}: {}", self.url, e)))?;

        if let Some(token) = &self.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ConnectionError::Transport(format!("Invalid auth token: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        info!("Connecting to notification WebSocket: {}", self.url);
        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| ConnectionError::Transport(format!("WebSocket connection failed: {}", e)))?;
        info!("Connected to notification WebSocket");

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(ws_stream, inbound_tx, outbound_rx));

        Ok(Session {
            inbound: inbound_rx,
            outbound: outbound_tx,
        })
    }
}

impl Transport for WebSocketTransport {
    fn connect(&self) -> BoxFuture<'_, Result<Session, ConnectionError>> {
        Box::pin(self.open())
    }
}

/// Moves frames between the socket and the session channels until either
/// side goes away.
async fn pump(
    ws_stream: WsStream,
    inbound_tx: mpsc::UnboundedSender<Result<String, ConnectionError>>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
) {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(text) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        error!("Failed to send frame: {}", e);
                        let _ = inbound_tx.send(Err(ConnectionError::Transport(e.to_string())));
                        break;
                    }
                }
                None => {
                    // Session dropped by the manager.
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if inbound_tx.send(Ok(text.as_str().to_owned())).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => {
                        if inbound_tx.send(Ok(text)).is_err() {
                            break;
                        }
                    }
                    Err(_) => warn!("Ignoring non-UTF-8 binary frame ({} bytes)", bytes.len()),
                },
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        error!("Failed to send pong: {}", e);
                        let _ = inbound_tx.send(Err(ConnectionError::Transport(e.to_string())));
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    info!("WebSocket closed by server");
                    let _ = inbound_tx.send(Err(ConnectionError::Closed));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    let _ = inbound_tx.send(Err(ConnectionError::Transport(e.to_string())));
                    break;
                }
                None => {
                    let _ = inbound_tx.send(Err(ConnectionError::Closed));
                    break;
                }
            },
        }
    }
    debug!("WebSocket pump finished");
}
