//! WebSocket [`Channel`] to a relay bridge server.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::traits::{Channel, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Text channel over `ws://` or `wss://`.
///
/// The write and read halves are locked separately so the reader task can
/// wait on the stream while requests are being written.
pub struct WebSocketChannel {
    url: String,
    sink: Mutex<Option<SplitSink<WsStream, Message>>>,
    stream: Mutex<Option<SplitStream<WsStream>>>,
}

impl WebSocketChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sink: Mutex::new(None),
            stream: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Channel for WebSocketChannel {
    async fn open(&self) -> Result<(), TransportError> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let (sink, stream) = ws.split();
        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);
        tracing::debug!(url = %self.url, "websocket open");
        Ok(())
    }

    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        let sink = sink.as_mut().ok_or(TransportError::Disconnected)?;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Other(e.to_string()))
    }

    async fn recv_text(&self) -> Result<Option<String>, TransportError> {
        let mut stream = self.stream.lock().await;
        let Some(stream) = stream.as_mut() else {
            return Ok(None);
        };

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(data))) => {
                    let text = String::from_utf8(data)
                        .map_err(|e| TransportError::Codec(e.to_string()))?;
                    return Ok(Some(text));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // Ping/pong are answered by tungstenite.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::Other(e.to_string())),
            }
        }
    }

    async fn close(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
    }
}
