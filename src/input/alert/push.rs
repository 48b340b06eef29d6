//! Push-mode alert feed over a persistent WebSocket.

use super::{AlertSink, FallReport};
use crate::error::Result;
use crate::state::{AlertEvent, SequenceKey};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long the close handshake may take once the session is cancelled.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Receives fall reports pushed by the detection server.
///
/// Frames carry no reliable server time, so accepted alerts are numbered
/// with a local counter. A socket error ends the transport; it does not
/// reconnect on its own.
pub struct PushTransport {
    url: String,
    stream: Option<WsStream>,
    counter: u64,
}

impl PushTransport {
    /// Transport that connects when run.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream: None,
            counter: 0,
        }
    }

    /// Open the socket now. Used by capability probing.
    pub async fn connect(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let (stream, _) = connect_async(url.as_str()).await?;
        info!("[Alert] Push socket connected to {}", url);
        Ok(Self {
            url,
            stream: Some(stream),
            counter: 0,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Decode one text frame. Only `fall == true` produces an event.
    fn decode(&mut self, text: &str) -> Result<Option<AlertEvent>> {
        let report: FallReport = serde_json::from_str(text)?;
        if !report.fall {
            return Ok(None);
        }

        self.counter += 1;
        Ok(Some(AlertEvent::fall(
            report.confidence,
            SequenceKey::Counter(self.counter),
        )))
    }

    pub async fn run(mut self, mut sink: AlertSink, cancel: CancellationToken) {
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => {
                let connected = tokio::select! {
                    _ = cancel.cancelled() => return,
                    connected = connect_async(self.url.as_str()) => connected,
                };
                match connected {
                    Ok((stream, _)) => {
                        info!("[Alert] Push socket connected to {}", self.url);
                        stream
                    }
                    Err(e) => {
                        error!("[Alert] Push socket to {} failed: {}", self.url, e);
                        return;
                    }
                }
            }
        };

        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => {
                    match tokio::time::timeout(CLOSE_GRACE, stream.close(None)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => debug!("[Alert] Push socket close failed: {}", e),
                        Err(_) => debug!("[Alert] Push socket close not acknowledged in time"),
                    }
                    break;
                }
                message = stream.next() => message,
            };

            match message {
                Some(Ok(Message::Text(text))) => {
                    let text_str: &str = &text;
                    match self.decode(text_str) {
                        Ok(Some(event)) => {
                            if !sink.deliver(event, &cancel).await {
                                break;
                            }
                        }
                        Ok(None) => debug!("[Alert] No fall in push frame"),
                        Err(e) => warn!("[Alert] Malformed push frame {:?}: {}", text_str, e),
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("[Alert] Push socket closed");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("[Alert] Push socket error: {}", e);
                    break;
                }
            }
        }
    }
}
