// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! WebSocket transport built on `tokio-tungstenite`.
//!
//! Each transport is one spawned task that owns the socket:
//!
//! 1. connect, bounded by the connect timeout
//! 2. pump outgoing messages and incoming frames
//! 3. send a `"0"` keepalive after a quiet keepalive interval
//!
//! The socket loop is generic over a frame sink and stream, so it can be
//! driven by in-memory channels.

use std::sync::Arc;

use futures::{future, Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::frames::{encode_frames, FrameReader, KEEPALIVE_FRAME};
use super::{Transport, TransportConfig, TransportEvent, TransportFactory, TransportListener};
use crate::error::TransportError;
use crate::metrics;

#[derive(Debug)]
pub(crate) enum Outgoing {
    Message(Value),
    Close,
}

/// Handle to a socket task.
pub struct WebSocketTransport {
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl WebSocketTransport {
    /// Start connecting to `url` in the background. Must be called inside a
    /// tokio runtime.
    pub fn open(url: String, config: TransportConfig, listener: Arc<dyn TransportListener>) -> Self {
        let (outgoing, rx) = mpsc::unbounded_channel();
        tokio::spawn(connect_and_run(url, config, rx, listener));
        Self { outgoing }
    }
}

impl Transport for WebSocketTransport {
    fn send(&mut self, message: Value) {
        if self.outgoing.send(Outgoing::Message(message)).is_err() {
            debug!("Dropping message for a transport that already closed");
        }
    }

    fn close(&mut self) {
        let _ = self.outgoing.send(Outgoing::Close);
    }
}

/// Opens [`WebSocketTransport`]s with a fixed config.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransportFactory {
    config: TransportConfig,
}

impl WebSocketTransportFactory {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

impl TransportFactory for WebSocketTransportFactory {
    fn open(&self, url: &str, listener: Arc<dyn TransportListener>) -> Box<dyn Transport> {
        Box::new(WebSocketTransport::open(url.to_owned(), self.config.clone(), listener))
    }
}

#[tracing::instrument(skip_all, fields(url = %url))]
async fn connect_and_run(
    url: String,
    config: TransportConfig,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    listener: Arc<dyn TransportListener>,
) {
    let connect = tokio::time::timeout(
        config.connect_timeout,
        tokio_tungstenite::connect_async(url.as_str()),
    );
    tokio::pin!(connect);

    let connected = loop {
        tokio::select! {
            result = &mut connect => break result,
            command = outgoing.recv() => match command {
                Some(Outgoing::Message(_)) => debug!("Dropping message queued before the socket opened"),
                Some(Outgoing::Close) | None => {
                    debug!("Transport closed while connecting");
                    return;
                }
            },
        }
    };

    let socket = match connected {
        Ok(Ok((socket, _response))) => socket,
        Ok(Err(e)) => {
            warn!(error = %TransportError::from(e), "WebSocket connect failed");
            listener.on_event(TransportEvent::Closed { ever_connected: false });
            return;
        }
        Err(_) => {
            warn!(error = %TransportError::ConnectTimeout(config.connect_timeout), "WebSocket connect failed");
            listener.on_event(TransportEvent::Closed { ever_connected: false });
            return;
        }
    };

    debug!("WebSocket opened");
    listener.on_event(TransportEvent::Opened);

    let (sink, stream) = socket.split();
    let sink = sink.with(|text: String| future::ready(Ok::<_, TransportError>(Message::text(text))));
    let stream = stream.filter_map(|message| {
        future::ready(match message {
            Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
            Ok(Message::Close(_)) => Some(Err(TransportError::Closed)),
            Ok(_) => None,
            Err(e) => Some(Err(TransportError::from(e))),
        })
    });
    run_socket(sink, stream, outgoing, listener, config).await;
}

/// Pump frames until either side closes.
///
/// Reports `Closed` unless the close was requested through `outgoing`.
pub(crate) async fn run_socket<S, R>(
    sink: S,
    stream: R,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    listener: Arc<dyn TransportListener>,
    config: TransportConfig,
) where
    S: Sink<String, Error = TransportError>,
    R: Stream<Item = Result<String, TransportError>>,
{
    futures::pin_mut!(sink);
    futures::pin_mut!(stream);
    let mut reader = FrameReader::new();
    let keepalive = tokio::time::sleep(config.keepalive_interval);
    tokio::pin!(keepalive);

    loop {
        tokio::select! {
            command = outgoing.recv() => match command {
                Some(Outgoing::Message(message)) => {
                    keepalive.as_mut().reset(Instant::now() + config.keepalive_interval);
                    let frames = encode_frames(&message.to_string(), config.max_frame_size);
                    metrics::record_frames_sent(frames.len());
                    if let Err(e) = send_frames(&mut sink, frames).await {
                        warn!(error = %e, "Failed to send message, closing transport");
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = sink.close().await;
                    debug!("Transport closed locally");
                    return;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(text)) => {
                    keepalive.as_mut().reset(Instant::now() + config.keepalive_interval);
                    metrics::record_frame_received();
                    match reader.push(&text) {
                        Ok(Some(message)) => listener.on_event(TransportEvent::Message(message)),
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, "Closing transport after unreadable server message");
                            let _ = sink.close().await;
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    debug!(error = %e, "Socket closed by peer");
                    break;
                }
                None => {
                    debug!("Socket stream ended");
                    break;
                }
            },
            () = &mut keepalive => {
                keepalive.as_mut().reset(Instant::now() + config.keepalive_interval);
                if let Err(e) = sink.send(KEEPALIVE_FRAME.to_owned()).await {
                    warn!(error = %e, "Failed to send keepalive");
                    break;
                }
                metrics::record_keepalive();
            }
        }
    }
    listener.on_event(TransportEvent::Closed { ever_connected: true });
}

async fn send_frames<S>(sink: &mut S, frames: Vec<String>) -> Result<(), TransportError>
where
    S: Sink<String, Error = TransportError> + Unpin,
{
    for frame in frames {
        sink.feed(frame).await?;
    }
    sink.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use futures::FutureExt;
    use serde_json::json;
    use std::time::Duration;

    struct ChannelListener(mpsc::UnboundedSender<TransportEvent>);

    impl TransportListener for ChannelListener {
        fn on_event(&self, event: TransportEvent) {
            let _ = self.0.send(event);
        }
    }

    struct Harness {
        to_client: fmpsc::UnboundedSender<String>,
        from_client: fmpsc::UnboundedReceiver<String>,
        commands: mpsc::UnboundedSender<Outgoing>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    }

    fn start() -> Harness {
        let (client_sink, from_client) = fmpsc::unbounded::<String>();
        let (to_client, client_stream) = fmpsc::unbounded::<String>();
        let (commands, outgoing) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        let sink = client_sink.sink_map_err(|_| TransportError::Closed);
        let stream = client_stream.map(Ok);
        tokio::spawn(run_socket(
            sink,
            stream,
            outgoing,
            Arc::new(ChannelListener(event_tx)),
            TransportConfig::default(),
        ));
        Harness {
            to_client,
            from_client,
            commands,
            events,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_after_silence() {
        let mut h = start();
        tokio::time::sleep(Duration::from_secs(46)).await;
        assert_eq!(h.from_client.next().await.as_deref(), Some("0"));
        drop(h.to_client);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_resets_keepalive() {
        let mut h = start();
        tokio::time::sleep(Duration::from_secs(30)).await;
        h.commands.send(Outgoing::Message(json!({"t": "d"}))).unwrap();
        assert_eq!(h.from_client.next().await.as_deref(), Some("{\"t\":\"d\"}"));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(h.from_client.next().now_or_never().is_none());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.from_client.next().await.as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_large_outgoing_message_is_framed() {
        let mut h = start();
        let message = json!({"b": "x".repeat(20_000)});
        h.commands.send(Outgoing::Message(message.clone())).unwrap();
        assert_eq!(h.from_client.next().await.as_deref(), Some("2"));
        let first = h.from_client.next().await.unwrap();
        let second = h.from_client.next().await.unwrap();
        assert_eq!(first.chars().count(), 16_384);
        let joined: Value = serde_json::from_str(&(first + &second)).unwrap();
        assert_eq!(joined, message);
    }

    #[tokio::test]
    async fn test_incoming_frames_reassembled() {
        let mut h = start();
        h.to_client.unbounded_send("2".into()).unwrap();
        h.to_client.unbounded_send("{\"t\":\"d\",".into()).unwrap();
        h.to_client.unbounded_send("\"d\":{}}".into()).unwrap();
        assert_eq!(
            h.events.recv().await,
            Some(TransportEvent::Message(json!({"t": "d", "d": {}})))
        );
    }

    #[tokio::test]
    async fn test_local_close_is_silent() {
        let mut h = start();
        h.commands.send(Outgoing::Close).unwrap();
        assert_eq!(h.from_client.next().await, None);
        assert_eq!(h.events.recv().await, None);
    }

    #[tokio::test]
    async fn test_remote_close_reports_closed() {
        let mut h = start();
        drop(h.to_client);
        assert_eq!(
            h.events.recv().await,
            Some(TransportEvent::Closed { ever_connected: true })
        );
    }

    #[tokio::test]
    async fn test_unreadable_message_closes() {
        let mut h = start();
        h.to_client.unbounded_send("{broken json".into()).unwrap();
        assert_eq!(
            h.events.recv().await,
            Some(TransportEvent::Closed { ever_connected: true })
        );
    }
}
