//! Real-time run log stream
//!
//! One dedicated listener task per open stream consumes the WebSocket
//! and appends decoded frames to a shared buffer; the caller blocks only
//! on a one-shot completion signal with an explicit timeout. The signal
//! is set exactly once — on `Done`, on close, or on a transport error —
//! and transport errors are recorded rather than raised, because they
//! are common near backend shutdown and must not crash the harness from
//! a background task.

pub mod frame;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::SplitStream;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::common::{Error, Result};

pub use frame::{decode_frame, LogEvent, StatusEvent, StreamFrame};

type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// How the listener finished
enum StreamEnd {
    /// The backend sent `Done`
    Done,
    /// The channel closed (or errored) before `Done`
    Closed,
}

/// An open real-time event channel for one run
pub struct RunLogStream {
    events: Arc<Mutex<Vec<StreamFrame>>>,
    transport_error: Arc<Mutex<Option<String>>>,
    completion: oneshot::Receiver<StreamEnd>,
    listener: JoinHandle<()>,
}

impl RunLogStream {
    /// Connect to a stream URL (`ws://.../ws/{id}`) and start the
    /// listener. Connection errors surface here; everything after the
    /// upgrade is reported through [`RunLogStream::wait`].
    pub async fn open(ws_url: &str) -> Result<Self> {
        tracing::debug!(url = ws_url, "opening run log stream");
        let (ws_stream, _) = connect_async(ws_url).await?;
        let (_, reader) = ws_stream.split();

        let events = Arc::new(Mutex::new(Vec::new()));
        let transport_error = Arc::new(Mutex::new(None));
        let (done_tx, completion) = oneshot::channel();

        let listener = tokio::spawn(listen(
            reader,
            Arc::clone(&events),
            Arc::clone(&transport_error),
            done_tx,
        ));

        Ok(Self {
            events,
            transport_error,
            completion,
            listener,
        })
    }

    /// Block until the completion signal is set or `timeout` elapses.
    /// On timeout the listener is aborted — closing the channel is the
    /// cleanup action — and `Error::Timeout` is returned. Otherwise the
    /// accumulated events are handed back; callers distinguish a clean
    /// end from an abrupt close via [`StreamOutcome::completed`].
    pub async fn wait(self, timeout: Duration) -> Result<StreamOutcome> {
        let end = match tokio::time::timeout(timeout, self.completion).await {
            Err(_) => {
                self.listener.abort();
                return Err(Error::timeout("run log stream", timeout));
            }
            // Listener went away without signaling; treat as a close.
            Ok(Err(_)) => StreamEnd::Closed,
            Ok(Ok(end)) => end,
        };

        let events = self
            .events
            .lock()
            .expect("stream event buffer lock poisoned")
            .clone();
        let transport_error = self
            .transport_error
            .lock()
            .expect("stream error slot lock poisoned")
            .clone();

        Ok(StreamOutcome {
            completed: matches!(end, StreamEnd::Done),
            events,
            transport_error,
        })
    }
}

/// The aggregated result of consuming one stream
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    /// Ordered events up to and including `Done` (when it arrived)
    pub events: Vec<StreamFrame>,
    /// True iff the terminal event was `Done`; false means the channel
    /// closed early and `events` is considered incomplete
    pub completed: bool,
    /// First transport or frame error observed by the listener, if any
    pub transport_error: Option<String>,
}

impl StreamOutcome {
    /// All log events, in delivery order
    pub fn logs(&self) -> impl Iterator<Item = &LogEvent> {
        self.events.iter().filter_map(StreamFrame::as_log)
    }

    /// All status snapshots, in delivery order
    pub fn statuses(&self) -> impl Iterator<Item = &StatusEvent> {
        self.events.iter().filter_map(StreamFrame::as_status)
    }

    /// The concatenated log text, one event per line
    pub fn log_text(&self) -> String {
        self.logs()
            .map(|log| log.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Whether any log event's text contains `needle`
    pub fn contains_log(&self, needle: &str) -> bool {
        self.logs().any(|log| log.text.contains(needle))
    }
}

async fn listen(
    mut reader: WsReader,
    events: Arc<Mutex<Vec<StreamFrame>>>,
    transport_error: Arc<Mutex<Option<String>>>,
    done_tx: oneshot::Sender<StreamEnd>,
) {
    let mut done_tx = Some(done_tx);

    while let Some(message) = reader.next().await {
        match message {
            Ok(Message::Text(text)) => match frame::decode_frame(&text) {
                Ok(StreamFrame::Done) => {
                    events
                        .lock()
                        .expect("stream event buffer lock poisoned")
                        .push(StreamFrame::Done);
                    if let Some(tx) = done_tx.take() {
                        let _ = tx.send(StreamEnd::Done);
                    }
                    // Nothing after Done is significant; the channel may
                    // still close behind us, which is expected.
                    break;
                }
                Ok(StreamFrame::Ignored(tag)) => {
                    tracing::debug!(tag = %tag, "ignoring unknown stream frame");
                }
                Ok(frame) => {
                    events
                        .lock()
                        .expect("stream event buffer lock poisoned")
                        .push(frame);
                }
                Err(err) => {
                    tracing::warn!("bad stream frame: {err}");
                    record_error(&transport_error, err.to_string());
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {
                // Binary/ping/pong frames carry nothing for us
            }
            Err(err) => {
                tracing::debug!("run log stream transport error: {err}");
                record_error(&transport_error, err.to_string());
                break;
            }
        }
    }

    if let Some(tx) = done_tx.take() {
        let _ = tx.send(StreamEnd::Closed);
    }
}

fn record_error(slot: &Arc<Mutex<Option<String>>>, message: String) {
    let mut slot = slot.lock().expect("stream error slot lock poisoned");
    if slot.is_none() {
        *slot = Some(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::{Message as WsMessage, WebSocketUpgrade};
    use axum::{routing::get, Router};

    /// Serve a ws endpoint that sends `frames` and then either drops the
    /// socket or hangs, depending on `hang_after`
    async fn serve_frames(frames: Vec<String>, hang_after: bool) -> String {
        let frames = Arc::new(frames);
        let app = Router::new().route(
            "/ws",
            get(move |ws: WebSocketUpgrade| {
                let frames = Arc::clone(&frames);
                async move {
                    ws.on_upgrade(move |mut socket| async move {
                        for frame in frames.iter() {
                            if socket.send(WsMessage::Text(frame.clone().into())).await.is_err() {
                                return;
                            }
                        }
                        if hang_after {
                            tokio::time::sleep(Duration::from_secs(60)).await;
                        }
                    })
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("ws://{addr}/ws")
    }

    fn log_frame(text: &str) -> String {
        format!(
            r#"{{"Log":{{"pipeline":"p","job_id":"j","text":"{text}","timestamp":"2024-03-01T12:00:00Z"}}}}"#
        )
    }

    #[tokio::test]
    async fn collects_events_until_done() {
        let url = serve_frames(
            vec![
                log_frame("one"),
                log_frame("two"),
                r#"{"Status":{"pipeline":"p","status":{"Finished":"Success"}}}"#.to_string(),
                r#"{"Done":null}"#.to_string(),
            ],
            false,
        )
        .await;

        let stream = RunLogStream::open(&url).await.unwrap();
        let outcome = stream.wait(Duration::from_secs(5)).await.unwrap();

        assert!(outcome.completed);
        assert!(outcome.transport_error.is_none());
        assert_eq!(outcome.logs().count(), 2);
        assert_eq!(outcome.log_text(), "one\ntwo");
        assert_eq!(outcome.events.last(), Some(&StreamFrame::Done));
    }

    #[tokio::test]
    async fn unknown_frames_are_skipped() {
        let url = serve_frames(
            vec![
                r#"{"Telemetry":{"cpu":1}}"#.to_string(),
                log_frame("kept"),
                r#"{"Done":null}"#.to_string(),
            ],
            false,
        )
        .await;

        let outcome = RunLogStream::open(&url)
            .await
            .unwrap()
            .wait(Duration::from_secs(5))
            .await
            .unwrap();

        assert!(outcome.completed);
        assert!(outcome.transport_error.is_none());
        assert_eq!(outcome.logs().count(), 1);
        assert!(outcome.contains_log("kept"));
    }

    #[tokio::test]
    async fn abrupt_close_is_incomplete_but_not_an_error() {
        let url = serve_frames(vec![log_frame("only")], false).await;

        let outcome = RunLogStream::open(&url)
            .await
            .unwrap()
            .wait(Duration::from_secs(5))
            .await
            .unwrap();

        assert!(!outcome.completed);
        assert_eq!(outcome.logs().count(), 1);
    }

    #[tokio::test]
    async fn missing_done_times_out() {
        let url = serve_frames(vec![log_frame("stuck")], true).await;

        let stream = RunLogStream::open(&url).await.unwrap();
        let err = stream.wait(Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn malformed_frames_are_recorded_not_raised() {
        let url = serve_frames(
            vec![
                "not json".to_string(),
                log_frame("after"),
                r#"{"Done":null}"#.to_string(),
            ],
            false,
        )
        .await;

        let outcome = RunLogStream::open(&url)
            .await
            .unwrap()
            .wait(Duration::from_secs(5))
            .await
            .unwrap();

        assert!(outcome.completed);
        assert!(outcome.transport_error.is_some());
        assert!(outcome.contains_log("after"));
    }
}
