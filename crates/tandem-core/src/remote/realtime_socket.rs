//! Phoenix-protocol websocket for realtime broadcast channels.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{RealtimeStream, RemoteError, RemoteResult};
use crate::config::BackendConfig;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const FRAME_BUFFER: usize = 256;

/// Incoming Phoenix frame.
#[derive(Debug, Deserialize)]
struct Frame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
}

/// Connect, join `realtime:{topic}`, and forward broadcast payloads.
///
/// The socket lives in a background task that ends when the returned stream
/// is dropped or the server closes the channel.
pub(super) async fn connect(
    config: &BackendConfig,
    topic: &str,
) -> RemoteResult<RealtimeStream> {
    let url = config.realtime_url();
    let (socket, _) = connect_async(url.as_str())
        .await
        .map_err(|error| RemoteError::Realtime(format!("connect failed: {error}")))?;
    let (mut sink, mut source) = socket.split();

    let channel = format!("realtime:{topic}");
    let join = json!({
        "topic": channel,
        "event": "phx_join",
        "payload": {
            "config": { "broadcast": { "ack": false, "self": false } },
            "access_token": config.bearer_token(),
        },
        "ref": "1",
    });
    sink.send(Message::Text(join.to_string()))
        .await
        .map_err(|error| RemoteError::Realtime(format!("join failed: {error}")))?;
    tracing::debug!(channel = %channel, "Joined realtime channel");

    let (tx, mut rx) = mpsc::channel::<RemoteResult<Value>>(FRAME_BUFFER);
    tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        let mut next_ref: u64 = 2;
        heartbeat.tick().await;

        loop {
            tokio::select! {
                () = tx.closed() => break,
                _ = heartbeat.tick() => {
                    let frame = json!({
                        "topic": "phoenix",
                        "event": "heartbeat",
                        "payload": {},
                        "ref": next_ref.to_string(),
                    });
                    next_ref += 1;
                    if let Err(error) = sink.send(Message::Text(frame.to_string())).await {
                        report(&tx, format!("heartbeat failed: {error}")).await;
                        break;
                    }
                }
                message = source.next() => {
                    let Some(message) = message else {
                        report(&tx, "socket closed".to_string()).await;
                        break;
                    };
                    match message {
                        Ok(Message::Text(text)) => {
                            if let Some(item) = handle_frame(&channel, &text) {
                                let closing = matches!(item, Err(RemoteError::Realtime(_)));
                                if tx.send(item).await.is_err() || closing {
                                    break;
                                }
                            }
                        }
                        Ok(Message::Ping(data)) => {
                            let _ = sink.send(Message::Pong(data)).await;
                        }
                        Ok(Message::Close(_)) => {
                            report(&tx, "server closed the socket".to_string()).await;
                            break;
                        }
                        Ok(_) => {}
                        Err(error) => {
                            report(&tx, error.to_string()).await;
                            break;
                        }
                    }
                }
            }
        }

        let _ = sink.close().await;
        tracing::debug!(channel = %channel, "Realtime socket task finished");
    });

    let stream = futures::stream::poll_fn(move |cx| rx.poll_recv(cx));
    Ok(stream.boxed())
}

async fn report(tx: &mpsc::Sender<RemoteResult<Value>>, message: String) {
    let _ = tx.send(Err(RemoteError::Realtime(message))).await;
}

/// Map one text frame to a stream item; replies and unrelated topics yield `None`.
fn handle_frame(channel: &str, text: &str) -> Option<RemoteResult<Value>> {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(error) => {
            return Some(Err(RemoteError::Decode(format!(
                "invalid realtime frame: {error}"
            ))));
        }
    };
    if frame.topic != channel {
        return None;
    }

    match frame.event.as_str() {
        "broadcast" => {
            let mut payload = frame.payload;
            let inner = payload.get_mut("payload").map(Value::take);
            Some(Ok(inner.unwrap_or(payload)))
        }
        "phx_reply" => {
            let status = frame.payload.get("status").and_then(Value::as_str);
            if status == Some("error") {
                Some(Err(RemoteError::Realtime(format!(
                    "join rejected: {}",
                    frame.payload.get("response").unwrap_or(&Value::Null)
                ))))
            } else {
                None
            }
        }
        "phx_error" | "phx_close" => Some(Err(RemoteError::Realtime(format!(
            "channel {}",
            frame.event.trim_start_matches("phx_")
        )))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_frames_unwrap_inner_payload() {
        let text = r#"{"topic":"realtime:sync","event":"broadcast","ref":null,
            "payload":{"type":"broadcast","event":"change","payload":{"table":"tasks","_event_version":1}}}"#;
        let value = handle_frame("realtime:sync", text).unwrap().unwrap();
        assert_eq!(value["table"], "tasks");
    }

    #[test]
    fn other_topics_and_replies_are_ignored() {
        let other = r#"{"topic":"realtime:other","event":"broadcast","payload":{}}"#;
        assert!(handle_frame("realtime:sync", other).is_none());

        let reply = r#"{"topic":"realtime:sync","event":"phx_reply","payload":{"status":"ok"}}"#;
        assert!(handle_frame("realtime:sync", reply).is_none());
    }

    #[test]
    fn channel_errors_surface() {
        let error = r#"{"topic":"realtime:sync","event":"phx_error","payload":{}}"#;
        assert!(matches!(
            handle_frame("realtime:sync", error),
            Some(Err(RemoteError::Realtime(_)))
        ));

        let rejected =
            r#"{"topic":"realtime:sync","event":"phx_reply","payload":{"status":"error","response":{"reason":"unauthorized"}}}"#;
        assert!(matches!(
            handle_frame("realtime:sync", rejected),
            Some(Err(RemoteError::Realtime(_)))
        ));
    }

    #[test]
    fn malformed_frames_are_decode_errors() {
        assert!(matches!(
            handle_frame("realtime:sync", "not json"),
            Some(Err(RemoteError::Decode(_)))
        ));
    }
}
