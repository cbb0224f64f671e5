//! Websocket channel backend speaking the Phoenix channel protocol used by
//! the hosted realtime service.
//!
//! Each channel gets its own socket: join on open, heartbeat every 30 s,
//! leave on close. `postgres_changes` frames become change notifications,
//! join replies and close/error frames become lifecycle states.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use punchclock_types::events::ChangeNotification;

use crate::channel::{
    ChannelHandle, ChannelMessage, ChannelSpec, ChannelState, OpenChannel, RealtimeBackend,
    RealtimeError,
};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const PROTOCOL_VSN: &str = "1.0.0";

pub struct SocketBackend {
    endpoint: String,
    api_key: String,
    /// Leave signals for open channels.
    controls: Mutex<HashMap<ChannelHandle, mpsc::UnboundedSender<()>>>,
}

impl SocketBackend {
    /// `base_url` is the backend's http(s) URL; the websocket endpoint is
    /// derived from it.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, RealtimeError> {
        Ok(Self {
            endpoint: socket_endpoint(base_url, api_key)?,
            api_key: api_key.to_string(),
            controls: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl RealtimeBackend for SocketBackend {
    async fn open_channel(&self, spec: &ChannelSpec) -> Result<OpenChannel, RealtimeError> {
        let (socket, _) = tokio_tungstenite::connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| RealtimeError::Open {
                channel: spec.name.clone(),
                reason: e.to_string(),
            })?;
        let (mut sink, mut stream) = socket.split();

        let topic = topic_for(spec);
        let mut next_ref: u64 = 1;
        sink.send(Message::Text(
            join_frame(&topic, spec, &self.api_key, next_ref).to_string().into(),
        ))
        .await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (leave_tx, mut leave_rx) = mpsc::unbounded_channel::<()>();
        let handle = ChannelHandle::new();
        self.controls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, leave_tx);

        info!("Joining realtime topic {}", topic);

        tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            heartbeat.tick().await;

            loop {
                tokio::select! {
                    frame = stream.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                let Some(message) = decode_frame(&topic, text.as_str()) else {
                                    continue;
                                };
                                if tx.send(message).is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                let _ = tx.send(ChannelMessage::State(ChannelState::Closed));
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("Realtime socket error on {}: {}", topic, e);
                                let _ = tx.send(ChannelMessage::State(ChannelState::ChannelError));
                                break;
                            }
                            Some(Ok(_)) => {}
                        }
                    }
                    _ = heartbeat.tick() => {
                        next_ref += 1;
                        let frame = heartbeat_frame(next_ref).to_string();
                        if sink.send(Message::Text(frame.into())).await.is_err() {
                            let _ = tx.send(ChannelMessage::State(ChannelState::TimedOut));
                            break;
                        }
                    }
                    _ = leave_rx.recv() => {
                        next_ref += 1;
                        let frame = leave_frame(&topic, next_ref).to_string();
                        let _ = sink.send(Message::Text(frame.into())).await;
                        let _ = sink.close().await;
                        debug!("Left realtime topic {}", topic);
                        break;
                    }
                }
            }
        });

        Ok(OpenChannel {
            handle,
            messages: rx,
        })
    }

    async fn close_channel(&self, handle: ChannelHandle) {
        let control = self
            .controls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle);
        if let Some(leave) = control {
            let _ = leave.send(());
        }
    }
}

fn socket_endpoint(base_url: &str, api_key: &str) -> Result<String, RealtimeError> {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        return Err(RealtimeError::InvalidEndpoint(base_url.to_string()));
    };
    Ok(format!(
        "{}/realtime/v1/websocket?apikey={}&vsn={}",
        ws_base, api_key, PROTOCOL_VSN
    ))
}

fn topic_for(spec: &ChannelSpec) -> String {
    format!("realtime:{}", spec.name)
}

fn join_frame(topic: &str, spec: &ChannelSpec, access_token: &str, msg_ref: u64) -> Value {
    let mut change = json!({
        "event": "*",
        "schema": "public",
        "table": spec.table.name(),
    });
    if let Some(filter) = spec.filter_expr() {
        change["filter"] = Value::String(filter);
    }
    json!({
        "topic": topic,
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [change],
            },
            "access_token": access_token,
        },
        "ref": msg_ref.to_string(),
        "join_ref": msg_ref.to_string(),
    })
}

fn heartbeat_frame(msg_ref: u64) -> Value {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": msg_ref.to_string(),
    })
}

fn leave_frame(topic: &str, msg_ref: u64) -> Value {
    json!({
        "topic": topic,
        "event": "phx_leave",
        "payload": {},
        "ref": msg_ref.to_string(),
    })
}

/// Translate one server frame for `topic`. Frames for other topics,
/// heartbeat replies and anything unrecognised yield `None`.
fn decode_frame(topic: &str, text: &str) -> Option<ChannelMessage> {
    let frame: Value = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Unparseable realtime frame: {}", e);
            return None;
        }
    };
    if frame.get("topic").and_then(Value::as_str) != Some(topic) {
        return None;
    }

    let payload = frame.get("payload").unwrap_or(&Value::Null);
    match frame.get("event").and_then(Value::as_str)? {
        "phx_reply" => match payload.get("status").and_then(Value::as_str) {
            Some("ok") => Some(ChannelMessage::State(ChannelState::Subscribed)),
            Some("timeout") => Some(ChannelMessage::State(ChannelState::TimedOut)),
            _ => Some(ChannelMessage::State(ChannelState::ChannelError)),
        },
        "phx_error" => Some(ChannelMessage::State(ChannelState::ChannelError)),
        "phx_close" => Some(ChannelMessage::State(ChannelState::Closed)),
        "postgres_changes" => {
            let data = payload.get("data")?.clone();
            match serde_json::from_value::<ChangeNotification>(data) {
                Ok(change) => Some(ChannelMessage::Change(change)),
                Err(e) => {
                    warn!("Malformed change notification on {}: {}", topic, e);
                    None
                }
            }
        }
        other => {
            trace!("Ignoring realtime event {} on {}", other, topic);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelScope;
    use punchclock_types::events::ChangeOp;

    #[test]
    fn endpoint_switches_to_websocket_scheme() {
        assert_eq!(
            socket_endpoint("https://acme.example.co/", "key").unwrap(),
            "wss://acme.example.co/realtime/v1/websocket?apikey=key&vsn=1.0.0"
        );
        assert!(socket_endpoint("http://localhost:54321", "k").unwrap().starts_with("ws://localhost:54321/"));
        assert!(matches!(
            socket_endpoint("ftp://nope", "k"),
            Err(RealtimeError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn join_frame_carries_table_and_filter() {
        let spec = ChannelSpec::for_scope(&ChannelScope::User("7".into()));
        let frame = join_frame("realtime:user_7", &spec, "token", 1);

        assert_eq!(frame["event"], "phx_join");
        let change = &frame["payload"]["config"]["postgres_changes"][0];
        assert_eq!(change["table"], "salary_records");
        assert_eq!(change["filter"], "user_id=eq.7");
        assert_eq!(frame["payload"]["access_token"], "token");

        let all = ChannelSpec::for_scope(&ChannelScope::All);
        let frame = join_frame("realtime:salary_all", &all, "token", 2);
        assert!(frame["payload"]["config"]["postgres_changes"][0].get("filter").is_none());
    }

    #[test]
    fn join_reply_means_subscribed() {
        let text = r#"{"topic":"realtime:user_7","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"1"}"#;
        assert!(matches!(
            decode_frame("realtime:user_7", text),
            Some(ChannelMessage::State(ChannelState::Subscribed))
        ));

        let error = r#"{"topic":"realtime:user_7","event":"phx_reply","payload":{"status":"error"},"ref":"1"}"#;
        assert!(matches!(
            decode_frame("realtime:user_7", error),
            Some(ChannelMessage::State(ChannelState::ChannelError))
        ));
    }

    #[test]
    fn heartbeat_replies_and_other_topics_are_ignored() {
        let heartbeat = r#"{"topic":"phoenix","event":"phx_reply","payload":{"status":"ok"},"ref":"2"}"#;
        assert!(decode_frame("realtime:user_7", heartbeat).is_none());
        assert!(decode_frame("realtime:user_7", "not json").is_none());
    }

    #[test]
    fn postgres_changes_become_notifications() {
        let text = r#"{
            "topic": "realtime:salary_all",
            "event": "postgres_changes",
            "payload": {
                "ids": [1],
                "data": {
                    "type": "UPDATE",
                    "table": "salary_records",
                    "schema": "public",
                    "record": {"id": "r1", "paid_date": "2026-03-01"},
                    "old_record": {"id": "r1"},
                    "commit_timestamp": "2026-03-01T09:00:00Z"
                }
            }
        }"#;
        match decode_frame("realtime:salary_all", text) {
            Some(ChannelMessage::Change(change)) => {
                assert_eq!(change.op, ChangeOp::Update);
                assert_eq!(change.record["id"], "r1");
                assert!(change.commit_timestamp.is_some());
            }
            other => panic!("Expected change, got {:?}", other),
        }
    }

    #[test]
    fn close_and_error_frames_map_to_states() {
        let close = r#"{"topic":"realtime:salary_all","event":"phx_close","payload":{}}"#;
        assert!(matches!(
            decode_frame("realtime:salary_all", close),
            Some(ChannelMessage::State(ChannelState::Closed))
        ));
        let error = r#"{"topic":"realtime:salary_all","event":"phx_error","payload":{}}"#;
        assert!(matches!(
            decode_frame("realtime:salary_all", error),
            Some(ChannelMessage::State(ChannelState::ChannelError))
        ));
    }
}
