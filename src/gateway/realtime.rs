//! Realtime change feed over the backend's Phoenix websocket.
//!
//! One long-lived connection per subscription: join `realtime:{channel}`
//! for every postgres change in the public schema, heartbeat to keep the
//! socket open, forward each change frame as a [`ChangeNotice`], and send
//! `phx_leave` when the feed is closed or dropped.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::{ChangeFeed, ChangeKind, ChangeNotice, CHANGE_FEED_CAPACITY};
use crate::error::GatewayError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const PROTOCOL_VERSION: &str = "1.0.0";

/// Websocket endpoint for a REST base URL (`https` → `wss`).
pub fn socket_url(base: &Url, api_key: &str) -> Result<Url, GatewayError> {
    let mut url = base.clone();
    let scheme = match base.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(GatewayError::InvalidUrl(format!("unsupported scheme {}", other))),
    };
    url.set_scheme(scheme)
        .map_err(|_| GatewayError::InvalidUrl(base.to_string()))?;
    url.set_path("/realtime/v1/websocket");
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", api_key)
        .append_pair("vsn", PROTOCOL_VERSION);
    Ok(url)
}

fn topic(channel: &str) -> String {
    format!("realtime:{}", channel)
}

fn join_frame(channel: &str, reference: u64) -> Value {
    json!({
        "topic": topic(channel),
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [ { "event": "*", "schema": "public" } ]
            }
        },
        "ref": reference.to_string(),
    })
}

fn leave_frame(channel: &str, reference: u64) -> Value {
    json!({
        "topic": topic(channel),
        "event": "phx_leave",
        "payload": {},
        "ref": reference.to_string(),
    })
}

fn heartbeat_frame(reference: u64) -> Value {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": reference.to_string(),
    })
}

/// What an incoming text frame means to the feed.
#[derive(Debug, PartialEq)]
pub(crate) enum Frame {
    Change(ChangeNotice),
    JoinRejected(String),
    Closed,
    Other,
}

pub(crate) fn parse_frame(text: &str) -> Frame {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return Frame::Other,
    };
    let event = value.get("event").and_then(Value::as_str).unwrap_or_default();
    let payload = value.get("payload").cloned().unwrap_or(Value::Null);

    match event {
        "postgres_changes" => {
            let data = payload.get("data").cloned().unwrap_or(Value::Null);
            let kind = data
                .get("type")
                .cloned()
                .and_then(|t| serde_json::from_value(t).ok())
                .unwrap_or(ChangeKind::Unknown);
            let table = data.get("table").and_then(Value::as_str).map(str::to_string);
            Frame::Change(ChangeNotice {
                kind,
                table,
                payload,
            })
        }
        "phx_reply" if payload.get("status").and_then(Value::as_str) == Some("error") => {
            Frame::JoinRejected(payload.get("response").map(|r| r.to_string()).unwrap_or_default())
        }
        "phx_close" | "phx_error" => Frame::Closed,
        _ => Frame::Other,
    }
}

/// Open the socket, join the channel and spawn the driver task.
pub async fn connect(endpoint: Url, channel: &str) -> Result<ChangeFeed, GatewayError> {
    let (ws_stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(endpoint.as_str()))
        .await
        .map_err(|_| GatewayError::WebSocket("timeout connecting to realtime".to_string()))??;

    let (mut write, mut read) = ws_stream.split();
    let mut reference: u64 = 1;
    write
        .send(Message::Text(join_frame(channel, reference).to_string()))
        .await?;

    let (tx, rx) = mpsc::channel(CHANGE_FEED_CAPACITY);
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let channel = channel.to_string();

    let driver = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    reference += 1;
                    let _ = write
                        .send(Message::Text(leave_frame(&channel, reference).to_string()))
                        .await;
                    let _ = write.close().await;
                    log::info!("Realtime: left {}", topic(&channel));
                    break;
                }
                _ = heartbeat.tick() => {
                    reference += 1;
                    if let Err(e) = write.send(Message::Text(heartbeat_frame(reference).to_string())).await {
                        log::warn!("Realtime: heartbeat failed: {}", e);
                        break;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => match parse_frame(&text) {
                            Frame::Change(notice) => {
                                if tx.send(notice).await.is_err() {
                                    break;
                                }
                            }
                            Frame::JoinRejected(reason) => {
                                log::warn!("Realtime: join rejected: {}", reason);
                                break;
                            }
                            Frame::Closed => {
                                log::warn!("Realtime: channel closed by server");
                                break;
                            }
                            Frame::Other => {}
                        },
                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Realtime: socket closed");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            log::warn!("Realtime: socket error: {}", e);
                            break;
                        }
                    }
                }
            }
        }
    });

    log::info!("Realtime: subscribed to {}", endpoint.host_str().unwrap_or("backend"));
    Ok(ChangeFeed::with_driver(rx, shutdown_tx, driver))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_url_switches_scheme_and_path() {
        let base = Url::parse("https://demo.supabase.co").unwrap();
        let url = socket_url(&base, "anon").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://demo.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
    }

    #[test]
    fn join_covers_whole_public_schema() {
        let frame = join_frame("pro-sync", 1);
        assert_eq!(frame["topic"], "realtime:pro-sync");
        assert_eq!(
            frame["payload"]["config"]["postgres_changes"],
            json!([{ "event": "*", "schema": "public" }])
        );
    }

    #[test]
    fn change_frames_become_notices() {
        let text = json!({
            "topic": "realtime:pro-sync",
            "event": "postgres_changes",
            "payload": { "data": { "type": "UPDATE", "table": "tasks", "record": { "id": "t1" } } },
            "ref": null
        })
        .to_string();
        match parse_frame(&text) {
            Frame::Change(notice) => {
                assert_eq!(notice.kind, ChangeKind::Update);
                assert_eq!(notice.table.as_deref(), Some("tasks"));
            }
            other => panic!("expected change, got {:?}", other),
        }
    }

    #[test]
    fn replies_and_noise() {
        let ok = json!({ "event": "phx_reply", "payload": { "status": "ok" } }).to_string();
        assert_eq!(parse_frame(&ok), Frame::Other);

        let err = json!({ "event": "phx_reply", "payload": { "status": "error", "response": { "reason": "denied" } } })
            .to_string();
        assert!(matches!(parse_frame(&err), Frame::JoinRejected(_)));

        assert_eq!(parse_frame(r#"{"event":"phx_close"}"#), Frame::Closed);
        assert_eq!(parse_frame("not json"), Frame::Other);
    }
}
