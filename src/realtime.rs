//! Realtime push channel for comments.
//!
//! Subscribes to the comment changes of one station over the backend's
//! Phoenix-style websocket and forwards them as [`CommentEvent`]s. The
//! caller applies them to its [`CommentFeed`](crate::comments::CommentFeed)
//! on its own loop, so the feed is never touched from here.
//!
//! A subscription lives until the receiver of its events is dropped.
//! Dropped connections are re-established with a growing, jittered delay.

use std::{ops::ControlFlow, sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use tokio::{sync::mpsc, time::MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WebsocketMessage;
use url::Url;

use crate::{
    backend::{
        realtime::{ChangeKind, ChangesPayload, Envelope},
        StationId,
    },
    comments::CommentEvent,
    config::Config,
    error::{Error, Result},
    gateway::Gateway,
};

/// What an incoming frame means for the subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Inbound {
    Event(CommentEvent),

    /// The server ended the subscription.
    Closed(String),

    Ignored,
}

/// Client of the realtime websocket.
pub struct Realtime {
    url: Url,
}

impl Realtime {
    /// Interval of the keep-alive heartbeat.
    const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

    /// Protocol version requested from the server.
    const PROTOCOL_VERSION: &'static str = "1.0.0";

    /// Frames larger than this are not parsed.
    const MAX_MESSAGE_SIZE: usize = 64 * 1024;

    const RECONNECT_DELAY_MIN: Duration = Duration::from_secs(1);
    const RECONNECT_DELAY_MAX: Duration = Duration::from_secs(60);

    /// Creates a client for the backend in `config`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the websocket URL cannot be derived from the
    /// backend URL.
    pub fn new(config: &Config) -> Result<Self> {
        let mut url = config.endpoint("realtime/v1/websocket")?;

        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(Error::invalid_argument(format!(
                    "unsupported backend scheme {other}"
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| Error::internal("cannot switch to websocket scheme"))?;

        url.query_pairs_mut()
            .append_pair("apikey", &config.api_key)
            .append_pair("vsn", Self::PROTOCOL_VERSION);

        Ok(Self { url })
    }

    /// Keeps the comment subscription of `station` alive until `event_tx`
    /// is closed, reconnecting after failures.
    pub async fn keep_subscribed(
        &self,
        gateway: Arc<Gateway>,
        station: StationId,
        event_tx: mpsc::UnboundedSender<CommentEvent>,
    ) {
        let mut delay = Self::RECONNECT_DELAY_MIN;
        loop {
            let result = match gateway.access_token().await {
                Ok(token) => self.subscribe(&station, &token, &event_tx).await,
                Err(e) => Err(e),
            };

            if event_tx.is_closed() {
                debug!("comment subscription of station {station} ended");
                return;
            }

            match result {
                Ok(()) => delay = Self::RECONNECT_DELAY_MIN,
                Err(e) => {
                    warn!("comment subscription of station {station} dropped: {e}");
                    let jitter = Duration::from_millis(fastrand::u64(0..1000));
                    tokio::select! {
                        () = tokio::time::sleep(delay + jitter) => {}
                        () = event_tx.closed() => return,
                    }
                    delay = (delay * 2).min(Self::RECONNECT_DELAY_MAX);
                }
            }
        }
    }

    /// Subscribes to the comments of `station` on a single connection.
    ///
    /// Returns `Ok` when `event_tx` is closed, and `Err` when the
    /// connection or the subscription ends otherwise.
    ///
    /// # Errors
    ///
    /// Will return `Err` if connecting fails, the server rejects or closes
    /// the subscription, or the connection breaks.
    pub async fn subscribe(
        &self,
        station: &StationId,
        access_token: &str,
        event_tx: &mpsc::UnboundedSender<CommentEvent>,
    ) -> Result<()> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let mut reference = 0;
        let mut next_ref = || {
            reference += 1;
            reference
        };

        let topic = Envelope::comments_topic(station);
        let join = Envelope::join_comments(station, access_token, next_ref());
        ws_tx
            .send(WebsocketMessage::text(serde_json::to_string(&join)?))
            .await?;
        info!("subscribed to comments of station {station}");

        let start = tokio::time::Instant::now() + Self::HEARTBEAT_INTERVAL;
        let mut heartbeat = tokio::time::interval_at(start, Self::HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = event_tx.closed() => {
                    let leave = Envelope::leave(&topic, next_ref());
                    let _ = ws_tx.send(WebsocketMessage::text(serde_json::to_string(&leave)?)).await;
                    let _ = ws_tx.close().await;
                    return Ok(());
                }

                _ = heartbeat.tick() => {
                    trace!("heartbeat");
                    let beat = Envelope::heartbeat(next_ref());
                    ws_tx.send(WebsocketMessage::text(serde_json::to_string(&beat)?)).await?;
                }

                message = ws_rx.next() => {
                    let message = match message {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(Error::aborted("connection closed")),
                    };

                    let reply = match &message {
                        WebsocketMessage::Text(_) => {
                            match message.to_text().map(|text| Self::decode(&topic, text)) {
                                Ok(Inbound::Event(event)) => {
                                    if event_tx.send(event).is_err() {
                                        continue;
                                    }
                                    ControlFlow::Continue(None)
                                }
                                Ok(Inbound::Closed(reason)) => ControlFlow::Break(reason),
                                Ok(Inbound::Ignored) => ControlFlow::Continue(None),
                                Err(e) => {
                                    error!("error reading message: {e}");
                                    ControlFlow::Continue(None)
                                }
                            }
                        }
                        WebsocketMessage::Ping(payload) => {
                            trace!("ping -> pong");
                            ControlFlow::Continue(Some(WebsocketMessage::Pong(payload.clone())))
                        }
                        WebsocketMessage::Close(payload) => {
                            ControlFlow::Break(format!("connection closed by server: {payload:?}"))
                        }
                        _ => {
                            trace!("message type unimplemented");
                            ControlFlow::Continue(None)
                        }
                    };

                    match reply {
                        ControlFlow::Continue(Some(reply)) => ws_tx.send(reply).await?,
                        ControlFlow::Continue(None) => {}
                        ControlFlow::Break(reason) => return Err(Error::aborted(reason)),
                    }
                }
            }
        }
    }

    /// Interprets a text frame received on the subscription to `topic`.
    fn decode(topic: &str, text: &str) -> Inbound {
        // Do not parse exceedingly large messages to prevent out of memory
        // conditions.
        if text.len() > Self::MAX_MESSAGE_SIZE {
            error!("ignoring oversized message with {} bytes", text.len());
            return Inbound::Ignored;
        }

        let envelope = match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("error parsing message: {e}");
                return Inbound::Ignored;
            }
        };

        if envelope.topic != topic {
            trace!("{} on {}", envelope.event, envelope.topic);
            return Inbound::Ignored;
        }

        match envelope.event.as_str() {
            Envelope::CHANGES => Self::decode_change(envelope),
            Envelope::REPLY => match envelope.reply_status() {
                Some("error") => Inbound::Closed(format!(
                    "subscription rejected: {}",
                    envelope.payload.get("response").unwrap_or(&envelope.payload)
                )),
                status => {
                    trace!("reply {status:?}");
                    Inbound::Ignored
                }
            },
            Envelope::ERROR => Inbound::Closed("channel error".to_owned()),
            Envelope::CLOSE => Inbound::Closed("channel closed".to_owned()),
            event => {
                trace!("ignoring {event}");
                Inbound::Ignored
            }
        }
    }

    fn decode_change(envelope: Envelope) -> Inbound {
        let change = match serde_json::from_value::<ChangesPayload>(envelope.payload) {
            Ok(payload) => payload.data,
            Err(e) => {
                error!("error parsing change: {e}");
                return Inbound::Ignored;
            }
        };

        let event = match change.kind {
            ChangeKind::Insert => change
                .inserted_comment()
                .map(|comment| comment.map(CommentEvent::Inserted)),
            ChangeKind::Delete => change.deleted_comment().map(|deleted| {
                deleted.map(|deleted| CommentEvent::Deleted {
                    id: deleted.id,
                    station_id: deleted.station_id,
                })
            }),
            ChangeKind::Update => {
                trace!("ignoring comment update");
                Ok(None)
            }
        };

        match event {
            Ok(Some(event)) => Inbound::Event(event),
            Ok(None) => Inbound::Ignored,
            Err(e) => {
                error!("error decoding comment change: {e}");
                Inbound::Ignored
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CommentId;

    const TOPIC: &str = "realtime:comments:s1";

    #[test]
    fn websocket_url_carries_key_and_version() {
        let config = Config::new(Url::parse("https://project.example.co/").unwrap(), "k").unwrap();
        let realtime = Realtime::new(&config).unwrap();
        assert_eq!(
            realtime.url.as_str(),
            "wss://project.example.co/realtime/v1/websocket?apikey=k&vsn=1.0.0"
        );
    }

    #[test]
    fn inserts_become_events() {
        let frame = r#"{
            "topic": "realtime:comments:s1",
            "event": "postgres_changes",
            "payload": {"data": {"type": "INSERT", "table": "comments", "record": {
                "id": "c1", "user_id": "u1", "station_id": "s1",
                "content": "hi", "created_at": "2024-06-09T12:00:00Z"
            }}},
            "ref": null
        }"#;
        match Realtime::decode(TOPIC, frame) {
            Inbound::Event(CommentEvent::Inserted(comment)) => {
                assert_eq!(comment.id, CommentId::from("c1"));
                assert_eq!(comment.content, "hi");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn deletes_become_events() {
        let frame = r#"{
            "topic": "realtime:comments:s1",
            "event": "postgres_changes",
            "payload": {"data": {"type": "DELETE", "table": "comments", "old_record": {"id": "c1"}}},
            "ref": null
        }"#;
        assert_eq!(
            Realtime::decode(TOPIC, frame),
            Inbound::Event(CommentEvent::Deleted {
                id: CommentId::from("c1"),
                station_id: None,
            })
        );
    }

    #[test]
    fn other_topics_and_replies_are_ignored() {
        let other = r#"{"topic": "realtime:comments:s2", "event": "phx_close", "payload": {}, "ref": null}"#;
        assert_eq!(Realtime::decode(TOPIC, other), Inbound::Ignored);

        let ok = r#"{"topic": "realtime:comments:s1", "event": "phx_reply", "payload": {"status": "ok", "response": {}}, "ref": "1"}"#;
        assert_eq!(Realtime::decode(TOPIC, ok), Inbound::Ignored);

        assert_eq!(Realtime::decode(TOPIC, "not json"), Inbound::Ignored);
    }

    #[test]
    fn rejection_and_close_end_the_subscription() {
        let rejected = r#"{"topic": "realtime:comments:s1", "event": "phx_reply", "payload": {"status": "error", "response": {"reason": "unauthorized"}}, "ref": "1"}"#;
        assert!(matches!(
            Realtime::decode(TOPIC, rejected),
            Inbound::Closed(reason) if reason.contains("unauthorized")
        ));

        let closed = r#"{"topic": "realtime:comments:s1", "event": "phx_close", "payload": {}, "ref": null}"#;
        assert!(matches!(Realtime::decode(TOPIC, closed), Inbound::Closed(_)));
    }

    #[test]
    fn oversized_frames_are_ignored() {
        let padding = "x".repeat(Realtime::MAX_MESSAGE_SIZE);
        let frame = format!(
            r#"{{"topic": "realtime:comments:s1", "event": "phx_close", "payload": {{"pad": "{padding}"}}, "ref": null}}"#
        );
        assert_eq!(Realtime::decode(TOPIC, &frame), Inbound::Ignored);
    }
}
