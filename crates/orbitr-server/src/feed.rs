//! Client side of the realtime stream.
//!
//! [`RealtimeFeed`] buckets incoming frames into bounded, most-recent-first
//! lists; [`spawn_feed`] keeps one connected to a server's `/ws` endpoint,
//! reconnecting after drops.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::realtime::{
    RealtimeMessage, EVENT_AGENT_ACTIVITY, EVENT_CONNECTED, EVENT_NEW_DEVIATION, EVENT_NEW_INSIGHT, EVENT_PROCESSED,
    EVENT_SIMULATION_STATUS, EVENT_SYSTEM_HEALTH,
};

pub const MAX_INSIGHTS: usize = 50;
pub const MAX_DEVIATIONS: usize = 20;
pub const MAX_AGENT_ACTIVITY: usize = 30;
pub const MAX_PROCESSED: usize = 50;

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Default)]
pub struct RealtimeFeed {
    pub connected: bool,
    pub client_id: Option<String>,
    pub insights: VecDeque<Value>,
    pub deviations: VecDeque<Value>,
    pub agent_activity: VecDeque<Value>,
    pub processed: VecDeque<Value>,
    pub simulation_status: Option<Value>,
    pub health: Option<Value>,
    /// Frames seen since the feed was created.
    pub received: u64,
}

fn push_front_bounded(list: &mut VecDeque<Value>, item: Value, max: usize) {
    list.push_front(item);
    list.truncate(max);
}

impl RealtimeFeed {
    pub fn apply(&mut self, message: RealtimeMessage) {
        self.received += 1;
        match message.event.as_str() {
            EVENT_CONNECTED => {
                self.connected = true;
                self.client_id = message.data["client_id"].as_str().map(str::to_string);
            }
            EVENT_NEW_INSIGHT => push_front_bounded(&mut self.insights, message.data, MAX_INSIGHTS),
            EVENT_NEW_DEVIATION => push_front_bounded(&mut self.deviations, message.data, MAX_DEVIATIONS),
            EVENT_AGENT_ACTIVITY => push_front_bounded(&mut self.agent_activity, message.data, MAX_AGENT_ACTIVITY),
            EVENT_PROCESSED => push_front_bounded(&mut self.processed, message.data, MAX_PROCESSED),
            EVENT_SIMULATION_STATUS => self.simulation_status = Some(message.data),
            EVENT_SYSTEM_HEALTH => self.health = Some(message.data),
            _ => {}
        }
    }

    pub fn simulation_running(&self) -> bool {
        self.simulation_status
            .as_ref()
            .and_then(|s| s["running"].as_bool())
            .unwrap_or(false)
    }
}

/// `http://host:port` → `ws://host:port/ws`.
pub fn ws_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}/ws")
}

/// Keep a feed connected to `url` in the background.
pub fn spawn_feed(url: String) -> Arc<Mutex<RealtimeFeed>> {
    let feed = Arc::new(Mutex::new(RealtimeFeed::default()));
    let shared = feed.clone();
    tokio::spawn(async move {
        loop {
            match connect_async(url.as_str()).await {
                Ok((stream, _)) => {
                    tracing::debug!(url = %url, "Realtime feed connected");
                    let (_write, mut read) = stream.split();
                    while let Some(frame) = read.next().await {
                        match frame {
                            Ok(Message::Text(text)) => match serde_json::from_str::<RealtimeMessage>(&text) {
                                Ok(message) => {
                                    if let Ok(mut feed) = shared.lock() {
                                        feed.apply(message);
                                    }
                                }
                                Err(e) => tracing::debug!(error = %e, "Unparseable realtime frame"),
                            },
                            Ok(Message::Close(_)) | Err(_) => break,
                            Ok(_) => {}
                        }
                    }
                }
                Err(e) => tracing::debug!(url = %url, error = %e, "Realtime feed connect failed"),
            }
            if let Ok(mut feed) = shared.lock() {
                feed.connected = false;
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    });
    feed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_buckets_are_most_recent_first_and_bounded() {
        let mut feed = RealtimeFeed::default();
        for i in 0..(MAX_DEVIATIONS + 5) {
            feed.apply(RealtimeMessage::new(EVENT_NEW_DEVIATION, json!({ "n": i })));
        }
        assert_eq!(feed.deviations.len(), MAX_DEVIATIONS);
        assert_eq!(feed.deviations[0]["n"], json!(MAX_DEVIATIONS + 4), "newest first");
        assert_eq!(feed.received, (MAX_DEVIATIONS + 5) as u64);
    }

    #[test]
    fn test_snapshots_keep_the_last_value() {
        let mut feed = RealtimeFeed::default();
        feed.apply(RealtimeMessage::new(EVENT_SIMULATION_STATUS, json!({"running": true})));
        assert!(feed.simulation_running());
        feed.apply(RealtimeMessage::new(EVENT_SIMULATION_STATUS, json!({"running": false})));
        assert!(!feed.simulation_running());

        feed.apply(RealtimeMessage::new(EVENT_SYSTEM_HEALTH, json!({"status": "healthy"})));
        assert_eq!(feed.health.as_ref().unwrap()["status"], "healthy");
    }

    #[test]
    fn test_connected_records_client_id() {
        let mut feed = RealtimeFeed::default();
        feed.apply(RealtimeMessage::new(EVENT_CONNECTED, json!({"client_id": "abcd1234"})));
        assert!(feed.connected);
        assert_eq!(feed.client_id.as_deref(), Some("abcd1234"));
    }

    #[test]
    fn test_ws_url() {
        assert_eq!(ws_url("http://127.0.0.1:8000/"), "ws://127.0.0.1:8000/ws");
        assert_eq!(ws_url("https://orbitr.example"), "wss://orbitr.example/ws");
    }
}
