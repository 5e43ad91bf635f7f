//! Realtime stream: a broadcast hub fanned out to `/ws` clients.
//!
//! Every frame is a JSON envelope `{"event", "timestamp", "data"}`. A client
//! starts subscribed to everything and may narrow its channels with
//! `{"type": "subscribe", "channels": [...]}`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;

pub const EVENT_CONNECTED: &str = "connected";
pub const EVENT_SUBSCRIBED: &str = "subscribed";
pub const EVENT_NEW_INSIGHT: &str = "new_insight";
pub const EVENT_NEW_DEVIATION: &str = "new_deviation";
pub const EVENT_AGENT_ACTIVITY: &str = "agent_activity";
pub const EVENT_PROCESSED: &str = "event_processed";
pub const EVENT_SIMULATION_STATUS: &str = "simulation_status";
pub const EVENT_SYSTEM_HEALTH: &str = "system_health";

const BROADCAST_CAPACITY: usize = 256;

/// One frame on the realtime stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeMessage {
    pub event: String,
    pub timestamp: String,
    #[serde(default)]
    pub data: Value,
}

impl RealtimeMessage {
    pub fn new(event: &str, data: Value) -> Self {
        Self { event: event.to_string(), timestamp: Utc::now().to_rfc3339(), data }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    channels: Vec<String>,
}

/// Short channel names accepted next to the raw event names.
fn channel_of(event: &str) -> Option<&'static str> {
    Some(match event {
        EVENT_NEW_INSIGHT => "insights",
        EVENT_NEW_DEVIATION => "deviations",
        EVENT_AGENT_ACTIVITY => "agents",
        EVENT_PROCESSED => "events",
        EVENT_SIMULATION_STATUS => "simulation",
        EVENT_SYSTEM_HEALTH => "health",
        _ => return None,
    })
}

pub fn wants(channels: &[String], event: &str) -> bool {
    channels.iter().any(|c| c == "all" || c == event || Some(c.as_str()) == channel_of(event))
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub client_id: String,
    pub connected_at: DateTime<Utc>,
    pub channels: Vec<String>,
}

#[derive(Clone)]
pub struct RealtimeHub {
    tx: broadcast::Sender<RealtimeMessage>,
    clients: Arc<Mutex<HashMap<String, ClientInfo>>>,
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx, clients: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Broadcast to every connected client. Dropped silently when nobody listens.
    pub fn publish(&self, event: &str, data: Value) {
        let _ = self.tx.send(RealtimeMessage::new(event, data));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeMessage> {
        self.tx.subscribe()
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn clients(&self) -> Vec<ClientInfo> {
        let mut clients: Vec<ClientInfo> = self
            .clients
            .lock()
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default();
        clients.sort_by_key(|c| c.connected_at);
        clients
    }

    fn register(&self, client_id: &str) {
        if let Ok(mut clients) = self.clients.lock() {
            clients.insert(
                client_id.to_string(),
                ClientInfo {
                    client_id: client_id.to_string(),
                    connected_at: Utc::now(),
                    channels: vec!["all".to_string()],
                },
            );
        }
    }

    fn set_channels(&self, client_id: &str, channels: &[String]) {
        if let Ok(mut clients) = self.clients.lock() {
            if let Some(info) = clients.get_mut(client_id) {
                info.channels = channels.to_vec();
            }
        }
    }

    fn unregister(&self, client_id: &str) {
        if let Ok(mut clients) = self.clients.lock() {
            clients.remove(client_id);
        }
    }
}

async fn send(socket: &mut WebSocket, message: &RealtimeMessage) -> bool {
    socket.send(Message::Text(message.to_json())).await.is_ok()
}

/// Serve one WebSocket client until it disconnects.
pub async fn stream_loop(mut socket: WebSocket, hub: RealtimeHub) {
    let client_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    let mut rx = hub.subscribe();
    let mut channels = vec!["all".to_string()];
    hub.register(&client_id);
    tracing::info!(client_id = %client_id, "Realtime client connected");

    let hello = RealtimeMessage::new(
        EVENT_CONNECTED,
        json!({
            "status": "connected",
            "client_id": client_id,
            "message": "Connected to Orbitr real-time stream",
        }),
    );
    if !send(&mut socket, &hello).await {
        hub.unregister(&client_id);
        return;
    }

    loop {
        tokio::select! {
            broadcast = rx.recv() => match broadcast {
                Ok(message) => {
                    if wants(&channels, &message.event) && !send(&mut socket, &message).await {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(client_id = %client_id, skipped, "Realtime client lagging");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(msg) if msg.kind == "subscribe" => {
                            channels = if msg.channels.is_empty() { vec!["all".to_string()] } else { msg.channels };
                            hub.set_channels(&client_id, &channels);
                            let ack = RealtimeMessage::new(EVENT_SUBSCRIBED, json!({ "channels": channels }));
                            if !send(&mut socket, &ack).await {
                                break;
                            }
                        }
                        Ok(msg) => tracing::debug!(client_id = %client_id, kind = %msg.kind, "Ignoring client message"),
                        Err(e) => tracing::debug!(client_id = %client_id, error = %e, "Unparseable client message"),
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    hub.unregister(&client_id);
    tracing::info!(client_id = %client_id, "Realtime client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_filtering() {
        let all = vec!["all".to_string()];
        assert!(wants(&all, EVENT_SYSTEM_HEALTH));

        let picky = vec!["deviations".to_string(), EVENT_PROCESSED.to_string()];
        assert!(wants(&picky, EVENT_NEW_DEVIATION), "short channel name");
        assert!(wants(&picky, EVENT_PROCESSED), "raw event name");
        assert!(!wants(&picky, EVENT_NEW_INSIGHT));
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let hub = RealtimeHub::new();
        let mut rx = hub.subscribe();
        hub.publish(EVENT_NEW_INSIGHT, json!({"id": "a"}));
        let message = rx.recv().await.unwrap();
        assert_eq!(message.event, EVENT_NEW_INSIGHT);
        assert_eq!(message.data["id"], "a");
    }

    #[test]
    fn test_publish_without_listeners_is_harmless() {
        let hub = RealtimeHub::new();
        hub.publish(EVENT_SYSTEM_HEALTH, json!({}));
        assert_eq!(hub.client_count(), 0);
    }

    #[test]
    fn test_envelope_shape() {
        let message = RealtimeMessage::new(EVENT_PROCESSED, json!({"risk_score": 0.5}));
        let value: Value = serde_json::from_str(&message.to_json()).unwrap();
        assert_eq!(value["event"], "event_processed");
        assert!(value["timestamp"].as_str().is_some());
        assert_eq!(value["data"]["risk_score"], 0.5);
    }
}
