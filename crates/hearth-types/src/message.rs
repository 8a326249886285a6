//! WebSocket message protocol

use super::TransferItem;
use serde::{Deserialize, Serialize};

/// Index mutation fanned out to connected viewers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferEvent {
    Add { item: TransferItem },
    Delete { id: String },
}

/// Client -> Server messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    // Authentication
    Authenticate { token: String },

    // Heartbeat
    Ping,
}

/// Server -> Client messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Authenticated { username: String },

    // Index mutations
    Add { item: TransferItem },
    Delete { id: String },

    Pong,
    Error { code: String, message: String },
}

impl From<TransferEvent> for ServerMessage {
    fn from(event: TransferEvent) -> Self {
        match event {
            TransferEvent::Add { item } => ServerMessage::Add { item },
            TransferEvent::Delete { id } => ServerMessage::Delete { id },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let event = TransferEvent::Delete { id: "x1".into() };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"delete","id":"x1"}"#);

        let msg = ServerMessage::from(event);
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"delete","id":"x1"}"#);
    }

    #[test]
    fn test_client_authenticate_parses() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"authenticate","token":"t"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Authenticate { token } if token == "t"));
    }
}
