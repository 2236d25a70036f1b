use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::game::engine::BiteEndReason;
use crate::game::fish::CaughtFish;
use crate::game::player::{PlayerAction, PlayerId};
use crate::util::vec3::Vec3;

/// Messages from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// Request to join the island
    PlayerJoin { name: String },
    /// Avatar pose, mirrored to everyone else
    PlayerUpdate {
        position: Vec3,
        action: PlayerAction,
        rotation: f32,
    },
    /// Cast the line
    StartFishing {
        position: Vec3,
        #[serde(default)]
        direction: Option<Vec3>,
    },
    /// Reel in
    StopFishing {},
    /// Catch resolved on the client (offline builds, older clients)
    FishCaught { fish: CaughtFish },
    /// Ping for latency measurement
    Ping { timestamp: u64 },
}

/// Messages from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerMessage {
    /// Sent to the joiner with its assigned id and spawn point
    PlayerJoined { id: PlayerId, position: Vec3 },
    /// Join was rejected
    JoinRejected { reason: String },
    PlayerUpdate {
        id: PlayerId,
        name: String,
        position: Vec3,
        action: PlayerAction,
        rotation: f32,
        score: u32,
    },
    PlayerLeft { id: PlayerId },
    #[serde(rename_all = "camelCase")]
    FishCaught {
        player_id: PlayerId,
        fish: CaughtFish,
        score: u32,
    },
    /// Only sent to the player who is fishing
    #[serde(rename_all = "camelCase")]
    BiteStarted {
        species_id: String,
        window_ms: u64,
        bobber: Vec3,
    },
    BiteEnded { reason: BiteEndReason },
    /// Request was ignored; the connection stays up
    Warning { message: String },
    /// Pong response with server timestamp
    #[serde(rename_all = "camelCase")]
    Pong {
        client_timestamp: u64,
        server_timestamp: u64,
    },
}

impl ServerMessage {
    /// Event name as it appears in the JSON envelope
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::PlayerJoined { .. } => "playerJoined",
            ServerMessage::JoinRejected { .. } => "joinRejected",
            ServerMessage::PlayerUpdate { .. } => "playerUpdate",
            ServerMessage::PlayerLeft { .. } => "playerLeft",
            ServerMessage::FishCaught { .. } => "fishCaught",
            ServerMessage::BiteStarted { .. } => "biteStarted",
            ServerMessage::BiteEnded { .. } => "biteEnded",
            ServerMessage::Warning { .. } => "warning",
            ServerMessage::Pong { .. } => "pong",
        }
    }
}

/// Text frame layout: `{"event": "<name>", "data": {...}}`
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Encode a message using bincode (binary frames)
/// Uses legacy config for fixed-size integers
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

/// Encode a message as a JSON envelope (text frames)
pub fn encode_json<T: Serialize>(message: &T) -> Result<String, EncodeError> {
    let value = serde_json::to_value(message).map_err(|e| EncodeError(e.to_string()))?;

    // Externally tagged struct variants come out as a single-key object
    let mut fields = match value {
        Value::Object(map) => map.into_iter(),
        other => return Err(EncodeError(format!("not an event message: {}", other))),
    };
    let (event, data) = match (fields.next(), fields.next()) {
        (Some(pair), None) => pair,
        _ => return Err(EncodeError("not an event message".to_string())),
    };

    serde_json::to_string(&Envelope { event, data }).map_err(|e| EncodeError(e.to_string()))
}

/// Decode a JSON envelope. A missing or null `data` means no fields.
pub fn decode_json<T: DeserializeOwned>(text: &str) -> Result<T, DecodeError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(|e| DecodeError(e.to_string()))?;

    let data = match envelope.data {
        Value::Null => Value::Object(Map::new()),
        data => data,
    };
    let mut tagged = Map::with_capacity(1);
    tagged.insert(envelope.event, data);

    serde_json::from_value(Value::Object(tagged)).map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::species::SpeciesTable;
    use uuid::Uuid;

    fn sample_fish() -> CaughtFish {
        let table = SpeciesTable::builtin();
        CaughtFish::with_measurements(table.get("uncommon_1").unwrap(), 25, 1.0, 1_700_000_000_000)
    }

    #[test]
    fn test_decode_start_fishing_json() {
        let text = r#"{"event":"startFishing","data":{"position":{"x":1.0,"y":0.0,"z":-2.0}}}"#;
        let msg: ClientMessage = decode_json(text).unwrap();
        assert_eq!(
            msg,
            ClientMessage::StartFishing {
                position: Vec3::new(1.0, 0.0, -2.0),
                direction: None,
            }
        );
    }

    #[test]
    fn test_decode_start_fishing_with_direction() {
        let text = r#"{"event":"startFishing","data":{"position":{"x":0,"y":0,"z":0},"direction":{"x":0,"y":0,"z":1}}}"#;
        match decode_json::<ClientMessage>(text).unwrap() {
            ClientMessage::StartFishing { direction, .. } => {
                assert_eq!(direction, Some(Vec3::new(0.0, 0.0, 1.0)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_stop_fishing_without_data() {
        let with_data: ClientMessage = decode_json(r#"{"event":"stopFishing","data":{}}"#).unwrap();
        let without: ClientMessage = decode_json(r#"{"event":"stopFishing"}"#).unwrap();
        assert_eq!(with_data, ClientMessage::StopFishing {});
        assert_eq!(without, ClientMessage::StopFishing {});
    }

    #[test]
    fn test_decode_player_update_json() {
        let text = r#"{"event":"playerUpdate","data":{"position":{"x":2,"y":0,"z":3},"action":"fishing","rotation":1.5}}"#;
        let msg: ClientMessage = decode_json(text).unwrap();
        assert_eq!(
            msg,
            ClientMessage::PlayerUpdate {
                position: Vec3::new(2.0, 0.0, 3.0),
                action: PlayerAction::Fishing,
                rotation: 1.5,
            }
        );
    }

    #[test]
    fn test_decode_legacy_fish_caught() {
        let text = r#"{"event":"fishCaught","data":{"fish":{"id":"common_1","name":"Lambari","rarity":"common","points":10,"sizeCm":10,"weightKg":0.2,"caughtAtMs":0}}}"#;
        match decode_json::<ClientMessage>(text).unwrap() {
            ClientMessage::FishCaught { fish } => {
                assert_eq!(fish.id, "common_1");
                assert_eq!(fish.points, 10);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(decode_json::<ClientMessage>(r#"{"event":"teleport","data":{}}"#).is_err());
        assert!(decode_json::<ClientMessage>("not json").is_err());
        assert!(decode_json::<ClientMessage>(r#"{"data":{}}"#).is_err());
    }

    #[test]
    fn test_encode_fish_caught_envelope() {
        let player_id = Uuid::new_v4();
        let msg = ServerMessage::FishCaught {
            player_id,
            fish: sample_fish(),
            score: 30,
        };
        let text = encode_json(&msg).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["event"], "fishCaught");
        assert_eq!(value["data"]["playerId"], player_id.to_string());
        assert_eq!(value["data"]["score"], 30);
        assert_eq!(value["data"]["fish"]["id"], "uncommon_1");
        assert_eq!(value["event"], msg.event_name());
    }

    #[test]
    fn test_encode_bite_messages() {
        let started = ServerMessage::BiteStarted {
            species_id: "rare_1".to_string(),
            window_ms: 3000,
            bobber: Vec3::new(0.0, 0.0, 5.0),
        };
        let value: Value = serde_json::from_str(&encode_json(&started).unwrap()).unwrap();
        assert_eq!(value["event"], "biteStarted");
        assert_eq!(value["data"]["speciesId"], "rare_1");
        assert_eq!(value["data"]["windowMs"], 3000);

        let ended = ServerMessage::BiteEnded {
            reason: BiteEndReason::Escaped,
        };
        let value: Value = serde_json::from_str(&encode_json(&ended).unwrap()).unwrap();
        assert_eq!(value["event"], "biteEnded");
        assert_eq!(value["data"]["reason"], "escaped");
    }

    #[test]
    fn test_encode_pong_field_names() {
        let msg = ServerMessage::Pong {
            client_timestamp: 12345,
            server_timestamp: 67890,
        };
        let value: Value = serde_json::from_str(&encode_json(&msg).unwrap()).unwrap();
        assert_eq!(value["data"]["clientTimestamp"], 12345);
        assert_eq!(value["data"]["serverTimestamp"], 67890);
    }

    #[test]
    fn test_binary_frames_carry_same_messages() {
        let msg = ClientMessage::StartFishing {
            position: Vec3::new(1.0, 0.0, 1.0),
            direction: Some(Vec3::new(1.0, 0.0, 0.0)),
        };
        let bytes = encode(&msg).unwrap();
        let decoded: ClientMessage = decode(&bytes).unwrap();
        assert_eq!(decoded, msg);

        let msg = ServerMessage::FishCaught {
            player_id: Uuid::new_v4(),
            fish: sample_fish(),
            score: 30,
        };
        let decoded: ServerMessage = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_invalid_decode() {
        let garbage = vec![0xFF, 0xFE, 0xFD];
        let result: Result<ClientMessage, _> = decode(&garbage);
        assert!(result.is_err());
    }
}
