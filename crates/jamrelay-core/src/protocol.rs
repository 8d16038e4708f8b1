//! Relay wire protocol: one JSON document per `\n`-terminated line.
//!
//! ```json
//! {"action":"channel_switch","node_id":1,"channel":40}
//! {"action":"new_estimation","channel_quality":[0.2,0.9],"channels":[36,40]}
//! {"action":"broadcast","channel":44}
//! ```
//!
//! Only the `action` envelope is interpreted for broadcasts; the rest of the
//! document is relayed to peers untouched.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::types::ChannelQuality;

/// Longest line the relay will buffer before giving up on a peer.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

pub const ACTION_CHANNEL_SWITCH: &str = "channel_switch";
pub const ACTION_NEW_ESTIMATION: &str = "new_estimation";
pub const ACTION_BROADCAST: &str = "broadcast";

/// A node reporting the channel it just moved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSwitch {
    pub node_id: i64,
    pub channel: i64,
}

/// A fresh quality estimate for a set of channels.
///
/// `channel_quality[i]` belongs to `channels[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEstimation {
    pub channel_quality: Vec<f64>,
    pub channels: Vec<i64>,
}

impl NewEstimation {
    /// Pair channels with their qualities by position. Extra entries on the
    /// longer side are dropped.
    pub fn pairs(&self) -> Vec<ChannelQuality> {
        self.channels
            .iter()
            .zip(&self.channel_quality)
            .map(|(&channel, &quality)| ChannelQuality { channel, quality })
            .collect()
    }

    pub fn is_mismatched(&self) -> bool {
        self.channels.len() != self.channel_quality.len()
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ChannelSwitch(ChannelSwitch),
    NewEstimation(NewEstimation),
    /// The original frame text, relayed verbatim.
    Broadcast(String),
    /// An action the relay does not know; consumed without effect.
    Unknown(String),
}

impl Message {
    /// The `action` this message was decoded from.
    pub fn kind(&self) -> &str {
        match self {
            Message::ChannelSwitch(_) => ACTION_CHANNEL_SWITCH,
            Message::NewEstimation(_) => ACTION_NEW_ESTIMATION,
            Message::Broadcast(_) => ACTION_BROADCAST,
            Message::Unknown(action) => action,
        }
    }

    /// Serialize into a single-line frame (without the trailing `\n`).
    pub fn to_frame(&self) -> Result<String, ProtocolError> {
        let value = match self {
            Message::ChannelSwitch(m) => tagged(ACTION_CHANNEL_SWITCH, m)?,
            Message::NewEstimation(m) => tagged(ACTION_NEW_ESTIMATION, m)?,
            Message::Broadcast(raw) => return Ok(raw.clone()),
            Message::Unknown(action) => serde_json::json!({ "action": action }),
        };
        Ok(serde_json::to_string(&value)?)
    }
}

/// Decode one frame. Surrounding whitespace is ignored.
pub fn decode(frame: &str) -> Result<Message, ProtocolError> {
    let frame = frame.trim();
    let value: Value = serde_json::from_str(frame)?;
    let map = match value {
        Value::Object(map) => map,
        other => return Err(ProtocolError::NotAnObject(json_type_name(&other))),
    };

    let action = match map.get("action") {
        Some(Value::String(action)) => action.clone(),
        _ => return Err(ProtocolError::MissingAction),
    };

    match action.as_str() {
        ACTION_CHANNEL_SWITCH => fields(ACTION_CHANNEL_SWITCH, map).map(Message::ChannelSwitch),
        ACTION_NEW_ESTIMATION => fields(ACTION_NEW_ESTIMATION, map).map(Message::NewEstimation),
        ACTION_BROADCAST => Ok(Message::Broadcast(frame.to_string())),
        _ => Ok(Message::Unknown(action)),
    }
}

/// Append the line terminator to an encoded frame.
pub fn to_wire(frame: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(frame.len() + 1);
    buf.extend_from_slice(frame.as_bytes());
    buf.push(b'\n');
    buf
}

fn fields<T: DeserializeOwned>(
    action: &'static str,
    map: Map<String, Value>,
) -> Result<T, ProtocolError> {
    serde_json::from_value(Value::Object(map)).map_err(|e| ProtocolError::InvalidFields {
        action,
        detail: e.to_string(),
    })
}

fn tagged<T: Serialize>(action: &str, body: &T) -> Result<Value, ProtocolError> {
    let mut value = serde_json::to_value(body)?;
    if let Value::Object(map) = &mut value {
        map.insert("action".into(), Value::String(action.into()));
    }
    Ok(value)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
