//! IPC Protocol definitions for listener/client communication
//!
//! Every message is one UTF-8 JSON object. A request names its `command` and
//! carries the fields that command needs, plus optional reply routing
//! (`replyTo`, `replyFile`). A response either reports success with a
//! `result`/`display`/`displays` payload or carries a single `error` string.
//!
//! Requests are decoded once, here, into [`Command`]; nothing past this module
//! looks at raw JSON fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::error::RequestError;

/// Named channel the listener watches for requests posted without a socket
pub const CONTROL_CHANNEL: &str = "com.deskpad.displaycontrol";
/// Channel used for answers when a broadcast request names no `replyTo`
pub const RESPONSE_CHANNEL: &str = "com.deskpad.displaycontrol.response";

/// Defaults applied to `create` requests
pub const DEFAULT_WIDTH: u32 = 1920;
pub const DEFAULT_HEIGHT: u32 = 1080;
pub const DEFAULT_REFRESH_RATE: f64 = 60.0;
pub const DEFAULT_NAME: &str = "DeskPad Display";

/// Protocol version reported by `ping`
pub const PROTOCOL_VERSION: &str = "1";

// Command names
pub mod commands {
    pub const CREATE: &str = "create";
    pub const REMOVE: &str = "remove";
    pub const LIST: &str = "list";
    pub const PING: &str = "ping";
}

// Field names
pub mod fields {
    pub const COMMAND: &str = "command";
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
    pub const REFRESH_RATE: &str = "refreshRate";
    pub const NAME: &str = "name";
    pub const DISPLAY_ID: &str = "displayID";
    pub const REPLY_TO: &str = "replyTo";
    pub const REPLY_FILE: &str = "replyFile";
}

/// A virtual display as seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Display {
    pub id: u32,
    pub name: String,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_refresh_rate")]
    pub refresh_rate: f64,
}

fn default_refresh_rate() -> f64 {
    DEFAULT_REFRESH_RATE
}

/// Optional fields of a `create` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A decoded command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Create(CreateParams),
    Remove { display_id: u32 },
    List,
    Ping,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Create(_) => commands::CREATE,
            Command::Remove { .. } => commands::REMOVE,
            Command::List => commands::LIST,
            Command::Ping => commands::PING,
        }
    }
}

/// Where, besides the originating connection, a response must go.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyRoute {
    /// Broadcast channel name
    pub reply_to: Option<String>,
    /// Path the response is written to atomically
    pub reply_file: Option<PathBuf>,
}

impl ReplyRoute {
    pub fn is_empty(&self) -> bool {
        self.reply_to.is_none() && self.reply_file.is_none()
    }

    /// Read routing fields leniently: a wrongly typed field is ignored so an
    /// error response can still be routed from an otherwise bad request.
    fn from_object(object: &Map<String, Value>) -> Self {
        Self {
            reply_to: object
                .get(fields::REPLY_TO)
                .and_then(Value::as_str)
                .map(str::to_string),
            reply_file: object
                .get(fields::REPLY_FILE)
                .and_then(Value::as_str)
                .map(PathBuf::from),
        }
    }
}

/// A request that could not be decoded, with whatever routing it carried.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    pub route: ReplyRoute,
    pub error: RequestError,
}

impl Rejected {
    fn new(route: ReplyRoute, error: RequestError) -> Self {
        Self { route, error }
    }
}

/// A fully decoded request envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub command: Command,
    pub route: ReplyRoute,
}

impl Request {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            route: ReplyRoute::default(),
        }
    }

    pub fn with_reply_to(mut self, channel: impl Into<String>) -> Self {
        self.route.reply_to = Some(channel.into());
        self
    }

    pub fn with_reply_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.route.reply_file = Some(path.into());
        self
    }

    /// Decode a raw message.
    pub fn decode(bytes: &[u8]) -> Result<Self, Rejected> {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| {
            Rejected::new(ReplyRoute::default(), RequestError::InvalidJson(e.to_string()))
        })?;
        Self::from_value(value)
    }

    /// Decode an already parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, Rejected> {
        let Value::Object(object) = value else {
            return Err(Rejected::new(
                ReplyRoute::default(),
                RequestError::InvalidJson("request must be a JSON object".to_string()),
            ));
        };
        let route = ReplyRoute::from_object(&object);

        let name = match object.get(fields::COMMAND) {
            None | Some(Value::Null) => {
                return Err(Rejected::new(route, RequestError::MissingCommand));
            }
            Some(Value::String(name)) => name.as_str(),
            Some(other) => {
                return Err(Rejected::new(route, RequestError::UnknownCommand(other.to_string())));
            }
        };

        let command = match name {
            commands::CREATE => decode_create(&object),
            commands::REMOVE => decode_remove(&object),
            commands::LIST => Ok(Command::List),
            commands::PING => Ok(Command::Ping),
            other => Err(RequestError::UnknownCommand(other.to_string())),
        };

        match command {
            Ok(command) => Ok(Self { command, route }),
            Err(error) => Err(Rejected::new(route, error)),
        }
    }

    /// Encode into the wire representation.
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert(fields::COMMAND.to_string(), Value::from(self.command.name()));

        match &self.command {
            Command::Create(params) => {
                if let Ok(Value::Object(extra)) = serde_json::to_value(params) {
                    object.extend(extra);
                }
            }
            Command::Remove { display_id } => {
                object.insert(fields::DISPLAY_ID.to_string(), Value::from(*display_id));
            }
            Command::List | Command::Ping => {}
        }

        if let Some(reply_to) = &self.route.reply_to {
            object.insert(fields::REPLY_TO.to_string(), Value::from(reply_to.as_str()));
        }
        if let Some(reply_file) = &self.route.reply_file {
            object.insert(
                fields::REPLY_FILE.to_string(),
                Value::from(reply_file.to_string_lossy().into_owned()),
            );
        }
        Value::Object(object)
    }
}

fn decode_create(object: &Map<String, Value>) -> Result<Command, RequestError> {
    let params: CreateParams = serde_json::from_value(Value::Object(object.clone()))
        .map_err(|e| RequestError::Malformed(format!("create: {}", e)))?;
    if let Some(rate) = params.refresh_rate {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(RequestError::Malformed(format!(
                "create: refreshRate must be positive, got {}",
                rate
            )));
        }
    }
    Ok(Command::Create(params))
}

fn decode_remove(object: &Map<String, Value>) -> Result<Command, RequestError> {
    let display_id = object
        .get(fields::DISPLAY_ID)
        .and_then(Value::as_u64)
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| RequestError::Malformed("missing or invalid displayID".to_string()))?;
    Ok(Command::Remove { display_id })
}

/// Metadata returned by `ping`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingInfo {
    pub version: String,
    pub pid: u32,
    pub uid: u32,
    pub hostname: String,
    pub uptime_secs: u64,
}

/// Response envelope. Constructors guarantee that success payloads and
/// `error` never appear together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<Display>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub displays: Option<Vec<Display>>,
    #[serde(rename = "displayID", skip_serializing_if = "Option::is_none")]
    pub display_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn created(display: Display) -> Self {
        Self {
            result: Some(Value::from("created")),
            display: Some(display),
            ..Self::default()
        }
    }

    pub fn removed(display_id: u32) -> Self {
        Self {
            result: Some(Value::from("removed")),
            display_id: Some(display_id),
            ..Self::default()
        }
    }

    pub fn listing(displays: Vec<Display>) -> Self {
        Self {
            displays: Some(displays),
            ..Self::default()
        }
    }

    pub fn pong(info: &PingInfo) -> Self {
        Self {
            result: serde_json::to_value(info).ok(),
            ..Self::default()
        }
    }

    pub fn error(error: &RequestError) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Turn an `error` envelope into `Err`.
    pub fn into_result(self) -> Result<Self, String> {
        match self.error {
            Some(message) => Err(message),
            None => Ok(self),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // Response holds only strings, numbers and nested plain structs.
        serde_json::to_vec(self)
            .unwrap_or_else(|_| br#"{"error":"internal serialization error"}"#.to_vec())
    }
}
