//! Wire types of the stdio protocol
//!
//! Messages are JSON objects with PascalCase field names. Byte fields are
//! standard base64 strings; `null` and absent byte fields decode as empty.
//! Response fields are omitted when they hold their zero value.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Command {
    Get,
    Put,
    Close,
    /// Anything else, kept verbatim for the error response
    Unknown(String),
}

impl Default for Command {
    fn default() -> Self {
        Command::Unknown(String::new())
    }
}

impl Command {
    /// Commands advertised in the handshake
    pub fn known() -> Vec<Command> {
        vec![Command::Get, Command::Put, Command::Close]
    }

    pub fn as_str(&self) -> &str {
        match self {
            Command::Get => "get",
            Command::Put => "put",
            Command::Close => "close",
            Command::Unknown(name) => name,
        }
    }
}

impl From<String> for Command {
    fn from(name: String) -> Self {
        match name.as_str() {
            "get" => Command::Get,
            "put" => Command::Put,
            "close" => Command::Close,
            _ => Command::Unknown(name),
        }
    }
}

impl From<Command> for String {
    fn from(command: Command) -> Self {
        command.as_str().to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request from the toolchain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "ID", alias = "id", default)]
    pub id: i64,

    #[serde(rename = "Command", alias = "command", default)]
    pub command: Command,

    #[serde(
        rename = "ActionID",
        alias = "actionID",
        default,
        with = "base64_bytes"
    )]
    pub action_id: Vec<u8>,

    #[serde(
        rename = "ObjectID",
        alias = "OutputID",
        alias = "objectID",
        default,
        with = "base64_bytes"
    )]
    pub object_id: Vec<u8>,

    #[serde(rename = "BodySize", alias = "bodySize", default)]
    pub body_size: i64,

    /// Put payload, read from the frame following the request
    #[serde(skip)]
    pub body: Option<Vec<u8>>,
}

/// Response to the toolchain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "ID", default, skip_serializing_if = "is_zero")]
    pub id: i64,

    #[serde(rename = "Err", default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,

    #[serde(
        rename = "KnownCommands",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub known_commands: Vec<Command>,

    #[serde(rename = "Miss", default, skip_serializing_if = "is_false")]
    pub miss: bool,

    #[serde(
        rename = "OutputID",
        default,
        skip_serializing_if = "Vec::is_empty",
        with = "base64_bytes"
    )]
    pub output_id: Vec<u8>,

    #[serde(rename = "Size", default, skip_serializing_if = "is_zero")]
    pub size: i64,

    #[serde(rename = "TimeNanos", default, skip_serializing_if = "is_zero")]
    pub time_nanos: i64,

    #[serde(rename = "DiskPath", default, skip_serializing_if = "String::is_empty")]
    pub disk_path: String,
}

impl Response {
    /// Capability announcement sent before any request is read
    pub fn handshake() -> Self {
        Self {
            known_commands: Command::known(),
            ..Default::default()
        }
    }

    /// Empty response for a request
    pub fn for_request(id: i64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Serde adapter for base64-encoded byte strings
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD.decode(encoded).map_err(de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_lists_commands() {
        let json = serde_json::to_string(&Response::handshake()).unwrap();
        assert_eq!(json, r#"{"KnownCommands":["get","put","close"]}"#);
    }

    #[test]
    fn decodes_put_request() {
        let req: Request = serde_json::from_str(
            r#"{"ID":7,"Command":"put","ActionID":"qg==","ObjectID":"uw==","BodySize":3}"#,
        )
        .unwrap();

        assert_eq!(req.id, 7);
        assert_eq!(req.command, Command::Put);
        assert_eq!(req.action_id, vec![0xAA]);
        assert_eq!(req.object_id, vec![0xBB]);
        assert_eq!(req.body_size, 3);
        assert!(req.body.is_none());
    }

    #[test]
    fn accepts_output_id_alias_and_nulls() {
        let req: Request =
            serde_json::from_str(r#"{"ID":1,"Command":"get","ActionID":"qg==","OutputID":null}"#)
                .unwrap();
        assert_eq!(req.action_id, vec![0xAA]);
        assert!(req.object_id.is_empty());
        assert_eq!(req.body_size, 0);
    }

    #[test]
    fn keeps_unknown_command_name() {
        let req: Request = serde_json::from_str(r#"{"ID":2,"Command":"stat"}"#).unwrap();
        assert_eq!(req.command, Command::Unknown("stat".to_string()));
        assert_eq!(req.command.to_string(), "stat");
    }

    #[test]
    fn rejects_bad_base64() {
        let parsed = serde_json::from_str::<Request>(r#"{"ID":1,"Command":"get","ActionID":"!!"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn hit_response_encoding() {
        let res = Response {
            id: 2,
            output_id: vec![0xBB],
            size: 3,
            time_nanos: 5,
            disk_path: "/cache/o-bb".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&res).unwrap();
        assert_eq!(
            json,
            r#"{"ID":2,"OutputID":"uw==","Size":3,"TimeNanos":5,"DiskPath":"/cache/o-bb"}"#
        );
    }

    #[test]
    fn miss_response_encoding() {
        let res = Response {
            miss: true,
            ..Response::for_request(4)
        };
        assert_eq!(
            serde_json::to_string(&res).unwrap(),
            r#"{"ID":4,"Miss":true}"#
        );
    }
}
