//! The declarative command registration payload tree.
//!
//! This is the structure the engine synthesizes from a command node and
//! the external sync layer pushes to the remote service. The same shape
//! comes back from the remote service when it reports what it has
//! registered, so every type here both serializes and deserializes.
//!
//! Field optionality follows the wire format: absent and present-but-set
//! are distinct, so optional fields skip serialization when unset.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Wire discriminant for a root command: chat input, user context menu,
/// or message context menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    ChatInput,
    User,
    Message,
}

impl CommandKind {
    pub const fn wire_value(self) -> u8 {
        match self {
            CommandKind::ChatInput => 1,
            CommandKind::User => 2,
            CommandKind::Message => 3,
        }
    }

    pub const fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(CommandKind::ChatInput),
            2 => Some(CommandKind::User),
            3 => Some(CommandKind::Message),
            _ => None,
        }
    }
}

impl Serialize for CommandKind {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u8(self.wire_value())
    }
}

impl<'de> Deserialize<'de> for CommandKind {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let raw = u8::deserialize(de)?;
        CommandKind::from_wire(raw)
            .ok_or_else(|| de::Error::custom(format!("unknown command kind {raw}")))
    }
}

/// Wire discriminant for an option: the typed value kinds plus the two
/// structural kinds used for subcommand nesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionType {
    SubCommand,
    SubCommandGroup,
    String,
    Integer,
    Boolean,
    User,
    Channel,
    Role,
    Mentionable,
    Number,
    Attachment,
}

impl OptionType {
    pub const fn wire_value(self) -> u8 {
        match self {
            OptionType::SubCommand => 1,
            OptionType::SubCommandGroup => 2,
            OptionType::String => 3,
            OptionType::Integer => 4,
            OptionType::Boolean => 5,
            OptionType::User => 6,
            OptionType::Channel => 7,
            OptionType::Role => 8,
            OptionType::Mentionable => 9,
            OptionType::Number => 10,
            OptionType::Attachment => 11,
        }
    }

    pub const fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(OptionType::SubCommand),
            2 => Some(OptionType::SubCommandGroup),
            3 => Some(OptionType::String),
            4 => Some(OptionType::Integer),
            5 => Some(OptionType::Boolean),
            6 => Some(OptionType::User),
            7 => Some(OptionType::Channel),
            8 => Some(OptionType::Role),
            9 => Some(OptionType::Mentionable),
            10 => Some(OptionType::Number),
            11 => Some(OptionType::Attachment),
            _ => None,
        }
    }

    /// Whether numeric bounds are meaningful for this type.
    pub const fn is_numeric(self) -> bool {
        matches!(self, OptionType::Integer | OptionType::Number)
    }

    /// Whether this type nests further options rather than carrying a value.
    pub const fn is_structural(self) -> bool {
        matches!(self, OptionType::SubCommand | OptionType::SubCommandGroup)
    }
}

impl Serialize for OptionType {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u8(self.wire_value())
    }
}

impl<'de> Deserialize<'de> for OptionType {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let raw = u8::deserialize(de)?;
        OptionType::from_wire(raw)
            .ok_or_else(|| de::Error::custom(format!("unknown option type {raw}")))
    }
}

/// One entry of an option's fixed choice set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoicePayload {
    pub name: String,
    pub value: Value,
}

/// One option (or nested subcommand) of a command payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionPayload {
    #[serde(rename = "type")]
    pub kind: OptionType,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<ChoicePayload>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channel_types: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub autocomplete: bool,
    /// Nested options: subcommand children for structural kinds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<OptionPayload>,
}

/// A full per-scope command registration payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandPayload {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<OptionPayload>,
    /// Scope target; absent for the global scope.
    #[serde(
        with = "crate::snowflake::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub guild_id: Option<u64>,
    /// Stringified permission bitfield gating who sees the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_member_permissions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dm_permission: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn leaf_option() -> OptionPayload {
        OptionPayload {
            kind: OptionType::String,
            name: "query".into(),
            description: "Search text".into(),
            required: true,
            choices: Vec::new(),
            channel_types: Vec::new(),
            min_value: None,
            max_value: None,
            autocomplete: false,
            options: Vec::new(),
        }
    }

    #[test]
    fn kinds_roundtrip_through_wire_values() {
        for kind in [CommandKind::ChatInput, CommandKind::User, CommandKind::Message] {
            assert_eq!(CommandKind::from_wire(kind.wire_value()), Some(kind));
        }
        assert_eq!(CommandKind::from_wire(9), None);
    }

    #[test]
    fn option_types_roundtrip_through_wire_values() {
        for raw in 1..=11 {
            let kind = OptionType::from_wire(raw).unwrap();
            assert_eq!(kind.wire_value(), raw);
        }
        assert_eq!(OptionType::from_wire(0), None);
        assert_eq!(OptionType::from_wire(12), None);
    }

    #[test]
    fn option_payload_serializes_sparse() {
        let json = serde_json::to_value(leaf_option()).unwrap();
        assert_eq!(
            json,
            json!({"type": 3, "name": "query", "description": "Search text", "required": true})
        );
    }

    #[test]
    fn command_payload_serializes_with_scope() {
        let payload = CommandPayload {
            kind: CommandKind::ChatInput,
            name: "search".into(),
            description: "Find things".into(),
            options: vec![leaf_option()],
            guild_id: Some(42),
            default_member_permissions: Some("8".into()),
            dm_permission: Some(false),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], 1);
        assert_eq!(json["guild_id"], "42");
        assert_eq!(json["default_member_permissions"], "8");
        assert_eq!(json["dm_permission"], false);
    }

    #[test]
    fn remote_payload_deserializes() {
        let payload: CommandPayload = serde_json::from_value(json!({
            "type": 1,
            "name": "search",
            "description": "Find things",
            "options": [
                {"type": 4, "name": "limit", "description": "Max results",
                 "min_value": 1, "max_value": 25}
            ]
        }))
        .unwrap();
        assert_eq!(payload.kind, CommandKind::ChatInput);
        assert_eq!(payload.options[0].kind, OptionType::Integer);
        assert_eq!(payload.options[0].min_value, Some(json!(1)));
        assert!(payload.guild_id.is_none());
    }

    #[test]
    fn unknown_discriminants_are_rejected() {
        assert!(serde_json::from_value::<CommandKind>(json!(7)).is_err());
        assert!(serde_json::from_value::<OptionType>(json!(0)).is_err());
    }
}
