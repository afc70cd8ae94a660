//! The inbound interaction event shape.
//!
//! An [`Interaction`] is what the transport layer decodes off the wire and
//! hands to the engine. Command invocations and autocomplete requests
//! share the shape; [`Interaction::kind`] tells them apart. Option values
//! arrive as raw JSON values inside a nested frame tree, with entity
//! snapshots referenced by id from the [`ResolvedData`] side-tables.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::{Attachment, Channel, Member, Message, Role, User};
use crate::payload::CommandKind;
use crate::{snowflake, Id};

/// Wire discriminant for the interaction itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum InteractionKind {
    /// A command invocation.
    ApplicationCommand,
    /// An autocomplete request for a focused option.
    Autocomplete,
}

impl TryFrom<u8> for InteractionKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(InteractionKind::ApplicationCommand),
            4 => Ok(InteractionKind::Autocomplete),
            other => Err(format!("unknown interaction kind {other}")),
        }
    }
}

impl From<InteractionKind> for u8 {
    fn from(kind: InteractionKind) -> u8 {
        match kind {
            InteractionKind::ApplicationCommand => 2,
            InteractionKind::Autocomplete => 4,
        }
    }
}

/// One frame of the event's option path.
///
/// A frame either names a subcommand (group) and nests further frames in
/// `options`, or names a leaf option and carries its raw `value`. The
/// `focused` flag marks the option an autocomplete request is about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionFrame {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<OptionFrame>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub focused: bool,
}

impl OptionFrame {
    /// A value-carrying frame.
    pub fn value(name: impl Into<String>, value: Value) -> Self {
        OptionFrame {
            name: name.into(),
            value: Some(value),
            ..Default::default()
        }
    }

    /// A path frame nesting further frames.
    pub fn path(name: impl Into<String>, options: Vec<OptionFrame>) -> Self {
        OptionFrame {
            name: name.into(),
            options,
            ..Default::default()
        }
    }

    /// A value frame flagged as focused for autocomplete.
    pub fn focused(name: impl Into<String>, value: Value) -> Self {
        OptionFrame {
            name: name.into(),
            value: Some(value),
            focused: true,
            ..Default::default()
        }
    }
}

/// Entity snapshots referenced by id from option values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedData {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub users: HashMap<String, User>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub members: HashMap<String, Member>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub roles: HashMap<String, Role>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub channels: HashMap<String, Channel>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attachments: HashMap<String, Attachment>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub messages: HashMap<String, Message>,
}

/// The command-specific body of an interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionData {
    /// Name of the invoked root command.
    pub name: String,
    /// The invoked command's kind.
    #[serde(rename = "type")]
    pub kind: CommandKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<OptionFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<ResolvedData>,
    /// Target entity id for context-menu commands.
    #[serde(
        with = "snowflake::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub target_id: Option<Id>,
}

/// A decoded inbound interaction event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    #[serde(with = "snowflake")]
    pub id: Id,
    #[serde(rename = "type")]
    pub kind: InteractionKind,
    pub data: InteractionData,
    #[serde(
        with = "snowflake::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub guild_id: Option<Id>,
    #[serde(
        with = "snowflake::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub channel_id: Option<Id>,
    /// The invoking member, present for guild invocations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<Member>,
    /// The invoking user, present for direct-message invocations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

impl Interaction {
    /// The invoking user, from whichever of `member`/`user` is present.
    pub fn invoker(&self) -> Option<&User> {
        self.member
            .as_ref()
            .and_then(|m| m.user.as_ref())
            .or(self.user.as_ref())
    }

    /// The resolved side-tables, or an empty default.
    pub fn resolved(&self) -> ResolvedData {
        self.data.resolved.clone().unwrap_or_default()
    }

    /// Whether this event originated inside a guild scope.
    pub fn is_guild(&self) -> bool {
        self.guild_id.is_some()
    }
}
