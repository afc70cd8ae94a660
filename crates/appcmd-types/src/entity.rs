//! Entity shells referenced by inbound events.
//!
//! These carry the snapshot fields the remote service includes in an
//! event's "resolved" side-tables. They are deliberately shallow: the
//! engine hands them to command callbacks as typed arguments and never
//! fetches anything on its own. A richer live-object layer, if the host
//! has one, hangs off the ids.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{snowflake, Id};

/// A permission bitfield, as the remote service defines it.
///
/// Only the operations the check pipeline needs are modeled: containment
/// and union. The named constants cover the permissions the built-in
/// checks reference; hosts can construct arbitrary bitfields with
/// [`Permissions::from_bits`]. The wire encodes bitfields as decimal
/// strings, so serde goes through the snowflake helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Permissions(#[serde(with = "snowflake")] pub u64);

impl Permissions {
    pub const NONE: Permissions = Permissions(0);
    pub const KICK_MEMBERS: Permissions = Permissions(1 << 1);
    pub const BAN_MEMBERS: Permissions = Permissions(1 << 2);
    pub const ADMINISTRATOR: Permissions = Permissions(1 << 3);
    pub const MANAGE_CHANNELS: Permissions = Permissions(1 << 4);
    pub const MANAGE_GUILD: Permissions = Permissions(1 << 5);
    pub const SEND_MESSAGES: Permissions = Permissions(1 << 11);
    pub const MANAGE_MESSAGES: Permissions = Permissions(1 << 13);
    pub const MANAGE_ROLES: Permissions = Permissions(1 << 28);
    pub const MODERATE_MEMBERS: Permissions = Permissions(1 << 40);

    pub const fn from_bits(bits: u64) -> Self {
        Permissions(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Whether every bit in `other` is present in `self`. Administrator
    /// implies everything.
    pub const fn contains(self, other: Permissions) -> bool {
        self.0 & Self::ADMINISTRATOR.0 != 0 || self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Permissions) -> Permissions {
        Permissions(self.0 | other.0)
    }

    /// The bits present in `other` but missing from `self`.
    pub const fn missing(self, other: Permissions) -> Permissions {
        if self.contains(other) {
            Permissions::NONE
        } else {
            Permissions(other.0 & !self.0)
        }
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(with = "snowflake")]
    pub id: Id,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub discriminator: String,
    #[serde(default)]
    pub bot: bool,
}

/// A guild member snapshot: a user plus guild-specific state.
///
/// The resolved members table omits the inner `user` object when the
/// paired users table already carries it; the resolver stitches the two
/// together before handing a member to a callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub nick: Option<String>,
    /// Role ids held by this member.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Computed permissions in the invoking channel, when the event
    /// carries them.
    #[serde(default)]
    pub permissions: Option<Permissions>,
}

impl Member {
    /// Build a member shell around a user snapshot, for events whose
    /// resolved members table lacks an entry.
    pub fn from_user(user: User) -> Self {
        Member {
            user: Some(user),
            nick: None,
            roles: Vec::new(),
            permissions: None,
        }
    }

    /// The member's id, when the user snapshot is present.
    pub fn id(&self) -> Option<Id> {
        self.user.as_ref().map(|u| u.id)
    }
}

/// A role snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    #[serde(with = "snowflake")]
    pub id: Id,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub permissions: Permissions,
}

/// A channel snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    #[serde(with = "snowflake")]
    pub id: Id,
    #[serde(default)]
    pub name: String,
    /// Wire channel-type discriminant (text, voice, thread, ...).
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub nsfw: bool,
}

/// An uploaded attachment snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(with = "snowflake")]
    pub id: Id,
    pub filename: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// A message snapshot, the target of message context-menu commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(with = "snowflake")]
    pub id: Id,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub author: Option<User>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Either a user or a role, for options declared as mentionable.
#[derive(Debug, Clone, PartialEq)]
pub enum Mentionable {
    User(User),
    Role(Role),
}

impl Mentionable {
    pub fn id(&self) -> Id {
        match self {
            Mentionable::User(u) => u.id,
            Mentionable::Role(r) => r.id,
        }
    }
}
