//! Wire-facing data model for the appcmd engine.
//!
//! This crate holds the types that cross the JSON boundary with the remote
//! chat service: domain entity shells referenced by inbound events
//! ([`entity`]), the inbound interaction event shape ([`interaction`]), and
//! the declarative command registration payload tree ([`payload`]).
//!
//! Nothing in here performs I/O. The engine crate (`appcmd`) builds and
//! interprets these types; transport is an external collaborator.

pub mod entity;
pub mod interaction;
pub mod payload;

pub use entity::{Attachment, Channel, Member, Mentionable, Message, Permissions, Role, User};
pub use interaction::{Interaction, InteractionData, InteractionKind, OptionFrame, ResolvedData};
pub use payload::{ChoicePayload, CommandKind, CommandPayload, OptionPayload, OptionType};

/// A snowflake identifier assigned by the remote service.
pub type Id = u64;

/// Serde helpers for snowflake ids, which the wire encodes as decimal
/// strings but we store as `u64`.
pub mod snowflake {
    use serde::de::{self, Deserializer, Unexpected, Visitor};
    use serde::Serializer;
    use std::fmt;

    pub fn serialize<S: Serializer>(id: &u64, ser: S) -> Result<S::Ok, S::Error> {
        ser.collect_str(id)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<u64, D::Error> {
        struct SnowflakeVisitor;

        impl Visitor<'_> for SnowflakeVisitor {
            type Value = u64;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a snowflake id as a string or integer")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
                Ok(v)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
                v.parse()
                    .map_err(|_| E::invalid_value(Unexpected::Str(v), &self))
            }
        }

        de.deserialize_any(SnowflakeVisitor)
    }

    /// Helpers for `Option<u64>` snowflake fields.
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};

        #[derive(Deserialize)]
        struct Wrapper(#[serde(with = "super")] u64);

        pub fn serialize<S: Serializer>(id: &Option<u64>, ser: S) -> Result<S::Ok, S::Error> {
            match id {
                Some(id) => super::serialize(id, ser),
                None => ser.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<u64>, D::Error> {
            Ok(Option::<Wrapper>::deserialize(de)?.map(|w| w.0))
        }
    }
}
