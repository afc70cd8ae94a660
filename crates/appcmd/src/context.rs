//! Invocation context, resolved argument values, and collaborator seams.
//!
//! An [`InvocationContext`] is what checks, hooks, converters, and command
//! callbacks receive. It is a cheap-clone bundle of the inbound event and
//! the engine's collaborator handles; cloning it never copies event data.
//!
//! The two traits at the bottom are the engine's external collaborators:
//! [`EntityCache`] resolves ids the event does not carry snapshots for,
//! and [`Responder`] transmits outbound responses at most once per event.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use appcmd_types::{
    Attachment, Channel, ChoicePayload, Id, Interaction, Member, Mentionable, Message,
    Permissions, ResolvedData, Role, User,
};
use async_trait::async_trait;

use crate::engine::EngineHooks;
use crate::error::BoxError;

/// A fully-resolved argument value handed to a command callback.
#[derive(Clone)]
pub enum ArgValue {
    /// The option was absent and had no non-null default.
    Null,
    String(String),
    Integer(i64),
    Boolean(bool),
    Number(f64),
    /// A user option whose invoker-scope member snapshot was available.
    Member(Member),
    /// A user option with only a bare user snapshot.
    User(User),
    Role(Role),
    Channel(Channel),
    Attachment(Attachment),
    Mentionable(Mentionable),
    Message(Message),
    /// Output of a custom converter.
    Custom(Arc<dyn Any + Send + Sync>),
}

impl ArgValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ArgValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// The user snapshot, from either the member or bare-user variant.
    pub fn as_user(&self) -> Option<&User> {
        match self {
            ArgValue::User(u) => Some(u),
            ArgValue::Member(m) => m.user.as_ref(),
            ArgValue::Mentionable(Mentionable::User(u)) => Some(u),
            _ => None,
        }
    }

    pub fn as_member(&self) -> Option<&Member> {
        match self {
            ArgValue::Member(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_role(&self) -> Option<&Role> {
        match self {
            ArgValue::Role(r) => Some(r),
            ArgValue::Mentionable(Mentionable::Role(r)) => Some(r),
            _ => None,
        }
    }

    pub fn as_channel(&self) -> Option<&Channel> {
        match self {
            ArgValue::Channel(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_attachment(&self) -> Option<&Attachment> {
        match self {
            ArgValue::Attachment(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_mentionable(&self) -> Option<&Mentionable> {
        match self {
            ArgValue::Mentionable(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            ArgValue::Message(m) => Some(m),
            _ => None,
        }
    }

    /// Downcast the output of a custom converter.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<&T> {
        match self {
            ArgValue::Custom(v) => v.downcast_ref(),
            _ => None,
        }
    }
}

impl fmt::Debug for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Null => f.write_str("Null"),
            ArgValue::String(v) => write!(f, "String({v:?})"),
            ArgValue::Integer(v) => write!(f, "Integer({v})"),
            ArgValue::Boolean(v) => write!(f, "Boolean({v})"),
            ArgValue::Number(v) => write!(f, "Number({v})"),
            ArgValue::Member(v) => write!(f, "Member({:?})", v.id()),
            ArgValue::User(v) => write!(f, "User({})", v.id),
            ArgValue::Role(v) => write!(f, "Role({})", v.id),
            ArgValue::Channel(v) => write!(f, "Channel({})", v.id),
            ArgValue::Attachment(v) => write!(f, "Attachment({})", v.id),
            ArgValue::Mentionable(v) => write!(f, "Mentionable({})", v.id()),
            ArgValue::Message(v) => write!(f, "Message({})", v.id),
            ArgValue::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// The fully-keyed argument map handed to a bound callback.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    values: HashMap<String, ArgValue>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ArgValue) {
        self.values.insert(name.into(), value);
    }

    /// The value for an argument, by callback parameter name.
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// The id → entity lookups the resolver needs when an event's resolved
/// side-tables do not carry a snapshot. The host's object cache
/// implements this.
pub trait EntityCache: Send + Sync {
    fn channel(&self, id: Id) -> Option<Channel>;
    fn role(&self, guild_id: Id, id: Id) -> Option<Role>;

    /// Permissions the application itself holds in the given guild, if
    /// the host tracks them. Defaults to unknown.
    fn app_permissions(&self, guild_id: Id) -> Option<Permissions> {
        let _ = guild_id;
        None
    }
}

/// An entity cache with nothing in it. Resolution then relies entirely on
/// the event's resolved side-tables.
#[derive(Debug, Default)]
pub struct EmptyCache;

impl EntityCache for EmptyCache {
    fn channel(&self, _id: Id) -> Option<Channel> {
        None
    }

    fn role(&self, _guild_id: Id, _id: Id) -> Option<Role> {
        None
    }
}

/// Outbound response transmission for one event. Consumed at most once;
/// `is_done` reports whether a response has already been sent.
#[async_trait]
pub trait Responder: Send + Sync {
    fn is_done(&self) -> bool;

    /// Send autocomplete suggestions for a focused option.
    async fn send_autocomplete(&self, choices: Vec<ChoicePayload>) -> Result<(), BoxError>;

    /// Send a plain message response.
    async fn send_message(&self, content: String) -> Result<(), BoxError>;
}

/// A responder that reports nothing sent and discards everything.
/// Useful for hosts that handle responses entirely inside callbacks.
#[derive(Debug, Default)]
pub struct NullResponder;

#[async_trait]
impl Responder for NullResponder {
    fn is_done(&self) -> bool {
        false
    }

    async fn send_autocomplete(&self, _choices: Vec<ChoicePayload>) -> Result<(), BoxError> {
        Ok(())
    }

    async fn send_message(&self, _content: String) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Everything a check, hook, converter, or callback can see about the
/// invocation being dispatched.
#[derive(Clone)]
pub struct InvocationContext {
    pub interaction: Arc<Interaction>,
    pub(crate) engine: Arc<EngineHooks>,
    pub cache: Arc<dyn EntityCache>,
    pub responder: Arc<dyn Responder>,
}

impl InvocationContext {
    pub(crate) fn new(
        interaction: Arc<Interaction>,
        engine: Arc<EngineHooks>,
        cache: Arc<dyn EntityCache>,
        responder: Arc<dyn Responder>,
    ) -> Self {
        InvocationContext {
            interaction,
            engine,
            cache,
            responder,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(interaction: Interaction, hooks: EngineHooks) -> Self {
        Self::new(
            Arc::new(interaction),
            Arc::new(hooks),
            Arc::new(EmptyCache),
            Arc::new(NullResponder),
        )
    }

    #[cfg(test)]
    pub(crate) fn with_cache(mut self, cache: Arc<dyn EntityCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn guild_id(&self) -> Option<Id> {
        self.interaction.guild_id
    }

    pub fn channel_id(&self) -> Option<Id> {
        self.interaction.channel_id
    }

    /// The invoking user, from the event's member or user field.
    pub fn invoker(&self) -> Option<&User> {
        self.interaction.invoker()
    }

    pub fn member(&self) -> Option<&Member> {
        self.interaction.member.as_ref()
    }

    pub fn resolved(&self) -> ResolvedData {
        self.interaction.resolved()
    }

    /// Whether the invoker is in the engine's configured owner set.
    pub fn invoker_is_owner(&self) -> bool {
        self.invoker()
            .is_some_and(|user| self.engine.owner_ids.contains(&user.id))
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("interaction", &self.interaction.id)
            .field("guild_id", &self.interaction.guild_id)
            .finish_non_exhaustive()
    }
}
