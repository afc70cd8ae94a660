//! Error taxonomy for the command engine.
//!
//! Failures fall into two disjoint worlds:
//!
//! - [`ConfigError`] is definition-time only. It is returned while a host
//!   builds its command tree and is fatal to setup; it is never produced
//!   during dispatch.
//! - [`CommandError`] covers everything that can go wrong while handling
//!   an inbound event: check failures, gating denials, local/remote
//!   definition desyncs, focus-count errors in autocomplete requests, and
//!   failures raised by the bound callback itself. Every dispatch failure
//!   is delivered once to each applicable error handler, most specific
//!   first: the command's own, its set's, then the engine-wide handler.

use appcmd_types::{Id, OptionType, Permissions};
use std::fmt;
use thiserror::Error;

/// Boxed error type carried out of callbacks and converters.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Definition-time configuration error. Fatal to setup, never dispatched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate option name {name:?} on command {command:?}")]
    DuplicateOption { command: String, name: String },

    #[error("duplicate child command name {name:?} under {parent:?}")]
    DuplicateChild { parent: String, name: String },

    #[error("option {name:?} declares both a choice set and autocomplete")]
    ChoicesWithAutocomplete { name: String },

    #[error("option {name:?} declares numeric bounds but has type {kind:?}")]
    BoundsOnNonNumeric { name: String, kind: OptionType },

    #[error("option {name:?} declares a channel-type filter but has type {kind:?}")]
    ChannelFilterOnNonChannel { name: String, kind: OptionType },

    #[error("parameter {name:?} has unmapped type {annotation:?} and no converter")]
    UnmappedAnnotation { name: String, annotation: String },

    #[error("subcommand group {name:?} cannot contain another subcommand group")]
    NestedGroup { name: String },

    #[error("command {name:?} mixes child commands and value options")]
    MixedContent { name: String },

    #[error("command {name:?} has no bound callback")]
    UnboundCallback { name: String },

    #[error("autocomplete registered for unknown parameter {parameter:?} on {command:?}")]
    UnknownAutocompleteParameter { command: String, parameter: String },

    #[error("{field} {value:?} is invalid: {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },
}

/// Which tier of the check pipeline rejected an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckTier {
    Engine,
    Container,
    Node,
}

impl fmt::Display for CheckTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckTier::Engine => f.write_str("engine"),
            CheckTier::Container => f.write_str("container"),
            CheckTier::Node => f.write_str("node"),
        }
    }
}

/// A check predicate or invocation gate denied the invocation.
///
/// Raised during `can_run` or gate acquisition; the callback never runs
/// and no hooks fire for the attempt.
#[derive(Debug, Error)]
pub enum CheckFailure {
    /// A predicate returned `false` without raising a more specific failure.
    #[error("the {tier} check functions for command {command:?} failed")]
    Predicate { tier: CheckTier, command: String },

    #[error("command {command:?} can only be used inside a guild")]
    GuildOnly { command: String },

    #[error("command {command:?} can only be used in direct messages")]
    DmOnly { command: String },

    #[error("invoker does not own this application")]
    NotOwner,

    #[error("command requires an age-restricted channel")]
    NsfwRequired,

    #[error("invoker is missing role {role}")]
    MissingRole { role: Id },

    #[error("invoker holds none of the required roles {roles:?}")]
    MissingAnyRole { roles: Vec<Id> },

    #[error("invoker is missing permissions {missing}")]
    MissingPermissions { missing: Permissions },

    #[error("application is missing permissions {missing}")]
    BotMissingPermissions { missing: Permissions },

    /// The cooldown bucket is exhausted; retry after the given seconds.
    #[error("command is on cooldown, retry after {retry_after:.2}s")]
    OnCooldown { retry_after: f64 },

    /// The concurrency bucket is at capacity.
    #[error("maximum of {limit} concurrent invocations reached")]
    MaxConcurrencyReached { limit: u32 },
}

/// The router could not reconcile an inbound event with the local tree.
///
/// Signals a stale or out-of-sync remote registration. Surfaced
/// immediately, never retried.
#[derive(Debug, Error)]
pub enum DesyncError {
    #[error("no local command matches inbound name {name:?}")]
    UnknownCommand { name: String },

    #[error("no subcommand {name:?} under {parent:?}")]
    UnknownSubcommand { parent: String, name: String },

    #[error("event carries option {name:?} not declared on {command:?}")]
    UnknownOption { command: String, name: String },

    #[error("resolved {kind} {id:?} missing from the event's side-tables")]
    MissingResolved { kind: &'static str, id: String },

    #[error("malformed value for option {name:?}: {reason}")]
    MalformedValue { name: String, reason: String },

    #[error("context-menu command {command:?} arrived without a target id")]
    MissingTarget { command: String },

    #[error("autocomplete requested for option {name:?} which has no autocomplete callback")]
    AutocompleteNotBound { name: String },
}

/// A structured dispatch failure. Exactly one of these is produced per
/// failed invocation attempt.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Check(#[from] CheckFailure),

    #[error(transparent)]
    Desync(#[from] DesyncError),

    /// An autocomplete request carried no focused option frame.
    #[error("autocomplete request for {command:?} has no focused option")]
    MissingFocus { command: String },

    /// An autocomplete request carried more than one focused option frame.
    #[error("autocomplete request for {command:?} focuses both {first:?} and {second:?}")]
    AmbiguousFocus {
        command: String,
        first: String,
        second: String,
    },

    /// The bound callback (or a converter inside argument resolution)
    /// raised; the original failure is preserved as the source.
    #[error("command {command:?} raised: {source}")]
    Invoke {
        command: String,
        #[source]
        source: BoxError,
    },
}

impl CommandError {
    /// Whether this failure came from the check/gate stage, meaning the
    /// callback never ran and no hooks fired.
    pub fn is_check_failure(&self) -> bool {
        matches!(self, CommandError::Check(_))
    }
}
