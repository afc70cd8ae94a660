//! An application-command engine: a typed local command tree, the
//! declarative payloads it registers remotely, and a dispatch pipeline
//! for the interaction events that come back.
//!
//! The host owns all transport. This crate models commands, decides
//! what to register where ([`Engine::payloads`], [`diff`]), routes
//! decoded events to the right callback with typed arguments, and runs
//! the surrounding checks, hooks, cooldowns, and concurrency gates.
//!
//! ```no_run
//! use appcmd::{Annotation, Engine, NodeBuilder, ParamSpec};
//!
//! # fn main() -> Result<(), appcmd::ConfigError> {
//! let engine = Engine::builder()
//!     .command(
//!         NodeBuilder::slash("echo")
//!             .describe("Echo a message back")
//!             .param(ParamSpec::new("text", Annotation::string()))
//!             .handler(|ctx, args| async move {
//!                 let text = args.get("text").and_then(|v| v.as_str()).unwrap_or("");
//!                 ctx.responder.send_message(text.to_string()).await
//!             }),
//!     )?
//!     .build()?;
//! # let _ = engine;
//! # Ok(())
//! # }
//! ```

pub mod checks;
pub mod context;
pub mod cooldown;
pub mod diff;
pub mod engine;
pub mod error;
pub mod node;
pub mod option;
mod router;

pub use appcmd_types as types;

pub use checks::{Check, Hook};
pub use context::{
    ArgValue, Arguments, EmptyCache, EntityCache, InvocationContext, NullResponder, Responder,
};
pub use cooldown::{BucketKey, BucketType, Cooldown, CooldownMapping, MaxConcurrency};
pub use engine::{Engine, EngineBuilder};
pub use error::{BoxError, CheckFailure, CheckTier, CommandError, ConfigError, DesyncError};
pub use node::{CommandNode, CommandSet, NodeBuilder, NodeKind, ScopeBinding, Signature};
pub use option::{
    Annotation, AutocompleteCallback, CommandOption, Converter, ParamSpec, TriState,
};
