//! The engine: the registry of command trees and the single entry point
//! for inbound events.
//!
//! Hosts assemble an engine once, feed it decoded interactions, and get
//! back either a clean completion or the error that stopped the
//! pipeline. Error handlers fire exactly once per failed invocation,
//! most specific first (command, then its set, then the engine), and
//! the error is still returned so the host can respond to the event.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use appcmd_types::{CommandKind, CommandPayload, Id, Interaction, InteractionKind};
use tracing::{debug, error};

use crate::checks::{Check, Hook};
use crate::context::{EmptyCache, EntityCache, InvocationContext, Responder};
use crate::diff;
use crate::error::{CommandError, ConfigError, DesyncError};
use crate::node::{CommandNode, CommandSet, ErrorCallback, NodeBuilder, Signature};
use crate::router;

/// Engine-wide behavior shared with every invocation context: global
/// checks, global hooks, the fallback error handler, and the owner set
/// consulted by the owner check.
#[derive(Clone, Default)]
pub struct EngineHooks {
    pub owner_ids: HashSet<Id>,
    pub(crate) checks: Vec<Check>,
    pub(crate) before: Vec<Hook>,
    pub(crate) after: Vec<Hook>,
    pub(crate) error_handler: Option<ErrorCallback>,
}

type Clock = Arc<dyn Fn() -> f64 + Send + Sync>;

fn system_clock() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// The assembled dispatcher. Immutable during dispatch; registration
/// bookkeeping and rollout changes go through `&mut self` accessors
/// between dispatch batches.
pub struct Engine {
    hooks: Arc<EngineHooks>,
    commands: Vec<CommandNode>,
    cache: Arc<dyn EntityCache>,
    clock: Clock,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("commands", &self.commands.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn commands(&self) -> &[CommandNode] {
        &self.commands
    }

    pub fn commands_mut(&mut self) -> &mut [CommandNode] {
        &mut self.commands
    }

    /// Look up a root command for registration bookkeeping.
    pub fn command_mut(&mut self, name: &str, kind: CommandKind) -> Option<&mut CommandNode> {
        self.commands
            .iter_mut()
            .find(|c| c.name == name && c.kind.command_kind() == kind)
    }

    /// Every payload the engine wants registered, one per scope.
    pub fn payloads(&self) -> Vec<CommandPayload> {
        self.commands
            .iter()
            .flat_map(|command| {
                command
                    .scope
                    .scopes()
                    .into_iter()
                    .map(|scope| command.payload(scope))
            })
            .collect()
    }

    /// Local payloads with no structurally-matching remote counterpart.
    /// These are the registrations a sync pass must (re)submit.
    pub fn stale_payloads(&self, remote: &[CommandPayload]) -> Vec<CommandPayload> {
        self.payloads()
            .into_iter()
            .filter(|local| !remote.iter().any(|r| diff::payload_matches(local, r)))
            .collect()
    }

    /// Find the root command an event addresses. A root scoped to the
    /// event's guild wins over one covering it globally.
    fn find(&self, name: &str, kind: CommandKind, guild_id: Option<Id>) -> Option<&CommandNode> {
        let mut fallback = None;
        for command in &self.commands {
            if command.name != name || command.kind.command_kind() != kind {
                continue;
            }
            if let Some(guild) = guild_id {
                if command.scope.guild_ids.contains(&guild) {
                    return Some(command);
                }
            }
            if command.scope.covers(guild_id) && fallback.is_none() {
                fallback = Some(command);
            }
        }
        fallback
    }

    /// Dispatch one decoded event.
    ///
    /// On failure the applicable error handlers have already run; the
    /// returned error is for the host's own response (an ephemeral
    /// apology, a log line, a metrics bump).
    pub async fn process(
        &self,
        interaction: Interaction,
        responder: Arc<dyn Responder>,
    ) -> Result<(), Arc<CommandError>> {
        let ctx = InvocationContext::new(
            Arc::new(interaction),
            Arc::clone(&self.hooks),
            Arc::clone(&self.cache),
            responder,
        );
        match self.dispatch(&ctx).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let err = Arc::new(err);
                self.dispatch_error(&ctx, &err).await;
                Err(err)
            }
        }
    }

    async fn dispatch(&self, ctx: &InvocationContext) -> Result<(), CommandError> {
        let data = &ctx.interaction.data;
        let root = self
            .find(&data.name, data.kind, ctx.interaction.guild_id)
            .ok_or_else(|| DesyncError::UnknownCommand {
                name: data.name.clone(),
            })?;
        let (leaf, frames) = router::route(root, &data.options)?;
        match ctx.interaction.kind {
            InteractionKind::ApplicationCommand => leaf.invoke(ctx, frames, (self.clock)()).await,
            InteractionKind::Autocomplete => leaf.invoke_autocomplete(ctx, frames).await,
        }
    }

    async fn dispatch_error(&self, ctx: &InvocationContext, err: &Arc<CommandError>) {
        let data = &ctx.interaction.data;
        error!(command = %data.name, %err, "command invocation failed");

        let leaf = self
            .find(&data.name, data.kind, ctx.interaction.guild_id)
            .and_then(|root| router::route(root, &data.options).ok())
            .map(|(leaf, _)| leaf);

        if let Some(leaf) = leaf {
            if let Some(handler) = &leaf.error_handler {
                handler(ctx.clone(), Arc::clone(err)).await;
            }
            if let Some(handler) = &leaf.container_error {
                handler(ctx.clone(), Arc::clone(err)).await;
            }
        }
        if let Some(handler) = &self.hooks.error_handler {
            handler(ctx.clone(), Arc::clone(err)).await;
        }
    }
}

/// Assembles an [`Engine`], rejecting colliding registrations up front.
#[derive(Default)]
pub struct EngineBuilder {
    hooks: EngineHooks,
    commands: Vec<CommandNode>,
    cache: Option<Arc<dyn EntityCache>>,
    clock: Option<Clock>,
}

impl EngineBuilder {
    /// Add an application owner, consulted by the owner check.
    pub fn owner(mut self, id: Id) -> Self {
        self.hooks.owner_ids.insert(id);
        self
    }

    /// A check applied to every command invocation, before any container
    /// or command checks.
    pub fn check(mut self, check: Check) -> Self {
        self.hooks.checks.push(check);
        self
    }

    pub fn before_each(mut self, hook: Hook) -> Self {
        self.hooks.before.push(hook);
        self
    }

    pub fn after_each(mut self, hook: Hook) -> Self {
        self.hooks.after.push(hook);
        self
    }

    /// The fallback error handler, run after any command- or set-level
    /// handlers.
    pub fn on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(InvocationContext, Arc<CommandError>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.hooks.error_handler = Some(Arc::new(move |ctx, err| Box::pin(f(ctx, err))));
        self
    }

    pub fn cache(mut self, cache: Arc<dyn EntityCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Override the clock feeding cooldown buckets, in seconds.
    pub fn clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn command(mut self, builder: NodeBuilder) -> Result<Self, ConfigError> {
        self.commands.push(builder.build()?);
        Ok(self)
    }

    /// Absorb a finished command set, container stamps included.
    pub fn command_set(mut self, set: CommandSet) -> Self {
        self.commands.extend(set.into_commands());
        self
    }

    pub fn build(self) -> Result<Engine, ConfigError> {
        let mut seen: HashMap<Signature, String> = HashMap::new();
        for command in &self.commands {
            for signature in command.signatures() {
                if seen.insert(signature.clone(), command.name.clone()).is_some() {
                    return Err(ConfigError::InvalidField {
                        field: "command",
                        value: command.name.clone(),
                        reason: format!(
                            "a {:?} command named {:?} is already registered in that scope",
                            signature.kind, signature.name
                        ),
                    });
                }
            }
        }
        debug!(commands = self.commands.len(), "engine assembled");
        Ok(Engine {
            hooks: Arc::new(self.hooks),
            commands: self.commands,
            cache: self.cache.unwrap_or_else(|| Arc::new(EmptyCache)),
            clock: self.clock.unwrap_or_else(|| Arc::new(system_clock)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ArgValue, Arguments, NullResponder};
    use crate::error::BoxError;
    use crate::option::{Annotation, ParamSpec};
    use appcmd_types::{InteractionData, OptionFrame, User};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop(
    ) -> impl Fn(InvocationContext, Arguments) -> futures::future::Ready<Result<(), BoxError>>
           + Send
           + Sync
           + 'static {
        |_ctx, _args| futures::future::ready(Ok(()))
    }

    fn event(name: &str, guild_id: Option<Id>, options: Vec<OptionFrame>) -> Interaction {
        Interaction {
            id: 1,
            kind: InteractionKind::ApplicationCommand,
            data: InteractionData {
                name: name.to_string(),
                kind: CommandKind::ChatInput,
                options,
                resolved: None,
                target_id: None,
            },
            guild_id,
            channel_id: Some(900),
            member: None,
            user: Some(User {
                id: 10,
                username: "tester".to_string(),
                discriminator: String::new(),
                bot: false,
            }),
        }
    }

    #[tokio::test]
    async fn unknown_command_is_a_desync() {
        let engine = Engine::builder().build().unwrap();
        let err = engine
            .process(event("ghost", None, Vec::new()), Arc::new(NullResponder))
            .await
            .unwrap_err();
        assert!(matches!(
            *err,
            CommandError::Desync(DesyncError::UnknownCommand { .. })
        ));
    }

    #[tokio::test]
    async fn guild_scoped_command_wins_over_global() {
        let hits = Arc::new(AtomicUsize::new(0));
        let guild_hits = Arc::clone(&hits);

        let engine = Engine::builder()
            .command(
                NodeBuilder::slash("ping")
                    .describe("Global ping")
                    .handler(noop()),
            )
            .unwrap()
            .command(
                NodeBuilder::slash("ping")
                    .describe("Guild ping")
                    .guilds([500])
                    .handler(move |_ctx, _args| {
                        guild_hits.fetch_add(1, Ordering::SeqCst);
                        futures::future::ready(Ok(()))
                    }),
            )
            .unwrap()
            .build()
            .unwrap();

        engine
            .process(event("ping", Some(500), Vec::new()), Arc::new(NullResponder))
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Outside the rollout the global registration answers instead.
        engine
            .process(event("ping", Some(999), Vec::new()), Arc::new(NullResponder))
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn colliding_signatures_are_rejected_at_build() {
        let err = Engine::builder()
            .command(NodeBuilder::slash("ping").describe("One").handler(noop()))
            .unwrap()
            .command(NodeBuilder::slash("ping").describe("Two").handler(noop()))
            .unwrap()
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { .. }));
    }

    #[test]
    fn distinct_scopes_do_not_collide() {
        assert!(Engine::builder()
            .command(
                NodeBuilder::slash("ping")
                    .describe("Guild A")
                    .guilds([500])
                    .handler(noop()),
            )
            .unwrap()
            .command(
                NodeBuilder::slash("ping")
                    .describe("Guild B")
                    .guilds([501])
                    .handler(noop()),
            )
            .unwrap()
            .build()
            .is_ok());
    }

    #[tokio::test]
    async fn arguments_reach_the_callback() {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let sink = Arc::clone(&seen);

        let engine = Engine::builder()
            .command(
                NodeBuilder::slash("echo")
                    .describe("Echo")
                    .param(ParamSpec::new("text", Annotation::string()))
                    .param(
                        ParamSpec::new("limit", Annotation::integer())
                            .default_value(ArgValue::Integer(10)),
                    )
                    .handler(move |_ctx, args| {
                        *sink.lock().unwrap() = Some((
                            args.get("text").and_then(ArgValue::as_str).map(String::from),
                            args.get("limit").and_then(ArgValue::as_i64),
                        ));
                        futures::future::ready(Ok(()))
                    }),
            )
            .unwrap()
            .build()
            .unwrap();

        engine
            .process(
                event(
                    "echo",
                    None,
                    vec![OptionFrame::value("text", json!("hello"))],
                ),
                Arc::new(NullResponder),
            )
            .await
            .unwrap();

        let observed = seen.lock().unwrap().take().unwrap();
        assert_eq!(observed.0.as_deref(), Some("hello"));
        assert_eq!(observed.1, Some(10), "absent option hits its default");
    }

    #[tokio::test]
    async fn error_handlers_fire_most_specific_first() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let node_order = Arc::clone(&order);
        let engine_order = Arc::clone(&order);

        let engine = Engine::builder()
            .on_error(move |_ctx, _err| {
                engine_order.lock().unwrap().push("engine");
                futures::future::ready(())
            })
            .command(
                NodeBuilder::slash("boom")
                    .describe("Always fails")
                    .on_error(move |_ctx, _err| {
                        node_order.lock().unwrap().push("command");
                        futures::future::ready(())
                    })
                    .handler(|_ctx, _args| {
                        futures::future::ready(Err::<(), BoxError>("kaboom".into()))
                    }),
            )
            .unwrap()
            .build()
            .unwrap();

        let err = engine
            .process(event("boom", None, Vec::new()), Arc::new(NullResponder))
            .await
            .unwrap_err();
        assert!(matches!(*err, CommandError::Invoke { .. }));
        assert_eq!(*order.lock().unwrap(), vec!["command", "engine"]);
    }

    #[test]
    fn stale_payloads_selects_only_mismatches() {
        let engine = Engine::builder()
            .command(NodeBuilder::slash("ping").describe("Ping").handler(noop()))
            .unwrap()
            .command(NodeBuilder::slash("pong").describe("Pong").handler(noop()))
            .unwrap()
            .build()
            .unwrap();

        let mut remote = engine.payloads();
        remote.retain(|p| p.name == "ping");

        let stale = engine.stale_payloads(&remote);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].name, "pong");
    }

    #[test]
    fn registration_bookkeeping_round_trip() {
        let mut engine = Engine::builder()
            .command(NodeBuilder::slash("ping").describe("Ping").handler(noop()))
            .unwrap()
            .build()
            .unwrap();

        let command = engine.command_mut("ping", CommandKind::ChatInput).unwrap();
        command.register_response(None, 777);
        assert_eq!(command.registered_id(None), Some(777));
        command.clear_registration();
        assert!(!command.is_registered(None));
    }
}
