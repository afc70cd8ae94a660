//! The command tree: nodes, their builders, and the invocation pipeline.
//!
//! A tree is at most three levels deep: a root command, optional
//! subcommand groups, and subcommands. Only leaves own callbacks; a
//! root with children is purely structural. All shape violations are
//! caught when a builder finishes, so a built node is always
//! dispatchable.
//!
//! Invocation runs a fixed pipeline on the routed leaf: checks, the
//! concurrency gate, the cooldown gate, argument parsing, before hooks,
//! the callback, then after hooks. After hooks run whenever the
//! callback stage was reached, even on a callback error, and the
//! concurrency slot is released on every exit path.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use appcmd_types::{
    CommandKind, CommandPayload, Id, OptionFrame, OptionPayload, OptionType, Permissions,
};
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, warn};

use crate::checks::{Check, Hook};
use crate::context::{ArgValue, Arguments, InvocationContext};
use crate::cooldown::{BucketType, CooldownMapping, MaxConcurrency};
use crate::error::{BoxError, CheckFailure, CheckTier, CommandError, ConfigError, DesyncError};
use crate::option::{
    AutocompleteCallback, CommandOption, ParamSpec, validate_description, validate_option_name,
    DEFAULT_DESCRIPTION, MAX_NAME_LEN,
};
use crate::router;

/// Structural position of a node in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A root chat-input command.
    Command,
    /// A structural grouping level; children are subcommands.
    SubcommandGroup,
    /// A leaf under a command or group.
    Subcommand,
    /// A context-menu command targeting a user.
    UserCommand,
    /// A context-menu command targeting a message.
    MessageCommand,
}

impl NodeKind {
    /// The wire kind a root of this node kind registers as.
    pub fn command_kind(self) -> CommandKind {
        match self {
            NodeKind::Command | NodeKind::SubcommandGroup | NodeKind::Subcommand => {
                CommandKind::ChatInput
            }
            NodeKind::UserCommand => CommandKind::User,
            NodeKind::MessageCommand => CommandKind::Message,
        }
    }

    fn is_root(self) -> bool {
        matches!(
            self,
            NodeKind::Command | NodeKind::UserCommand | NodeKind::MessageCommand
        )
    }

    fn is_context_menu(self) -> bool {
        matches!(self, NodeKind::UserCommand | NodeKind::MessageCommand)
    }
}

/// Where a root command is registered: a set of guilds, globally, or
/// both when `force_global` is set alongside guild ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeBinding {
    pub guild_ids: BTreeSet<Id>,
    pub force_global: bool,
}

impl ScopeBinding {
    /// Every scope this binding registers under. `None` is the global
    /// scope.
    pub fn scopes(&self) -> Vec<Option<Id>> {
        let mut scopes: Vec<Option<Id>> = Vec::new();
        if self.guild_ids.is_empty() || self.force_global {
            scopes.push(None);
        }
        scopes.extend(self.guild_ids.iter().map(|id| Some(*id)));
        scopes
    }

    /// Whether an event from the given guild scope can address this
    /// binding.
    pub fn covers(&self, guild_id: Option<Id>) -> bool {
        match guild_id {
            Some(id) => {
                self.guild_ids.contains(&id) || self.guild_ids.is_empty() || self.force_global
            }
            None => self.guild_ids.is_empty() || self.force_global,
        }
    }
}

/// Identity of one remote registration slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub name: String,
    pub kind: CommandKind,
    pub guild_id: Option<Id>,
}

pub type CommandCallback =
    Arc<dyn Fn(InvocationContext, Arguments) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

pub type ErrorCallback =
    Arc<dyn Fn(InvocationContext, Arc<CommandError>) -> BoxFuture<'static, ()> + Send + Sync>;

/// One node of the command tree.
pub struct CommandNode {
    pub kind: NodeKind,
    pub name: String,
    pub description: String,
    qualified: String,
    options: Vec<CommandOption>,
    children: Vec<CommandNode>,
    callback: Option<CommandCallback>,
    checks: Vec<Check>,
    before: Vec<Hook>,
    after: Vec<Hook>,
    pub(crate) error_handler: Option<ErrorCallback>,
    pub(crate) container_check: Option<Check>,
    pub(crate) container_before: Option<Hook>,
    pub(crate) container_after: Option<Hook>,
    pub(crate) container_error: Option<ErrorCallback>,
    cooldown: Option<CooldownMapping>,
    cooldown_after_parsing: bool,
    max_concurrency: Option<MaxConcurrency>,
    pub scope: ScopeBinding,
    pub default_member_permissions: Option<Permissions>,
    pub dm_permission: Option<bool>,
    /// Remote command ids by scope, filled in as sync responses arrive.
    registered: HashMap<Option<Id>, Id>,
}

impl CommandNode {
    /// Space-joined path from the root, stamped at build time.
    pub fn qualified_name(&self) -> &str {
        &self.qualified
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn child(&self, name: &str) -> Option<&CommandNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children(&self) -> &[CommandNode] {
        &self.children
    }

    pub fn options(&self) -> &[CommandOption] {
        &self.options
    }

    /// One signature per scope this root registers under.
    pub fn signatures(&self) -> Vec<Signature> {
        self.scope
            .scopes()
            .into_iter()
            .map(|guild_id| Signature {
                name: self.name.clone(),
                kind: self.kind.command_kind(),
                guild_id,
            })
            .collect()
    }

    /// Signatures not yet acknowledged by the remote service — the ones
    /// a sync pass still has to push.
    pub fn rollout_signatures(&self) -> Vec<Signature> {
        self.signatures()
            .into_iter()
            .filter(|s| !self.registered.contains_key(&s.guild_id))
            .collect()
    }

    /// Record the remote id assigned to this command in a scope.
    pub fn register_response(&mut self, scope: Option<Id>, remote_id: Id) {
        self.registered.insert(scope, remote_id);
    }

    pub fn registered_id(&self, scope: Option<Id>) -> Option<Id> {
        self.registered.get(&scope).copied()
    }

    pub fn is_registered(&self, scope: Option<Id>) -> bool {
        self.registered.contains_key(&scope)
    }

    /// Forget every remote id, forcing the next sync pass to re-register.
    pub fn clear_registration(&mut self) {
        self.registered.clear();
    }

    /// Add a guild to the rollout. The new scope starts unregistered.
    pub fn add_guild_rollout(&mut self, guild_id: Id) {
        self.scope.guild_ids.insert(guild_id);
    }

    pub fn remove_guild_rollout(&mut self, guild_id: Id) {
        self.scope.guild_ids.remove(&guild_id);
        self.registered.remove(&Some(guild_id));
    }

    /// Recompute this leaf's parameters and callback in place.
    ///
    /// Acknowledged registrations are kept: the remote copy is merely
    /// stale, and the next sync pass pushes the new payload under the
    /// same ids. Call [`CommandNode::clear_registration`] to force
    /// re-registration instead. On a validation error the node is left
    /// unchanged.
    pub fn rebind<F, Fut>(&mut self, params: Vec<ParamSpec>, f: F) -> Result<(), ConfigError>
    where
        F: Fn(InvocationContext, Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        if self.has_children() || (self.kind.is_context_menu() && !params.is_empty()) {
            return Err(ConfigError::MixedContent {
                name: self.name.clone(),
            });
        }
        self.options = compute_options(&self.name, &params)?;
        self.callback = Some(Arc::new(move |ctx, args| Box::pin(f(ctx, args))));
        Ok(())
    }

    /// The declarative payload for one registration scope.
    pub fn payload(&self, scope: Option<Id>) -> CommandPayload {
        let options = if self.has_children() {
            self.children.iter().map(CommandNode::option_payload).collect()
        } else {
            self.options.iter().map(CommandOption::payload).collect()
        };
        CommandPayload {
            kind: self.kind.command_kind(),
            name: self.name.clone(),
            description: if self.kind.is_context_menu() {
                String::new()
            } else {
                self.description.clone()
            },
            options,
            guild_id: scope,
            default_member_permissions: self.default_member_permissions.map(|p| p.to_string()),
            dm_permission: self.dm_permission,
        }
    }

    fn option_payload(&self) -> OptionPayload {
        let kind = match self.kind {
            NodeKind::SubcommandGroup => OptionType::SubCommandGroup,
            _ => OptionType::SubCommand,
        };
        let options = if self.has_children() {
            self.children.iter().map(CommandNode::option_payload).collect()
        } else {
            self.options.iter().map(CommandOption::payload).collect()
        };
        OptionPayload {
            kind,
            name: self.name.clone(),
            description: self.description.clone(),
            required: false,
            choices: Vec::new(),
            channel_types: Vec::new(),
            min_value: None,
            max_value: None,
            autocomplete: false,
            options,
        }
    }

    /// Run the three check tiers: engine-wide, container, then this
    /// node's own. The first failure short-circuits everything after it.
    pub(crate) async fn can_run(&self, ctx: &InvocationContext) -> Result<(), CheckFailure> {
        for check in &ctx.engine.checks {
            self.run_check(check, CheckTier::Engine, ctx).await?;
        }
        if let Some(check) = &self.container_check {
            self.run_check(check, CheckTier::Container, ctx).await?;
        }
        for check in &self.checks {
            self.run_check(check, CheckTier::Node, ctx).await?;
        }
        Ok(())
    }

    async fn run_check(
        &self,
        check: &Check,
        tier: CheckTier,
        ctx: &InvocationContext,
    ) -> Result<(), CheckFailure> {
        match check.run(ctx.clone()).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                let failure = CheckFailure::Predicate {
                    tier,
                    command: self.qualified.clone(),
                };
                warn!(command = %self.qualified, %tier, "check declined invocation");
                Err(failure)
            }
            Err(failure) => {
                warn!(command = %self.qualified, %tier, %failure, "check rejected invocation");
                Err(failure)
            }
        }
    }

    async fn apply_cooldown(&self, ctx: &InvocationContext, now: f64) -> Result<(), CheckFailure> {
        if let Some(cooldown) = &self.cooldown {
            if let Some(retry_after) = cooldown.update_rate_limit(&ctx.interaction, now).await {
                warn!(command = %self.qualified, retry_after, "cooldown exhausted");
                return Err(CheckFailure::OnCooldown { retry_after });
            }
        }
        Ok(())
    }

    /// Whether the invocation's cooldown bucket would reject a call now.
    pub async fn is_on_cooldown(&self, ctx: &InvocationContext, now: f64) -> bool {
        match &self.cooldown {
            Some(cooldown) => cooldown.is_on_cooldown(&ctx.interaction, now).await,
            None => false,
        }
    }

    pub async fn get_retry_after(&self, ctx: &InvocationContext, now: f64) -> f64 {
        match &self.cooldown {
            Some(cooldown) => cooldown.get_retry_after(&ctx.interaction, now).await,
            None => 0.0,
        }
    }

    /// Restore the invocation's cooldown bucket to full capacity.
    pub async fn reset_cooldown(&self, ctx: &InvocationContext) {
        if let Some(cooldown) = &self.cooldown {
            cooldown.reset(&ctx.interaction).await;
        }
    }

    async fn parse_arguments(
        &self,
        ctx: &InvocationContext,
        frames: &[OptionFrame],
    ) -> Result<Arguments, CommandError> {
        if self.kind.is_context_menu() {
            return self.resolve_target(ctx);
        }
        router::resolve_arguments(&self.qualified, &self.options, frames, ctx).await
    }

    /// Resolve a context-menu target into the single `target` argument.
    fn resolve_target(&self, ctx: &InvocationContext) -> Result<Arguments, CommandError> {
        let target_id = ctx
            .interaction
            .data
            .target_id
            .ok_or_else(|| DesyncError::MissingTarget {
                command: self.qualified.clone(),
            })?;
        let value = match self.kind {
            NodeKind::UserCommand => router::resolve_user(ctx, target_id).ok_or(
                DesyncError::MissingResolved {
                    kind: "user",
                    id: target_id.to_string(),
                },
            )?,
            NodeKind::MessageCommand => ctx
                .resolved()
                .messages
                .get(&target_id.to_string())
                .cloned()
                .map(ArgValue::Message)
                .ok_or(DesyncError::MissingResolved {
                    kind: "message",
                    id: target_id.to_string(),
                })?,
            _ => {
                return Err(DesyncError::MissingTarget {
                    command: self.qualified.clone(),
                }
                .into())
            }
        };
        let mut args = Arguments::new();
        args.insert("target", value);
        Ok(args)
    }

    async fn run_before_hooks(&self, ctx: &InvocationContext) -> Result<(), CommandError> {
        for hook in self
            .before
            .iter()
            .chain(self.container_before.iter())
            .chain(ctx.engine.before.iter())
        {
            hook.run(ctx.clone()).await.map_err(|source| CommandError::Invoke {
                command: self.qualified.clone(),
                source,
            })?;
        }
        Ok(())
    }

    async fn run_after_hooks(&self, ctx: &InvocationContext) -> Result<(), CommandError> {
        for hook in self
            .after
            .iter()
            .chain(self.container_after.iter())
            .chain(ctx.engine.after.iter())
        {
            hook.run(ctx.clone()).await.map_err(|source| CommandError::Invoke {
                command: self.qualified.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Run the full invocation pipeline on this leaf.
    pub(crate) async fn invoke(
        &self,
        ctx: &InvocationContext,
        frames: &[OptionFrame],
        now: f64,
    ) -> Result<(), CommandError> {
        debug!(command = %self.qualified, "dispatching invocation");
        self.can_run(ctx).await?;

        // Held until return; every later failure releases the slot.
        let _permit = match &self.max_concurrency {
            Some(limit) => Some(limit.acquire(&ctx.interaction).await?),
            None => None,
        };

        let args = if self.cooldown_after_parsing {
            let args = self.parse_arguments(ctx, frames).await?;
            self.apply_cooldown(ctx, now).await?;
            args
        } else {
            self.apply_cooldown(ctx, now).await?;
            self.parse_arguments(ctx, frames).await?
        };

        self.run_before_hooks(ctx).await?;

        let invoked = match &self.callback {
            Some(callback) => {
                callback(ctx.clone(), args)
                    .await
                    .map_err(|source| CommandError::Invoke {
                        command: self.qualified.clone(),
                        source,
                    })
            }
            None => Err(CommandError::Invoke {
                command: self.qualified.clone(),
                source: "no callback bound".into(),
            }),
        };

        // After hooks run even when the callback failed; a callback
        // error takes precedence over a hook error.
        let hooks = self.run_after_hooks(ctx).await;
        invoked.and(hooks)
    }

    /// Run an autocomplete event against this leaf's focused option.
    pub(crate) async fn invoke_autocomplete(
        &self,
        ctx: &InvocationContext,
        frames: &[OptionFrame],
    ) -> Result<(), CommandError> {
        let focused = router::focused_frame(&self.qualified, frames)?;
        let option = self
            .options
            .iter()
            .find(|o| o.name == focused.name)
            .ok_or_else(|| DesyncError::UnknownOption {
                command: self.qualified.clone(),
                name: focused.name.clone(),
            })?;
        let callback = option
            .autocomplete_callback
            .as_ref()
            .ok_or_else(|| DesyncError::AutocompleteNotBound {
                name: option.name.clone(),
            })?;

        // The focused value is partial user input, passed through
        // loosely rather than coerced to the option's declared type.
        let partial = focused
            .value
            .as_ref()
            .map(loose_value)
            .unwrap_or(ArgValue::Null);

        // Sibling frames the callback asked for are fully resolved;
        // everything else is ignored.
        let mut args = Arguments::new();
        for frame in frames.iter().filter(|f| !f.focused) {
            let Some(sibling) = self.options.iter().find(|o| o.name == frame.name) else {
                continue;
            };
            if !callback.accepts.contains(&sibling.arg_name) {
                continue;
            }
            args.insert(
                sibling.arg_name.clone(),
                sibling.resolve(frame.value.as_ref(), ctx).await?,
            );
        }
        for name in &callback.accepts {
            if args.get(name).is_none() {
                args.insert(name.clone(), ArgValue::Null);
            }
        }

        let choices = callback
            .run(ctx.clone(), partial, args)
            .await
            .map_err(|source| CommandError::Invoke {
                command: self.qualified.clone(),
                source,
            })?;

        if !choices.is_empty() && !ctx.responder.is_done() {
            ctx.responder
                .send_autocomplete(choices)
                .await
                .map_err(|source| CommandError::Invoke {
                    command: self.qualified.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

impl fmt::Debug for CommandNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandNode")
            .field("kind", &self.kind)
            .field("qualified", &self.qualified)
            .field("options", &self.options.len())
            .field("children", &self.children.len())
            .finish_non_exhaustive()
    }
}

/// Loose conversion for partial autocomplete input.
fn loose_value(value: &Value) -> ArgValue {
    match value {
        Value::String(s) => ArgValue::String(s.clone()),
        Value::Bool(b) => ArgValue::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                ArgValue::Integer(i)
            } else {
                ArgValue::Number(n.as_f64().unwrap_or(0.0))
            }
        }
        _ => ArgValue::Null,
    }
}

/// Builder for one command node and its subtree.
pub struct NodeBuilder {
    kind: NodeKind,
    name: String,
    description: Option<String>,
    params: Vec<ParamSpec>,
    autocomplete: Vec<(String, AutocompleteCallback)>,
    children: Vec<NodeBuilder>,
    callback: Option<CommandCallback>,
    checks: Vec<Check>,
    before: Vec<Hook>,
    after: Vec<Hook>,
    error_handler: Option<ErrorCallback>,
    cooldown: Option<CooldownMapping>,
    cooldown_after_parsing: bool,
    max_concurrency: Option<MaxConcurrency>,
    scope: ScopeBinding,
    default_member_permissions: Option<Permissions>,
    dm_permission: Option<bool>,
}

impl NodeBuilder {
    fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        NodeBuilder {
            kind,
            name: name.into(),
            description: None,
            params: Vec::new(),
            autocomplete: Vec::new(),
            children: Vec::new(),
            callback: None,
            checks: Vec::new(),
            before: Vec::new(),
            after: Vec::new(),
            error_handler: None,
            cooldown: None,
            cooldown_after_parsing: false,
            max_concurrency: None,
            scope: ScopeBinding::default(),
            default_member_permissions: None,
            dm_permission: None,
        }
    }

    /// A root chat-input command.
    pub fn slash(name: impl Into<String>) -> Self {
        Self::new(NodeKind::Command, name)
    }

    /// A subcommand group, nested under a root command.
    pub fn group(name: impl Into<String>) -> Self {
        Self::new(NodeKind::SubcommandGroup, name)
    }

    /// A subcommand leaf, nested under a root command or a group.
    pub fn subcommand(name: impl Into<String>) -> Self {
        Self::new(NodeKind::Subcommand, name)
    }

    /// A context-menu command shown on users.
    pub fn user_menu(name: impl Into<String>) -> Self {
        Self::new(NodeKind::UserCommand, name)
    }

    /// A context-menu command shown on messages.
    pub fn message_menu(name: impl Into<String>) -> Self {
        Self::new(NodeKind::MessageCommand, name)
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Attach an autocomplete callback to a declared parameter.
    pub fn autocomplete(
        mut self,
        param: impl Into<String>,
        callback: AutocompleteCallback,
    ) -> Self {
        self.autocomplete.push((param.into(), callback));
        self
    }

    pub fn child(mut self, child: NodeBuilder) -> Self {
        self.children.push(child);
        self
    }

    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    pub fn before(mut self, hook: Hook) -> Self {
        self.before.push(hook);
        self
    }

    pub fn after(mut self, hook: Hook) -> Self {
        self.after.push(hook);
        self
    }

    pub fn on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(InvocationContext, Arc<CommandError>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.error_handler = Some(Arc::new(move |ctx, err| Box::pin(f(ctx, err))));
        self
    }

    /// Restrict registration to the given guilds.
    pub fn guilds(mut self, ids: impl IntoIterator<Item = Id>) -> Self {
        self.scope.guild_ids.extend(ids);
        self
    }

    /// Register globally in addition to any guild rollout.
    pub fn force_global(mut self) -> Self {
        self.scope.force_global = true;
        self
    }

    /// Limit invocations to `rate` per `per` seconds in each bucket.
    pub fn cooldown(mut self, rate: u32, per: f64, bucket: BucketType) -> Self {
        self.cooldown = Some(CooldownMapping::new(rate, per, bucket));
        self
    }

    /// Consume cooldown tokens only after arguments parse successfully.
    pub fn cooldown_after_parsing(mut self) -> Self {
        self.cooldown_after_parsing = true;
        self
    }

    /// Cap simultaneous in-flight invocations per bucket.
    pub fn max_concurrency(mut self, number: u32, per: BucketType, wait: bool) -> Self {
        self.max_concurrency = Some(MaxConcurrency::new(number, per, wait));
        self
    }

    pub fn default_member_permissions(mut self, permissions: Permissions) -> Self {
        self.default_member_permissions = Some(permissions);
        self
    }

    pub fn dm_permission(mut self, allowed: bool) -> Self {
        self.dm_permission = Some(allowed);
        self
    }

    /// Bind the callback invoked when this leaf is dispatched.
    pub fn handler<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(InvocationContext, Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.callback = Some(Arc::new(move |ctx, args| Box::pin(f(ctx, args))));
        self
    }

    /// Verify the subtree and produce an immutable node.
    pub fn build(self) -> Result<CommandNode, ConfigError> {
        let mut node = self.assemble()?;
        node.qualified = node.name.clone();
        stamp_qualified(&mut node);
        Ok(node)
    }

    fn assemble(self) -> Result<CommandNode, ConfigError> {
        let name = self.name;
        if self.kind.is_context_menu() {
            if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
                return Err(ConfigError::InvalidField {
                    field: "name",
                    value: name,
                    reason: format!("must be 1-{MAX_NAME_LEN} characters"),
                });
            }
        } else {
            validate_option_name(&name)?;
        }

        let description = self
            .description
            .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string());
        if !self.kind.is_context_menu() {
            validate_description(&description)?;
        }

        if !self.children.is_empty() && !self.params.is_empty() {
            return Err(ConfigError::MixedContent { name });
        }
        if self.kind.is_context_menu() && !self.params.is_empty() {
            return Err(ConfigError::MixedContent { name });
        }

        let mut options = compute_options(&name, &self.params)?;

        for (param, callback) in self.autocomplete {
            let option = options
                .iter_mut()
                .find(|o| o.arg_name == param)
                .ok_or_else(|| ConfigError::UnknownAutocompleteParameter {
                    command: name.clone(),
                    parameter: param.clone(),
                })?;
            option.autocomplete = true;
            if !option.choices.is_empty() {
                return Err(ConfigError::ChoicesWithAutocomplete {
                    name: option.name.clone(),
                });
            }
            for accepted in &callback.accepts {
                if !self.params.iter().any(|p| &p.name == accepted) {
                    return Err(ConfigError::UnknownAutocompleteParameter {
                        command: name.clone(),
                        parameter: accepted.clone(),
                    });
                }
            }
            option.autocomplete_callback = Some(callback);
        }

        let mut children = Vec::with_capacity(self.children.len());
        let mut seen_children = HashSet::new();
        for child in self.children {
            match (self.kind, child.kind) {
                (NodeKind::Command, NodeKind::Subcommand | NodeKind::SubcommandGroup) => {}
                (NodeKind::SubcommandGroup, NodeKind::Subcommand) => {}
                (NodeKind::SubcommandGroup, NodeKind::SubcommandGroup) => {
                    return Err(ConfigError::NestedGroup { name: child.name });
                }
                _ => {
                    return Err(ConfigError::MixedContent { name: child.name });
                }
            }
            let child = child.assemble()?;
            if !seen_children.insert(child.name.clone()) {
                return Err(ConfigError::DuplicateChild {
                    parent: name,
                    name: child.name,
                });
            }
            children.push(child);
        }

        let is_leaf = children.is_empty() && self.kind != NodeKind::SubcommandGroup;
        if is_leaf && self.callback.is_none() {
            return Err(ConfigError::UnboundCallback { name });
        }
        if !is_leaf && self.callback.is_some() {
            return Err(ConfigError::MixedContent { name });
        }
        if self.kind == NodeKind::SubcommandGroup && children.is_empty() {
            return Err(ConfigError::InvalidField {
                field: "children",
                value: name,
                reason: "a subcommand group needs at least one subcommand".to_string(),
            });
        }

        Ok(CommandNode {
            kind: self.kind,
            qualified: name.clone(),
            name,
            description,
            options,
            children,
            callback: self.callback,
            checks: self.checks,
            before: self.before,
            after: self.after,
            error_handler: self.error_handler,
            container_check: None,
            container_before: None,
            container_after: None,
            container_error: None,
            cooldown: self.cooldown,
            cooldown_after_parsing: self.cooldown_after_parsing,
            max_concurrency: self.max_concurrency,
            scope: self.scope,
            default_member_permissions: self.default_member_permissions,
            dm_permission: self.dm_permission,
            registered: HashMap::new(),
        })
    }
}

/// Compute a leaf's option set from its parameter declarations.
fn compute_options(command: &str, params: &[ParamSpec]) -> Result<Vec<CommandOption>, ConfigError> {
    let mut options = Vec::with_capacity(params.len());
    let mut seen = HashSet::new();
    for spec in params {
        let option = CommandOption::from_param(spec)?;
        if !seen.insert(option.name.clone()) {
            return Err(ConfigError::DuplicateOption {
                command: command.to_string(),
                name: option.name,
            });
        }
        options.push(option);
    }
    Ok(options)
}

fn stamp_qualified(node: &mut CommandNode) {
    let prefix = node.qualified.clone();
    for child in &mut node.children {
        child.qualified = format!("{prefix} {}", child.name);
        stamp_qualified(child);
    }
}

/// A named group of commands sharing a check, hooks, and an error
/// handler, stamped onto every node the set owns.
pub struct CommandSet {
    pub name: String,
    check: Option<Check>,
    before: Option<Hook>,
    after: Option<Hook>,
    error_handler: Option<ErrorCallback>,
    commands: Vec<CommandNode>,
}

impl CommandSet {
    pub fn new(name: impl Into<String>) -> Self {
        CommandSet {
            name: name.into(),
            check: None,
            before: None,
            after: None,
            error_handler: None,
            commands: Vec::new(),
        }
    }

    /// The check applied to every command in the set.
    pub fn check(mut self, check: Check) -> Self {
        self.check = Some(check);
        self
    }

    pub fn before_each(mut self, hook: Hook) -> Self {
        self.before = Some(hook);
        self
    }

    pub fn after_each(mut self, hook: Hook) -> Self {
        self.after = Some(hook);
        self
    }

    pub fn on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(InvocationContext, Arc<CommandError>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.error_handler = Some(Arc::new(move |ctx, err| Box::pin(f(ctx, err))));
        self
    }

    pub fn command(mut self, builder: NodeBuilder) -> Result<Self, ConfigError> {
        let mut node = builder.build()?;
        stamp_container(
            &mut node,
            self.check.as_ref(),
            self.before.as_ref(),
            self.after.as_ref(),
            self.error_handler.as_ref(),
        );
        self.commands.push(node);
        Ok(self)
    }

    pub fn commands(&self) -> &[CommandNode] {
        &self.commands
    }

    pub(crate) fn into_commands(self) -> Vec<CommandNode> {
        self.commands
    }
}

fn stamp_container(
    node: &mut CommandNode,
    check: Option<&Check>,
    before: Option<&Hook>,
    after: Option<&Hook>,
    error_handler: Option<&ErrorCallback>,
) {
    node.container_check = check.cloned();
    node.container_before = before.cloned();
    node.container_after = after.cloned();
    node.container_error = error_handler.cloned();
    for child in &mut node.children {
        stamp_container(child, check, before, after, error_handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::option::Annotation;

    fn noop() -> impl Fn(InvocationContext, Arguments) -> futures::future::Ready<Result<(), BoxError>>
           + Send
           + Sync
           + 'static {
        |_ctx, _args| futures::future::ready(Ok(()))
    }

    #[test]
    fn leaf_without_callback_is_rejected() {
        let err = NodeBuilder::slash("ping").describe("Ping").build().unwrap_err();
        assert!(matches!(err, ConfigError::UnboundCallback { .. }));
    }

    #[test]
    fn parent_with_callback_is_rejected() {
        let err = NodeBuilder::slash("admin")
            .describe("Admin commands")
            .handler(noop())
            .child(
                NodeBuilder::subcommand("ban")
                    .describe("Ban a member")
                    .handler(noop()),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MixedContent { .. }));
    }

    #[test]
    fn groups_cannot_nest() {
        let err = NodeBuilder::slash("admin")
            .describe("Admin commands")
            .child(
                NodeBuilder::group("outer").describe("Outer").child(
                    NodeBuilder::group("inner").describe("Inner").child(
                        NodeBuilder::subcommand("leaf")
                            .describe("Leaf")
                            .handler(noop()),
                    ),
                ),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::NestedGroup { .. }));
    }

    #[test]
    fn duplicate_children_are_rejected() {
        let err = NodeBuilder::slash("admin")
            .describe("Admin commands")
            .child(
                NodeBuilder::subcommand("ban")
                    .describe("Ban")
                    .handler(noop()),
            )
            .child(
                NodeBuilder::subcommand("ban")
                    .describe("Ban again")
                    .handler(noop()),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateChild { .. }));
    }

    #[test]
    fn duplicate_options_are_rejected() {
        let err = NodeBuilder::slash("search")
            .describe("Search")
            .param(ParamSpec::new("q", Annotation::string()))
            .param(ParamSpec::new("query", Annotation::string()).rename("q"))
            .handler(noop())
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateOption { .. }));
    }

    #[test]
    fn qualified_names_are_stamped_depth_first() {
        let node = NodeBuilder::slash("admin")
            .describe("Admin commands")
            .child(
                NodeBuilder::group("user").describe("User admin").child(
                    NodeBuilder::subcommand("ban")
                        .describe("Ban a member")
                        .handler(noop()),
                ),
            )
            .build()
            .unwrap();
        let group = node.child("user").unwrap();
        let leaf = group.child("ban").unwrap();
        assert_eq!(node.qualified_name(), "admin");
        assert_eq!(group.qualified_name(), "admin user");
        assert_eq!(leaf.qualified_name(), "admin user ban");
    }

    #[test]
    fn context_menu_names_allow_mixed_case() {
        let node = NodeBuilder::user_menu("Report User")
            .handler(noop())
            .build()
            .unwrap();
        assert_eq!(node.kind.command_kind(), CommandKind::User);
        assert!(node.payload(None).description.is_empty());
    }

    #[test]
    fn context_menu_rejects_params() {
        let err = NodeBuilder::message_menu("Pin Message")
            .param(ParamSpec::new("why", Annotation::string()))
            .handler(noop())
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MixedContent { .. }));
    }

    #[test]
    fn autocomplete_must_name_a_declared_param() {
        let err = NodeBuilder::slash("search")
            .describe("Search")
            .param(ParamSpec::new("q", Annotation::string()))
            .autocomplete(
                "missing",
                AutocompleteCallback::new(Vec::<String>::new(), |_ctx, _focused, _args| async {
                    Ok(Vec::new())
                }),
            )
            .handler(noop())
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAutocompleteParameter { .. }));
    }

    #[test]
    fn scope_binding_scopes() {
        let global = ScopeBinding::default();
        assert_eq!(global.scopes(), vec![None]);

        let mut rolled = ScopeBinding::default();
        rolled.guild_ids.insert(500);
        assert_eq!(rolled.scopes(), vec![Some(500)]);
        assert!(rolled.covers(Some(500)));
        assert!(!rolled.covers(None));

        rolled.force_global = true;
        assert_eq!(rolled.scopes(), vec![None, Some(500)]);
        assert!(rolled.covers(None));
        assert!(rolled.covers(Some(999)));
    }

    #[test]
    fn registration_bookkeeping_per_scope() {
        let mut node = NodeBuilder::slash("ping")
            .describe("Ping")
            .guilds([500])
            .handler(noop())
            .build()
            .unwrap();

        assert!(!node.is_registered(Some(500)));
        assert_eq!(node.rollout_signatures().len(), 1);

        node.register_response(Some(500), 12345);
        assert_eq!(node.registered_id(Some(500)), Some(12345));
        assert!(node.rollout_signatures().is_empty());

        node.clear_registration();
        assert!(!node.is_registered(Some(500)));
        assert_eq!(node.rollout_signatures().len(), 1);
    }

    #[test]
    fn rebind_recomputes_options_and_keeps_registration() {
        let mut node = NodeBuilder::slash("search")
            .describe("Search")
            .param(ParamSpec::new("q", Annotation::string()))
            .guilds([500])
            .handler(noop())
            .build()
            .unwrap();
        node.register_response(Some(500), 777);

        node.rebind(
            vec![
                ParamSpec::new("q", Annotation::string()),
                ParamSpec::new("limit", Annotation::integer()),
            ],
            noop(),
        )
        .unwrap();

        // The option set changed; the acknowledged id is stale, not gone.
        assert_eq!(node.options().len(), 2);
        assert_eq!(node.registered_id(Some(500)), Some(777));
        assert!(node.rollout_signatures().is_empty());

        node.clear_registration();
        assert_eq!(node.registered_id(Some(500)), None);
        assert_eq!(node.rollout_signatures().len(), 1);
    }

    #[test]
    fn rebind_validation_leaves_the_node_intact() {
        let mut node = NodeBuilder::slash("search")
            .describe("Search")
            .param(ParamSpec::new("q", Annotation::string()))
            .handler(noop())
            .build()
            .unwrap();

        let err = node
            .rebind(
                vec![
                    ParamSpec::new("a", Annotation::string()),
                    ParamSpec::new("b", Annotation::string()).rename("a"),
                ],
                noop(),
            )
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateOption { .. }));
        assert_eq!(node.options().len(), 1);
        assert_eq!(node.options()[0].name, "q");
    }

    #[test]
    fn rebind_rejects_structural_nodes() {
        let mut node = NodeBuilder::slash("admin")
            .describe("Admin commands")
            .child(
                NodeBuilder::subcommand("ban")
                    .describe("Ban")
                    .handler(noop()),
            )
            .build()
            .unwrap();
        let err = node
            .rebind(vec![ParamSpec::new("q", Annotation::string())], noop())
            .unwrap_err();
        assert!(matches!(err, ConfigError::MixedContent { .. }));
    }

    #[test]
    fn rollout_changes_scopes_and_drops_stale_registration() {
        let mut node = NodeBuilder::slash("ping")
            .describe("Ping")
            .guilds([500])
            .handler(noop())
            .build()
            .unwrap();
        node.register_response(Some(500), 1);

        node.add_guild_rollout(501);
        assert!(node.scope.covers(Some(501)));
        assert!(!node.is_registered(Some(501)));

        node.remove_guild_rollout(500);
        assert!(!node.scope.covers(Some(500)) || node.scope.guild_ids.is_empty());
        assert!(!node.is_registered(Some(500)));
    }

    #[test]
    fn payload_nests_children_as_structural_options() {
        let node = NodeBuilder::slash("admin")
            .describe("Admin commands")
            .child(
                NodeBuilder::group("user").describe("User admin").child(
                    NodeBuilder::subcommand("ban")
                        .describe("Ban a member")
                        .param(ParamSpec::new("target", Annotation::user()))
                        .handler(noop()),
                ),
            )
            .build()
            .unwrap();

        let payload = node.payload(None);
        assert_eq!(payload.kind, CommandKind::ChatInput);
        assert_eq!(payload.options.len(), 1);
        let group = &payload.options[0];
        assert_eq!(group.kind, OptionType::SubCommandGroup);
        let sub = &group.options[0];
        assert_eq!(sub.kind, OptionType::SubCommand);
        assert_eq!(sub.options[0].name, "target");
        assert_eq!(sub.options[0].kind, OptionType::User);
    }

    #[test]
    fn signatures_cover_every_scope() {
        let node = NodeBuilder::slash("ping")
            .describe("Ping")
            .guilds([500, 501])
            .force_global()
            .handler(noop())
            .build()
            .unwrap();
        let signatures = node.signatures();
        assert_eq!(signatures.len(), 3);
        assert!(signatures.iter().any(|s| s.guild_id.is_none()));
        assert!(signatures.iter().any(|s| s.guild_id == Some(500)));
    }
}
