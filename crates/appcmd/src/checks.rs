//! Check predicates and lifecycle hooks.
//!
//! A check inspects an invocation and either passes, declines with
//! `Ok(false)` (the pipeline turns that into a generic predicate
//! failure), or raises a specific [`CheckFailure`]. Checks run
//! engine-wide first, then container-wide, then per-command, and the
//! first failure short-circuits the rest.
//!
//! Hooks run around the callback and cannot veto the invocation; a hook
//! error aborts it instead.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use appcmd_types::Permissions;
use futures::future::BoxFuture;

use crate::context::InvocationContext;
use crate::error::{BoxError, CheckFailure};

type CheckFn =
    dyn Fn(InvocationContext) -> BoxFuture<'static, Result<bool, CheckFailure>> + Send + Sync;
type HookFn = dyn Fn(InvocationContext) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync;

/// An async predicate gating command invocation.
#[derive(Clone)]
pub struct Check {
    run: Arc<CheckFn>,
}

impl Check {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, CheckFailure>> + Send + 'static,
    {
        Check {
            run: Arc::new(move |ctx| Box::pin(f(ctx))),
        }
    }

    pub(crate) async fn run(&self, ctx: InvocationContext) -> Result<bool, CheckFailure> {
        (self.run)(ctx).await
    }
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Check")
    }
}

/// An async lifecycle hook, run before or after the command callback.
#[derive(Clone)]
pub struct Hook {
    run: Arc<HookFn>,
}

impl Hook {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Hook {
            run: Arc::new(move |ctx| Box::pin(f(ctx))),
        }
    }

    pub(crate) async fn run(&self, ctx: InvocationContext) -> Result<(), BoxError> {
        (self.run)(ctx).await
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Hook")
    }
}

fn command_name(ctx: &InvocationContext) -> String {
    ctx.interaction.data.name.clone()
}

/// Passes only inside a guild.
pub fn guild_only() -> Check {
    Check::new(|ctx| async move {
        if ctx.interaction.is_guild() {
            Ok(true)
        } else {
            Err(CheckFailure::GuildOnly {
                command: command_name(&ctx),
            })
        }
    })
}

/// Passes only in direct messages.
pub fn dm_only() -> Check {
    Check::new(|ctx| async move {
        if ctx.interaction.is_guild() {
            Err(CheckFailure::DmOnly {
                command: command_name(&ctx),
            })
        } else {
            Ok(true)
        }
    })
}

/// Passes only for the application owners configured on the engine.
pub fn is_owner() -> Check {
    Check::new(|ctx| async move {
        if ctx.invoker_is_owner() {
            Ok(true)
        } else {
            Err(CheckFailure::NotOwner)
        }
    })
}

/// Passes only in channels flagged age-restricted. An unknown channel
/// fails closed.
pub fn is_nsfw() -> Check {
    Check::new(|ctx| async move {
        let nsfw = ctx
            .channel_id()
            .and_then(|id| ctx.cache.channel(id))
            .is_some_and(|channel| channel.nsfw);
        if nsfw {
            Ok(true)
        } else {
            Err(CheckFailure::NsfwRequired)
        }
    })
}

/// Passes only when the invoking member holds the given role.
pub fn has_role(role: appcmd_types::Id) -> Check {
    Check::new(move |ctx| async move {
        let held = ctx
            .member()
            .is_some_and(|m| m.roles.iter().any(|r| r == &role.to_string()));
        if held {
            Ok(true)
        } else {
            Err(CheckFailure::MissingRole { role })
        }
    })
}

/// Passes when the invoking member holds at least one of the given roles.
pub fn has_any_role(roles: Vec<appcmd_types::Id>) -> Check {
    let roles = Arc::new(roles);
    Check::new(move |ctx| {
        let roles = Arc::clone(&roles);
        async move {
            let held = ctx.member().is_some_and(|m| {
                roles.iter().any(|role| {
                    let role = role.to_string();
                    m.roles.iter().any(|r| r == &role)
                })
            });
            if held {
                Ok(true)
            } else {
                Err(CheckFailure::MissingAnyRole {
                    roles: roles.as_ref().clone(),
                })
            }
        }
    })
}

/// Passes when the invoker's computed channel permissions contain all of
/// `required`. Administrator implies everything.
pub fn has_permissions(required: Permissions) -> Check {
    Check::new(move |ctx| async move {
        let held = ctx
            .member()
            .and_then(|m| m.permissions)
            .unwrap_or(Permissions::NONE);
        let missing = held.missing(required);
        if missing.is_empty() {
            Ok(true)
        } else {
            Err(CheckFailure::MissingPermissions { missing })
        }
    })
}

/// Passes when the application's own guild permissions contain all of
/// `required`. Unknown permissions fail closed.
pub fn bot_has_permissions(required: Permissions) -> Check {
    Check::new(move |ctx| async move {
        let held = ctx
            .guild_id()
            .and_then(|guild_id| ctx.cache.app_permissions(guild_id))
            .unwrap_or(Permissions::NONE);
        let missing = held.missing(required);
        if missing.is_empty() {
            Ok(true)
        } else {
            Err(CheckFailure::BotMissingPermissions { missing })
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EntityCache;
    use crate::engine::EngineHooks;
    use appcmd_types::{
        Channel, CommandKind, Id, Interaction, InteractionData, InteractionKind, Member, Role,
        User,
    };
    use std::collections::HashMap;

    fn user(id: Id) -> User {
        User {
            id,
            username: "tester".to_string(),
            discriminator: String::new(),
            bot: false,
        }
    }

    fn guild_event(member: Member) -> Interaction {
        Interaction {
            id: 1,
            kind: InteractionKind::ApplicationCommand,
            data: InteractionData {
                name: "ban".to_string(),
                kind: CommandKind::ChatInput,
                options: Vec::new(),
                resolved: None,
                target_id: None,
            },
            guild_id: Some(500),
            channel_id: Some(900),
            member: Some(member),
            user: None,
        }
    }

    fn dm_event() -> Interaction {
        Interaction {
            id: 1,
            kind: InteractionKind::ApplicationCommand,
            data: InteractionData {
                name: "ban".to_string(),
                kind: CommandKind::ChatInput,
                options: Vec::new(),
                resolved: None,
                target_id: None,
            },
            guild_id: None,
            channel_id: Some(900),
            member: None,
            user: Some(user(10)),
        }
    }

    fn ctx_for(interaction: Interaction) -> InvocationContext {
        InvocationContext::for_tests(interaction, EngineHooks::default())
    }

    struct NsfwCache {
        channels: HashMap<Id, Channel>,
    }

    impl EntityCache for NsfwCache {
        fn channel(&self, id: Id) -> Option<Channel> {
            self.channels.get(&id).cloned()
        }

        fn role(&self, _guild_id: Id, _id: Id) -> Option<Role> {
            None
        }
    }

    #[tokio::test]
    async fn guild_only_rejects_dms() {
        let ctx = ctx_for(dm_event());
        let err = guild_only().run(ctx).await.unwrap_err();
        assert!(matches!(err, CheckFailure::GuildOnly { .. }));

        let ctx = ctx_for(guild_event(Member::from_user(user(10))));
        assert!(guild_only().run(ctx).await.unwrap());
    }

    #[tokio::test]
    async fn dm_only_rejects_guilds() {
        let ctx = ctx_for(guild_event(Member::from_user(user(10))));
        let err = dm_only().run(ctx).await.unwrap_err();
        assert!(matches!(err, CheckFailure::DmOnly { .. }));
    }

    #[tokio::test]
    async fn is_owner_consults_engine_owner_set() {
        let mut hooks = EngineHooks::default();
        hooks.owner_ids.insert(10);

        let ctx = InvocationContext::for_tests(dm_event(), hooks.clone());
        assert!(is_owner().run(ctx).await.unwrap());

        hooks.owner_ids.clear();
        let ctx = InvocationContext::for_tests(dm_event(), hooks);
        assert!(matches!(
            is_owner().run(ctx).await.unwrap_err(),
            CheckFailure::NotOwner
        ));
    }

    #[tokio::test]
    async fn is_nsfw_fails_closed_on_unknown_channel() {
        let ctx = ctx_for(dm_event());
        assert!(matches!(
            is_nsfw().run(ctx).await.unwrap_err(),
            CheckFailure::NsfwRequired
        ));

        let mut channels = HashMap::new();
        channels.insert(
            900,
            Channel {
                id: 900,
                name: "lounge".to_string(),
                kind: 0,
                nsfw: true,
            },
        );
        let ctx = ctx_for(dm_event()).with_cache(Arc::new(NsfwCache { channels }));
        assert!(is_nsfw().run(ctx).await.unwrap());
    }

    #[tokio::test]
    async fn role_checks_match_held_roles() {
        let mut member = Member::from_user(user(10));
        member.roles = vec!["777".to_string()];
        let ctx = ctx_for(guild_event(member));

        assert!(has_role(777).run(ctx.clone()).await.unwrap());
        assert!(matches!(
            has_role(778).run(ctx.clone()).await.unwrap_err(),
            CheckFailure::MissingRole { role: 778 }
        ));
        assert!(has_any_role(vec![1, 777]).run(ctx.clone()).await.unwrap());
        assert!(matches!(
            has_any_role(vec![1, 2]).run(ctx).await.unwrap_err(),
            CheckFailure::MissingAnyRole { .. }
        ));
    }

    #[tokio::test]
    async fn permission_check_reports_missing_bits() {
        let mut member = Member::from_user(user(10));
        member.permissions = Some(Permissions::KICK_MEMBERS);
        let ctx = ctx_for(guild_event(member));

        assert!(has_permissions(Permissions::KICK_MEMBERS)
            .run(ctx.clone())
            .await
            .unwrap());

        let err = has_permissions(Permissions::KICK_MEMBERS.union(Permissions::BAN_MEMBERS))
            .run(ctx)
            .await
            .unwrap_err();
        match err {
            CheckFailure::MissingPermissions { missing } => {
                assert_eq!(missing, Permissions::BAN_MEMBERS);
            }
            other => panic!("unexpected failure: {other}"),
        }
    }

    #[tokio::test]
    async fn administrator_implies_everything() {
        let mut member = Member::from_user(user(10));
        member.permissions = Some(Permissions::ADMINISTRATOR);
        let ctx = ctx_for(guild_event(member));

        assert!(has_permissions(Permissions::BAN_MEMBERS.union(Permissions::MANAGE_GUILD))
            .run(ctx)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn bot_permission_check_fails_closed_without_cache() {
        let ctx = ctx_for(guild_event(Member::from_user(user(10))));
        assert!(matches!(
            bot_has_permissions(Permissions::BAN_MEMBERS)
                .run(ctx)
                .await
                .unwrap_err(),
            CheckFailure::BotMissingPermissions { .. }
        ));
    }
}
