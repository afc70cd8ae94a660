//! Reconciling inbound events with the local command tree.
//!
//! Routing walks structural option frames (groups and subcommands) down
//! to the leaf that owns a callback, then turns the leaf's value frames
//! into typed arguments. Any mismatch between the event and the local
//! tree is a [`DesyncError`]: the remote registration is stale, and the
//! event is rejected rather than guessed at.

use appcmd_types::{Id, Mentionable, OptionFrame, OptionType};
use serde_json::Value;

use crate::context::{ArgValue, Arguments, InvocationContext};
use crate::error::{CommandError, DesyncError};
use crate::node::CommandNode;
use crate::option::CommandOption;

/// Walk structural frames from a root node down to its leaf.
///
/// Returns the leaf together with the value frames addressed to it. A
/// leaf with no children consumes the frames as-is; a parent expects
/// exactly one frame naming a child.
pub(crate) fn route<'a>(
    root: &'a CommandNode,
    frames: &'a [OptionFrame],
) -> Result<(&'a CommandNode, &'a [OptionFrame]), DesyncError> {
    let mut node = root;
    let mut frames = frames;
    while node.has_children() {
        let frame = frames.first().ok_or_else(|| DesyncError::UnknownSubcommand {
            parent: node.qualified_name().to_string(),
            name: String::new(),
        })?;
        node = node
            .child(&frame.name)
            .ok_or_else(|| DesyncError::UnknownSubcommand {
                parent: node.qualified_name().to_string(),
                name: frame.name.clone(),
            })?;
        frames = &frame.options;
    }
    Ok((node, frames))
}

fn parse_id(raw: &Value, name: &str) -> Result<Id, DesyncError> {
    let id = match raw {
        Value::String(s) => s.parse::<Id>().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    };
    id.ok_or_else(|| DesyncError::MalformedValue {
        name: name.to_string(),
        reason: format!("expected a snowflake id, got {raw}"),
    })
}

fn malformed(name: &str, expected: &str, raw: &Value) -> DesyncError {
    DesyncError::MalformedValue {
        name: name.to_string(),
        reason: format!("expected {expected}, got {raw}"),
    }
}

/// Look up a user id in the event's side-tables, preferring the richer
/// member snapshot and stitching the user object into it.
pub(crate) fn resolve_user(ctx: &InvocationContext, id: Id) -> Option<ArgValue> {
    let resolved = ctx.resolved();
    let key = id.to_string();
    if let Some(member) = resolved.members.get(&key) {
        let mut member = member.clone();
        if member.user.is_none() {
            member.user = resolved.users.get(&key).cloned();
        }
        return Some(ArgValue::Member(member));
    }
    resolved.users.get(&key).cloned().map(ArgValue::User)
}

/// Coerce one raw wire value into the typed argument its option declares.
pub(crate) fn coerce(
    option: &CommandOption,
    raw: &Value,
    ctx: &InvocationContext,
) -> Result<ArgValue, CommandError> {
    let name = option.name.as_str();
    let value = match option.kind {
        OptionType::String => ArgValue::String(
            raw.as_str()
                .ok_or_else(|| malformed(name, "a string", raw))?
                .to_string(),
        ),
        OptionType::Integer => {
            // The remote service has been observed sending an empty
            // string for omitted optional integers.
            if raw.as_str() == Some("") && !option.required {
                ArgValue::Null
            } else {
                ArgValue::Integer(raw.as_i64().ok_or_else(|| malformed(name, "an integer", raw))?)
            }
        }
        OptionType::Boolean => {
            ArgValue::Boolean(raw.as_bool().ok_or_else(|| malformed(name, "a boolean", raw))?)
        }
        OptionType::Number => {
            ArgValue::Number(raw.as_f64().ok_or_else(|| malformed(name, "a number", raw))?)
        }
        OptionType::User => {
            let id = parse_id(raw, name)?;
            resolve_user(ctx, id).ok_or(DesyncError::MissingResolved {
                kind: "user",
                id: id.to_string(),
            })?
        }
        OptionType::Role => {
            let id = parse_id(raw, name)?;
            let resolved = ctx.resolved();
            let role = resolved
                .roles
                .get(&id.to_string())
                .cloned()
                .or_else(|| ctx.guild_id().and_then(|g| ctx.cache.role(g, id)))
                .ok_or(DesyncError::MissingResolved {
                    kind: "role",
                    id: id.to_string(),
                })?;
            ArgValue::Role(role)
        }
        OptionType::Channel => {
            let id = parse_id(raw, name)?;
            let channel = ctx
                .cache
                .channel(id)
                .or_else(|| ctx.resolved().channels.get(&id.to_string()).cloned())
                .ok_or(DesyncError::MissingResolved {
                    kind: "channel",
                    id: id.to_string(),
                })?;
            ArgValue::Channel(channel)
        }
        OptionType::Attachment => {
            let id = parse_id(raw, name)?;
            let attachment = ctx
                .resolved()
                .attachments
                .get(&id.to_string())
                .cloned()
                .ok_or(DesyncError::MissingResolved {
                    kind: "attachment",
                    id: id.to_string(),
                })?;
            ArgValue::Attachment(attachment)
        }
        OptionType::Mentionable => {
            let id = parse_id(raw, name)?;
            let resolved = ctx.resolved();
            let key = id.to_string();
            if let Some(role) = resolved.roles.get(&key) {
                ArgValue::Mentionable(Mentionable::Role(role.clone()))
            } else if let Some(value) = resolve_user(ctx, id) {
                match value {
                    ArgValue::Member(member) => match member.user {
                        Some(user) => ArgValue::Mentionable(Mentionable::User(user)),
                        None => {
                            return Err(DesyncError::MissingResolved {
                                kind: "mentionable",
                                id: key,
                            }
                            .into())
                        }
                    },
                    ArgValue::User(user) => ArgValue::Mentionable(Mentionable::User(user)),
                    _ => unreachable!("resolve_user yields member or user"),
                }
            } else {
                return Err(DesyncError::MissingResolved {
                    kind: "mentionable",
                    id: key,
                }
                .into());
            }
        }
        OptionType::SubCommand | OptionType::SubCommandGroup => {
            return Err(malformed(name, "a value frame", raw).into())
        }
    };
    Ok(value)
}

/// Resolve a leaf's value frames into callback arguments.
///
/// Every frame must name a declared option; every declared option absent
/// from the frames resolves through its default.
pub(crate) async fn resolve_arguments(
    command: &str,
    options: &[CommandOption],
    frames: &[OptionFrame],
    ctx: &InvocationContext,
) -> Result<Arguments, CommandError> {
    let mut args = Arguments::new();
    for frame in frames {
        let option = options
            .iter()
            .find(|o| o.name == frame.name)
            .ok_or_else(|| DesyncError::UnknownOption {
                command: command.to_string(),
                name: frame.name.clone(),
            })?;
        let raw = frame.value.as_ref().ok_or_else(|| DesyncError::MalformedValue {
            name: frame.name.clone(),
            reason: "value frame carries no value".to_string(),
        })?;
        args.insert(option.arg_name.clone(), option.resolve(Some(raw), ctx).await?);
    }
    for option in options {
        if args.get(&option.arg_name).is_none() {
            args.insert(option.arg_name.clone(), option.resolve(None, ctx).await?);
        }
    }
    Ok(args)
}

/// Find the single focused frame of an autocomplete event.
pub(crate) fn focused_frame<'a>(
    command: &str,
    frames: &'a [OptionFrame],
) -> Result<&'a OptionFrame, CommandError> {
    let mut focused = frames.iter().filter(|f| f.focused);
    let first = focused.next().ok_or_else(|| CommandError::MissingFocus {
        command: command.to_string(),
    })?;
    if let Some(second) = focused.next() {
        return Err(CommandError::AmbiguousFocus {
            command: command.to_string(),
            first: first.name.clone(),
            second: second.name.clone(),
        });
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineHooks;
    use crate::option::{Annotation, ParamSpec};
    use appcmd_types::{
        CommandKind, Interaction, InteractionData, InteractionKind, Member, ResolvedData, Role,
        User,
    };
    use serde_json::json;

    fn option(spec: ParamSpec) -> CommandOption {
        CommandOption::from_param(&spec).expect("valid option")
    }

    fn ctx_with_resolved(resolved: ResolvedData) -> InvocationContext {
        InvocationContext::for_tests(
            Interaction {
                id: 1,
                kind: InteractionKind::ApplicationCommand,
                data: InteractionData {
                    name: "search".to_string(),
                    kind: CommandKind::ChatInput,
                    options: Vec::new(),
                    resolved: Some(resolved),
                    target_id: None,
                },
                guild_id: Some(500),
                channel_id: Some(900),
                member: None,
                user: None,
            },
            EngineHooks::default(),
        )
    }

    #[test]
    fn scalar_coercion() {
        let ctx = ctx_with_resolved(ResolvedData::default());

        let s = option(ParamSpec::new("q", Annotation::string()));
        assert_eq!(
            coerce(&s, &json!("hello"), &ctx).unwrap().as_str(),
            Some("hello")
        );
        assert!(coerce(&s, &json!(3), &ctx).is_err());

        let i = option(ParamSpec::new("n", Annotation::integer()));
        assert_eq!(coerce(&i, &json!(42), &ctx).unwrap().as_i64(), Some(42));

        let b = option(ParamSpec::new("f", Annotation::boolean()));
        assert_eq!(coerce(&b, &json!(true), &ctx).unwrap().as_bool(), Some(true));

        let n = option(ParamSpec::new("x", Annotation::number()));
        assert_eq!(coerce(&n, &json!(1.5), &ctx).unwrap().as_f64(), Some(1.5));
    }

    #[test]
    fn optional_integer_tolerates_empty_string() {
        let ctx = ctx_with_resolved(ResolvedData::default());

        let optional = option(ParamSpec::new("n", Annotation::integer().nullable()));
        assert!(coerce(&optional, &json!(""), &ctx).unwrap().is_null());

        let required = option(ParamSpec::new("n", Annotation::integer()));
        assert!(coerce(&required, &json!(""), &ctx).is_err());
    }

    #[test]
    fn user_coercion_prefers_member_and_stitches_user() {
        let mut resolved = ResolvedData::default();
        resolved.users.insert(
            "111".to_string(),
            User {
                id: 111,
                username: "search".to_string(),
                discriminator: String::new(),
                bot: false,
            },
        );
        resolved
            .members
            .insert("111".to_string(), Member::from_user(User {
                id: 111,
                username: "search".to_string(),
                discriminator: String::new(),
                bot: false,
            }));
        // Strip the inner user to exercise the stitch.
        resolved
            .members
            .get_mut("111")
            .map(|m| m.user = None);

        let ctx = ctx_with_resolved(resolved);
        let o = option(ParamSpec::new("target", Annotation::user()));
        let value = coerce(&o, &json!("111"), &ctx).unwrap();
        let member = value.as_member().expect("member preferred");
        assert_eq!(member.user.as_ref().map(|u| u.id), Some(111));
    }

    #[test]
    fn missing_resolved_user_is_a_desync() {
        let ctx = ctx_with_resolved(ResolvedData::default());
        let o = option(ParamSpec::new("target", Annotation::user()));
        let err = coerce(&o, &json!("111"), &ctx).unwrap_err();
        assert!(matches!(
            err,
            CommandError::Desync(DesyncError::MissingResolved { kind: "user", .. })
        ));
    }

    #[test]
    fn role_and_mentionable_coercion() {
        let mut resolved = ResolvedData::default();
        resolved.roles.insert(
            "777".to_string(),
            Role {
                id: 777,
                name: "mods".to_string(),
                permissions: Default::default(),
            },
        );
        let ctx = ctx_with_resolved(resolved);

        let r = option(ParamSpec::new("role", Annotation::role()));
        let value = coerce(&r, &json!("777"), &ctx).unwrap();
        assert_eq!(value.as_role().map(|r| r.id), Some(777));

        let m = option(ParamSpec::new("who", Annotation::mentionable()));
        let value = coerce(&m, &json!("777"), &ctx).unwrap();
        assert!(matches!(
            value.as_mentionable(),
            Some(Mentionable::Role(role)) if role.id == 777
        ));
    }

    #[tokio::test]
    async fn absent_options_fall_back_to_defaults() {
        let ctx = ctx_with_resolved(ResolvedData::default());
        let options = vec![
            option(ParamSpec::new("q", Annotation::string())),
            option(
                ParamSpec::new("limit", Annotation::integer())
                    .default_value(ArgValue::Integer(10)),
            ),
        ];
        let frames = vec![OptionFrame::value("q", json!("hello"))];

        let args = resolve_arguments("search", &options, &frames, &ctx)
            .await
            .unwrap();
        assert_eq!(args.get("q").and_then(ArgValue::as_str), Some("hello"));
        assert_eq!(args.get("limit").and_then(ArgValue::as_i64), Some(10));
    }

    #[tokio::test]
    async fn unknown_frame_is_a_desync() {
        let ctx = ctx_with_resolved(ResolvedData::default());
        let options = vec![option(ParamSpec::new("q", Annotation::string()))];
        let frames = vec![OptionFrame::value("stale", json!("x"))];

        let err = resolve_arguments("search", &options, &frames, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommandError::Desync(DesyncError::UnknownOption { .. })
        ));
    }

    #[test]
    fn focused_scan_requires_exactly_one() {
        let frames = vec![
            OptionFrame::value("a", json!("x")),
            OptionFrame::focused("b", json!("y")),
        ];
        assert_eq!(focused_frame("search", &frames).unwrap().name, "b");

        let none = vec![OptionFrame::value("a", json!("x"))];
        assert!(matches!(
            focused_frame("search", &none).unwrap_err(),
            CommandError::MissingFocus { .. }
        ));

        let two = vec![
            OptionFrame::focused("a", json!("x")),
            OptionFrame::focused("b", json!("y")),
        ];
        assert!(matches!(
            focused_frame("search", &two).unwrap_err(),
            CommandError::AmbiguousFocus { .. }
        ));
    }
}
