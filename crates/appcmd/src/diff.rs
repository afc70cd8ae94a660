//! Structural comparison of local and remote command payloads.
//!
//! Decides whether a remote registration still matches the local tree,
//! which is what gates re-registration during sync. Option order is
//! ignored at every level: options are keyed by name, and choices and
//! channel-type filters compare as sets. Any rename, retype, or
//! required-flag flip makes the payloads differ.

use appcmd_types::{ChoicePayload, CommandPayload, OptionPayload};
use serde_json::Value;

/// Whether a remote registration is still a faithful image of the local
/// payload.
pub fn payload_matches(local: &CommandPayload, remote: &CommandPayload) -> bool {
    local.kind == remote.kind
        && local.name == remote.name
        && local.description == remote.description
        && local.guild_id == remote.guild_id
        && local.default_member_permissions == remote.default_member_permissions
        && local.dm_permission.unwrap_or(true) == remote.dm_permission.unwrap_or(true)
        && options_match(&local.options, &remote.options)
}

/// Set-keyed comparison: every local option must match exactly one
/// remote option of the same name, and the counts must agree.
fn options_match(local: &[OptionPayload], remote: &[OptionPayload]) -> bool {
    if local.len() != remote.len() {
        return false;
    }
    local.iter().all(|l| {
        let mut named = remote.iter().filter(|r| r.name == l.name);
        match (named.next(), named.next()) {
            (Some(r), None) => option_matches(l, r),
            _ => false,
        }
    })
}

fn option_matches(local: &OptionPayload, remote: &OptionPayload) -> bool {
    local.kind == remote.kind
        && local.name == remote.name
        && local.description == remote.description
        && local.required == remote.required
        && local.autocomplete == remote.autocomplete
        && set_eq(&local.channel_types, &remote.channel_types)
        && choices_match(&local.choices, &remote.choices)
        && bound_matches(local.min_value.as_ref(), remote.min_value.as_ref())
        && bound_matches(local.max_value.as_ref(), remote.max_value.as_ref())
        && options_match(&local.options, &remote.options)
}

fn set_eq(local: &[u8], remote: &[u8]) -> bool {
    local.len() == remote.len() && local.iter().all(|v| remote.contains(v))
}

fn choices_match(local: &[ChoicePayload], remote: &[ChoicePayload]) -> bool {
    if local.len() != remote.len() {
        return false;
    }
    local.iter().all(|l| {
        remote
            .iter()
            .any(|r| r.name == l.name && values_eq(&l.value, &r.value))
    })
}

/// The remote service may echo an integer bound back as a float, so
/// numeric bounds compare by value rather than representation.
fn bound_matches(local: Option<&Value>, remote: Option<&Value>) -> bool {
    match (local, remote) {
        (None, None) => true,
        (Some(l), Some(r)) => values_eq(l, r),
        _ => false,
    }
}

fn values_eq(local: &Value, remote: &Value) -> bool {
    match (local.as_f64(), remote.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => local == remote,
    }
}
