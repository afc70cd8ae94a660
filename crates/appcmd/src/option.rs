//! The option model: one typed parameter of a command.
//!
//! A host declares parameters as [`ParamSpec`]s on a node builder; binding
//! the node computes one [`CommandOption`] per declared parameter. All
//! invariant violations surface at definition time as [`ConfigError`],
//! never at dispatch time.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use appcmd_types::{ChoicePayload, OptionPayload, OptionType};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::context::{ArgValue, Arguments, InvocationContext};
use crate::error::{BoxError, CommandError, ConfigError};
use crate::router;

/// Maximum length of an option or command name.
pub(crate) const MAX_NAME_LEN: usize = 32;

/// Maximum length of a command or option description.
pub(crate) const MAX_DESCRIPTION_LEN: usize = 100;

/// Maximum number of fixed choices per option.
const MAX_CHOICES: usize = 25;

/// Description used when a spec declares none.
pub(crate) const DEFAULT_DESCRIPTION: &str = "No description provided.";

/// Explicit tri-state for fields where "not specified" and "specified as
/// null" mean different things.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TriState<T> {
    /// The host never specified the field.
    #[default]
    Unset,
    /// The host explicitly specified "no value".
    Null,
    Value(T),
}

impl<T> TriState<T> {
    pub fn is_unset(&self) -> bool {
        matches!(self, TriState::Unset)
    }

    /// Whether the host specified anything at all (null counts).
    pub fn is_declared(&self) -> bool {
        !self.is_unset()
    }

    pub fn as_value(&self) -> Option<&T> {
        match self {
            TriState::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// A declared parameter type, the engine's stand-in for a language-level
/// type annotation. `nullable` models an optional/nullable wrapper around
/// the inner type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    kind: AnnotationKind,
    nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AnnotationKind {
    String,
    Integer,
    Boolean,
    Number,
    User,
    Role,
    Channel,
    Attachment,
    Mentionable,
    /// A host-defined type; only mappable through a custom converter.
    Custom(String),
}

impl Annotation {
    pub fn string() -> Self {
        Self::of(AnnotationKind::String)
    }
    pub fn integer() -> Self {
        Self::of(AnnotationKind::Integer)
    }
    pub fn boolean() -> Self {
        Self::of(AnnotationKind::Boolean)
    }
    pub fn number() -> Self {
        Self::of(AnnotationKind::Number)
    }
    pub fn user() -> Self {
        Self::of(AnnotationKind::User)
    }
    pub fn role() -> Self {
        Self::of(AnnotationKind::Role)
    }
    pub fn channel() -> Self {
        Self::of(AnnotationKind::Channel)
    }
    pub fn attachment() -> Self {
        Self::of(AnnotationKind::Attachment)
    }
    pub fn mentionable() -> Self {
        Self::of(AnnotationKind::Mentionable)
    }

    /// A host-defined type name. Requires a converter on the parameter.
    pub fn custom(name: impl Into<String>) -> Self {
        Self::of(AnnotationKind::Custom(name.into()))
    }

    fn of(kind: AnnotationKind) -> Self {
        Annotation {
            kind,
            nullable: false,
        }
    }

    /// Wrap the annotation as nullable/optional.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Map the annotation to the wire option type, unwrapping nullability.
    /// Custom annotations have no mapping of their own.
    pub fn option_type(&self) -> Option<OptionType> {
        match self.kind {
            AnnotationKind::String => Some(OptionType::String),
            AnnotationKind::Integer => Some(OptionType::Integer),
            AnnotationKind::Boolean => Some(OptionType::Boolean),
            AnnotationKind::Number => Some(OptionType::Number),
            AnnotationKind::User => Some(OptionType::User),
            AnnotationKind::Role => Some(OptionType::Role),
            AnnotationKind::Channel => Some(OptionType::Channel),
            AnnotationKind::Attachment => Some(OptionType::Attachment),
            AnnotationKind::Mentionable => Some(OptionType::Mentionable),
            AnnotationKind::Custom(_) => None,
        }
    }

    fn display_name(&self) -> String {
        match &self.kind {
            AnnotationKind::Custom(name) => name.clone(),
            other => format!("{other:?}").to_lowercase(),
        }
    }
}

/// Custom value conversion attached to a single parameter. The coerced
/// wire value is piped through [`Converter::convert`] before reaching the
/// callback.
#[async_trait]
pub trait Converter: Send + Sync {
    /// The wire option type the remote service should collect for this
    /// parameter.
    fn option_type(&self) -> OptionType {
        OptionType::String
    }

    async fn convert(
        &self,
        ctx: &InvocationContext,
        value: ArgValue,
    ) -> Result<ArgValue, BoxError>;
}

pub type AutocompleteFuture = BoxFuture<'static, Result<Vec<ChoicePayload>, BoxError>>;

/// An autocomplete callback plus the set of sibling parameter names it
/// accepts as keyword context.
#[derive(Clone)]
pub struct AutocompleteCallback {
    pub(crate) accepts: HashSet<String>,
    run: Arc<dyn Fn(InvocationContext, ArgValue, Arguments) -> AutocompleteFuture + Send + Sync>,
}

impl AutocompleteCallback {
    pub fn new<I, S, F, Fut>(accepts: I, f: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(InvocationContext, ArgValue, Arguments) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Vec<ChoicePayload>, BoxError>> + Send + 'static,
    {
        AutocompleteCallback {
            accepts: accepts.into_iter().map(Into::into).collect(),
            run: Arc::new(move |ctx, focused, args| Box::pin(f(ctx, focused, args))),
        }
    }

    pub(crate) async fn run(
        &self,
        ctx: InvocationContext,
        focused: ArgValue,
        args: Arguments,
    ) -> Result<Vec<ChoicePayload>, BoxError> {
        (self.run)(ctx, focused, args).await
    }
}

impl fmt::Debug for AutocompleteCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutocompleteCallback")
            .field("accepts", &self.accepts)
            .finish_non_exhaustive()
    }
}

/// One declared callback parameter plus its option overrides.
#[derive(Clone)]
pub struct ParamSpec {
    pub(crate) name: String,
    annotation: Annotation,
    rename: Option<String>,
    description: Option<String>,
    required: Option<bool>,
    default: TriState<ArgValue>,
    choices: Vec<ChoicePayload>,
    channel_types: Vec<u8>,
    min_value: Option<Value>,
    max_value: Option<Value>,
    autocomplete: bool,
    converter: Option<Arc<dyn Converter>>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, annotation: Annotation) -> Self {
        ParamSpec {
            name: name.into(),
            annotation,
            rename: None,
            description: None,
            required: None,
            default: TriState::Unset,
            choices: Vec::new(),
            channel_types: Vec::new(),
            min_value: None,
            max_value: None,
            autocomplete: false,
            converter: None,
        }
    }

    /// Override the wire-facing option name (defaults to the parameter name).
    pub fn rename(mut self, name: impl Into<String>) -> Self {
        self.rename = Some(name.into());
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Explicitly mark required-ness, overriding the computed value.
    pub fn required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    /// Declare a default, substituted when the event omits the option.
    pub fn default_value(mut self, value: ArgValue) -> Self {
        self.default = TriState::Value(value);
        self
    }

    /// Declare an explicit null default.
    pub fn default_null(mut self) -> Self {
        self.default = TriState::Null;
        self
    }

    pub fn choice(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.choices.push(ChoicePayload {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn channel_types(mut self, kinds: impl IntoIterator<Item = u8>) -> Self {
        self.channel_types = kinds.into_iter().collect();
        self
    }

    pub fn min_value(mut self, value: impl Into<Value>) -> Self {
        self.min_value = Some(value.into());
        self
    }

    pub fn max_value(mut self, value: impl Into<Value>) -> Self {
        self.max_value = Some(value.into());
        self
    }

    /// Flag the option for autocomplete. The callback is attached on the
    /// node builder.
    pub fn autocomplete(mut self) -> Self {
        self.autocomplete = true;
        self
    }

    pub fn converter(mut self, converter: Arc<dyn Converter>) -> Self {
        self.converter = Some(converter);
        self
    }
}

impl fmt::Debug for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamSpec")
            .field("name", &self.name)
            .field("annotation", &self.annotation)
            .finish_non_exhaustive()
    }
}

/// Validate a wire-facing name: 1-32 chars, lowercase, no whitespace.
pub(crate) fn validate_option_name(value: &str) -> Result<(), ConfigError> {
    if value.is_empty() || value.chars().count() > MAX_NAME_LEN {
        return Err(ConfigError::InvalidField {
            field: "name",
            value: value.to_string(),
            reason: format!("must be 1-{MAX_NAME_LEN} characters"),
        });
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_uppercase()) {
        return Err(ConfigError::InvalidField {
            field: "name",
            value: value.to_string(),
            reason: "must be lowercase with no whitespace".to_string(),
        });
    }
    Ok(())
}

pub(crate) fn validate_description(value: &str) -> Result<(), ConfigError> {
    if value.is_empty() || value.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ConfigError::InvalidField {
            field: "description",
            value: value.to_string(),
            reason: format!("must be 1-{MAX_DESCRIPTION_LEN} characters"),
        });
    }
    Ok(())
}

/// One typed parameter of a leaf command, computed from a [`ParamSpec`]
/// at bind time.
#[derive(Clone)]
pub struct CommandOption {
    pub kind: OptionType,
    /// Wire-facing option name.
    pub name: String,
    /// Callback parameter name this option binds to.
    pub arg_name: String,
    pub description: String,
    pub required: bool,
    pub choices: Vec<ChoicePayload>,
    pub channel_types: Vec<u8>,
    pub min_value: Option<Value>,
    pub max_value: Option<Value>,
    pub autocomplete: bool,
    pub(crate) default: TriState<ArgValue>,
    pub(crate) converter: Option<Arc<dyn Converter>>,
    pub(crate) autocomplete_callback: Option<AutocompleteCallback>,
}

impl CommandOption {
    /// Compute the option a parameter spec describes.
    ///
    /// Required-ness precedence: explicit override, then declared
    /// nullability, then a declared default, otherwise required.
    pub fn from_param(spec: &ParamSpec) -> Result<Self, ConfigError> {
        let kind = match &spec.converter {
            Some(converter) => converter.option_type(),
            None => {
                spec.annotation
                    .option_type()
                    .ok_or_else(|| ConfigError::UnmappedAnnotation {
                        name: spec.name.clone(),
                        annotation: spec.annotation.display_name(),
                    })?
            }
        };

        let required = match spec.required {
            Some(explicit) => explicit,
            None => !spec.annotation.is_nullable() && !spec.default.is_declared(),
        };

        let option = CommandOption {
            kind,
            name: spec.rename.clone().unwrap_or_else(|| spec.name.clone()),
            arg_name: spec.name.clone(),
            description: spec
                .description
                .clone()
                .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
            required,
            choices: spec.choices.clone(),
            channel_types: spec.channel_types.clone(),
            min_value: spec.min_value.clone(),
            max_value: spec.max_value.clone(),
            autocomplete: spec.autocomplete,
            default: spec.default.clone(),
            converter: spec.converter.clone(),
            autocomplete_callback: None,
        };
        option.verify()?;
        Ok(option)
    }

    /// Definition-time invariant checks.
    pub fn verify(&self) -> Result<(), ConfigError> {
        validate_option_name(&self.name)?;
        validate_description(&self.description)?;

        if !self.choices.is_empty() && self.autocomplete {
            return Err(ConfigError::ChoicesWithAutocomplete {
                name: self.name.clone(),
            });
        }
        if self.choices.len() > MAX_CHOICES {
            return Err(ConfigError::InvalidField {
                field: "choices",
                value: self.name.clone(),
                reason: format!("at most {MAX_CHOICES} choices allowed"),
            });
        }
        if (self.min_value.is_some() || self.max_value.is_some()) && !self.kind.is_numeric() {
            return Err(ConfigError::BoundsOnNonNumeric {
                name: self.name.clone(),
                kind: self.kind,
            });
        }
        if !self.channel_types.is_empty() && self.kind != OptionType::Channel {
            return Err(ConfigError::ChannelFilterOnNonChannel {
                name: self.name.clone(),
                kind: self.kind,
            });
        }
        Ok(())
    }

    /// Resolve a raw wire value (or its absence) into the argument value
    /// handed to the callback.
    pub async fn resolve(
        &self,
        raw: Option<&Value>,
        ctx: &InvocationContext,
    ) -> Result<ArgValue, CommandError> {
        let Some(raw) = raw else {
            return Ok(self.default_value());
        };

        let coerced = router::coerce(self, raw, ctx)?;
        match &self.converter {
            Some(converter) => {
                converter
                    .convert(ctx, coerced)
                    .await
                    .map_err(|source| CommandError::Invoke {
                        command: self.name.clone(),
                        source,
                    })
            }
            None => Ok(coerced),
        }
    }

    /// The value substituted when the event omits this option.
    pub(crate) fn default_value(&self) -> ArgValue {
        match &self.default {
            TriState::Value(v) => v.clone(),
            TriState::Null | TriState::Unset => ArgValue::Null,
        }
    }

    /// The declarative payload entry for this option.
    pub fn payload(&self) -> OptionPayload {
        OptionPayload {
            kind: self.kind,
            name: self.name.clone(),
            description: self.description.clone(),
            required: self.required,
            choices: self.choices.clone(),
            channel_types: self.channel_types.clone(),
            min_value: self.min_value.clone(),
            max_value: self.max_value.clone(),
            autocomplete: self.autocomplete,
            options: Vec::new(),
        }
    }
}

impl fmt::Debug for CommandOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandOption")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("required", &self.required)
            .field("autocomplete", &self.autocomplete)
            .finish_non_exhaustive()
    }
}
