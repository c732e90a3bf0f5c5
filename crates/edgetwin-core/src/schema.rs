//! # Property Schema
//!
//! Static mapping from remote twin property names to local config keys.
//!
//! ## Lookup Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Desired Property Resolution                         │
//! │                                                                         │
//! │   "Log_Level": "info"                                                  │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   resolve("Log_Level") ──► None ──► UnknownProperty (skip entry)       │
//! │        │                                                                │
//! │        ▼ Some(descriptor)                                               │
//! │   descriptor.parser.parse("info") ──► Err ──► Parse (skip entry)       │
//! │        │                                                                │
//! │        ▼ Ok(value)                                                      │
//! │   config["logLevel"] = value                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The schema is built once at startup and is read-only afterwards. Unknown
//! remote names are a runtime lookup miss, never a panic.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::error::SchemaError;

// =============================================================================
// Value Parsers
// =============================================================================

/// Signature for project-specific parsers.
pub type ParseFn = fn(&Value) -> Result<Value, String>;

/// How a raw desired value is turned into a config value.
#[derive(Clone, Copy)]
pub enum ValueParser {
    /// Use the value exactly as received.
    Passthrough,

    /// Decode a JSON-encoded string. Non-string values pass through.
    Json,

    /// Accept booleans and their string forms.
    Bool,

    /// Accept integers and their string forms.
    Integer,

    /// Accept a string from a fixed set.
    OneOf(&'static [&'static str]),

    /// Project-specific parser.
    Custom(ParseFn),
}

impl ValueParser {
    /// Parses a raw value, returning a human-readable reason on failure.
    pub fn parse(&self, raw: &Value) -> Result<Value, String> {
        match self {
            ValueParser::Passthrough => Ok(raw.clone()),

            ValueParser::Json => match raw {
                Value::String(s) => {
                    serde_json::from_str(s).map_err(|e| format!("invalid JSON: {}", e))
                }
                other => Ok(other.clone()),
            },

            ValueParser::Bool => match raw {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                Value::String(s) => match s.trim().to_lowercase().as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    other => Err(format!("expected a boolean, got '{}'", other)),
                },
                other => Err(format!("expected a boolean, got {}", other)),
            },

            ValueParser::Integer => match raw {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(raw.clone()),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| format!("expected an integer, got '{}'", s)),
                other => Err(format!("expected an integer, got {}", other)),
            },

            ValueParser::OneOf(allowed) => match raw {
                Value::String(s) if allowed.iter().any(|a| *a == s.as_str()) => Ok(raw.clone()),
                other => Err(format!("expected one of {:?}, got {}", allowed, other)),
            },

            ValueParser::Custom(f) => f(raw),
        }
    }
}

impl fmt::Debug for ValueParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueParser::Passthrough => write!(f, "Passthrough"),
            ValueParser::Json => write!(f, "Json"),
            ValueParser::Bool => write!(f, "Bool"),
            ValueParser::Integer => write!(f, "Integer"),
            ValueParser::OneOf(allowed) => write!(f, "OneOf({:?})", allowed),
            ValueParser::Custom(_) => write!(f, "Custom"),
        }
    }
}

// =============================================================================
// Property Descriptor
// =============================================================================

/// One remote property and the config key it drives.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    /// Property name as it appears in the twin (e.g. `Log_Level`).
    pub remote_name: String,

    /// Key in the local config snapshot (e.g. `logLevel`).
    pub config_key: String,

    /// Parser applied to incoming values.
    pub parser: ValueParser,
}

impl PropertyDescriptor {
    /// Creates a descriptor that stores values as received.
    pub fn new(remote_name: impl Into<String>, config_key: impl Into<String>) -> Self {
        PropertyDescriptor {
            remote_name: remote_name.into(),
            config_key: config_key.into(),
            parser: ValueParser::Passthrough,
        }
    }

    /// Replaces the parser.
    pub fn with_parser(mut self, parser: ValueParser) -> Self {
        self.parser = parser;
        self
    }

    /// Parses a raw value with this descriptor's parser.
    pub fn parse(&self, raw: &Value) -> Result<Value, SchemaError> {
        self.parser.parse(raw).map_err(|reason| SchemaError::Parse {
            property: self.remote_name.clone(),
            reason,
        })
    }
}

// =============================================================================
// Property Schema
// =============================================================================

/// Closed table of property descriptors keyed by remote name.
///
/// ## Usage
/// ```rust
/// use edgetwin_core::schema::{PropertyDescriptor, PropertySchema, ValueParser};
/// use serde_json::json;
///
/// let schema = PropertySchema::builder()
///     .property(PropertyDescriptor::new("Log_Level", "logLevel"))
///     .property(PropertyDescriptor::new("Log_Timestamp", "logTimestamp").with_parser(ValueParser::Json))
///     .build()
///     .unwrap();
///
/// assert_eq!(schema.resolve("Log_Level").unwrap().config_key, "logLevel");
/// assert_eq!(schema.parse_value("Log_Timestamp", &json!("true")).unwrap(), json!(true));
/// ```
#[derive(Debug, Clone, Default)]
pub struct PropertySchema {
    descriptors: Vec<PropertyDescriptor>,
    index: HashMap<String, usize>,
}

impl PropertySchema {
    /// Starts a new schema builder.
    pub fn builder() -> PropertySchemaBuilder {
        PropertySchemaBuilder::default()
    }

    /// Builds a schema from descriptors, rejecting duplicates and empty names.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = PropertyDescriptor>,
    ) -> Result<Self, SchemaError> {
        let mut schema = PropertySchema::default();

        for descriptor in descriptors {
            if descriptor.remote_name.is_empty() {
                return Err(SchemaError::InvalidDescriptor(format!(
                    "empty remote name for config key '{}'",
                    descriptor.config_key
                )));
            }
            if descriptor.config_key.is_empty() {
                return Err(SchemaError::InvalidDescriptor(format!(
                    "empty config key for property '{}'",
                    descriptor.remote_name
                )));
            }
            if schema.index.contains_key(&descriptor.remote_name) {
                return Err(SchemaError::DuplicateProperty(descriptor.remote_name));
            }

            schema
                .index
                .insert(descriptor.remote_name.clone(), schema.descriptors.len());
            schema.descriptors.push(descriptor);
        }

        Ok(schema)
    }

    /// Looks up the descriptor for a remote property name.
    pub fn resolve(&self, remote_name: &str) -> Option<&PropertyDescriptor> {
        self.index
            .get(remote_name)
            .map(|&position| &self.descriptors[position])
    }

    /// Parses a raw value for the named property.
    pub fn parse_value(&self, remote_name: &str, raw: &Value) -> Result<Value, SchemaError> {
        self.resolve(remote_name)
            .ok_or_else(|| SchemaError::UnknownProperty(remote_name.to_string()))?
            .parse(raw)
    }

    /// Iterates descriptors in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.descriptors.iter()
    }

    /// Remote property names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|d| d.remote_name.as_str())
    }

    /// Config keys in declaration order.
    pub fn config_keys(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|d| d.config_key.as_str())
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Builder for [`PropertySchema`].
#[derive(Debug, Default)]
pub struct PropertySchemaBuilder {
    descriptors: Vec<PropertyDescriptor>,
}

impl PropertySchemaBuilder {
    /// Adds a descriptor.
    pub fn property(mut self, descriptor: PropertyDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Shorthand for a descriptor with the given parser.
    pub fn map(self, remote_name: &str, config_key: &str, parser: ValueParser) -> Self {
        self.property(PropertyDescriptor::new(remote_name, config_key).with_parser(parser))
    }

    /// Validates and freezes the schema.
    pub fn build(self) -> Result<PropertySchema, SchemaError> {
        PropertySchema::from_descriptors(self.descriptors)
    }
}
