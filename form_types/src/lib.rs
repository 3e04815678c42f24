//! Form Types - Foundation Types
//!
//! Pure data structures shared by the template engine seam and the dynamic
//! form. Nothing in here talks to an engine, spawns a task or logs.
//!
//! ## Contents
//!
//! - Variable kinds and descriptors (what the engine reports)
//! - The parameter map (what the user has entered)
//! - Execution results and agreements (opaque engine output)
//! - Typed values returned by engine validation
//! - Snapshots and field changes exchanged with hosts
//!
//! ## Rules
//!
//! 1. **NO ENGINE LOGIC** - engines live behind the `TemplateEngine` trait
//! 2. **SERIALIZABLE** - every type supports serde so hosts can ship state around
//! 3. **CHEAP TO CLONE** - execution payloads are reference counted

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// VARIABLE KINDS AND DESCRIPTORS
// ============================================================================

/// Declared type of a template variable.
///
/// The set is closed for dispatch purposes; engine type names this crate does
/// not know about are carried verbatim in `Other` and rendered with the
/// default text input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VariableKind {
    #[default]
    Text,
    Number,
    YesNo,
    Date,
    DateTime,
    Identity,
    Other(String),
}

impl VariableKind {
    /// Parse an engine type name. Matching ignores case and surrounding space.
    pub fn parse(name: &str) -> Self {
        let trimmed = name.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "text" => VariableKind::Text,
            "number" => VariableKind::Number,
            "yesno" => VariableKind::YesNo,
            "date" => VariableKind::Date,
            "datetime" => VariableKind::DateTime,
            "identity" => VariableKind::Identity,
            _ => VariableKind::Other(trimmed.to_string()),
        }
    }

    /// Canonical engine type name
    pub fn as_str(&self) -> &str {
        match self {
            VariableKind::Text => "Text",
            VariableKind::Number => "Number",
            VariableKind::YesNo => "YesNo",
            VariableKind::Date => "Date",
            VariableKind::DateTime => "DateTime",
            VariableKind::Identity => "Identity",
            VariableKind::Other(name) => name,
        }
    }

    /// Whether a calendar input for this kind carries a time of day
    pub fn enables_time(&self) -> bool {
        matches!(self, VariableKind::DateTime)
    }
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for VariableKind {
    fn from(value: String) -> Self {
        VariableKind::parse(&value)
    }
}

impl From<VariableKind> for String {
    fn from(kind: VariableKind) -> Self {
        kind.as_str().to_string()
    }
}

/// A variable reached during the last execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDescriptor {
    pub name: String,
    pub kind: VariableKind,
    pub is_required: bool,
}

impl VariableDescriptor {
    pub fn new(name: impl Into<String>, kind: VariableKind) -> Self {
        Self {
            name: name.into(),
            kind,
            is_required: false,
        }
    }

    /// Mark the descriptor as required
    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    /// Name with every non-alphanumeric character replaced by `-`, for use in
    /// element ids and class names.
    pub fn clean_name(&self) -> String {
        self.name
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect()
    }
}

// ============================================================================
// PARAMETER MAP
// ============================================================================

/// Variable name to raw value.
///
/// A key set to `None` stays present: that is how a cleared field is
/// distinguished from one the user never touched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterMap {
    values: BTreeMap<String, Option<String>>,
}

impl ParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one key, replacing any previous value
    pub fn set(&mut self, name: impl Into<String>, value: Option<String>) {
        self.values.insert(name.into(), value);
    }

    /// Current value, `None` when absent or cleared
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(|v| v.as_deref())
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// True when the key is present with no value
    pub fn is_cleared(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(None))
    }

    /// Only the keys carrying a value
    pub fn defined(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .filter_map(|(k, v)| v.as_deref().map(|v| (k.as_str(), v)))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParameterMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = ParameterMap::new();
        for (k, v) in iter {
            map.set(k, Some(v.into()));
        }
        map
    }
}

// ============================================================================
// ENGINE OUTPUT
// ============================================================================

/// Opaque engine state produced by one execution.
///
/// Immutable once built; clones share the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    payload: Arc<serde_json::Value>,
}

impl ExecutionResult {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload: Arc::new(payload),
        }
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }
}

/// Context handed to the engine alongside the parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub values: BTreeMap<String, String>,
}

/// A renderable contract document derived from an execution result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agreement {
    pub title: String,
    pub payload: serde_json::Value,
}

/// A party identified by email, as encoded in an identity canonical value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "id")]
    pub user_id: String,
    pub email: String,
}

/// Value accepted by engine validation, decoded according to its kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum TypedValue {
    Text(String),
    Number(f64),
    YesNo(bool),
    /// Epoch milliseconds, UTC
    Date(i64),
    /// Epoch milliseconds, UTC
    DateTime(i64),
    Identity(Identity),
    Other(String),
}

// ============================================================================
// HOST-FACING EXCHANGE
// ============================================================================

/// State published after every successful recompute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSnapshot {
    pub execution_result: ExecutionResult,
    pub parameters: ParameterMap,
    pub variables: Vec<VariableDescriptor>,
}

impl FormSnapshot {
    /// Names of the variables in descriptor order
    pub fn variable_names(&self) -> Vec<&str> {
        self.variables.iter().map(|v| v.name.as_str()).collect()
    }
}

/// A change accepted by an input adapter, `None` clearing the field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub name: String,
    pub value: Option<String>,
}

impl FieldChange {
    pub fn set(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn clear(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}
