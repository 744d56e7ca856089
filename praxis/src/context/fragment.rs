use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Level of the hierarchy a fragment describes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextScope {
    Goal,
    Step,
    Delegation,
    Artifact,
    Custom(String),
}

impl ContextScope {
    pub fn as_str(&self) -> &str {
        match self {
            ContextScope::Goal => "goal",
            ContextScope::Step => "step",
            ContextScope::Delegation => "delegation",
            ContextScope::Artifact => "artifact",
            ContextScope::Custom(name) => name,
        }
    }

    /// Storage key segment. Custom scopes live under `custom:` so a custom
    /// scope named like a built-in one cannot overwrite it.
    pub(crate) fn key_segment(&self) -> Cow<'_, str> {
        match self {
            ContextScope::Custom(name) => Cow::Owned(format!("custom:{}", name)),
            builtin => Cow::Borrowed(builtin.as_str()),
        }
    }
}

impl fmt::Display for ContextScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ContextScope {
    fn from(s: &str) -> Self {
        match s {
            "goal" => ContextScope::Goal,
            "step" => ContextScope::Step,
            "delegation" => ContextScope::Delegation,
            "artifact" => ContextScope::Artifact,
            other => ContextScope::Custom(other.to_string()),
        }
    }
}

/// A complete fragment: summary plus (optionally) its detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextFragment {
    pub task_id: String,
    pub scope: ContextScope,
    pub scope_key: String,
    pub summary: String,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The cheap half of a fragment, as returned by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub scope_key: String,
    pub summary: String,
    pub has_detail: bool,
    pub created_at: DateTime<Utc>,
}

/// Persisted summary record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredSummary {
    pub scope_key: String,
    pub summary: String,
    pub has_detail: bool,
    pub created_at: DateTime<Utc>,
}

impl From<StoredSummary> for SummaryEntry {
    fn from(stored: StoredSummary) -> Self {
        Self {
            scope_key: stored.scope_key,
            summary: stored.summary,
            has_detail: stored.has_detail,
            created_at: stored.created_at,
        }
    }
}
