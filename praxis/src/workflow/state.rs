use crate::core::{fingerprint, CoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Typed state threaded through a workflow's nodes.
///
/// The persisted form carries [`WorkflowState::SCHEMA_VERSION`]. Evolve a
/// state type by adding fields with `#[serde(default)]` and bumping the
/// version; runs persisted by older binaries are loaded through
/// [`WorkflowState::migrate`].
///
/// # Example
///
/// ```
/// use praxis::workflow::WorkflowState;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Default, Serialize, Deserialize)]
/// struct Triage {
///     labels: Vec<String>,
///     #[serde(default)]
///     assignee: Option<String>, // added in v2
/// }
///
/// enum TriageDelta {
///     Label(String),
///     Assign(String),
/// }
///
/// impl WorkflowState for Triage {
///     type Delta = TriageDelta;
///     const SCHEMA_VERSION: u32 = 2;
///
///     fn apply(&mut self, delta: TriageDelta) {
///         match delta {
///             TriageDelta::Label(label) => self.labels.push(label),
///             TriageDelta::Assign(who) => self.assignee = Some(who),
///         }
///     }
/// }
///
/// let v1 = serde_json::json!({"labels": ["bug"]});
/// let state = Triage::migrate(1, v1).unwrap();
/// assert!(state.assignee.is_none());
/// ```
pub trait WorkflowState: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// What a node returns to change the state.
    type Delta: Send + 'static;

    const SCHEMA_VERSION: u32 = 1;

    fn apply(&mut self, delta: Self::Delta);

    /// Loads state persisted under an older schema version.
    ///
    /// The default relies on additive fields with serde defaults and
    /// refuses blobs written by a newer schema.
    fn migrate(from_version: u32, data: Value) -> Result<Self, CoreError> {
        if from_version > Self::SCHEMA_VERSION {
            return Err(CoreError::SchemaMigration {
                from: from_version,
                to: Self::SCHEMA_VERSION,
                reason: "state was written by a newer schema".to_string(),
            });
        }
        serde_json::from_value(data).map_err(|e| CoreError::SchemaMigration {
            from: from_version,
            to: Self::SCHEMA_VERSION,
            reason: e.to_string(),
        })
    }

    /// Short account of the work done so far, attached to failure reports.
    fn summary(&self) -> String {
        String::new()
    }
}

/// Persisted, versioned form of a [`WorkflowState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateBlob {
    pub schema_version: u32,
    pub data: Value,
}

impl StateBlob {
    pub fn encode<S: WorkflowState>(state: &S) -> Result<Self, CoreError> {
        Ok(Self {
            schema_version: S::SCHEMA_VERSION,
            data: serde_json::to_value(state).map_err(CoreError::Serialization)?,
        })
    }

    /// Stable hash of the encoded state.
    pub fn fingerprint(&self) -> u64 {
        fingerprint(self.data.to_string().as_bytes())
    }

    pub fn decode<S: WorkflowState>(&self) -> Result<S, CoreError> {
        if self.schema_version == S::SCHEMA_VERSION {
            S::deserialize(&self.data).map_err(CoreError::Deserialization)
        } else {
            S::migrate(self.schema_version, self.data.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        count: u32,
    }

    impl WorkflowState for Counter {
        type Delta = u32;

        fn apply(&mut self, delta: u32) {
            self.count += delta;
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct CounterV2 {
        count: u32,
        #[serde(default)]
        history: Vec<u32>,
    }

    impl WorkflowState for CounterV2 {
        type Delta = u32;
        const SCHEMA_VERSION: u32 = 2;

        fn apply(&mut self, delta: u32) {
            self.count += delta;
            self.history.push(delta);
        }
    }

    #[test]
    fn test_blob_round_trip() {
        let blob = StateBlob::encode(&Counter { count: 3 }).unwrap();
        assert_eq!(blob.schema_version, 1);
        assert_eq!(blob.decode::<Counter>().unwrap(), Counter { count: 3 });
    }

    #[test]
    fn test_older_blob_migrates_with_defaults() {
        let blob = StateBlob::encode(&Counter { count: 7 }).unwrap();
        let upgraded: CounterV2 = blob.decode().unwrap();
        assert_eq!(upgraded.count, 7);
        assert!(upgraded.history.is_empty());
    }

    #[test]
    fn test_newer_blob_is_rejected() {
        let blob = StateBlob {
            schema_version: 2,
            data: json!({"count": 1, "history": [1]}),
        };
        assert!(matches!(
            blob.decode::<Counter>(),
            Err(CoreError::SchemaMigration { from: 2, to: 1, .. })
        ));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = StateBlob::encode(&Counter { count: 3 }).unwrap();
        let b = StateBlob::encode(&Counter { count: 3 }).unwrap();
        let c = StateBlob::encode(&Counter { count: 4 }).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
