//! The persisted-resource abstraction and live action status.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Progress of the action currently (or last) operating on a resource.
///
/// Rendered on the resource for API consumers and persisted with the record
/// after every completed procedure step, so an interrupted procedure can
/// resume at the first step that has not completed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionStatus {
    pub description: String,
    pub max_retries: u32,
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub steps_completed: usize,
    /// The retry budget is spent; the action no longer runs but still holds
    /// its resource until cleared or preempted.
    #[serde(default)]
    pub failed: bool,
}

impl ActionStatus {
    pub fn new(description: impl Into<String>, max_retries: u32) -> Self {
        Self {
            description: description.into(),
            max_retries,
            ..Default::default()
        }
    }

    /// Returns true if no retries remain.
    pub fn retries_exhausted(&self) -> bool {
        self.retries >= self.max_retries
    }
}

/// A record kept in the resource store and targeted by actions.
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Store namespace for this record type, e.g. `"node"`.
    const KIND: &'static str;

    /// Stable identifier, used as the action registry key.
    fn id(&self) -> &str;

    /// Persisted action status, if any.
    fn status(&self) -> Option<&ActionStatus>;

    fn set_status(&mut self, status: Option<ActionStatus>);
}

/// Generate a fresh resource identifier.
pub fn new_resource_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retries_exhausted() {
        let mut status = ActionStatus::new("provisioning", 2);
        assert!(!status.retries_exhausted());
        status.retries = 2;
        assert!(status.retries_exhausted());

        assert!(ActionStatus::new("deploying", 0).retries_exhausted());
    }

    #[test]
    fn test_status_json_omits_empty_error() {
        let status = ActionStatus::new("deleting", 5);
        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["max_retries"], 5);
    }
}
