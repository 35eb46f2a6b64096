//! One-way lifecycle messages exchanged between the coordinator and the
//! asynchronous consumers.

use crate::instance::{InstanceId, InstanceInfo};
use serde::{Deserialize, Serialize};

/// Request to extend the lease of a reused instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionRequest {
    pub instance: InstanceInfo,
    /// Expiry the sender believed current when the request was sent.
    pub believed_expiry: i64,
}

/// Messages published on the lifecycle channel. Delivery is at-least-once
/// and there is no response path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A freshly inserted record needs a backend allocation.
    ProvisioningRequested { instance: InstanceInfo },
    /// A reused instance should have its lease extended.
    ExtensionRequested(ExtensionRequest),
}

impl LifecycleEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProvisioningRequested { .. } => "provisioning_requested",
            Self::ExtensionRequested(_) => "extension_requested",
        }
    }

    pub fn instance_id(&self) -> InstanceId {
        match self {
            Self::ProvisioningRequested { instance } => instance.id,
            Self::ExtensionRequested(req) => req.instance.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::InstanceId;
    use crate::project::{Account, CommitHash, Fingerprint, ProjectId, ProjectRef};

    #[test]
    fn test_event_wire_tag() {
        let info = InstanceInfo {
            id: InstanceId::new(),
            fingerprint: Fingerprint::new(
                ProjectRef::new(
                    Account::parse("alice").unwrap(),
                    ProjectId::parse("p1").unwrap(),
                ),
                CommitHash::parse("abc123").unwrap(),
            ),
            project_name: "demo".to_string(),
            resource_level: None,
            requester: Account::parse("bob").unwrap(),
        };
        let event = LifecycleEvent::ExtensionRequested(ExtensionRequest {
            instance: info.clone(),
            believed_expiry: 1000,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "extension_requested");
        assert_eq!(json["believed_expiry"], 1000);
        assert_eq!(event.instance_id(), info.id);
        assert_eq!(event.kind(), "extension_requested");
    }
}
