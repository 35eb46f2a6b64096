//! Cache-aside reuse decision for inference instances.
//!
//! Given every stored record for one fingerprint, decide whether a caller may
//! reuse a running instance, must wait for one being provisioned, should see
//! an allocation error, or should create a new instance.

use crate::instance::{InstanceId, InstanceRecord, InstanceState};

/// Outcome of consulting the policy for one fingerprint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReuseDecision {
    /// A record carries an allocation error. First one in store order wins.
    Failed { id: InstanceId, message: String },
    /// A running instance with at least the minimum survival margin left.
    Reusable {
        id: InstanceId,
        access_url: Option<String>,
        expiry: i64,
    },
    /// An instance is still being provisioned; callers wait for it.
    Provisioning { id: InstanceId },
    /// The freshest lease ends inside the survival margin (or already ended)
    /// and nothing is being provisioned to replace it.
    Expiring {
        id: InstanceId,
        access_url: Option<String>,
        expiry: i64,
    },
    /// No usable record for the fingerprint.
    Absent,
}

impl ReuseDecision {
    /// Whether the caller gets an answer without creating anything.
    pub fn has_result(&self) -> bool {
        matches!(
            self,
            Self::Failed { .. } | Self::Reusable { .. } | Self::Provisioning { .. }
        )
    }

    pub fn instance_id(&self) -> Option<InstanceId> {
        match self {
            Self::Failed { id, .. }
            | Self::Reusable { id, .. }
            | Self::Provisioning { id }
            | Self::Expiring { id, .. } => Some(*id),
            Self::Absent => None,
        }
    }
}

/// Pure reuse policy parameterised by the lifecycle configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReusePolicy {
    /// Lease margin below which an instance is not handed out.
    pub min_survival_secs: i64,
    /// Age after which a still-pending record is considered abandoned.
    pub provisioning_timeout_secs: i64,
}

impl ReusePolicy {
    pub fn new(min_survival_secs: i64, provisioning_timeout_secs: i64) -> Self {
        Self {
            min_survival_secs,
            provisioning_timeout_secs,
        }
    }

    /// Whether a lease ending at `expiry` can still be offered at `now`.
    pub fn lease_is_reusable(&self, expiry: i64, now: i64) -> bool {
        now < expiry && now.saturating_add(self.min_survival_secs) <= expiry
    }

    /// Decide over `records` in store order.
    pub fn decide(&self, records: &[InstanceRecord], now: i64) -> ReuseDecision {
        let mut latest: Option<(&InstanceRecord, i64)> = None;
        let mut provisioning: Option<&InstanceRecord> = None;

        for record in records {
            match &record.state {
                InstanceState::Failed { message } => {
                    return ReuseDecision::Failed {
                        id: record.id(),
                        message: message.clone(),
                    };
                }
                InstanceState::Ready { expiry, .. } => {
                    if latest.is_none_or(|(_, best)| *expiry > best) {
                        latest = Some((record, *expiry));
                    }
                }
                InstanceState::Pending => {
                    let abandoned = now.saturating_sub(record.created_at)
                        >= self.provisioning_timeout_secs;
                    if !abandoned && provisioning.is_none() {
                        provisioning = Some(record);
                    }
                }
            }
        }

        if let Some((record, expiry)) = latest
            && self.lease_is_reusable(expiry, now)
        {
            return ReuseDecision::Reusable {
                id: record.id(),
                access_url: record.state.access_url().map(str::to_string),
                expiry,
            };
        }

        if let Some(record) = provisioning {
            return ReuseDecision::Provisioning { id: record.id() };
        }

        match latest {
            Some((record, expiry)) => ReuseDecision::Expiring {
                id: record.id(),
                access_url: record.state.access_url().map(str::to_string),
                expiry,
            },
            None => ReuseDecision::Absent,
        }
    }
}
