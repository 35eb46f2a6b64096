//! Lease (survival time) extension planning.

/// What to do with an extension request once the backend has quoted a fresh
/// lease duration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtensionPlan {
    /// The gain over the believed expiry is below the debounce threshold.
    Skip { gain: i64 },
    /// Extend the backend lease by `extension_secs` and persist `new_expiry`.
    Extend { new_expiry: i64, extension_secs: i64 },
}

/// Guards applied to asynchronous lease extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeaseExtension {
    /// Minimum gain, in seconds, worth a backend call and a store write.
    pub debounce_secs: i64,
}

impl LeaseExtension {
    pub fn new(debounce_secs: i64) -> Self {
        Self { debounce_secs }
    }

    /// A lease believed to have ended is never resurrected.
    pub fn is_stale(&self, believed_expiry: i64, now: i64) -> bool {
        believed_expiry < now
    }

    /// Plan an extension from a fresh lease quote of `lease_secs` at `now`.
    pub fn plan(&self, believed_expiry: i64, now: i64, lease_secs: u64) -> ExtensionPlan {
        let lease = i64::try_from(lease_secs).unwrap_or(i64::MAX);
        let candidate = now.saturating_add(lease);
        let gain = candidate.saturating_sub(believed_expiry);
        if gain < self.debounce_secs {
            ExtensionPlan::Skip { gain }
        } else {
            ExtensionPlan::Extend {
                new_expiry: candidate,
                extension_secs: gain,
            }
        }
    }
}
