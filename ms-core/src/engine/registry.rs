//! Capability registry
//!
//! The set of vendor class names still worth probing. It starts from the known
//! list and only shrinks: a name whose class cannot be resolved on this host is
//! dropped for the lifetime of the registry. An emptied registry is reseeded on
//! the next pass.

use tracing::debug;

use crate::constants::probing::KNOWN_CLASS_NAMES;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityRegistry {
    /// `None` is the "probe through the handle's own class" entry
    names: Vec<Option<String>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self { names: seed() }
    }

    /// Refill from the known list when every name has been pruned
    pub fn ensure_seeded(&mut self) {
        if self.names.is_empty() {
            self.names = seed();
        }
    }

    /// Forget a class name that failed to resolve
    pub fn prune(&mut self, name: &str) {
        let before = self.names.len();
        self.names.retain(|n| n.as_deref() != Some(name));
        if self.names.len() != before {
            debug!(class = name, "Pruned unresolvable class");
        }
    }

    pub fn class_names(&self) -> &[Option<String>] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.as_deref() == Some(name))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Drop every entry; the next pass reseeds
    pub fn clear(&mut self) {
        self.names.clear();
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn seed() -> Vec<Option<String>> {
    KNOWN_CLASS_NAMES.iter().map(|n| n.map(String::from)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_is_monotonic() {
        let mut registry = CapabilityRegistry::new();
        let full = registry.len();
        registry.prune("android.telephony.MSimTelephonyManager");
        registry.prune("android.telephony.MSimTelephonyManager");
        assert_eq!(registry.len(), full - 1);
        assert!(!registry.contains("android.telephony.MSimTelephonyManager"));
        assert_eq!(registry.class_names()[0], None);
    }

    #[test]
    fn test_reseed_only_when_empty() {
        let mut registry = CapabilityRegistry::new();
        registry.prune("android.telephony.TelephonyManager");
        registry.ensure_seeded();
        assert!(!registry.contains("android.telephony.TelephonyManager"));

        registry.clear();
        assert!(registry.is_empty());
        registry.ensure_seeded();
        assert!(registry.contains("android.telephony.TelephonyManager"));
    }
}
