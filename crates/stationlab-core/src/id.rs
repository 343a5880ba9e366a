use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a lab on a vessel.
    pub struct LabId;

    /// Identifies an experiment storage container on a vessel.
    pub struct StorageId;
}

/// Where an experiment record currently lives. Records keep this as a weak
/// back-reference: the holder owns the record, never the other way round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Holder {
    /// A storage container (experiment is STORED or FINISHED/FINALIZED).
    Storage(StorageId),
    /// The equipment unit installed in `slot` of `lab`.
    Lab { lab: LabId, slot: usize },
}

impl Holder {
    /// Whether this holder is a lab slot.
    pub fn is_lab(&self) -> bool {
        matches!(self, Holder::Lab { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn holders_compare_by_value() {
        let mut labs = SlotMap::<LabId, ()>::with_key();
        let lab = labs.insert(());
        let a = Holder::Lab { lab, slot: 0 };
        let b = Holder::Lab { lab, slot: 0 };
        let c = Holder::Lab { lab, slot: 1 };
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.is_lab());
    }

    #[test]
    fn storage_holder_is_not_lab() {
        let mut storages = SlotMap::<StorageId, ()>::with_key();
        let id = storages.insert(());
        assert!(!Holder::Storage(id).is_lab());
    }

    #[test]
    fn holders_are_hashable() {
        use std::collections::HashSet;
        let mut storages = SlotMap::<StorageId, ()>::with_key();
        let a = storages.insert(());
        let b = storages.insert(());
        let set: HashSet<Holder> = [Holder::Storage(a), Holder::Storage(b), Holder::Storage(a)]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
    }
}
