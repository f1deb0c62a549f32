//! Ordered, name-unique port containers.
//!
//! Every operator has an input bank and an output bank; every subprocess
//! unit has inner sources and inner sinks. A bank keeps its members in a
//! stable order (the iteration order hosts see) and a name index in
//! lock-step, the same discipline the graph applies to operator names.

use crate::error::{PortError, PortResult};
use crate::graph::id::{ExtenderId, OperatorId, PortId, UnitId};
use crate::graph::port::PortDirection;
use std::collections::HashMap;

/// Addresses one port bank in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BankRef {
    OpInputs(OperatorId),
    OpOutputs(OperatorId),
    UnitSources(UnitId),
    UnitSinks(UnitId),
}

impl BankRef {
    /// The direction of every port in this bank.
    #[inline]
    pub fn direction(self) -> PortDirection {
        match self {
            BankRef::OpInputs(_) | BankRef::UnitSinks(_) => PortDirection::Input,
            BankRef::OpOutputs(_) | BankRef::UnitSources(_) => PortDirection::Output,
        }
    }
}

/// One side's port container.
#[derive(Debug, Default)]
pub struct PortBank {
    members: Vec<PortId>,
    by_name: HashMap<String, PortId>,
    extenders: Vec<ExtenderId>,
}

impl PortBank {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members in container order.
    #[inline]
    pub fn members(&self) -> &[PortId] {
        &self.members
    }

    pub fn find(&self, name: &str) -> Option<PortId> {
        self.by_name.get(name).copied()
    }

    #[inline]
    pub fn contains(&self, id: PortId) -> bool {
        self.members.contains(&id)
    }

    /// Extenders observing this bank.
    pub(crate) fn extenders(&self) -> &[ExtenderId] {
        &self.extenders
    }

    pub(crate) fn attach_extender(&mut self, id: ExtenderId) {
        if !self.extenders.contains(&id) {
            self.extenders.push(id);
        }
    }

    pub(crate) fn detach_extender(&mut self, id: ExtenderId) {
        self.extenders.retain(|e| *e != id);
    }

    pub(crate) fn insert(&mut self, name: &str, id: PortId) -> PortResult<()> {
        if self.by_name.contains_key(name) {
            return Err(PortError::DuplicateName {
                name: name.to_string(),
            });
        }
        self.by_name.insert(name.to_string(), id);
        self.members.push(id);
        Ok(())
    }

    pub(crate) fn rename(&mut self, id: PortId, from: &str, to: &str) -> PortResult<()> {
        if from == to {
            return Ok(());
        }
        if !self.contains(id) {
            return Err(PortError::ForeignPort {
                port: from.to_string(),
            });
        }
        if self.by_name.contains_key(to) {
            return Err(PortError::DuplicateName {
                name: to.to_string(),
            });
        }
        self.by_name.remove(from);
        self.by_name.insert(to.to_string(), id);
        Ok(())
    }

    /// Move a port to the end of the container order. Extenders use this to
    /// keep the spare free port last.
    pub(crate) fn push_down(&mut self, id: PortId) -> PortResult<()> {
        let Some(pos) = self.members.iter().position(|m| *m == id) else {
            return Err(PortError::ForeignPort {
                port: format!("{id:?}"),
            });
        };
        let member = self.members.remove(pos);
        self.members.push(member);
        Ok(())
    }

    pub(crate) fn remove_entry(&mut self, id: PortId, name: &str) -> PortResult<()> {
        let Some(pos) = self.members.iter().position(|m| *m == id) else {
            return Err(PortError::ForeignPort {
                port: name.to_string(),
            });
        };
        self.members.remove(pos);
        self.by_name.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> PortId {
        PortId::new(n, 0)
    }

    #[test]
    fn test_insert_keeps_order() {
        let mut bank = PortBank::new();
        bank.insert("a", id(0)).unwrap();
        bank.insert("b", id(1)).unwrap();
        bank.insert("c", id(2)).unwrap();

        assert_eq!(bank.members(), &[id(0), id(1), id(2)]);
        assert_eq!(bank.find("b"), Some(id(1)));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut bank = PortBank::new();
        bank.insert("in 1", id(0)).unwrap();
        let err = bank.insert("in 1", id(1)).unwrap_err();
        assert!(matches!(err, PortError::DuplicateName { .. }));
        assert_eq!(bank.len(), 1);
    }

    #[test]
    fn test_rename_updates_index() {
        let mut bank = PortBank::new();
        bank.insert("old", id(0)).unwrap();
        bank.rename(id(0), "old", "new").unwrap();

        assert_eq!(bank.find("new"), Some(id(0)));
        assert!(bank.find("old").is_none());

        // Renaming to the current name is a no-op.
        bank.rename(id(0), "new", "new").unwrap();
        assert_eq!(bank.find("new"), Some(id(0)));
    }

    #[test]
    fn test_rename_collision_rejected() {
        let mut bank = PortBank::new();
        bank.insert("a", id(0)).unwrap();
        bank.insert("b", id(1)).unwrap();
        let err = bank.rename(id(0), "a", "b").unwrap_err();
        assert!(matches!(err, PortError::DuplicateName { .. }));
        assert_eq!(bank.find("a"), Some(id(0)));
    }

    #[test]
    fn test_push_down_moves_to_end() {
        let mut bank = PortBank::new();
        bank.insert("a", id(0)).unwrap();
        bank.insert("b", id(1)).unwrap();
        bank.insert("c", id(2)).unwrap();

        bank.push_down(id(0)).unwrap();
        assert_eq!(bank.members(), &[id(1), id(2), id(0)]);
    }

    #[test]
    fn test_foreign_port_rejected() {
        let mut bank = PortBank::new();
        bank.insert("a", id(0)).unwrap();

        assert!(matches!(
            bank.push_down(id(9)),
            Err(PortError::ForeignPort { .. })
        ));
        assert!(matches!(
            bank.remove_entry(id(9), "ghost"),
            Err(PortError::ForeignPort { .. })
        ));
    }

    #[test]
    fn test_remove_entry() {
        let mut bank = PortBank::new();
        bank.insert("a", id(0)).unwrap();
        bank.insert("b", id(1)).unwrap();

        bank.remove_entry(id(0), "a").unwrap();
        assert_eq!(bank.members(), &[id(1)]);
        assert!(bank.find("a").is_none());
    }
}
