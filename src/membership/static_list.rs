use super::types::{MembershipSnapshot, NodeName};
use super::MembershipSource;
use crate::common::lock::{rw_read, rw_write};
use crate::common::Result;
use std::sync::RwLock;

const SOURCE: &str = "membership::static_list";

/// A fixed member list, replaceable by an operator.
///
/// Stands in for gossip in static deployments.
#[derive(Debug, Default)]
pub struct StaticMembership {
    members: RwLock<MembershipSnapshot>,
}

impl StaticMembership {
    pub fn new<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeName>,
    {
        Self {
            members: RwLock::new(members.into_iter().collect()),
        }
    }

    /// Replace the member list wholesale
    pub fn set<I, S>(&self, members: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeName>,
    {
        *rw_write(&self.members, SOURCE, "set") = members.into_iter().collect();
    }

    /// Drop one member
    pub fn remove(&self, name: &str) {
        let mut members = rw_write(&self.members, SOURCE, "remove");
        let remaining: MembershipSnapshot = members.iter().filter(|m| *m != name).cloned().collect();
        *members = remaining;
    }
}

impl MembershipSource for StaticMembership {
    fn current_members(&self) -> Result<MembershipSnapshot> {
        Ok(rw_read(&self.members, SOURCE, "current_members").clone())
    }
}
