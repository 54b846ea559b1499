//! Membership & discovery
//!
//! Produces eventually-consistent snapshots of the reachable cluster nodes.
//! The gossip implementation keeps its member table private; callers only
//! read snapshots and join.

pub mod gossip;
pub mod static_list;
pub mod types;

pub use gossip::GossipMembership;
pub use static_list::StaticMembership;
pub use types::{members_changed, GossipMessage, Member, MembershipSnapshot, NodeName, NodeState};

use crate::common::Result;

/// Source of membership snapshots read by the reconciliation loop.
///
/// Must not block; a failed read is transient and retried on the next tick.
pub trait MembershipSource: Send + Sync + 'static {
    fn current_members(&self) -> Result<MembershipSnapshot>;
}
