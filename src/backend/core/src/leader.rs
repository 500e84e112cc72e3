//! Leader-election seam.
//!
//! Election itself is owned by the host; the engine only asks whether this
//! instance currently leads before doing cluster-wide work.

use std::sync::atomic::{AtomicBool, Ordering};

pub trait LeaderElection: Send + Sync {
    fn is_this_instance_the_leader(&self) -> bool;
}

/// Leadership decided by configuration or flipped by the host.
#[derive(Debug)]
pub struct StaticLeaderElection {
    leader: AtomicBool,
}

impl StaticLeaderElection {
    pub fn new(leader: bool) -> Self {
        Self {
            leader: AtomicBool::new(leader),
        }
    }

    pub fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
    }
}

impl LeaderElection for StaticLeaderElection {
    fn is_this_instance_the_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_leader_toggle() {
        let election = StaticLeaderElection::new(false);
        assert!(!election.is_this_instance_the_leader());
        election.set_leader(true);
        assert!(election.is_this_instance_the_leader());
    }
}
