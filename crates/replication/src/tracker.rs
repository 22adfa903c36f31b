//! The tracker: rendezvous table and founder election.
//!
//! The tracker knows the board parameters and a set of member addresses. It
//! does not know who the primary is; a joining node asks any member it gets
//! from the tracker for that. Its only coordination duty is
//! `try_become_primary`, the compare-and-set that lets exactly one of several
//! concurrent founders start the session.

use async_trait::async_trait;
use corelib::{
    MemberAddress, MemberId, Service, TrackerApi, TrackerInfo, TrackerRequest, TrackerResponse,
    TransportError,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug)]
pub struct Tracker {
    dim: usize,
    treasures: usize,
    /// Keyed by id so a restarted member replaces its old address.
    members: Mutex<BTreeMap<MemberId, MemberAddress>>,
}

impl Tracker {
    /// Create a tracker for a `dim × dim` board with `treasures` treasures.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the board cannot hold the treasures and at least one
    /// player.
    pub fn new(dim: usize, treasures: usize) -> corelib::Result<Self> {
        if dim == 0 || treasures + 1 > dim * dim {
            return Err(corelib::Error::InvalidConfig(format!(
                "{} treasures do not leave room for a player on a {}x{} board",
                treasures, dim, dim
            )));
        }
        Ok(Self {
            dim,
            treasures,
            members: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn treasures(&self) -> usize {
        self.treasures
    }

    /// Board parameters plus the first known member, if any.
    pub fn info(&self) -> TrackerInfo {
        TrackerInfo {
            dim: self.dim,
            treasures: self.treasures,
            contact: self.members.lock().values().next().cloned(),
        }
    }

    /// Idempotent insert.
    pub fn add(&self, addr: MemberAddress) {
        debug!(member = %addr, "tracker add");
        self.members.lock().insert(addr.id.clone(), addr);
    }

    /// Idempotent remove. Only removes the entry if it still points at `addr`,
    /// so a stale removal cannot evict a restarted member.
    pub fn remove(&self, addr: &MemberAddress) {
        let mut members = self.members.lock();
        if members.get(&addr.id) == Some(addr) {
            members.remove(&addr.id);
            debug!(member = %addr, "tracker remove");
        }
    }

    /// Insert `addr` only if no member is known. Check and insert happen
    /// under one lock.
    pub fn try_become_primary(&self, addr: MemberAddress) -> bool {
        let mut members = self.members.lock();
        if !members.is_empty() {
            return false;
        }
        info!(member = %addr, "founding member admitted");
        members.insert(addr.id.clone(), addr);
        true
    }

    /// Snapshot of the known members, in id order.
    pub fn members(&self) -> Vec<MemberAddress> {
        self.members.lock().values().cloned().collect()
    }
}

#[async_trait]
impl TrackerApi for Tracker {
    async fn get_info(&self) -> Result<TrackerInfo, TransportError> {
        Ok(self.info())
    }

    async fn add_member(&self, addr: MemberAddress) -> Result<(), TransportError> {
        self.add(addr);
        Ok(())
    }

    async fn remove_member(&self, addr: MemberAddress) -> Result<(), TransportError> {
        self.remove(&addr);
        Ok(())
    }

    async fn try_become_primary(&self, addr: MemberAddress) -> Result<bool, TransportError> {
        Ok(Tracker::try_become_primary(self, addr))
    }
}

#[async_trait]
impl Service<TrackerRequest, TrackerResponse> for Tracker {
    async fn handle(&self, request: TrackerRequest) -> TrackerResponse {
        match request {
            TrackerRequest::GetInfo => TrackerResponse::Info(self.info()),
            TrackerRequest::AddMember(addr) => {
                self.add(addr);
                TrackerResponse::Ack
            }
            TrackerRequest::RemoveMember(addr) => {
                self.remove(&addr);
                TrackerResponse::Ack
            }
            TrackerRequest::TryBecomePrimary(addr) => {
                TrackerResponse::Primary(Tracker::try_become_primary(self, addr))
            }
        }
    }
}
