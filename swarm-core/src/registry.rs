//! Tracker registry: live peers in join order, each with the host's connection handle.
//!
//! The registry holds no lock itself. The tracker keeps it behind one mutex and builds each
//! broadcast from `broadcast_payload` inside the same critical section as the mutation.

use crate::protocol::{self, PeerAddr, PeerRecord};

/// Result of `Registry::register`.
#[derive(Debug)]
pub enum Registered<H> {
    Added,
    /// A peer with the same advertised address is already registered; the new handle is
    /// handed back untouched.
    Duplicate(H),
}

/// Ordered peer registry. No two entries share an address.
#[derive(Debug)]
pub struct Registry<H> {
    entries: Vec<(PeerRecord, H)>,
}

impl<H> Registry<H> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append a peer unless its address is already present.
    pub fn register(&mut self, record: PeerRecord, handle: H) -> Registered<H> {
        if self.contains(&record.addr) {
            return Registered::Duplicate(handle);
        }
        self.entries.push((record, handle));
        Registered::Added
    }

    /// Remove a peer by address, returning its record and handle so the caller can close it.
    pub fn remove(&mut self, addr: &PeerAddr) -> Option<(PeerRecord, H)> {
        let pos = self.entries.iter().position(|(r, _)| r.addr == *addr)?;
        Some(self.entries.remove(pos))
    }

    pub fn contains(&self, addr: &PeerAddr) -> bool {
        self.entries.iter().any(|(r, _)| r.addr == *addr)
    }

    /// Current records in join order.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.entries.iter().map(|(r, _)| r.clone()).collect()
    }

    /// Encoded snapshot, ready to send to every handle.
    pub fn broadcast_payload(&self) -> Vec<u8> {
        protocol::encode_broadcast(&self.snapshot())
    }

    pub fn handles(&self) -> impl Iterator<Item = &H> {
        self.entries.iter().map(|(_, h)| h)
    }

    /// Remove everything (shutdown path).
    pub fn drain(&mut self) -> Vec<(PeerRecord, H)> {
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self::new()
    }
}
