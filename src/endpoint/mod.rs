#[cfg(test)]
mod endpoint_test;

use crate::association::Association;
use crate::config::{SocketConfig, TransportConfig};
use crate::factory::ChunkFactory;
use crate::queue::ulp_queue::UlpQueue;
use crate::shared::{AssociationId, Transmit};

use fxhash::FxHashMap;
use log::trace;
use slab::Slab;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// Internal identifier for an `Association` currently registered with an endpoint
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct AssociationHandle(pub usize);

impl From<AssociationHandle> for usize {
    fn from(x: AssociationHandle) -> usize {
        x.0
    }
}

impl fmt::Display for AssociationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The registry of associations owned by one socket, plus everything a
/// transition function may consult besides the association itself
pub struct Endpoint {
    local_port: u16,
    config: Arc<TransportConfig>,
    factory: Arc<dyn ChunkFactory>,
    ulpq: UlpQueue,

    associations: Slab<Association>,
    /// Identifies associations by the verification tag peers put in packets
    ///
    /// Uses a cheaper hash function since keys are locally created
    association_ids: FxHashMap<AssociationId, AssociationHandle>,
    /// Identifies associations by peer transport address
    association_addrs: HashMap<SocketAddr, AssociationHandle>,

    pub(crate) transmits: VecDeque<Transmit>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Endpoint")
            .field("local_port", &self.local_port)
            .field("config", &self.config)
            .field("associations", &self.associations.len())
            .field("association_ids", &self.association_ids)
            .field("association_addrs", &self.association_addrs)
            .field("transmits", &self.transmits.len())
            .finish()
    }
}

impl Endpoint {
    pub(crate) fn new(config: &SocketConfig, factory: Arc<dyn ChunkFactory>, ulpq: UlpQueue) -> Self {
        Endpoint {
            local_port: config.local_port,
            config: Arc::clone(&config.transport),
            factory,
            ulpq,
            associations: Slab::new(),
            association_ids: FxHashMap::default(),
            association_addrs: HashMap::new(),
            transmits: VecDeque::new(),
        }
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn config(&self) -> &Arc<TransportConfig> {
        &self.config
    }

    pub fn factory(&self) -> &dyn ChunkFactory {
        self.factory.as_ref()
    }

    pub(crate) fn factory_handle(&self) -> Arc<dyn ChunkFactory> {
        Arc::clone(&self.factory)
    }

    pub fn ulpq(&self) -> &UlpQueue {
        &self.ulpq
    }

    /// Get the next packet to transmit
    #[must_use]
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.transmits.pop_front()
    }

    pub(crate) fn add_association(&mut self, mut association: Association) -> AssociationHandle {
        let entry = self.associations.vacant_entry();
        let handle = AssociationHandle(entry.key());
        association.handle = handle;
        trace!("[{}] registered as {}", association.name, handle);
        entry.insert(association);
        handle
    }

    /// Make the association reachable by its verification tag and every
    /// peer address. Idempotent.
    pub(crate) fn hash(&mut self, handle: AssociationHandle) {
        let Some(a) = self.associations.get(handle.0) else {
            return;
        };
        self.association_ids.insert(a.id(), handle);
        for t in a.transports() {
            self.association_addrs.insert(t.addr(), handle);
        }
    }

    pub(crate) fn unhash(&mut self, handle: AssociationHandle) {
        self.association_ids.retain(|_, h| *h != handle);
        self.association_addrs.retain(|_, h| *h != handle);
    }

    pub(crate) fn remove_association(&mut self, handle: AssociationHandle) -> Option<Association> {
        self.unhash(handle);
        self.associations.try_remove(handle.0)
    }

    pub fn association(&self, handle: AssociationHandle) -> Option<&Association> {
        self.associations.get(handle.0)
    }

    pub(crate) fn association_mut(&mut self, handle: AssociationHandle) -> Option<&mut Association> {
        self.associations.get_mut(handle.0)
    }

    /// Borrow an association together with the transmit queue it flushes into
    pub(crate) fn association_and_transmits(
        &mut self,
        handle: AssociationHandle,
    ) -> Option<(&mut Association, &mut VecDeque<Transmit>)> {
        let a = self.associations.get_mut(handle.0)?;
        Some((a, &mut self.transmits))
    }

    pub fn lookup_by_tag(&self, tag: AssociationId) -> Option<AssociationHandle> {
        self.association_ids.get(&tag).copied()
    }

    pub fn lookup_by_addr(&self, addr: &SocketAddr) -> Option<AssociationHandle> {
        self.association_addrs.get(addr).copied()
    }

    pub fn handles(&self) -> impl Iterator<Item = AssociationHandle> + '_ {
        self.associations.iter().map(|(k, _)| AssociationHandle(k))
    }

    pub fn association_count(&self) -> usize {
        self.associations.len()
    }
}
