use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tracing::debug;

use crate::address::{AddressKey, ConnectionKey, RoutingAddress};

use super::connection::{ConnectionHandle, ConnectionId};

/// Bookkeeping for the conversations and connections of one transport.
///
/// Both maps live behind a single mutex. Critical sections never await, so the lock is only held
/// for a handful of map operations at a time.
#[derive(Debug, Default)]
pub(crate) struct ConnectionRegistry {
    state: Mutex<RegistryState>,
}

#[derive(Debug, Default)]
struct RegistryState {
    addresses: HashMap<AddressKey, AddressEntry>,
    connections: HashMap<ConnectionKey, ConnectionHandle>,
}

#[derive(Debug)]
struct AddressEntry {
    routing: RoutingAddress,
    connection: ConnectionKey,
    connection_id: ConnectionId,
}

impl RegistryState {
    fn record(&mut self, address_key: AddressKey, routing: RoutingAddress, handle: &ConnectionHandle) {
        self.addresses.insert(
            address_key,
            AddressEntry {
                routing,
                connection: handle.key().clone(),
                connection_id: handle.id(),
            },
        );
    }
}

impl ConnectionRegistry {
    pub(crate) fn new() -> Self {
        ConnectionRegistry::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the routing address last used for a conversation.
    pub(crate) fn lookup(&self, address_key: &AddressKey) -> Option<RoutingAddress> {
        self.lock()
            .addresses
            .get(address_key)
            .map(|entry| entry.routing.clone())
    }

    /// Returns the live connection registered under `key`.
    pub(crate) fn get(&self, key: &ConnectionKey) -> Option<ConnectionHandle> {
        self.lock()
            .connections
            .get(key)
            .filter(|handle| handle.is_live())
            .cloned()
    }

    /// Returns the live connection registered under `key`, recording the conversation against it.
    pub(crate) fn reuse(
        &self,
        key: &ConnectionKey,
        address_key: &AddressKey,
        routing: &RoutingAddress,
    ) -> Option<ConnectionHandle> {
        let mut state = self.lock();
        let handle = state
            .connections
            .get(key)
            .filter(|handle| handle.is_live())
            .cloned()?;
        state.record(address_key.clone(), routing.clone(), &handle);
        Some(handle)
    }

    /// Publishes a freshly dialed connection.
    ///
    /// If another live connection was published under the same key in the meantime, the registry
    /// is left untouched and the existing connection is returned as the error, with the
    /// conversation recorded against it instead. A dead connection still awaiting eviction is
    /// replaced.
    pub(crate) fn publish(
        &self,
        handle: &ConnectionHandle,
        address_key: &AddressKey,
        routing: &RoutingAddress,
    ) -> Result<(), ConnectionHandle> {
        let mut state = self.lock();
        if let Some(existing) = state.connections.get(handle.key()) {
            if existing.is_live() {
                let existing = existing.clone();
                state.record(address_key.clone(), routing.clone(), &existing);
                return Err(existing);
            }
        }

        state
            .connections
            .insert(handle.key().clone(), handle.clone());
        state.record(address_key.clone(), routing.clone(), handle);
        Ok(())
    }

    /// Removes the connection `id` and every conversation routed over it.
    ///
    /// Entries which have since been taken over by another connection are left alone. Returns
    /// `true` if the connection itself was still registered.
    pub(crate) fn evict(&self, id: ConnectionId, key: &ConnectionKey) -> bool {
        let mut state = self.lock();
        let removed = match state.connections.get(key) {
            Some(handle) if handle.id() == id => {
                state.connections.remove(key);
                true
            }
            _ => false,
        };

        let before = state.addresses.len();
        state
            .addresses
            .retain(|_, entry| entry.connection_id != id || entry.connection != *key);
        let addresses = before - state.addresses.len();

        debug!(connection = %key, %id, removed, addresses, "evicted connection");
        removed
    }

    /// Counts live connections. Ones already closing but not yet evicted are left out, matching
    /// what `get` and `reuse` hand out.
    pub(crate) fn connection_count(&self) -> usize {
        self.lock()
            .connections
            .values()
            .filter(|handle| handle.is_live())
            .count()
    }

    pub(crate) fn address_count(&self) -> usize {
        self.lock().addresses.len()
    }

    pub(crate) fn connections(&self) -> Vec<ConnectionHandle> {
        self.lock().connections.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::{error::CloseReason, transport::connection::ConnectionState};

    use super::*;

    fn routing(authority: &str, session: &str) -> RoutingAddress {
        RoutingAddress::new(
            format!("msrp://{authority}/{session};tcp"),
            "msrp://localhost:8881/71f1vpJTi3rhgHUHj;tcp",
        )
    }

    fn handle(routing: &RoutingAddress) -> ConnectionHandle {
        let key = routing.connection_key().unwrap();
        let (handle, _rx) = ConnectionHandle::detached(key, routing.clone());
        handle
    }

    #[test]
    fn reuse_records_additional_conversations() {
        let registry = ConnectionRegistry::new();
        let alice = AddressKey::new("+8210", "+8211");
        let bob = AddressKey::new("+8210", "+8212");
        let first = routing("10.0.0.1:9670", "a");
        let second = routing("10.0.0.1:9670", "b");

        let conn = handle(&first);
        registry.publish(&conn, &alice, &first).unwrap();

        let reused = registry
            .reuse(conn.key(), &bob, &second)
            .expect("live connection");
        assert_eq!(reused.id(), conn.id());
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.address_count(), 2);
        assert_eq!(registry.lookup(&bob), Some(second));
        assert_eq!(registry.lookup(&alice), Some(first));
    }

    #[test]
    fn publish_loses_to_live_connection() {
        let registry = ConnectionRegistry::new();
        let alice = AddressKey::new("+8210", "+8211");
        let bob = AddressKey::new("+8210", "+8212");
        let route = routing("10.0.0.1:9670", "a");

        let winner = handle(&route);
        let loser = handle(&route);
        registry.publish(&winner, &alice, &route).unwrap();

        let existing = registry.publish(&loser, &bob, &route).unwrap_err();
        assert_eq!(existing.id(), winner.id());
        assert_eq!(registry.get(winner.key()).unwrap().id(), winner.id());
        assert_eq!(registry.address_count(), 2);
    }

    #[test]
    fn publish_replaces_dead_connection() {
        let registry = ConnectionRegistry::new();
        let alice = AddressKey::new("+8210", "+8211");
        let route = routing("10.0.0.1:9670", "a");

        let dead = handle(&route);
        registry.publish(&dead, &alice, &route).unwrap();
        assert!(dead.close(CloseReason::EndOfStream));
        assert_eq!(dead.state(), ConnectionState::Closing);
        assert!(registry.get(dead.key()).is_none());
        assert!(registry.reuse(dead.key(), &alice, &route).is_none());

        let fresh = handle(&route);
        registry.publish(&fresh, &alice, &route).unwrap();
        assert_eq!(registry.get(fresh.key()).unwrap().id(), fresh.id());

        // Teardown of the old connection must not remove its replacement.
        assert!(!registry.evict(dead.id(), dead.key()));
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.lookup(&alice), Some(route));
    }

    #[test]
    fn evict_removes_connection_and_its_conversations() {
        let registry = ConnectionRegistry::new();
        let alice = AddressKey::new("+8210", "+8211");
        let bob = AddressKey::new("+8210", "+8212");
        let carol = AddressKey::new("+8210", "+8213");
        let shared = routing("10.0.0.1:9670", "a");
        let other = routing("10.0.0.2:9670", "c");

        let conn = handle(&shared);
        let other_conn = handle(&other);
        registry.publish(&conn, &alice, &shared).unwrap();
        registry.reuse(conn.key(), &bob, &shared).unwrap();
        registry.publish(&other_conn, &carol, &other).unwrap();

        assert!(registry.evict(conn.id(), conn.key()));
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.address_count(), 1);
        assert_eq!(registry.lookup(&alice), None);
        assert_eq!(registry.lookup(&bob), None);
        assert_eq!(registry.lookup(&carol), Some(other));

        assert!(!registry.evict(conn.id(), conn.key()));
    }

    #[test]
    fn closing_connections_are_not_counted() {
        let registry = ConnectionRegistry::new();
        let alice = AddressKey::new("+8210", "+8211");
        let route = routing("10.0.0.1:9670", "a");

        let conn = handle(&route);
        registry.publish(&conn, &alice, &route).unwrap();
        assert_eq!(registry.connection_count(), 1);

        conn.close(CloseReason::EndOfStream);
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.connections().len(), 1);
    }

    #[test]
    fn lookup_of_unknown_conversation_is_none() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.lookup(&AddressKey::new("+8210", "+8211")), None);
        assert!(registry.connections().is_empty());
    }
}
