//! Replicated variable store
//!
//! Maps string keys to [`PlayerRecord`]s. Every successful mutation is
//! broadcast to all subscribers as a store event carrying the full record.
//! The store is a plain single-owner struct: callers share it behind one
//! mutex, and holding that lock serializes every operation, which gives each
//! key a single total order of events seen identically by all subscribers.

use crate::error::StoreError;
use crate::outbox::{Outbox, PushOutcome};
use log::{debug, info, warn};
use shared::{ClientId, Field, FieldValue, Packet, PlayerRecord};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct VariableStore {
    variables: BTreeMap<String, PlayerRecord>,
    subscribers: HashMap<ClientId, Arc<Outbox>>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new variable and broadcasts `Created`
    pub fn create(&mut self, key: &str, initial: PlayerRecord) -> Result<(), StoreError> {
        if self.variables.contains_key(key) {
            return Err(StoreError::DuplicateKey(key.to_string()));
        }

        info!("Created variable {}", key);
        self.variables.insert(key.to_string(), initial.clone());
        self.broadcast(Packet::Created {
            key: key.to_string(),
            record: initial,
        });
        Ok(())
    }

    /// Replaces one field, named as on the wire, and broadcasts `Updated`
    /// with the complete record
    pub fn update_field(
        &mut self,
        key: &str,
        field_name: &str,
        value: FieldValue,
    ) -> Result<&PlayerRecord, StoreError> {
        if !self.variables.contains_key(key) {
            return Err(StoreError::UnknownKey(key.to_string()));
        }

        let field = field_name
            .parse::<Field>()
            .map_err(|name| StoreError::InvalidField {
                key: key.to_string(),
                field: name,
                reason: "not a writable record field".to_string(),
            })?;

        self.update(key, field, value)
    }

    pub fn update(
        &mut self,
        key: &str,
        field: Field,
        value: FieldValue,
    ) -> Result<&PlayerRecord, StoreError> {
        let record = self
            .variables
            .get_mut(key)
            .ok_or_else(|| StoreError::UnknownKey(key.to_string()))?;

        record
            .set(field, value)
            .map_err(|rejected| StoreError::InvalidField {
                key: key.to_string(),
                field: field.name().to_string(),
                reason: format!("value of the wrong kind: {:?}", rejected),
            })?;

        debug!("Updated {}.{}", key, field);
        let snapshot = record.clone();
        self.broadcast(Packet::Updated {
            key: key.to_string(),
            record: snapshot,
        });

        self.variables
            .get(key)
            .ok_or_else(|| StoreError::UnknownKey(key.to_string()))
    }

    /// Deletes a variable and broadcasts `Removed`
    pub fn remove(&mut self, key: &str) -> Result<PlayerRecord, StoreError> {
        let record = self
            .variables
            .remove(key)
            .ok_or_else(|| StoreError::UnknownKey(key.to_string()))?;

        info!("Removed variable {}", key);
        self.broadcast(Packet::Removed {
            key: key.to_string(),
        });
        Ok(record)
    }

    pub fn get(&self, key: &str) -> Option<&PlayerRecord> {
        self.variables.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.variables.contains_key(key)
    }

    /// Current variables ordered by key
    pub fn snapshot(&self) -> Vec<(String, PlayerRecord)> {
        self.variables
            .iter()
            .map(|(key, record)| (key.clone(), record.clone()))
            .collect()
    }

    /// Registers a subscriber and replays the current snapshot to it as
    /// `Created` events, so late joiners need no separate bulk sync
    pub fn subscribe(&mut self, client_id: ClientId, outbox: Arc<Outbox>) {
        for (key, record) in &self.variables {
            outbox.push(Packet::Created {
                key: key.clone(),
                record: record.clone(),
            });
        }

        debug!(
            "Client {} subscribed, replayed {} variables",
            client_id,
            self.variables.len()
        );
        self.subscribers.insert(client_id, outbox);
    }

    pub fn unsubscribe(&mut self, client_id: ClientId) -> Option<Arc<Outbox>> {
        self.subscribers.remove(&client_id)
    }

    pub fn is_subscribed(&self, client_id: ClientId) -> bool {
        self.subscribers.contains_key(&client_id)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Enqueues `packet` for every subscriber without waiting on any of them.
    /// Subscribers whose outbox overflowed are dropped here; their connection
    /// tears itself down when it sees the outbox closed.
    fn broadcast(&mut self, packet: Packet) {
        let mut lagging = Vec::new();

        for (client_id, outbox) in &self.subscribers {
            match outbox.push(packet.clone()) {
                PushOutcome::Lagging => lagging.push(*client_id),
                PushOutcome::Closed => lagging.push(*client_id),
                _ => {}
            }
        }

        for client_id in lagging {
            warn!("Dropping subscriber {} that stopped draining events", client_id);
            self.subscribers.remove(&client_id);
        }
    }
}
