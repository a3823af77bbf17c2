//! Local read-only copy of the server's replicated variables
//!
//! The mirror applies store events in arrival order and tells a
//! [`Presentation`] which remote cars to spawn, move or despawn. The entry
//! for the local client's own key is mirrored too, but it is never presented
//! as a remote car and never smoothed, since the local car is driven by
//! input.

use crate::interpolation::Smoothing;
use log::{debug, info};
use shared::{player_key, ClientId, Packet, PlayerRecord, Vec3};
use std::collections::BTreeMap;

/// One mirrored variable: the latest server value plus what is on screen
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorEntry {
    /// Latest record received from the server
    pub target: PlayerRecord,
    pub presented_position: Vec3,
    pub presented_rotation: Vec3,
}

impl MirrorEntry {
    /// Entry whose presented state equals the target
    pub fn snapped(record: PlayerRecord) -> Self {
        Self {
            presented_position: record.position,
            presented_rotation: record.rotation,
            target: record,
        }
    }

    /// Record as it should be drawn this frame
    pub fn presented(&self) -> PlayerRecord {
        PlayerRecord {
            position: self.presented_position,
            rotation: self.presented_rotation,
            ..self.target.clone()
        }
    }
}

/// Receives visual lifecycle callbacks for remote cars
pub trait Presentation {
    fn spawn(&mut self, key: &str, entry: &MirrorEntry);
    fn update(&mut self, key: &str, entry: &MirrorEntry);
    fn despawn(&mut self, key: &str);
}

/// Headless presentation that ignores every callback
impl Presentation for () {
    fn spawn(&mut self, _key: &str, _entry: &MirrorEntry) {}
    fn update(&mut self, _key: &str, _entry: &MirrorEntry) {}
    fn despawn(&mut self, _key: &str) {}
}

#[derive(Debug, Default)]
pub struct ClientMirror {
    local_id: Option<ClientId>,
    entries: BTreeMap<String, MirrorEntry>,
}

impl ClientMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_id(&self) -> Option<ClientId> {
        self.local_id
    }

    pub fn own_key(&self) -> Option<String> {
        self.local_id.map(player_key)
    }

    pub fn is_own(&self, key: &str) -> bool {
        self.local_id.map_or(false, |id| player_key(id) == key)
    }

    /// Applies one server packet. Packets that are not store events or an
    /// id assignment are ignored.
    pub fn apply<P: Presentation>(&mut self, packet: Packet, view: &mut P) {
        match packet {
            Packet::AssignId { client_id } => self.assign_id(client_id, view),
            Packet::Created { key, record } => self.create(key, record, view),
            Packet::Updated { key, record } => self.update(key, record, view),
            Packet::Removed { key } => self.remove(&key, view),
            other => debug!("Mirror ignoring {:?}", other),
        }
    }

    fn assign_id<P: Presentation>(&mut self, client_id: ClientId, view: &mut P) {
        info!("Assigned client id {}", client_id);
        self.local_id = Some(client_id);

        let key = player_key(client_id);
        if self.entries.contains_key(&key) {
            // Was shown as a remote car before we knew it was ours
            view.despawn(&key);
        }
    }

    fn create<P: Presentation>(&mut self, key: String, record: PlayerRecord, view: &mut P) {
        let entry = MirrorEntry::snapped(record);
        if !self.is_own(&key) {
            if self.entries.contains_key(&key) {
                view.despawn(&key);
            }
            view.spawn(&key, &entry);
        }
        debug!("Mirrored {}", key);
        self.entries.insert(key, entry);
    }

    fn update<P: Presentation>(&mut self, key: String, record: PlayerRecord, view: &mut P) {
        let own = self.is_own(&key);
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.target = record;
                if own {
                    entry.presented_position = entry.target.position;
                    entry.presented_rotation = entry.target.rotation;
                } else {
                    view.update(&key, entry);
                }
            }
            // The event carries the full record, so it can stand in for the
            // Created we never saw
            None => self.create(key, record, view),
        }
    }

    fn remove<P: Presentation>(&mut self, key: &str, view: &mut P) {
        if self.entries.remove(key).is_some() {
            if !self.is_own(key) {
                view.despawn(key);
            }
            debug!("Unmirrored {}", key);
        }
    }

    /// Advances every remote entry one frame toward its target
    pub fn interpolate<P: Presentation>(&mut self, smoothing: &Smoothing, dt: f32, view: &mut P) {
        let own_key = self.own_key();
        for (key, entry) in self.entries.iter_mut() {
            if Some(key) == own_key.as_ref() {
                continue;
            }
            smoothing.step(entry, dt);
            view.update(key, entry);
        }
    }

    /// Forgets everything, despawning every remote car
    pub fn clear<P: Presentation>(&mut self, view: &mut P) {
        let own_key = self.own_key();
        for key in self.entries.keys() {
            if Some(key) != own_key.as_ref() {
                view.despawn(key);
            }
        }
        self.entries.clear();
        self.local_id = None;
    }

    pub fn get(&self, key: &str) -> Option<&MirrorEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Entries of every other client, ordered by key
    pub fn remote_entries(&self) -> impl Iterator<Item = (&String, &MirrorEntry)> {
        let own_key = self.own_key();
        self.entries
            .iter()
            .filter(move |(key, _)| Some(*key) != own_key.as_ref())
    }

    /// The server's view of the local client's own variable
    pub fn own_record(&self) -> Option<&PlayerRecord> {
        let key = self.own_key()?;
        self.entries.get(&key).map(|entry| &entry.target)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
