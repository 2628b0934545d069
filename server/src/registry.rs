use std::collections::HashMap;

use protocol::{Connection, ConnectionId};

// prefix of every line in the USERS listing
pub const USERS_MARKER: &str = "> ";

pub struct RegistryEntry {
    pub connection: Connection,
    pub name: String,
}

/// Live, named connections. Names are unique across entries; that is
/// enforced by [`Registry::insert`], not by the map itself.
#[derive(Default)]
pub struct Registry {
    entries: HashMap<ConnectionId, RegistryEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries.contains_key(&id)
    }

    // exact, case sensitive match
    pub fn contains_name(&self, name: &str) -> bool {
        self.entries.values().any(|entry| entry.name == name)
    }

    pub fn name_of(&self, id: ConnectionId) -> Option<&str> {
        self.entries.get(&id).map(|entry| entry.name.as_str())
    }

    // Follows HashSet insert semantics returning bool, e.g.
    // false if the connection is already registered or the name is taken
    pub fn insert(&mut self, connection: Connection, name: String) -> bool {
        if self.contains(connection.id()) || self.contains_name(&name) {
            return false;
        }

        self.entries.insert(connection.id(), RegistryEntry { connection, name });
        true
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<RegistryEntry> {
        self.entries.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.values().map(|entry| entry.name.clone()).collect();
        names.sort();
        names
    }

    // one marker-prefixed name per line, ascending
    pub fn users_listing(&self) -> String {
        self.names()
            .iter()
            .map(|name| format!("{USERS_MARKER}{name}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn drain(&mut self) -> impl Iterator<Item = RegistryEntry> + '_ {
        self.entries.drain().map(|(_, entry)| entry)
    }
}
