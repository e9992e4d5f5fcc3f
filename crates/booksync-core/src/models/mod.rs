use std::{collections::BTreeMap, sync::Arc};

use crate::{frame::Frame, value::Guid};

pub mod query;

/// A persistable entity in the engine's object graph.
///
/// `version` counts commits accepted by storage; zero means never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub guid: Guid,
    pub id_type: Arc<str>,
    pub version: i32,
    pub dirty: bool,
    pub destroying: bool,
    slots: Frame,
}

impl Instance {
    pub fn new(id_type: &str) -> Self {
        Self::with_guid(id_type, Guid::new_v4())
    }

    pub fn with_guid(id_type: &str, guid: Guid) -> Self {
        Self {
            guid,
            id_type: Arc::from(id_type),
            version: 0,
            dirty: true,
            destroying: false,
            slots: Frame::new(),
        }
    }

    pub fn slots(&self) -> &Frame {
        &self.slots
    }

    /// Mutable access to the metadata frame; marks the instance dirty.
    pub fn slots_mut(&mut self) -> &mut Frame {
        self.dirty = true;
        &mut self.slots
    }

    pub fn is_new(&self) -> bool {
        self.version == 0
    }

    pub fn mark_destroyed(&mut self) {
        self.destroying = true;
        self.dirty = true;
    }

    /// Copy of this instance as it should sit in storage at `version`.
    pub fn stored_copy(&self, version: i32) -> Self {
        let mut copy = self.clone();
        copy.version = version;
        copy.dirty = false;
        copy.destroying = false;
        copy
    }
}

/// Root of an object graph: every instance the engine currently holds in memory.
#[derive(Debug, Clone, Default)]
pub struct Book {
    pub guid: Guid,
    pub version: i32,
    instances: BTreeMap<Guid, Instance>,
}

impl Book {
    pub fn new() -> Self {
        Self::with_guid(Guid::new_v4())
    }

    pub fn with_guid(guid: Guid) -> Self {
        Self {
            guid,
            version: 0,
            instances: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, instance: Instance) -> Option<Instance> {
        self.instances.insert(instance.guid, instance)
    }

    pub fn get(&self, guid: &Guid) -> Option<&Instance> {
        self.instances.get(guid)
    }

    pub fn get_mut(&mut self, guid: &Guid) -> Option<&mut Instance> {
        self.instances.get_mut(guid)
    }

    pub fn remove(&mut self, guid: &Guid) -> Option<Instance> {
        self.instances.remove(guid)
    }

    pub fn contains(&self, guid: &Guid) -> bool {
        self.instances.contains_key(guid)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn guids(&self) -> Vec<Guid> {
        self.instances.keys().copied().collect()
    }

    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    pub fn collection<'a>(&'a self, id_type: &'a str) -> impl Iterator<Item = &'a Instance> + 'a {
        self.instances
            .values()
            .filter(move |i| i.id_type.as_ref() == id_type)
    }
}
