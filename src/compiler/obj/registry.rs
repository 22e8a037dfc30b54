//! A label-indexed store of every object in a compilation unit.
//!
//! Objects live in an arena and are referenced by stable [`ObjectId`]
//! handles; the label index sits on top of the arena. Iteration follows
//! insertion order, which the emitter relies on for deterministic output.

use std::collections::HashMap;

use log::debug;

use crate::compiler::error::RegistryError;

use super::object::Object;

/// Stable handle to an [`Object`] in the [`Registry`] arena.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
pub struct ObjectId(usize);

impl ObjectId {
    pub fn new(id: usize) -> ObjectId {
        ObjectId(id)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("${}", self.0))
    }
}

/// All the objects of one compilation unit.
#[derive(Debug)]
pub struct Registry {
    objects: Vec<Option<Object>>,
    index: HashMap<String, ObjectId>,
    /// Set when the dead-code pass has run over every routine
    dead_pass: bool,
    /// Reserved for the constant propagation pass, which does not exist yet
    const_pass: bool,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            objects: vec![],
            index: HashMap::new(),
            dead_pass: false,
            const_pass: false,
        }
    }

    /// Register an object under its label. Fails if the label is taken or if
    /// a non-temporary has no label.
    pub fn add(&mut self, obj: Object) -> Result<ObjectId, RegistryError> {
        if !obj.named() {
            if !obj.is_temp() {
                return Err(RegistryError::Unnamed);
            }
            return Ok(self.alloc(obj));
        }

        if self.index.contains_key(obj.label()) {
            return Err(RegistryError::Duplicate(obj.label().into()));
        }

        let label = obj.label().to_string();
        let id = self.alloc(obj);
        self.index.insert(label, id);
        Ok(id)
    }

    /// Place an object in the arena without indexing its label. Used for
    /// structure members and other objects whose names are not unit-scoped.
    pub fn alloc(&mut self, obj: Object) -> ObjectId {
        let id = ObjectId::new(self.objects.len());
        self.objects.push(Some(obj));
        id
    }

    /// Find an object by its label.
    pub fn find(&self, label: &str) -> Result<ObjectId, RegistryError> {
        self.index
            .get(label)
            .copied()
            .ok_or_else(|| RegistryError::NotFound(label.into()))
    }

    pub fn get(&self, id: ObjectId) -> &Object {
        self.objects[id.index()]
            .as_ref()
            .expect("dangling object handle")
    }

    pub fn get_mut(&mut self, id: ObjectId) -> &mut Object {
        self.objects[id.index()]
            .as_mut()
            .expect("dangling object handle")
    }

    /// Remove an object by its label. Used exclusively by the dead-code
    /// eliminator to discard dead temporaries.
    pub fn remove(&mut self, label: &str) -> Result<Object, RegistryError> {
        let id = self.find(label)?;
        self.index.remove(label);
        debug!("registry: removed {}", label);
        Ok(self.objects[id.index()].take().expect("dangling object handle"))
    }

    /// Remove an unnamed object by its handle.
    pub fn remove_id(&mut self, id: ObjectId) -> Option<Object> {
        if let Some(obj) = &self.objects[id.index()] {
            if obj.named() {
                self.index.remove(obj.label());
            }
        }
        self.objects[id.index()].take()
    }

    /// All live objects, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &Object)> {
        self.objects
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|obj| (ObjectId::new(i), obj)))
    }

    /// Handles of all live objects, in insertion order. Useful when a pass
    /// needs to mutate the registry while walking it.
    pub fn ids(&self) -> Vec<ObjectId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Whether this handle's object owns its label in the unit-level index.
    /// Arena-only objects (structure members, parameter blocks) do not.
    pub fn is_indexed(&self, id: ObjectId) -> bool {
        match &self.objects[id.index()] {
            Some(obj) => self.index.get(obj.label()) == Some(&id),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dead_pass_complete(&self) -> bool {
        self.dead_pass
    }

    pub fn set_dead_pass_complete(&mut self) {
        self.dead_pass = true;
    }

    pub fn const_pass_complete(&self) -> bool {
        self.const_pass
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}
