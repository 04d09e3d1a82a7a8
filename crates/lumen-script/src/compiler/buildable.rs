//! The compiler's output before baking.

use rustc_hash::FxHashMap;

use crate::bytecode::{Instruction, Label, StaticObject};

/// Deduplicating pool of static objects.
///
/// Ids are pool indices in insertion order, so the same sequence of
/// `intern` calls always yields the same ids.
#[derive(Debug, Clone, Default)]
pub struct StaticPool {
    objects: Vec<StaticObject>,
    index: FxHashMap<StaticObject, u32>,
}

impl StaticPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an object, returning the id of an equal one if already present.
    pub fn intern(&mut self, object: StaticObject) -> u32 {
        if let Some(id) = self.index.get(&object) {
            return *id;
        }
        let id = self.objects.len() as u32;
        self.index.insert(object.clone(), id);
        self.objects.push(object);
        id
    }

    /// Returns an object by id.
    pub fn get(&self, id: u32) -> Option<&StaticObject> {
        self.objects.get(id as usize)
    }

    /// Objects in id order.
    pub fn iter(&self) -> impl Iterator<Item = &StaticObject> {
        self.objects.iter()
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// A symbolic instruction stream with its labels and statics.
#[derive(Debug, Clone, Default)]
pub struct Buildable {
    instructions: Vec<Instruction<Label>>,
    /// Instruction index each label is placed before
    labels: Vec<Option<usize>>,
    statics: StaticPool,
}

impl Buildable {
    /// Creates an empty buildable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an instruction and returns its index.
    pub fn emit(&mut self, instruction: Instruction<Label>) -> usize {
        let index = self.instructions.len();
        self.instructions.push(instruction);
        index
    }

    /// Allocates a label that is not yet placed.
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.labels.len() as u32);
        self.labels.push(None);
        label
    }

    /// Places `label` before the next emitted instruction.
    pub fn place(&mut self, label: Label) {
        if let Some(slot) = self.labels.get_mut(label.0 as usize) {
            *slot = Some(self.instructions.len());
        }
    }

    /// Index of the instruction a label points at. May equal the
    /// instruction count for a label placed at the very end.
    pub fn label_position(&self, label: Label) -> Option<usize> {
        self.labels.get(label.0 as usize).copied().flatten()
    }

    /// The emitted instructions.
    pub fn instructions(&self) -> &[Instruction<Label>] {
        &self.instructions
    }

    /// The static pool.
    pub fn statics(&self) -> &StaticPool {
        &self.statics
    }

    /// Interns a static object.
    pub fn intern(&mut self, object: StaticObject) -> u32 {
        self.statics.intern(object)
    }
}
