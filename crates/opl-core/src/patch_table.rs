//! An append-only, deduplicating list of patches.

use crate::patch::Patch;

/// Instrument table built up during a parse run and handed off to `Music`
/// on completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchTable {
    patches: Vec<Patch>,
}

impl PatchTable {
    pub fn new() -> Self {
        PatchTable::default()
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Patch> {
        self.patches.get(index)
    }

    /// Linear search for a semantically-equal patch; append on miss.
    ///
    /// O(n) per insert, which is fine — songs carry tens of patches, not
    /// thousands.
    pub fn find_or_append(&mut self, patch: Patch) -> u32 {
        if let Some(idx) = self.patches.iter().position(|p| p.equals(&patch)) {
            return idx as u32;
        }
        self.patches.push(patch);
        (self.patches.len() - 1) as u32
    }

    pub fn into_vec(self) -> Vec<Patch> {
        self.patches
    }

    pub fn as_slice(&self) -> &[Patch] {
        &self.patches
    }
}
