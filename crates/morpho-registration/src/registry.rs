//! Owner of fitted deformation fields.
//!
//! Samples store a [`FieldHandle`] under their field key; the field itself
//! lives here. The reference aligner hands the same handle to a reference
//! sample and its full-resolution counterpart.

use morpho_core::FieldHandle;

use crate::error::{RegistrationError, Result};

/// Append-only store of fitted fields.
#[derive(Debug, Clone)]
pub struct FieldRegistry<F> {
    fields: Vec<F>,
}

impl<F> Default for FieldRegistry<F> {
    fn default() -> Self {
        Self { fields: Vec::new() }
    }
}

impl<F> FieldRegistry<F> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a field and return its handle.
    pub fn insert(&mut self, field: F) -> FieldHandle {
        self.fields.push(field);
        FieldHandle::new(self.fields.len() - 1)
    }

    /// Look up a field.
    pub fn get(&self, handle: FieldHandle) -> Result<&F> {
        self.fields
            .get(handle.index())
            .ok_or(RegistrationError::UnknownField(handle.index()))
    }

    /// Number of stored fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no field has been stored.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields in insertion order, i.e. pair order.
    pub fn iter(&self) -> impl Iterator<Item = &F> {
        self.fields.iter()
    }
}
