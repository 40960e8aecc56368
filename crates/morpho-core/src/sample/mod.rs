//! Sample type: one spatial transcriptomics section.
//!
//! A sample combines named coordinate slots, an expression matrix (primary
//! or named layer), categorical per-point annotations and an auxiliary store
//! for pipeline outputs. Samples are plain values: the alignment pipeline
//! clones them on entry and writes only into its own copies.

mod categorical;

pub use categorical::{Categorical, MISSING_CODE};

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{CoreError, Result};

/// Well-known coordinate slot names written by the aligners.
pub mod slots {
    /// Rigid-only alignment of the raw coordinates.
    pub const RIGID: &str = "Rigid_align_spatial";
    /// Rigid component produced during pairwise registration.
    pub const COARSE: &str = "Coarse_alignment";
    /// Running best coordinates; the chain registers against these.
    pub const OPTIMAL: &str = "optimal_RnA";
}

/// Lookup key for a deformation field owned by a field registry.
///
/// Samples never own fitted fields; they only remember where to find one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldHandle(usize);

impl FieldHandle {
    /// Wrap a registry index.
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// The registry index.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Auxiliary per-sample outputs.
#[derive(Debug, Clone)]
pub enum UnsValue<B: Backend> {
    /// Handle to a fitted deformation field.
    Field(FieldHandle),
    /// Coordinates after each solver iteration.
    History(Vec<Tensor<B, 2>>),
}

/// One spatial transcriptomics section.
///
/// # Type Parameters
/// * `B` - The burn backend holding coordinates and features
#[derive(Debug, Clone)]
pub struct Sample<B: Backend> {
    name: String,
    /// Primary expression matrix `[n_points, n_genes]`.
    x: Tensor<B, 2>,
    /// Gene names, one per column of `x` and of every layer.
    var_names: Vec<String>,
    /// Alternate expression representations.
    layers: BTreeMap<String, Tensor<B, 2>>,
    /// Coordinate slots `[n_points, d]`.
    obsm: BTreeMap<String, Tensor<B, 2>>,
    /// Categorical annotations.
    obs: BTreeMap<String, Categorical>,
    uns: BTreeMap<String, UnsValue<B>>,
}

impl<B: Backend> Sample<B> {
    /// Create a sample from its raw coordinates and primary expression matrix.
    ///
    /// # Arguments
    /// * `name` - Identifier used in logs and errors
    /// * `spatial_key` - Slot name for the raw coordinates
    /// * `coords` - `[n_points, d]` coordinates
    /// * `x` - `[n_points, n_genes]` expression
    /// * `var_names` - One name per gene column
    pub fn new(
        name: impl Into<String>,
        spatial_key: &str,
        coords: Tensor<B, 2>,
        x: Tensor<B, 2>,
        var_names: Vec<String>,
    ) -> Result<Self> {
        let name = name.into();
        let [n_points, _] = coords.dims();
        let [x_rows, x_cols] = x.dims();

        if x_rows != n_points {
            return Err(CoreError::dimension_mismatch(format!(
                "sample '{}': {} coordinates but {} expression rows",
                name, n_points, x_rows
            )));
        }
        if x_cols != var_names.len() {
            return Err(CoreError::dimension_mismatch(format!(
                "sample '{}': {} expression columns but {} gene names",
                name,
                x_cols,
                var_names.len()
            )));
        }

        let mut obsm = BTreeMap::new();
        obsm.insert(spatial_key.to_string(), coords);

        Ok(Self {
            name,
            x,
            var_names,
            layers: BTreeMap::new(),
            obsm,
            obs: BTreeMap::new(),
            uns: BTreeMap::new(),
        })
    }

    /// Add a named expression layer.
    pub fn with_layer(mut self, name: impl Into<String>, layer: Tensor<B, 2>) -> Result<Self> {
        let name = name.into();
        if layer.dims() != self.x.dims() {
            return Err(CoreError::dimension_mismatch(format!(
                "layer '{}' has shape {:?}, expected {:?}",
                name,
                layer.dims(),
                self.x.dims()
            )));
        }
        self.layers.insert(name, layer);
        Ok(self)
    }

    /// Add a categorical annotation.
    pub fn with_label(mut self, key: impl Into<String>, labels: Categorical) -> Result<Self> {
        let key = key.into();
        if labels.len() != self.n_points() {
            return Err(CoreError::dimension_mismatch(format!(
                "annotation '{}' has {} values for {} points",
                key,
                labels.len(),
                self.n_points()
            )));
        }
        self.obs.insert(key, labels);
        Ok(self)
    }

    /// Sample identifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of points.
    pub fn n_points(&self) -> usize {
        self.x.dims()[0]
    }

    /// Gene names.
    pub fn var_names(&self) -> &[String] {
        &self.var_names
    }

    /// Primary expression matrix.
    pub fn x(&self) -> &Tensor<B, 2> {
        &self.x
    }

    /// Named expression layer.
    pub fn layer(&self, name: &str) -> Result<&Tensor<B, 2>> {
        self.layers.get(name).ok_or_else(|| CoreError::MissingLayer {
            sample: self.name.clone(),
            layer: name.to_string(),
        })
    }

    /// Coordinates stored under `key`.
    pub fn obsm(&self, key: &str) -> Result<&Tensor<B, 2>> {
        self.obsm
            .get(key)
            .ok_or_else(|| CoreError::missing_slot(&self.name, key))
    }

    /// Whether a coordinate slot exists.
    pub fn has_obsm(&self, key: &str) -> bool {
        self.obsm.contains_key(key)
    }

    /// Overwrite (or create) a coordinate slot.
    pub fn set_obsm(&mut self, key: impl Into<String>, coords: Tensor<B, 2>) -> Result<()> {
        let [rows, _] = coords.dims();
        if rows != self.n_points() {
            return Err(CoreError::dimension_mismatch(format!(
                "sample '{}': slot has {} rows, expected {}",
                self.name,
                rows,
                self.n_points()
            )));
        }
        self.obsm.insert(key.into(), coords);
        Ok(())
    }

    /// Copy slot `from` into slot `to`.
    pub fn seed_slot(&mut self, from: &str, to: &str) -> Result<()> {
        let coords = self.obsm(from)?.clone();
        self.obsm.insert(to.to_string(), coords);
        Ok(())
    }

    /// Spatial dimensionality of slot `key`.
    pub fn n_dims(&self, key: &str) -> Result<usize> {
        Ok(self.obsm(key)?.dims()[1])
    }

    /// Categorical annotation stored under `key`.
    pub fn label(&self, key: &str) -> Result<&Categorical> {
        self.obs
            .get(key)
            .ok_or_else(|| CoreError::missing_label(&self.name, key))
    }

    /// Whether a categorical annotation exists.
    pub fn has_label(&self, key: &str) -> bool {
        self.obs.contains_key(key)
    }

    /// Auxiliary value stored under `key`.
    pub fn uns(&self, key: &str) -> Option<&UnsValue<B>> {
        self.uns.get(key)
    }

    /// Store an auxiliary value.
    pub fn set_uns(&mut self, key: impl Into<String>, value: UnsValue<B>) {
        self.uns.insert(key.into(), value);
    }

    /// Field handle stored under `key`, if that entry is a field.
    pub fn field_handle(&self, key: &str) -> Option<FieldHandle> {
        match self.uns.get(key) {
            Some(UnsValue::Field(handle)) => Some(*handle),
            _ => None,
        }
    }

    /// Iteration history stored under `key`, if that entry is a history.
    pub fn history(&self, key: &str) -> Option<&[Tensor<B, 2>]> {
        match self.uns.get(key) {
            Some(UnsValue::History(steps)) => Some(steps.as_slice()),
            _ => None,
        }
    }

    /// Keep only the given points.
    ///
    /// Every coordinate slot, expression matrix and annotation is reduced
    /// to the selected rows. Auxiliary outputs refer to the full point set
    /// and are dropped.
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        let n = self.n_points();
        if let Some(&bad) = indices.iter().find(|&&i| i >= n) {
            return Err(CoreError::invalid_argument(format!(
                "index {} out of range for sample '{}' with {} points",
                bad, self.name, n
            )));
        }

        let device = self.x.device();
        let ints: Vec<i32> = indices.iter().map(|&i| i as i32).collect();
        let rows = Tensor::<B, 1, Int>::from_ints(ints.as_slice(), &device);
        let select = |t: &Tensor<B, 2>| t.clone().select(0, rows.clone());

        Ok(Self {
            name: self.name.clone(),
            x: select(&self.x),
            var_names: self.var_names.clone(),
            layers: self.layers.iter().map(|(k, v)| (k.clone(), select(v))).collect(),
            obsm: self.obsm.iter().map(|(k, v)| (k.clone(), select(v))).collect(),
            obs: self.obs.iter().map(|(k, v)| (k.clone(), v.subset(indices))).collect(),
            uns: BTreeMap::new(),
        })
    }

    /// Move every tensor to `device`.
    pub fn to_device(self, device: &B::Device) -> Self {
        let move_map = |m: BTreeMap<String, Tensor<B, 2>>| {
            m.into_iter()
                .map(|(k, v)| (k, v.to_device(device)))
                .collect::<BTreeMap<_, _>>()
        };
        let uns = self
            .uns
            .into_iter()
            .map(|(k, v)| {
                let v = match v {
                    UnsValue::History(steps) => {
                        UnsValue::History(steps.into_iter().map(|t| t.to_device(device)).collect())
                    }
                    field => field,
                };
                (k, v)
            })
            .collect();

        Self {
            name: self.name,
            x: self.x.to_device(device),
            var_names: self.var_names,
            layers: move_map(self.layers),
            obsm: move_map(self.obsm),
            obs: self.obs,
            uns,
        }
    }
}
