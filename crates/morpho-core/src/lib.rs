//! Core data model for sequential spatial transcriptomics alignment.
//!
//! Provides the [`Sample`] type, feature selection and dissimilarity,
//! label-informed penalties and point-set downsampling. Registration and
//! chain orchestration live in `morpho-registration`.

pub mod error;
pub mod features;
pub mod labels;
pub mod sample;
pub mod sampling;
pub mod tensor;

pub use error::{CoreError, Result};
pub use features::{Dissimilarity, FeatureLayer};
pub use sample::{slots, Categorical, FieldHandle, Sample, UnsValue};
pub use sampling::{Downsampler, PointDownsampler, SamplingMethod};
