//! Sequential multi-sample registration for spatial transcriptomics.
//!
//! [`ChainAligner`] registers every sample onto its aligned predecessor,
//! bringing an ordered list of sections into the frame of the first one.
//! [`ReferenceAligner`] does the same on downsampled reference samples and
//! projects each fitted deformation field back to full resolution.
//!
//! Both are generic over the pairwise [`Registrar`]; [`MorphoRegistrar`]
//! is the built-in EM solver.

pub mod align;
pub mod cache;
pub mod config;
pub mod error;
pub mod progress;
pub mod registrar;
pub mod registry;
pub mod solver;
pub mod validation;

pub use align::{ChainAligner, ChainAlignment, ReferenceAligner, ReferenceAlignment};
pub use cache::{ComputeCache, NoopCache};
pub use config::{AlignConfig, AlignMode, ReferenceConfig, RegistrationConfig};
pub use error::{RegistrationError, Result};
pub use progress::{
    CancelCallback, ConsoleProgressCallback, HistoryCallback, ProgressBarCallback, ProgressCallback,
    ProgressInfo, ProgressTracker,
};
pub use registrar::{AssignInput, Assignment, FieldOutput, PairInput, PairwiseFit, Registrar};
pub use registry::FieldRegistry;
pub use solver::{GaussianVectorField, MorphoRegistrar};
pub use validation::ConvergenceChecker;
