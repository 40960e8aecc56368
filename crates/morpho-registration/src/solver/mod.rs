//! Built-in pairwise solver.
//!
//! [`MorphoRegistrar`] fits a rigid transform plus a smooth displacement by
//! expectation-maximisation, with correspondences informed by expression
//! similarity. The fitted [`GaussianVectorField`] can be re-applied to any
//! points of the moving frame.

pub mod em;
pub mod field;
pub mod kernel;
pub mod rigid;

pub use em::{row_argmax, MorphoRegistrar, SMALL_VARIANCE};
pub use field::{AssignmentParams, ControlPoints, GaussianVectorField, Normalization};
pub use rigid::RigidParams;
