//! Configuration for pairwise registration and chain alignment.

use morpho_core::{Dissimilarity, FeatureLayer, SamplingMethod};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{RegistrationError, Result};
use crate::validation;

/// Which deformation components the solver fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AlignMode {
    /// Rigid only.
    S,
    /// Nonrigid only.
    N,
    /// Rigid followed by a nonrigid refinement.
    #[default]
    SN,
}

impl AlignMode {
    /// Whether a rotation and translation are estimated.
    pub fn has_rigid(&self) -> bool {
        matches!(self, Self::S | Self::SN)
    }

    /// Whether a smooth displacement field is estimated.
    pub fn has_nonrigid(&self) -> bool {
        matches!(self, Self::N | Self::SN)
    }
}

impl FromStr for AlignMode {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "S" => Ok(Self::S),
            "N" => Ok(Self::N),
            "SN" => Ok(Self::SN),
            other => Err(RegistrationError::invalid_configuration(format!(
                "unknown mode '{}', expected 'S', 'N' or 'SN'",
                other
            ))),
        }
    }
}

impl fmt::Display for AlignMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S => write!(f, "S"),
            Self::N => write!(f, "N"),
            Self::SN => write!(f, "SN"),
        }
    }
}

/// Hyperparameters of one pairwise registration.
///
/// Lengths (`beta`, `sigma2_min`) are expressed in the normalised frame in
/// which every pair is solved: both point sets centred and scaled to unit
/// RMS radius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Components to fit.
    pub mode: AlignMode,
    /// Expression dissimilarity.
    pub dissimilarity: Dissimilarity,
    /// Maximum EM iterations.
    pub max_iter: usize,
    /// Bandwidth of the Gaussian kernel smoothing the displacement field.
    pub beta: f64,
    /// Coherence weight of the displacement field.
    pub lambda: f64,
    /// Prior probability that a fixed point is an outlier.
    pub outlier_weight: f64,
    /// Lower bound of the variance estimate.
    pub sigma2_min: f64,
    /// Relative σ² change below which the solver stops.
    pub tolerance: f64,
    /// Scale of the expression-similarity kernel.
    pub feature_bandwidth: f64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            mode: AlignMode::SN,
            dissimilarity: Dissimilarity::Kl,
            max_iter: 100,
            beta: 0.3,
            lambda: 1.0,
            outlier_weight: 0.1,
            sigma2_min: 1e-5,
            tolerance: 1e-5,
            feature_bandwidth: 1.0,
        }
    }
}

impl RegistrationConfig {
    /// Create a config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the alignment mode.
    pub fn with_mode(mut self, mode: AlignMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the dissimilarity metric.
    pub fn with_dissimilarity(mut self, dissimilarity: Dissimilarity) -> Self {
        self.dissimilarity = dissimilarity;
        self
    }

    /// Set the maximum number of iterations.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set the displacement kernel bandwidth.
    pub fn with_beta(mut self, beta: f64) -> Self {
        self.beta = beta;
        self
    }

    /// Set the coherence weight.
    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.lambda = lambda;
        self
    }

    /// Set the outlier weight.
    pub fn with_outlier_weight(mut self, weight: f64) -> Self {
        self.outlier_weight = weight;
        self
    }

    /// Set the variance lower bound.
    pub fn with_sigma2_min(mut self, sigma2_min: f64) -> Self {
        self.sigma2_min = sigma2_min;
        self
    }

    /// Set the convergence tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the expression kernel scale.
    pub fn with_feature_bandwidth(mut self, bandwidth: f64) -> Self {
        self.feature_bandwidth = bandwidth;
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        validation::validate_iterations(self.max_iter)?;
        validation::validate_positive("beta", self.beta)?;
        validation::validate_positive("sigma2_min", self.sigma2_min)?;
        validation::validate_positive("feature_bandwidth", self.feature_bandwidth)?;
        validation::validate_non_negative("lambda", self.lambda)?;
        validation::validate_non_negative("tolerance", self.tolerance)?;
        validation::validate_outlier_weight(self.outlier_weight)
    }
}

/// Pipeline-level settings shared by both aligners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignConfig {
    /// Expression matrix used for dissimilarity.
    pub layer: FeatureLayer,
    /// Gene subset; `None` uses every gene shared by a pair.
    pub genes: Option<Vec<String>>,
    /// Slot holding the raw coordinates.
    pub spatial_key: String,
    /// Slot receiving the aligned coordinates.
    pub key_added: String,
    /// Entry receiving per-iteration coordinates; `None` disables capture.
    pub iter_key_added: Option<String>,
    /// Entry receiving the fitted field handle.
    pub vecfld_key_added: String,
    /// Categorical annotation used for label-informed alignment.
    pub label_key: Option<String>,
    /// Log per-pair progress.
    pub verbose: bool,
    /// Pairwise solver settings.
    pub registration: RegistrationConfig,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            layer: FeatureLayer::X,
            genes: None,
            spatial_key: "spatial".to_string(),
            key_added: "align_spatial".to_string(),
            iter_key_added: Some("iter_spatial".to_string()),
            vecfld_key_added: "VecFld_morpho".to_string(),
            label_key: None,
            verbose: true,
            registration: RegistrationConfig::default(),
        }
    }
}

impl AlignConfig {
    /// Create a config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the feature layer.
    pub fn with_layer(mut self, layer: FeatureLayer) -> Self {
        self.layer = layer;
        self
    }

    /// Restrict dissimilarity to a gene subset.
    pub fn with_genes(mut self, genes: Vec<String>) -> Self {
        self.genes = Some(genes);
        self
    }

    /// Set the raw coordinate slot.
    pub fn with_spatial_key(mut self, key: impl Into<String>) -> Self {
        self.spatial_key = key.into();
        self
    }

    /// Set the output coordinate slot.
    pub fn with_key_added(mut self, key: impl Into<String>) -> Self {
        self.key_added = key.into();
        self
    }

    /// Set (or disable) iteration history capture.
    pub fn with_iter_key_added(mut self, key: Option<String>) -> Self {
        self.iter_key_added = key;
        self
    }

    /// Set the field handle entry.
    pub fn with_vecfld_key_added(mut self, key: impl Into<String>) -> Self {
        self.vecfld_key_added = key.into();
        self
    }

    /// Enable label-informed alignment.
    pub fn with_label_key(mut self, key: impl Into<String>) -> Self {
        self.label_key = Some(key.into());
        self
    }

    /// Toggle progress logging.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set the pairwise solver settings.
    pub fn with_registration(mut self, registration: RegistrationConfig) -> Self {
        self.registration = registration;
        self
    }

    /// Check value ranges and key names.
    pub fn validate(&self) -> Result<()> {
        for (name, key) in [
            ("spatial_key", &self.spatial_key),
            ("key_added", &self.key_added),
            ("vecfld_key_added", &self.vecfld_key_added),
        ] {
            if key.is_empty() {
                return Err(RegistrationError::invalid_configuration(format!(
                    "{} must not be empty",
                    name
                )));
            }
        }
        if self.genes.as_ref().is_some_and(|g| g.is_empty()) {
            return Err(RegistrationError::invalid_configuration("gene subset must not be empty"));
        }
        self.registration.validate()
    }
}

/// Settings specific to the reference-accelerated aligner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceConfig {
    /// Target point count per reference sample.
    pub n_sampling: usize,
    /// Downsampling strategy.
    pub sampling_method: SamplingMethod,
    /// Recompute a full-resolution assignment after each back-projection.
    pub return_full_assignment: bool,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            n_sampling: 2000,
            sampling_method: SamplingMethod::Trn,
            return_full_assignment: true,
        }
    }
}

impl ReferenceConfig {
    /// Create a config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reference point count.
    pub fn with_n_sampling(mut self, n_sampling: usize) -> Self {
        self.n_sampling = n_sampling;
        self
    }

    /// Set the downsampling strategy.
    pub fn with_sampling_method(mut self, method: SamplingMethod) -> Self {
        self.sampling_method = method;
        self
    }

    /// Choose between transform-and-assign and plain transform.
    pub fn with_full_assignment(mut self, enabled: bool) -> Self {
        self.return_full_assignment = enabled;
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.n_sampling == 0 {
            return Err(RegistrationError::invalid_configuration("n_sampling must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(AlignConfig::default().validate().is_ok());
        assert!(ReferenceConfig::default().validate().is_ok());
        assert_eq!(AlignConfig::default().registration.mode, AlignMode::SN);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("S".parse::<AlignMode>().unwrap(), AlignMode::S);
        assert_eq!("SN".parse::<AlignMode>().unwrap(), AlignMode::SN);
        assert!("NS".parse::<AlignMode>().is_err());
        assert_eq!(AlignMode::N.to_string(), "N");
        assert!(AlignMode::SN.has_rigid() && AlignMode::SN.has_nonrigid());
        assert!(!AlignMode::S.has_nonrigid());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(RegistrationConfig::new().with_max_iter(0).validate().is_err());
        assert!(RegistrationConfig::new().with_outlier_weight(1.0).validate().is_err());
        assert!(RegistrationConfig::new().with_sigma2_min(0.0).validate().is_err());
        assert!(AlignConfig::new().with_key_added("").validate().is_err());
        assert!(AlignConfig::new().with_genes(Vec::new()).validate().is_err());
        assert!(ReferenceConfig::new().with_n_sampling(0).validate().is_err());
    }
}
