//! Expression features and feature-space dissimilarity.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};
use crate::sample::Sample;

/// Pseudo-count added to expression before the KL divergence.
const KL_PSEUDO_COUNT: f64 = 0.01;

/// Which expression matrix to read from a sample.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FeatureLayer {
    /// The primary matrix.
    #[default]
    X,
    /// A named alternate layer.
    Layer(String),
}

impl FromStr for FeatureLayer {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" => Err(CoreError::invalid_argument("empty layer name")),
            "X" => Ok(Self::X),
            other => Ok(Self::Layer(other.to_string())),
        }
    }
}

impl fmt::Display for FeatureLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X => write!(f, "X"),
            Self::Layer(name) => write!(f, "{}", name),
        }
    }
}

/// Expression dissimilarity between points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Dissimilarity {
    /// KL divergence between row-normalised expression profiles.
    #[default]
    Kl,
    /// Squared Euclidean distance.
    Euclidean,
}

impl FromStr for Dissimilarity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "kl" => Ok(Self::Kl),
            "euclidean" | "euc" => Ok(Self::Euclidean),
            other => Err(CoreError::invalid_argument(format!(
                "unknown dissimilarity '{}', expected 'kl' or 'euclidean'",
                other
            ))),
        }
    }
}

impl fmt::Display for Dissimilarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kl => write!(f, "kl"),
            Self::Euclidean => write!(f, "euclidean"),
        }
    }
}

/// Genes shared by two samples, in `first`'s column order.
///
/// With `subset`, only the requested genes that both samples carry are kept.
pub fn common_genes<B: Backend>(
    first: &Sample<B>,
    second: &Sample<B>,
    subset: Option<&[String]>,
) -> Result<Vec<String>> {
    let other: HashSet<&str> = second.var_names().iter().map(String::as_str).collect();
    let wanted: Option<HashSet<&str>> = subset.map(|g| g.iter().map(String::as_str).collect());

    let genes: Vec<String> = first
        .var_names()
        .iter()
        .filter(|g| other.contains(g.as_str()))
        .filter(|g| wanted.as_ref().map_or(true, |w| w.contains(g.as_str())))
        .cloned()
        .collect();

    if genes.is_empty() {
        return Err(CoreError::NoCommonGenes {
            first: first.name().to_string(),
            second: second.name().to_string(),
        });
    }
    Ok(genes)
}

/// Expression matrix `[n_points, genes.len()]` restricted to `genes`.
pub fn select_features<B: Backend>(
    sample: &Sample<B>,
    layer: &FeatureLayer,
    genes: &[String],
) -> Result<Tensor<B, 2>> {
    let matrix = match layer {
        FeatureLayer::X => sample.x(),
        FeatureLayer::Layer(name) => sample.layer(name)?,
    };

    let columns = genes
        .iter()
        .map(|g| {
            sample
                .var_names()
                .iter()
                .position(|v| v == g)
                .map(|i| i as i32)
                .ok_or_else(|| {
                    CoreError::invalid_argument(format!(
                        "gene '{}' not found in sample '{}'",
                        g,
                        sample.name()
                    ))
                })
        })
        .collect::<Result<Vec<i32>>>()?;

    let index = Tensor::<B, 1, Int>::from_ints(columns.as_slice(), &matrix.device());
    Ok(matrix.clone().select(1, index))
}

/// Pairwise dissimilarity `[n_moving, n_fixed]` between expression rows.
pub fn dissimilarity_matrix<B: Backend>(
    moving: Tensor<B, 2>,
    fixed: Tensor<B, 2>,
    metric: Dissimilarity,
) -> Result<Tensor<B, 2>> {
    let [_, g_moving] = moving.dims();
    let [_, g_fixed] = fixed.dims();
    if g_moving != g_fixed {
        return Err(CoreError::dimension_mismatch(format!(
            "feature sets differ: {} vs {} genes",
            g_moving, g_fixed
        )));
    }

    Ok(match metric {
        Dissimilarity::Kl => kl_divergence(moving, fixed),
        Dissimilarity::Euclidean => squared_euclidean(moving, fixed),
    })
}

/// `KL(x_i || y_j)` for every row pair.
fn kl_divergence<B: Backend>(x: Tensor<B, 2>, y: Tensor<B, 2>) -> Tensor<B, 2> {
    let normalize = |t: Tensor<B, 2>| {
        let t = t.clamp_min(0.0).add_scalar(KL_PSEUDO_COUNT);
        let row_sum = t.clone().sum_dim(1);
        t / row_sum
    };
    let x = normalize(x);
    let y = normalize(y);

    let self_entropy = (x.clone() * x.clone().log()).sum_dim(1); // [n, 1]
    let cross = x.matmul(y.log().transpose()); // [n, m]
    self_entropy - cross
}

fn squared_euclidean<B: Backend>(x: Tensor<B, 2>, y: Tensor<B, 2>) -> Tensor<B, 2> {
    let x2 = x.clone().powf_scalar(2.0).sum_dim(1);
    let y2 = y.clone().powf_scalar(2.0).sum_dim(1).transpose();
    let cross = x.matmul(y.transpose()).mul_scalar(2.0);
    (x2 + y2 - cross).clamp_min(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{from_rows, to_host};
    use burn_ndarray::NdArray;

    type B = NdArray<f64>;

    fn make(name: &str, genes: &[&str], values: Vec<f64>) -> Sample<B> {
        let device = Default::default();
        let n = values.len() / genes.len();
        let coords = from_rows::<B>(vec![0.0; n * 2], n, 2, &device);
        let x = from_rows::<B>(values, n, genes.len(), &device);
        let names = genes.iter().map(|g| g.to_string()).collect();
        Sample::new(name, "spatial", coords, x, names).unwrap()
    }

    #[test]
    fn test_common_genes_keeps_first_order() {
        let a = make("a", &["g3", "g1", "g2"], vec![1.0, 2.0, 3.0]);
        let b = make("b", &["g1", "g3"], vec![1.0, 2.0]);
        assert_eq!(common_genes(&a, &b, None).unwrap(), vec!["g3", "g1"]);
    }

    #[test]
    fn test_common_genes_with_subset() {
        let a = make("a", &["g1", "g2"], vec![1.0, 2.0]);
        let b = make("b", &["g1", "g2"], vec![1.0, 2.0]);
        let subset = vec!["g2".to_string(), "g9".to_string()];
        assert_eq!(common_genes(&a, &b, Some(&subset)).unwrap(), vec!["g2"]);
    }

    #[test]
    fn test_no_common_genes_is_an_error() {
        let a = make("a", &["g1"], vec![1.0]);
        let b = make("b", &["g2"], vec![1.0]);
        assert!(matches!(common_genes(&a, &b, None), Err(CoreError::NoCommonGenes { .. })));
    }

    #[test]
    fn test_select_features_reorders_columns() {
        let a = make("a", &["g1", "g2"], vec![1.0, 2.0, 3.0, 4.0]);
        let order = ["g2".to_string(), "g1".to_string()];
        let f = select_features(&a, &FeatureLayer::X, &order).unwrap();
        assert_eq!(to_host(f), vec![2.0, 1.0, 4.0, 3.0]);
    }

    #[test]
    fn test_missing_layer() {
        let a = make("a", &["g1"], vec![1.0]);
        let err = select_features(&a, &FeatureLayer::Layer("counts".into()), &["g1".to_string()]);
        assert!(matches!(err, Err(CoreError::MissingLayer { .. })));
    }

    #[test]
    fn test_kl_is_zero_on_identical_profiles() {
        let device = Default::default();
        let x = from_rows::<B>(vec![1.0, 3.0, 5.0, 0.0], 2, 2, &device);
        let d = to_host(dissimilarity_matrix(x.clone(), x, Dissimilarity::Kl).unwrap());
        assert!(d[0].abs() < 1e-9);
        assert!(d[3].abs() < 1e-9);
        assert!(d[1] > 0.0 && d[2] > 0.0);
    }

    #[test]
    fn test_euclidean_values() {
        let device = Default::default();
        let x = from_rows::<B>(vec![0.0, 0.0], 1, 2, &device);
        let y = from_rows::<B>(vec![3.0, 4.0, 0.0, 0.0], 2, 2, &device);
        let d = to_host(dissimilarity_matrix(x, y, Dissimilarity::Euclidean).unwrap());
        assert!((d[0] - 25.0).abs() < 1e-9);
        assert!(d[1].abs() < 1e-9);
    }

    #[test]
    fn test_parse_options() {
        assert_eq!("KL".parse::<Dissimilarity>().unwrap(), Dissimilarity::Kl);
        assert!("cosine".parse::<Dissimilarity>().is_err());
        assert_eq!("X".parse::<FeatureLayer>().unwrap(), FeatureLayer::X);
        assert_eq!(
            "counts".parse::<FeatureLayer>().unwrap(),
            FeatureLayer::Layer("counts".into())
        );
    }
}
