//! Host/device conversion helpers.
//!
//! Small dense work (Procrustes, sampling, categorical codes) runs on the
//! host in `f64`; everything point-count sized stays in backend tensors.

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor, TensorData};

/// Build a `[rows, cols]` tensor from row-major `f64` values.
///
/// Values are converted to the backend float element.
pub fn from_rows<B: Backend>(
    values: Vec<f64>,
    rows: usize,
    cols: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    Tensor::from_data(TensorData::new(values, [rows, cols]), device)
}

/// Copy a tensor to the host as row-major `f64` values.
pub fn to_host<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f64> {
    tensor.into_data().iter::<f64>().collect()
}

/// Reduce a tensor to its sum as `f64`.
pub fn sum_scalar<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> f64 {
    tensor.sum().into_scalar().elem::<f64>()
}

/// Return `true` if every element is finite.
pub fn all_finite<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> bool {
    tensor.into_data().iter::<f64>().all(f64::is_finite)
}
