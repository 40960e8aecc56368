//! Device memory hook invoked between pairs.

use burn::tensor::backend::Backend;

/// Releases cached device memory.
///
/// The aligners call [`ComputeCache::reset`] after every pair so that
/// accelerator backends can drop intermediate buffers.
pub trait ComputeCache<B: Backend> {
    /// Release cached memory on `device`.
    fn reset(&self, device: &B::Device);
}

/// Cache hook that does nothing; suitable for CPU backends.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

impl<B: Backend> ComputeCache<B> for NoopCache {
    fn reset(&self, _device: &B::Device) {}
}
