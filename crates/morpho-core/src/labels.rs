//! Label-informed dissimilarity between two annotated samples.
//!
//! Both columns are re-coded against the union of their category sets, then
//! every (moving, fixed) pair whose codes differ gets a unit penalty. The
//! matrix is added to the feature dissimilarity inside the registration
//! objective, so a zero entry means "same label".

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use std::collections::BTreeSet;

use crate::sample::{Categorical, MISSING_CODE};
use crate::tensor::from_rows;

/// Category name that never receives a union code of its own.
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Re-code two columns against the union of their categories.
///
/// The union is sorted; each category's code is its position in it, except
/// [`UNKNOWN_CATEGORY`], which maps to [`MISSING_CODE`] as do points without
/// a category.
pub fn union_codes(fixed: &Categorical, moving: &Categorical) -> (Vec<i32>, Vec<i32>) {
    let union: Vec<&str> = fixed
        .categories()
        .iter()
        .chain(moving.categories())
        .map(String::as_str)
        .collect::<BTreeSet<&str>>()
        .into_iter()
        .collect();

    let recode = |col: &Categorical| -> Vec<i32> {
        (0..col.len())
            .map(|i| match col.value(i) {
                Some(UNKNOWN_CATEGORY) | None => MISSING_CODE,
                Some(cat) => union
                    .binary_search(&cat)
                    .map(|c| c as i32)
                    .unwrap_or(MISSING_CODE),
            })
            .collect()
    };

    (recode(fixed), recode(moving))
}

/// Binary label matrix, row-major `[n_moving, n_fixed]`.
///
/// Entry `(j, i)` is `1.0` when moving point `j` and fixed point `i` carry
/// different codes, `0.0` otherwise.
pub fn label_penalty(fixed: &Categorical, moving: &Categorical) -> Vec<f64> {
    let (fixed_codes, moving_codes) = union_codes(fixed, moving);
    let mut values = Vec::with_capacity(fixed_codes.len() * moving_codes.len());
    for &cb in &moving_codes {
        values.extend(fixed_codes.iter().map(|&ca| if ca != cb { 1.0 } else { 0.0 }));
    }
    values
}

/// Label similarity matrix `[n_moving, n_fixed]` as a backend tensor.
///
/// Despite the name this is an inequality indicator: it is consumed as an
/// additive dissimilarity term.
pub fn label_similarity<B: Backend>(
    fixed: &Categorical,
    moving: &Categorical,
    device: &B::Device,
) -> Tensor<B, 2> {
    from_rows(label_penalty(fixed, moving), moving.len(), fixed.len(), device)
}
