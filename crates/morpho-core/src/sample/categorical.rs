//! Categorical per-point annotations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Code used for points without a category.
pub const MISSING_CODE: i32 = -1;

/// A categorical column: a sorted category list plus one code per point.
///
/// Codes index into `categories`; [`MISSING_CODE`] marks a point with no
/// category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Categorical {
    categories: Vec<String>,
    codes: Vec<i32>,
}

impl Categorical {
    /// Build a column from one label per point.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Self {
        let values: Vec<Option<&str>> = labels.iter().map(|l| Some(l.as_ref())).collect();
        Self::from_optional(&values)
    }

    /// Build a column where `None` marks a point without a category.
    pub fn from_optional(labels: &[Option<&str>]) -> Self {
        let categories: Vec<String> = labels
            .iter()
            .flatten()
            .copied()
            .collect::<BTreeSet<&str>>()
            .into_iter()
            .map(str::to_string)
            .collect();

        let codes = labels
            .iter()
            .map(|label| match label {
                Some(l) => categories
                    .binary_search_by(|c| c.as_str().cmp(l))
                    .map(|i| i as i32)
                    .unwrap_or(MISSING_CODE),
                None => MISSING_CODE,
            })
            .collect();

        Self { categories, codes }
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Whether the column has no points.
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// The sorted, de-duplicated category list.
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// Per-point codes into [`Self::categories`].
    pub fn codes(&self) -> &[i32] {
        &self.codes
    }

    /// The category of point `index`, if any.
    pub fn value(&self, index: usize) -> Option<&str> {
        let code = *self.codes.get(index)?;
        if code < 0 {
            return None;
        }
        self.categories.get(code as usize).map(String::as_str)
    }

    /// Keep only the given points, in the given order.
    ///
    /// The category list is kept intact so codes stay comparable with the
    /// parent column.
    pub fn subset(&self, indices: &[usize]) -> Self {
        Self {
            categories: self.categories.clone(),
            codes: indices.iter().map(|&i| self.codes[i]).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_are_sorted_and_unique() {
        let col = Categorical::from_labels(&["b", "a", "b", "c"]);
        assert_eq!(col.categories(), &["a", "b", "c"]);
        assert_eq!(col.codes(), &[1, 0, 1, 2]);
        assert_eq!(col.value(3), Some("c"));
    }

    #[test]
    fn test_missing_values() {
        let col = Categorical::from_optional(&[Some("x"), None]);
        assert_eq!(col.codes(), &[0, MISSING_CODE]);
        assert_eq!(col.value(1), None);
        assert_eq!(col.value(5), None);
    }

    #[test]
    fn test_subset_keeps_categories() {
        let col = Categorical::from_labels(&["a", "b", "c"]);
        let sub = col.subset(&[2, 0]);
        assert_eq!(sub.categories().len(), 3);
        assert_eq!(sub.value(0), Some("c"));
        assert_eq!(sub.len(), 2);
    }
}
