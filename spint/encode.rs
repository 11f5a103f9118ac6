//! One-hot encoding of location identifiers.

use crate::matrix::Entry;
use ahash::RandomState;
use faer::sparse::Triplet;
use itertools::Itertools;
use std::collections::HashMap;

/// Indicator columns for a vector of identifiers.
///
/// `levels[j]` is the identifier owning column `j`; levels are the distinct ids in
/// ascending order, so encoding the same distinct-id set always yields the same
/// column layout.
#[derive(Clone, Debug, PartialEq)]
pub struct IndicatorBlock {
    pub levels: Vec<String>,
    /// Column of each observation within the block.
    pub codes: Vec<usize>,
}

impl IndicatorBlock {
    /// Columns kept once the first level is optionally removed as the reference.
    pub fn kept_levels(&self, drop_first: bool) -> &[String] {
        &self.levels[usize::from(drop_first).min(self.levels.len())..]
    }

    /// The block's ones as design entries, with columns shifted by `offset`.
    /// Rows at the first level carry no entry when `drop_first` is set.
    pub fn entries(&self, offset: usize, drop_first: bool) -> impl Iterator<Item = Entry> + '_ {
        let first = usize::from(drop_first);
        self.codes
            .iter()
            .enumerate()
            .filter(move |&(_, &code)| code >= first)
            .map(move |(row, &code)| Triplet::new(row, offset + code - first, 1.0))
    }
}

/// Sorted distinct values of `ids`.
pub fn unique_sorted<S: AsRef<str>>(ids: &[S]) -> Vec<String> {
    ids.iter()
        .map(AsRef::as_ref)
        .sorted_unstable()
        .dedup()
        .map(str::to_string)
        .collect()
}

pub fn encode<S: AsRef<str>>(ids: &[S]) -> IndicatorBlock {
    let levels = unique_sorted(ids);
    let lookup: HashMap<&str, usize, RandomState> = levels
        .iter()
        .enumerate()
        .map(|(j, level)| (level.as_str(), j))
        .collect();
    let codes = ids.iter().map(|id| lookup[id.as_ref()]).collect();
    IndicatorBlock { levels, codes }
}
