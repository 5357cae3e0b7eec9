use std::fmt;

use primitives::{Range, RangeValue, range::merge_ranges};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What one product needs and already has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRangeState<K, T> {
    /// Stable product key
    pub obj_key: K,
    /// Everything the product could ever need
    pub full_range: Range<T>,
    /// Ranges attempted at least once, merged
    pub covered_ranges: Vec<Range<T>>,
    /// Ranges that failed and wait for another attempt, merged
    pub to_retry: Vec<Range<T>>,
}

/// Ranges a product still needs, split by priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutstandingRanges<T> {
    /// Never attempted
    pub fresh: Vec<Range<T>>,
    /// Attempted and failed
    pub retry: Vec<Range<T>>,
}

impl<K, T: RangeValue> ProductRangeState<K, T> {
    /// Outstanding ranges of this product.
    ///
    /// With `ignore_import_state` the whole `full_range` is fresh again.
    pub fn outstanding(&self, ignore_import_state: bool) -> OutstandingRanges<T> {
        if ignore_import_state {
            return OutstandingRanges { fresh: vec![self.full_range], retry: Vec::new() };
        }
        let mut known = Vec::with_capacity(self.covered_ranges.len() + self.to_retry.len());
        known.extend_from_slice(&self.covered_ranges);
        known.extend_from_slice(&self.to_retry);
        let known = merge_ranges(&known);

        OutstandingRanges {
            fresh: primitives::range::exclude_many(self.full_range, &known),
            retry: primitives::range::intersect_many(
                &merge_ranges(&self.to_retry),
                &self.full_range,
            ),
        }
    }
}

/// Optimizer limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimizerOptions {
    /// Plan the full range of every product again
    pub ignore_import_state: bool,
    /// Products per address batch, `1` disables address batching
    pub max_addresses_per_query: usize,
    /// Widest range of a single query
    pub max_range_size: u64,
    /// Single product queries per product, over the whole plan
    pub max_queries_per_product: usize,
    /// Outstanding ranges closer than this are planned together.
    /// Defaults to half of `max_range_size`.
    pub blob_merge_threshold: Option<u64>,
}

impl OptimizerOptions {
    /// Options with the default merge threshold.
    pub const fn new(
        max_addresses_per_query: usize,
        max_range_size: u64,
        max_queries_per_product: usize,
    ) -> Self {
        Self {
            ignore_import_state: false,
            max_addresses_per_query,
            max_range_size,
            max_queries_per_product,
            blob_merge_threshold: None,
        }
    }

    pub(crate) fn merge_threshold(&self) -> u64 {
        self.blob_merge_threshold.unwrap_or(self.max_range_size / 2)
    }

    pub(crate) fn validate(&self) -> Result<(), OptimizerError> {
        if self.max_addresses_per_query == 0 {
            return Err(OptimizerError::InvalidOptions("max_addresses_per_query must be >= 1"));
        }
        if self.max_range_size == 0 {
            return Err(OptimizerError::InvalidOptions("max_range_size must be >= 1"));
        }
        if self.max_queries_per_product == 0 {
            return Err(OptimizerError::InvalidOptions("max_queries_per_product must be >= 1"));
        }
        Ok(())
    }
}

/// Sub-ranges of an address batch that belong to one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "ranges")]
pub enum PostFilterRanges<T> {
    /// The product needs the whole batch range
    NoFilter,
    /// Only these ranges, all within the batch range
    Ranges(Vec<Range<T>>),
}

impl<T: RangeValue> PostFilterRanges<T> {
    /// Whether `value` passes the filter.
    pub fn accepts(&self, value: T) -> bool {
        match self {
            Self::NoFilter => true,
            Self::Ranges(ranges) => ranges.iter().any(|range| range.contains_value(value)),
        }
    }

    /// Ranges this filter lets through within `batch_range`.
    pub fn ranges(&self, batch_range: Range<T>) -> Vec<Range<T>> {
        match self {
            Self::NoFilter => vec![batch_range],
            Self::Ranges(ranges) => ranges.clone(),
        }
    }
}

/// Post-filter of one product in an address batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostFilter<K, T> {
    /// Product key
    pub obj_key: K,
    /// Ranges the product needs
    pub filter: PostFilterRanges<T>,
}

/// One planned query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum QueryOptimizerOutput<K, T> {
    /// A single product query
    JsonRpcBatch {
        /// Product key
        obj_key: K,
        /// Queried range
        range: Range<T>,
    },
    /// One query over several products
    AddressBatch {
        /// Products, in input order
        obj_keys: Vec<K>,
        /// Smallest range covering the needs of every product in the batch
        range: Range<T>,
        /// Per product sub-ranges of `range`
        post_filters: Vec<PostFilter<K, T>>,
    },
}

impl<K, T: RangeValue> QueryOptimizerOutput<K, T> {
    /// Queried range.
    pub const fn range(&self) -> Range<T> {
        match self {
            Self::JsonRpcBatch { range, .. } | Self::AddressBatch { range, .. } => *range,
        }
    }

    /// `(product, ranges)` this query covers, post-filters applied.
    pub fn product_ranges(&self) -> Vec<(&K, Vec<Range<T>>)> {
        match self {
            Self::JsonRpcBatch { obj_key, range } => vec![(obj_key, vec![*range])],
            Self::AddressBatch { range, post_filters, .. } => post_filters
                .iter()
                .map(|post_filter| (&post_filter.obj_key, post_filter.filter.ranges(*range)))
                .collect(),
        }
    }
}

/// Invalid optimizer input. These are caller bugs, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptimizerError {
    /// The same product appears twice
    #[error("product {key} appears more than once in optimizer input")]
    DuplicateProduct {
        /// Offending key
        key: String,
    },
    /// A range with `from > to`
    #[error("product {key} has an invalid {field} range {range}")]
    InvalidRange {
        /// Offending key
        key: String,
        /// Which input field holds the range
        field: &'static str,
        /// The range
        range: String,
    },
    /// A limit is zero
    #[error("invalid optimizer options: {0}")]
    InvalidOptions(&'static str),
}

impl OptimizerError {
    pub(crate) fn invalid_range<K: fmt::Debug, T: fmt::Debug>(
        key: &K,
        field: &'static str,
        range: &Range<T>,
    ) -> Self {
        Self::InvalidRange { key: format!("{key:?}"), field, range: range.to_string() }
    }
}
