//! Query planning: turn what every product still needs into as few upstream
//! queries as possible.
//!
//! Each product's outstanding ranges are planned in two passes, never
//! attempted ranges first and failed ranges second. Within a pass all needs are
//! indexed into slices of at most `max_range_size` values and every slice is
//! planned either as one query per product ([`QueryOptimizerOutput::JsonRpcBatch`])
//! or as multi-product queries ([`QueryOptimizerOutput::AddressBatch`]),
//! whichever issues fewer queries.

mod blob;
mod types;

use std::{cmp::Reverse, collections::HashSet, fmt, hash::Hash};

use primitives::{
    Range, RangeValue,
    range::{covering, intersect_many, total_length},
};
use rand::seq::SliceRandom;
use tracing::{debug, error};

pub use types::{
    OptimizerError, OptimizerOptions, OutstandingRanges, PostFilter, PostFilterRanges,
    ProductRangeState, QueryOptimizerOutput,
};

/// Plan the queries covering the outstanding ranges of `states`.
///
/// Fails without a plan on duplicate keys, invalid ranges or zero limits.
pub fn optimize_queries<K, T>(
    states: &[ProductRangeState<K, T>],
    options: &OptimizerOptions,
) -> Result<Vec<QueryOptimizerOutput<K, T>>, OptimizerError>
where
    K: Clone + Eq + Hash + fmt::Debug,
    T: RangeValue,
{
    options.validate()?;
    validate_states(states).inspect_err(|err| error!(%err, "Refusing to plan queries"))?;

    let outstanding: Vec<_> =
        states.iter().map(|state| state.outstanding(options.ignore_import_state)).collect();
    let mut budgets = vec![options.max_queries_per_product; states.len()];

    let fresh: Vec<_> = outstanding.iter().map(|ranges| ranges.fresh.as_slice()).collect();
    let retry: Vec<_> = outstanding.iter().map(|ranges| ranges.retry.as_slice()).collect();

    let mut planner = Planner { states, options, budgets: &mut budgets, outputs: Vec::new() };
    planner.plan_pass(&fresh)?;
    planner.plan_pass(&retry)?;
    let outputs = planner.outputs;

    debug!(
        products = states.len(),
        queries = outputs.len(),
        address_batches = outputs
            .iter()
            .filter(|output| matches!(output, QueryOptimizerOutput::AddressBatch { .. }))
            .count(),
        "Planned queries"
    );
    Ok(outputs)
}

fn validate_states<K, T>(states: &[ProductRangeState<K, T>]) -> Result<(), OptimizerError>
where
    K: Eq + Hash + fmt::Debug,
    T: RangeValue,
{
    let mut seen = HashSet::with_capacity(states.len());
    for state in states {
        if !seen.insert(&state.obj_key) {
            return Err(OptimizerError::DuplicateProduct { key: format!("{:?}", state.obj_key) });
        }
        if !state.full_range.is_valid() {
            return Err(OptimizerError::invalid_range(&state.obj_key, "full", &state.full_range));
        }
        let fields = [("covered", &state.covered_ranges), ("retry", &state.to_retry)];
        for (field, ranges) in fields {
            if let Some(range) = ranges.iter().find(|range| !range.is_valid()) {
                return Err(OptimizerError::invalid_range(&state.obj_key, field, range));
            }
        }
    }
    Ok(())
}

struct Planner<'a, K, T> {
    states: &'a [ProductRangeState<K, T>],
    options: &'a OptimizerOptions,
    /// Remaining single product queries, by product index
    budgets: &'a mut [usize],
    outputs: Vec<QueryOptimizerOutput<K, T>>,
}

/// One product's needs within a slice.
struct SliceNeed<T> {
    index: usize,
    ranges: Vec<Range<T>>,
    coverage: u64,
}

struct Candidate<K, T> {
    outputs: Vec<QueryOptimizerOutput<K, T>>,
    coverage: u64,
    /// Product index of every single product query
    charged: Vec<usize>,
    multi_product_groups: bool,
}

impl<K, T> Candidate<K, T> {
    const fn empty() -> Self {
        Self { outputs: Vec::new(), coverage: 0, charged: Vec::new(), multi_product_groups: false }
    }
}

impl<K, T> Planner<'_, K, T>
where
    K: Clone + Eq + Hash + fmt::Debug,
    T: RangeValue,
{
    fn plan_pass(&mut self, needs: &[&[Range<T>]]) -> Result<(), OptimizerError> {
        let all: Vec<_> = needs.iter().flat_map(|ranges| ranges.iter().copied()).collect();
        if all.is_empty() {
            return Ok(());
        }
        let slices =
            blob::slices(&all, self.options.merge_threshold(), self.options.max_range_size)
                .map_err(|_| OptimizerError::InvalidOptions("max_range_size must be >= 1"))?;

        for slice in slices {
            let slice_needs: Vec<_> = needs
                .iter()
                .enumerate()
                .filter_map(|(index, ranges)| {
                    let ranges = intersect_many(ranges, &slice);
                    (!ranges.is_empty()).then(|| SliceNeed {
                        index,
                        coverage: total_length(&ranges),
                        ranges,
                    })
                })
                .collect();
            if slice_needs.is_empty() {
                continue;
            }
            self.plan_slice(slice_needs);
        }
        Ok(())
    }

    fn plan_slice(&mut self, needs: Vec<SliceNeed<T>>) {
        let json_rpc = self.json_rpc_candidate(&needs);
        let chosen = if self.options.max_addresses_per_query == 1 {
            json_rpc
        } else {
            select(json_rpc, self.address_batch_candidate(needs))
        };

        for index in &chosen.charged {
            self.budgets[*index] = self.budgets[*index].saturating_sub(1);
        }
        self.outputs.extend(chosen.outputs);
    }

    /// One query per product range, most recent first, within each product's budget.
    fn json_rpc_candidate(&self, needs: &[SliceNeed<T>]) -> Candidate<K, T> {
        let mut candidate = Candidate::empty();
        for need in needs {
            let obj_key = &self.states[need.index].obj_key;
            // needs within a slice never exceed max_range_size
            for range in need.ranges.iter().rev().take(self.budgets[need.index]) {
                candidate.coverage = candidate.coverage.saturating_add(range.length());
                candidate.charged.push(need.index);
                candidate.outputs.push(QueryOptimizerOutput::JsonRpcBatch {
                    obj_key: obj_key.clone(),
                    range: *range,
                });
            }
        }
        candidate
    }

    /// Products grouped by contributed coverage into batches of
    /// `max_addresses_per_query`, ties in random order.
    fn address_batch_candidate(&self, mut needs: Vec<SliceNeed<T>>) -> Candidate<K, T> {
        needs.shuffle(&mut rand::rng());
        needs.sort_by_key(|need| Reverse(need.coverage));

        let mut candidate = Candidate::empty();
        for group in needs.chunks_mut(self.options.max_addresses_per_query) {
            group.sort_by_key(|need| need.index);
            let member_ranges: Vec<_> =
                group.iter().flat_map(|need| need.ranges.iter().copied()).collect();
            let Some(range) = covering(&member_ranges) else { continue };

            let post_filters = group
                .iter()
                .map(|need| PostFilter {
                    obj_key: self.states[need.index].obj_key.clone(),
                    filter: if need.ranges == [range] {
                        PostFilterRanges::NoFilter
                    } else {
                        PostFilterRanges::Ranges(need.ranges.clone())
                    },
                })
                .collect();

            candidate.coverage =
                group.iter().fold(candidate.coverage, |acc, need| acc.saturating_add(need.coverage));
            candidate.multi_product_groups |= group.len() > 1;
            candidate.outputs.push(QueryOptimizerOutput::AddressBatch {
                obj_keys: group.iter().map(|need| self.states[need.index].obj_key.clone()).collect(),
                range,
                post_filters,
            });
        }
        candidate
    }
}

/// Fewer queries wins, then more coverage, then single product queries unless
/// the address batches actually group products. A candidate planning nothing
/// never wins over one that plans something.
fn select<K, T>(json_rpc: Candidate<K, T>, address: Candidate<K, T>) -> Candidate<K, T> {
    if json_rpc.outputs.is_empty() != address.outputs.is_empty() {
        return if json_rpc.outputs.is_empty() { address } else { json_rpc };
    }
    match json_rpc.outputs.len().cmp(&address.outputs.len()) {
        std::cmp::Ordering::Less => json_rpc,
        std::cmp::Ordering::Greater => address,
        std::cmp::Ordering::Equal => match json_rpc.coverage.cmp(&address.coverage) {
            std::cmp::Ordering::Greater => json_rpc,
            std::cmp::Ordering::Less => address,
            std::cmp::Ordering::Equal if address.multi_product_groups => address,
            std::cmp::Ordering::Equal => json_rpc,
        },
    }
}
