//! Inclusive ranges over discrete domains and the algebra used to track import progress.
//!
//! Every range is closed on both ends. Two ranges are adjacent when the start of the
//! second is at most one step after the end of the first, so `[1, 4]` and `[5, 9]`
//! merge into `[1, 9]`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// An ordered value that can be stepped one unit at a time.
///
/// Implemented for block numbers (`u64`) and for millisecond timestamps
/// ([`crate::timestamp::TimestampMs`]) so the same algebra serves both domains.
pub trait RangeValue: Copy + Ord + fmt::Debug + Send + Sync + 'static {
    /// The value one step after `self`, saturating at the domain maximum.
    fn next_value(self) -> Self;

    /// The value one step before `self`, saturating at the domain minimum.
    fn previous_value(self) -> Self;

    /// Number of steps from `other` up to `self`. Zero when `other >= self`.
    fn diff(self, other: Self) -> u64;

    /// Move `steps` forward, saturating at the domain maximum.
    fn add_steps(self, steps: u64) -> Self;
}

impl RangeValue for u64 {
    #[inline]
    fn next_value(self) -> Self {
        self.saturating_add(1)
    }

    #[inline]
    fn previous_value(self) -> Self {
        self.saturating_sub(1)
    }

    #[inline]
    fn diff(self, other: Self) -> u64 {
        self.saturating_sub(other)
    }

    #[inline]
    fn add_steps(self, steps: u64) -> Self {
        self.saturating_add(steps)
    }
}

/// Errors raised for ranges a caller should never have produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    /// `from` is after `to`.
    #[error("invalid range: from {from} is after to {to}")]
    Inverted {
        /// Start of the offending range
        from: String,
        /// End of the offending range
        to: String,
    },
    /// A split was requested with a chunk length of zero.
    #[error("max range length must be at least 1")]
    ZeroMaxLength,
    /// The midpoint of a bisection does not leave two non-empty halves.
    #[error("midpoint {midpoint} leaves an empty half when bisecting {range}")]
    MidpointOutOfRange {
        /// The range being bisected
        range: String,
        /// The computed midpoint
        midpoint: String,
    },
}

/// Closed interval `[from, to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range<T> {
    /// First value in the range
    pub from: T,
    /// Last value in the range
    pub to: T,
}

impl<T: RangeValue> Range<T> {
    /// Build a range, rejecting `from > to`.
    pub fn new(from: T, to: T) -> Result<Self, RangeError> {
        let range = Self { from, to };
        range.validate()?;
        Ok(range)
    }

    /// Whether `from <= to`.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.from <= self.to
    }

    /// Returns [`RangeError::Inverted`] when the range is not valid.
    pub fn validate(&self) -> Result<(), RangeError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(RangeError::Inverted {
                from: format!("{:?}", self.from),
                to: format!("{:?}", self.to),
            })
        }
    }

    /// Number of discrete values in the range.
    #[inline]
    pub fn length(&self) -> u64 {
        self.to.diff(self.from).saturating_add(1)
    }

    /// Whether `value` lies within the range.
    #[inline]
    pub fn contains_value(&self, value: T) -> bool {
        self.from <= value && value <= self.to
    }

    /// Whether `other` lies entirely within the range.
    #[inline]
    pub fn contains(&self, other: &Self) -> bool {
        self.from <= other.from && other.to <= self.to
    }

    /// Whether the two ranges share at least one value.
    #[inline]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.from <= other.to && other.from <= self.to
    }

    /// Clip the range to `bound`, `None` if nothing is left.
    pub fn intersect(&self, bound: &Self) -> Option<Self> {
        let range = Self { from: self.from.max(bound.from), to: self.to.min(bound.to) };
        range.is_valid().then_some(range)
    }
}

impl<T: fmt::Debug> fmt::Display for Range<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}, {:?}]", self.from, self.to)
    }
}

/// Merge ranges into a sorted list of disjoint, non-adjacent ranges.
///
/// Invalid ranges are dropped with a warning.
pub fn merge_ranges<T: RangeValue>(ranges: &[Range<T>]) -> Vec<Range<T>> {
    let mut sorted: Vec<Range<T>> = ranges
        .iter()
        .copied()
        .filter(|range| {
            if range.is_valid() {
                true
            } else {
                warn!(%range, "Dropping invalid range while merging");
                false
            }
        })
        .collect();
    sorted.sort_by(|a, b| a.from.cmp(&b.from).then(b.to.cmp(&a.to)));

    let mut merged: Vec<Range<T>> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(acc) if range.from <= acc.to.next_value() => {
                if range.to > acc.to {
                    acc.to = range.to;
                }
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Remove `cut` from `range`, returning what is left in ascending order.
///
/// An inverted `range` leaves nothing.
pub fn exclude<T: RangeValue>(range: Range<T>, cut: Range<T>) -> Vec<Range<T>> {
    if !range.is_valid() {
        return Vec::new();
    }
    if !cut.is_valid() || !range.overlaps(&cut) {
        return vec![range];
    }

    let mut remainder = Vec::with_capacity(2);
    if cut.from > range.from {
        remainder.push(Range { from: range.from, to: cut.from.previous_value() });
    }
    if cut.to < range.to {
        remainder.push(Range { from: cut.to.next_value(), to: range.to });
    }
    remainder
}

/// Remove every range in `cuts` from `range`.
pub fn exclude_many<T: RangeValue>(range: Range<T>, cuts: &[Range<T>]) -> Vec<Range<T>> {
    if !range.is_valid() {
        return Vec::new();
    }
    let mut fragments = vec![range];
    for cut in cuts {
        if fragments.is_empty() {
            break;
        }
        fragments = fragments.into_iter().flat_map(|fragment| exclude(fragment, *cut)).collect();
    }
    fragments
}

/// Remove every range in `cuts` from the merged form of `ranges`.
pub fn exclude_many_from_many<T: RangeValue>(
    ranges: &[Range<T>],
    cuts: &[Range<T>],
) -> Vec<Range<T>> {
    merge_ranges(ranges).into_iter().flat_map(|range| exclude_many(range, cuts)).collect()
}

/// Cut `range` into leading chunks of exactly `max_length` values; the last one may be
/// shorter.
pub fn split_to_max_length<T: RangeValue>(
    range: Range<T>,
    max_length: u64,
) -> Result<Vec<Range<T>>, RangeError> {
    if max_length == 0 {
        return Err(RangeError::ZeroMaxLength);
    }
    range.validate()?;

    let mut chunks = Vec::with_capacity(range.length().div_ceil(max_length).min(1024) as usize);
    let mut from = range.from;
    loop {
        let chunk_end = from.add_steps(max_length - 1);
        if chunk_end >= range.to {
            chunks.push(Range { from, to: range.to });
            return Ok(chunks);
        }
        chunks.push(Range { from, to: chunk_end });
        from = chunk_end.next_value();
    }
}

/// [`split_to_max_length`] over a list of ranges, keeping input order.
pub fn split_many_to_max_length<T: RangeValue>(
    ranges: &[Range<T>],
    max_length: u64,
) -> Result<Vec<Range<T>>, RangeError> {
    let mut chunks = Vec::with_capacity(ranges.len());
    for range in ranges {
        chunks.extend(split_to_max_length(*range, max_length)?);
    }
    Ok(chunks)
}

/// The single range from the smallest `from` to the largest `to`.
///
/// The result may contain gaps that none of the inputs cover.
pub fn covering<T: RangeValue>(ranges: &[Range<T>]) -> Option<Range<T>> {
    let mut valid = ranges.iter().filter(|range| range.is_valid());
    let first = *valid.next()?;
    Some(valid.fold(first, |acc, range| Range {
        from: acc.from.min(range.from),
        to: acc.to.max(range.to),
    }))
}

/// Clip every range to `bound`, dropping those that fall outside it.
pub fn intersect_many<T: RangeValue>(ranges: &[Range<T>], bound: &Range<T>) -> Vec<Range<T>> {
    ranges.iter().filter_map(|range| range.intersect(bound)).collect()
}

/// Sum of the lengths of `ranges`.
pub fn total_length<T: RangeValue>(ranges: &[Range<T>]) -> u64 {
    ranges.iter().fold(0u64, |acc, range| acc.saturating_add(range.length()))
}

/// Split `range` into two non-empty halves around its midpoint.
pub fn bisect<T: RangeValue>(range: Range<T>) -> Result<(Range<T>, Range<T>), RangeError> {
    range.validate()?;
    let midpoint = range.from.add_steps((range.length() - 1) / 2);
    if midpoint < range.from || midpoint >= range.to {
        return Err(RangeError::MidpointOutOfRange {
            range: range.to_string(),
            midpoint: format!("{midpoint:?}"),
        });
    }
    Ok((Range { from: range.from, to: midpoint }, Range { from: midpoint.next_value(), to: range.to }))
}
