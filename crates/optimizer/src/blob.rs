use primitives::{
    Range, RangeError, RangeValue,
    range::{merge_ranges, split_many_to_max_length},
};

/// Slices of at most `max_range_size` values covering every range of `needs`,
/// most recent first.
///
/// Ranges separated by fewer than `merge_threshold` values share a blob, so
/// products with nearby needs end up in the same slice.
pub(crate) fn slices<T: RangeValue>(
    needs: &[Range<T>],
    merge_threshold: u64,
    max_range_size: u64,
) -> Result<Vec<Range<T>>, RangeError> {
    let blobs = coalesce(&merge_ranges(needs), merge_threshold);
    let mut slices = split_many_to_max_length(&blobs, max_range_size)?;
    slices.reverse();
    Ok(slices)
}

/// Join consecutive merged ranges whose gap is smaller than `threshold`.
fn coalesce<T: RangeValue>(merged: &[Range<T>], threshold: u64) -> Vec<Range<T>> {
    let mut blobs: Vec<Range<T>> = Vec::with_capacity(merged.len());
    for range in merged {
        match blobs.last_mut() {
            Some(blob) if gap(blob, range) < threshold => blob.to = blob.to.max(range.to),
            _ => blobs.push(*range),
        }
    }
    blobs
}

/// Number of values strictly between `before` and `after`.
fn gap<T: RangeValue>(before: &Range<T>, after: &Range<T>) -> u64 {
    if after.from <= before.to {
        return 0;
    }
    after.from.diff(before.to).saturating_sub(1)
}
