use anyhow::{Result, bail};
use std::{collections::HashSet, fmt::Debug, ops::RangeBounds};

/// Check that `num` lies within `range`.
pub fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }

    Ok(())
}

/// Check that a coordinate vector has the expected length and holds
/// finite, unique values.
pub fn check_coords(coords: &[f64], exp_len: usize) -> Result<()> {
    let len = coords.len();
    if len != exp_len {
        bail!("coordinate vector length must be {exp_len}, but is {len}");
    }

    if let Some(coord) = coords.iter().find(|coord| !coord.is_finite()) {
        bail!("coordinates must be finite, but found {coord}");
    }
    let mut seen = HashSet::with_capacity(len);
    if let Some(coord) = coords.iter().find(|&&coord| !seen.insert(coord_key(coord))) {
        bail!("coordinates must be unique, but {coord} is repeated");
    }

    Ok(())
}

/// Hashable key of a coordinate value (`-0.0` and `0.0` share a key).
pub fn coord_key(coord: f64) -> u64 {
    (coord + 0.0).to_bits()
}
