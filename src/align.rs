//! Alignment and broadcasting of labeled arrays.

use crate::array::{DataArray, Dim};
use crate::utils::coord_key;
use anyhow::{Context, Result, bail};
use ndarray::{Axis, IxDyn};
use std::collections::HashMap;

/// Intersect two arrays on every dim they share.
///
/// Coordinates are matched by value and kept in the order of `x`.
/// Dims present in only one of the arrays are left untouched.
pub fn align(x: &DataArray, y: &DataArray) -> Result<(DataArray, DataArray)> {
    let mut x = x.clone();
    let mut y = y.clone();

    for x_axis in 0..x.dims().len() {
        let name = x.dims()[x_axis].name.clone();
        let Some(y_axis) = y.axis_of(&name) else {
            continue;
        };

        let x_len = x.dims()[x_axis].len();
        let y_len = y.dims()[y_axis].len();
        let (x_idxs, y_idxs) = join_coords(&x.dims()[x_axis].coords, &y.dims()[y_axis].coords);
        if x_idxs.is_empty() {
            bail!("dim {name:?} has no coordinates in common");
        }
        log::debug!("aligned {name:?}: {x_len} x {y_len} -> {}", x_idxs.len());

        if !is_identity(&x_idxs, x_len) {
            x = x.select(x_axis, &x_idxs);
        }
        if !is_identity(&y_idxs, y_len) {
            y = y.select(y_axis, &y_idxs);
        }
    }

    Ok((x, y))
}

/// Align two time-first arrays and expand both to the union of their dims.
///
/// The union lists the dims of `x` first, followed by those only in `y`.
/// Both returned arrays have the same dims and shape.
pub fn broadcast(x: &DataArray, y: &DataArray) -> Result<(DataArray, DataArray)> {
    x.check_time_first().context("invalid x")?;
    y.check_time_first().context("invalid y")?;

    let (x, y) = align(x, y).context("failed to align arrays")?;

    let mut dims = x.dims().to_vec();
    for dim in y.dims() {
        if x.axis_of(&dim.name).is_none() {
            dims.push(dim.clone());
        }
    }

    let x = expand_to(&x, &dims).context("failed to expand x")?;
    let y = expand_to(&y, &dims).context("failed to expand y")?;

    Ok((x, y))
}

fn expand_to(array: &DataArray, dims: &[Dim]) -> Result<DataArray> {
    // Reorder the existing axes as they appear in `dims`, then add the missing ones.
    let order: Vec<usize> = dims
        .iter()
        .filter_map(|dim| array.axis_of(&dim.name))
        .collect();
    let mut view = array.values().view().permuted_axes(order.as_slice());
    for (axis, dim) in dims.iter().enumerate() {
        if array.axis_of(&dim.name).is_none() {
            view = view.insert_axis(Axis(axis));
        }
    }

    let shape: Vec<usize> = dims.iter().map(Dim::len).collect();
    let values = view
        .broadcast(IxDyn(&shape))
        .with_context(|| format!("cannot broadcast {:?} to {shape:?}", array.shape()))?
        .to_owned();

    DataArray::new(array.name().map(str::to_owned), dims.to_vec(), values)
}

fn join_coords(x_coords: &[f64], y_coords: &[f64]) -> (Vec<usize>, Vec<usize>) {
    let y_pos: HashMap<u64, usize> = y_coords
        .iter()
        .enumerate()
        .map(|(idx, &coord)| (coord_key(coord), idx))
        .collect();
    x_coords
        .iter()
        .enumerate()
        .filter_map(|(x_idx, &coord)| y_pos.get(&coord_key(coord)).map(|&y_idx| (x_idx, y_idx)))
        .unzip()
}

fn is_identity(idxs: &[usize], len: usize) -> bool {
    idxs.len() == len && idxs.iter().enumerate().all(|(pos, &idx)| pos == idx)
}
