//! Labeled multi-dimensional arrays.

use crate::utils::check_coords;
use anyhow::{Context, Result, bail};
use ndarray::{Array1, ArrayD, ArrayView1, Axis, Slice};
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Name of the temporal dimension.
pub const TIME_DIM: &str = "time";

/// Named dimension with one coordinate per index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dim {
    pub name: String,
    pub coords: Vec<f64>,
}

impl Dim {
    pub fn new(name: impl Into<String>, coords: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            coords,
        }
    }

    /// Dimension whose coordinates are `0, 1, ..., len - 1`.
    pub fn range(name: impl Into<String>, len: usize) -> Self {
        Self::new(name, (0..len).map(|idx| idx as f64).collect())
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }
}

/// Numeric array whose axes carry named, coordinated dimensions.
///
/// Missing values are stored as NaN. Functions reducing over time expect
/// [`TIME_DIM`] to be the first dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataArray {
    name: Option<String>,
    dims: Vec<Dim>,
    values: ArrayD<f64>,
}

impl DataArray {
    /// Create a new `DataArray`, checking that dims and values agree.
    pub fn new(name: Option<String>, dims: Vec<Dim>, values: ArrayD<f64>) -> Result<Self> {
        let array = Self { name, dims, values };
        array.validate()?;
        Ok(array)
    }

    /// Create a one-dimensional time series.
    pub fn time_series(name: &str, times: Vec<f64>, values: Vec<f64>) -> Result<Self> {
        let values = Array1::from_vec(values).into_dyn();
        Self::new(Some(name.to_owned()), vec![Dim::new(TIME_DIM, times)], values)
    }

    /// Create the series `0, 1, 2, ...` on the given time coordinates.
    pub fn time_index(times: &[f64]) -> Result<Self> {
        let values = (0..times.len()).map(|idx| idx as f64).collect();
        Self::time_series("time_index", times.to_vec(), values)
    }

    /// Load a [`DataArray`] from a MessagePack-encoded file.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);

        let array: DataArray =
            decode::from_read(&mut reader).context("failed to deserialize array")?;

        array.validate().context("failed to validate array")?;

        Ok(array)
    }

    /// Save the array to a MessagePack-encoded file.
    pub fn to_file<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, self).context("failed to serialize array")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let rank = self.values.ndim();
        let n_dims = self.dims.len();
        if n_dims != rank {
            bail!("array of rank {rank} must have {rank} dims, but has {n_dims}");
        }

        let mut names = HashSet::with_capacity(n_dims);
        for (axis, dim) in self.dims.iter().enumerate() {
            if dim.name.is_empty() {
                bail!("dim {axis} has an empty name");
            }
            if !names.insert(dim.name.as_str()) {
                bail!("dim name {:?} is repeated", dim.name);
            }
            check_coords(&dim.coords, self.values.len_of(Axis(axis)))
                .with_context(|| format!("invalid coordinates of dim {:?}", dim.name))?;
        }

        Ok(())
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    pub fn dim_names(&self) -> Vec<&str> {
        self.dims.iter().map(|dim| dim.name.as_str()).collect()
    }

    pub fn values(&self) -> &ArrayD<f64> {
        &self.values
    }

    pub fn shape(&self) -> &[usize] {
        self.values.shape()
    }

    /// Pairs of dim name and length.
    pub fn sizes(&self) -> Vec<(&str, usize)> {
        self.dims
            .iter()
            .map(|dim| (dim.name.as_str(), dim.len()))
            .collect()
    }

    /// Axis index of the dim called `name`, if any.
    pub fn axis_of(&self, name: &str) -> Option<usize> {
        self.dims.iter().position(|dim| dim.name == name)
    }

    /// Ensure [`TIME_DIM`] is the first dimension.
    pub fn check_time_first(&self) -> Result<()> {
        match self.dims.first() {
            Some(dim) if dim.name == TIME_DIM => Ok(()),
            _ => bail!(
                "first dim must be {TIME_DIM:?}, but dims are {:?}",
                self.dim_names()
            ),
        }
    }

    /// Time coordinates.
    pub fn time(&self) -> Result<&[f64]> {
        self.check_time_first()?;
        Ok(&self.dims[0].coords)
    }

    pub fn n_time(&self) -> Result<usize> {
        Ok(self.time()?.len())
    }

    /// Keep the entries of `axis` at the given indices, in that order.
    pub fn select(&self, axis: usize, idxs: &[usize]) -> Self {
        let mut dims = self.dims.clone();
        dims[axis].coords = idxs.iter().map(|&idx| self.dims[axis].coords[idx]).collect();
        Self {
            name: self.name.clone(),
            dims,
            values: self.values.select(Axis(axis), idxs),
        }
    }

    /// Shift values `k` steps backwards in time: `out[t] = in[t + k]`.
    ///
    /// Coordinates are kept and vacated steps are filled with NaN.
    pub fn shift_time(&self, k: i64) -> Result<Self> {
        let n_time = self.n_time()?;
        let mut values = ArrayD::from_elem(self.values.raw_dim(), f64::NAN);

        let k_abs = usize::try_from(k.unsigned_abs()).unwrap_or(usize::MAX);
        if k_abs < n_time {
            let len = n_time - k_abs;
            let (src, dst) = if k >= 0 {
                (k_abs..n_time, 0..len)
            } else {
                (0..len, k_abs..n_time)
            };
            values
                .slice_axis_mut(Axis(0), Slice::from(dst))
                .assign(&self.values.slice_axis(Axis(0), Slice::from(src)));
        }

        Ok(Self {
            name: self.name.clone(),
            dims: self.dims.clone(),
            values,
        })
    }

    /// Drop time steps where every value is NaN.
    pub fn drop_missing_time(&self) -> Result<Self> {
        self.check_time_first()?;
        let keep: Vec<usize> = self
            .values
            .axis_iter(Axis(0))
            .enumerate()
            .filter(|(_, step)| !step.iter().all(|val| val.is_nan()))
            .map(|(i_time, _)| i_time)
            .collect();
        Ok(self.select(0, &keep))
    }

    /// Lag the array by `k` time steps.
    ///
    /// A positive `k` pairs the value at `t + k` with time coordinate `t`.
    /// Steps left without data are dropped.
    pub fn lag(&self, k: i64) -> Result<Self> {
        self.check_time_first()?;
        if k == 0 {
            return Ok(self.clone());
        }
        self.shift_time(k)?.drop_missing_time()
    }

    /// Centered moving average along time.
    ///
    /// The window of step `i` covers `[i - window / 2, i - window / 2 + window)`.
    /// Even windows are therefore centered half a step early. Steps whose
    /// window leaves the record, or contains NaN, are NaN.
    /// Windows of 0 or 1 leave the array unchanged.
    pub fn rolling_mean_time(&self, window: usize) -> Result<Self> {
        let n_time = self.n_time()?;
        if window <= 1 {
            return Ok(self.clone());
        }

        let half = window / 2;
        let mut values = ArrayD::from_elem(self.values.raw_dim(), f64::NAN);
        for i_time in half..n_time {
            let start = i_time - half;
            let end = start + window;
            if end > n_time {
                break;
            }
            let mean = self
                .values
                .slice_axis(Axis(0), Slice::from(start..end))
                .mean_axis(Axis(0))
                .context("failed to average window")?;
            values.index_axis_mut(Axis(0), i_time).assign(&mean);
        }

        Ok(Self {
            name: self.name.clone(),
            dims: self.dims.clone(),
            values,
        })
    }

    /// NaN-skipping mean along time.
    pub fn mean_time(&self) -> Result<Self> {
        self.check_time_first()?;
        let values = self.values.map_axis(Axis(0), nan_mean);
        Self::new(self.name.clone(), self.dims[1..].to_vec(), values)
    }

    /// Stack arrays with identical dims along a new leading dim.
    pub fn stack(name: &str, dim: Dim, arrays: &[DataArray]) -> Result<Self> {
        let first = arrays.first().context("no arrays to stack")?;
        if let Some(idx) = arrays.iter().position(|array| array.dims != first.dims) {
            bail!("array {idx} has dims differing from the first array");
        }

        let views: Vec<_> = arrays.iter().map(|array| array.values.view()).collect();
        let values = ndarray::stack(Axis(0), &views).context("failed to stack values")?;

        let mut dims = Vec::with_capacity(first.dims.len() + 1);
        dims.push(dim);
        dims.extend(first.dims.iter().cloned());

        Self::new(Some(name.to_owned()), dims, values)
    }
}

fn nan_mean(series: ArrayView1<f64>) -> f64 {
    let (sum, count) = series
        .iter()
        .filter(|val| !val.is_nan())
        .fold((0.0, 0usize), |(sum, count), &val| (sum + val, count + 1));
    if count == 0 {
        return f64::NAN;
    }
    sum / count as f64
}
