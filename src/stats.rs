//! Pairwise reductions along time.

use crate::align::broadcast;
use crate::array::{DataArray, Dim};
use anyhow::{Context, Result};
use ndarray::{ArrayD, IxDyn};
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Single-pass accumulator of the first and second moments of `(x, y)` pairs.
///
/// Pairs where either value is NaN are skipped.
#[derive(Debug, Clone, Default)]
pub struct CoAccumulator {
    n_vals: usize,
    x_mean: f64,
    y_mean: f64,
    x_diff_2_sum: f64,
    y_diff_2_sum: f64,
    xy_diff_sum: f64,
}

/// Moments of a paired sample, with population (divide-by-`n`) variances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairMoments {
    pub n: usize,
    pub x_mean: f64,
    pub y_mean: f64,
    pub x_var: f64,
    pub y_var: f64,
    pub cov: f64,
}

impl CoAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, x: f64, y: f64) {
        if x.is_nan() || y.is_nan() {
            return;
        }

        self.n_vals += 1;
        let n_vals = self.n_vals as f64;

        let x_diff_a = x - self.x_mean;
        let y_diff_a = y - self.y_mean;
        self.x_mean += x_diff_a / n_vals;
        self.y_mean += y_diff_a / n_vals;

        let x_diff_b = x - self.x_mean;
        let y_diff_b = y - self.y_mean;
        self.x_diff_2_sum += x_diff_a * x_diff_b;
        self.y_diff_2_sum += y_diff_a * y_diff_b;
        self.xy_diff_sum += x_diff_a * y_diff_b;
    }

    pub fn report(&self) -> PairMoments {
        if self.n_vals == 0 {
            return PairMoments {
                n: 0,
                x_mean: f64::NAN,
                y_mean: f64::NAN,
                x_var: f64::NAN,
                y_var: f64::NAN,
                cov: f64::NAN,
            };
        }

        let n_vals = self.n_vals as f64;
        PairMoments {
            n: self.n_vals,
            x_mean: self.x_mean,
            y_mean: self.y_mean,
            x_var: self.x_diff_2_sum / n_vals,
            y_var: self.y_diff_2_sum / n_vals,
            cov: self.xy_diff_sum / n_vals,
        }
    }
}

impl PairMoments {
    /// Pearson correlation coefficient.
    pub fn cor(&self) -> f64 {
        (self.cov / (self.x_var.sqrt() * self.y_var.sqrt())).clamp(-1.0, 1.0)
    }

    /// Least-squares slope of `y` on `x`.
    pub fn slope(&self) -> f64 {
        self.cov / self.x_var
    }

    pub fn intercept(&self) -> f64 {
        self.y_mean - self.x_mean * self.slope()
    }

    /// Student's t statistic of the correlation, with `n - 2` degrees of freedom.
    pub fn t_stat(&self) -> f64 {
        let cor = self.cor();
        cor * (self.n as f64 - 2.0).sqrt() / (1.0 - cor.powi(2)).sqrt()
    }

    /// Two-sided p-value of the hypothesis of zero slope.
    pub fn pval(&self) -> f64 {
        2.0 * student_t_sf(self.t_stat().abs(), self.n as f64 - 2.0)
    }

    /// Standard error of the slope.
    pub fn stderr(&self) -> f64 {
        self.slope() / self.t_stat()
    }
}

/// Survival function of Student's t distribution with `df` degrees of freedom.
///
/// Returns NaN when `t` is NaN or `df` is not positive.
pub fn student_t_sf(t: f64, df: f64) -> f64 {
    if t.is_nan() || df.is_nan() || df <= 0.0 {
        return f64::NAN;
    }
    if t == f64::INFINITY {
        return 0.0;
    }
    if t == f64::NEG_INFINITY {
        return 1.0;
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => dist.sf(t),
        Err(_) => f64::NAN,
    }
}

/// Per-cell pair moments over the non-time dims of two arrays.
#[derive(Debug, Clone)]
pub struct MomentField {
    dims: Vec<Dim>,
    moments: ArrayD<PairMoments>,
}

impl MomentField {
    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    pub fn moments(&self) -> &ArrayD<PairMoments> {
        &self.moments
    }

    /// Evaluate a per-cell statistic into a named [`DataArray`].
    pub fn map<F>(&self, name: &str, stat: F) -> Result<DataArray>
    where
        F: Fn(&PairMoments) -> f64,
    {
        DataArray::new(
            Some(name.to_owned()),
            self.dims.clone(),
            self.moments.map(stat),
        )
    }
}

/// Broadcast `x` and `y` and accumulate the time series of every cell.
pub fn reduce_pairs(x: &DataArray, y: &DataArray) -> Result<MomentField> {
    let (x, y) = broadcast(x, y).context("failed to broadcast inputs")?;

    let n_time = x.n_time()?;
    let cell_shape = x.shape()[1..].to_vec();
    let n_cells: usize = cell_shape.iter().product();

    let x_vals = x
        .values()
        .to_shape((n_time, n_cells))
        .context("failed to reshape x")?;
    let y_vals = y
        .values()
        .to_shape((n_time, n_cells))
        .context("failed to reshape y")?;
    let (x_vals, y_vals) = (x_vals.view(), y_vals.view());

    log::debug!("reducing {n_cells} cells over {n_time} time steps");

    let moments: Vec<PairMoments> = (0..n_cells)
        .into_par_iter()
        .map(|i_cell| {
            let mut acc = CoAccumulator::new();
            for (&x_val, &y_val) in x_vals.column(i_cell).iter().zip(y_vals.column(i_cell)) {
                acc.add(x_val, y_val);
            }
            acc.report()
        })
        .collect();

    let moments = ArrayD::from_shape_vec(IxDyn(&cell_shape), moments)
        .context("failed to shape moments")?;

    Ok(MomentField {
        dims: x.dims()[1..].to_vec(),
        moments,
    })
}
