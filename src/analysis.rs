//! Covariance, correlation, regression and detrending along time.
//!
//! Every function pairs `x` and `y` cell by cell over the `time` dim, after
//! lagging each input by its entry in [`Lags`] and aligning the two on their
//! shared coordinates. Results carry the non-time dims of the inputs.

use crate::array::{DataArray, Dim};
use crate::stats::{MomentField, reduce_pairs};
use crate::utils::check_num;
use anyhow::{Context, Result, bail};
use ndarray::{Axis, Zip};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, ops::Bound};

/// Name of the dim added by [`lag_cor`].
pub const LAG_DIM: &str = "lag";

/// Time lags applied to `x` and `y` before pairing.
///
/// A positive `x` lag pairs `x[t + x]` with `y[t]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lags {
    pub x: i64,
    pub y: i64,
}

impl Lags {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

fn lagged_moments(x: &DataArray, y: &DataArray, lags: Lags) -> Result<MomentField> {
    let x = x.lag(lags.x).context("failed to lag x")?;
    let y = y.lag(lags.y).context("failed to lag y")?;
    reduce_pairs(&x, &y)
}

/// Covariance between `x` and `y`.
pub fn cov(x: &DataArray, y: &DataArray, lags: Lags) -> Result<DataArray> {
    lagged_moments(x, y, lags)?.map("cov", |m| m.cov)
}

/// Pearson correlation coefficient between `x` and `y`.
pub fn cor(x: &DataArray, y: &DataArray, lags: Lags) -> Result<DataArray> {
    lagged_moments(x, y, lags)?.map("cor", |m| m.cor())
}

/// Regression slope and intercept of `y` with respect to `x`.
pub fn reg(x: &DataArray, y: &DataArray, lags: Lags) -> Result<(DataArray, DataArray)> {
    let field = lagged_moments(x, y, lags)?;
    let slope = field.map("slope", |m| m.slope())?;
    let intercept = field.map("intercept", |m| m.intercept())?;
    Ok((slope, intercept))
}

/// Full linear regression summary of `y` with respect to `x`.
#[derive(Debug, Clone, PartialEq)]
pub struct Linregress {
    /// Number of valid pairs.
    pub n: DataArray,
    pub cov: DataArray,
    pub cor: DataArray,
    pub slope: DataArray,
    pub intercept: DataArray,
    /// Two-sided p-value of the hypothesis of zero slope.
    pub pval: DataArray,
    /// Standard error of the slope.
    pub stderr: DataArray,
}

impl Linregress {
    /// Confidence level (`1 - pval`) that the slope is non-zero.
    pub fn confidence(&self) -> Result<DataArray> {
        map_values(&self.pval, "confidence", |pval| 1.0 - pval)
    }

    /// Mask of cells with `pval < alpha`: 1.0 when significant, 0.0 when not,
    /// NaN when the p-value is undefined.
    pub fn significant(&self, alpha: f64) -> Result<DataArray> {
        check_num(alpha, (Bound::Excluded(0.0), Bound::Excluded(1.0)))
            .context("invalid significance level")?;
        map_values(&self.pval, "significant", |pval| {
            if pval.is_nan() {
                f64::NAN
            } else if pval < alpha {
                1.0
            } else {
                0.0
            }
        })
    }

    /// Named fields, in a fixed order.
    pub fn fields(&self) -> [(&'static str, &DataArray); 7] {
        [
            ("n", &self.n),
            ("cov", &self.cov),
            ("cor", &self.cor),
            ("slope", &self.slope),
            ("intercept", &self.intercept),
            ("pval", &self.pval),
            ("stderr", &self.stderr),
        ]
    }
}

/// Covariance, correlation, slope, intercept, p-value and standard error of
/// the regression of `y` on `x`.
pub fn linregress(x: &DataArray, y: &DataArray, lags: Lags) -> Result<Linregress> {
    let field = lagged_moments(x, y, lags)?;
    Ok(Linregress {
        n: field.map("n", |m| m.n as f64)?,
        cov: field.map("cov", |m| m.cov)?,
        cor: field.map("cor", |m| m.cor())?,
        slope: field.map("slope", |m| m.slope())?,
        intercept: field.map("intercept", |m| m.intercept())?,
        pval: field.map("pval", |m| m.pval())?,
        stderr: field.map("stderr", |m| m.stderr())?,
    })
}

/// Correlation of `x` lagged by each of `lags` against `y`.
///
/// The result gains a leading [`LAG_DIM`] dim whose coordinates are the lags.
pub fn lag_cor(x: &DataArray, y: &DataArray, lags: &[i64]) -> Result<DataArray> {
    if lags.is_empty() {
        bail!("lag list must not be empty");
    }
    let mut seen = HashSet::with_capacity(lags.len());
    if let Some(lag) = lags.iter().find(|&&lag| !seen.insert(lag)) {
        bail!("lag {lag} is repeated");
    }

    let cors = lags
        .iter()
        .map(|&lag| {
            cor(x, y, Lags::new(lag, 0)).with_context(|| format!("failed to correlate at lag {lag}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let lag_dim = Dim::new(LAG_DIM, lags.iter().map(|&lag| lag as f64).collect());
    DataArray::stack("lag_cor", lag_dim, &cors)
}

/// Lag of maximum absolute correlation in a [`lag_cor`] scan, per cell.
#[derive(Debug, Clone, PartialEq)]
pub struct PeakLag {
    pub lag: DataArray,
    pub cor: DataArray,
}

/// Locate, for each cell, the lag whose correlation is largest in magnitude.
///
/// Cells without any finite correlation get NaN.
pub fn peak_lag(scan: &DataArray) -> Result<PeakLag> {
    match scan.dims().first() {
        Some(dim) if dim.name == LAG_DIM => {}
        _ => bail!(
            "first dim must be {LAG_DIM:?}, but dims are {:?}",
            scan.dim_names()
        ),
    }
    let lag_coords = &scan.dims()[0].coords;

    let peak_idx = scan.values().map_axis(Axis(0), |cors| {
        cors.iter()
            .enumerate()
            .filter(|(_, cor)| !cor.is_nan())
            .max_by(|(_, a), (_, b)| a.abs().total_cmp(&b.abs()))
            .map(|(idx, _)| idx)
    });
    let lag = peak_idx.map(|idx| idx.map_or(f64::NAN, |idx| lag_coords[idx]));
    let cor = Zip::from(scan.values().lanes(Axis(0)))
        .and(&peak_idx)
        .map_collect(|cors, idx| idx.map_or(f64::NAN, |idx| cors[idx]));

    let dims = scan.dims()[1..].to_vec();
    Ok(PeakLag {
        lag: DataArray::new(Some("peak_lag".to_owned()), dims.clone(), lag)?,
        cor: DataArray::new(Some("peak_cor".to_owned()), dims, cor)?,
    })
}

/// Remove the linear trend along time from `y`, keeping its time mean.
///
/// The trend is fitted against the time index `0, 1, 2, ...`. A
/// `rolling_mean_window` above 1 smooths `y` with a centered moving average
/// before fitting (e.g. 12 for monthly data removes the seasonal cycle); the
/// smoothed series only drives the fit and the output keeps every time step.
pub fn detrend(y: &DataArray, rolling_mean_window: usize) -> Result<DataArray> {
    let x = DataArray::time_index(y.time()?)?;
    let y_smooth = y
        .rolling_mean_time(rolling_mean_window)
        .context("failed to smooth y")?;
    let (slope, intercept) =
        reg(&x, &y_smooth, Lags::default()).context("failed to fit trend")?;
    let y_mean = y.mean_time().context("failed to average y")?;

    let mut values = y.values().clone();
    for (i_time, step) in values.axis_iter_mut(Axis(0)).enumerate() {
        let t = i_time as f64;
        Zip::from(step)
            .and(slope.values())
            .and(intercept.values())
            .and(y_mean.values())
            .for_each(|val, &slope, &intercept, &mean| {
                *val = *val - (slope * t + intercept) + mean;
            });
    }

    DataArray::new(y.name().map(str::to_owned), y.dims().to_vec(), values)
}

fn map_values<F>(array: &DataArray, name: &str, f: F) -> Result<DataArray>
where
    F: Fn(f64) -> f64,
{
    DataArray::new(
        Some(name.to_owned()),
        array.dims().to_vec(),
        array.values().mapv(f),
    )
}
