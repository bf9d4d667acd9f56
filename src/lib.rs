//! Vectorized multivariate statistics for multi-dimensional earth system data.
//!
//! Inputs are [`DataArray`]s: labeled arrays whose first dim is `time`.
//! Statistics are computed independently for every cell of the remaining
//! dims, so a single time series can be related to a whole grid at once.

pub mod align;
pub mod analysis;
pub mod array;
pub mod stats;
pub mod utils;

pub use analysis::{
    Lags, Linregress, PeakLag, cor, cov, detrend, lag_cor, linregress, peak_lag, reg,
};
pub use array::{DataArray, Dim, TIME_DIM};
