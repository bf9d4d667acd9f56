use anyhow::{Context, Result, bail};
use mvstats::utils::check_num;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs,
    ops::Bound,
    path::{Component, Path, PathBuf},
};

/// Batch configuration.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Output parameters.
    #[serde(default)]
    pub output: OutputConfig,

    /// Tasks to run, in order.
    #[serde(rename = "task")]
    pub tasks: Vec<Task>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Results directory, relative to the working directory.
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("results"),
        }
    }
}

/// Statistical task, tagged by `kind`.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Task {
    Cov(PairTask),
    Cor(PairTask),
    Reg(PairTask),
    Linregress(PairTask),
    LagCor(LagCorTask),
    Detrend(DetrendTask),
}

/// Task relating `y` to `x`.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PairTask {
    pub name: String,
    pub x: PathBuf,
    pub y: PathBuf,
    #[serde(default)]
    pub lagx: i64,
    #[serde(default)]
    pub lagy: i64,
    /// Significance level of the `significant` mask (`linregress` only).
    pub alpha: Option<f64>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct LagCorTask {
    pub name: String,
    pub x: PathBuf,
    pub y: PathBuf,
    pub lags: Vec<i64>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct DetrendTask {
    pub name: String,
    pub y: PathBuf,
    #[serde(default)]
    pub rolling_mean_window: usize,
}

const MAX_LAG: i64 = 100_000;

impl Task {
    pub fn name(&self) -> &str {
        match self {
            Task::Cov(task) | Task::Cor(task) | Task::Reg(task) | Task::Linregress(task) => {
                &task.name
            }
            Task::LagCor(task) => &task.name,
            Task::Detrend(task) => &task.name,
        }
    }

    fn validate(&self) -> Result<()> {
        let name = self.name();
        if name.is_empty() || name.contains(['/', '\\']) {
            bail!("task name must be non-empty and contain no path separators");
        }

        match self {
            Task::Cov(task) | Task::Cor(task) | Task::Reg(task) => {
                task.validate_lags()?;
                if task.alpha.is_some() {
                    bail!("alpha is only supported by linregress tasks");
                }
            }
            Task::Linregress(task) => {
                task.validate_lags()?;
                if let Some(alpha) = task.alpha {
                    check_num(alpha, (Bound::Excluded(0.0), Bound::Excluded(1.0)))
                        .context("invalid significance level")?;
                }
            }
            Task::LagCor(task) => {
                if task.lags.is_empty() {
                    bail!("lag list must not be empty");
                }
                for &lag in &task.lags {
                    check_num(lag, -MAX_LAG..=MAX_LAG).context("invalid lag")?;
                }
                let mut seen = HashSet::new();
                if let Some(lag) = task.lags.iter().find(|&&lag| !seen.insert(lag)) {
                    bail!("lag {lag} is repeated");
                }
            }
            Task::Detrend(task) => {
                check_num(task.rolling_mean_window, 0..=MAX_LAG as usize)
                    .context("invalid rolling mean window")?;
            }
        }

        Ok(())
    }
}

impl PairTask {
    fn validate_lags(&self) -> Result<()> {
        check_num(self.lagx, -MAX_LAG..=MAX_LAG).context("invalid x lag")?;
        check_num(self.lagy, -MAX_LAG..=MAX_LAG).context("invalid y lag")?;
        Ok(())
    }
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML-encoded and contain a serialized [`Config`].
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: Config = toml::from_str(&contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.tasks.is_empty() {
            bail!("config must contain at least one task");
        }
        let dir = &self.output.dir;
        if dir.as_os_str().is_empty() {
            bail!("output directory must not be empty");
        }
        if !dir
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            bail!("output directory {dir:?} must be a relative path below the working directory");
        }

        let mut names = HashSet::new();
        for task in &self.tasks {
            let name = task.name();
            task.validate()
                .with_context(|| format!("invalid task {name:?}"))?;
            if !names.insert(name) {
                bail!("task name {name:?} is repeated");
            }
        }

        Ok(())
    }
}
