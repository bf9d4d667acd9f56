use crate::config::{Config, DetrendTask, LagCorTask, PairTask, Task};
use anyhow::{Context, Result, bail};
use glob::glob;
use mvstats::{DataArray, Lags, analysis};
use rmp_serde::encode;
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

/// Named arrays produced by a task.
type Results = BTreeMap<String, DataArray>;

pub struct Manager {
    work_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(work_dir: P) -> Result<Self> {
        let work_dir = work_dir.as_ref().to_path_buf();

        let cfg =
            Config::from_file(work_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self { work_dir, cfg })
    }

    pub fn run_tasks(&self, task_name: Option<&str>) -> Result<()> {
        let tasks: Vec<&Task> = match task_name {
            None => self.cfg.tasks.iter().collect(),
            Some(task_name) => {
                let task = self
                    .cfg
                    .tasks
                    .iter()
                    .find(|task| task.name() == task_name)
                    .with_context(|| format!("no task named {task_name:?}"))?;
                vec![task]
            }
        };

        let results_dir = self.results_dir();
        fs::create_dir_all(&results_dir)
            .with_context(|| format!("failed to create {results_dir:?}"))?;

        let n_tasks = tasks.len();
        for (i_task, task) in tasks.into_iter().enumerate() {
            let name = task.name();
            log::info!("running task {name:?} ({}/{n_tasks})", i_task + 1);

            let results = self
                .run_task(task)
                .with_context(|| format!("failed to run task {name:?}"))?;

            let results_file = self.results_file(name);
            save_results(&results, &results_file)
                .with_context(|| format!("failed to save {results_file:?}"))?;
            log::info!("saved {results_file:?}");
        }

        Ok(())
    }

    /// Remove the results files of every configured task.
    ///
    /// Other files in the results directory are kept. The directory itself
    /// is removed once empty, unless it is the working directory.
    pub fn clean_results(&self) -> Result<()> {
        let results_dir = self.results_dir();
        if !results_dir.is_dir() {
            log::info!("nothing to clean in {results_dir:?}");
            return Ok(());
        }

        for task in &self.cfg.tasks {
            let file = self.results_file(task.name());
            if !file.is_file() {
                continue;
            }
            fs::remove_file(&file).with_context(|| format!("failed to remove {file:?}"))?;
            log::info!("removed {file:?}");
        }

        let pattern = results_dir.join("*.msgpack");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        for file in glob(pattern).context("failed to glob results files")? {
            let file = file.context("failed to read glob entry")?;
            log::warn!("kept {file:?}, no task writes it");
        }

        let is_empty = fs::read_dir(&results_dir)
            .with_context(|| format!("failed to read {results_dir:?}"))?
            .next()
            .is_none();
        if is_empty && results_dir != self.work_dir {
            fs::remove_dir(&results_dir)
                .with_context(|| format!("failed to remove {results_dir:?}"))?;
            log::info!("removed {results_dir:?}");
        }

        Ok(())
    }

    fn run_task(&self, task: &Task) -> Result<Results> {
        let mut results = Results::new();
        match task {
            Task::Cov(task) => {
                let (x, y, lags) = self.load_pair(task)?;
                insert(&mut results, "cov", analysis::cov(&x, &y, lags)?);
            }
            Task::Cor(task) => {
                let (x, y, lags) = self.load_pair(task)?;
                insert(&mut results, "cor", analysis::cor(&x, &y, lags)?);
            }
            Task::Reg(task) => {
                let (x, y, lags) = self.load_pair(task)?;
                let (slope, intercept) = analysis::reg(&x, &y, lags)?;
                insert(&mut results, "slope", slope);
                insert(&mut results, "intercept", intercept);
            }
            Task::Linregress(task) => {
                let (x, y, lags) = self.load_pair(task)?;
                let summary = analysis::linregress(&x, &y, lags)?;
                for (key, array) in summary.fields() {
                    insert(&mut results, key, array.clone());
                }
                insert(&mut results, "confidence", summary.confidence()?);
                if let Some(alpha) = task.alpha {
                    insert(&mut results, "significant", summary.significant(alpha)?);
                }
            }
            Task::LagCor(LagCorTask { x, y, lags, .. }) => {
                let x = self.load_array(x).context("failed to load x")?;
                let y = self.load_array(y).context("failed to load y")?;
                let scan = analysis::lag_cor(&x, &y, lags)?;
                let peak = analysis::peak_lag(&scan)?;
                insert(&mut results, "lag_cor", scan);
                insert(&mut results, "peak_lag", peak.lag);
                insert(&mut results, "peak_cor", peak.cor);
            }
            Task::Detrend(DetrendTask {
                y,
                rolling_mean_window,
                ..
            }) => {
                let y = self.load_array(y).context("failed to load y")?;
                let detrended = analysis::detrend(&y, *rolling_mean_window)?;
                insert(&mut results, "detrended", detrended);
            }
        }
        Ok(results)
    }

    fn load_pair(&self, task: &PairTask) -> Result<(DataArray, DataArray, Lags)> {
        let x = self.load_array(&task.x).context("failed to load x")?;
        let y = self.load_array(&task.y).context("failed to load y")?;
        Ok((x, y, Lags::new(task.lagx, task.lagy)))
    }

    fn load_array(&self, file: &Path) -> Result<DataArray> {
        let file = self.work_dir.join(file);
        let array = DataArray::from_file(&file)?;
        log::debug!("loaded {file:?} with sizes {:?}", array.sizes());
        Ok(array)
    }

    fn results_dir(&self) -> PathBuf {
        self.work_dir.join(&self.cfg.output.dir)
    }

    fn results_file(&self, task_name: &str) -> PathBuf {
        self.results_dir().join(format!("{task_name}.msgpack"))
    }
}

fn insert(results: &mut Results, key: &str, array: DataArray) {
    results.insert(key.to_owned(), array.with_name(key));
}

fn save_results(results: &Results, file: &Path) -> Result<()> {
    if results.is_empty() {
        bail!("task produced no results");
    }
    let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
    let mut writer = BufWriter::new(file);
    encode::write(&mut writer, results).context("failed to serialize results")?;
    writer.flush().context("failed to flush writer stream")?;
    Ok(())
}
