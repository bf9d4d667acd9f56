use mvstats::{DataArray, Dim};
use ndarray::Array2;
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
    process::Command,
};

fn run_bin(args: &[&str]) -> bool {
    let bin = PathBuf::from(env!("CARGO_BIN_EXE_mvstats"));

    let output = Command::new(bin)
        .args(args)
        .output()
        .expect("failed to execute command");

    let stdout_str =
        std::str::from_utf8(&output.stdout).expect("failed to convert stdout to string");
    let stderr_str =
        std::str::from_utf8(&output.stderr).expect("failed to convert stderr to string");
    if !output.status.success() {
        eprintln!("binary failed with {args:?}\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n");
    }

    output.status.success()
}

fn load_results(file: &Path) -> BTreeMap<String, DataArray> {
    let file = File::open(file).expect("failed to open results file");
    rmp_serde::decode::from_read(BufReader::new(file)).expect("failed to decode results")
}

fn write_inputs(test_dir: &Path) {
    let n_time = 24;
    let index: Vec<f64> = (0..n_time)
        .map(|t| (t as f64 * 0.7).sin() + 0.05 * t as f64)
        .collect();
    let times: Vec<f64> = (0..n_time).map(|t| 1950.0 + t as f64).collect();

    DataArray::time_series("index", times.clone(), index.clone())
        .expect("failed to build index")
        .to_file(test_dir.join("index.msgpack"))
        .expect("failed to write index");

    // The first column follows the index two steps later, the second trends.
    let values = Array2::from_shape_fn((n_time, 2), |(t, lon)| match lon {
        0 => 2.0 * index[t.saturating_sub(2)] + 1.0,
        _ => 0.3 * t as f64 + (t as f64).cos(),
    });
    DataArray::new(
        Some("field".to_owned()),
        vec![Dim::new("time", times), Dim::new("lon", vec![0.0, 180.0])],
        values.into_dyn(),
    )
    .expect("failed to build field")
    .to_file(test_dir.join("field.msgpack"))
    .expect("failed to write field");
}

#[test]
fn basic_workflow() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("basic_workflow");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");

    write_inputs(&test_dir);

    let config_path = test_dir.join("config.toml");
    let config_contents = String::new()
        + "[output]\n"
        + "dir = \"out\"\n"
        + "\n"
        + "[[task]]\n"
        + "name = \"index_field\"\n"
        + "kind = \"linregress\"\n"
        + "x = \"index.msgpack\"\n"
        + "y = \"field.msgpack\"\n"
        + "lagy = 2\n"
        + "alpha = 0.05\n"
        + "\n"
        + "[[task]]\n"
        + "name = \"scan\"\n"
        + "kind = \"lag_cor\"\n"
        + "x = \"index.msgpack\"\n"
        + "y = \"field.msgpack\"\n"
        + "lags = [-3, -2, -1, 0, 1, 2, 3]\n"
        + "\n"
        + "[[task]]\n"
        + "name = \"field_cov\"\n"
        + "kind = \"cov\"\n"
        + "x = \"index.msgpack\"\n"
        + "y = \"field.msgpack\"\n"
        + "\n"
        + "[[task]]\n"
        + "name = \"field_detrended\"\n"
        + "kind = \"detrend\"\n"
        + "y = \"field.msgpack\"\n"
        + "rolling_mean_window = 3\n";

    fs::write(&config_path, config_contents).expect("failed to write config file");

    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    assert!(run_bin(&["--work-dir", test_dir_str, "run"]));

    let out_dir = test_dir.join("out");
    let summary = load_results(&out_dir.join("index_field.msgpack"));
    for key in [
        "n",
        "cov",
        "cor",
        "slope",
        "intercept",
        "pval",
        "stderr",
        "confidence",
        "significant",
    ] {
        assert!(summary.contains_key(key), "missing {key}");
    }
    let slope = &summary["slope"];
    assert_eq!(slope.dim_names(), vec!["lon"]);
    assert!((slope.values()[[0]] - 2.0).abs() < 1e-9);
    assert_eq!(summary["significant"].values()[[0]], 1.0);
    assert_eq!(summary["n"].values()[[0]], 22.0);

    let scan = load_results(&out_dir.join("scan.msgpack"));
    assert_eq!(scan["lag_cor"].dim_names(), vec!["lag", "lon"]);
    assert_eq!(scan["peak_lag"].values()[[0]], -2.0);

    let detrended = load_results(&out_dir.join("field_detrended.msgpack"));
    assert_eq!(detrended["detrended"].shape(), &[24, 2]);

    assert!(out_dir.join("field_cov.msgpack").is_file());

    // Rerunning a single task only rewrites its own results.
    fs::remove_file(out_dir.join("scan.msgpack")).expect("failed to remove scan results");
    assert!(run_bin(&["--work-dir", test_dir_str, "run", "--task", "field_cov"]));
    assert!(!out_dir.join("scan.msgpack").exists());
    assert!(!run_bin(&["--work-dir", test_dir_str, "run", "--task", "missing"]));

    assert!(run_bin(&["--work-dir", test_dir_str, "clean"]));
    assert!(!out_dir.exists());

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn invalid_config_is_rejected() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("invalid_config");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");

    let config_contents = String::new()
        + "[[task]]\n"
        + "name = \"scan\"\n"
        + "kind = \"lag_cor\"\n"
        + "x = \"index.msgpack\"\n"
        + "y = \"field.msgpack\"\n"
        + "lags = [1, 1]\n";
    fs::write(test_dir.join("config.toml"), config_contents).expect("failed to write config file");

    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");
    assert!(!run_bin(&["--work-dir", test_dir_str, "run"]));

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn clean_keeps_inputs_next_to_results() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("clean_keeps_inputs");

    fs::remove_dir_all(&test_dir).ok();
    let out_dir = test_dir.join("out");
    fs::create_dir_all(&out_dir).expect("failed to create test directory");

    let times: Vec<f64> = (0..8).map(|t| t as f64).collect();
    let values: Vec<f64> = (0..8).map(|t| 0.5 * t as f64 + (t as f64).sin()).collect();
    let input_file = out_dir.join("input.msgpack");
    DataArray::time_series("input", times, values)
        .expect("failed to build input")
        .to_file(&input_file)
        .expect("failed to write input");

    let task = String::new()
        + "[[task]]\n"
        + "name = \"detrended\"\n"
        + "kind = \"detrend\"\n"
        + "y = \"out/input.msgpack\"\n";

    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    // Results may not be written into the working directory itself.
    for dir in [".", ".."] {
        let config_contents = format!("[output]\ndir = {dir:?}\n\n{task}");
        fs::write(test_dir.join("config.toml"), config_contents)
            .expect("failed to write config file");
        assert!(!run_bin(&["--work-dir", test_dir_str, "run"]));
        assert!(!run_bin(&["--work-dir", test_dir_str, "clean"]));
    }
    assert!(input_file.is_file());

    let config_contents = format!("[output]\ndir = \"out\"\n\n{task}");
    fs::write(test_dir.join("config.toml"), config_contents).expect("failed to write config file");

    assert!(run_bin(&["--work-dir", test_dir_str, "run"]));
    assert!(out_dir.join("detrended.msgpack").is_file());

    assert!(run_bin(&["--work-dir", test_dir_str, "clean"]));
    assert!(!out_dir.join("detrended.msgpack").exists());
    assert!(input_file.is_file());
    DataArray::from_file(&input_file).expect("failed to read input after clean");

    fs::remove_dir_all(&test_dir).ok();
}
