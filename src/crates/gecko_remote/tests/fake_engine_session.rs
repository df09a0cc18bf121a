#![cfg(feature = "test-support")]

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use gecko_remote::{
    EngineConfig, GeckoSimulation, LogStream, Operation, ParameterSet, RangeSpec, RemoteEngine,
    RemoteError, RunOverrides, ScopeQuery, SimulationEngine,
};
use tempfile::TempDir;

fn fake_engine_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_fake_engine") {
        return PathBuf::from(path);
    }

    // Fallback to the workspace target directory.
    let mut path = std::env::current_exe().expect("current exe");
    path.pop(); // deps
    path.pop(); // debug or release
    path.push("fake_engine");
    if cfg!(windows) {
        path.set_extension("exe");
    }
    path
}

fn spawn(extra_args: &[&str]) -> RemoteEngine {
    let config = extra_args
        .iter()
        .fold(EngineConfig::new(fake_engine_path()), |config, arg| {
            config.with_arg(*arg)
        });
    RemoteEngine::spawn(config).expect("engine should launch")
}

fn sim_file(dir: &Path) -> PathBuf {
    let path = dir.join("buck_converter.ipes");
    std::fs::write(&path, b"ipes").expect("write simulation file");
    path
}

fn wait_for_exit(engine: &mut RemoteEngine) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(2) {
        if engine.exit_status().expect("poll exit status").is_some() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn timing_is_read_over_the_wire() {
    let mut engine = spawn(&[]);
    assert!(engine.is_connected());
    assert_eq!(engine.get_tend_pre().unwrap(), 0.1);
    assert_eq!(engine.get_tend().unwrap(), 0.05);

    engine.set_tend(0.02).unwrap();
    assert_eq!(engine.get_tend().unwrap(), 0.02);

    let logs = engine.all_logs();
    assert!(logs
        .iter()
        .any(|log| log.stream == LogStream::Stdout && log.line.starts_with("listening on")));
    engine.close().expect("close should succeed");
}

#[test]
fn rejected_call_keeps_the_connection() {
    let mut engine = spawn(&[]);
    let err = engine.get_parameter("R.9", "R").unwrap_err();
    assert!(err.is_engine_rejection(), "unexpected error {err:?}");
    assert!(engine.is_connected());
    assert_eq!(engine.get_parameter("R.1", "R").unwrap(), 10.0);
}

#[test]
fn statistics_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let engine = spawn(&["--fail-statistic", "thd:i_L"]);
    let mut sim = GeckoSimulation::open(engine, sim_file(tmp.path()), None).unwrap();
    sim.run_simulation(RunOverrides::default()).unwrap();

    let report = sim
        .get_values(
            &["v_HS", "i_L"],
            &["max", "THD", "mean"],
            Some(&RangeSpec::last(2e-3)),
        )
        .unwrap();

    let operations: Vec<_> = report.values.keys().copied().collect();
    assert_eq!(operations, vec![Operation::Max, Operation::Thd, Operation::Mean]);
    assert_eq!(report.get(Operation::Max, "v_HS"), Some(48.0));
    assert_eq!(report.get(Operation::Thd, "i_L"), None);
    assert!(report.get(Operation::Thd, "v_HS").is_some());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].signal, "i_L");
    assert!(sim.engine().is_connected());
}

#[test]
fn undefined_statistic_does_not_spoil_the_request() {
    let tmp = TempDir::new().unwrap();
    let engine = spawn(&[]);
    let mut sim = GeckoSimulation::open(engine, sim_file(tmp.path()), None).unwrap();

    let report = sim
        .get_values(&["v_out", "v_HS"], &["thd", "max"], None)
        .unwrap();
    assert!(report.is_complete());
    assert!(report.get(Operation::Thd, "v_out").unwrap().is_nan());
    assert_eq!(report.get(Operation::Thd, "v_HS"), Some(0.4834));
    assert_eq!(report.get(Operation::Max, "v_out"), Some(24.0));
    assert_eq!(report.get(Operation::Max, "v_HS"), Some(48.0));
    assert!(sim.engine().is_connected());

    sim.set_global_parameters(
        &[("V_in".to_string(), f64::INFINITY)].into_iter().collect(),
        false,
    )
    .unwrap();
    let values = sim.get_global_parameters(&["V_in"]).unwrap();
    assert_eq!(values["V_in"], f64::INFINITY);
}

#[test]
fn unknown_operation_is_rejected_locally() {
    let tmp = TempDir::new().unwrap();
    let engine = spawn(&[]);
    let mut sim = GeckoSimulation::open(engine, sim_file(tmp.path()), None).unwrap();

    let err = sim.get_values(&["v_HS"], &["variance"], None).unwrap_err();
    match err {
        RemoteError::UnknownOperation { received, supported } => {
            assert_eq!(received, "variance");
            assert!(supported.contains(&"ripple"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn bound_parameter_is_reported_after_write() {
    let tmp = TempDir::new().unwrap();
    let engine = spawn(&["--shadow", "L.1:iL(0)"]);
    let mut sim = GeckoSimulation::open(engine, sim_file(tmp.path()), None).unwrap();

    let values: ParameterSet = [("iL(0)".to_string(), 100.0), ("L".to_string(), 220e-6)]
        .into_iter()
        .collect();
    let report = sim.set_component_values("l.1", &values).unwrap();
    assert_eq!(report.component, "L.1");
    assert_eq!(report.unchanged, vec!["iL(0)".to_string()]);

    let current = sim.get_component_values("L.1").unwrap();
    assert_eq!(current["L"], 220e-6);
    assert_eq!(current["iL(0)"], 0.0);
}

#[test]
fn scope_data_is_exported() {
    let tmp = TempDir::new().unwrap();
    let engine = spawn(&[]);
    let mut sim = GeckoSimulation::open(engine, sim_file(tmp.path()), None).unwrap();

    let written = sim
        .get_scope_data(
            &["v_out", "v_sense"],
            tmp.path().join("buck_scope"),
            ScopeQuery {
                start: Some(0.0),
                stop: Some(0.01),
                skip: 9,
            },
        )
        .unwrap()
        .expect("v_out should be exported");
    assert_eq!(written, tmp.path().join("buck_scope.csv"));

    let text = std::fs::read_to_string(written).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("time v_out"));
    assert!(lines.all(|line| line.ends_with(" 24")));
}

#[test]
fn loss_file_reaches_the_switches() {
    let tmp = TempDir::new().unwrap();
    let scl = tmp.path().join("switch_losses.scl");
    std::fs::write(&scl, b"scl").unwrap();
    let engine = spawn(&[]);
    let mut sim = GeckoSimulation::open(engine, sim_file(tmp.path()), None).unwrap();

    sim.set_loss_file(&["MOSFET.1", "MOSFET.2"], &scl).unwrap();
    let err = sim.set_loss_file(&["IGBT.1"], &scl).unwrap_err();
    assert!(matches!(err, RemoteError::UnknownComponents { .. }));
}

#[test]
fn shutdown_stops_the_engine_process() {
    let tmp = TempDir::new().unwrap();
    let engine = spawn(&[]);
    let mut sim = GeckoSimulation::open(engine, sim_file(tmp.path()), None).unwrap();

    sim.engine_mut().shutdown().expect("shutdown should succeed");
    assert!(!sim.engine().is_connected());
    assert!(wait_for_exit(sim.engine_mut()), "engine kept running");

    let err = sim.sim_time().unwrap_err();
    assert!(matches!(err, RemoteError::ConnectionClosed));
}

#[cfg(target_os = "linux")]
#[test]
fn dropping_the_session_reaps_the_engine() {
    let tmp = TempDir::new().unwrap();
    let engine = spawn(&[]);
    let proc_dir = PathBuf::from(format!("/proc/{}", engine.id()));
    let sim = GeckoSimulation::open(engine, sim_file(tmp.path()), None).unwrap();
    assert!(proc_dir.exists());

    drop(sim);
    assert!(!proc_dir.exists(), "engine process still present");
}
