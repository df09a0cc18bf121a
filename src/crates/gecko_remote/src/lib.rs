//! Remote control of a GeckoCIRCUITS simulation engine: open a circuit, tune
//! its parameters, run it and reduce the recorded signals to statistics.
//!
//! Typical usage:
//! ```no_run
//! use gecko_remote::{
//!     ConfigResolver, EngineConfig, GeckoSimulation, InstallPaths, RangeSpec, RemoteEngine,
//!     RunOverrides, StdinPrompt,
//! };
//!
//! let mut prompt = StdinPrompt::stdio();
//! let mut resolver = ConfigResolver::new()
//!     .with_record("gecko_config.json")
//!     .with_prompt(&mut prompt);
//! let install = InstallPaths::resolve(&mut resolver).expect("install paths");
//!
//! let config = EngineConfig::new("/opt/gecko/bin/gecko-bridge").with_install_paths(install);
//! let engine = RemoteEngine::spawn(config).expect("engine should launch");
//! let mut sim = GeckoSimulation::open(engine, "buck_converter.ipes", None).unwrap();
//!
//! sim.run_simulation(RunOverrides::default()).unwrap();
//! let report = sim
//!     .get_values(&["v_HS", "i_L"], &["mean", "rms"], Some(&RangeSpec::last(2e-3)))
//!     .unwrap();
//! for (operation, row) in &report.values {
//!     println!("{operation}: {row:?}");
//! }
//! ```

mod config;
mod engine;
mod error;
mod export;
pub mod params;
pub mod protocol;
pub mod range;
mod remote;
mod simulation;
pub mod stats;

#[cfg(any(test, feature = "test-support"))]
pub mod mock;

pub use config::{
    ConfigResolver, EngineConfig, InstallItem, InstallPaths, InstallPrompt, StdinPrompt,
    DEFAULT_GECKO_PORT,
};
pub use engine::SimulationEngine;
pub use error::{RemoteError, RemoteResult};
pub use export::ScopeTable;
pub use params::{ParameterSet, SwitchType, WriteReport};
pub use range::{RangeSpec, RangeValue, SimulationBounds, TimeWindow};
pub use remote::{LogLine, LogStream, RemoteEngine};
pub use simulation::{GeckoSimulation, RunOverrides, ScopeQuery, SimulationTiming};
pub use stats::{Operation, QueryFailure, StatsReport};
