//! Component, switch and global parameter access.
//!
//! Component writes are verified by reading the values back. The engine
//! accepts writes to fields that are bound to a global parameter and then
//! silently keeps the old value; those keys are reported, not treated as
//! errors.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::engine::SimulationEngine;
use crate::error::{RemoteError, RemoteResult};

/// Ordered key -> value mapping for one component.
pub type ParameterSet = IndexMap<String, f64>;

/// Sigil the engine uses for global parameter names.
pub const GLOBAL_SIGIL: char = '$';

/// Outcome of a verified component write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteReport {
    pub component: String,
    /// Keys that kept their previous value after the write.
    pub unchanged: Vec<String>,
}

impl WriteReport {
    pub fn is_clean(&self) -> bool {
        self.unchanged.is_empty()
    }
}

/// Switch families with a fixed parameter vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchType {
    Mosfet,
    Igbt,
    Diode,
}

impl SwitchType {
    pub fn keys(self) -> &'static [&'static str] {
        match self {
            SwitchType::Mosfet => &["rON", "rOFF", "ad_uF", "ad_rON", "ad_rOFF", "paralleled"],
            SwitchType::Igbt => &["uF", "rON", "rOFF", "paralleled"],
            SwitchType::Diode => &["uF", "rON", "rOFF", "paralleled"],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SwitchType::Mosfet => "mosfet",
            SwitchType::Igbt => "igbt",
            SwitchType::Diode => "diode",
        }
    }
}

impl fmt::Display for SwitchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SwitchType {
    type Err = RemoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mosfet" => Ok(SwitchType::Mosfet),
            "igbt" => Ok(SwitchType::Igbt),
            "diode" => Ok(SwitchType::Diode),
            _ => Err(RemoteError::UnknownSwitchType(s.to_string())),
        }
    }
}

/// Parameter names for a switch type given by name; `None` if unknown.
///
/// This is static knowledge and never queries the engine.
pub fn switch_keys(switch_type: &str) -> Option<&'static [&'static str]> {
    let keys = switch_type.parse::<SwitchType>().ok().map(SwitchType::keys);
    debug!(switch_type, ?keys, "switch parameters");
    keys
}

/// Keys the engine exposes for `component`.
pub fn component_keys<E: SimulationEngine + ?Sized>(
    engine: &mut E,
    component: &str,
) -> RemoteResult<Vec<String>> {
    let component = component.to_uppercase();
    let entries = engine.accessible_parameters(&component)?;
    debug!(component = component.as_str(), ?entries, "accessible parameters");
    Ok(entries
        .iter()
        .map(|entry| entry.split('\t').next().unwrap_or_default().to_string())
        .collect())
}

/// Current values of every accessible key of `component`.
pub fn component_values<E: SimulationEngine + ?Sized>(
    engine: &mut E,
    component: &str,
) -> RemoteResult<ParameterSet> {
    let component = component.to_uppercase();
    let mut values = ParameterSet::new();
    for key in component_keys(engine, &component)? {
        let value = engine.get_parameter(&component, &key)?;
        values.insert(key, value);
    }
    debug!(component = component.as_str(), ?values, "component values");
    Ok(values)
}

/// Write `values` to `component` in one batch and verify they took effect.
///
/// Fails without writing if any key is not accessible on the component.
/// Keys whose value did not change are logged and returned in the report.
pub fn set_component_values<E: SimulationEngine + ?Sized>(
    engine: &mut E,
    component: &str,
    values: &ParameterSet,
) -> RemoteResult<WriteReport> {
    let component = component.to_uppercase();
    let existing = component_values(engine, &component)?;

    let invalid: Vec<String> = values
        .keys()
        .filter(|key| !existing.contains_key(*key))
        .cloned()
        .collect();
    if !invalid.is_empty() {
        return Err(RemoteError::InvalidKeys {
            target: component,
            invalid,
            valid: existing.keys().cloned().collect(),
        });
    }

    let to_check: ParameterSet = values
        .iter()
        .filter(|(key, value)| existing[key.as_str()] != **value)
        .map(|(key, _)| (key.clone(), existing[key.as_str()]))
        .collect();

    let (keys, new_values) = split(values);
    engine.set_parameters(&component, &keys, &new_values)?;

    let updated = component_values(engine, &component)?;
    let mut report = WriteReport {
        component: component.clone(),
        unchanged: Vec::new(),
    };
    for (key, before) in &to_check {
        if updated.get(key) == Some(before) {
            warn!(
                key = key.as_str(),
                component = component.as_str(),
                "value could not be updated, it may be bound to a global parameter"
            );
            report.unchanged.push(key.clone());
        }
    }
    Ok(report)
}

/// Write switch characteristics after checking them against the switch vocabulary.
pub fn set_switch_values<E: SimulationEngine + ?Sized>(
    engine: &mut E,
    switch_type: SwitchType,
    component: &str,
    values: &ParameterSet,
) -> RemoteResult<()> {
    let allowed = switch_type.keys();
    let invalid: Vec<String> = values
        .keys()
        .filter(|key| !allowed.contains(&key.as_str()))
        .cloned()
        .collect();
    if !invalid.is_empty() {
        return Err(RemoteError::InvalidKeys {
            target: format!("{switch_type} {component}"),
            invalid,
            valid: allowed.iter().map(|key| key.to_string()).collect(),
        });
    }

    let (keys, new_values) = split(values);
    engine.set_parameters(&component.to_uppercase(), &keys, &new_values)
}

/// Prefix `name` with the global sigil unless it already carries it.
pub fn global_name(name: &str) -> String {
    if name.starts_with(GLOBAL_SIGIL) {
        name.to_string()
    } else {
        format!("{GLOBAL_SIGIL}{name}")
    }
}

/// Write global parameters; names work with or without the `$` sigil.
pub fn set_global_parameters<E: SimulationEngine + ?Sized>(
    engine: &mut E,
    values: &ParameterSet,
) -> RemoteResult<()> {
    for (name, value) in values {
        engine.set_global_parameter(&global_name(name), *value)?;
    }
    Ok(())
}

/// Read global parameters by name, skipping the ones the engine refuses.
pub fn get_global_parameters<E, S>(engine: &mut E, names: &[S]) -> RemoteResult<ParameterSet>
where
    E: SimulationEngine + ?Sized,
    S: AsRef<str>,
{
    let mut values = ParameterSet::new();
    for name in names {
        let name = name.as_ref();
        match engine.get_global_parameter(&global_name(name)) {
            Ok(value) => {
                debug!(name, value, "global parameter");
                values.insert(name.to_string(), value);
            }
            Err(err) if err.is_engine_rejection() => {
                warn!(name, error = %err, "global parameter unavailable");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(values)
}

fn split(values: &ParameterSet) -> (Vec<String>, Vec<f64>) {
    values
        .iter()
        .map(|(key, value)| (key.clone(), *value))
        .unzip()
}
