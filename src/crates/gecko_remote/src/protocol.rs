//! Wire format spoken between the client and an engine bridge process.
//!
//! Every message is a JSON document prefixed with its length as a big-endian
//! `u32`. The client sends one [`RequestEnvelope`] and blocks on the matching
//! [`ResponseEnvelope`].
//!
//! JSON has no NaN or infinity, so those values travel as the strings
//! `"NaN"`, `"inf"` and `"-inf"`.

use std::io::{self, Read, Write};
use std::path::Path;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::engine::SimulationEngine;
use crate::error::{RemoteError, RemoteResult};

/// Largest frame either side will accept.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EngineRequest {
    OpenFile { path: String },
    SaveFileAs { path: String },
    RunSimulation,
    Shutdown,
    SetDt {
        #[serde(with = "wire_float")]
        value: f64,
    },
    SetTend {
        #[serde(with = "wire_float")]
        value: f64,
    },
    SetDtPre {
        #[serde(with = "wire_float")]
        value: f64,
    },
    SetTendPre {
        #[serde(with = "wire_float")]
        value: f64,
    },
    GetDt,
    GetTend,
    GetDtPre,
    GetTendPre,
    GetGlobalParameter { name: String },
    SetGlobalParameter {
        name: String,
        #[serde(with = "wire_float")]
        value: f64,
    },
    AccessibleParameters { component: String },
    GetParameter { component: String, key: String },
    SetParameters {
        component: String,
        keys: Vec<String>,
        #[serde(with = "wire_floats")]
        values: Vec<f64>,
    },
    CircuitElements,
    DoOperation { component: String, operation: String, argument: String },
    SignalData { node: String, start: f64, end: f64, skip: usize },
    TimeArray { node: String, start: f64, end: f64, skip: usize },
    SignalAvg { node: String, start: f64, end: f64 },
    SignalRms { node: String, start: f64, end: f64 },
    SignalMax { node: String, start: f64, end: f64 },
    SignalMin { node: String, start: f64, end: f64 },
    SignalThd { node: String, start: f64, end: f64 },
    SignalRipple { node: String, start: f64, end: f64 },
    SignalShape { node: String, start: f64, end: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EngineResponse {
    Ack,
    Value(#[serde(with = "wire_float")] f64),
    Values(#[serde(with = "wire_floats")] Vec<f64>),
    Names(Vec<String>),
    Error { message: String },
}

impl EngineResponse {
    pub fn from_result<T: Into<EngineResponse>>(result: RemoteResult<T>) -> Self {
        match result {
            Ok(value) => value.into(),
            Err(err) => EngineResponse::Error {
                message: err.to_string(),
            },
        }
    }

    pub fn into_ack(self) -> RemoteResult<()> {
        match self {
            EngineResponse::Ack => Ok(()),
            other => Err(other.mismatch("ack")),
        }
    }

    pub fn into_value(self) -> RemoteResult<f64> {
        match self {
            EngineResponse::Value(value) => Ok(value),
            other => Err(other.mismatch("value")),
        }
    }

    pub fn into_values(self) -> RemoteResult<Vec<f64>> {
        match self {
            EngineResponse::Values(values) => Ok(values),
            other => Err(other.mismatch("values")),
        }
    }

    pub fn into_names(self) -> RemoteResult<Vec<String>> {
        match self {
            EngineResponse::Names(names) => Ok(names),
            other => Err(other.mismatch("names")),
        }
    }

    fn mismatch(self, expected: &str) -> RemoteError {
        match self {
            EngineResponse::Error { message } => RemoteError::Engine(message),
            other => RemoteError::unexpected(format!("expected {expected}, got {other:?}")),
        }
    }
}

impl From<()> for EngineResponse {
    fn from(_: ()) -> Self {
        EngineResponse::Ack
    }
}

impl From<f64> for EngineResponse {
    fn from(value: f64) -> Self {
        EngineResponse::Value(value)
    }
}

impl From<Vec<f64>> for EngineResponse {
    fn from(values: Vec<f64>) -> Self {
        EngineResponse::Values(values)
    }
}

impl From<Vec<String>> for EngineResponse {
    fn from(names: Vec<String>) -> Self {
        EngineResponse::Names(names)
    }
}

impl EngineRequest {
    /// Run the request against `engine`; used by bridge implementations.
    pub fn apply<E: SimulationEngine + ?Sized>(self, engine: &mut E) -> EngineResponse {
        use EngineRequest::*;

        match self {
            OpenFile { path } => EngineResponse::from_result(engine.open_file(Path::new(&path))),
            SaveFileAs { path } => {
                EngineResponse::from_result(engine.save_file_as(Path::new(&path)))
            }
            RunSimulation => EngineResponse::from_result(engine.run_simulation()),
            Shutdown => EngineResponse::from_result(engine.shutdown()),
            SetDt { value } => EngineResponse::from_result(engine.set_dt(value)),
            SetTend { value } => EngineResponse::from_result(engine.set_tend(value)),
            SetDtPre { value } => EngineResponse::from_result(engine.set_dt_pre(value)),
            SetTendPre { value } => EngineResponse::from_result(engine.set_tend_pre(value)),
            GetDt => EngineResponse::from_result(engine.get_dt()),
            GetTend => EngineResponse::from_result(engine.get_tend()),
            GetDtPre => EngineResponse::from_result(engine.get_dt_pre()),
            GetTendPre => EngineResponse::from_result(engine.get_tend_pre()),
            GetGlobalParameter { name } => {
                EngineResponse::from_result(engine.get_global_parameter(&name))
            }
            SetGlobalParameter { name, value } => {
                EngineResponse::from_result(engine.set_global_parameter(&name, value))
            }
            AccessibleParameters { component } => {
                EngineResponse::from_result(engine.accessible_parameters(&component))
            }
            GetParameter { component, key } => {
                EngineResponse::from_result(engine.get_parameter(&component, &key))
            }
            SetParameters {
                component,
                keys,
                values,
            } => EngineResponse::from_result(engine.set_parameters(&component, &keys, &values)),
            CircuitElements => EngineResponse::from_result(engine.circuit_elements()),
            DoOperation {
                component,
                operation,
                argument,
            } => EngineResponse::from_result(engine.do_operation(&component, &operation, &argument)),
            SignalData {
                node,
                start,
                end,
                skip,
            } => EngineResponse::from_result(engine.signal_data(&node, start, end, skip)),
            TimeArray {
                node,
                start,
                end,
                skip,
            } => EngineResponse::from_result(engine.time_array(&node, start, end, skip)),
            SignalAvg { node, start, end } => {
                EngineResponse::from_result(engine.signal_avg(&node, start, end))
            }
            SignalRms { node, start, end } => {
                EngineResponse::from_result(engine.signal_rms(&node, start, end))
            }
            SignalMax { node, start, end } => {
                EngineResponse::from_result(engine.signal_max(&node, start, end))
            }
            SignalMin { node, start, end } => {
                EngineResponse::from_result(engine.signal_min(&node, start, end))
            }
            SignalThd { node, start, end } => {
                EngineResponse::from_result(engine.signal_thd(&node, start, end))
            }
            SignalRipple { node, start, end } => {
                EngineResponse::from_result(engine.signal_ripple(&node, start, end))
            }
            SignalShape { node, start, end } => {
                EngineResponse::from_result(engine.signal_shape(&node, start, end))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: u64,
    pub payload: EngineRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: u64,
    pub payload: EngineResponse,
}

/// A float that survives JSON, including the non-finite values.
#[derive(Debug, Clone, Copy, PartialEq)]
struct WireFloat(f64);

#[derive(Deserialize)]
#[serde(untagged)]
enum WireRepr {
    Number(f64),
    Special(String),
}

impl Serialize for WireFloat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = self.0;
        if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value == f64::INFINITY {
            serializer.serialize_str("inf")
        } else if value == f64::NEG_INFINITY {
            serializer.serialize_str("-inf")
        } else {
            serializer.serialize_f64(value)
        }
    }
}

impl<'de> Deserialize<'de> for WireFloat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match WireRepr::deserialize(deserializer)? {
            WireRepr::Number(value) => Ok(WireFloat(value)),
            WireRepr::Special(text) => match text.as_str() {
                "NaN" => Ok(WireFloat(f64::NAN)),
                "inf" => Ok(WireFloat(f64::INFINITY)),
                "-inf" => Ok(WireFloat(f64::NEG_INFINITY)),
                other => Err(de::Error::invalid_value(
                    de::Unexpected::Str(other),
                    &"a number, \"NaN\", \"inf\" or \"-inf\"",
                )),
            },
        }
    }
}

mod wire_float {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::WireFloat;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        WireFloat(*value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        WireFloat::deserialize(deserializer).map(|wire| wire.0)
    }
}

mod wire_floats {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::WireFloat;

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|value| WireFloat(*value)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let wire = Vec::<WireFloat>::deserialize(deserializer)?;
        Ok(wire.into_iter().map(|value| value.0).collect())
    }
}

/// Serialize `payload` and prepend the length prefix.
pub fn encode_frame<T: Serialize>(payload: &T) -> Result<Vec<u8>, serde_json::Error> {
    let bytes = serde_json::to_vec(payload)?;
    let mut framed = Vec::with_capacity(4 + bytes.len());
    framed.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    framed.extend_from_slice(&bytes);
    Ok(framed)
}

pub fn read_frame<R: Read>(stream: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let msg_len = u32::from_be_bytes(len_buf) as usize;
    if msg_len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {msg_len} bytes exceeds limit"),
        ));
    }
    let mut msg_buf = vec![0u8; msg_len];
    stream.read_exact(&mut msg_buf)?;
    Ok(msg_buf)
}

pub fn write_framed<W: Write>(stream: &mut W, framed: &[u8]) -> io::Result<()> {
    stream.write_all(framed)?;
    stream.flush()
}
