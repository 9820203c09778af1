//! Argument shapes of the Device and User commands.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub value: f64,
}

impl Measurement {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Measurements keyed by sensor id.
pub type SensorValues = HashMap<String, Vec<Measurement>>;

/// Args of the Device `update` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateArgs {
    pub values: SensorValues,
}

/// Args of the Device `addSensor` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddSensorArgs {
    pub name: String,
    pub unit: String,
    pub port: i32,
    pub factor: f64,
}

/// Args of the Device `removeSensor` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveSensorArgs {
    pub name: String,
}

/// Partial metadata for one sensor; absent fields are unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor: Option<f64>,
}

/// Args of the Device `updateMetadata` command, and the per-device entry
/// of the User `metadata` push.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Metadata keyed by sensor id.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub sensors: HashMap<String, SensorMetadata>,
}

/// Args of the User `getValues` command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetValuesArgs {
    pub since_unix_ms: f64,
    pub with_metadata: bool,
}

/// Args of the User `metadata` push.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataPush {
    /// Metadata keyed by device id.
    pub devices: HashMap<String, DeviceMetadata>,
}
