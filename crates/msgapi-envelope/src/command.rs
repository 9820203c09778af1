//! Command names.
//!
//! `update` appears twice: devices send it inbound, and the server pushes
//! it to users with per-device values.

/// Device → server: new measurements.
pub const UPDATE: &str = "update";
/// Device → server: register a sensor.
pub const ADD_SENSOR: &str = "addSensor";
/// Device → server: deregister a sensor.
pub const REMOVE_SENSOR: &str = "removeSensor";
/// Device → server: device and sensor metadata changes.
pub const UPDATE_METADATA: &str = "updateMetadata";
/// User → server: request recorded values.
pub const GET_VALUES: &str = "getValues";

/// Server → device push: start realtime updates for sensors.
pub const REQUEST_REALTIME_UPDATES: &str = "requestRealtimeUpdates";
/// Server → user push: metadata for devices.
pub const METADATA: &str = "metadata";
