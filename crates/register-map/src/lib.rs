//! register-map: YAML-driven register map and acquisition engine
//!
//! A [`RegisterMap`] describes every 16-bit register of a device. The
//! [`RegisterEngine`] turns a set of register keys into the fewest contiguous
//! span reads, decodes the raw words into typed, scaled values, and validates
//! and encodes single-word writes.

mod types;
pub use types::*;

mod loader;
pub use loader::{load_register_file, RegisterMap, SchemaError};

mod cluster;
pub use cluster::{build_clusters, Cluster, ClusterPlanner};

mod decode;
pub use decode::{decode_cluster, decode_value, DecodeError};

mod encode;
pub use encode::{encode_value, WriteError, WriteValue};

mod engine;
pub use engine::{RegisterEngine, DEFAULT_RECONNECT_COOLDOWN};

pub mod calc;

mod metrics;
pub use metrics::{EngineMetrics, MetricsHub};
