use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Counters updated by a [`crate::RegisterEngine`] that has a hub attached.
#[derive(Clone)]
pub struct EngineMetrics {
    pub cluster_reads: IntCounter,
    pub cluster_failures: IntCounter,
    pub decode_errors: IntCounter,
    pub unknown_keys: IntCounter,
    pub register_writes: IntCounter,
    pub write_failures: IntCounter,
    pub registers_loaded: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub engine: EngineMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let counter = |name: &str, help: &str| {
            IntCounter::new(name, help).map_err(|e| format!("metrics init error: {e}"))
        };
        let engine = EngineMetrics {
            cluster_reads: counter("mtec_cluster_reads_total", "Cluster reads attempted")?,
            cluster_failures: counter(
                "mtec_cluster_failures_total",
                "Cluster reads that returned no data",
            )?,
            decode_errors: counter("mtec_decode_errors_total", "Registers that failed to decode")?,
            unknown_keys: counter(
                "mtec_unknown_keys_total",
                "Requested register keys missing from the map",
            )?,
            register_writes: counter("mtec_register_writes_total", "Register writes accepted")?,
            write_failures: counter(
                "mtec_write_failures_total",
                "Register writes rejected or failed",
            )?,
            registers_loaded: IntGauge::new(
                "mtec_registers_loaded",
                "Number of wire registers in the loaded map",
            )
            .map_err(|e| format!("metrics init error: {e}"))?,
        };
        let registry = Registry::new();
        let _ = registry.register(Box::new(engine.cluster_reads.clone()));
        let _ = registry.register(Box::new(engine.cluster_failures.clone()));
        let _ = registry.register(Box::new(engine.decode_errors.clone()));
        let _ = registry.register(Box::new(engine.unknown_keys.clone()));
        let _ = registry.register(Box::new(engine.register_writes.clone()));
        let _ = registry.register(Box::new(engine.write_failures.clone()));
        let _ = registry.register(Box::new(engine.registers_loaded.clone()));
        Ok(Self { registry, engine })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
