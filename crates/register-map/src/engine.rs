use crate::cluster::{Cluster, ClusterPlanner};
use crate::decode::decode_cluster;
use crate::encode::{encode_value, WriteError, WriteValue};
use crate::loader::RegisterMap;
use crate::metrics::{EngineMetrics, MetricsHub};
use crate::types::{Readings, RegisterKey};
use modbus_transport::{RegisterBus, TransportError};
use prometheus::IntCounter;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Minimum time between two automatic reconnect attempts.
pub const DEFAULT_RECONNECT_COOLDOWN: Duration = Duration::from_secs(30);

/// Reads and writes registers of one device through a [`RegisterBus`].
///
/// The engine owns the bus connection and the cluster plan cache. It is meant
/// to be driven from a single poll loop; every call blocks until the bus
/// answers.
pub struct RegisterEngine<B: RegisterBus> {
    bus: B,
    map: Arc<RegisterMap>,
    planner: ClusterPlanner,
    reconnect_cooldown: Duration,
    last_reconnect: Option<Instant>,
    metrics: Option<EngineMetrics>,
}

impl<B: RegisterBus> RegisterEngine<B> {
    pub fn new(bus: B, map: Arc<RegisterMap>) -> Self {
        Self {
            bus,
            planner: ClusterPlanner::new(Arc::clone(&map)),
            map,
            reconnect_cooldown: DEFAULT_RECONNECT_COOLDOWN,
            last_reconnect: None,
            metrics: None,
        }
    }

    pub fn with_reconnect_cooldown(mut self, cooldown: Duration) -> Self {
        self.reconnect_cooldown = cooldown;
        self
    }

    pub fn with_metrics(mut self, hub: &MetricsHub) -> Self {
        let metrics = hub.engine.clone();
        metrics.registers_loaded.set(self.map.len() as i64);
        self.metrics = Some(metrics);
        self
    }

    pub fn map(&self) -> &Arc<RegisterMap> {
        &self.map
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn into_bus(self) -> B {
        self.bus
    }

    /// Connect now, regardless of the reconnect cooldown.
    pub fn connect(&mut self) -> Result<(), TransportError> {
        self.last_reconnect = Some(Instant::now());
        self.bus.connect()?;
        tracing::info!(bus = %self.bus.info().name, "connected");
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.bus.disconnect();
        tracing::info!(bus = %self.bus.info().name, "disconnected");
    }

    pub fn registers_in_group(&self, group: &str) -> Option<Vec<RegisterKey>> {
        self.map.registers_in_group(group)
    }

    pub fn plan(&mut self, keys: &[RegisterKey]) -> Arc<[Cluster]> {
        self.planner.plan(keys)
    }

    /// Read every wire register in the map.
    pub fn read_all(&mut self) -> Readings {
        let keys = self.map.wire_keys();
        self.read(&keys)
    }

    /// Read the wire registers among `keys`.
    ///
    /// Pseudo keys are ignored and unknown keys are skipped with a warning.
    /// A cluster whose read fails is logged and left out of the result, so
    /// a partial or empty map is a normal outcome.
    pub fn read(&mut self, keys: &[RegisterKey]) -> Readings {
        self.skip_unknown(keys);
        self.ensure_connected();
        let plan = self.planner.plan(keys);

        let mut out = Readings::new();
        let mut failed = 0usize;
        for cluster in plan.iter() {
            self.count(|m| &m.cluster_reads);
            match self.read_cluster(cluster) {
                Ok(words) => {
                    let (records, errors) = decode_cluster(&words, cluster);
                    for _ in &errors {
                        self.count(|m| &m.decode_errors);
                    }
                    tracing::debug!(
                        start = %cluster.start,
                        length = cluster.length,
                        records = records.len(),
                        "cluster read"
                    );
                    out.extend(records);
                }
                Err(e) => {
                    failed += 1;
                    self.count(|m| &m.cluster_failures);
                    tracing::warn!(
                        start = %cluster.start,
                        length = cluster.length,
                        error = %e,
                        connection = e.is_connection_error(),
                        "cluster read failed - registers skipped"
                    );
                }
            }
        }
        if failed > 0 && failed == plan.len() {
            tracing::warn!(clusters = failed, "no cluster could be read this cycle");
        }
        out
    }

    /// Warn about and count every key the map does not know, wire or pseudo.
    /// An all-digit key too wide for an address lands here as a pseudo key.
    fn skip_unknown(&self, keys: &[RegisterKey]) -> usize {
        let mut skipped = 0;
        for key in keys.iter().filter(|k| !self.map.contains(k)) {
            tracing::warn!(register = %key, "unknown register - skipped");
            self.count(|m| &m.unknown_keys);
            skipped += 1;
        }
        skipped
    }

    fn read_cluster(&mut self, cluster: &Cluster) -> Result<Vec<u16>, TransportError> {
        let words = self.bus.read_span(cluster.start.raw(), cluster.length)?;
        if words.len() != usize::from(cluster.length) {
            return Err(TransportError::ShortRead {
                start: cluster.start.raw(),
                requested: cluster.length,
                received: words.len(),
            });
        }
        Ok(words)
    }

    /// Validate, encode and write one value.
    ///
    /// Validation happens before the bus is touched, so a rejected value never
    /// causes a connect or a write request.
    pub fn try_write(
        &mut self,
        key: &RegisterKey,
        value: impl Into<WriteValue>,
    ) -> Result<(), WriteError> {
        let value = value.into();
        let result = self.write_word(key, &value);
        match &result {
            Ok(()) => self.count(|m| &m.register_writes),
            Err(_) => self.count(|m| &m.write_failures),
        }
        result
    }

    /// Like [`Self::try_write`], reporting only success. The reason for a
    /// failure is logged.
    pub fn write(&mut self, key: &RegisterKey, value: impl Into<WriteValue>) -> bool {
        match self.try_write(key, value) {
            Ok(()) => true,
            Err(e) => {
                match &e {
                    WriteError::WriteFailed { source, .. } => {
                        tracing::error!(register = %key, error = %source, "write failed")
                    }
                    other => tracing::error!(register = %key, error = %other, "write rejected"),
                }
                false
            }
        }
    }

    fn write_word(&mut self, key: &RegisterKey, value: &WriteValue) -> Result<(), WriteError> {
        let (address, word) = encode_value(&self.map, key, value)?;
        self.ensure_connected();
        self.bus
            .write_word(address.raw(), word)
            .map_err(|source| WriteError::WriteFailed {
                key: key.clone(),
                source,
            })?;
        tracing::info!(register = %address, %value, word, "register written");
        Ok(())
    }

    /// Reconnect if the bus is down and the cooldown since the last attempt
    /// has elapsed. Returns whether the bus is connected afterwards.
    fn ensure_connected(&mut self) -> bool {
        if self.bus.is_connected() {
            return true;
        }
        if let Some(at) = self.last_reconnect {
            if at.elapsed() < self.reconnect_cooldown {
                tracing::debug!(
                    since_ms = at.elapsed().as_millis() as u64,
                    "bus disconnected, reconnect cooling down"
                );
                return false;
            }
        }
        match self.connect() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "reconnect failed");
                false
            }
        }
    }

    fn count(&self, pick: impl Fn(&EngineMetrics) -> &IntCounter) {
        if let Some(m) = &self.metrics {
            pick(m).inc();
        }
    }

    #[cfg(test)]
    fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }
}
