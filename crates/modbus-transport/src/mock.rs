use crate::{BusInfo, RegisterBus, Result, TransportError};
use std::collections::{BTreeMap, BTreeSet};

/// Illegal data address, as a real device would answer for an unmapped span.
const EXCEPTION_ILLEGAL_ADDRESS: u8 = 0x02;
/// Illegal data value.
const EXCEPTION_ILLEGAL_VALUE: u8 = 0x03;

/// A simple in-process register bank. Each bus instance is independent.
///
/// Words that were never set read as zero. Failures can be injected per span
/// start address so callers can exercise partial-failure paths.
#[derive(Debug, Default)]
pub struct MockBus {
    name: String,
    words: BTreeMap<u16, u16>,
    connected: bool,
    refuse_connect: bool,
    reject_writes: bool,
    failing_spans: BTreeSet<u16>,
    short_spans: BTreeSet<u16>,
    reads: Vec<(u16, u16)>,
    writes: Vec<(u16, u16)>,
    connect_attempts: usize,
}

impl MockBus {
    /// Seed consecutive words starting at `start`.
    pub fn with_words(mut self, start: u16, words: &[u16]) -> Self {
        self.load_words(start, words);
        self
    }

    pub fn load_words(&mut self, start: u16, words: &[u16]) {
        for (addr, w) in (start..=u16::MAX).zip(words.iter()) {
            self.words.insert(addr, *w);
        }
    }

    pub fn set_word(&mut self, address: u16, value: u16) {
        self.words.insert(address, value);
    }

    pub fn word(&self, address: u16) -> u16 {
        self.words.get(&address).copied().unwrap_or(0)
    }

    /// Make every read whose span starts at `start` fail with a device exception.
    pub fn fail_reads_at(&mut self, start: u16) {
        self.failing_spans.insert(start);
    }

    /// Make every read whose span starts at `start` return one word too few.
    pub fn short_reads_at(&mut self, start: u16) {
        self.short_spans.insert(start);
    }

    pub fn set_refuse_connect(&mut self, refuse: bool) {
        self.refuse_connect = refuse;
    }

    pub fn set_reject_writes(&mut self, reject: bool) {
        self.reject_writes = reject;
    }

    /// Simulate the peer closing the connection.
    pub fn drop_connection(&mut self) {
        self.connected = false;
    }

    /// Every `(start, count)` read request seen so far, in order.
    pub fn reads(&self) -> &[(u16, u16)] {
        &self.reads
    }

    /// Every accepted `(address, value)` write, in order.
    pub fn writes(&self) -> &[(u16, u16)] {
        &self.writes
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts
    }
}

impl RegisterBus for MockBus {
    fn open(endpoint: &str) -> Result<Self> {
        Ok(Self {
            name: endpoint.to_string(),
            ..Self::default()
        })
    }

    fn info(&self) -> BusInfo {
        BusInfo {
            name: self.name.clone(),
            driver: "mock".to_string(),
        }
    }

    fn connect(&mut self) -> Result<()> {
        self.connect_attempts += 1;
        if self.refuse_connect {
            self.connected = false;
            return Err(TransportError::Io(format!(
                "connection refused by {}",
                self.name
            )));
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn read_span(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.reads.push((start, count));
        if self.failing_spans.contains(&start) {
            return Err(TransportError::Rejected(EXCEPTION_ILLEGAL_ADDRESS));
        }
        if u32::from(start) + u32::from(count) > u32::from(u16::MAX) + 1 {
            return Err(TransportError::Rejected(EXCEPTION_ILLEGAL_ADDRESS));
        }
        let mut out: Vec<u16> = (0..count)
            .map(|i| self.word(start.wrapping_add(i)))
            .collect();
        if self.short_spans.contains(&start) {
            out.pop();
        }
        tracing::trace!(bus = %self.name, start, count, "mock read");
        Ok(out)
    }

    fn write_word(&mut self, address: u16, value: u16) -> Result<()> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if self.reject_writes {
            return Err(TransportError::Rejected(EXCEPTION_ILLEGAL_VALUE));
        }
        self.words.insert(address, value);
        self.writes.push((address, value));
        tracing::trace!(bus = %self.name, address, value, "mock write");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(bus: MockBus) -> MockBus {
        let mut bus = bus;
        bus.connect().unwrap();
        bus
    }

    #[test]
    fn test_open_starts_disconnected() {
        let mut bus = MockBus::open("mock0").unwrap();
        assert!(!bus.is_connected());
        assert_eq!(bus.read_span(0, 1), Err(TransportError::NotConnected));
        assert_eq!(bus.info().driver, "mock");
    }

    #[test]
    fn test_read_returns_seeded_and_zero_words() {
        let bus = MockBus::open("mock0").unwrap().with_words(100, &[5, 0, 1234]);
        let mut bus = connected(bus);
        assert_eq!(bus.read_span(100, 3).unwrap(), vec![5, 0, 1234]);
        assert_eq!(bus.read_span(102, 3).unwrap(), vec![1234, 0, 0]);
        assert_eq!(bus.reads(), &[(100, 3), (102, 3)]);
    }

    #[test]
    fn test_injected_failures() {
        let mut bus = connected(MockBus::open("mock0").unwrap());
        bus.fail_reads_at(10);
        bus.short_reads_at(20);
        assert_eq!(bus.read_span(10, 1), Err(TransportError::Rejected(0x02)));
        assert_eq!(bus.read_span(20, 2).unwrap().len(), 1);
        assert!(bus.read_span(11, 1).is_ok());
    }

    #[test]
    fn test_span_past_end_of_address_space_is_rejected() {
        let mut bus = connected(MockBus::open("mock0").unwrap());
        assert!(bus.read_span(u16::MAX, 1).is_ok());
        assert_eq!(
            bus.read_span(u16::MAX, 2),
            Err(TransportError::Rejected(0x02))
        );
    }

    #[test]
    fn test_write_updates_bank_unless_rejected() {
        let mut bus = connected(MockBus::open("mock0").unwrap());
        bus.write_word(25100, 257).unwrap();
        assert_eq!(bus.word(25100), 257);
        bus.set_reject_writes(true);
        assert_eq!(
            bus.write_word(25100, 1),
            Err(TransportError::Rejected(0x03))
        );
        assert_eq!(bus.writes(), &[(25100, 257)]);
    }

    #[test]
    fn test_refused_connect_is_counted() {
        let mut bus = MockBus::open("mock0").unwrap();
        bus.set_refuse_connect(true);
        assert!(bus.connect().is_err());
        assert!(!bus.is_connected());
        bus.set_refuse_connect(false);
        bus.connect().unwrap();
        assert!(bus.is_connected());
        assert_eq!(bus.connect_attempts(), 2);
        bus.drop_connection();
        assert!(!bus.is_connected());
    }
}
