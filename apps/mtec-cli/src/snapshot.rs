//! Register bank snapshots used to seed the mock bus.
//!
//! A snapshot is a YAML mapping of start address to one word or a list of
//! consecutive words:
//!
//! ```yaml
//! 10100: [6149, 1555, 7680]
//! 33000: 8750
//! ```

use anyhow::{Context, Result};
use modbus_transport::MockBus;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Words {
    One(u16),
    Many(Vec<u16>),
}

pub type Snapshot = BTreeMap<u16, Vec<u16>>;

pub fn parse_snapshot(raw: &str) -> Result<Snapshot> {
    let parsed: BTreeMap<u16, Words> = serde_yaml::from_str(raw)?;
    Ok(parsed
        .into_iter()
        .map(|(start, w)| match w {
            Words::One(v) => (start, vec![v]),
            Words::Many(vs) => (start, vs),
        })
        .collect())
}

pub fn load_snapshot(path: &Path) -> Result<Snapshot> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading snapshot {}", path.display()))?;
    parse_snapshot(&raw).with_context(|| format!("parsing snapshot {}", path.display()))
}

pub fn seed(bus: &mut MockBus, snapshot: &Snapshot) {
    for (start, words) in snapshot {
        bus.load_words(*start, words);
    }
    tracing::debug!(spans = snapshot.len(), "mock bus seeded");
}

#[cfg(test)]
mod tests {
    use super::*;
    use modbus_transport::RegisterBus;

    #[test]
    fn test_seed_single_and_multi_word_entries() {
        let snap = parse_snapshot("10100: [6149, 1555, 7680]\n33000: 8750\n").unwrap();
        let mut bus = MockBus::open("mock0").unwrap();
        seed(&mut bus, &snap);
        assert_eq!(bus.word(10100), 0x1805);
        assert_eq!(bus.word(10102), 0x1E00);
        assert_eq!(bus.word(33000), 8750);
        assert_eq!(bus.word(33001), 0);
    }

    #[test]
    fn test_rejects_out_of_range_words() {
        assert!(parse_snapshot("100: 70000\n").is_err());
        assert!(parse_snapshot("100: [1, -2]\n").is_err());
    }
}
