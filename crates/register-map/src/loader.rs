use crate::types::{Address, PseudoRegister, RegisterDescriptor, RegisterKey, RegisterType};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("reading register map {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing register map yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("register map must be a mapping of register keys to entries")]
    NotAMapping,
    #[error("unsupported register key: {0}")]
    InvalidKey(String),
    #[error("register {key}: {reason}")]
    InvalidEntry { key: String, reason: String },
}

/// An entry as written in the YAML file, before validation.
#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    length: Option<u16>,
    #[serde(default, rename = "type")]
    kind: Option<RegisterType>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    scale: Option<u32>,
    #[serde(default, alias = "writeable")]
    writable: Option<bool>,
    #[serde(default)]
    mqtt: Option<String>,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    formula: Option<String>,
}

/// Immutable, validated register map.
#[derive(Debug, Default, Clone)]
pub struct RegisterMap {
    registers: BTreeMap<Address, RegisterDescriptor>,
    pseudo: BTreeMap<String, PseudoRegister>,
}

impl RegisterMap {
    pub fn from_yaml_str(raw: &str) -> Result<Self, SchemaError> {
        let val: Value = serde_yaml::from_str(raw)?;
        let mapping = match val {
            Value::Mapping(m) => m,
            Value::Null => Mapping::new(),
            _ => return Err(SchemaError::NotAMapping),
        };

        let mut map = RegisterMap::default();
        for (k, v) in mapping {
            let key = key_to_string(&k)?;
            let entry: RawEntry =
                serde_yaml::from_value(v).map_err(|e| SchemaError::InvalidEntry {
                    key: key.clone(),
                    reason: e.to_string(),
                })?;
            match RegisterKey::parse(&key) {
                RegisterKey::Wire(address) => {
                    let desc = build_wire(address, entry).map_err(|reason| {
                        SchemaError::InvalidEntry {
                            key: key.clone(),
                            reason,
                        }
                    })?;
                    if map.registers.contains_key(&address) {
                        return Err(duplicate(key, "duplicate register address"));
                    }
                    map.registers.insert(address, desc);
                }
                RegisterKey::Pseudo(name) => {
                    if name.bytes().all(|b| b.is_ascii_digit()) {
                        return Err(SchemaError::InvalidKey(name));
                    }
                    let pseudo = build_pseudo(&name, entry).map_err(|reason| {
                        SchemaError::InvalidEntry {
                            key: key.clone(),
                            reason,
                        }
                    })?;
                    if map.pseudo.contains_key(&name) {
                        return Err(duplicate(key, "duplicate register key"));
                    }
                    map.pseudo.insert(name, pseudo);
                }
            }
        }
        tracing::debug!(
            registers = map.registers.len(),
            pseudo = map.pseudo.len(),
            "register map loaded"
        );
        Ok(map)
    }

    pub fn get(&self, address: Address) -> Option<&RegisterDescriptor> {
        self.registers.get(&address)
    }

    pub fn pseudo(&self, key: &str) -> Option<&PseudoRegister> {
        self.pseudo.get(key)
    }

    pub fn contains(&self, key: &RegisterKey) -> bool {
        match key {
            RegisterKey::Wire(a) => self.registers.contains_key(a),
            RegisterKey::Pseudo(k) => self.pseudo.contains_key(k),
        }
    }

    /// Wire registers in ascending address order.
    pub fn registers(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.registers.values()
    }

    /// Pseudo-registers in key order.
    pub fn pseudo_registers(&self) -> impl Iterator<Item = &PseudoRegister> {
        self.pseudo.values()
    }

    /// Every wire register key, the default read set.
    pub fn wire_keys(&self) -> Vec<RegisterKey> {
        self.registers.keys().map(|a| RegisterKey::Wire(*a)).collect()
    }

    /// Number of wire registers.
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty() && self.pseudo.is_empty()
    }

    /// Distinct group tags, sorted.
    pub fn groups(&self) -> Vec<String> {
        let mut out = BTreeSet::new();
        for d in self.registers.values() {
            if let Some(g) = &d.group {
                out.insert(g.clone());
            }
        }
        for p in self.pseudo.values() {
            if let Some(g) = &p.group {
                out.insert(g.clone());
            }
        }
        out.into_iter().collect()
    }

    /// Keys tagged with `group`: wire registers by address, then pseudo-registers.
    /// `None` when the group is unknown or empty.
    pub fn registers_in_group(&self, group: &str) -> Option<Vec<RegisterKey>> {
        let wire = self
            .registers
            .values()
            .filter(|d| d.group.as_deref() == Some(group))
            .map(|d| RegisterKey::Wire(d.address));
        let pseudo = self
            .pseudo
            .values()
            .filter(|p| p.group.as_deref() == Some(group))
            .map(|p| RegisterKey::Pseudo(p.key.clone()));
        let keys: Vec<RegisterKey> = wire.chain(pseudo).collect();
        if keys.is_empty() {
            tracing::error!(group, "unknown or empty register group");
            return None;
        }
        Some(keys)
    }
}

pub fn load_register_file(path: impl AsRef<Path>) -> Result<RegisterMap, SchemaError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| SchemaError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let map = RegisterMap::from_yaml_str(&raw)?;
    tracing::info!(
        path = %path.display(),
        registers = map.len(),
        "register map loaded"
    );
    Ok(map)
}

// Keys are normalized ("0100" and 100 name the same address), so two YAML
// keys can collide after parsing.
fn duplicate(key: String, reason: &str) -> SchemaError {
    SchemaError::InvalidEntry {
        key,
        reason: reason.to_string(),
    }
}

fn key_to_string(k: &Value) -> Result<String, SchemaError> {
    match k {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(SchemaError::InvalidKey(format!("{other:?}"))),
    }
}

fn mandatory_name(entry: &RawEntry) -> Result<String, String> {
    match entry.name.as_deref().map(str::trim) {
        Some(n) if !n.is_empty() => Ok(n.to_string()),
        _ => Err("missing mandatory parameter: name".to_string()),
    }
}

fn build_wire(address: Address, entry: RawEntry) -> Result<RegisterDescriptor, String> {
    let name = mandatory_name(&entry)?;
    if entry.formula.is_some() {
        return Err("formula is only allowed on pseudo-registers".to_string());
    }
    let scale = entry.scale.unwrap_or(1);
    if scale == 0 {
        return Err("scale must be a positive integer".to_string());
    }
    let length = match entry.kind {
        Some(kind) => {
            let len = entry
                .length
                .or(kind.fixed_length())
                .ok_or_else(|| format!("length is required for type {kind}"))?;
            if !kind.accepts_length(len) {
                return Err(format!("length {len} is invalid for type {kind}"));
            }
            len
        }
        None => match entry.length {
            Some(len) if len > 0 => len,
            _ => return Err("untyped (dummy) registers need a positive length".to_string()),
        },
    };
    if address.end(length) > u32::from(u16::MAX) + 1 {
        return Err(format!("span of {length} words runs past the last address"));
    }
    Ok(RegisterDescriptor {
        address,
        name,
        length,
        kind: entry.kind,
        unit: entry.unit.unwrap_or_default(),
        scale,
        writable: entry.writable.unwrap_or(false),
        mqtt: entry.mqtt,
        group: entry.group,
    })
}

fn build_pseudo(key: &str, entry: RawEntry) -> Result<PseudoRegister, String> {
    let name = mandatory_name(&entry)?;
    if entry.kind.is_some() || entry.length.is_some() {
        return Err("pseudo-registers cannot have a wire type or length".to_string());
    }
    if entry.writable == Some(true) {
        return Err("pseudo-registers cannot be writable".to_string());
    }
    Ok(PseudoRegister {
        key: key.to_string(),
        name,
        unit: entry.unit.unwrap_or_default(),
        mqtt: entry.mqtt,
        group: entry.group,
        formula: entry.formula.filter(|f| !f.trim().is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
10000:
  name: Inverter serial number
  length: 8
  type: STR
  group: config
  mqtt: serial_no
10100:
  name: Inverter date
  type: DAT
  group: now-base
11000:
  name: Total Power on Meter
  type: I32
  unit: kW
  scale: 1000
  group: now-base
  mqtt: grid_power
"25100":
  name: Grid Injection Power Limit
  type: U16
  unit: "%"
  scale: 10
  writable: true
11002:
  name: reserved
  length: 2
consumption:
  name: Household consumption
  unit: kW
  group: now-base
  mqtt: consumption
  formula: r11016 - r11000
"#;

    #[test]
    fn test_load_sample() {
        let map = RegisterMap::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(map.len(), 5);

        let serial = map.get(Address(10000)).unwrap();
        assert_eq!(serial.kind, Some(RegisterType::Str));
        assert_eq!(serial.length, 8);
        assert_eq!(serial.scale, 1);
        assert!(!serial.writable);

        let date = map.get(Address(10100)).unwrap();
        assert_eq!(date.length, 3);
        assert_eq!(date.unit, "");

        let limit = map.get(Address(25100)).unwrap();
        assert!(limit.writable);
        assert_eq!(limit.scale, 10);

        let dummy = map.get(Address(11002)).unwrap();
        assert!(dummy.is_dummy());

        let consumption = map.pseudo("consumption").unwrap();
        assert_eq!(consumption.formula.as_deref(), Some("r11016 - r11000"));
        assert!(map.contains(&RegisterKey::parse("consumption")));
        assert!(!map.contains(&RegisterKey::parse("11001")));
    }

    #[test]
    fn test_groups() {
        let map = RegisterMap::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(map.groups(), vec!["config", "now-base"]);
        assert_eq!(
            map.registers_in_group("now-base").unwrap(),
            vec![
                RegisterKey::parse("10100"),
                RegisterKey::parse("11000"),
                RegisterKey::parse("consumption"),
            ]
        );
        assert!(map.registers_in_group("day").is_none());
    }

    #[test]
    fn test_wire_keys_skip_pseudo_registers() {
        let map = RegisterMap::from_yaml_str(SAMPLE).unwrap();
        let keys = map.wire_keys();
        assert_eq!(keys.len(), 5);
        assert!(keys.iter().all(|k| k.address().is_some()));
    }

    fn rejected(yaml: &str) -> String {
        match RegisterMap::from_yaml_str(yaml) {
            Err(e) => e.to_string(),
            Ok(m) => panic!("accepted invalid map: {m:?}"),
        }
    }

    #[test]
    fn test_rejects_missing_name() {
        assert!(rejected("100:\n  type: U16\n").contains("name"));
        assert!(rejected("100:\n  name: ''\n  type: U16\n").contains("name"));
    }

    #[test]
    fn test_rejects_inconsistent_length() {
        assert!(rejected("100:\n  name: a\n  type: U32\n  length: 1\n").contains("length 1"));
        assert!(rejected("100:\n  name: a\n  type: BYTE\n").contains("length is required"));
        assert!(rejected("100:\n  name: a\n  type: BIT\n  length: 4\n").contains("BIT"));
        assert!(rejected("100:\n  name: a\n").contains("dummy"));
    }

    #[test]
    fn test_rejects_unknown_type_and_zero_scale() {
        assert!(rejected("100:\n  name: a\n  type: F32\n").starts_with("register 100"));
        assert!(rejected("100:\n  name: a\n  type: U16\n  scale: 0\n").contains("scale"));
    }

    #[test]
    fn test_rejects_span_past_address_space() {
        assert!(rejected("65535:\n  name: a\n  type: U32\n").contains("runs past"));
        let map = RegisterMap::from_yaml_str("65535:\n  name: a\n  type: U16\n").unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_rejects_misplaced_pseudo_fields() {
        assert!(rejected("100:\n  name: a\n  type: U16\n  formula: r1\n").contains("formula"));
        assert!(rejected("calc:\n  name: a\n  type: U16\n").contains("pseudo"));
        assert!(rejected("calc:\n  name: a\n  writable: true\n").contains("writable"));
        assert!(matches!(
            RegisterMap::from_yaml_str("99999:\n  name: a\n"),
            Err(SchemaError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_address() {
        let err = RegisterMap::from_yaml_str(
            "100: { name: first, type: U16 }\n\"0100\": { name: second, type: U32 }\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate register address"));
        assert!(rejected("100: { name: a, type: U16 }\n\"100\": { name: b, type: U16 }\n")
            .contains("duplicate"));
        assert!(rejected("calc: { name: a }\n\" calc \": { name: b }\n").contains("duplicate"));
    }

    #[test]
    fn test_rejects_non_mapping() {
        assert!(matches!(
            RegisterMap::from_yaml_str("- 1\n- 2\n"),
            Err(SchemaError::NotAMapping)
        ));
        assert!(matches!(
            RegisterMap::from_yaml_str("100: [\n"),
            Err(SchemaError::Yaml(_))
        ));
    }

    #[test]
    fn test_accepts_legacy_field_spelling_and_extra_fields() {
        let yaml = "25100:\n  name: limit\n  type: U16\n  writeable: true\n  hass_device_class: power\n";
        let map = RegisterMap::from_yaml_str(yaml).unwrap();
        assert!(map.get(Address(25100)).unwrap().writable);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_register_file("/nonexistent/registers.yaml").unwrap_err();
        assert!(matches!(err, SchemaError::Io { .. }));
    }
}
