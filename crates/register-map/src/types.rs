use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Wire address of the first word of a register.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub u16);

impl Address {
    pub fn raw(self) -> u16 {
        self.0
    }

    /// One past the last word of a span of `len` words starting here.
    /// Widened so that spans ending at 0xFFFF do not wrap.
    pub fn end(self, len: u16) -> u32 {
        u32::from(self.0) + u32::from(len)
    }
}

impl From<u16> for Address {
    fn from(raw: u16) -> Self {
        Address(raw)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Register map key: a numeric wire address, or a symbolic pseudo-register
/// whose value is calculated from other registers and never hits the wire.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum RegisterKey {
    Wire(Address),
    Pseudo(String),
}

impl RegisterKey {
    /// All-digit keys that fit 16 bits are wire addresses; anything else is symbolic.
    pub fn parse(s: &str) -> Self {
        let t = s.trim();
        if !t.is_empty() && t.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(raw) = t.parse::<u16>() {
                return RegisterKey::Wire(Address(raw));
            }
        }
        RegisterKey::Pseudo(t.to_string())
    }

    pub fn address(&self) -> Option<Address> {
        match self {
            RegisterKey::Wire(a) => Some(*a),
            RegisterKey::Pseudo(_) => None,
        }
    }
}

impl From<&str> for RegisterKey {
    fn from(s: &str) -> Self {
        RegisterKey::parse(s)
    }
}

impl From<String> for RegisterKey {
    fn from(s: String) -> Self {
        RegisterKey::parse(&s)
    }
}

impl From<Address> for RegisterKey {
    fn from(a: Address) -> Self {
        RegisterKey::Wire(a)
    }
}

impl fmt::Display for RegisterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterKey::Wire(a) => write!(f, "{a}"),
            RegisterKey::Pseudo(k) => f.write_str(k),
        }
    }
}

/// How the words of a register are interpreted. Big-endian word and byte order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RegisterType {
    U16,
    I16,
    U32,
    I32,
    /// Raw bytes rendered as two-digit decimals (firmware versions, equipment info).
    Byte,
    /// Low byte of each word rendered as eight binary digits (fault flags).
    Bit,
    /// Three words of byte-packed `YY MM DD hh mm ss`.
    Dat,
    /// Fixed-width ASCII text.
    Str,
}

impl RegisterType {
    /// Word count implied by the type, for types that have exactly one.
    pub fn fixed_length(self) -> Option<u16> {
        match self {
            RegisterType::U16 | RegisterType::I16 => Some(1),
            RegisterType::U32 | RegisterType::I32 => Some(2),
            RegisterType::Dat => Some(3),
            RegisterType::Byte | RegisterType::Bit | RegisterType::Str => None,
        }
    }

    pub fn accepts_length(self, len: u16) -> bool {
        match self {
            RegisterType::Byte => matches!(len, 1 | 2 | 4),
            RegisterType::Bit => matches!(len, 1 | 2),
            RegisterType::Str => len >= 1,
            other => other.fixed_length() == Some(len),
        }
    }

    /// Numeric types are scaled on decode and accept writes.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            RegisterType::U16 | RegisterType::I16 | RegisterType::U32 | RegisterType::I32
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RegisterType::U16 => "U16",
            RegisterType::I16 => "I16",
            RegisterType::U32 => "U32",
            RegisterType::I32 => "I32",
            RegisterType::Byte => "BYTE",
            RegisterType::Bit => "BIT",
            RegisterType::Dat => "DAT",
            RegisterType::Str => "STR",
        }
    }
}

impl fmt::Display for RegisterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One wire register, validated at load time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisterDescriptor {
    pub address: Address,
    pub name: String,
    /// Number of consecutive 16-bit words.
    pub length: u16,
    /// `None` marks a dummy entry that only fills a gap inside a span.
    #[serde(rename = "type")]
    pub kind: Option<RegisterType>,
    pub unit: String,
    /// Divisor on decode, multiplier on encode. Always >= 1.
    pub scale: u32,
    pub writable: bool,
    /// Semantic name the value is published under.
    pub mqtt: Option<String>,
    pub group: Option<String>,
}

impl RegisterDescriptor {
    pub fn is_dummy(&self) -> bool {
        self.kind.is_none()
    }

    pub fn end(&self) -> u32 {
        self.address.end(self.length)
    }
}

/// A calculated register. Its value is derived from decoded wire registers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PseudoRegister {
    pub key: String,
    pub name: String,
    pub unit: String,
    pub mqtt: Option<String>,
    pub group: Option<String>,
    pub formula: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegisterValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl RegisterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RegisterValue::Int(i) => Some(*i as f64),
            RegisterValue::Float(f) => Some(*f),
            RegisterValue::Text(_) => None,
        }
    }
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterValue::Int(i) => write!(f, "{i}"),
            RegisterValue::Float(v) => match f.precision() {
                Some(p) => write!(f, "{v:.p$}"),
                None => write!(f, "{v}"),
            },
            RegisterValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedRecord {
    pub name: String,
    pub value: RegisterValue,
    pub unit: String,
}

/// Result of one read cycle, keyed by register address.
pub type Readings = BTreeMap<Address, DecodedRecord>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_parsing() {
        assert_eq!(RegisterKey::parse("11000"), RegisterKey::Wire(Address(11000)));
        assert_eq!(RegisterKey::parse(" 0 "), RegisterKey::Wire(Address(0)));
        assert_eq!(
            RegisterKey::parse("consumption-day"),
            RegisterKey::Pseudo("consumption-day".into())
        );
        // Too wide for a wire address, so it can never name one.
        assert_eq!(RegisterKey::parse("70000"), RegisterKey::Pseudo("70000".into()));
        assert_eq!(RegisterKey::parse("-5"), RegisterKey::Pseudo("-5".into()));
        assert_eq!(RegisterKey::parse("11000").to_string(), "11000");
    }

    #[test]
    fn test_type_lengths() {
        assert!(RegisterType::U16.accepts_length(1));
        assert!(!RegisterType::U32.accepts_length(1));
        assert!(RegisterType::I32.accepts_length(2));
        assert!(RegisterType::Byte.accepts_length(4));
        assert!(!RegisterType::Byte.accepts_length(3));
        assert!(!RegisterType::Bit.accepts_length(4));
        assert!(RegisterType::Dat.accepts_length(3));
        assert!(RegisterType::Str.accepts_length(8));
        assert!(!RegisterType::Str.accepts_length(0));
    }

    #[test]
    fn test_type_names_round_trip_through_yaml() {
        let t: RegisterType = serde_yaml::from_str("BYTE").unwrap();
        assert_eq!(t, RegisterType::Byte);
        assert!(serde_yaml::from_str::<RegisterType>("F32").is_err());
    }

    #[test]
    fn test_value_display_and_json() {
        assert_eq!(format!("{:.2}", RegisterValue::Float(12.3456)), "12.35");
        assert_eq!(RegisterValue::Int(5).to_string(), "5");
        assert_eq!(
            serde_json::to_string(&RegisterValue::Text("24-05-06 19:30:00".into())).unwrap(),
            "\"24-05-06 19:30:00\""
        );
        assert_eq!(serde_json::to_string(&RegisterValue::Float(0.0)).unwrap(), "0.0");
    }
}
