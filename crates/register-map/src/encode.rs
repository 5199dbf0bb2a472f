use crate::loader::RegisterMap;
use crate::types::{Address, RegisterKey, RegisterType};
use modbus_transport::TransportError;
use std::fmt;
use thiserror::Error;

/// A value supplied for a register write, before coercion.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteValue {
    Text(String),
    Int(i64),
    Float(f64),
}

impl From<&str> for WriteValue {
    fn from(s: &str) -> Self {
        WriteValue::Text(s.to_string())
    }
}

impl From<String> for WriteValue {
    fn from(s: String) -> Self {
        WriteValue::Text(s)
    }
}

impl From<i64> for WriteValue {
    fn from(v: i64) -> Self {
        WriteValue::Int(v)
    }
}

impl From<f64> for WriteValue {
    fn from(v: f64) -> Self {
        WriteValue::Float(v)
    }
}

impl fmt::Display for WriteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteValue::Text(s) => f.write_str(s),
            WriteValue::Int(i) => write!(f, "{i}"),
            WriteValue::Float(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("unknown register: {0}")]
    UnknownRegister(RegisterKey),
    #[error("register {0} is not writable")]
    ReadOnly(RegisterKey),
    #[error("invalid value for register {key}: {reason}")]
    InvalidValue { key: RegisterKey, reason: String },
    #[error("writing register {key} failed")]
    WriteFailed {
        key: RegisterKey,
        #[source]
        source: TransportError,
    },
}

impl WriteError {
    /// True when the input was at fault rather than the device or link.
    pub fn is_validation(&self) -> bool {
        !matches!(self, WriteError::WriteFailed { .. })
    }
}

/// Validates `value` against the descriptor for `key` and returns the address
/// and wire word to send. Never touches the transport.
///
/// Text containing a `.` is read as a float, anything else as an integer.
/// The number is multiplied by the register scale and truncated toward zero.
pub fn encode_value(
    map: &RegisterMap,
    key: &RegisterKey,
    value: &WriteValue,
) -> Result<(Address, u16), WriteError> {
    let desc = match key {
        RegisterKey::Wire(addr) => map
            .get(*addr)
            .ok_or_else(|| WriteError::UnknownRegister(key.clone()))?,
        RegisterKey::Pseudo(k) => {
            return Err(match map.pseudo(k) {
                Some(_) => WriteError::ReadOnly(key.clone()),
                None => WriteError::UnknownRegister(key.clone()),
            });
        }
    };
    if !desc.writable {
        return Err(WriteError::ReadOnly(key.clone()));
    }
    let invalid = |reason: String| WriteError::InvalidValue {
        key: key.clone(),
        reason,
    };
    let kind = match desc.kind {
        Some(k @ (RegisterType::U16 | RegisterType::I16)) => k,
        Some(other) => return Err(invalid(format!("{other} registers cannot be written"))),
        None => return Err(invalid("register has no type".to_string())),
    };

    let number = coerce(value).map_err(invalid)?;
    let raw = match number {
        Number::Int(i) => i
            .checked_mul(i64::from(desc.scale))
            .ok_or_else(|| invalid(format!("{value} overflows after scaling")))?,
        Number::Float(v) => {
            let scaled = if desc.scale > 1 {
                v * f64::from(desc.scale)
            } else {
                v
            };
            if !scaled.is_finite() {
                return Err(invalid(format!("{value} is not a finite number")));
            }
            scaled.trunc() as i64
        }
    };

    let word = match kind {
        RegisterType::I16 => i16::try_from(raw).map(|v| v as u16).ok(),
        _ => u16::try_from(raw).ok(),
    }
    .ok_or_else(|| invalid(format!("{raw} is out of range for {kind}")))?;

    tracing::debug!(register = %desc.address, %value, word, "encoded register write");
    Ok((desc.address, word))
}

enum Number {
    Int(i64),
    Float(f64),
}

fn coerce(value: &WriteValue) -> Result<Number, String> {
    match value {
        WriteValue::Int(i) => Ok(Number::Int(*i)),
        WriteValue::Float(f) => Ok(Number::Float(*f)),
        WriteValue::Text(s) => {
            let t = s.trim();
            if t.contains('.') {
                t.parse::<f64>()
                    .map(Number::Float)
                    .map_err(|_| format!("'{t}' is not a number"))
            } else {
                t.parse::<i64>()
                    .map(Number::Int)
                    .map_err(|_| format!("'{t}' is not a number"))
            }
        }
    }
}
