use crate::cluster::Cluster;
use crate::types::{Address, DecodedRecord, Readings, RegisterType, RegisterValue};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("span too short: need {needed} words at offset {offset}, have {available}")]
    ShortSpan {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("{length} words cannot be decoded as {kind}")]
    BadLength { kind: RegisterType, length: usize },
    #[error("text is not valid UTF-8")]
    InvalidText,
}

/// Decodes every typed register of `cluster` from the words read for its span.
///
/// Dummy items consume their words and produce nothing. A register that fails
/// to decode is logged, reported in the error list and left out of the
/// readings; its siblings are unaffected.
pub fn decode_cluster(
    words: &[u16],
    cluster: &Cluster,
) -> (Readings, Vec<(Address, DecodeError)>) {
    let mut records = Readings::new();
    let mut errors = Vec::new();
    let mut offset = 0usize;

    for item in &cluster.items {
        let needed = usize::from(item.length);
        if let Some(kind) = item.kind {
            let decoded = match words.get(offset..offset + needed) {
                Some(slice) => decode_value(kind, item.scale, slice),
                None => Err(DecodeError::ShortSpan {
                    offset,
                    needed,
                    available: words.len().saturating_sub(offset),
                }),
            };
            match decoded {
                Ok(value) => {
                    records.insert(
                        item.address,
                        DecodedRecord {
                            name: item.name.clone(),
                            value,
                            unit: item.unit.clone(),
                        },
                    );
                }
                Err(e) => {
                    tracing::error!(register = %item.address, error = %e, "decoding error");
                    errors.push((item.address, e));
                }
            }
        }
        offset += needed;
    }
    (records, errors)
}

/// Decodes the words of a single register and applies `scale` to numeric types.
pub fn decode_value(
    kind: RegisterType,
    scale: u32,
    words: &[u16],
) -> Result<RegisterValue, DecodeError> {
    if !kind.accepts_length(len_u16(words)) {
        return Err(DecodeError::BadLength {
            kind,
            length: words.len(),
        });
    }
    let value = match kind {
        RegisterType::U16 => scaled(i64::from(words[0]), scale),
        RegisterType::I16 => scaled(i64::from(words[0] as i16), scale),
        RegisterType::U32 => scaled(i64::from(join_u32(words[0], words[1])), scale),
        RegisterType::I32 => scaled(i64::from(join_u32(words[0], words[1]) as i32), scale),
        RegisterType::Byte => RegisterValue::Text(decode_bytes(words)),
        RegisterType::Bit => RegisterValue::Text(decode_bits(words)),
        RegisterType::Dat => RegisterValue::Text(decode_date(words)),
        RegisterType::Str => RegisterValue::Text(decode_text(words)?),
    };
    Ok(value)
}

fn len_u16(words: &[u16]) -> u16 {
    u16::try_from(words.len()).unwrap_or(u16::MAX)
}

fn join_u32(hi: u16, lo: u16) -> u32 {
    u32::from(hi) << 16 | u32::from(lo)
}

fn scaled(raw: i64, scale: u32) -> RegisterValue {
    if scale > 1 {
        RegisterValue::Float(raw as f64 / f64::from(scale))
    } else {
        RegisterValue::Int(raw)
    }
}

fn split(word: u16) -> (u8, u8) {
    ((word >> 8) as u8, (word & 0xFF) as u8)
}

// Multi-word values print as two halves separated by a double space,
// e.g. "01 02  03 04" for two words.
fn decode_bytes(words: &[u16]) -> String {
    let half = |ws: &[u16]| {
        ws.iter()
            .flat_map(|w| {
                let (hi, lo) = split(*w);
                [hi, lo]
            })
            .map(|b| format!("{b:02}"))
            .collect::<Vec<_>>()
            .join(" ")
    };
    if words.len() < 2 {
        return half(words);
    }
    let (a, b) = words.split_at(words.len() / 2);
    format!("{}  {}", half(a), half(b))
}

fn decode_bits(words: &[u16]) -> String {
    words
        .iter()
        .map(|w| format!("{:08b}", w & 0xFF))
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_date(words: &[u16]) -> String {
    let (yy, mo) = split(words[0]);
    let (dd, hh) = split(words[1]);
    let (mi, ss) = split(words[2]);
    format!("{yy:02}-{mo:02}-{dd:02} {hh:02}:{mi:02}:{ss:02}")
}

fn decode_text(words: &[u16]) -> Result<String, DecodeError> {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
    let text = String::from_utf8(bytes).map_err(|_| DecodeError::InvalidText)?;
    Ok(text
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string())
}
