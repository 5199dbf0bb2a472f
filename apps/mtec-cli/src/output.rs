use register_map::{DecodedRecord, Readings, RegisterKey, RegisterMap, RegisterValue};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

/// One printable result line: a decoded wire register or a calculated value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub register: String,
    pub name: String,
    pub value: RegisterValue,
    pub unit: String,
}

/// Rows for `keys` in request order. Keys without a value this cycle are left out.
pub fn rows(
    keys: &[RegisterKey],
    readings: &Readings,
    calculated: &BTreeMap<String, DecodedRecord>,
) -> Vec<Row> {
    keys.iter()
        .filter_map(|key| {
            let rec = match key {
                RegisterKey::Wire(a) => readings.get(a),
                RegisterKey::Pseudo(k) => calculated.get(k),
            }?;
            Some(Row {
                register: key.to_string(),
                name: rec.name.clone(),
                value: rec.value.clone(),
                unit: rec.unit.clone(),
            })
        })
        .collect()
}

fn value_text(value: &RegisterValue, decimals: usize) -> String {
    format!("{value:.decimals$}")
}

pub fn render_table(rows: &[Row], decimals: usize) -> String {
    let mut out = String::new();
    for r in rows {
        let _ = writeln!(
            out,
            "- {:<16} {:<45} {} {}",
            r.register,
            r.name,
            value_text(&r.value, decimals),
            r.unit
        );
    }
    out
}

/// `;`-separated, one register per line, unit last.
pub fn render_csv(rows: &[Row], decimals: usize) -> String {
    let mut out = String::from("register;name;value;unit\n");
    for r in rows {
        let _ = writeln!(
            out,
            "{};{};{};{}",
            r.register,
            r.name,
            value_text(&r.value, decimals),
            r.unit
        );
    }
    out
}

/// Register table as configured, optionally restricted to one group.
pub fn render_register_list(map: &RegisterMap, group: Option<&str>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<5} {:<30} {:<4} {:<4} {:<15} Name",
        "Reg", "MQTT Parameter", "Unit", "Mode", "Group"
    );
    let _ = writeln!(
        out,
        "{} {} {} {} {} {}",
        "-".repeat(5),
        "-".repeat(30),
        "-".repeat(4),
        "-".repeat(4),
        "-".repeat(15),
        "-".repeat(23)
    );
    let wanted = |g: &Option<String>| group.map_or(true, |want| g.as_deref() == Some(want));
    for d in map.registers().filter(|d| !d.is_dummy() && wanted(&d.group)) {
        let _ = writeln!(
            out,
            "{:<5} {:<30} {:<4} {:<4} {:<15} {}",
            d.address.to_string(),
            d.mqtt.as_deref().unwrap_or(""),
            d.unit,
            if d.writable { "RW" } else { "R" },
            d.group.as_deref().unwrap_or(""),
            d.name
        );
    }
    // Calculated registers have no wire address.
    for p in map.pseudo_registers().filter(|p| wanted(&p.group)) {
        let _ = writeln!(
            out,
            "{:<5} {:<30} {:<4} {:<4} {:<15} {}",
            "",
            p.mqtt.as_deref().unwrap_or(&p.key),
            p.unit,
            "R",
            p.group.as_deref().unwrap_or(""),
            p.name
        );
    }
    out
}
