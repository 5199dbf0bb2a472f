use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use modbus_transport::{MockBus, RegisterBus};
use register_map::{
    calc, load_register_file, MetricsHub, PseudoRegister, RegisterDescriptor, RegisterEngine,
    RegisterKey, RegisterMap,
};

mod config;
mod output;
mod snapshot;

use config::AppConfig;

#[derive(Parser, Debug)]
#[command(
    name = "mtec",
    version,
    about = "M-TEC inverter register tool",
    disable_help_subcommand = true
)]
struct Cli {
    /// Application config file (YAML); defaults apply when it does not exist
    #[arg(long, global = true, default_value = "mtec.yaml")]
    config: PathBuf,

    /// Register map file, overrides the config
    #[arg(long, global = true)]
    registers: Option<PathBuf>,

    /// Seed the mock bus from a YAML map of address to word(s)
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,

    /// Print Prometheus metrics to stderr on exit
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List configured registers
    List {
        /// Only registers of this group
        #[arg(long)]
        group: Option<String>,
    },
    /// List register groups
    Groups,
    /// Load and check the register map
    Validate {
        /// Dump the parsed map as JSON
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Read registers once
    Read {
        /// Register group to read
        #[arg(long, conflicts_with = "keys")]
        group: Option<String>,
        /// Comma separated register keys
        #[arg(long, value_delimiter = ',')]
        keys: Vec<String>,
        /// `;`-separated output
        #[arg(long, action = ArgAction::SetTrue, conflicts_with = "json")]
        csv: bool,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Write a single register
    Write {
        #[arg(long)]
        key: String,
        #[arg(long)]
        value: String,
        /// Do not ask for confirmation
        #[arg(long, action = ArgAction::SetTrue)]
        yes: bool,
    },
    /// Read one group repeatedly until Ctrl-C
    Watch {
        #[arg(long)]
        group: String,
        /// Seconds between reads (config `refresh_secs` when absent)
        #[arg(long)]
        interval_secs: Option<u64>,
        /// Stop after this many reads
        #[arg(long)]
        count: Option<u64>,
    },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    let mut cfg = AppConfig::load(&cli.config)?;
    if let Some(r) = cli.registers {
        cfg.registers = r;
    }
    if let Some(s) = cli.snapshot {
        cfg.snapshot = Some(s);
    }
    let map = Arc::new(
        load_register_file(&cfg.registers)
            .with_context(|| format!("loading register map {}", cfg.registers.display()))?,
    );
    let hub = MetricsHub::new().map_err(|e| anyhow::anyhow!(e))?;

    let result = match cli.command {
        Commands::List { group } => {
            print!("{}", output::render_register_list(&map, group.as_deref()));
            Ok(())
        }
        Commands::Groups => {
            for g in map.groups() {
                println!("{g}");
            }
            Ok(())
        }
        Commands::Validate { json } => validate(&map, json),
        Commands::Read {
            group,
            keys,
            csv,
            json,
        } => {
            let keys = select_keys(&map, group.as_deref(), &keys)?;
            let mut engine = open_engine(&cfg, &map, &hub)?;
            read_once(&mut engine, &keys, &cfg, csv, json)
        }
        Commands::Write { key, value, yes } => {
            let mut engine = open_engine(&cfg, &map, &hub)?;
            write_register(&mut engine, &RegisterKey::parse(&key), &value, yes)
        }
        Commands::Watch {
            group,
            interval_secs,
            count,
        } => {
            let keys = select_keys(&map, Some(&group), &[])?;
            let interval = interval_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| cfg.refresh_interval());
            let mut engine = open_engine(&cfg, &map, &hub)?;
            watch(&mut engine, &keys, interval, count, cfg.float_decimals)
        }
    };

    if cli.metrics {
        eprint!("{}", hub.encode_text());
    }
    result
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .try_init();
}

fn open_engine(
    cfg: &AppConfig,
    map: &Arc<RegisterMap>,
    hub: &MetricsHub,
) -> Result<RegisterEngine<MockBus>> {
    let mut bus = MockBus::open(&cfg.endpoint)?;
    if let Some(path) = &cfg.snapshot {
        snapshot::seed(&mut bus, &snapshot::load_snapshot(path)?);
    }
    info!(endpoint = %cfg.endpoint, driver = %bus.info().driver, "bus opened");
    Ok(RegisterEngine::new(bus, Arc::clone(map))
        .with_reconnect_cooldown(cfg.reconnect_cooldown())
        .with_metrics(hub))
}

/// Keys of a group, an explicit list, or every register in the map.
fn select_keys(
    map: &RegisterMap,
    group: Option<&str>,
    keys: &[String],
) -> Result<Vec<RegisterKey>> {
    if let Some(g) = group {
        return map
            .registers_in_group(g)
            .ok_or_else(|| anyhow::anyhow!("unknown or empty register group: {g}"));
    }
    if !keys.is_empty() {
        return Ok(keys.iter().map(|k| RegisterKey::parse(k)).collect());
    }
    let mut all = map.wire_keys();
    all.extend(map.pseudo_registers().map(|p| RegisterKey::Pseudo(p.key.clone())));
    Ok(all)
}

fn collect_rows(engine: &mut RegisterEngine<MockBus>, keys: &[RegisterKey]) -> Vec<output::Row> {
    let readings = engine.read(keys);
    let calculated = calc::evaluate(engine.map(), keys, &readings);
    output::rows(keys, &readings, &calculated)
}

fn read_once(
    engine: &mut RegisterEngine<MockBus>,
    keys: &[RegisterKey],
    cfg: &AppConfig,
    csv: bool,
    json: bool,
) -> Result<()> {
    let rows = collect_rows(engine, keys);
    if rows.is_empty() {
        warn!("no register could be read");
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if csv {
        print!("{}", output::render_csv(&rows, cfg.float_decimals));
    } else {
        print!("{}", output::render_table(&rows, cfg.float_decimals));
    }
    Ok(())
}

#[derive(Serialize)]
struct MapDump<'a> {
    registers: Vec<&'a RegisterDescriptor>,
    pseudo: Vec<&'a PseudoRegister>,
}

fn validate(map: &RegisterMap, json: bool) -> Result<()> {
    let pseudo = map.pseudo_registers().count();
    let writable = map.registers().filter(|d| d.writable).count();
    println!(
        "ok: {} registers ({} writable), {} calculated, {} groups",
        map.len(),
        writable,
        pseudo,
        map.groups().len()
    );
    if json {
        let dump = MapDump {
            registers: map.registers().collect(),
            pseudo: map.pseudo_registers().collect(),
        };
        println!("{}", serde_json::to_string_pretty(&dump)?);
    }
    Ok(())
}

fn print_current(engine: &mut RegisterEngine<MockBus>, key: &RegisterKey, label: &str) {
    let rows = collect_rows(engine, std::slice::from_ref(key));
    match rows.first() {
        Some(r) => println!(
            "{label} value of register {} ({}): {} {}",
            r.register, r.name, r.value, r.unit
        ),
        None => println!("{label} value of register {key}: unavailable"),
    }
}

fn write_register(
    engine: &mut RegisterEngine<MockBus>,
    key: &RegisterKey,
    value: &str,
    yes: bool,
) -> Result<()> {
    print_current(engine, key, "Current");
    if !yes {
        print!("Do you want to set it to '{value}'? (y/N) ");
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().read_line(&mut answer)?;
        if !matches!(answer.trim(), "y" | "Y") {
            println!("Aborted by user");
            return Ok(());
        }
    }
    engine
        .try_write(key, value)
        .with_context(|| format!("writing '{value}' to register {key}"))?;
    print_current(engine, key, "New");
    Ok(())
}

fn watch(
    engine: &mut RegisterEngine<MockBus>,
    keys: &[RegisterKey],
    interval: Duration,
    count: Option<u64>,
    decimals: usize,
) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(async {
        let mut cycles = 0u64;
        loop {
            let now = time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)?;
            let rows = collect_rows(engine, keys);
            println!("# {now}");
            print!("{}", output::render_table(&rows, decimals));
            cycles += 1;
            if count.is_some_and(|c| cycles >= c) {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!(cycles, "interrupted");
                    break;
                }
            }
        }
        engine.disconnect();
        Ok::<(), anyhow::Error>(())
    })
}
