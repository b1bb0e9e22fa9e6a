use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use serde::Serialize;
use std::path::PathBuf;

use cartbank::nes::Nes;
use cartbank::nes::a12::NTSC_FRAME_CYCLES;
use cartbank::nes::config::NesConfig;
use cartbank::nes::database::GameDatabase;
use cartbank::nes::mapper::MapperStateEntry;
use cartbank::nes::memory::{BankWindowTable, Bus};

/// PPU dots per scanline; synthetic rises are spaced one line apart.
const DOTS_PER_LINE: u32 = 341;

#[derive(Debug, Default)]
struct Config {
    rom: Option<PathBuf>,
    config: Option<PathBuf>,
    database: Option<PathBuf>,
    randomize: bool,
    writes: Vec<(u16, u8)>,
    rises: u32,
    json: bool,
}

fn parse_hex<T: TryFrom<u32>>(text: &str) -> Result<T> {
    let digits = text
        .trim_start_matches('$')
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    let value = u32::from_str_radix(digits, 16)
        .with_context(|| format!("invalid hex number: {text}"))?;
    T::try_from(value).map_err(|_| anyhow::anyhow!("hex number out of range: {text}"))
}

fn parse_write(text: &str) -> Result<(u16, u8)> {
    let (addr, value) = text
        .split_once('=')
        .with_context(|| format!("--write expects ADDR=VALUE, got {text}"))?;
    Ok((parse_hex(addr)?, parse_hex(value)?))
}

fn parse_args() -> Result<Config> {
    let mut cfg = Config::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let value = args
                    .next()
                    .context("--config requires a path, e.g. --config cartbank.json")?;
                cfg.config = Some(PathBuf::from(value));
            }
            "--db" => {
                let value = args
                    .next()
                    .context("--db requires a path, e.g. --db NesCarts.xml")?;
                cfg.database = Some(PathBuf::from(value));
            }
            "--randomize" => cfg.randomize = true,
            "--write" => {
                let value = args
                    .next()
                    .context("--write requires ADDR=VALUE, e.g. --write 8000=06")?;
                cfg.writes.push(parse_write(&value)?);
            }
            "--rise" => {
                let value = args
                    .next()
                    .context("--rise requires an integer, e.g. --rise 8")?;
                cfg.rises = value
                    .parse::<u32>()
                    .with_context(|| format!("invalid --rise value: {value}"))?;
            }
            "--json" => cfg.json = true,
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other if other.starts_with("--") => {
                bail!("unknown argument: {other}\nUse --help to view supported options.");
            }
            path => {
                if cfg.rom.is_some() {
                    bail!("only one ROM path may be given, found a second: {path}");
                }
                cfg.rom = Some(PathBuf::from(path));
            }
        }
    }

    Ok(cfg)
}

fn print_help() {
    println!(
        "Cartridge mapper probe\n\n\
Usage:\n\
  cargo run --bin mapper_probe -- <rom.nes> [options]\n\n\
Options:\n\
  --config <path>        JSON console configuration\n\
  --db <path>            NesCartDB-style XML used for chip identification\n\
  --randomize            Randomize power-on register state\n\
  --write <addr=value>   CPU write applied after load, hex (repeatable)\n\
  --rise <n>             Feed n filtered A12 rises to the mapper (default 0)\n\
  --json                 Print the report as JSON\n\
  -h, --help             Show this help\n"
    );
}

#[derive(Debug, Serialize)]
struct WindowReport {
    start: String,
    kind: String,
    page: Option<usize>,
    access: String,
}

#[derive(Debug, Serialize)]
struct Report {
    mapper: String,
    irq_revision: Option<String>,
    registers: Vec<MapperStateEntry>,
    cpu_windows: Vec<WindowReport>,
    ppu_windows: Vec<WindowReport>,
    irq_line: bool,
    save_ram_bytes: Option<usize>,
    snapshot: String,
}

fn describe_windows(table: &BankWindowTable, bus: Bus, starts: &[u16]) -> Vec<WindowReport> {
    starts
        .iter()
        .map(|&start| {
            let window = table.window(bus, start);
            WindowReport {
                start: format!("${start:04X}"),
                kind: window.map_or("-".to_string(), |w| format!("{:?}", w.kind)),
                page: window.map(|w| w.page),
                access: format!("{:?}", table.access(bus, start)),
            }
        })
        .collect()
}

fn build_report(nes: &Nes) -> Result<Report> {
    let table = nes.windows().context("no cartridge loaded")?;
    let cpu_starts = [0x6000, 0x7000, 0x8000, 0xA000, 0xC000, 0xE000];
    let ppu_starts: Vec<u16> = (0..8).map(|slot| slot * 0x400).collect();
    let snapshot = nes.snapshot_state()?;

    Ok(Report {
        mapper: nes.mapper_name().to_string(),
        irq_revision: nes
            .rom_info()
            .map(|info| format!("{:?}", info.irq_revision())),
        registers: nes.mapper_state_entries(),
        cpu_windows: describe_windows(table, Bus::Cpu, &cpu_starts),
        ppu_windows: describe_windows(table, Bus::Ppu, &ppu_starts),
        irq_line: nes.irq_line(),
        save_ram_bytes: nes.save_ram().map(<[u8]>::len),
        snapshot: BASE64_STANDARD.encode(snapshot),
    })
}

fn print_report(report: &Report) {
    println!("Mapper: {}", report.mapper);
    if let Some(revision) = &report.irq_revision {
        println!("IRQ revision: {revision}");
    }
    println!("\nRegisters:");
    for entry in &report.registers {
        println!("  {:<10} {:<32} {}", entry.address, entry.name, entry.value);
    }
    for (label, windows) in [("CPU", &report.cpu_windows), ("PPU", &report.ppu_windows)] {
        println!("\n{label} windows:");
        for w in windows {
            let page = w.page.map_or("-".to_string(), |p| p.to_string());
            println!("  {} {:<8} page {:>4} {}", w.start, w.kind, page, w.access);
        }
    }
    println!("\nIRQ line: {}", if report.irq_line { "asserted" } else { "released" });
    if let Some(bytes) = report.save_ram_bytes {
        println!("Battery RAM: {bytes} bytes");
    }
    println!("Snapshot: {}", report.snapshot);
}

fn main() -> Result<()> {
    let _logger = flexi_logger::Logger::try_with_env_or_str("info")?.start()?;

    let cfg = parse_args()?;
    let rom = cfg
        .rom
        .clone()
        .context("missing ROM path\nUse --help to view supported options.")?;

    let mut console_cfg = match cfg.config.as_deref() {
        Some(path) => NesConfig::from_json_file(path)?,
        None => NesConfig::default(),
    };
    if cfg.randomize {
        console_cfg.randomize_power_on_state = true;
    }

    let mut nes = Nes::with_config(console_cfg)?;
    if let Some(path) = cfg.database.as_deref() {
        nes.set_game_database(GameDatabase::from_file(path)?);
    }
    nes.load_rom_from_path(&rom)?;

    for &(addr, value) in &cfg.writes {
        nes.cpu_write(addr, value);
    }

    let mut cycle = 0u32;
    for _ in 0..cfg.rises {
        nes.notify_ppu_address(0x0000, cycle);
        cycle = (cycle + 20) % NTSC_FRAME_CYCLES;
        nes.notify_ppu_address(0x1000, cycle);
        cycle = (cycle + DOTS_PER_LINE - 20) % NTSC_FRAME_CYCLES;
    }

    let report = build_report(&nes)?;
    if cfg.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}
