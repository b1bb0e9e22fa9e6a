pub mod a12;
pub mod cartridge;
pub mod config;
pub mod database;
pub mod irq;
pub mod mapper;
pub mod memory;
pub mod mmc3;
pub mod power_on;
pub mod snapshot;

use anyhow::Result;
use log::{debug, info, warn};
use std::{collections::VecDeque, fmt::Write as _, path::Path};

use cartridge::Cartridge;
use config::NesConfig;
use database::GameDatabase;
use irq::{IrqSource, IrqSources};
use mapper::{Mapper, MapperStateEntry, Mirroring, RomInfo, create_mapper, mapper_name};
use memory::BankWindowTable;
use power_on::PowerOnGenerator;
use snapshot::{SnapshotError, StateReader, StateWriter};

#[derive(Debug, Clone, Copy, Default)]
pub struct NesDebugCounters {
    pub cpu_reads: u64,
    pub cpu_writes: u64,
    pub cpu_reads_cart: u64,
    pub cpu_writes_cart: u64,
    pub cpu_open_bus_reads: u64,
    pub ppu_address_notifications: u64,
    pub mapper_irq_assertions: u64,
    pub last_cpu_read_addr: u16,
    pub last_cpu_write_addr: u16,
    pub last_cpu_write_value: u8,
}

/// Owns every subsystem of one loaded session and routes bus traffic
/// between the CPU side, the PPU side and the cartridge mapper.
pub struct Nes {
    pub(crate) ram: [u8; 2048],
    vram: [u8; 4096],
    palette: [u8; 32],
    pub(crate) irq: IrqSources,
    pub(crate) mapper: Option<Box<dyn Mapper>>,

    config: NesConfig,
    database: Option<GameDatabase>,
    power_on: PowerOnGenerator,

    mapper_name: String,
    cpu_open_bus: u8,
    debug: NesDebugCounters,
    debug_events: VecDeque<String>,
}

impl Default for Nes {
    fn default() -> Self {
        Self::new()
    }
}

impl Nes {
    pub fn new() -> Self {
        Self {
            ram: [0; 2048],
            vram: [0; 4096],
            palette: [0; 32],
            irq: IrqSources::new(),
            mapper: None,
            config: NesConfig::default(),
            database: None,
            power_on: PowerOnGenerator::deterministic(),
            mapper_name: "No ROM loaded".to_string(),
            cpu_open_bus: 0,
            debug: NesDebugCounters::default(),
            debug_events: VecDeque::with_capacity(512),
        }
    }

    /// Builds a console from `config`, loading the game database it names.
    pub fn with_config(config: NesConfig) -> Result<Self> {
        let mut nes = Self::new();
        if let Some(path) = config.game_database.as_deref() {
            nes.database = Some(GameDatabase::from_file(path)?);
        }
        if config.randomize_power_on_state {
            nes.power_on = PowerOnGenerator::randomized(config.power_on_seed);
        }
        nes.config = config;
        Ok(nes)
    }

    pub fn set_game_database(&mut self, database: GameDatabase) {
        self.database = Some(database);
    }

    pub fn config(&self) -> &NesConfig {
        &self.config
    }

    pub fn mapper_name(&self) -> &str {
        &self.mapper_name
    }

    pub fn has_rom(&self) -> bool {
        self.mapper.is_some()
    }

    pub fn rom_info(&self) -> Option<&RomInfo> {
        self.mapper.as_deref().map(|mapper| mapper.info())
    }

    pub fn load_rom_from_path(&mut self, path: &Path) -> Result<()> {
        let cart = Cartridge::from_file(path)?;
        self.load_cartridge(cart, None)
    }

    /// Loads an iNES image, optionally restoring battery-backed RAM saved by
    /// an earlier session.
    pub fn load_rom_bytes(&mut self, rom: &[u8], save_ram: Option<&[u8]>) -> Result<()> {
        let cart = Cartridge::from_bytes(rom)?;
        self.load_cartridge(cart, save_ram)
    }

    fn identify(&self, cart: &Cartridge) -> RomInfo {
        let mut info = RomInfo::from_cartridge(cart);
        info.irq_revision_override = self.config.irq_revision;

        let Some(database) = self.database.as_ref() else {
            return info;
        };
        match database.lookup(&info.sha1) {
            Some(entry) => {
                info.chip = entry.mapper_chip().map(str::to_string);
                if let Some(db_mapper) = entry.mapper.filter(|&id| id != info.mapper_id) {
                    warn!(
                        "header says mapper {} but the database lists {db_mapper} for {}",
                        info.mapper_id, entry.board
                    );
                }
                if info.mapper_id == 4
                    && !info.chip.as_deref().is_some_and(|chip| chip.starts_with("MMC"))
                {
                    warn!("unrecognized mapper chip {:?} on {}", info.chip, entry.board);
                }
            }
            None => debug!("no game database entry for {}", info.sha1),
        }
        info
    }

    fn load_cartridge(&mut self, cart: Cartridge, save_ram: Option<&[u8]>) -> Result<()> {
        let info = self.identify(&cart);
        let mapper_id = info.mapper_id;
        let submapper_id = info.submapper_id;
        let supported_name = mapper_name(mapper_id, submapper_id);
        let prg_kib = cart.prg_rom.len() / 1024;
        let chr_kib = cart.chr_data.len() / 1024;
        let revision = info.irq_revision();

        let mut mapper = create_mapper(cart, info, &mut self.power_on)?;
        if let Some(data) = save_ram {
            mapper.load_save_ram(data);
        }
        self.mapper = Some(mapper);

        self.mapper_name = if submapper_id != 0 {
            format!("{supported_name} (mapper {mapper_id}, submapper {submapper_id})")
        } else {
            format!("{supported_name} (mapper {mapper_id})")
        };
        info!(
            "loaded {}: {prg_kib} KiB PRG, {chr_kib} KiB CHR, IRQ {revision:?}",
            self.mapper_name
        );

        self.reset_console();
        self.push_debug_event(format!("ROM loaded: {}", self.mapper_name));
        Ok(())
    }

    fn reset_console(&mut self) {
        self.ram = [0; 2048];
        self.vram = [0; 4096];
        self.palette = [0; 32];
        self.irq.reset();
        self.cpu_open_bus = 0;
        self.debug = NesDebugCounters::default();
        self.debug_events.clear();
    }

    /// Power cycle: reinitializes mapper registers from the power-on
    /// generator and clears console RAM and interrupt sources.
    pub fn reset(&mut self) {
        let Some(mapper) = self.mapper.as_mut() else {
            return;
        };
        mapper.reset(&mut self.power_on);
        self.reset_console();
        debug!("power cycled {}", self.mapper_name);
        self.push_debug_event("Power cycle");
    }

    pub fn cpu_read(&mut self, addr: u16) -> u8 {
        self.debug.cpu_reads = self.debug.cpu_reads.wrapping_add(1);
        self.debug.last_cpu_read_addr = addr;
        let value = match addr {
            0x0000..=0x1FFF => Some(self.ram[(addr as usize) & 0x07FF]),
            0x4020..=0xFFFF => {
                self.debug.cpu_reads_cart = self.debug.cpu_reads_cart.wrapping_add(1);
                self.mapper.as_mut().and_then(|mapper| mapper.cpu_read(addr))
            }
            // PPU and APU registers are owned by collaborators outside this core.
            _ => None,
        };

        match value {
            Some(value) => {
                self.cpu_open_bus = value;
                value
            }
            None => {
                self.debug.cpu_open_bus_reads = self.debug.cpu_open_bus_reads.wrapping_add(1);
                self.cpu_open_bus
            }
        }
    }

    pub fn cpu_write(&mut self, addr: u16, value: u8) {
        self.debug.cpu_writes = self.debug.cpu_writes.wrapping_add(1);
        self.debug.last_cpu_write_addr = addr;
        self.debug.last_cpu_write_value = value;
        self.cpu_open_bus = value;
        match addr {
            0x0000..=0x1FFF => self.ram[(addr as usize) & 0x07FF] = value,
            0x4020..=0xFFFF => {
                self.debug.cpu_writes_cart = self.debug.cpu_writes_cart.wrapping_add(1);
                if let Some(mapper) = self.mapper.as_mut() {
                    mapper.cpu_write(addr, value, &mut self.irq);
                }
            }
            _ => {}
        }
    }

    fn palette_index(addr: u16) -> usize {
        let idx = (addr as usize) & 0x1F;
        if idx >= 0x10 && idx % 4 == 0 {
            idx - 0x10
        } else {
            idx
        }
    }

    pub fn ppu_read(&mut self, addr: u16) -> u8 {
        let addr = addr & 0x3FFF;
        match addr {
            0x0000..=0x1FFF => self
                .mapper
                .as_mut()
                .map_or(0, |mapper| mapper.ppu_read(addr)),
            0x2000..=0x3EFF => self.vram[self.mirroring().nametable_offset(addr)],
            _ => self.palette[Self::palette_index(addr)],
        }
    }

    pub fn ppu_write(&mut self, addr: u16, value: u8) {
        let addr = addr & 0x3FFF;
        match addr {
            0x0000..=0x1FFF => {
                if let Some(mapper) = self.mapper.as_mut() {
                    mapper.ppu_write(addr, value);
                }
            }
            0x2000..=0x3EFF => {
                let offset = self.mirroring().nametable_offset(addr);
                self.vram[offset] = value;
            }
            _ => self.palette[Self::palette_index(addr)] = value,
        }
    }

    /// Called by the PPU each time it drives a new address onto its bus.
    pub fn notify_ppu_address(&mut self, addr: u16, frame_cycle: u32) {
        let Some(mapper) = self.mapper.as_mut() else {
            return;
        };
        self.debug.ppu_address_notifications =
            self.debug.ppu_address_notifications.wrapping_add(1);

        let was_asserted = self.irq.has(IrqSource::External);
        mapper.notify_vram_address(addr, frame_cycle, &mut self.irq);
        if !was_asserted && self.irq.has(IrqSource::External) {
            self.debug.mapper_irq_assertions = self.debug.mapper_irq_assertions.wrapping_add(1);
            self.push_debug_event(format!("Mapper IRQ asserted at frame cycle {frame_cycle}"));
        }
    }

    pub fn mirroring(&self) -> Mirroring {
        self.mapper
            .as_deref()
            .map_or(Mirroring::Horizontal, |mapper| mapper.mirroring())
    }

    /// Level of the CPU /IRQ input: asserted while any source is active.
    pub fn irq_line(&self) -> bool {
        self.irq.any()
    }

    pub fn irq_sources(&self) -> IrqSources {
        self.irq
    }

    pub fn set_irq_source(&mut self, source: IrqSource) {
        self.irq.set(source);
    }

    pub fn clear_irq_source(&mut self, source: IrqSource) {
        self.irq.clear(source);
    }

    pub fn windows(&self) -> Option<&BankWindowTable> {
        self.mapper.as_deref().map(|mapper| mapper.windows())
    }

    pub fn mapper_state_entries(&self) -> Vec<MapperStateEntry> {
        self.mapper
            .as_deref()
            .map(|mapper| mapper.state_entries())
            .unwrap_or_default()
    }

    pub fn debug_mapper_state(&self) -> String {
        let entries = self.mapper_state_entries();
        if entries.is_empty() {
            return self.mapper_name.clone();
        }
        let mut out = String::new();
        for entry in entries {
            let _ = writeln!(out, "{:<10} {:<32} {}", entry.address, entry.name, entry.value);
        }
        out
    }

    pub fn debug_counters(&self) -> NesDebugCounters {
        self.debug
    }

    pub fn debug_peek_internal_ram(&self, addr: u16) -> u8 {
        self.ram[(addr as usize) & 0x07FF]
    }

    pub fn debug_recent_events(&self, limit: usize) -> Vec<String> {
        if limit == 0 {
            return Vec::new();
        }

        self.debug_events
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    fn push_debug_event<S: Into<String>>(&mut self, event: S) {
        const MAX_DEBUG_EVENTS: usize = 512;
        if self.debug_events.len() >= MAX_DEBUG_EVENTS {
            self.debug_events.pop_front();
        }
        self.debug_events.push_back(event.into());
    }

    /// Battery-backed RAM to persist between sessions, if the board has any.
    pub fn save_ram(&self) -> Option<&[u8]> {
        self.mapper.as_deref().and_then(|mapper| mapper.save_ram())
    }

    pub fn snapshot_state(&self) -> Result<Vec<u8>, SnapshotError> {
        let mapper = self.mapper.as_deref().ok_or(SnapshotError::NoCartridge)?;
        let mut w = StateWriter::new();
        w.u8(self.irq.bits());
        w.u8(self.cpu_open_bus);
        w.bytes(&self.ram);
        w.bytes(&self.vram);
        w.bytes(&self.palette);
        w.block(&mapper.save_state());
        Ok(w.finish())
    }

    /// Restores a snapshot taken by [`Nes::snapshot_state`]. On error the
    /// running session is left exactly as it was.
    pub fn restore_state(&mut self, data: &[u8]) -> Result<(), SnapshotError> {
        let mapper = self.mapper.as_mut().ok_or(SnapshotError::NoCartridge)?;
        let mut r = StateReader::new(data);
        let irq_bits = r.u8()?;
        let open_bus = r.u8()?;
        let ram = r.array::<2048>()?;
        let vram = r.array::<4096>()?;
        let palette = r.array::<32>()?;
        let len = r.u32()? as usize;
        let mapper_state = r.bytes(len)?;
        r.finish()?;

        mapper.load_state(mapper_state)?;
        self.irq = IrqSources::from_bits(irq_bits);
        self.cpu_open_bus = open_bus;
        self.ram = ram;
        self.vram = vram;
        self.palette = palette;
        debug!("restored {} byte snapshot", data.len());
        self.push_debug_event("Snapshot restored");
        Ok(())
    }
}
