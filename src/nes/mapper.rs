use anyhow::{Result, bail};
use serde::Serialize;
use std::fmt;

use super::cartridge::Cartridge;
use super::config::IrqRevision;
use super::irq::IrqSources;
use super::memory::{BankWindowTable, Bus, MemoryAccess, MemoryKind, PageSource};
use super::mmc3::Mmc3;
use super::power_on::PowerOnGenerator;
use super::snapshot::{SnapshotError, StateReader, StateWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirroring {
    Horizontal,
    Vertical,
    FourScreen,
}

impl Mirroring {
    /// Offset into nametable VRAM for a PPU address in `$2000-$3EFF`.
    pub fn nametable_offset(self, addr: u16) -> usize {
        let idx = (addr as usize - 0x2000) & 0x0FFF;
        match self {
            Mirroring::Horizontal => ((idx >> 1) & 0x0400) | (idx & 0x03FF),
            Mirroring::Vertical => idx & 0x07FF,
            Mirroring::FourScreen => idx,
        }
    }
}

/// Cartridge identification, fixed for the lifetime of a loaded session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomInfo {
    pub mapper_id: u16,
    pub submapper_id: u8,
    /// Mapper chip marking from the game database, if the image is known.
    pub chip: Option<String>,
    pub has_battery: bool,
    pub four_screen: bool,
    pub sha1: String,
    pub irq_revision_override: Option<IrqRevision>,
}

impl RomInfo {
    pub fn from_cartridge(cart: &Cartridge) -> Self {
        Self {
            mapper_id: cart.mapper_id,
            submapper_id: cart.submapper_id,
            chip: None,
            has_battery: cart.has_battery_backed_ram,
            four_screen: cart.four_screen,
            sha1: cart.sha1(),
            irq_revision_override: None,
        }
    }

    /// Boards known to carry an MMC3A get the older interrupt behavior. Some
    /// MMC3B boards behave the same way but cannot be told apart.
    pub fn irq_revision(&self) -> IrqRevision {
        if let Some(revision) = self.irq_revision_override {
            return revision;
        }
        match self.chip.as_deref() {
            Some(chip) if chip.starts_with("MMC3A") => IrqRevision::RevA,
            _ => IrqRevision::RevB,
        }
    }

    pub fn is_mmc6(&self) -> bool {
        self.mapper_id == 4 && self.submapper_id == 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StateValue {
    Number8(u8),
    Bool(bool),
    Text(&'static str),
}

impl StateValue {
    pub fn kind(&self) -> &'static str {
        match self {
            StateValue::Number8(_) => "number8",
            StateValue::Bool(_) => "bool",
            StateValue::Text(_) => "text",
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Number8(v) => write!(f, "${v:02X}"),
            StateValue::Bool(v) => write!(f, "{v}"),
            StateValue::Text(v) => f.write_str(v),
        }
    }
}

/// One row of the register view shown by debugging front-ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapperStateEntry {
    pub address: &'static str,
    pub name: &'static str,
    #[serde(flatten)]
    pub value: StateValue,
}

impl MapperStateEntry {
    pub fn new(address: &'static str, name: &'static str, value: StateValue) -> Self {
        Self {
            address,
            name,
            value,
        }
    }

    pub fn number(address: &'static str, name: &'static str, value: u8) -> Self {
        Self::new(address, name, StateValue::Number8(value))
    }

    pub fn flag(address: &'static str, name: &'static str, value: bool) -> Self {
        Self::new(address, name, StateValue::Bool(value))
    }
}

pub trait Mapper {
    fn name(&self) -> &'static str;
    fn info(&self) -> &RomInfo;

    /// `None` when the address is unmapped or not readable (open bus).
    fn cpu_read(&mut self, addr: u16) -> Option<u8>;
    fn cpu_write(&mut self, addr: u16, value: u8, irq: &mut IrqSources);
    fn ppu_read(&mut self, addr: u16) -> u8;
    fn ppu_write(&mut self, addr: u16, value: u8);
    fn mirroring(&self) -> Mirroring;

    /// Called whenever the PPU puts a new address on its bus.
    fn notify_vram_address(&mut self, _addr: u16, _frame_cycle: u32, _irq: &mut IrqSources) {}

    /// Power-on initialization of every register, followed by a full
    /// recompute of the derived window table and mirroring.
    fn reset(&mut self, power_on: &mut PowerOnGenerator);

    fn windows(&self) -> &BankWindowTable;
    fn state_entries(&self) -> Vec<MapperStateEntry> {
        Vec::new()
    }
    fn save_state(&self) -> Vec<u8>;
    fn load_state(&mut self, data: &[u8]) -> Result<(), SnapshotError>;
    fn save_ram(&self) -> Option<&[u8]>;
    fn load_save_ram(&mut self, data: &[u8]);
}

pub fn mapper_name(mapper_id: u16, submapper_id: u8) -> &'static str {
    match (mapper_id, submapper_id) {
        (0, _) => "NROM",
        (4, 1) => "MMC6",
        (4, _) => "MMC3",
        _ => "Unsupported",
    }
}

pub fn create_mapper(
    cart: Cartridge,
    info: RomInfo,
    power_on: &mut PowerOnGenerator,
) -> Result<Box<dyn Mapper>> {
    let mapper: Box<dyn Mapper> = match info.mapper_id {
        0 => Box::new(Nrom::new(cart, info)),
        4 => Box::new(Mmc3::new(cart, info, power_on)),
        id => bail!("mapper {id} is not supported"),
    };
    Ok(mapper)
}

/// Page sizes and RAM sizes a board exposes to [`MapperCore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardLayout {
    pub prg_page_size: usize,
    pub chr_page_size: usize,
    pub ram_page_size: usize,
    pub work_ram_size: usize,
    pub save_ram_size: usize,
}

/// Backing storage plus the window table that routes bus accesses into it.
/// Concrete mappers own one and only decide which pages go where.
#[derive(Debug, Clone)]
pub struct MapperCore {
    info: RomInfo,
    layout: BoardLayout,
    prg_rom: Vec<u8>,
    chr: Vec<u8>,
    chr_is_ram: bool,
    work_ram: Vec<u8>,
    save_ram: Vec<u8>,
    windows: BankWindowTable,
    mirroring: Mirroring,
}

/// RAM contents decoded from a snapshot, applied only once the whole
/// snapshot has been validated.
#[derive(Debug)]
pub struct MemoryImage {
    work_ram: Vec<u8>,
    save_ram: Vec<u8>,
    chr_ram: Option<Vec<u8>>,
}

impl MapperCore {
    pub fn new(cart: Cartridge, info: RomInfo, layout: BoardLayout) -> Self {
        Self {
            info,
            layout,
            prg_rom: cart.prg_rom,
            chr: cart.chr_data,
            chr_is_ram: cart.chr_is_ram,
            work_ram: vec![0; layout.work_ram_size],
            save_ram: vec![0; layout.save_ram_size],
            windows: BankWindowTable::new(),
            mirroring: cart.mirroring,
        }
    }

    pub fn info(&self) -> &RomInfo {
        &self.info
    }

    pub fn has_battery(&self) -> bool {
        self.info.has_battery
    }

    pub fn work_ram_size(&self) -> usize {
        self.work_ram.len()
    }

    pub fn save_ram_size(&self) -> usize {
        self.save_ram.len()
    }

    fn source(&self, kind: MemoryKind) -> PageSource {
        let (page_size, len) = match kind {
            MemoryKind::PrgRom => (self.layout.prg_page_size, self.prg_rom.len()),
            MemoryKind::ChrRom | MemoryKind::ChrRam => (self.layout.chr_page_size, self.chr.len()),
            MemoryKind::WorkRam => (self.layout.ram_page_size, self.work_ram.len()),
            MemoryKind::SaveRam => (self.layout.ram_page_size, self.save_ram.len()),
        };
        PageSource::new(kind, page_size, len)
    }

    fn storage(&self, kind: MemoryKind) -> &[u8] {
        match kind {
            MemoryKind::PrgRom => &self.prg_rom,
            MemoryKind::ChrRom | MemoryKind::ChrRam => &self.chr,
            MemoryKind::WorkRam => &self.work_ram,
            MemoryKind::SaveRam => &self.save_ram,
        }
    }

    fn storage_mut(&mut self, kind: MemoryKind) -> &mut [u8] {
        match kind {
            MemoryKind::PrgRom => &mut self.prg_rom,
            MemoryKind::ChrRom | MemoryKind::ChrRam => &mut self.chr,
            MemoryKind::WorkRam => &mut self.work_ram,
            MemoryKind::SaveRam => &mut self.save_ram,
        }
    }

    /// Maps PRG window `slot` (counted from `$8000`) to `page`.
    pub fn select_prg_page(&mut self, slot: u16, page: i32) {
        let size = self.layout.prg_page_size as u16;
        let start = 0x8000 + slot * size;
        let source = self.source(MemoryKind::PrgRom);
        self.windows
            .map(Bus::Cpu, start, start + (size - 1), source, page, MemoryAccess::Read);
    }

    /// Maps CHR window `slot` (counted from PPU `$0000`) to `page`.
    pub fn select_chr_page(&mut self, slot: u16, page: i32) {
        let size = self.layout.chr_page_size as u16;
        let start = slot * size;
        let (kind, access) = if self.chr_is_ram {
            (MemoryKind::ChrRam, MemoryAccess::ReadWrite)
        } else {
            (MemoryKind::ChrRom, MemoryAccess::Read)
        };
        let source = self.source(kind);
        self.windows
            .map(Bus::Ppu, start, start + (size - 1), source, page, access);
    }

    pub fn set_cpu_mapping(
        &mut self,
        start: u16,
        end: u16,
        page: i32,
        kind: MemoryKind,
        access: MemoryAccess,
    ) {
        let source = self.source(kind);
        self.windows.map(Bus::Cpu, start, end, source, page, access);
    }

    pub fn remove_cpu_mapping(&mut self, start: u16, end: u16) {
        self.windows.unmap(Bus::Cpu, start, end);
    }

    pub fn windows(&self) -> &BankWindowTable {
        &self.windows
    }

    pub fn read_cpu(&self, addr: u16) -> Option<u8> {
        let (kind, offset, access) = self.windows.resolve(Bus::Cpu, addr)?;
        if !access.can_read() {
            return None;
        }
        self.storage(kind).get(offset).copied()
    }

    /// Drops the write when the window is missing or not writable.
    pub fn write_cpu(&mut self, addr: u16, value: u8) {
        if let Some((kind, offset, access)) = self.windows.resolve(Bus::Cpu, addr) {
            if access.can_write() && kind != MemoryKind::PrgRom {
                if let Some(byte) = self.storage_mut(kind).get_mut(offset) {
                    *byte = value;
                }
            }
        }
    }

    pub fn read_chr(&self, addr: u16) -> u8 {
        match self.windows.resolve(Bus::Ppu, addr & 0x1FFF) {
            Some((kind, offset, access)) if access.can_read() => {
                self.storage(kind).get(offset).copied().unwrap_or(0)
            }
            _ => 0,
        }
    }

    pub fn write_chr(&mut self, addr: u16, value: u8) {
        if let Some((kind, offset, access)) = self.windows.resolve(Bus::Ppu, addr & 0x1FFF) {
            if access.can_write() && kind == MemoryKind::ChrRam {
                if let Some(byte) = self.chr.get_mut(offset) {
                    *byte = value;
                }
            }
        }
    }

    pub fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    pub fn set_mirroring(&mut self, mirroring: Mirroring) {
        self.mirroring = mirroring;
    }

    pub fn save_ram(&self) -> Option<&[u8]> {
        (self.info.has_battery && !self.save_ram.is_empty()).then_some(self.save_ram.as_slice())
    }

    /// Preloads battery-backed RAM from a previous session. Extra bytes are
    /// ignored and missing bytes keep their power-on value.
    pub fn load_save_ram(&mut self, data: &[u8]) {
        let len = data.len().min(self.save_ram.len());
        self.save_ram[..len].copy_from_slice(&data[..len]);
    }

    pub fn save_memory(&self, w: &mut StateWriter) {
        w.block(&self.work_ram);
        w.block(&self.save_ram);
        if self.chr_is_ram {
            w.block(&self.chr);
        }
    }

    pub fn read_memory(&self, r: &mut StateReader<'_>) -> Result<MemoryImage, SnapshotError> {
        let work_ram = r.block("work RAM", self.work_ram.len())?;
        let save_ram = r.block("save RAM", self.save_ram.len())?;
        let chr_ram = if self.chr_is_ram {
            Some(r.block("CHR RAM", self.chr.len())?)
        } else {
            None
        };
        Ok(MemoryImage {
            work_ram,
            save_ram,
            chr_ram,
        })
    }

    pub fn apply_memory(&mut self, image: MemoryImage) {
        self.work_ram = image.work_ram;
        self.save_ram = image.save_ram;
        if let Some(chr) = image.chr_ram {
            self.chr = chr;
        }
    }
}

/// Mapper 0: fixed 32 KiB PRG (16 KiB mirrored) and 8 KiB CHR.
pub struct Nrom {
    core: MapperCore,
}

impl Nrom {
    pub fn new(cart: Cartridge, info: RomInfo) -> Self {
        let layout = BoardLayout {
            prg_page_size: 0x4000,
            chr_page_size: 0x2000,
            ram_page_size: 0x2000,
            work_ram_size: cart.work_ram_size,
            save_ram_size: cart.save_ram_size,
        };
        let mut mapper = Self {
            core: MapperCore::new(cart, info, layout),
        };
        mapper.update_windows();
        mapper
    }

    fn update_windows(&mut self) {
        self.core.select_prg_page(0, 0);
        self.core.select_prg_page(1, 1);
        self.core.select_chr_page(0, 0);
        let kind = if self.core.has_battery() {
            MemoryKind::SaveRam
        } else {
            MemoryKind::WorkRam
        };
        self.core
            .set_cpu_mapping(0x6000, 0x7FFF, 0, kind, MemoryAccess::ReadWrite);
    }
}

impl Mapper for Nrom {
    fn name(&self) -> &'static str {
        "NROM"
    }

    fn info(&self) -> &RomInfo {
        self.core.info()
    }

    fn cpu_read(&mut self, addr: u16) -> Option<u8> {
        self.core.read_cpu(addr)
    }

    fn cpu_write(&mut self, addr: u16, value: u8, _irq: &mut IrqSources) {
        self.core.write_cpu(addr, value);
    }

    fn ppu_read(&mut self, addr: u16) -> u8 {
        self.core.read_chr(addr)
    }

    fn ppu_write(&mut self, addr: u16, value: u8) {
        self.core.write_chr(addr, value);
    }

    fn mirroring(&self) -> Mirroring {
        self.core.mirroring()
    }

    fn reset(&mut self, _power_on: &mut PowerOnGenerator) {
        self.update_windows();
    }

    fn windows(&self) -> &BankWindowTable {
        self.core.windows()
    }

    fn save_state(&self) -> Vec<u8> {
        let mut w = StateWriter::new();
        w.header(self.core.info().mapper_id, self.core.info().submapper_id);
        self.core.save_memory(&mut w);
        w.finish()
    }

    fn load_state(&mut self, data: &[u8]) -> Result<(), SnapshotError> {
        let mut r = StateReader::new(data);
        r.header(self.core.info().mapper_id, self.core.info().submapper_id)?;
        let image = self.core.read_memory(&mut r)?;
        r.finish()?;
        self.core.apply_memory(image);
        Ok(())
    }

    fn save_ram(&self) -> Option<&[u8]> {
        self.core.save_ram()
    }

    fn load_save_ram(&mut self, data: &[u8]) {
        self.core.load_save_ram(data);
    }
}
