use super::a12::{A12Edge, A12Watcher};
use super::cartridge::Cartridge;
use super::config::IrqRevision;
use super::irq::{IrqSource, IrqSources};
use super::mapper::{
    BoardLayout, Mapper, MapperCore, MapperStateEntry, Mirroring, RomInfo, StateValue,
};
use super::memory::{BankWindowTable, MemoryAccess, MemoryKind};
use super::power_on::PowerOnGenerator;
use super::snapshot::{SnapshotError, StateReader, StateWriter};

const PRG_PAGE_SIZE: usize = 0x2000;
const CHR_PAGE_SIZE: usize = 0x400;
const MMC6_RAM_SIZE: usize = 0x400;
const MMC6_RAM_PAGE_SIZE: usize = 0x200;

/// Power-on values of the eight bank registers.
const DEFAULT_BANK_REGISTERS: [u8; 8] = [0, 2, 4, 5, 6, 7, 0, 1];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mmc3Variant {
    Mmc3,
    /// MMC6: 1 KiB of on-chip RAM at `$7000-$7FFF`, split in two halves with
    /// their own read/write enables.
    Mmc6,
}

impl Mmc3Variant {
    pub fn from_rom_info(info: &RomInfo) -> Self {
        if info.is_mmc6() {
            Mmc3Variant::Mmc6
        } else {
            Mmc3Variant::Mmc3
        }
    }
}

/// CHR page for each of the eight 1 KiB windows. Registers 0 and 1 select
/// 2 KiB pairs; `chr_mode` swaps the pattern table halves.
pub fn chr_pages(chr_mode: bool, regs: &[u8; 8]) -> [u8; 8] {
    let pairs = [regs[0] & 0xFE, regs[0] | 0x01, regs[1] & 0xFE, regs[1] | 0x01];
    let singles = [regs[2], regs[3], regs[4], regs[5]];
    let (low, high) = if chr_mode {
        (singles, pairs)
    } else {
        (pairs, singles)
    };
    [
        low[0], low[1], low[2], low[3], high[0], high[1], high[2], high[3],
    ]
}

/// PRG page for each of the four 8 KiB windows. Negative pages count from
/// the end of PRG ROM.
pub fn prg_pages(prg_mode: bool, r6: u8, r7: u8) -> [i32; 4] {
    if prg_mode {
        [-2, r7 as i32, r6 as i32, -1]
    } else {
        [r6 as i32, r7 as i32, -2, -1]
    }
}

/// Whether a counter clock that left the counter at `counter` asserts the IRQ.
pub fn irq_should_fire(
    revision: IrqRevision,
    previous: u8,
    counter: u8,
    reload_was_pending: bool,
    enabled: bool,
) -> bool {
    let fires = counter == 0 && enabled;
    match revision {
        IrqRevision::RevA => fires && (previous > 0 || reload_was_pending),
        IrqRevision::RevB => fires,
    }
}

/// Permission of the `$6000-$7FFF` window on a plain MMC3.
pub fn wram_access(enabled: bool, write_protected: bool) -> MemoryAccess {
    match (enabled, write_protected) {
        (false, _) => MemoryAccess::NoAccess,
        (true, false) => MemoryAccess::ReadWrite,
        (true, true) => MemoryAccess::Read,
    }
}

/// Permissions of the two MMC6 RAM halves, from `$8000` bit 5 and `$A001`.
pub fn mmc6_ram_access(reg_8000: u8, reg_a001: u8) -> (MemoryAccess, MemoryAccess) {
    if reg_8000 & 0x20 == 0 {
        return (MemoryAccess::NoAccess, MemoryAccess::NoAccess);
    }
    (
        MemoryAccess::from_flags(reg_a001 & 0x20 != 0, reg_a001 & 0x10 != 0),
        MemoryAccess::from_flags(reg_a001 & 0x80 != 0, reg_a001 & 0x40 != 0),
    )
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Mmc3Registers {
    reg_8000: u8,
    reg_a000: u8,
    reg_a001: u8,
    current_register: u8,
    chr_mode: bool,
    prg_mode: bool,
    registers: [u8; 8],

    irq_reload_value: u8,
    irq_counter: u8,
    irq_reload: bool,
    irq_enabled: bool,

    wram_enabled: bool,
    wram_write_protected: bool,
}

impl Mmc3Registers {
    fn power_on(power_on: &mut PowerOnGenerator) -> Self {
        let mut regs = Self {
            reg_8000: power_on.next(),
            reg_a000: power_on.next(),
            reg_a001: power_on.next(),
            chr_mode: power_on.next() & 0x01 != 0,
            prg_mode: power_on.next() & 0x01 != 0,
            current_register: power_on.next(),
            ..Self::default()
        };
        for (reg, default) in regs.registers.iter_mut().zip(DEFAULT_BANK_REGISTERS) {
            *reg = power_on.byte(default);
        }
        regs.irq_counter = power_on.next();
        regs.irq_reload_value = power_on.next();
        regs.irq_reload = power_on.next() & 0x01 != 0;
        regs.irq_enabled = power_on.next() & 0x01 != 0;
        regs.wram_enabled = power_on.next() & 0x01 != 0;
        regs.wram_write_protected = power_on.next() & 0x01 != 0;
        regs
    }

    fn save(&self, w: &mut StateWriter) {
        w.bytes(&self.registers);
        w.u8(self.reg_8000);
        w.u8(self.reg_a000);
        w.u8(self.reg_a001);
        w.u8(self.current_register);
        w.bool(self.chr_mode);
        w.bool(self.prg_mode);
        w.u8(self.irq_reload_value);
        w.u8(self.irq_counter);
        w.bool(self.irq_reload);
        w.bool(self.irq_enabled);
        w.bool(self.wram_enabled);
        w.bool(self.wram_write_protected);
    }

    fn load(r: &mut StateReader<'_>) -> Result<Self, SnapshotError> {
        Ok(Self {
            registers: r.array()?,
            reg_8000: r.u8()?,
            reg_a000: r.u8()?,
            reg_a001: r.u8()?,
            current_register: r.u8()?,
            chr_mode: r.bool()?,
            prg_mode: r.bool()?,
            irq_reload_value: r.u8()?,
            irq_counter: r.u8()?,
            irq_reload: r.bool()?,
            irq_enabled: r.bool()?,
            wram_enabled: r.bool()?,
            wram_write_protected: r.bool()?,
        })
    }
}

/// Mapper 4: MMC3 and its MMC6 sibling.
pub struct Mmc3 {
    core: MapperCore,
    variant: Mmc3Variant,
    revision: IrqRevision,
    regs: Mmc3Registers,
    a12: A12Watcher,
}

impl Mmc3 {
    pub fn new(cart: Cartridge, info: RomInfo, power_on: &mut PowerOnGenerator) -> Self {
        let variant = Mmc3Variant::from_rom_info(&info);
        let revision = info.irq_revision();
        let layout = match variant {
            Mmc3Variant::Mmc3 => BoardLayout {
                prg_page_size: PRG_PAGE_SIZE,
                chr_page_size: CHR_PAGE_SIZE,
                ram_page_size: 0x2000,
                work_ram_size: cart.work_ram_size,
                save_ram_size: cart.save_ram_size,
            },
            Mmc3Variant::Mmc6 => {
                let (work_ram_size, save_ram_size) = if info.has_battery {
                    (0, MMC6_RAM_SIZE)
                } else {
                    (MMC6_RAM_SIZE, 0)
                };
                BoardLayout {
                    prg_page_size: PRG_PAGE_SIZE,
                    chr_page_size: CHR_PAGE_SIZE,
                    ram_page_size: MMC6_RAM_PAGE_SIZE,
                    work_ram_size,
                    save_ram_size,
                }
            }
        };

        let mut mapper = Self {
            core: MapperCore::new(cart, info, layout),
            variant,
            revision,
            regs: Mmc3Registers::default(),
            a12: A12Watcher::default(),
        };
        mapper.reset(power_on);
        mapper
    }

    pub fn variant(&self) -> Mmc3Variant {
        self.variant
    }

    pub fn revision(&self) -> IrqRevision {
        self.revision
    }

    pub fn irq_counter(&self) -> u8 {
        self.regs.irq_counter
    }

    pub fn irq_reload_pending(&self) -> bool {
        self.regs.irq_reload
    }

    pub fn bank_register(&self, index: usize) -> u8 {
        self.regs.registers[index & 0x07]
    }

    fn ram_kind(&self) -> MemoryKind {
        if self.core.has_battery() {
            MemoryKind::SaveRam
        } else {
            MemoryKind::WorkRam
        }
    }

    fn ram_size(&self) -> usize {
        match self.ram_kind() {
            MemoryKind::SaveRam => self.core.save_ram_size(),
            _ => self.core.work_ram_size(),
        }
    }

    pub fn write_register(&mut self, addr: u16, value: u8, irq: &mut IrqSources) {
        match addr & 0xE001 {
            0x8000 => {
                self.regs.reg_8000 = value;
                self.update_state();
            }
            0x8001 => {
                let index = (self.regs.reg_8000 & 0x07) as usize;
                self.regs.registers[index] = if index <= 1 { value & !0x01 } else { value };
                self.update_state();
            }
            0xA000 => {
                self.regs.reg_a000 = value;
                self.update_mirroring();
            }
            0xA001 => {
                self.regs.reg_a001 = value;
                self.update_state();
            }
            0xC000 => self.regs.irq_reload_value = value,
            0xC001 => {
                self.regs.irq_counter = 0;
                self.regs.irq_reload = true;
            }
            0xE000 => {
                self.regs.irq_enabled = false;
                irq.clear(IrqSource::External);
            }
            0xE001 => self.regs.irq_enabled = true,
            _ => {}
        }
    }

    fn update_state(&mut self) {
        self.regs.current_register = self.regs.reg_8000 & 0x07;
        self.regs.chr_mode = self.regs.reg_8000 & 0x80 != 0;
        self.regs.prg_mode = self.regs.reg_8000 & 0x40 != 0;

        match self.variant {
            Mmc3Variant::Mmc6 => {
                self.regs.wram_enabled = self.regs.reg_8000 & 0x20 != 0;
                self.update_mmc6_ram();
            }
            Mmc3Variant::Mmc3 => {
                self.regs.wram_enabled = self.regs.reg_a001 & 0x80 != 0;
                self.regs.wram_write_protected = self.regs.reg_a001 & 0x40 != 0;
                self.update_wram();
            }
        }

        self.update_prg_windows();
        self.update_chr_windows();
    }

    fn update_wram(&mut self) {
        if self.ram_size() == 0 {
            self.core.remove_cpu_mapping(0x6000, 0x7FFF);
            return;
        }
        // Only the plain board honors $A001; other submappers keep RAM open.
        let access = if self.core.info().submapper_id == 0 {
            wram_access(self.regs.wram_enabled, self.regs.wram_write_protected)
        } else {
            MemoryAccess::ReadWrite
        };
        let kind = self.ram_kind();
        self.core.set_cpu_mapping(0x6000, 0x7FFF, 0, kind, access);
    }

    fn update_mmc6_ram(&mut self) {
        let (first, last) = mmc6_ram_access(self.regs.reg_8000, self.regs.reg_a001);
        let kind = self.ram_kind();
        self.core.remove_cpu_mapping(0x6000, 0x6FFF);
        for mirror in 0..4u16 {
            let base = 0x7000 + mirror * 0x400;
            self.core.set_cpu_mapping(base, base + 0x1FF, 0, kind, first);
            self.core.set_cpu_mapping(base + 0x200, base + 0x3FF, 1, kind, last);
        }
    }

    fn update_prg_windows(&mut self) {
        let pages = prg_pages(
            self.regs.prg_mode,
            self.regs.registers[6],
            self.regs.registers[7],
        );
        for (slot, page) in pages.into_iter().enumerate() {
            self.core.select_prg_page(slot as u16, page);
        }
    }

    fn update_chr_windows(&mut self) {
        let pages = chr_pages(self.regs.chr_mode, &self.regs.registers);
        for (slot, page) in pages.into_iter().enumerate() {
            self.core.select_chr_page(slot as u16, page as i32);
        }
    }

    fn update_mirroring(&mut self) {
        if self.core.info().four_screen {
            self.core.set_mirroring(Mirroring::FourScreen);
        } else if self.regs.reg_a000 & 0x01 != 0 {
            self.core.set_mirroring(Mirroring::Horizontal);
        } else {
            self.core.set_mirroring(Mirroring::Vertical);
        }
    }

    fn clock_irq_counter(&mut self, irq: &mut IrqSources) {
        let previous = self.regs.irq_counter;
        let reload_was_pending = self.regs.irq_reload;
        if self.regs.irq_counter == 0 || self.regs.irq_reload {
            self.regs.irq_counter = self.regs.irq_reload_value;
        } else {
            self.regs.irq_counter -= 1;
        }

        if irq_should_fire(
            self.revision,
            previous,
            self.regs.irq_counter,
            reload_was_pending,
            self.regs.irq_enabled,
        ) {
            irq.set(IrqSource::External);
        }
        self.regs.irq_reload = false;
    }
}

impl Mapper for Mmc3 {
    fn name(&self) -> &'static str {
        match self.variant {
            Mmc3Variant::Mmc3 => "MMC3",
            Mmc3Variant::Mmc6 => "MMC6",
        }
    }

    fn info(&self) -> &RomInfo {
        self.core.info()
    }

    fn cpu_read(&mut self, addr: u16) -> Option<u8> {
        self.core.read_cpu(addr)
    }

    fn cpu_write(&mut self, addr: u16, value: u8, irq: &mut IrqSources) {
        if addr >= 0x8000 {
            self.write_register(addr, value, irq);
        } else {
            self.core.write_cpu(addr, value);
        }
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

    fn notify_vram_address(&mut self, addr: u16, frame_cycle: u32, irq: &mut IrqSources) {
        if self.a12.observe(addr, frame_cycle) == A12Edge::Rise {
            self.clock_irq_counter(irq);
        }
    }

    fn reset(&mut self, power_on: &mut PowerOnGenerator) {
        self.regs = Mmc3Registers::power_on(power_on);
        self.a12.reset();
        self.update_state();
        self.update_mirroring();
    }

    fn windows(&self) -> &BankWindowTable {
        self.core.windows()
    }

    fn state_entries(&self) -> Vec<MapperStateEntry> {
        let r = &self.regs;
        let mut entries = vec![MapperStateEntry::number(
            "$8000.0-2",
            "Current Register",
            r.reg_8000 & 0x07,
        )];
        if self.variant == Mmc3Variant::Mmc6 {
            entries.push(MapperStateEntry::flag(
                "$8000.5",
                "Work RAM Enabled",
                r.reg_8000 & 0x20 != 0,
            ));
        }
        entries.push(MapperStateEntry::flag(
            "$8000.6",
            "PRG Banking Mode",
            r.reg_8000 & 0x40 != 0,
        ));
        entries.push(MapperStateEntry::flag(
            "$8000.7",
            "CHR Banking Mode",
            r.reg_8000 & 0x80 != 0,
        ));
        let mirroring = if r.reg_a000 & 0x01 != 0 {
            "Horizontal"
        } else {
            "Vertical"
        };
        entries.push(MapperStateEntry::new(
            "$A000.0",
            "Mirroring",
            StateValue::Text(mirroring),
        ));

        match self.variant {
            Mmc3Variant::Mmc6 => {
                let a001 = r.reg_a001;
                entries.extend([
                    MapperStateEntry::flag("$A001.4", "Work RAM Bank 0 Write Enabled", a001 & 0x10 != 0),
                    MapperStateEntry::flag("$A001.5", "Work RAM Bank 0 Read Enabled", a001 & 0x20 != 0),
                    MapperStateEntry::flag("$A001.6", "Work RAM Bank 1 Write Enabled", a001 & 0x40 != 0),
                    MapperStateEntry::flag("$A001.7", "Work RAM Bank 1 Read Enabled", a001 & 0x80 != 0),
                ]);
            }
            Mmc3Variant::Mmc3 => {
                entries.extend([
                    MapperStateEntry::flag("$A001.6", "Work RAM Write Protected", r.wram_write_protected),
                    MapperStateEntry::flag("$A001.7", "Work RAM Enabled", r.wram_enabled),
                ]);
            }
        }

        entries.extend([
            MapperStateEntry::number("$C000", "IRQ Reload Value", r.irq_reload_value),
            MapperStateEntry::number("", "IRQ Counter", r.irq_counter),
            MapperStateEntry::flag("", "IRQ Reload Flag", r.irq_reload),
            MapperStateEntry::flag("$E000/1", "IRQ Enabled", r.irq_enabled),
        ]);

        const REGISTER_NAMES: [&str; 8] = [
            "Register 0 (CHR)",
            "Register 1 (CHR)",
            "Register 2 (CHR)",
            "Register 3 (CHR)",
            "Register 4 (CHR)",
            "Register 5 (CHR)",
            "Register 6 (PRG)",
            "Register 7 (PRG)",
        ];
        for (name, value) in REGISTER_NAMES.into_iter().zip(r.registers) {
            entries.push(MapperStateEntry::number("", name, value));
        }
        entries
    }

    fn save_state(&self) -> Vec<u8> {
        let mut w = StateWriter::new();
        w.header(self.core.info().mapper_id, self.core.info().submapper_id);
        self.regs.save(&mut w);
        let (last_cycle, cycles_down) = self.a12.raw();
        w.u32(last_cycle);
        w.u32(cycles_down);
        self.core.save_memory(&mut w);
        w.finish()
    }

    fn load_state(&mut self, data: &[u8]) -> Result<(), SnapshotError> {
        let mut r = StateReader::new(data);
        r.header(self.core.info().mapper_id, self.core.info().submapper_id)?;
        let regs = Mmc3Registers::load(&mut r)?;
        let last_cycle = r.u32()?;
        let cycles_down = r.u32()?;
        let memory = self.core.read_memory(&mut r)?;
        r.finish()?;

        self.regs = regs;
        self.a12.set_raw(last_cycle, cycles_down);
        self.core.apply_memory(memory);
        self.update_state();
        self.update_mirroring();
        Ok(())
    }

    fn save_ram(&self) -> Option<&[u8]> {
        self.core.save_ram()
    }

    fn load_save_ram(&mut self, data: &[u8]) {
        self.core.load_save_ram(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nes::mapper::tests::{make_cart, patterned_banks};
    use crate::nes::memory::Bus;

    fn make_mmc3(prg_pages: usize, chr_pages: usize) -> Mmc3 {
        let prg = patterned_banks(prg_pages * PRG_PAGE_SIZE, PRG_PAGE_SIZE);
        let chr = patterned_banks(chr_pages * CHR_PAGE_SIZE, CHR_PAGE_SIZE);
        let cart = make_cart(4, 0, prg, chr, false);
        let info = RomInfo::from_cartridge(&cart);
        Mmc3::new(cart, info, &mut PowerOnGenerator::deterministic())
    }

    fn with_revision(mut mapper: Mmc3, revision: IrqRevision) -> Mmc3 {
        mapper.revision = revision;
        mapper
    }

    /// Drops A12 long enough for the next rise to count, then raises it.
    fn rise(mapper: &mut Mmc3, irq: &mut IrqSources, cycle: &mut u32) {
        mapper.notify_vram_address(0x0000, *cycle, irq);
        *cycle += 20;
        mapper.notify_vram_address(0x1000, *cycle, irq);
        *cycle += 20;
    }

    #[test]
    fn chr_and_prg_page_layouts() {
        let regs = [4, 9, 10, 11, 12, 13, 3, 5];
        assert_eq!(chr_pages(false, &regs), [4, 5, 8, 9, 10, 11, 12, 13]);
        assert_eq!(chr_pages(true, &regs), [10, 11, 12, 13, 4, 5, 8, 9]);
        assert_eq!(prg_pages(false, 3, 5), [3, 5, -2, -1]);
        assert_eq!(prg_pages(true, 3, 5), [-2, 5, 3, -1]);
    }

    #[test]
    fn chr_registers_zero_and_one_ignore_low_bit() {
        let mut mapper = make_mmc3(8, 32);
        let mut irq = IrqSources::new();

        for value in [0x00, 0x01, 0x7F, 0xFF] {
            for index in 0..2 {
                mapper.cpu_write(0x8000, index, &mut irq);
                mapper.cpu_write(0x8001, value, &mut irq);
                assert_eq!(mapper.bank_register(index as usize) & 0x01, 0);
            }
        }

        mapper.cpu_write(0x8000, 2, &mut irq);
        mapper.cpu_write(0x8001, 0xFF, &mut irq);
        assert_eq!(mapper.bank_register(2), 0xFF);
    }

    #[test]
    fn selects_prg_banks_end_to_end() {
        let mut mapper = make_mmc3(8, 8);
        let mut irq = IrqSources::new();

        mapper.cpu_write(0x8000, 6, &mut irq);
        mapper.cpu_write(0x8001, 3, &mut irq);

        let windows = mapper.windows();
        assert_eq!(windows.page(Bus::Cpu, 0x8000), Some(3));
        assert_eq!(windows.page(Bus::Cpu, 0xC000), Some(6));
        assert_eq!(windows.page(Bus::Cpu, 0xE000), Some(7));
        assert_eq!(mapper.cpu_read(0x8000), Some(4));
        assert_eq!(mapper.cpu_read(0xDFFF), Some(7));
        assert_eq!(mapper.cpu_read(0xFFFC), Some(8));
    }

    #[test]
    fn mode_change_takes_effect_on_the_same_write() {
        let mut mapper = make_mmc3(8, 8);
        let mut irq = IrqSources::new();

        mapper.cpu_write(0x8000, 6, &mut irq);
        mapper.cpu_write(0x8001, 3, &mut irq);
        mapper.cpu_write(0x8000, 0x46, &mut irq);

        assert_eq!(mapper.cpu_read(0x8000), Some(7));
        assert_eq!(mapper.cpu_read(0xC000), Some(4));

        mapper.cpu_write(0x8000, 0x06, &mut irq);
        assert_eq!(mapper.cpu_read(0x8000), Some(4));
        assert_eq!(mapper.cpu_read(0xC000), Some(7));
    }

    #[test]
    fn chr_mode_swaps_pattern_halves() {
        let mut mapper = make_mmc3(8, 32);
        let mut irq = IrqSources::new();

        mapper.cpu_write(0x8000, 0, &mut irq);
        mapper.cpu_write(0x8001, 4, &mut irq);
        mapper.cpu_write(0x8000, 2, &mut irq);
        mapper.cpu_write(0x8001, 20, &mut irq);

        assert_eq!(mapper.ppu_read(0x0000), 5);
        assert_eq!(mapper.ppu_read(0x0400), 6);
        assert_eq!(mapper.ppu_read(0x1000), 21);

        mapper.cpu_write(0x8000, 0x80, &mut irq);
        assert_eq!(mapper.ppu_read(0x0000), 21);
        assert_eq!(mapper.ppu_read(0x1000), 5);
        assert_eq!(mapper.ppu_read(0x1400), 6);
    }

    #[test]
    fn bank_numbers_wrap_to_available_pages() {
        let mut mapper = make_mmc3(8, 8);
        let mut irq = IrqSources::new();

        mapper.cpu_write(0x8000, 6, &mut irq);
        mapper.cpu_write(0x8001, 42, &mut irq);
        assert_eq!(mapper.windows().page(Bus::Cpu, 0x8000), Some(2));
        assert_eq!(mapper.cpu_read(0x8000), Some(3));

        mapper.cpu_write(0x8000, 5, &mut irq);
        mapper.cpu_write(0x8001, 0xFF, &mut irq);
        assert_eq!(mapper.ppu_read(0x1C00), 8);
    }

    #[test]
    fn wram_enable_and_write_protect() {
        let mut mapper = make_mmc3(8, 8);
        let mut irq = IrqSources::new();

        assert_eq!(mapper.cpu_read(0x6000), None);

        mapper.cpu_write(0xA001, 0x80, &mut irq);
        mapper.cpu_write(0x6010, 0x42, &mut irq);
        assert_eq!(mapper.cpu_read(0x6010), Some(0x42));

        mapper.cpu_write(0xA001, 0xC0, &mut irq);
        mapper.cpu_write(0x6010, 0x99, &mut irq);
        assert_eq!(mapper.cpu_read(0x6010), Some(0x42));

        mapper.cpu_write(0xA001, 0x00, &mut irq);
        assert_eq!(mapper.cpu_read(0x6010), None);
    }

    #[test]
    fn missing_ram_leaves_low_window_unmapped() {
        let prg = patterned_banks(8 * PRG_PAGE_SIZE, PRG_PAGE_SIZE);
        let mut cart = make_cart(4, 0, prg, vec![0; 0x2000], true);
        cart.work_ram_size = 0;
        let info = RomInfo::from_cartridge(&cart);
        let mut mapper = Mmc3::new(cart, info, &mut PowerOnGenerator::deterministic());
        let mut irq = IrqSources::new();

        mapper.cpu_write(0xA001, 0x80, &mut irq);
        assert_eq!(mapper.windows().access(Bus::Cpu, 0x6000), MemoryAccess::NoAccess);
        assert_eq!(mapper.cpu_read(0x7FFF), None);
    }

    #[test]
    fn mmc6_halves_have_separate_permissions() {
        let prg = patterned_banks(8 * PRG_PAGE_SIZE, PRG_PAGE_SIZE);
        let cart = make_cart(4, 1, prg, vec![0; 0x2000], true);
        let info = RomInfo::from_cartridge(&cart);
        let mut mapper = Mmc3::new(cart, info, &mut PowerOnGenerator::deterministic());
        let mut irq = IrqSources::new();
        assert_eq!(mapper.variant(), Mmc3Variant::Mmc6);
        assert_eq!(mapper.name(), "MMC6");

        mapper.cpu_write(0x8000, 0x20, &mut irq);
        mapper.cpu_write(0xA001, 0x30, &mut irq);
        mapper.cpu_write(0x7000, 0x11, &mut irq);
        mapper.cpu_write(0x7200, 0x22, &mut irq);

        assert_eq!(mapper.cpu_read(0x7000), Some(0x11));
        assert_eq!(mapper.cpu_read(0x7C00), Some(0x11));
        assert_eq!(mapper.cpu_read(0x7200), None);
        assert_eq!(mapper.cpu_read(0x6000), None);

        mapper.cpu_write(0xA001, 0xA0, &mut irq);
        assert_eq!(mapper.cpu_read(0x7200), Some(0x00));
        mapper.cpu_write(0x7000, 0x33, &mut irq);
        assert_eq!(mapper.cpu_read(0x7000), Some(0x11));

        mapper.cpu_write(0x8000, 0x00, &mut irq);
        assert_eq!(mapper.cpu_read(0x7000), None);
        assert_eq!(mapper.windows().access(Bus::Cpu, 0x7200), MemoryAccess::NoAccess);
    }

    #[test]
    fn mirroring_follows_a000_unless_four_screen() {
        let mut mapper = make_mmc3(8, 8);
        let mut irq = IrqSources::new();

        assert_eq!(mapper.mirroring(), Mirroring::Vertical);
        mapper.cpu_write(0xA000, 0x01, &mut irq);
        assert_eq!(mapper.mirroring(), Mirroring::Horizontal);
        mapper.cpu_write(0xBFFE, 0x00, &mut irq);
        assert_eq!(mapper.mirroring(), Mirroring::Vertical);

        let mut cart = make_cart(4, 0, vec![0; 0x10000], vec![0; 0x2000], false);
        cart.four_screen = true;
        cart.mirroring = Mirroring::FourScreen;
        let info = RomInfo::from_cartridge(&cart);
        let mut mapper = Mmc3::new(cart, info, &mut PowerOnGenerator::deterministic());
        mapper.cpu_write(0xA000, 0x01, &mut irq);
        assert_eq!(mapper.mirroring(), Mirroring::FourScreen);
        mapper.cpu_write(0xA000, 0x00, &mut irq);
        assert_eq!(mapper.mirroring(), Mirroring::FourScreen);
    }

    #[test]
    fn reload_strobe_is_idempotent() {
        let mut mapper = make_mmc3(8, 8);
        let mut irq = IrqSources::new();
        mapper.regs.irq_counter = 9;

        mapper.cpu_write(0xC001, 0x00, &mut irq);
        assert_eq!(mapper.irq_counter(), 0);
        assert!(mapper.irq_reload_pending());

        mapper.cpu_write(0xC001, 0xFF, &mut irq);
        assert_eq!(mapper.irq_counter(), 0);
        assert!(mapper.irq_reload_pending());
    }

    #[test]
    fn rev_b_fires_when_count_reaches_zero() {
        let mut mapper = make_mmc3(8, 8);
        let mut irq = IrqSources::new();
        let mut cycle = 100;
        mapper.cpu_write(0xE001, 0, &mut irq);
        mapper.regs.irq_counter = 1;

        rise(&mut mapper, &mut irq, &mut cycle);
        assert_eq!(mapper.irq_counter(), 0);
        assert!(irq.has(IrqSource::External));
    }

    #[test]
    fn rev_b_reload_to_nonzero_does_not_fire() {
        let mut mapper = make_mmc3(8, 8);
        let mut irq = IrqSources::new();
        let mut cycle = 100;
        mapper.cpu_write(0xE001, 0, &mut irq);
        mapper.cpu_write(0xC000, 5, &mut irq);
        mapper.regs.irq_counter = 0;
        mapper.regs.irq_reload = false;

        rise(&mut mapper, &mut irq, &mut cycle);
        assert_eq!(mapper.irq_counter(), 5);
        assert!(!irq.any());
    }

    #[test]
    fn revision_matrix() {
        // (previous > 0, reload pending, rev A fires, rev B fires)
        let cases = [
            (false, false, false, true),
            (false, true, true, true),
            (true, false, true, true),
            (true, true, true, true),
        ];

        for (previous_nonzero, reload, rev_a, rev_b) in cases {
            for (revision, expected) in [(IrqRevision::RevA, rev_a), (IrqRevision::RevB, rev_b)] {
                let mut mapper = with_revision(make_mmc3(8, 8), revision);
                let mut irq = IrqSources::new();
                let mut cycle = 100;
                mapper.cpu_write(0xE001, 0, &mut irq);
                mapper.cpu_write(0xC000, 0, &mut irq);
                mapper.regs.irq_counter = previous_nonzero as u8;
                mapper.regs.irq_reload = reload;

                rise(&mut mapper, &mut irq, &mut cycle);
                assert_eq!(mapper.irq_counter(), 0);
                assert!(!mapper.irq_reload_pending());
                assert_eq!(
                    irq.has(IrqSource::External),
                    expected,
                    "{revision:?} previous_nonzero={previous_nonzero} reload={reload}"
                );
            }
        }
    }

    #[test]
    fn disabled_counter_still_counts() {
        let mut mapper = make_mmc3(8, 8);
        let mut irq = IrqSources::new();
        let mut cycle = 100;
        mapper.cpu_write(0xE000, 0, &mut irq);
        mapper.cpu_write(0xC000, 2, &mut irq);
        mapper.cpu_write(0xC001, 0, &mut irq);

        for expected in [2, 1, 0, 2] {
            rise(&mut mapper, &mut irq, &mut cycle);
            assert_eq!(mapper.irq_counter(), expected);
        }
        assert!(!irq.any());
    }

    #[test]
    fn irq_disable_acknowledges_pending_interrupt() {
        let mut mapper = make_mmc3(8, 8);
        let mut irq = IrqSources::new();
        irq.set(IrqSource::External);
        irq.set(IrqSource::Dmc);

        mapper.cpu_write(0xE000, 0, &mut irq);
        assert!(!irq.has(IrqSource::External));
        assert!(irq.has(IrqSource::Dmc));
        assert!(!mapper.regs.irq_enabled);
    }

    #[test]
    fn fast_a12_toggles_do_not_clock() {
        let mut mapper = make_mmc3(8, 8);
        let mut irq = IrqSources::new();
        mapper.cpu_write(0xC000, 7, &mut irq);
        mapper.cpu_write(0xC001, 0, &mut irq);

        let mut cycle = 100;
        rise(&mut mapper, &mut irq, &mut cycle);
        assert_eq!(mapper.irq_counter(), 7);

        for _ in 0..8 {
            mapper.notify_vram_address(0x0FF0, cycle, &mut irq);
            cycle += 2;
            mapper.notify_vram_address(0x1FF0, cycle, &mut irq);
            cycle += 2;
        }
        assert_eq!(mapper.irq_counter(), 7);
    }

    #[test]
    fn state_entries_describe_registers() {
        let mut mapper = make_mmc3(8, 8);
        let mut irq = IrqSources::new();
        mapper.cpu_write(0x8000, 0x46, &mut irq);
        mapper.cpu_write(0xA000, 0x01, &mut irq);
        mapper.cpu_write(0xC000, 0x30, &mut irq);

        let entries = mapper.state_entries();
        assert_eq!(entries.len(), 18);
        assert_eq!(entries[0], MapperStateEntry::number("$8000.0-2", "Current Register", 6));
        assert_eq!(entries[1].value, StateValue::Bool(true));
        assert_eq!(entries[2].value, StateValue::Bool(false));
        assert_eq!(entries[3].value, StateValue::Text("Horizontal"));
        assert_eq!(entries[6], MapperStateEntry::number("$C000", "IRQ Reload Value", 0x30));
        assert_eq!(entries[17].name, "Register 7 (PRG)");
        assert_eq!(entries[17].value, StateValue::Number8(1));

        let prg = patterned_banks(8 * PRG_PAGE_SIZE, PRG_PAGE_SIZE);
        let cart = make_cart(4, 1, prg, vec![0; 0x2000], true);
        let info = RomInfo::from_cartridge(&cart);
        let mmc6 = Mmc3::new(cart, info, &mut PowerOnGenerator::deterministic());
        let entries = mmc6.state_entries();
        assert_eq!(entries.len(), 21);
        assert_eq!(entries[1].address, "$8000.5");
        assert_eq!(entries[5].name, "Work RAM Bank 0 Write Enabled");
    }

    #[test]
    fn randomized_power_on_is_reproducible_per_seed() {
        let prg = patterned_banks(8 * PRG_PAGE_SIZE, PRG_PAGE_SIZE);
        let cart = make_cart(4, 0, prg, vec![0; 0x2000], true);
        let info = RomInfo::from_cartridge(&cart);

        let a = Mmc3::new(cart.clone(), info.clone(), &mut PowerOnGenerator::randomized(Some(11)));
        let b = Mmc3::new(cart, info, &mut PowerOnGenerator::randomized(Some(11)));
        assert_eq!(a.regs, b.regs);
        assert_eq!(a.windows(), b.windows());
        assert_eq!(a.regs.current_register, a.regs.reg_8000 & 0x07);
    }

    fn drive(mapper: &mut Mmc3, irq: &mut IrqSources, cycle: &mut u32) {
        mapper.cpu_write(0x8000, 0xC7, irq);
        mapper.cpu_write(0x8001, 2, irq);
        mapper.cpu_write(0xE001, 0, irq);
        for _ in 0..3 {
            rise(mapper, irq, cycle);
        }
        mapper.cpu_write(0xA000, 0x01, irq);
    }

    #[test]
    fn snapshot_round_trip_replays_identically() {
        let mut irq = IrqSources::new();
        let mut cycle = 50;
        let mut original = make_mmc3(16, 64);
        original.cpu_write(0xA001, 0x80, &mut irq);
        original.cpu_write(0x6001, 0xAB, &mut irq);
        original.cpu_write(0x8000, 0x06, &mut irq);
        original.cpu_write(0x8001, 9, &mut irq);
        original.cpu_write(0xC000, 2, &mut irq);
        original.cpu_write(0xC001, 0, &mut irq);
        rise(&mut original, &mut irq, &mut cycle);
        original.notify_vram_address(0x0000, cycle, &mut irq);

        let snapshot = original.save_state();
        let mut restored = make_mmc3(16, 64);
        restored.load_state(&snapshot).unwrap();
        assert_eq!(restored.regs, original.regs);
        assert_eq!(restored.windows(), original.windows());
        assert_eq!(restored.cpu_read(0x6001), Some(0xAB));

        let mut irq_a = IrqSources::new();
        let mut irq_b = IrqSources::new();
        let (mut cycle_a, mut cycle_b) = (cycle + 30, cycle + 30);
        drive(&mut original, &mut irq_a, &mut cycle_a);
        drive(&mut restored, &mut irq_b, &mut cycle_b);

        assert_eq!(irq_a, irq_b);
        assert!(irq_a.has(IrqSource::External));
        assert_eq!(restored.regs, original.regs);
        assert_eq!(restored.windows(), original.windows());
        assert_eq!(restored.mirroring(), original.mirroring());
    }

    #[test]
    fn failed_restore_keeps_current_state() {
        let mut irq = IrqSources::new();
        let mut mapper = make_mmc3(8, 8);
        let snapshot = mapper.save_state();

        mapper.cpu_write(0x8000, 0x46, &mut irq);
        mapper.cpu_write(0x8001, 5, &mut irq);
        let regs = mapper.regs.clone();
        let windows = mapper.windows().clone();

        let mut bad_magic = snapshot.clone();
        bad_magic[0] = b'X';
        let mut trailing = snapshot.clone();
        trailing.push(0);
        let truncated = &snapshot[..snapshot.len() - 3];

        assert_eq!(mapper.load_state(&bad_magic), Err(SnapshotError::BadMagic));
        assert_eq!(mapper.load_state(&trailing), Err(SnapshotError::TrailingBytes(1)));
        assert!(matches!(
            mapper.load_state(truncated),
            Err(SnapshotError::Truncated { .. })
        ));
        assert_eq!(mapper.regs, regs);
        assert_eq!(mapper.windows(), &windows);
    }

    #[test]
    fn restore_rejects_other_boards() {
        let prg = patterned_banks(8 * PRG_PAGE_SIZE, PRG_PAGE_SIZE);
        let cart = make_cart(4, 1, prg.clone(), vec![0; 0x2000], true);
        let info = RomInfo::from_cartridge(&cart);
        let mmc6 = Mmc3::new(cart, info, &mut PowerOnGenerator::deterministic());

        let mut mapper = make_mmc3(8, 8);
        assert_eq!(
            mapper.load_state(&mmc6.save_state()),
            Err(SnapshotError::MapperMismatch {
                expected: (4, 0),
                found: (4, 1)
            })
        );

        let mut cart = make_cart(4, 0, prg, vec![0; 0x2000], true);
        cart.work_ram_size = 0x1000;
        let info = RomInfo::from_cartridge(&cart);
        let mut small_ram = Mmc3::new(cart, info, &mut PowerOnGenerator::deterministic());
        assert_eq!(
            small_ram.load_state(&mapper.save_state()),
            Err(SnapshotError::SizeMismatch {
                what: "work RAM",
                expected: 0x1000,
                found: 0x2000
            })
        );
    }

    #[test]
    fn battery_ram_is_exported() {
        let prg = patterned_banks(8 * PRG_PAGE_SIZE, PRG_PAGE_SIZE);
        let mut cart = make_cart(4, 0, prg, vec![0; 0x2000], true);
        cart.has_battery_backed_ram = true;
        cart.work_ram_size = 0;
        cart.save_ram_size = 0x2000;
        let info = RomInfo::from_cartridge(&cart);
        let mut mapper = Mmc3::new(cart, info, &mut PowerOnGenerator::deterministic());
        let mut irq = IrqSources::new();

        mapper.cpu_write(0xA001, 0x80, &mut irq);
        mapper.cpu_write(0x7FFF, 0x5C, &mut irq);
        let save = mapper.save_ram().unwrap();
        assert_eq!(save.len(), 0x2000);
        assert_eq!(save[0x1FFF], 0x5C);
    }
}
