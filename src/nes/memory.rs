/// Windows are resolved at 256-byte granularity on both buses.
const SLOT_SHIFT: u32 = 8;
const SLOT_SIZE: usize = 1 << SLOT_SHIFT;
const CPU_SLOTS: usize = 0x10000 >> SLOT_SHIFT;
const PPU_SLOTS: usize = 0x2000 >> SLOT_SHIFT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAccess {
    NoAccess,
    Read,
    Write,
    ReadWrite,
}

impl MemoryAccess {
    pub fn from_flags(read: bool, write: bool) -> Self {
        match (read, write) {
            (true, true) => MemoryAccess::ReadWrite,
            (true, false) => MemoryAccess::Read,
            (false, true) => MemoryAccess::Write,
            (false, false) => MemoryAccess::NoAccess,
        }
    }

    pub fn can_read(self) -> bool {
        matches!(self, MemoryAccess::Read | MemoryAccess::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, MemoryAccess::Write | MemoryAccess::ReadWrite)
    }
}

/// Backing store a window resolves into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    PrgRom,
    WorkRam,
    SaveRam,
    ChrRom,
    ChrRam,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bus {
    Cpu,
    Ppu,
}

/// One resolved 256-byte slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub kind: MemoryKind,
    /// Physical page number, in units of the page size it was mapped with.
    pub page: usize,
    /// Byte offset into the backing store for the first byte of the slot.
    pub offset: usize,
    pub access: MemoryAccess,
}

/// Describes a backing store for [`BankWindowTable::map`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSource {
    pub kind: MemoryKind,
    pub page_size: usize,
    pub page_count: usize,
}

impl PageSource {
    pub fn new(kind: MemoryKind, page_size: usize, storage_len: usize) -> Self {
        Self {
            kind,
            page_size,
            page_count: storage_len / page_size,
        }
    }

    /// Resolves a signed page number. Negative values count back from the
    /// last page; everything wraps modulo the pages actually present.
    pub fn resolve_page(&self, page: i32) -> Option<usize> {
        if self.page_count == 0 {
            return None;
        }
        let count = self.page_count as i64;
        let page = if page < 0 {
            count + page as i64
        } else {
            page as i64
        };
        Some(page.rem_euclid(count) as usize)
    }
}

/// Address-to-storage resolution for the CPU and PPU buses.
///
/// The table is always rebuilt from mapper registers rather than patched; it
/// only ever holds what the last full recompute produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankWindowTable {
    cpu: [Option<Window>; CPU_SLOTS],
    ppu: [Option<Window>; PPU_SLOTS],
}

impl Default for BankWindowTable {
    fn default() -> Self {
        Self::new()
    }
}

impl BankWindowTable {
    pub fn new() -> Self {
        Self {
            cpu: [None; CPU_SLOTS],
            ppu: [None; PPU_SLOTS],
        }
    }

    fn slots_mut(&mut self, bus: Bus) -> &mut [Option<Window>] {
        match bus {
            Bus::Cpu => &mut self.cpu,
            Bus::Ppu => &mut self.ppu,
        }
    }

    fn slots(&self, bus: Bus) -> &[Option<Window>] {
        match bus {
            Bus::Cpu => &self.cpu,
            Bus::Ppu => &self.ppu,
        }
    }

    /// Maps `start..=end` starting at `page`. A window larger than the page
    /// size is filled with consecutive pages. When the source has no pages
    /// the range is left unmapped.
    pub fn map(
        &mut self,
        bus: Bus,
        start: u16,
        end: u16,
        source: PageSource,
        page: i32,
        access: MemoryAccess,
    ) {
        let Some(first_page) = source.resolve_page(page) else {
            self.unmap(bus, start, end);
            return;
        };

        let start = start as usize;
        let end = end as usize;
        let slots = self.slots_mut(bus);
        let mut addr = start;
        while addr <= end {
            let index = addr >> SLOT_SHIFT;
            if index >= slots.len() {
                break;
            }
            let distance = addr - start;
            let page = (first_page + distance / source.page_size) % source.page_count;
            slots[index] = Some(Window {
                kind: source.kind,
                page,
                offset: page * source.page_size + distance % source.page_size,
                access,
            });
            addr += SLOT_SIZE;
        }
    }

    pub fn unmap(&mut self, bus: Bus, start: u16, end: u16) {
        let first = start as usize >> SLOT_SHIFT;
        let slots = self.slots_mut(bus);
        let last = (end as usize >> SLOT_SHIFT).min(slots.len() - 1);
        for slot in &mut slots[first..=last] {
            *slot = None;
        }
    }

    pub fn clear(&mut self) {
        self.cpu = [None; CPU_SLOTS];
        self.ppu = [None; PPU_SLOTS];
    }

    pub fn window(&self, bus: Bus, addr: u16) -> Option<&Window> {
        self.slots(bus)
            .get(addr as usize >> SLOT_SHIFT)
            .and_then(Option::as_ref)
    }

    /// Storage kind and byte offset an address resolves to, if mapped.
    pub fn resolve(&self, bus: Bus, addr: u16) -> Option<(MemoryKind, usize, MemoryAccess)> {
        self.window(bus, addr).map(|window| {
            (
                window.kind,
                window.offset + (addr as usize & (SLOT_SIZE - 1)),
                window.access,
            )
        })
    }

    pub fn access(&self, bus: Bus, addr: u16) -> MemoryAccess {
        self.window(bus, addr)
            .map_or(MemoryAccess::NoAccess, |window| window.access)
    }

    pub fn page(&self, bus: Bus, addr: u16) -> Option<usize> {
        self.window(bus, addr).map(|window| window.page)
    }
}
