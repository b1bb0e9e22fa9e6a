/// Devices that can hold the CPU's /IRQ line low.
///
/// The line is level-triggered: it stays asserted while any source is set,
/// and only the device that set a source clears it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqSource {
    /// Cartridge hardware (mapper scanline counters).
    External,
    FrameCounter,
    Dmc,
}

impl IrqSource {
    const fn mask(self) -> u8 {
        match self {
            IrqSource::External => 0x01,
            IrqSource::FrameCounter => 0x02,
            IrqSource::Dmc => 0x04,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IrqSources {
    bits: u8,
}

impl IrqSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, source: IrqSource) {
        self.bits |= source.mask();
    }

    pub fn clear(&mut self, source: IrqSource) {
        self.bits &= !source.mask();
    }

    pub fn has(&self, source: IrqSource) -> bool {
        (self.bits & source.mask()) != 0
    }

    /// Level of the /IRQ line as seen by the CPU's next poll.
    pub fn any(&self) -> bool {
        self.bits != 0
    }

    pub fn reset(&mut self) {
        self.bits = 0;
    }

    pub(crate) fn bits(&self) -> u8 {
        self.bits
    }

    pub(crate) fn from_bits(bits: u8) -> Self {
        Self { bits: bits & 0x07 }
    }
}
