/// PPU dots in one NTSC frame (341 x 262).
pub const NTSC_FRAME_CYCLES: u32 = 89_342;

/// Minimum time A12 has to sit low, in PPU dots, before a rise clocks the counter.
pub const DEFAULT_MIN_LOW_CYCLES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum A12Edge {
    None,
    Rise,
    Fall,
}

/// Filtered edge detector for PPU address line A12.
///
/// `cycles_down == 0` means the line is considered high. While it is low the
/// watcher accumulates elapsed dots from the frame-cycle deltas it is fed,
/// so a rise is only reported after the line has been low long enough. This
/// rejects the rapid A12 toggling of the 8x16 sprite and garbage fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct A12Watcher {
    last_cycle: u32,
    cycles_down: u32,
    frame_cycles: u32,
    min_low_cycles: u32,
}

impl Default for A12Watcher {
    fn default() -> Self {
        Self::new(NTSC_FRAME_CYCLES, DEFAULT_MIN_LOW_CYCLES)
    }
}

impl A12Watcher {
    pub const fn new(frame_cycles: u32, min_low_cycles: u32) -> Self {
        Self {
            last_cycle: 0,
            cycles_down: 0,
            frame_cycles,
            min_low_cycles,
        }
    }

    pub fn reset(&mut self) {
        self.last_cycle = 0;
        self.cycles_down = 0;
    }

    pub fn observe(&mut self, addr: u16, frame_cycle: u32) -> A12Edge {
        if self.cycles_down > 0 {
            let elapsed = if self.last_cycle > frame_cycle {
                // New frame since the last sample.
                self.frame_cycles.saturating_sub(self.last_cycle) + frame_cycle
            } else {
                frame_cycle - self.last_cycle
            };
            self.cycles_down = self.cycles_down.saturating_add(elapsed);
        }
        self.last_cycle = frame_cycle;

        if (addr & 0x1000) == 0 {
            if self.cycles_down == 0 {
                self.cycles_down = 1;
                return A12Edge::Fall;
            }
            A12Edge::None
        } else {
            let edge = if self.cycles_down > self.min_low_cycles {
                A12Edge::Rise
            } else {
                A12Edge::None
            };
            self.cycles_down = 0;
            edge
        }
    }

    pub fn is_low(&self) -> bool {
        self.cycles_down > 0
    }

    pub(crate) fn raw(&self) -> (u32, u32) {
        (self.last_cycle, self.cycles_down)
    }

    pub(crate) fn set_raw(&mut self, last_cycle: u32, cycles_down: u32) {
        self.last_cycle = last_cycle;
        self.cycles_down = cycles_down;
    }
}
