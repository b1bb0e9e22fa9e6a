use anyhow::{Context, Result, anyhow, bail};
use sha1::{Digest, Sha1};
use std::{fmt::Write as _, fs, path::Path};

use super::mapper::Mirroring;

#[derive(Debug, Clone)]
pub struct Cartridge {
    pub mapper_id: u16,
    pub submapper_id: u8,
    pub mirroring: Mirroring,
    pub four_screen: bool,
    pub has_battery_backed_ram: bool,
    pub prg_rom: Vec<u8>,
    pub chr_data: Vec<u8>,
    pub chr_is_ram: bool,
    /// Volatile PRG RAM.
    pub work_ram_size: usize,
    /// Battery-backed PRG RAM.
    pub save_ram_size: usize,
}

impl Cartridge {
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read ROM: {}", path.display()))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 16 {
            bail!("ROM is too small to contain an iNES header");
        }
        if &bytes[0..4] != b"NES\x1A" {
            bail!("invalid iNES header magic, expected NES<EOF>");
        }

        let flags6 = bytes[6];
        let flags7 = bytes[7];
        let is_nes2 = (flags7 & 0x0C) == 0x08;

        let mapper_id_low = ((flags6 as u16) >> 4) | ((flags7 as u16) & 0xF0);
        let mapper_id = if is_nes2 {
            mapper_id_low | (((bytes[8] as u16) & 0x0F) << 8)
        } else {
            mapper_id_low
        };
        let submapper_id = if is_nes2 { bytes[8] >> 4 } else { 0 };
        let four_screen = (flags6 & 0x08) != 0;
        let mirroring = if four_screen {
            Mirroring::FourScreen
        } else if (flags6 & 0x01) != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };

        let trainer_present = (flags6 & 0x04) != 0;
        let has_battery_backed_ram = (flags6 & 0x02) != 0;

        let (prg_rom_size, chr_rom_size, work_ram_size, save_ram_size) = if is_nes2 {
            let prg_msb = (bytes[9] & 0x0F) as usize;
            let chr_msb = (bytes[9] >> 4) as usize;
            if prg_msb == 0x0F || chr_msb == 0x0F {
                bail!("NES 2.0 exponent/multiplier ROM size encoding is not supported");
            }

            let prg_units = ((prg_msb << 8) | bytes[4] as usize).max(1);
            let chr_units = (chr_msb << 8) | bytes[5] as usize;

            let shift_size = |shift: u8| if shift == 0 { 0 } else { 64usize << shift };
            let work_ram = shift_size(bytes[10] & 0x0F);
            let save_ram = shift_size(bytes[10] >> 4);

            (prg_units * 16 * 1024, chr_units * 8 * 1024, work_ram, save_ram)
        } else {
            let prg_units = (bytes[4] as usize).max(1);
            let chr_units = bytes[5] as usize;
            let prg_ram_units = if bytes[8] == 0 { 1 } else { bytes[8] as usize };
            let prg_ram = prg_ram_units * 8 * 1024;
            let (work_ram, save_ram) = if has_battery_backed_ram {
                (0, prg_ram)
            } else {
                (prg_ram, 0)
            };
            (prg_units * 16 * 1024, chr_units * 8 * 1024, work_ram, save_ram)
        };

        if has_battery_backed_ram && save_ram_size == 0 {
            log::warn!("battery flag set but the header declares no battery-backed RAM");
        }

        let mut cursor = 16usize;
        if trainer_present {
            cursor += 512;
        }

        if bytes.len() < cursor + prg_rom_size {
            bail!(
                "ROM truncated: expected {} PRG bytes but file ended early",
                prg_rom_size
            );
        }

        let prg_rom_end = cursor + prg_rom_size;
        let prg_rom = bytes[cursor..prg_rom_end].to_vec();
        cursor = prg_rom_end;

        let (chr_data, chr_is_ram) = if chr_rom_size == 0 {
            (vec![0; 8 * 1024], true)
        } else {
            if bytes.len() < cursor + chr_rom_size {
                bail!(
                    "ROM truncated: expected {} CHR bytes but file ended early",
                    chr_rom_size
                );
            }
            (bytes[cursor..cursor + chr_rom_size].to_vec(), false)
        };

        if prg_rom.is_empty() {
            return Err(anyhow!("invalid PRG ROM: empty payload"));
        }

        Ok(Self {
            mapper_id,
            submapper_id,
            mirroring,
            four_screen,
            has_battery_backed_ram,
            prg_rom,
            chr_data,
            chr_is_ram,
            work_ram_size,
            save_ram_size,
        })
    }

    /// Uppercase hex SHA-1 of PRG followed by CHR ROM, the key game
    /// databases index cartridges by.
    pub fn sha1(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(&self.prg_rom);
        if !self.chr_is_ram {
            hasher.update(&self.chr_data);
        }
        let mut out = String::with_capacity(40);
        for byte in hasher.finalize() {
            let _ = write!(out, "{byte:02X}");
        }
        out
    }
}
