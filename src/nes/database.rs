use anyhow::{Context, Result};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::{collections::HashMap, fs, path::Path};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseEntry {
    pub board: String,
    pub mapper: Option<u16>,
    /// Chip markings on the board, e.g. `MMC3B` or `MMC6B`.
    pub chips: Vec<String>,
}

impl DatabaseEntry {
    /// The first chip that looks like a mapper ASIC rather than a ROM/RAM/CIC.
    pub fn mapper_chip(&self) -> Option<&str> {
        self.chips
            .iter()
            .map(String::as_str)
            .find(|chip| chip.starts_with("MMC"))
            .or_else(|| self.chips.first().map(String::as_str))
    }
}

/// Cartridge metadata keyed by the SHA-1 of PRG+CHR, in the NesCartDB layout:
///
/// ```xml
/// <game>
///   <cartridge sha1="...">
///     <board type="NES-TLROM" mapper="4">
///       <chip type="MMC3B"/>
///     </board>
///   </cartridge>
/// </game>
/// ```
#[derive(Debug, Clone, Default)]
pub struct GameDatabase {
    entries: HashMap<String, DatabaseEntry>,
}

impl GameDatabase {
    pub fn from_file(path: &Path) -> Result<Self> {
        let xml = fs::read_to_string(path)
            .with_context(|| format!("failed to read game database: {}", path.display()))?;
        let db = Self::from_xml_str(&xml)
            .with_context(|| format!("failed to parse game database: {}", path.display()))?;
        log::info!("loaded {} game database entries from {}", db.len(), path.display());
        Ok(db)
    }

    pub fn from_xml_str(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut entries = HashMap::new();
        let mut current: Option<(String, DatabaseEntry)> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    Self::open_element(&reader, &e, &mut current);
                }
                Ok(Event::Empty(e)) => {
                    Self::open_element(&reader, &e, &mut current);
                    if e.name().as_ref() == b"cartridge" {
                        if let Some((sha1, entry)) = current.take() {
                            entries.insert(sha1, entry);
                        }
                    }
                }
                Ok(Event::End(e)) => {
                    if e.name().as_ref() == b"cartridge" {
                        if let Some((sha1, entry)) = current.take() {
                            entries.insert(sha1, entry);
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Err(err) => {
                    anyhow::bail!(
                        "malformed game database XML at byte {}: {err}",
                        reader.buffer_position()
                    );
                }
                _ => {}
            }
        }

        Ok(Self { entries })
    }

    fn open_element(
        reader: &Reader<&[u8]>,
        e: &BytesStart<'_>,
        current: &mut Option<(String, DatabaseEntry)>,
    ) {
        let attr = |name: &[u8]| -> Option<String> {
            e.attributes().flatten().find_map(|attr| {
                (attr.key.as_ref() == name).then(|| {
                    attr.decode_and_unescape_value(reader.decoder())
                        .map(|v| v.trim().to_string())
                        .unwrap_or_default()
                })
            })
        };

        match e.name().as_ref() {
            b"cartridge" => {
                let sha1 = attr(b"sha1").unwrap_or_default().to_ascii_uppercase();
                *current = Some((sha1, DatabaseEntry::default()));
            }
            b"board" => {
                if let Some((_, entry)) = current.as_mut() {
                    entry.board = attr(b"type").unwrap_or_default();
                    entry.mapper = attr(b"mapper").and_then(|v| v.parse::<u16>().ok());
                }
            }
            b"chip" => {
                if let Some((_, entry)) = current.as_mut() {
                    if let Some(chip) = attr(b"type") {
                        entry.chips.push(chip);
                    }
                }
            }
            _ => {}
        }
    }

    pub fn lookup(&self, sha1: &str) -> Option<&DatabaseEntry> {
        self.entries.get(&sha1.to_ascii_uppercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
