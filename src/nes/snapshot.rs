use std::fmt;

pub const SNAPSHOT_MAGIC: [u8; 4] = *b"CBST";
pub const SNAPSHOT_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    Truncated { needed: usize, remaining: usize },
    BadMagic,
    UnsupportedVersion(u8),
    MapperMismatch { expected: (u16, u8), found: (u16, u8) },
    SizeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    TrailingBytes(usize),
    NoCartridge,
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Truncated { needed, remaining } => write!(
                f,
                "snapshot truncated: needed {needed} more byte(s), {remaining} left"
            ),
            SnapshotError::BadMagic => write!(f, "not a cartbank snapshot"),
            SnapshotError::UnsupportedVersion(version) => {
                write!(f, "unsupported snapshot version {version}")
            }
            SnapshotError::MapperMismatch { expected, found } => write!(
                f,
                "snapshot is for mapper {}.{}, loaded cartridge is {}.{}",
                found.0, found.1, expected.0, expected.1
            ),
            SnapshotError::SizeMismatch {
                what,
                expected,
                found,
            } => write!(
                f,
                "snapshot {what} is {found} byte(s), cartridge has {expected}"
            ),
            SnapshotError::TrailingBytes(count) => {
                write!(f, "snapshot has {count} unexpected trailing byte(s)")
            }
            SnapshotError::NoCartridge => write!(f, "no cartridge loaded"),
        }
    }
}

impl std::error::Error for SnapshotError {}

/// Appends state fields to an ordered little-endian byte stream.
#[derive(Debug, Default)]
pub struct StateWriter {
    data: Vec<u8>,
}

impl StateWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn bool(&mut self, value: bool) {
        self.data.push(value as u8);
    }

    pub fn u16(&mut self, value: u16) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn bytes(&mut self, value: &[u8]) {
        self.data.extend_from_slice(value);
    }

    /// Length-prefixed block.
    pub fn block(&mut self, value: &[u8]) {
        self.u32(value.len() as u32);
        self.bytes(value);
    }

    pub fn header(&mut self, mapper_id: u16, submapper_id: u8) {
        self.bytes(&SNAPSHOT_MAGIC);
        self.u8(SNAPSHOT_VERSION);
        self.u16(mapper_id);
        self.u8(submapper_id);
    }

    pub fn finish(self) -> Vec<u8> {
        self.data
    }
}

/// Reads fields back in the order [`StateWriter`] produced them.
#[derive(Debug)]
pub struct StateReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> StateReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], SnapshotError> {
        if self.remaining() < len {
            return Err(SnapshotError::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, SnapshotError> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool, SnapshotError> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> Result<u16, SnapshotError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, SnapshotError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], SnapshotError> {
        self.take(len)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], SnapshotError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Length-prefixed block that must match the size of the live buffer.
    pub fn block(&mut self, what: &'static str, expected: usize) -> Result<Vec<u8>, SnapshotError> {
        let found = self.u32()? as usize;
        if found != expected {
            return Err(SnapshotError::SizeMismatch {
                what,
                expected,
                found,
            });
        }
        Ok(self.take(found)?.to_vec())
    }

    pub fn header(&mut self, mapper_id: u16, submapper_id: u8) -> Result<(), SnapshotError> {
        if self.array::<4>()? != SNAPSHOT_MAGIC {
            return Err(SnapshotError::BadMagic);
        }
        let version = self.u8()?;
        if version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }
        let found = (self.u16()?, self.u8()?);
        if found != (mapper_id, submapper_id) {
            return Err(SnapshotError::MapperMismatch {
                expected: (mapper_id, submapper_id),
                found,
            });
        }
        Ok(())
    }

    pub fn finish(self) -> Result<(), SnapshotError> {
        match self.remaining() {
            0 => Ok(()),
            extra => Err(SnapshotError::TrailingBytes(extra)),
        }
    }
}
