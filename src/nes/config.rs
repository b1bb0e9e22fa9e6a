use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

/// When the MMC3 scanline counter raises its interrupt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IrqRevision {
    /// Older chips: a reload that lands on zero only fires if the counter was
    /// nonzero before or the reload was requested explicitly.
    RevA,
    /// Later chips: fires whenever the counter is zero after a clock.
    #[default]
    RevB,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NesConfig {
    pub randomize_power_on_state: bool,
    /// Seed used when `randomize_power_on_state` is set. Drawn from entropy
    /// once per session when absent.
    pub power_on_seed: Option<u64>,
    /// NesCartDB-style XML used to identify chip revisions.
    pub game_database: Option<PathBuf>,
    /// Overrides the revision derived from the database.
    pub irq_revision: Option<IrqRevision>,
}

impl NesConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        Self::from_json_str(&text)
            .with_context(|| format!("failed to parse config: {}", path.display()))
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
