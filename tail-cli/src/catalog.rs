//! Catalog files
//!
//! A catalog file is a JSON array of command records:
//!
//! ```json
//! [{ "name": "Slow wag", "command": "TAILS1", "category": "tail",
//!    "group": "tail", "duration": 4000, "minimumCooldown": 500 }]
//! ```

use std::path::Path;

use anyhow::Context;
use tail_protocol::{CommandRecord, HOME_COMMAND};
use tracing::info;

/// Parse catalog records from JSON text
pub fn parse_catalog(text: &str) -> anyhow::Result<Vec<CommandRecord>> {
    serde_json::from_str(text).context("Catalog is not a list of command records")
}

/// Read one catalog file
pub fn load_catalog_file(path: &Path) -> anyhow::Result<Vec<CommandRecord>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog {}", path.display()))?;
    let records =
        parse_catalog(&text).with_context(|| format!("In catalog {}", path.display()))?;
    info!("Read {} command(s) from {}", records.len(), path.display());
    Ok(records)
}

/// Read every catalog file in order and concatenate the records
///
/// With no files configured the built-in set is used.
pub fn load_catalogs<P: AsRef<Path>>(paths: &[P]) -> anyhow::Result<Vec<CommandRecord>> {
    if paths.is_empty() {
        return Ok(builtin_catalog());
    }

    let mut records = Vec::new();
    for path in paths {
        records.extend(load_catalog_file(path.as_ref())?);
    }
    Ok(records)
}

fn record(name: &str, command: &str, group: &str, duration: u64, cooldown: u64) -> CommandRecord {
    CommandRecord {
        name: name.to_string(),
        command: command.to_string(),
        category: group.to_string(),
        group: group.to_string(),
        duration,
        minimum_cooldown: cooldown,
    }
}

/// Commands every tail and ear set understands
pub fn builtin_catalog() -> Vec<CommandRecord> {
    vec![
        record("Slow wag 1", "TAILS1", "tail", 4000, 500),
        record("Slow wag 2", "TAILS2", "tail", 4000, 500),
        record("Fast wag", "TAILFA", "tail", 3000, 500),
        record("Tremble", "TAILT1", "tail", 2500, 500),
        record("Home position", HOME_COMMAND, "tail", 1000, 0),
        record("Left ear", "EARL", "ears", 500, 200),
        record("Right ear", "EARR", "ears", 500, 200),
        record("Ears home", "EARHOME", "ears", 500, 200),
    ]
}
