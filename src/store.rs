//! Persistence: dirty-tracking save and restore of flagged entries.
//!
//! The save file is a stream of `<full-name>=<stringified value>;` records
//! with no escaping; names and values must not contain `=` or `;`. Saves
//! append, so repeated runs accumulate records and restore applies them in
//! order: the last record for a name wins.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::error::Result;
use crate::registry::{Flags, Registry};

/// Append every dirty entry carrying the SAVE flag to the save file and
/// clear its dirty bit. Returns the number of records written.
pub fn save(registry: &mut Registry, path: &Path) -> Result<usize> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);

    let mut written = 0;
    for entry in registry.iter_mut() {
        if !entry.dirty || !entry.flags.contains(Flags::SAVE) {
            continue;
        }
        write!(writer, "{}={};", entry.name, entry.value)?;
        entry.dirty = false;
        written += 1;
    }
    writer.flush()?;
    debug!(records = written, path = %path.display(), "save complete");
    Ok(written)
}

/// Re-apply every record in the save file to the registry. Entries must
/// already exist (create happens before restore); records naming unknown
/// entries are skipped. Applying a record does not mark the entry dirty,
/// so restore is idempotent.
pub fn restore(registry: &mut Registry, path: &Path) -> Result<usize> {
    let mut content = String::new();
    File::open(path)?.read_to_string(&mut content)?;

    let mut applied = 0;
    for (name, value) in parse_records(&content) {
        match registry.apply_string(name, value) {
            Ok(()) => applied += 1,
            Err(err) if err.is_not_found() => {
                debug!(name, "skipping record for unknown entry");
            }
            Err(err) => {
                warn!(name, error = %err, "failed to apply record");
            }
        }
    }
    debug!(records = applied, path = %path.display(), "restore complete");
    Ok(applied)
}

/// Split the save-file stream into `(name, value)` pairs by locating the
/// next `=` and then the next `;`. Trailing bytes after the last `;` are
/// ignored.
fn parse_records(content: &str) -> impl Iterator<Item = (&str, &str)> {
    let mut rest = content;
    std::iter::from_fn(move || {
        let eq = rest.find('=')?;
        let semi = rest[eq + 1..].find(';')?;
        let name = &rest[..eq];
        let value = &rest[eq + 1..eq + 1 + semi];
        rest = &rest[eq + 1 + semi + 1..];
        Some((name, value))
    })
}
