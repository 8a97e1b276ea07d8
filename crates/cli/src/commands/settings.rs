use std::path::Path;

use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use photomap_core::settings::{Settings, KEYS};

pub fn show(settings: &Settings, path: &Path) -> Result<()> {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![Cell::new("Setting"), Cell::new("Value")]);
    for key in KEYS {
        table.add_row(vec![Cell::new(key), Cell::new(settings.get(key)?)]);
    }
    println!("{table}");
    let note = if path.exists() { "" } else { " (not saved yet, using defaults)" };
    println!("  {}{note}", path.display());
    Ok(())
}

pub fn set(mut settings: Settings, path: &Path, key: &str, value: &str) -> Result<()> {
    settings.set(key, value)?;
    settings.save(path)?;
    println!("{key} = {}", settings.get(key)?);
    Ok(())
}
