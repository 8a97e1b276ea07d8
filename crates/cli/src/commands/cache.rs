use std::path::Path;

use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use photomap_core::combiner;
use photomap_core::Atlas;

use super::format_size;

pub fn status(atlas: &Atlas) -> Result<()> {
    let root = atlas.root();
    let caches = atlas.folder_caches()?;

    println!("Root: {}", root.display());
    if caches.is_empty() {
        println!("  No analyzed folders yet.");
    } else {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![Cell::new("Folder"), Cell::new("Cache size")]);

        let mut total = 0u64;
        for cache in &caches {
            let size = std::fs::metadata(cache).map(|m| m.len()).unwrap_or(0);
            total += size;
            table.add_row(vec![
                Cell::new(folder_label(root, cache)),
                Cell::new(format_size(size)),
            ]);
        }
        println!("{table}");
        println!("  {} folder caches, {}", caches.len(), format_size(total));
    }

    let combined = combiner::combined_path(root);
    if combined.exists() {
        let stale = atlas.is_stale()?;
        println!(
            "  Combined dataset: {} ({})",
            combined.display(),
            if stale { "stale" } else { "up to date" }
        );
    } else {
        println!("  Combined dataset: not built yet");
    }

    let geocode = atlas.geocode_cache_path();
    if geocode.exists() {
        println!("  Geocode cache: {}", geocode.display());
    }
    Ok(())
}

pub fn clear(atlas: &Atlas) -> Result<()> {
    let removed = atlas.rebuild_cache()?;
    let dataset = atlas.dataset()?;
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![Cell::new("Removed"), Cell::new("Photos after rebuild")]);
    table.add_row(vec![
        Cell::new(removed).fg(if removed > 0 { Color::Yellow } else { Color::Reset }),
        Cell::new(dataset.len()),
    ]);
    println!("{table}");
    Ok(())
}

/// Folder owning a cache file, relative to the root.
fn folder_label(root: &Path, cache: &Path) -> String {
    let folder = cache.parent().unwrap_or(cache);
    match folder.strip_prefix(root) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => rel.display().to_string(),
        Err(_) => folder.display().to_string(),
    }
}
