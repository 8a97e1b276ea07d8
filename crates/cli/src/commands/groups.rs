use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use photomap_core::grouping::{Group, GroupMode};
use photomap_core::Atlas;

pub fn run(atlas: &Atlas, mode: GroupMode) -> Result<()> {
    let groups = atlas.groups(mode)?;
    if groups.is_empty() {
        println!("No photos yet. Run `photomap scan {}` first.", atlas.root().display());
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new(format!("Group ({mode})")),
        Cell::new("Photos"),
        Cell::new("Located"),
        Cell::new("Places"),
    ]);

    for group in &groups {
        let (located, places) = group_stats(group);
        let located_cell = if located == 0 {
            Cell::new(located).fg(Color::DarkGrey)
        } else {
            Cell::new(located)
        };
        table.add_row(vec![
            Cell::new(group.label()),
            Cell::new(group.count()),
            located_cell,
            Cell::new(places),
        ]);
    }

    println!("{table}");
    let total: usize = groups.iter().map(Group::count).sum();
    println!("  {} groups, {} photos", groups.len(), total);
    Ok(())
}

/// Located photos and distinct resolved places in a group.
pub(crate) fn group_stats(group: &Group) -> (usize, usize) {
    let located = group.records.iter().filter(|r| r.coordinate.is_some()).count();
    let mut places: Vec<&str> = group.records.iter().filter_map(|r| r.place_name()).collect();
    places.sort_unstable();
    places.dedup();
    (located, places.len())
}
