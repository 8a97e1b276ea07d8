use anyhow::{bail, Result};
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use photomap_core::clustering::{Cluster, Clustering};
use photomap_core::domain::{Geocode, PhotoRecord};
use photomap_core::grouping::{Group, GroupMode};
use photomap_core::Atlas;

/// Which group to cluster and how.
pub struct Query {
    pub group: Option<String>,
    pub mode: GroupMode,
    pub distance_m: f64,
}

fn select(atlas: &Atlas, query: &Query) -> Result<Option<(Group, Clustering)>> {
    Ok(atlas.cluster_group(query.mode, query.group.as_deref(), query.distance_m)?)
}

pub fn list(atlas: &Atlas, query: &Query) -> Result<()> {
    let Some((group, clustering)) = select(atlas, query)? else {
        println!("No photos yet. Run `photomap scan {}` first.", atlas.root().display());
        return Ok(());
    };

    println!(
        "  {}: {} photos, {} markers at {} m",
        group.label(),
        group.count(),
        clustering.clusters.len(),
        query.distance_m
    );

    if !clustering.clusters.is_empty() {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("ID"),
            Cell::new("Center"),
            Cell::new("Photos"),
            Cell::new("Places"),
        ]);
        for cluster in &clustering.clusters {
            table.add_row(vec![
                Cell::new(cluster.id),
                Cell::new(cluster.center),
                Cell::new(cluster.count()),
                places_cell(cluster),
            ]);
        }
        println!("{table}");
    }

    if let Some(center) = clustering.initial_center() {
        println!("  Map center: {center}");
    }
    if let Some(bounds) = clustering.bounds() {
        println!("  Bounds: {} to {}", bounds.min, bounds.max);
    }
    if !clustering.unlocated.is_empty() {
        println!("  {} photos have no location data", clustering.unlocated.len());
    }
    Ok(())
}

pub fn show(atlas: &Atlas, query: &Query, id: usize) -> Result<()> {
    let Some((group, clustering)) = select(atlas, query)? else {
        bail!("no photos under {}", atlas.root().display());
    };
    let Some(cluster) = clustering.cluster_by_id(id) else {
        bail!(
            "no cluster #{id} in group {} ({} clusters at {} m)",
            group.label(),
            clustering.clusters.len(),
            query.distance_m
        );
    };

    println!("Cluster #{} ({} photos) at {}", cluster.id, cluster.count(), cluster.center);

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("File"),
        Cell::new("Folder"),
        Cell::new("Location"),
        Cell::new("Place"),
        Cell::new("Taken"),
    ]);
    for member in &cluster.members {
        table.add_row(vec![
            Cell::new(member.file_name()),
            Cell::new(member.source_folder.display()),
            Cell::new(member.coordinate.map(|c| c.to_string()).unwrap_or_default()),
            place_cell(member),
            Cell::new(
                member
                    .captured_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn places_cell(cluster: &Cluster) -> Cell {
    let names = cluster.place_names();
    if names.is_empty() {
        Cell::new("unknown").fg(Color::DarkGrey)
    } else {
        Cell::new(names.join("; "))
    }
}

fn place_cell(record: &PhotoRecord) -> Cell {
    match &record.geocode {
        Geocode::Resolved(place) => Cell::new(place),
        Geocode::Pending => Cell::new("pending").fg(Color::Yellow),
        Geocode::Unresolved => Cell::new("unresolved").fg(Color::Red),
    }
}
