use std::io::{BufRead, Write};

use anyhow::Result;
use indicatif::MultiProgress;
use photomap_core::analysis::AnalysisMode;
use photomap_core::Atlas;

use super::analyze::{analyze_with_progress, print_notices};

pub fn run(atlas: &Atlas, yes: bool) -> Result<()> {
    let folders = atlas.find_unanalyzed_folders()?;
    if folders.is_empty() {
        println!("All folders under {} are analyzed.", atlas.root().display());
        return Ok(());
    }

    println!("Folders with photos that were never analyzed:");
    for folder in &folders {
        let shown = folder.strip_prefix(atlas.root()).unwrap_or(folder);
        if shown.as_os_str().is_empty() {
            println!("  .");
        } else {
            println!("  {}", shown.display());
        }
    }

    if !yes && !confirm(&format!("Analyze {} folder(s) now?", folders.len()))? {
        println!("Nothing analyzed.");
        return Ok(());
    }

    let mp = MultiProgress::new();
    mp.println(String::new()).ok();
    let mut reports = Vec::with_capacity(folders.len());
    for folder in &folders {
        reports.push(analyze_with_progress(atlas, &mp, folder, AnalysisMode::Incremental)?);
    }
    print_notices(&mp, &reports);
    Ok(())
}

fn confirm(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
