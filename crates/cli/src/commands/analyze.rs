use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use photomap_core::analysis::{
    AnalysisMode, AnalysisProgress, AnalysisReport, AnalysisState, CancelToken,
};
use signal_hook::consts::SIGINT;
use signal_hook::SigId;
use photomap_core::Atlas;

use super::display_name;

fn active_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "  {bar:30.cyan/blue} {spinner:.green} {pos:>5}/{len:<5} {prefix:.dim} {msg}",
    )
    .unwrap()
    .progress_chars("━╸─")
}

fn done_style() -> ProgressStyle {
    ProgressStyle::with_template("  {bar:30.green} {prefix:.green} {msg:.dim}").unwrap()
}

pub fn run(atlas: &Atlas, folder: &Path, rebuild: bool) -> Result<()> {
    let mode = if rebuild {
        AnalysisMode::Rebuild
    } else {
        AnalysisMode::Incremental
    };
    let mp = MultiProgress::new();
    let report = analyze_with_progress(atlas, &mp, folder, mode)?;
    print_notices(&mp, &[report]);
    Ok(())
}

/// Run one analysis on a worker thread, drawing a bar per phase.
pub(crate) fn analyze_with_progress(
    atlas: &Atlas,
    mp: &MultiProgress,
    folder: &Path,
    mode: AnalysisMode,
) -> Result<AnalysisReport> {
    let job = atlas.spawn_analysis(folder, mode)?;
    let interrupt = cancel_on_interrupt(&job.cancel_token())?;
    mp.println(format!("  Analyzing {}", display_name(job.folder()))).ok();

    let mut active_pb: Option<ProgressBar> = None;
    let mut phase_done = String::new();

    for event in job.progress().iter() {
        match event {
            AnalysisProgress::State(state) => {
                if let Some(pb) = active_pb.take() {
                    pb.set_style(done_style());
                    pb.set_prefix("done");
                    pb.finish_with_message(std::mem::take(&mut phase_done));
                }
                let prefix = match state {
                    AnalysisState::Extracting => "Reading",
                    AnalysisState::Geocoding => "Locating",
                    _ => continue,
                };
                let pb = mp.add(ProgressBar::new(0));
                pb.set_style(active_style());
                pb.set_prefix(prefix);
                pb.enable_steady_tick(Duration::from_millis(80));
                active_pb = Some(pb);
            }
            AnalysisProgress::FileProcessed {
                processed,
                total,
                path,
            } => {
                if let Some(ref pb) = active_pb {
                    pb.set_length(total as u64);
                    pb.set_position(processed as u64);
                    pb.set_message(display_name(&path));
                }
                phase_done = format!("Read {total} files");
            }
            AnalysisProgress::Geocoded { processed, total } => {
                if let Some(ref pb) = active_pb {
                    pb.set_length(total as u64);
                    pb.set_position(processed as u64);
                }
                phase_done = format!("Located {total} photos");
            }
        }
    }
    if let Some(pb) = active_pb.take() {
        pb.finish_and_clear();
        mp.remove(&pb);
    }

    signal_hook::low_level::unregister(interrupt);

    let report = job.join()?;
    mp.println(format!("  {}", summarize(&report))).ok();
    Ok(report)
}

/// Ctrl-C cancels the analysis instead of killing the process, so nothing half-written is left.
fn cancel_on_interrupt(token: &CancelToken) -> Result<SigId> {
    Ok(signal_hook::flag::register(SIGINT, token.flag())?)
}

/// One-line outcome of an analysis.
pub(crate) fn summarize(report: &AnalysisReport) -> String {
    if report.state == AnalysisState::Cancelled {
        return format!("{}: cancelled, nothing saved", display_name(&report.folder));
    }
    let mut line = format!(
        "{}: {} photos ({} cached, {} read), {} with location",
        display_name(&report.folder),
        report.files_total,
        report.files_reused,
        report.files_extracted,
        report.located,
    );
    if report.geocode_requests > 0 {
        line.push_str(&format!(", {} lookups", report.geocode_requests));
    }
    if !report.persisted {
        line.push_str(", unchanged");
    }
    line
}

/// Print the "could not resolve" notice if any photo stayed unresolved.
pub(crate) fn print_notices(mp: &MultiProgress, reports: &[AnalysisReport]) {
    let unresolved: usize = reports.iter().map(|r| r.unresolved).sum();
    if unresolved > 0 {
        mp.println(String::new()).ok();
        mp.println(format!(
            "  Could not resolve location for {unresolved} photo{}. Run `photomap analyze --rebuild` to retry.",
            if unresolved == 1 { "" } else { "s" }
        ))
        .ok();
    }
    mp.println(String::new()).ok();
}
