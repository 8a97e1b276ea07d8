mod commands;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use photomap_core::grouping::GroupMode;
use photomap_core::scanner;
use photomap_core::settings::{Settings, SETTINGS_FILE_NAME};
use photomap_core::Atlas;
use tracing_subscriber::EnvFilter;

/// PhotoMap: find where your photos were taken
#[derive(Parser)]
#[command(name = "photomap", version, about)]
struct Cli {
    /// Path to the settings file
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find folders with photos that were never analyzed, and analyze them
    Scan {
        /// Photo root directory
        root: PathBuf,
        /// Analyze without asking for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Analyze one folder: read locations and resolve place names
    Analyze {
        /// Folder to analyze
        folder: PathBuf,
        /// Photo root the folder belongs to (defaults to the nearest enclosing root
        /// already holding a `.photomap` directory, else the folder itself)
        #[arg(long)]
        root: Option<PathBuf>,
        /// Discard the folder cache and retry unresolved places
        #[arg(long)]
        rebuild: bool,
    },
    /// List photo groups with their sizes
    Groups {
        /// Photo root directory
        root: PathBuf,
        /// Grouping: folder, year or month
        #[arg(long)]
        mode: Option<GroupMode>,
    },
    /// Cluster a group's photos into map markers
    Clusters {
        /// Photo root directory
        root: PathBuf,
        #[command(flatten)]
        select: ClusterSelect,
    },
    /// List the photos of one cluster
    Cluster {
        /// Photo root directory
        root: PathBuf,
        /// Cluster ID as shown by `photomap clusters`
        id: usize,
        #[command(flatten)]
        select: ClusterSelect,
    },
    /// Inspect or clear the combined dataset
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Show or change settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
}

#[derive(clap::Args)]
struct ClusterSelect {
    /// Group label (defaults to the first group)
    #[arg(long)]
    group: Option<String>,
    /// Grouping: folder, year or month
    #[arg(long)]
    mode: Option<GroupMode>,
    /// Clustering distance in meters
    #[arg(long)]
    distance: Option<f64>,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show folder caches and whether the combined dataset is stale
    Status {
        /// Photo root directory
        root: PathBuf,
    },
    /// Delete the combined dataset so it is rebuilt on next use
    Clear {
        /// Photo root directory
        root: PathBuf,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print every setting
    Show,
    /// Change one setting
    Set {
        /// Setting name, e.g. cluster_distance_m
        key: String,
        /// New value
        value: String,
    },
}

fn default_settings_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".photomap")
        .join(SETTINGS_FILE_NAME)
}

/// Root for a single-folder analysis: the explicit one, else the nearest enclosing
/// root that already has a `.photomap` directory, so its geocode cache is shared.
fn analysis_root(folder: &Path, root: Option<PathBuf>) -> PathBuf {
    root.or_else(|| scanner::find_root(folder))
        .unwrap_or_else(|| folder.to_path_buf())
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings_path = cli.settings.unwrap_or_else(default_settings_path);
    let settings = Settings::load(&settings_path)?;
    tracing::debug!(path = %settings_path.display(), "settings loaded");

    match cli.command {
        Commands::Scan { root, yes } => {
            let atlas = Atlas::open(&root, settings)?;
            commands::scan::run(&atlas, yes)?
        }
        Commands::Analyze {
            folder,
            root,
            rebuild,
        } => {
            let root = analysis_root(&folder, root);
            tracing::debug!(root = %root.display(), "analysis root");
            let atlas = Atlas::open(&root, settings)?;
            commands::analyze::run(&atlas, &folder, rebuild)?
        }
        Commands::Groups { root, mode } => {
            let mode = mode.unwrap_or(settings.group_mode);
            let atlas = Atlas::open(&root, settings)?;
            commands::groups::run(&atlas, mode)?
        }
        Commands::Clusters { root, select } => {
            let query = select.resolve(&settings);
            let atlas = Atlas::open(&root, settings)?;
            commands::clusters::list(&atlas, &query)?
        }
        Commands::Cluster { root, id, select } => {
            let query = select.resolve(&settings);
            let atlas = Atlas::open(&root, settings)?;
            commands::clusters::show(&atlas, &query, id)?
        }
        Commands::Cache { action } => match action {
            CacheAction::Status { root } => {
                commands::cache::status(&Atlas::open(&root, settings)?)?
            }
            CacheAction::Clear { root } => {
                commands::cache::clear(&Atlas::open(&root, settings)?)?
            }
        },
        Commands::Settings { action } => match action {
            None | Some(SettingsAction::Show) => {
                commands::settings::show(&settings, &settings_path)?
            }
            Some(SettingsAction::Set { key, value }) => {
                commands::settings::set(settings, &settings_path, &key, &value)?
            }
        },
    }

    Ok(())
}

impl ClusterSelect {
    fn resolve(self, settings: &Settings) -> commands::clusters::Query {
        commands::clusters::Query {
            group: self.group,
            mode: self.mode.unwrap_or(settings.group_mode),
            distance_m: self.distance.unwrap_or(settings.cluster_distance_m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_analysis_root_prefers_explicit_root() {
        let tmp = tempfile::tempdir().unwrap();
        let explicit = tmp.path().join("elsewhere");
        assert_eq!(analysis_root(tmp.path(), Some(explicit.clone())), explicit);
    }

    #[test]
    fn test_analysis_root_finds_enclosing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let folder = root.join("2023/rome");
        fs::create_dir_all(&folder).unwrap();
        fs::create_dir_all(root.join(".photomap")).unwrap();

        assert_eq!(analysis_root(&folder, None), root);
    }

    #[test]
    fn test_analysis_root_falls_back_to_folder() {
        let tmp = tempfile::tempdir().unwrap();
        let folder = tmp.path().join("loose");
        fs::create_dir_all(&folder).unwrap();

        assert_eq!(analysis_root(&folder, None), folder);
    }
}
