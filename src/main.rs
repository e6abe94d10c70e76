use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use dori_assets::resolve::{self, ASSET_HOST};
use dori_assets::sync::NO_WAIT;
use dori_assets::{
    AssetSync, BranchName, Locale, OfflineBehavior, ProgressAction, Resolution, ResourceType,
    SyncConfig, SyncOutcome, TransferStats, branch_name_for, refspec_for,
};

/// Set by the Ctrl-C handler; the next progress tick cancels the transfer.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(
    name = "dori-assets",
    about = "Download and update offline asset bundles"
)]
struct Cli {
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Remote repository URL (overrides config and DORI_ASSETS_REMOTE)
    #[arg(long, global = true)]
    remote: Option<String>,

    /// Asset root directory (overrides config and DORI_ASSETS_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Abort transfers running longer than this many seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Fail instead of waiting when another process holds the bundle
    #[arg(long, global = true)]
    no_wait: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a resource bundle for the first time
    Download {
        /// Locale, e.g. jp
        locale: String,
        /// Resource type, e.g. basic
        resource_type: String,
    },

    /// Update an already downloaded resource bundle
    Update { locale: String, resource_type: String },

    /// Download missing bundles and update the rest
    Sync {
        locale: String,
        /// One or more resource types
        #[arg(required = true)]
        resource_types: Vec<String>,
    },

    /// Print the branch name and refspec for a bundle
    Branch { locale: String, resource_type: String },

    /// Show where an asset URL would be loaded from
    Resolve {
        url: String,
        #[arg(long, value_enum, default_value_t = BehaviorArg::EnableIfAvailable)]
        behavior: BehaviorArg,
    },

    /// List downloaded bundles
    Status,

    /// Check configuration and engine capabilities
    Doctor,
}

#[derive(Clone, Copy, ValueEnum)]
enum BehaviorArg {
    Disabled,
    EnableIfAvailable,
    Enabled,
}

impl From<BehaviorArg> for OfflineBehavior {
    fn from(arg: BehaviorArg) -> Self {
        match arg {
            BehaviorArg::Disabled => OfflineBehavior::Disabled,
            BehaviorArg::EnableIfAvailable => OfflineBehavior::EnableIfAvailable,
            BehaviorArg::Enabled => OfflineBehavior::Enabled,
        }
    }
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        log::warn!("Failed to install Ctrl-C handler: {}", e);
    }

    let result = run(cli);

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&cli)?;
    let json = cli.json;

    match cli.command {
        Commands::Download {
            locale,
            resource_type,
        } => cmd_download(config, &locale, &resource_type, json),
        Commands::Update {
            locale,
            resource_type,
        } => cmd_update(config, &locale, &resource_type, json),
        Commands::Sync {
            locale,
            resource_types,
        } => cmd_sync(config, &locale, &resource_types, json),
        Commands::Branch {
            locale,
            resource_type,
        } => cmd_branch(&locale, &resource_type, json),
        Commands::Resolve { url, behavior } => cmd_resolve(config, &url, behavior.into(), json),
        Commands::Status => cmd_status(config, json),
        Commands::Doctor => cmd_doctor(&config),
    }
}

/// Defaults, then the config file, then the environment, then flags.
fn load_config(cli: &Cli) -> Result<SyncConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    }
    .with_env();

    if let Some(remote) = &cli.remote {
        config = config.with_remote(remote.clone());
    }
    if let Some(root) = &cli.root {
        config = config.with_root(root.clone());
    }
    if cli.no_wait {
        config = config.with_lock_timeout(NO_WAIT);
    }
    if let Some(secs) = cli.timeout {
        config = config.with_transfer_timeout(Some(Duration::from_secs(secs)));
    }
    Ok(config)
}

fn parse_pair(
    locale: &str,
    resource_type: &str,
) -> Result<(Locale, ResourceType), Box<dyn std::error::Error>> {
    let locale: Locale = locale
        .parse()
        .map_err(|e| format!("Invalid locale '{}': {}", locale, e))?;
    let resource_type: ResourceType = resource_type
        .parse()
        .map_err(|e| format!("Invalid resource type '{}': {}", resource_type, e))?;
    if !locale.is_known() {
        log::warn!("Locale '{}' is not one the asset server publishes", locale);
    }
    Ok((locale, resource_type))
}

/// Progress line state, passed through the transfer as the callback payload.
struct ProgressLine {
    branch: BranchName,
    last_percent: Option<u32>,
    enabled: bool,
}

impl ProgressLine {
    fn new(branch: BranchName, enabled: bool) -> Self {
        Self {
            branch,
            last_percent: None,
            enabled,
        }
    }

    fn finish(&self) {
        if self.enabled && self.last_percent.is_some() {
            eprintln!();
        }
    }
}

fn report_progress(stats: &TransferStats, line: &mut ProgressLine) -> ProgressAction {
    if INTERRUPTED.load(Ordering::SeqCst) {
        return ProgressAction::Cancel;
    }
    let percent = (stats.fraction() * 100.0).floor() as u32;
    if line.enabled && line.last_percent != Some(percent) {
        line.last_percent = Some(percent);
        eprint!(
            "\r[{}] {:>3}% ({}/{} objects, {} KiB)",
            line.branch,
            percent,
            stats.indexed_objects,
            stats.total_objects,
            stats.received_bytes / 1024
        );
        let _ = std::io::stderr().flush();
    }
    ProgressAction::Continue
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn short(commit: &str) -> &str {
    if commit.len() > 12 {
        &commit[..12]
    } else {
        commit
    }
}

fn cmd_download(
    config: SyncConfig,
    locale: &str,
    resource_type: &str,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (locale, resource_type) = parse_pair(locale, resource_type)?;
    let sync = AssetSync::startup(config);

    let mut line = ProgressLine::new(branch_name_for(&locale, &resource_type), !json);
    let result = sync.download_resource(&locale, &resource_type, &mut line, report_progress);
    line.finish();
    let resource = result?;

    if json {
        print_json(&resource)?;
    } else {
        println!("Downloaded {}", resource.branch);
        println!("  Path:   {}", resource.path.display());
        println!("  Commit: {}", short(&resource.commit));
    }
    sync.shutdown();
    Ok(())
}

fn cmd_update(
    config: SyncConfig,
    locale: &str,
    resource_type: &str,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (locale, resource_type) = parse_pair(locale, resource_type)?;
    let sync = AssetSync::startup(config);

    let branch = branch_name_for(&locale, &resource_type);
    let mut line = ProgressLine::new(branch.clone(), !json);
    let result = sync.update_resource(&locale, &resource_type, &mut line, report_progress);
    line.finish();
    let status = result?;

    if json {
        print_json(&status)?;
    } else if status.changed() {
        println!("Updated {} to {}", branch, short(status.commit()));
    } else {
        println!("{} is up to date ({})", branch, short(status.commit()));
    }
    sync.shutdown();
    Ok(())
}

fn cmd_sync(
    config: SyncConfig,
    locale: &str,
    resource_types: &[String],
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let pairs = resource_types
        .iter()
        .map(|t| parse_pair(locale, t))
        .collect::<Result<Vec<_>, _>>()?;
    let sync = AssetSync::startup(config);

    let mut outcomes = Vec::new();
    for (locale, resource_type) in &pairs {
        let branch = branch_name_for(locale, resource_type);
        let mut line = ProgressLine::new(branch.clone(), !json);
        let result = sync.sync(locale, resource_type, &mut line, report_progress);
        line.finish();
        let outcome = result?;

        if !json {
            match &outcome {
                SyncOutcome::Downloaded(resource) => {
                    println!("Downloaded {} ({})", branch, short(&resource.commit))
                }
                SyncOutcome::Updated { status } if status.changed() => {
                    println!("Updated {} ({})", branch, short(status.commit()))
                }
                SyncOutcome::Updated { status } => {
                    println!("{} is up to date ({})", branch, short(status.commit()))
                }
            }
        }
        outcomes.push(outcome);
    }

    if json {
        print_json(&outcomes)?;
    }
    sync.shutdown();
    Ok(())
}

#[derive(Serialize)]
struct BranchInfo {
    branch: String,
    refspec: String,
}

fn cmd_branch(
    locale: &str,
    resource_type: &str,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (locale, resource_type) = parse_pair(locale, resource_type)?;
    let branch = branch_name_for(&locale, &resource_type);
    let info = BranchInfo {
        branch: branch.to_string(),
        refspec: refspec_for(&branch).to_string(),
    };

    if json {
        print_json(&info)?;
    } else {
        println!("Branch:  {}", info.branch);
        println!("Refspec: {}", info.refspec);
    }
    Ok(())
}

fn cmd_resolve(
    config: SyncConfig,
    url: &str,
    behavior: OfflineBehavior,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !url.starts_with(ASSET_HOST) {
        log::info!("{} is not under {}, it always loads remotely", url, ASSET_HOST);
    }
    let sync = AssetSync::startup(config);
    let resolution = resolve::resolve(&sync, url, behavior);

    if json {
        print_json(&resolution)?;
    } else {
        match &resolution {
            Resolution::Remote(url) => println!("remote {}", url),
            Resolution::Local(path) => println!("local  {}", path.display()),
            Resolution::Missing => println!("missing (not downloaded)"),
        }
    }
    sync.shutdown();

    if resolution == Resolution::Missing {
        std::process::exit(2);
    }
    Ok(())
}

fn cmd_status(config: SyncConfig, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let sync = AssetSync::startup(config);
    let resources = sync.downloaded_resources()?;

    if json {
        print_json(&resources)?;
    } else if resources.is_empty() {
        println!("No bundles downloaded under {}", sync.paths().root().display());
    } else {
        println!("{:<30} {:>14}  {}", "BRANCH", "COMMIT", "PATH");
        println!("{}", "-".repeat(80));
        for resource in &resources {
            println!(
                "{:<30} {:>14}  {}",
                resource.branch.to_string(),
                short(&resource.commit),
                resource.path.display()
            );
        }
    }
    sync.shutdown();
    Ok(())
}

fn cmd_doctor(config: &SyncConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("dori-assets System Check\n");

    let version = git2::Version::get();
    let (major, minor, rev) = version.libgit2_version();
    println!("[OK] libgit2: {}.{}.{}", major, minor, rev);
    println!(
        "[{}] HTTPS transport: {}",
        if version.https() { "OK" } else { "INFO" },
        if version.https() {
            "available"
        } else {
            "not built in (rebuild with --features https)"
        }
    );

    let remote_ok = config.remote().is_ok();
    println!(
        "[{}] Remote: {}",
        if remote_ok { "OK" } else { "FAIL" },
        config.remote_url.as_deref().unwrap_or("not configured")
    );

    let root = config.paths().root().to_path_buf();
    let root_ok = root.exists();
    println!(
        "[{}] Asset root: {}",
        if root_ok { "OK" } else { "INFO" },
        root.display()
    );

    println!(
        "[INFO] Lock timeout: {}s, transfer timeout: {}",
        config.lock_timeout().as_secs(),
        config
            .transfer_timeout()
            .map(|t| format!("{}s", t.as_secs()))
            .unwrap_or_else(|| "none".into())
    );

    if !remote_ok {
        std::process::exit(1);
    }

    Ok(())
}
