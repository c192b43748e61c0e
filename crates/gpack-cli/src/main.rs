use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, ColorChoice, Parser, Subcommand};
use console::style;
use dialoguer::{Confirm, Input, MultiSelect, Password};
use gpack_core::{
    format_bytes, BackupStage, ClientCredentials, CredentialStore, Gpack, LoginOutcome, LoginPrompt,
    Project, ProjectConfig, RemoteFile, Settings, TrimMode, TrimOutcome, TrimPrompt,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::level_filters::LevelFilter;

/// Backup your coding projects to Google Drive.
#[derive(Parser, Debug)]
#[command(name = "gpack", author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Set the verbosity level. Use -v for debug, -vv for trace.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Control when to use color output.
    #[arg(long, value_name = "WHEN", global = true, default_value_t = ColorChoice::Auto)]
    color: ColorChoice,

    /// Runs `push` when omitted.
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize gpack in the current project.
    Init,
    /// Connect to Google Drive.
    Login,
    /// Log out and remove stored credentials.
    Logout,
    /// Backup the current project to Google Drive.
    #[command(visible_alias = "backup")]
    Push,
    /// List backups and storage usage.
    #[command(visible_alias = "ls")]
    List,
    /// Trim old backups.
    Trim {
        /// Keep only the newest N backups (5 when N is omitted) without prompting.
        #[arg(long, value_name = "KEEP", num_args = 0..=1)]
        auto: Option<Option<usize>>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.color);

    let settings = load_settings();
    let credentials = CredentialStore::open_default().context("Failed to locate the credential store")?;
    let project = Project::current().context("Failed to read the current directory")?;
    let gpack = Gpack::new(settings, credentials, project);

    match cli.command.unwrap_or(Commands::Push) {
        Commands::Init => handle_init(gpack.project()),
        Commands::Login => handle_login(&gpack),
        Commands::Logout => handle_logout(&gpack),
        Commands::Push => handle_push(&gpack),
        Commands::List => handle_list(&gpack),
        Commands::Trim { auto } => handle_trim(&gpack, trim_mode(auto, gpack.settings().default_keep)),
    }
}

/// Falls back to defaults so a broken settings file doesn't lock out `init` or `logout`.
fn load_settings() -> Settings {
    match Settings::new() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!(
                "{} Ignoring unreadable settings, using defaults: {}",
                style("⚠").yellow(),
                e
            );
            Settings::default()
        }
    }
}

/// `--auto` alone keeps `default_keep`; no flag means interactive.
fn trim_mode(auto: Option<Option<usize>>, default_keep: usize) -> TrimMode {
    match auto {
        Some(keep) => TrimMode::Auto {
            keep: keep.unwrap_or(default_keep),
        },
        None => TrimMode::Interactive,
    }
}

fn init_tracing(verbosity: u8, color: ColorChoice) {
    let level = match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_ansi(color != ColorChoice::Never) // Enable/disable color
        .init();
}

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        bar.set_style(template);
    }
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// Prints a command failure, with a login hint when credentials are missing.
fn report_failure(bar: Option<&ProgressBar>, what: &str, err: &anyhow::Error) {
    let line = format!("{} {}: {:#}", style("✖").red(), what, err);
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    eprintln!("{}", line);
    let not_logged_in = err
        .downcast_ref::<gpack_core::Error>()
        .is_some_and(gpack_core::Error::is_not_authenticated);
    if not_logged_in {
        eprintln!("{}", style("Try running `gpack login`").yellow());
    }
}

fn handle_init(project: &Project) -> Result<()> {
    if project.is_initialized() {
        println!("{}", style("gpack is already initialized in this project.").yellow());
        let reconfigure = Confirm::new()
            .with_prompt("Do you want to re-configure?")
            .default(false)
            .interact()?;
        if !reconfigure {
            return Ok(());
        }
    }

    println!("{}", style("Initializing gpack...").cyan());
    let theme = dialoguer::theme::ColorfulTheme::default();
    let backup_folder: String = Input::with_theme(&theme)
        .with_prompt("Where should backups be stored in Google Drive?")
        .default(project.default_backup_folder())
        .interact_text()?;

    project
        .save_config(&ProjectConfig {
            backup_folder,
            project_id: None,
        })
        .context("Could not save project configuration")?;
    project
        .create_default_ignore()
        .context("Could not create .gpackignore")?;

    println!("{}", style("✔ Configuration saved to .gpack/config.json").green());
    println!("{}", style("✔ .gpackignore created (if it didn't exist)").green());
    println!(
        "{}",
        style("Project is ready for backup! Run `gpack login` next if you haven't authenticated.").bold()
    );
    Ok(())
}

struct TerminalLogin;

impl LoginPrompt for TerminalLogin {
    fn replace_saved_client(&mut self) -> gpack_core::Result<bool> {
        println!("Using saved Client ID and Secret.");
        Confirm::new()
            .with_prompt("Do you want to use different credentials?")
            .default(false)
            .interact()
            .map_err(prompt_error)
    }

    fn client_credentials(&mut self) -> gpack_core::Result<ClientCredentials> {
        print_setup_hints();
        let client_id: String = Input::new()
            .with_prompt("Enter Client ID")
            .interact_text()
            .map_err(prompt_error)?;
        let client_secret = Password::new()
            .with_prompt("Enter Client Secret")
            .interact()
            .map_err(prompt_error)?;
        Ok(ClientCredentials {
            client_id: client_id.trim().to_string(),
            client_secret: client_secret.trim().to_string(),
        })
    }

    fn show_authorization_url(&mut self, url: &str) {
        println!("Authorize this app by visiting this url:");
        println!("{}", style(url).underlined());
        if let Err(e) = open::that(url) {
            tracing::debug!(error = %e, "Could not launch a browser.");
            println!("{}", style("Could not open a browser, please open the url above manually.").yellow());
        }
        println!("Waiting for the browser to redirect back...");
    }
}

fn print_setup_hints() {
    println!("{}", style("Google Drive Login Setup").bold());
    println!("You need a Google Cloud Project with the Drive API enabled.");
    println!(
        "1. Go to Cloud Resource Manager: {}",
        style("https://console.cloud.google.com/cloud-resource-manager").underlined()
    );
    println!("   (Create a new project if needed)");
    println!(
        "2. Enable Drive API: {}",
        style("https://console.cloud.google.com/apis/library/drive.googleapis.com").underlined()
    );
    println!(
        "3. Create Credentials (OAuth Client ID): {}",
        style("https://console.cloud.google.com/apis/credentials/oauthclient").underlined()
    );
    println!("   - Application type: \"Desktop app\"");
}

fn prompt_error(err: dialoguer::Error) -> gpack_core::Error {
    gpack_core::Error::Custom(format!("Prompt failed: {}", err))
}

fn handle_login(gpack: &Gpack) -> Result<()> {
    match gpack.login(&mut TerminalLogin).context("Login failed")? {
        LoginOutcome::AlreadyAuthenticated => {
            println!("{}", style("You are already logged in.").yellow());
            println!("Run `gpack logout` if you want to switch accounts or refresh credentials.");
        }
        LoginOutcome::LoggedIn => println!("{}", style("Successfully authenticated!").green()),
    }
    Ok(())
}

fn handle_logout(gpack: &Gpack) -> Result<()> {
    match gpack.logout() {
        Ok(()) => println!("{}", style("Logged out successfully. Credentials removed.").green()),
        Err(e) => report_failure(None, "Logout failed", &e.into()),
    }
    Ok(())
}

fn handle_push(gpack: &Gpack) -> Result<()> {
    let bar = spinner("Preparing backup...");
    let result = gpack.backup(&mut |stage| match stage {
        BackupStage::Authenticating => bar.set_message("Authenticating..."),
        BackupStage::ResolvingFolder => bar.set_message("Resolving storage location..."),
        BackupStage::Uploading { name } => bar.set_message(format!("Zipping and uploading {}...", name)),
    });

    match result {
        Ok(report) => bar.finish_with_message(format!(
            "{} Backup uploaded successfully: {} ({})",
            style("✔").green(),
            style(&report.file.name).green(),
            format_bytes(report.archive.compressed_bytes)
        )),
        Err(e) => report_failure(Some(&bar), "Backup failed", &e.into()),
    }
    Ok(())
}

fn handle_list(gpack: &Gpack) -> Result<()> {
    let bar = spinner("Fetching backups...");
    let listing = match gpack.list() {
        Ok(listing) => listing,
        Err(e) => {
            report_failure(Some(&bar), "Failed to list backups", &e.into());
            return Ok(());
        }
    };
    bar.finish_and_clear();

    let Some(listing) = listing else {
        println!("{}", style("No backups found (Folder not created yet).").yellow());
        return Ok(());
    };
    if listing.snapshots.is_empty() {
        println!("{}", style("No backups found.").yellow());
        return Ok(());
    }

    println!("{}", style(format!("Backups for {}:", listing.folder_path)).bold());
    for file in &listing.snapshots {
        println!(
            "{} - {} - {}",
            style(&file.name).cyan(),
            format_bytes(file.size_bytes()),
            created_label(file)
        );
    }
    println!();
    println!(
        "{}",
        style(format!("Total Storage Used: {}", format_bytes(listing.total_bytes()))).bold()
    );
    println!("Total Backups: {}", listing.snapshots.len());
    Ok(())
}

fn created_label(file: &RemoteFile) -> String {
    file.created_time
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_else(|| "unknown".to_string())
}

struct TerminalTrim;

impl TrimPrompt for TerminalTrim {
    fn select(&mut self, snapshots: &[RemoteFile]) -> gpack_core::Result<Vec<String>> {
        println!("Found {} backups.", snapshots.len());
        let labels: Vec<String> = snapshots
            .iter()
            .map(|f| format!("{} ({})", f.name, created_label(f)))
            .collect();
        let picked = MultiSelect::new()
            .with_prompt("Select backups to DELETE (Space to select, Enter to confirm)")
            .items(&labels)
            .max_length(10)
            .interact()
            .map_err(prompt_error)?;
        Ok(picked.into_iter().map(|i| snapshots[i].id.clone()).collect())
    }

    fn confirm(&mut self, count: usize) -> gpack_core::Result<bool> {
        Confirm::new()
            .with_prompt(format!("Are you sure you want to delete {} backups?", count))
            .default(false)
            .interact()
            .map_err(prompt_error)
    }

    fn deleted(&mut self, snapshot: &RemoteFile) {
        println!("{}", style(format!("Deleted {}", snapshot.name)).dim());
    }
}

fn handle_trim(gpack: &Gpack, mode: TrimMode) -> Result<()> {
    if let TrimMode::Auto { keep } = mode {
        println!("{}", style(format!("Auto-trimming: keeping the latest {}...", keep)).cyan());
    }
    match gpack.trim(mode, &mut TerminalTrim) {
        Ok(TrimOutcome::NoBackups) => println!("{}", style("No backups to trim.").yellow()),
        Ok(TrimOutcome::WithinLimit { total, keep }) => println!(
            "{}",
            style(format!(
                "Total backups ({}) is within the limit ({}). No action taken.",
                total, keep
            ))
            .green()
        ),
        Ok(TrimOutcome::NothingSelected) => println!("No files deletion selected."),
        Ok(TrimOutcome::Declined) => println!("Nothing was deleted."),
        Ok(TrimOutcome::Deleted(files)) => {
            println!("{}", style(format!("Trim complete. Deleted {} backups.", files.len())).green())
        }
        Err(e) => report_failure(None, "Trim failed", &e.into()),
    }
    Ok(())
}
