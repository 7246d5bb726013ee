mod ai;
mod browser;
mod campaign;
mod config;
mod db;
mod document;
mod error;
#[cfg(test)]
mod fake_session;
mod manual;
mod models;
mod pacing;
mod profiler;
mod session;
mod site;
mod tui;
mod vocabulary;
mod workflow;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use browser::WebDriverLauncher;
use campaign::{CampaignRunner, RunMode};
use config::{Environment, UserConfig, DEFAULT_CONFIG_PATH, EXAMPLE_CONFIG};
use db::Database;
use manual::ManualReport;
use models::{ApplicationStatus, CandidateProfile, PositionSuggestion};
use pacing::Pacer;
use profiler::CandidateProfiler;
use tui::truncate;

const MANUAL_REPORT: &str = "job_search_report.txt";
const RECORDS_REPORT: &str = "job_applications_report.txt";

#[derive(Parser)]
#[command(name = "jobagent")]
#[command(about = "CV-driven job search: suggest positions, quick-apply, track every application")]
struct Cli {
    /// Database file (defaults to the user data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database and write an example config
    Init {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Profile a CV and suggest positions, without touching a browser
    Analyze {
        /// CV file (PDF, TXT or MD)
        #[arg(long)]
        cv: PathBuf,

        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Model override (gemini, gemini-flash, api-sonnet, api-haiku, gpt-4o, ...)
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Profile a CV, then search and quick-apply for every position and location
    Run {
        #[arg(long)]
        cv: PathBuf,

        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        #[arg(short, long)]
        model: Option<String>,

        /// Fill applications but stop before sending them
        #[arg(long)]
        no_submit: bool,

        /// Run the browser without a window
        #[arg(long)]
        headless: bool,

        /// Where the manual search report goes if the browser is unavailable
        #[arg(long, default_value = MANUAL_REPORT)]
        report: PathBuf,

        /// Where the applications report is exported after the run
        #[arg(long, default_value = RECORDS_REPORT)]
        export: PathBuf,
    },

    /// Write the manual search report (links and form answers) for a CV
    Links {
        #[arg(long)]
        cv: PathBuf,

        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        #[arg(short, long)]
        model: Option<String>,

        #[arg(short, long, default_value = MANUAL_REPORT)]
        output: PathBuf,
    },

    /// List tracked applications
    List {
        /// Filter by status (pending, found, applied, failed)
        #[arg(short, long)]
        status: Option<ApplicationStatus>,
    },

    /// Show one application
    Show {
        /// Application ID
        id: i64,
    },

    /// Export the applications report
    Report {
        #[arg(short, long, default_value = RECORDS_REPORT)]
        output: PathBuf,
    },

    /// Browse applications interactively
    Browse {
        #[arg(short, long)]
        status: Option<ApplicationStatus>,
    },
}

fn load_config(path: &Path) -> Result<UserConfig> {
    let config = UserConfig::load(path)
        .with_context(|| format!("Run 'jobagent init' to create {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// CV file to profile and filtered suggestions.
async fn analyze_cv(
    cv: &Path,
    config: &UserConfig,
    model: Option<&str>,
) -> Result<(CandidateProfile, Vec<PositionSuggestion>)> {
    let spec = ai::resolve_model(model.unwrap_or(config.job_preferences.model.as_str()))?;
    let provider = ai::create_provider(&spec)?;
    info!("using model {} ({})", spec.short_name, provider.model_name());

    let text = document::extract_text(cv)?;
    let profiler = CandidateProfiler::new(provider.as_ref());

    println!("Analyzing CV...");
    let profile = profiler.profile(&text).await?;
    println!("Finding matching positions...");
    let suggestions = profiler
        .suggest_positions(&profile, &config.locations(), config.suggestion_constraints())
        .await?;

    if suggestions.is_empty() {
        bail!(
            "No position scored at least {}. Lower job_preferences.min_match_score and try again.",
            config.job_preferences.min_match_score
        );
    }
    Ok((profile, suggestions))
}

fn print_profile(profile: &CandidateProfile, suggestions: &[PositionSuggestion]) {
    println!("\nCandidate: {}", profile.display_name());
    if let Some(years) = profile.experience_years {
        println!("Experience: {} years", years);
    }
    if !profile.skills.is_empty() {
        let skills: Vec<&str> = profile.skills.iter().map(String::as_str).collect();
        println!("Skills: {}", skills.join(", "));
    }
    if let Some(summary) = &profile.summary {
        println!("Summary: {}", summary);
    }

    println!("\n{:<5} {:<32} {:<9} {:>6}", "RANK", "POSITION", "LEVEL", "SCORE");
    println!("{}", "-".repeat(55));
    for (i, s) in suggestions.iter().enumerate() {
        println!(
            "{:<5} {:<32} {:<9} {:>5.0}%",
            i + 1,
            truncate(&s.title, 30),
            s.seniority,
            s.score
        );
        if !s.keywords.is_empty() {
            println!("      keywords: {}", s.keywords.join(", "));
        }
    }
}

fn open_db(path: Option<&Path>) -> Result<Database> {
    match path {
        Some(p) => Database::open_at(p),
        None => Database::open(),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    db: &Database,
    cv: &Path,
    config_path: &Path,
    model: Option<&str>,
    no_submit: bool,
    headless: bool,
    report: &Path,
    export: &Path,
) -> Result<()> {
    let config = load_config(config_path)?;
    let env = Environment::load();
    db.init()?;

    let (profile, suggestions) = analyze_cv(cv, &config, model).await?;
    print_profile(&profile, &suggestions);

    let answers = config.answers(&profile);
    let mut workflow = config.workflow_config();
    if no_submit {
        workflow.auto_submit = false;
    }
    let mut options = config.session_options();
    options.headless |= headless;
    let pacer = Pacer::new(config.pacing.clone());
    let launcher = WebDriverLauncher::new(env.webdriver_url.clone());
    let locations = config.locations();

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing the current step");
            watcher.cancel();
        }
    });

    println!("\nStarting applications...");
    let runner = CampaignRunner {
        launcher: &launcher,
        options: &options,
        credentials: env.credentials.as_ref(),
        site: &config.site,
        vocabulary: &config.vocabulary,
        workflow: &workflow,
        pacer: &pacer,
        store: db,
        cancel: &cancel,
        report_path: report,
    };
    let outcome = runner.run(&profile, &suggestions, &locations, &answers).await;

    // Whatever happened above, the records so far are worth keeping.
    match db.export_report(export) {
        Ok(()) => println!("Applications report exported to {}", export.display()),
        Err(e) => warn!("{:#}", e),
    }
    let outcome = outcome?;

    match &outcome.mode {
        RunMode::Automated => {
            let r = outcome.result;
            println!("\nRESULTS");
            println!("{}", "-".repeat(30));
            println!("  Listings inspected:   {}", r.total_found);
            println!("  Applications tried:   {}", r.applications_attempted);
            println!("  Applications sent:    {}", r.applications_succeeded);
            println!("  Blocked on answers:   {}", r.applications_blocked);
            if outcome.interrupted {
                println!("  (interrupted)");
            }
        }
        RunMode::Degraded { reason, report_path } => {
            println!("\nBrowser automation unavailable: {}", reason);
            println!("Manual search report saved to {}", report_path.display());
        }
    }

    print_missing_info(db)?;
    Ok(())
}

fn print_missing_info(db: &Database) -> Result<()> {
    let waiting: Vec<_> = db
        .list_unapplied()?
        .into_iter()
        .filter(|r| !r.missing_info.is_empty())
        .collect();
    if waiting.is_empty() {
        return Ok(());
    }

    println!("\nJobs needing more information ({}):", waiting.len());
    for record in waiting {
        println!("  #{} {} at {}", record.id, record.title, record.company);
        println!("     missing: {}", record.missing_info.join(", "));
        println!("     {}", record.url);
    }
    println!("Add the answers under personal_info and run again.");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    config::load_dotenv();
    let cli = Cli::parse();
    let db = open_db(cli.db.as_deref())?;

    match cli.command {
        Commands::Init { config } => {
            db.init()?;
            println!("Database initialized at {}", db.path().display());
            if config.exists() {
                println!("Keeping existing config at {}", config.display());
            } else {
                std::fs::write(&config, EXAMPLE_CONFIG)
                    .with_context(|| format!("Failed to write {}", config.display()))?;
                println!("Example config written to {}; edit personal_info before running.", config.display());
            }
        }

        Commands::Analyze { cv, config, model } => {
            let config = load_config(&config)?;
            let (profile, suggestions) = analyze_cv(&cv, &config, model.as_deref()).await?;
            print_profile(&profile, &suggestions);
        }

        Commands::Run {
            cv,
            config,
            model,
            no_submit,
            headless,
            report,
            export,
        } => {
            run(&db, &cv, &config, model.as_deref(), no_submit, headless, &report, &export).await?;
        }

        Commands::Links {
            cv,
            config,
            model,
            output,
        } => {
            let config = load_config(&config)?;
            let (profile, suggestions) = analyze_cv(&cv, &config, model.as_deref()).await?;
            print_profile(&profile, &suggestions);

            let report = ManualReport::build(
                &profile,
                &suggestions,
                &config.locations(),
                &config.answers(&profile),
                &config.site,
            );
            report
                .write(&output)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("\n{} search links written to {}", report.links.len(), output.display());
        }

        Commands::List { status } => {
            db.ensure_initialized()?;
            let records = db.list_records(status)?;
            if records.is_empty() {
                println!("No applications found.");
            } else {
                println!("{:<6} {:<9} {:<30} {:<20} {:<20}", "ID", "STATUS", "TITLE", "COMPANY", "MISSING");
                println!("{}", "-".repeat(88));
                for r in records {
                    println!(
                        "{:<6} {:<9} {:<30} {:<20} {:<20}",
                        r.id,
                        r.status,
                        truncate(&r.title, 28),
                        truncate(&r.company, 18),
                        truncate(&r.missing_info.join(","), 20)
                    );
                }
            }
        }

        Commands::Show { id } => {
            db.ensure_initialized()?;
            match db.get_record(id)? {
                Some(r) => {
                    println!("Application #{}", r.id);
                    println!("Title: {}", r.title);
                    println!("Company: {}", r.company);
                    println!("Status: {}", r.status);
                    println!("URL: {}", r.url);
                    if let Some(location) = &r.location {
                        println!("Location: {}", location);
                    }
                    if let Some(source) = &r.source {
                        println!("Source: {}", source);
                    }
                    println!("Found: {}", r.created_at);
                    if let Some(at) = &r.applied_at {
                        println!("Applied: {}", at);
                    }
                    if !r.requirements.is_empty() {
                        println!("Requirements: {}", r.requirements.join(", "));
                    }
                    if !r.missing_info.is_empty() {
                        println!("Missing Information: {}", r.missing_info.join(", "));
                    }
                }
                None => {
                    println!("Application #{} not found.", id);
                }
            }
        }

        Commands::Report { output } => {
            db.ensure_initialized()?;
            db.export_report(&output)?;
            println!("Report with {} applications written to {}", db.count()?, output.display());
        }

        Commands::Browse { status } => {
            db.ensure_initialized()?;
            tui::run_browse(&db, status)?;
        }
    }

    Ok(())
}
