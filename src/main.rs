mod config;
mod controller;
mod error;
mod models;
mod service;
mod stats;
#[cfg(test)]
mod testing;
mod tui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Settings;
use controller::{Confirmation, RecordListController};
use error::{TrackerError, TrackerResult};
use models::{ApplicationRecord, ApplicationStatus, RecordId};
use service::{ApplicationService, HttpApplicationService};
use stats::{DashboardState, StatsDeriver};
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "applyday")]
#[command(about = "Track job applications and see how they convert")]
struct Cli {
    /// Base URL of the applications API (overrides config and APPLYDAY_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show counts and the conversion funnel
    Stats,

    /// List applications
    List,

    /// Show one application in full
    Show {
        /// Application ID
        id: String,
    },

    /// Record a new application
    Add {
        /// Company name
        #[arg(short, long)]
        company: String,

        /// Job title
        #[arg(short, long)]
        title: String,

        /// Job description
        #[arg(short, long)]
        description: Option<String>,

        /// Status (applied, interviewed, offered, rejected)
        #[arg(short, long, default_value = "applied")]
        status: ApplicationStatus,

        /// Notes about the current stage
        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Edit an application; only the given fields change
    Edit {
        /// Application ID
        id: String,

        #[arg(short, long)]
        company: Option<String>,

        #[arg(short, long)]
        title: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long)]
        status: Option<ApplicationStatus>,

        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Delete an application
    Delete {
        /// Application ID
        id: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Interactive dashboard
    Browse,
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_env("APPLYDAY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_file = matches!(cli.command, Commands::Browse).then(config::log_path);
    init_logging(log_file.as_deref())?;

    let mut settings = Settings::load()?;
    if let Some(url) = cli.api_url {
        settings.api_url = url;
    }
    let service = Arc::new(
        HttpApplicationService::new(&settings).context("Failed to build HTTP client")?,
    );
    tracing::debug!(api_url = %service.base_url(), "using applications API");

    match cli.command {
        Commands::Stats => {
            let mut dashboard = StatsDeriver::new(service);
            print_dashboard(dashboard.refresh().await)?;
        }

        Commands::List => {
            let controller = RecordListController::new(service);
            controller
                .initialize()
                .await
                .context("Failed to load applications")?;
            let applications = controller.snapshot().await.list;
            if applications.is_empty() {
                println!("No applications yet.");
            } else {
                println!("{} applications", applications.len());
                println!("{:<10} {:<12} {:<24} {:<30}", "ID", "STATUS", "COMPANY", "TITLE");
                println!("{}", "-".repeat(78));
                for app in applications {
                    println!(
                        "{:<10} {:<12} {:<24} {:<30}",
                        truncate(app.id.as_str(), 10),
                        app.status,
                        truncate(app.company.as_deref().unwrap_or(""), 22),
                        truncate(app.job_title.as_deref().unwrap_or(""), 28)
                    );
                }
            }
        }

        Commands::Show { id } => {
            let id = RecordId::new(id);
            let record = service
                .get_application(&id)
                .await
                .with_context(|| format!("Failed to fetch application {}", id))?;
            print_record(&record);
        }

        Commands::Add {
            company,
            title,
            description,
            status,
            notes,
        } => {
            let controller = RecordListController::new(service);
            controller.begin_create().await?;
            let fields = models::ApplicationFields {
                company,
                job_title: title,
                job_description: description.unwrap_or_default(),
                status,
                stage_notes: notes.unwrap_or_default(),
            };
            settle_mutation(controller.submit_create(fields).await, "create application")?;
            println!("Application created.");
        }

        Commands::Edit {
            id,
            company,
            title,
            description,
            status,
            notes,
        } => {
            let id = RecordId::new(id);
            let controller = RecordListController::new(service);
            controller
                .initialize()
                .await
                .context("Failed to load applications")?;
            controller
                .begin_edit(&id)
                .await
                .with_context(|| format!("Failed to open application {}", id))?;

            let mut fields = controller.snapshot().await.form.fields;
            if let Some(company) = company {
                fields.company = company;
            }
            if let Some(title) = title {
                fields.job_title = title;
            }
            if let Some(description) = description {
                fields.job_description = description;
            }
            if let Some(status) = status {
                fields.status = status;
            }
            if let Some(notes) = notes {
                fields.stage_notes = notes;
            }

            settle_mutation(
                controller.submit_update(fields).await,
                &format!("update application {}", id),
            )?;
            println!("Updated application {}.", id);
        }

        Commands::Delete { id, yes } => {
            let id = RecordId::new(id);
            let confirmation = if yes { Confirmation::Affirmed } else { prompt_confirmation()? };
            if confirmation == Confirmation::Declined {
                println!("Cancelled.");
                return Ok(());
            }

            let controller = RecordListController::new(service);
            settle_mutation(
                controller.delete_record(&id, confirmation).await,
                &format!("delete application {}", id),
            )?;
            println!("Deleted application {}.", id);
        }

        Commands::Browse => {
            let controller = RecordListController::new(service.clone());
            let dashboard = StatsDeriver::new(service);
            tui::run_browse(controller, dashboard).await?;
        }
    }

    Ok(())
}

fn print_dashboard(state: &DashboardState) -> Result<()> {
    match state {
        DashboardState::Ready { snapshot, funnel } => {
            println!(
                "{:>8} {:>8} {:>12} {:>8} {:>9}",
                "TOTAL", "APPLIED", "INTERVIEWED", "OFFERED", "REJECTED"
            );
            println!(
                "{:>8} {:>8} {:>12} {:>8} {:>9}",
                snapshot.total,
                snapshot.applied,
                snapshot.interviewed,
                snapshot.offered,
                snapshot.rejected
            );
            println!("\nApplication Conversion Funnel");
            println!("{}", "-".repeat(49));
            for stage in &funnel.stages {
                let filled = (stage.percentage_of_applied.min(100.0) / 100.0 * 20.0).round() as usize;
                println!(
                    "{:<12} {:<20} {:>5} ({:.1}%)",
                    stage.label.to_string(),
                    "#".repeat(filled),
                    stage.raw_count,
                    stage.percentage_of_applied
                );
            }
            println!(
                "\nOverall conversion rate: {:.1}% (offered / applied x 100)",
                funnel.overall_conversion_pct
            );
        }
        DashboardState::Failed(msg) => {
            anyhow::bail!("Error loading dashboard: {}", msg);
        }
        DashboardState::Loading => anyhow::bail!("Dashboard is still loading"),
    }
    Ok(())
}

/// A mutation whose follow-up list reload failed still succeeded; say so
/// instead of reporting it as a failure the user might retry.
fn settle_mutation(result: TrackerResult<()>, action: &str) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(TrackerError::ReloadFailed(reason)) => {
            tracing::warn!(action, error = %reason, "list reload failed after change");
            eprintln!("Warning: change saved, but the list could not be refreshed: {}", reason);
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context(format!("Failed to {}", action))),
    }
}

fn prompt_confirmation() -> Result<Confirmation> {
    print!("Are you sure deleting this record? [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(parse_confirmation(&answer))
}

fn parse_confirmation(answer: &str) -> Confirmation {
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" => Confirmation::Affirmed,
        _ => Confirmation::Declined,
    }
}

fn print_record(record: &ApplicationRecord) {
    println!("Application #{}", record.id);
    println!("Company: {}", record.company.as_deref().unwrap_or(""));
    println!("Title: {}", record.job_title.as_deref().unwrap_or(""));
    println!("Status: {}", record.status);
    if let Some(notes) = record.stage_notes.as_deref().filter(|n| !n.is_empty()) {
        println!("Stage notes: {}", notes);
    }
    let description = record.description_text();
    if !description.is_empty() {
        println!("\n--- Description ---\n{}", description);
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_add() {
        let cli = Cli::try_parse_from([
            "applyday", "add", "--company", "Acme", "--title", "Engineer", "--status", "interviewed",
        ])
        .unwrap();
        match cli.command {
            Commands::Add { company, status, description, .. } => {
                assert_eq!(company, "Acme");
                assert_eq!(status, ApplicationStatus::Interviewed);
                assert!(description.is_none());
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn test_cli_global_api_url() {
        let cli = Cli::try_parse_from(["applyday", "list", "--api-url", "http://example.test"]).unwrap();
        assert_eq!(cli.api_url.as_deref(), Some("http://example.test"));
    }

    #[test]
    fn test_cli_edit_only_given_fields() {
        let cli = Cli::try_parse_from(["applyday", "edit", "7", "-s", "offered"]).unwrap();
        match cli.command {
            Commands::Edit { id, status, company, .. } => {
                assert_eq!(id, "7");
                assert_eq!(status, Some(ApplicationStatus::Offered));
                assert!(company.is_none());
            }
            _ => panic!("expected edit"),
        }
    }

    #[test]
    fn test_parse_confirmation() {
        assert_eq!(parse_confirmation("y\n"), Confirmation::Affirmed);
        assert_eq!(parse_confirmation(" YES "), Confirmation::Affirmed);
        assert_eq!(parse_confirmation("\n"), Confirmation::Declined);
        assert_eq!(parse_confirmation("nope"), Confirmation::Declined);
    }

    #[test]
    fn test_settle_mutation_reload_failure_is_success() {
        let reload = TrackerError::NetworkFailure("timeout".to_string());
        let result = Err(TrackerError::ReloadFailed(Box::new(reload)));
        assert!(settle_mutation(result, "create application").is_ok());
        assert!(settle_mutation(Ok(()), "create application").is_ok());
    }

    #[test]
    fn test_settle_mutation_real_failure_keeps_context() {
        let err = settle_mutation(
            Err(TrackerError::ValidationFailure("company is required".to_string())),
            "create application",
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Failed to create application");
        assert_eq!(
            err.root_cause().to_string(),
            "validation failed: company is required"
        );
    }

    #[tokio::test]
    async fn test_add_with_failed_reload_reports_saved() {
        use crate::testing::{fields, FakeService};

        let service = FakeService::new();
        service.fail("list", TrackerError::NetworkFailure("flaky".to_string()));
        let controller = RecordListController::new(Arc::new(service.clone()));
        controller.begin_create().await.unwrap();

        let result = controller.submit_create(fields("Initech", "Developer")).await;
        assert!(settle_mutation(result, "create application").is_ok());
        assert_eq!(service.records().len(), 1);
    }

    #[test]
    fn test_print_dashboard_loading_is_error() {
        let err = print_dashboard(&DashboardState::Loading).unwrap_err();
        assert_eq!(err.to_string(), "Dashboard is still loading");
        assert!(print_dashboard(&DashboardState::Failed("down".to_string())).is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Acme", 10), "Acme");
        assert_eq!(truncate("Very Long Company Name", 10), "Very Lo...");
        assert_eq!(truncate("Zürich Versicherung", 8), "Züric...");
    }
}
