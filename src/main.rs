use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

mod aggregate;
mod db;
mod models;
mod report;

#[derive(Parser)]
#[command(name = "feedback-360")]
#[command(about = "Anonymity-preserving 360° feedback reports", long_about = None)]
struct Cli {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,
    #[arg(long, env = "FEEDBACK_MAX_CONNECTIONS", default_value_t = 5)]
    max_connections: u32,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    Markdown,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import completed responses from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Rank reviewees in a cycle by overall score
    Score {
        #[arg(long)]
        cycle: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Generate one reviewee's feedback report
    Report {
        #[arg(long)]
        cycle: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[arg(long, value_enum, default_value_t = ReportFormat::Markdown)]
        format: ReportFormat,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn load_report(
    pool: &PgPool,
    cycle: &models::Cycle,
    questions: &[models::Question],
    reviewee: &models::Reviewee,
) -> anyhow::Result<report::RevieweeReport> {
    let responses = db::fetch_responses(pool, cycle.id, reviewee.id)
        .await
        .with_context(|| format!("failed to load responses for {}", reviewee.email))?;
    Ok(report::build_reviewee_report(cycle, reviewee, questions, &responses))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let pool = PgPoolOptions::new()
        .max_connections(cli.max_connections)
        .connect(&cli.database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            tracing::info!("schema ready");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            tracing::info!("seed data inserted");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            tracing::info!(inserted, path = %csv.display(), "imported responses");
        }
        Commands::Score { cycle, limit } => {
            let cycle = db::fetch_cycle(&pool, &cycle).await?;
            let questions = db::fetch_questions(&pool, cycle.id).await?;
            let reviewees = db::fetch_reviewees(&pool, cycle.id).await?;

            let mut reports = Vec::with_capacity(reviewees.len());
            for reviewee in &reviewees {
                reports.push(load_report(&pool, &cycle, &questions, reviewee).await?);
            }
            let scores = report::rank_reviewees(&reports);

            if scores.is_empty() {
                println!("No completed responses in cycle {}.", cycle.name);
                return Ok(());
            }

            println!("Overall scores for {}:", cycle.name);
            for score in scores.iter().take(limit) {
                match score.overall {
                    Some(overall) => println!(
                        "- {} ({}) score {:.2} across {} visible categories",
                        score.reviewee_name,
                        score.reviewee_email,
                        overall.score,
                        score.visible_categories
                    ),
                    None => println!(
                        "- {} ({}) not enough data",
                        score.reviewee_name, score.reviewee_email
                    ),
                }
            }
        }
        Commands::Report {
            cycle,
            email,
            out,
            format,
        } => {
            let cycle = db::fetch_cycle(&pool, &cycle).await?;
            let questions = db::fetch_questions(&pool, cycle.id).await?;
            let reviewee = db::fetch_reviewee(&pool, &email).await?;
            let report = load_report(&pool, &cycle, &questions, &reviewee).await?;

            let rendered = match format {
                ReportFormat::Markdown => report::render_markdown(&report),
                ReportFormat::Json => report::render_json(&report)?,
            };
            std::fs::write(&out, rendered)
                .with_context(|| format!("failed to write {}", out.display()))?;
            tracing::info!(path = %out.display(), reviewee = %reviewee.email, "report written");
        }
    }

    Ok(())
}
