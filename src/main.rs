use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

mod db;
mod error;
mod features;
mod forest;
mod graph;
mod models;
mod recommend;
mod report;

#[derive(Parser)]
#[command(name = "chapter-mastery")]
#[command(about = "Chapter mastery tracking and study recommendations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a sample curriculum, roster, and grades
    Seed,
    /// Import grades from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Record or replace a single grade
    Grade {
        #[arg(long)]
        email: String,
        #[arg(long)]
        chapter: String,
        #[arg(long)]
        score: f64,
        /// Defaults to today
        #[arg(long)]
        recorded_at: Option<NaiveDate>,
    },
    /// Study recommendations for one student
    Recommend {
        #[arg(long)]
        email: String,
        /// Emit the {chapter_id: label} map as JSON
        #[arg(long)]
        json: bool,
    },
    /// Classify a single score on the 0-100 scale
    Categorize {
        #[arg(long)]
        score: f64,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        class: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chapter_mastery=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    // The category policy is pure; no store needed.
    if let Commands::Categorize { score } = &cli.command {
        let score = *score;
        anyhow::ensure!(
            score.is_finite() && (0.0..=100.0).contains(&score),
            "score must be a number between 0 and 100, got {score}"
        );
        println!("{}", models::Category::from_score(score).label());
        return Ok(());
    }

    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Imported {inserted} grades from {}.", csv.display());
        }
        Commands::Grade {
            email,
            chapter,
            score,
            recorded_at,
        } => {
            let recorded_at = recorded_at.unwrap_or_else(|| Utc::now().date_naive());
            db::upsert_grade(&pool, &email, &chapter, score, recorded_at).await?;
            println!("Recorded {chapter} = {score} for {email}.");
        }
        Commands::Recommend { email, json } => {
            let snapshot = db::fetch_snapshot(&pool).await?;
            let student = snapshot
                .students
                .iter()
                .find(|student| student.email == email)
                .with_context(|| format!("no student with email {email}"))?;
            let verdicts = recommend::recommend(&snapshot, student.id)?;

            if json {
                let map: BTreeMap<String, models::Verdict> = verdicts
                    .iter()
                    .map(|(chapter_id, verdict)| (chapter_id.to_string(), *verdict))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&map)?);
            } else {
                let graph =
                    graph::DependencyGraph::from_snapshot(&snapshot.chapters, &snapshot.edges)?;
                println!("Recommendations for {email}:");
                for chapter in graph.topological_order(&snapshot.chapters) {
                    if let Some(verdict) = verdicts.get(&chapter.id) {
                        println!("- {}: {}", chapter.name, verdict.label());
                    }
                }
            }
        }
        Commands::Report { class, out } => {
            let snapshot = db::fetch_snapshot(&pool).await?;
            let today = Utc::now().date_naive();
            let report = report::build_report(&snapshot, class.as_deref(), today)?;
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Categorize { .. } => unreachable!("handled above"),
    }

    Ok(())
}
