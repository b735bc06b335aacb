use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use visit_report::config::{
    DEFAULT_MEMBERS_PATH, DEFAULT_OUTPUT_PATH, DEFAULT_SUMMARY_PATH, DEFAULT_VISITS_PATH,
};
use visit_report::{run_pipeline, PipelinePaths, RunOptions, RunOutcome, DEFAULT_TOP_N};

/// Visits-per-member report generator
#[derive(Parser, Debug)]
#[command(name = "visit-report")]
#[command(about = "Group member visits and write the CSV export + JSON summary")]
#[command(version)]
struct Args {
    /// Members CSV (member_id, barcode)
    #[arg(long, default_value = DEFAULT_MEMBERS_PATH, env = "VISIT_REPORT_MEMBERS")]
    members: PathBuf,

    /// Visits CSV (visit_id, barcode[, reservation_id])
    #[arg(long, default_value = DEFAULT_VISITS_PATH, env = "VISIT_REPORT_VISITS")]
    visits: PathBuf,

    /// Where to write the member -> visits export
    #[arg(long, default_value = DEFAULT_OUTPUT_PATH, env = "VISIT_REPORT_OUTPUT")]
    output: PathBuf,

    /// Where to write the JSON summary (served by visit-server)
    #[arg(long, default_value = DEFAULT_SUMMARY_PATH, env = "VISIT_REPORT_SUMMARY")]
    summary: PathBuf,

    /// Number of members in the ranking
    #[arg(long, default_value_t = DEFAULT_TOP_N, env = "VISIT_REPORT_TOP_N")]
    top_n: usize,

    /// Log filter when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", env = "VISIT_REPORT_LOG_LEVEL")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let paths = PipelinePaths::new(args.members, args.visits, args.output, args.summary);
    let options = RunOptions { top_n: args.top_n };

    let outcome = run_pipeline(&paths, &options).context("Report run failed")?;

    print_report(&paths, &options, &outcome);

    Ok(())
}

fn print_report(paths: &PipelinePaths, options: &RunOptions, outcome: &RunOutcome) {
    let summary = &outcome.summary;

    println!("--------------------------------------------");
    println!("Top {} members by visits:", options.top_n);
    for member in &summary.top_members {
        println!("{}, {}", member.member_id, member.visit_count);
    }
    println!("--------------------------------------------");
    println!("Total walk-ins: {}", summary.total_walk_ins);
    println!("--------------------------------------------");
    println!(
        "✓ {} valid visits, {} unknown barcodes, {} rows skipped",
        summary.total_valid_visits,
        summary.total_unknown_barcodes,
        outcome.member_issues.len() + outcome.visit_issues.len()
    );
    println!("✓ Export:  {}", paths.output.display());
    println!("✓ Summary: {}", paths.summary.display());
}
