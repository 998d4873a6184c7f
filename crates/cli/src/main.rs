//! # hyd - swamp storage command line
//!
//! Thin binary over the library crates:
//!
//! ```text
//! hyd migrate --data-path DIR [--dry-run] [--verify] [--delete-old]
//!             [--parallel N] [--stop-on-error] [--json]
//! hyd inspect FILE.hyd
//! hyd compact FILE.hyd [--threshold T] [--max-block-size N]
//! ```
//!
//! `migrate` prints a human summary (or the full JSON report with `--json`)
//! and exits non-zero iff any swamp failed. Stop the database service
//! before migrating: the run assumes exclusive access to the data tree.
//!
//! Logging goes through `env_logger`; progress lines land at `info` and can
//! be silenced with `RUST_LOG=warn`.

use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};
use migrate::{MigrateOptions, MigrationReport, Migrator};

fn app() -> Command {
    Command::new("hyd")
        .about("swamp storage tools: V1->V2 migration and .hyd maintenance")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("migrate")
                .about("convert V1 swamp folders into V2 .hyd files")
                .arg(
                    Arg::new("data-path")
                        .long("data-path")
                        .value_name("DIR")
                        .required(true)
                        .help("root directory to scan for V1 swamp folders"),
                )
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("parse and count only; write and delete nothing"),
                )
                .arg(
                    Arg::new("verify")
                        .long("verify")
                        .action(ArgAction::SetTrue)
                        .help("reopen each new file and check every source key"),
                )
                .arg(
                    Arg::new("delete-old")
                        .long("delete-old")
                        .action(ArgAction::SetTrue)
                        .help("remove each V1 folder after successful migration"),
                )
                .arg(
                    Arg::new("parallel")
                        .long("parallel")
                        .value_name("N")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("4")
                        .help("worker-pool size"),
                )
                .arg(
                    Arg::new("stop-on-error")
                        .long("stop-on-error")
                        .action(ArgAction::SetTrue)
                        .help("abort the run at the first failed swamp"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("emit the full report as JSON instead of a summary"),
                ),
        )
        .subcommand(
            Command::new("inspect")
                .about("print header, index size and fragmentation of a .hyd file")
                .arg(Arg::new("file").value_name("FILE").required(true)),
        )
        .subcommand(
            Command::new("compact")
                .about("rewrite a .hyd file when fragmentation meets the threshold")
                .arg(Arg::new("file").value_name("FILE").required(true))
                .arg(
                    Arg::new("threshold")
                        .long("threshold")
                        .value_name("RATIO")
                        .value_parser(clap::value_parser!(f64))
                        .default_value("0.5"),
                )
                .arg(
                    Arg::new("max-block-size")
                        .long("max-block-size")
                        .value_name("BYTES")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("65536"),
                ),
        )
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = app().get_matches();
    match matches.subcommand() {
        Some(("migrate", m)) => cmd_migrate(m),
        Some(("inspect", m)) => cmd_inspect(m),
        Some(("compact", m)) => cmd_compact(m),
        _ => unreachable!("subcommand is required"),
    }
}

fn cmd_migrate(m: &ArgMatches) -> Result<()> {
    let mut options = MigrateOptions::new(m.get_one::<String>("data-path").expect("required"));
    options.dry_run = m.get_flag("dry-run");
    options.verify = m.get_flag("verify");
    options.delete_old = m.get_flag("delete-old");
    options.parallel = *m.get_one::<usize>("parallel").expect("has default");
    options.stop_on_error = m.get_flag("stop-on-error");

    let report = Migrator::new(options)?.run()?;

    if m.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_summary(&report));
    }

    if !report.succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

/// Renders the human-readable run summary.
fn render_summary(report: &MigrationReport) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out, "migration summary{}", if report.dry_run { " (dry run)" } else { "" });
    let _ = writeln!(
        out,
        "  swamps:   {} found, {} processed, {} successful, {} empty-skipped, {} failed",
        report.total_swamps,
        report.processed_swamps,
        report.successful_swamps,
        report.empty_skipped,
        report.failed.len()
    );
    let _ = writeln!(
        out,
        "  entries:  {} raw, {} migrated, {} duplicates removed",
        report.total_raw_entries, report.total_entries, report.duplicate_keys
    );
    let _ = writeln!(
        out,
        "  bytes:    {} old -> {} new",
        report.old_bytes, report.new_bytes
    );
    let _ = writeln!(out, "  duration: {} ms", report.duration_ms);

    if report.failed.is_empty() {
        let _ = writeln!(out, "all swamps migrated successfully");
    } else {
        let _ = writeln!(out, "failed swamps:");
        for f in &report.failed {
            let _ = writeln!(out, "  {} [{}]: {}", f.swamp, f.phase, f.error);
        }
        let _ = writeln!(
            out,
            "{} swamp(s) failed; inspect the errors above and re-run",
            report.failed.len()
        );
    }
    out
}

fn cmd_inspect(m: &ArgMatches) -> Result<()> {
    let path = m.get_one::<String>("file").expect("required");
    let mut reader = hydfile::FileReader::open(path)?;

    let header = reader.header();
    println!("file:            {}", path);
    println!("format version:  {}", header.version);
    println!("created:         {} ns since epoch", header.created_at_nanos);
    println!("modified:        {} ns since epoch", header.modified_at_nanos);
    println!("blocks:          {}", header.block_count);
    println!("entries:         {}", header.entry_count);

    let (index, swamp_name) = reader.load_index()?;
    println!("swamp name:      {}", swamp_name.as_deref().unwrap_or("(none)"));
    println!("live keys:       {}", index.len());

    let (ratio, live, total) = reader.fragmentation()?;
    println!(
        "fragmentation:   {:.3} ({} live of {} entries)",
        ratio, live, total
    );
    Ok(())
}

fn cmd_compact(m: &ArgMatches) -> Result<()> {
    let path = m.get_one::<String>("file").expect("required");
    let threshold = *m.get_one::<f64>("threshold").expect("has default");
    let max_block_size = *m.get_one::<usize>("max-block-size").expect("has default");

    let compactor = hydfile::Compactor::new(path, max_block_size, threshold)?;
    let result = compactor.compact()?;

    if result.compacted {
        println!(
            "compacted {}: {} -> {} bytes, {} entries removed (fragmentation was {:.3})",
            path, result.old_file_size, result.new_file_size, result.removed_entries,
            result.fragmentation
        );
    } else {
        println!(
            "skipped {}: fragmentation {:.3} below threshold {:.3}",
            path, result.fragmentation, threshold
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use migrate::{FailedSwamp, Phase};

    fn sample_report() -> MigrationReport {
        MigrationReport {
            started_at_ms: 1,
            finished_at_ms: 2,
            duration_ms: 1500,
            total_swamps: 3,
            processed_swamps: 3,
            successful_swamps: 2,
            empty_skipped: 1,
            total_raw_entries: 10,
            total_entries: 8,
            duplicate_keys: 2,
            old_bytes: 4096,
            new_bytes: 2048,
            failed: vec![],
            dry_run: false,
        }
    }

    #[test]
    fn summary_reports_success_banner() {
        let out = render_summary(&sample_report());
        assert!(out.contains("3 found, 3 processed, 2 successful"));
        assert!(out.contains("10 raw, 8 migrated, 2 duplicates removed"));
        assert!(out.contains("all swamps migrated successfully"));
        assert!(!out.contains("dry run"));
    }

    #[test]
    fn summary_lists_failures_with_phase() {
        let mut report = sample_report();
        report.failed.push(FailedSwamp {
            swamp: "/data/a1/bad".into(),
            phase: Phase::Verify,
            error: "key \"k\" missing from the new index".into(),
        });
        let out = render_summary(&report);
        assert!(out.contains("/data/a1/bad [verify]: key"));
        assert!(out.contains("1 swamp(s) failed; inspect the errors above and re-run"));
    }

    #[test]
    fn summary_marks_dry_runs() {
        let mut report = sample_report();
        report.dry_run = true;
        assert!(render_summary(&report).contains("(dry run)"));
    }

    #[test]
    fn argument_tree_is_well_formed() {
        app().debug_assert();
    }
}
