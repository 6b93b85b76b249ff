use anyhow::{anyhow, bail, Context};
use clap::{Parser, ValueEnum};
use courseimport::diag::{Ctx, Diag};
use courseimport::import::{BatchReport, DuplicateKey, ImportConfig};
use courseimport::{db, extract, import};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Imports course-descriptor XML exports into the local catalogue database.
#[derive(Debug, Parser)]
#[command(name = "courseimport", version)]
struct Args {
    /// Directory containing the exported XML documents (one per
    /// organizational unit).
    input_path: PathBuf,

    /// SQLite catalogue database (created if missing).
    #[arg(long, default_value = "catalogue.sqlite3")]
    db: PathBuf,

    /// Language tag recorded on translated text fields.
    #[arg(long, default_value = "sk")]
    lang: String,

    /// Only import records whose course code contains this substring.
    #[arg(long)]
    filter: Option<String>,

    /// Full name of the importing user; must match exactly one person
    /// record.
    #[arg(long)]
    user: String,

    /// What identifies a course for duplicate detection.
    #[arg(long, value_enum, default_value_t = DupKeyArg::Code)]
    dup_key: DupKeyArg,

    /// Run every parsing and import step, then discard instead of
    /// committing.
    #[arg(long)]
    dry_run: bool,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    json_summary: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DupKeyArg {
    Code,
    CodeOrgUnit,
}

#[derive(Debug, Default, Serialize)]
struct RunReport {
    files: usize,
    records: usize,
    #[serde(flatten)]
    batches: BatchReport,
    warnings: Vec<String>,
    notes: Vec<String>,
    committed: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut conn = db::open_db(&args.db)
        .with_context(|| format!("failed to open database {}", args.db.display()))?;

    // Pre-flight: the importing user must resolve before any record is
    // touched.
    let user_id = import::resolve_importing_user(&conn, &args.user)?;

    let pattern = args.input_path.join("*.xml");
    let pattern = pattern
        .to_str()
        .ok_or_else(|| anyhow!("input path is not valid UTF-8"))?;
    let mut files: Vec<PathBuf> = glob::glob(pattern)?.collect::<Result<_, _>>()?;
    files.sort();
    if files.is_empty() {
        bail!("no XML documents match {}", pattern);
    }

    let cfg = ImportConfig {
        code_filter: args.filter.clone(),
        duplicate_key: match args.dup_key {
            DupKeyArg::Code => DuplicateKey::Code,
            DupKeyArg::CodeOrgUnit => DuplicateKey::CodeAndOrgUnit,
        },
    };

    let ctx = Ctx::new();
    let mut diag = Diag::new();
    let mut report = RunReport {
        files: files.len(),
        ..RunReport::default()
    };

    let tx = conn.transaction()?;
    for file in &files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file.display().to_string());
        info!("processing {}", file.display());
        let fctx = ctx.with("file", name.as_str());

        let text = std::fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        let records = extract::extract_records(&text, &args.lang, &fctx, &mut diag)
            .with_context(|| format!("in {}", name))?;
        info!("found {} course descriptors", records.len());
        report.records += records.len();

        let batch = import::import_batch(&tx, &records, &cfg, &user_id, &fctx, &mut diag)?;
        report.batches.merge(&batch);
    }

    if args.dry_run {
        tx.rollback()?;
        report.committed = false;
        info!(
            "dry run: {} record(s) across {} file(s) processed, nothing committed",
            report.records, report.files
        );
    } else {
        tx.commit()?;
        report.committed = true;
        info!(
            "done: imported {} course(s), skipped {} duplicate(s), {} warning(s)",
            report.batches.imported,
            report.batches.skipped_duplicates,
            diag.warnings().len()
        );
    }

    report.warnings = diag.warnings().to_vec();
    report.notes = diag.notes().to_vec();
    if args.json_summary {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}
