//! The binary entrypoint for `fab`, a content-addressed build orchestrator.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{self, Context};
use color_eyre::Result;
use tracing::instrument;
use tracing_subscriber::util::SubscriberInitExt;
use tokio_util::sync::CancellationToken;

// Since this is a binary crate, these modules stay private so the compiler
// can correctly warn about dead code:
// https://github.com/rust-lang/rust/issues/74970
mod log;

#[derive(Clone, Debug, Parser)]
#[command(name = "fab", about = "A content-addressed, concurrent build orchestrator")]
struct Flags {
    /// Project root: target paths, the YAML manifest, and the hash
    /// database are all resolved relative to this directory.
    #[arg(long = "fab-dir", env = "FAB_DIR", default_value = ".")]
    fab_dir: PathBuf,

    /// YAML manifest to load, relative to `--fab-dir` unless absolute.
    #[arg(long = "file", short = 'y', default_value = "fab.yaml")]
    file: PathBuf,

    /// Print diagnostic output from targets that would otherwise be
    /// captured, and echo the scheduler's "running" log lines.
    #[arg(short, long)]
    verbose: bool,

    /// List every registered target and its doc string, then exit.
    #[arg(long)]
    list: bool,

    /// Ignore the hash database: every `Files` target is treated as
    /// out of date.
    #[arg(short, long)]
    force: bool,

    /// Report what would run, without running it.
    #[arg(short = 'n', long = "dry-run")]
    dry_run: bool,

    /// When to colorize log output.
    #[arg(long, value_enum, default_value_t = log::WhenColor::Auto)]
    color: log::WhenColor,

    /// Target name, optionally followed by `-`-prefixed arguments passed
    /// through to it (spec: at most one recognized target name followed by
    /// flag-shaped arguments resolves to an `ArgTarget`).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[instrument(skip(flags))]
async fn run(flags: Flags) -> Result<()> {
    let fab_dir = flags
        .fab_dir
        .canonicalize()
        .with_context(|| format!("resolve --fab-dir {:?}", flags.fab_dir))?;

    let hashdb = fab::hashdb::SqliteHashDb::open(fab_dir.join(".fab"))
        .map(|db| Arc::new(db) as Arc<dyn fab::hashdb::HashDb>)
        .with_context(|| format!("open hash database under {:?}", fab_dir.join(".fab")))?;

    let controller = fab::controller::Controller::new(&fab_dir);

    let manifest = if flags.file.is_absolute() {
        flags.file.clone()
    } else {
        fab_dir.join(&flags.file)
    };
    if manifest.exists() {
        fab::yaml::load_file(&manifest, &controller)
            .await
            .with_context(|| format!("load manifest {manifest:?}"))?;
    } else if flags.list || !flags.args.is_empty() {
        return Err(eyre::eyre!("manifest {manifest:?} not found"));
    }

    if flags.list {
        controller.list_targets();
        return Ok(());
    }

    let mut ctx = fab::context::Ctx::new(Some(hashdb));
    ctx.verbose = flags.verbose;
    ctx.force = flags.force;
    ctx.dry_run = flags.dry_run;
    ctx.cancel = CancellationToken::new();

    let targets = controller
        .parse_args(&flags.args)
        .context("resolve target arguments")?;
    if targets.is_empty() {
        return Err(eyre::eyre!(
            "no target specified; pass a target name or --list to see what's available"
        ));
    }

    let cancel_on_ctrl_c = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_on_ctrl_c.cancel();
        }
    });

    controller.run(&ctx, &targets).await.context("run targets")
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let flags = Flags::parse();
    let logger = log::make_logger(flags.color)?;
    logger.init();
    run(flags).await
}
