use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
};

use clap::{Args, Parser, Subcommand, ValueEnum};

use testforge::{
    config::{Config, TempArtifactPolicy},
    host::{CommandBuildHost, CommandTestHost},
    llm::backend::LlmBackend,
    logger::{init_tracing, ProgressSink},
    persistence::{JsonResultStore, ResultStore},
    state::{LogLevel, ProgressEvent},
    testgen::{
        batch::generate_all, orchestrator::GenerationOrchestrator, parser::list_testable_members,
        request::RequestKind,
    },
};

#[derive(Parser)]
#[command(
    name = "testforge",
    version,
    about = "Generate, compile, repair and run regression tests with a language model."
)]
struct Cli {
    /// Project root (overrides the config file)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Generate one test per selector for a target unit
    Generate(GenerateArgs),
    /// List the members of a target unit that tests can be generated for
    Members {
        #[arg(long)]
        target: PathBuf,
    },
    /// Print the recorded test results for this project
    Records,
    /// Drop records that reference a deleted file
    Prune { path: PathBuf },
}

#[derive(Args)]
struct GenerateArgs {
    #[arg(long, help = "Source file the tests are generated for")]
    target: PathBuf,

    #[arg(long, value_enum, default_value_t = KindArg::Unit)]
    kind: KindArg,

    #[arg(
        required = true,
        help = "Method names, lifecycle hooks, or scenario descriptions"
    )]
    selectors: Vec<String>,

    #[arg(
        long = "related",
        value_name = "MEMBER",
        help = "Member of the target the tests may also rely on (repeatable)"
    )]
    related: Vec<String>,

    #[arg(long, default_value_t = false, help = "Keep temporary build artifacts")]
    keep_temp: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Unit,
    Behavior,
    Integration,
}

impl From<KindArg> for RequestKind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::Unit => RequestKind::UnitMethod,
            KindArg::Behavior => RequestKind::BehaviorLifecycle,
            KindArg::Integration => RequestKind::Integration,
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    let cli = Cli::parse();
    let mut cfg = Config::load()?;
    if let Some(root) = cli.root {
        cfg.project_root = root;
    }

    match cli.command {
        CliCommand::Generate(args) => run_generate(&cfg, args),
        CliCommand::Members { target } => run_members(&cfg, &target),
        CliCommand::Records => run_records(&cfg),
        CliCommand::Prune { path } => run_prune(&cfg, &path),
    }
}

fn run_generate(cfg: &Config, args: GenerateArgs) -> Result<(), Box<dyn Error>> {
    let target = cfg.project_path(&args.target);
    let source = fs::read_to_string(&target)?;

    let mut cfg = cfg.clone();
    if args.keep_temp {
        cfg.temp_artifact_policy = TempArtifactPolicy::Keep;
    }

    let service = Arc::new(LlmBackend::from_config(&cfg)?);
    let store = Arc::new(JsonResultStore::new(cfg.records_file()));

    let (tx, rx) = crossbeam_channel::unbounded::<ProgressEvent>();
    let printer = thread::spawn(move || {
        for ev in rx {
            let tag = match ev.level {
                LogLevel::Info => "..",
                LogLevel::Success => "ok",
                LogLevel::Warn => "!!",
                LogLevel::Error => "xx",
            };
            println!("[{tag}] {}: {}", ev.step, ev.message);
        }
    });

    let mut orch = GenerationOrchestrator::new(
        &cfg,
        service,
        Arc::new(CommandBuildHost::from_config(&cfg)),
        Arc::new(CommandTestHost::from_config(&cfg)),
        store,
    )
    .with_progress(ProgressSink::new(tx));

    let results = generate_all(
        &mut orch,
        &target,
        &source,
        args.kind.into(),
        &args.selectors,
        &args.related,
    );
    drop(orch);
    let _ = printer.join();

    println!();
    for r in &results {
        match &r.outcome {
            Ok(o) => println!(
                "{:<40} {:<6} {}",
                r.selector,
                if o.passed { "PASS" } else { "FAIL" },
                o.generated_test
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            ),
            Err(e) => println!("{:<40} ERROR  {e}", r.selector),
        }
    }

    let passed = results.iter().filter(|r| r.passed()).count();
    println!("\n{passed}/{} scenarios produced a passing test", results.len());
    Ok(())
}

fn run_members(cfg: &Config, target: &Path) -> Result<(), Box<dyn Error>> {
    let source = fs::read_to_string(cfg.project_path(target))?;
    for m in list_testable_members(&source) {
        println!("{:<10} {}", m.kind.label(), m.name);
    }
    Ok(())
}

fn run_records(cfg: &Config) -> Result<(), Box<dyn Error>> {
    let store = JsonResultStore::new(cfg.records_file());
    let records = store.records()?;
    if records.is_empty() {
        println!("no records in {}", store.path().display());
        return Ok(());
    }

    for r in records {
        let generated = r
            .generated
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(pending)".to_string());
        println!(
            "{} {:<5} {} :: {} -> {}",
            r.last_updated.format("%Y-%m-%d %H:%M:%S"),
            if r.passed_in_last_execution { "pass" } else { "fail" },
            r.target.display(),
            r.scenario,
            generated
        );
    }
    Ok(())
}

fn run_prune(cfg: &Config, path: &Path) -> Result<(), Box<dyn Error>> {
    let store = JsonResultStore::new(cfg.records_file());
    let removed = store.remove_referencing(&cfg.project_path(path))?;
    println!("removed {removed} record(s)");
    Ok(())
}
