// src/lib.rs

pub mod backend;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod session;
pub mod task;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::backend::build_adapters;
use crate::cli::{CliArgs, Command};
use crate::config::{load_and_validate, ConfigFile};
use crate::dispatch::Dispatcher;
use crate::engine::{dispatch_limits_from_config, Engine, EngineOptions, ProgressReport};
use crate::session::{Session, SessionStore};
use crate::task::{ResourceRequirements, TaskSpec};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - adapter construction + dispatcher
/// - session store + lock
/// - the engine loop
pub async fn run(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Init {
            session,
            max_retries,
        } => init_session(&session, max_retries),
        Command::Add {
            session,
            name,
            output_dir,
            cores,
            runtime_tag,
            command,
        } => add_task(&session, name, output_dir, cores, runtime_tag, command),
        Command::Run { session, cycles } => {
            let cfg = load_and_validate(&args.config)?;
            let report = run_session(&session, &cfg, cycles).await?;
            println!("{report}");
            if report.all_terminal() && report.failed > 0 {
                bail!("{} of {} tasks failed", report.failed, report.total);
            }
            Ok(())
        }
        Command::Status { session } => {
            let store = SessionStore::open(&session);
            let session = store.load()?;
            println!("{}", ProgressReport::from_session(&session));
            Ok(())
        }
        Command::Abort { session } => {
            let cfg = load_and_validate(&args.config)?;
            let report = abort_session(&session, &cfg).await?;
            println!("{report}");
            Ok(())
        }
    }
}

fn init_session(dir: &Path, max_retries: u32) -> Result<()> {
    let store = SessionStore::open(dir);
    if store.exists() {
        bail!("session already exists at {}", dir.display());
    }
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("session directory needs a name")?;
    store.create(&Session::new(&name, max_retries))?;
    info!(session = %name, max_retries, "session created");
    Ok(())
}

fn add_task(
    dir: &Path,
    name: String,
    output_dir: PathBuf,
    cores: u32,
    runtime_tag: Option<String>,
    command: Vec<String>,
) -> Result<()> {
    let store = SessionStore::open(dir);
    let _lock = store.lock()?;
    let mut session = store.load()?;
    let id = session.add_task(TaskSpec {
        name,
        command,
        requirements: ResourceRequirements {
            cores,
            runtime_tag,
            ..Default::default()
        },
        output_dir,
    })?;
    store.save(&session)?;
    info!(task = %id, session = %session.name(), "task added");
    Ok(())
}

fn build_engine(dir: &Path, cfg: &ConfigFile) -> Result<Engine> {
    let adapters = build_adapters(&cfg.adapter, cfg.engine.on_init_failure)?;
    let dispatcher = Dispatcher::new(adapters, dispatch_limits_from_config(&cfg.engine));
    let store = SessionStore::open(dir);
    let lock = store.lock()?;
    let session = store.load()?;
    Ok(Engine::new(
        session,
        store,
        lock,
        dispatcher,
        EngineOptions::from_config(&cfg.engine),
    ))
}

async fn run_session(dir: &Path, cfg: &ConfigFile, cycles: Option<u32>) -> Result<ProgressReport> {
    let mut engine = build_engine(dir, cfg)?;
    info!(
        session = %engine.session().name(),
        tasks = engine.session().len(),
        "starting campaign"
    );
    match cycles {
        None => Ok(engine.run_to_completion().await?),
        Some(n) => {
            for _ in 0..n {
                if engine.session().all_terminal() {
                    break;
                }
                engine.progress().await?;
            }
            Ok(engine.report())
        }
    }
}

async fn abort_session(dir: &Path, cfg: &ConfigFile) -> Result<ProgressReport> {
    let mut engine = build_engine(dir, cfg)?;
    Ok(engine.abort().await?)
}
