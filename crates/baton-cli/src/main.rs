//! baton demo
//!
//! Prepares the reference pools, then submits tasks from a thread whose
//! `trace_id` changes before every submission and prints what each task saw.
//!
//! Usage:
//!   baton                               # 2 workers, 6 tasks
//!   baton --workers 4 --tasks 20
//!   baton --no-worker-guard             # workers inherit the first submitter
//!   baton --agent-args audit=false      # injection records at debug level
//!   baton --config baton.json --dump-plan

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use baton_core::context::{ContextKey, ContextStore};
use baton_core::{BatonConfig, ExecutorTransformer, InterceptionLayer, SupportedPool, Weavable};
use baton_pool::{ScheduledWorkerPool, WorkerPool};
use clap::Parser;
use parking_lot::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

const TRACE_ID: ContextKey<String> = ContextKey::new("trace_id");

#[derive(Parser, Debug)]
#[command(name = "baton", about = "Context propagation across worker pools")]
struct Cli {
    /// Core workers of the demo pool
    #[arg(long, default_value = "2")]
    workers: usize,

    /// Number of tasks to submit
    #[arg(long, default_value = "6")]
    tasks: usize,

    /// Do not clear context around worker creation
    #[arg(long)]
    no_worker_guard: bool,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Config as `key=value,key=value`, applied instead of --config
    #[arg(long)]
    agent_args: Option<String>,

    /// Print the instrumentation plans as JSON and exit
    #[arg(long)]
    dump_plan: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

fn load_config(cli: &Cli) -> Result<BatonConfig, Box<dyn Error>> {
    let mut config = match (&cli.agent_args, &cli.config) {
        (Some(args), _) => BatonConfig::from_agent_args(args)?,
        (None, Some(path)) => BatonConfig::from_json(&std::fs::read_to_string(path)?)?,
        (None, None) => BatonConfig::default(),
    };
    if cli.no_worker_guard {
        config.worker_guard = false;
    }
    Ok(config)
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&cli)?;
    let transformer = ExecutorTransformer::builder()
        .support(SupportedPool::basic(WorkerPool::TYPE))
        .support(SupportedPool::scheduled(ScheduledWorkerPool::TYPE))
        .config(config)
        .build()?;

    let mut layer = InterceptionLayer::new();
    layer.register::<WorkerPool>().register::<ScheduledWorkerPool>();

    if cli.dump_plan {
        for target in [WorkerPool::TYPE, ScheduledWorkerPool::TYPE] {
            if let Some(plan) = transformer.plan(&target, &layer)? {
                println!("{}", plan.to_json()?);
            }
        }
        return Ok(());
    }

    let weavings = layer.prepare_all(&transformer)?;

    let ambient = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&ambient);
    let pool = WorkerPool::builder()
        .name("demo")
        .core_workers(cli.workers)
        .before_execute(move || {
            let worker = std::thread::current().name().unwrap_or("unnamed").to_string();
            sink.lock().push((worker, TRACE_ID.get_cloned()));
        })
        .weavings(&weavings)
        .build()?;

    let mut handles = Vec::with_capacity(cli.tasks);
    for i in 0..cli.tasks {
        let trace_id = format!("req-{i}");
        TRACE_ID.set(trace_id.clone());
        let handle = pool.submit(|| {
            let worker = std::thread::current().name().unwrap_or("unnamed").to_string();
            (worker, TRACE_ID.get_cloned())
        })?;
        handles.push((trace_id, handle));
    }
    ContextStore::clear();

    let mut propagated = 0;
    for (submitted, handle) in handles {
        let (worker, seen) = handle.join()?;
        let ok = seen.as_deref() == Some(submitted.as_str());
        if ok {
            propagated += 1;
        }
        println!("submitted={submitted} worker={worker} seen={seen:?} ok={ok}");
    }
    pool.shutdown_and_join();

    for (worker, seen) in ambient.lock().iter() {
        println!("worker={worker} ambient={seen:?}");
    }
    info!(propagated, total = cli.tasks, "demo finished");
    Ok(())
}
