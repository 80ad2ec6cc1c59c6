#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use hexsim_smp::script::Scenario;
use hexsim_smp::{
    run_threaded, DeterministicScheduler, ExecMode, LockKind, Machine, MachineConfig,
};

const DEFAULT_MAX_TICKS: u64 = 1_000_000;

#[derive(Parser, Debug)]
#[command(
    name = "hexsim",
    about = "Run scripted control-plane scenarios on a simulated multi-threaded VLIW machine."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scenario until every hardware thread has stopped
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Scenario JSON: per-thread op lists and an optional machine config
    scenario: PathBuf,

    /// Machine config JSON (overrides the scenario's embedded config)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// How hardware threads are mapped onto host threads
    #[arg(long, value_enum, default_value_t = Driver::Deterministic)]
    driver: Driver,

    /// Give up if the deterministic driver has not terminated after this many ticks
    #[arg(long, value_name = "TICKS", default_value_t = DEFAULT_MAX_TICKS)]
    max_ticks: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Driver {
    /// All hardware threads on one host thread, fixed round-robin order
    Deterministic,
    /// One host thread per hardware thread
    Threaded,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    exit_code: i32,
    driver: &'static str,
    threads: Vec<ThreadSummary>,
    tlb_lock_holder: Option<usize>,
    k0_lock_holder: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ThreadSummary {
    id: usize,
    mode: ExecMode,
    pc: u32,
    handled_interrupts: Vec<u8>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let exit_code = match cli.command {
        Command::Run(args) => run(args)?,
    };
    std::process::exit(exit_code);
}

fn run(args: RunArgs) -> anyhow::Result<i32> {
    let scenario = Scenario::from_path(&args.scenario)
        .with_context(|| format!("load scenario {}", args.scenario.display()))?;
    let config = match &args.config {
        Some(path) => MachineConfig::from_path(path)
            .with_context(|| format!("load machine config {}", path.display()))?,
        None => scenario.config.clone().unwrap_or_default(),
    };

    let machine = Machine::new(config.clone()).context("build machine")?;
    let mut guests = scenario.guests(&config).context("assign programs to threads")?;
    tracing::info!(threads = config.threads, driver = ?args.driver, "running scenario");

    let exit_code = match args.driver {
        Driver::Deterministic => {
            let mut scheduler = DeterministicScheduler::new();
            let Some(code) = scheduler.run_for_ticks(&machine, &mut guests, args.max_ticks) else {
                bail!("machine did not terminate within {} ticks", args.max_ticks);
            };
            code
        }
        Driver::Threaded => run_threaded(&machine, &mut guests).context("run hardware threads")?,
    };

    let state = machine.state();
    let summary = RunSummary {
        exit_code,
        driver: match args.driver {
            Driver::Deterministic => "deterministic",
            Driver::Threaded => "threaded",
        },
        threads: state
            .threads()
            .iter()
            .zip(&guests)
            .map(|(t, guest)| ThreadSummary {
                id: t.id(),
                mode: t.mode(),
                pc: t.regs.pc,
                handled_interrupts: guest.handled().to_vec(),
            })
            .collect(),
        tlb_lock_holder: state.lock_holder(LockKind::Tlb),
        k0_lock_holder: state.lock_holder(LockKind::K0),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(exit_code)
}
