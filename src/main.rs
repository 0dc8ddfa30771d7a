// The host binary: evaluates a script file, or runs the REPL when no file
// is given. SIGINT flips the VM's interrupt flag, which the dispatch loop
// turns into a catchable-by-nobody panic of the running script.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use vm::mm::{DefaultAllocator, Gc};
use vm::objects::StackObj;
use vm::{Config, Vm};

mod repl;

/// The Funscript interpreter.
#[derive(Parser)]
#[command(name = "funscript", version, about = "The Funscript interpreter")]
struct Args {
    /// Source file to evaluate; starts a REPL when omitted.
    script: Option<PathBuf>,
}

/// Byte budget of the script heap.
const HEAP_LIMIT: usize = 1 << 30;

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let interrupt = Arc::new(AtomicBool::new(false));
    if let Err(err) = signal_hook::flag::register(signal_hook::consts::SIGINT, interrupt.clone()) {
        warn!(%err, "could not register the interrupt handler");
    }

    let mut vm = Vm::new(
        Box::new(DefaultAllocator::new(HEAP_LIMIT)),
        Config::default(),
        interrupt,
    );

    let result = match args.script {
        Some(path) => run_file(&mut vm, &path),
        None => repl::run(&mut vm),
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("funscript: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run_file(vm: &mut Vm, path: &PathBuf) -> anyhow::Result<ExitCode> {
    let source =
        fs::read_to_string(path).with_context(|| format!("cannot read '{}'", path.display()))?;
    let stack = vm.new_stack().ok().context("out of memory")?;
    let scope = vm.new_base_scope().ok().context("out of memory")?;

    let filename = path.display().to_string();
    if let Err(err) = vm.eval_source(stack.get(), scope.get(), &filename, &source) {
        eprintln!("{err}");
        return Ok(ExitCode::FAILURE);
    }
    if vm.is_panicked(stack.get()) {
        print_panic(vm, stack.get());
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Reports a panicked stack: the error payload and its captured trace.
pub(crate) fn print_panic(vm: &Vm, stack: Gc<StackObj>) {
    match vm.panic_error(stack) {
        Some(err) => {
            let payload = vm.mem.get(err).obj;
            eprintln!("panic: {}", vm.display_pretty(vm::Value::Obj(payload)));
            for entry in vm.mem.get(err).trace.clone() {
                eprintln!("    at [{}] in {}", entry.location, entry.function);
            }
        }
        None => {
            let what = vm.fatal_message(stack).unwrap_or("unknown failure");
            eprintln!("panic: {what}");
        }
    }
}
