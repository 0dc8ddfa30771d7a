// The virtual machine: the value union, the garbage-collected heap, the
// separator-segmented execution stack and the opcode runtime.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::mm::{Allocator, MemoryManager};

pub mod eval;
pub mod mm;
pub mod natives;
pub mod objects;
pub mod operators;
pub mod run;
pub mod stack;
pub mod value;

pub use eval::{compile, CompileError};
pub use stack::Control;
pub use value::Value;

/// Limits applied to every execution stack of a VM instance.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Maximum number of values on one execution stack.
    pub stack_values_max: usize,
    /// Maximum number of frames on one execution stack; with recursive
    /// execution this also caps the host recursion depth.
    pub stack_frames_max: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config { stack_values_max: 1 << 26, stack_frames_max: 1024 }
    }
}

/// A Funscript virtual machine instance: configuration, managed heap and
/// the interrupt channel shared with the host.
pub struct Vm {
    pub config: Config,
    pub mem: MemoryManager,
    /// Set asynchronously by the host (e.g. from a signal handler); the
    /// dispatch loop observes it between instructions and panics.
    pub(crate) interrupt: Arc<AtomicBool>,
}

impl Vm {
    pub fn new(allocator: Box<dyn Allocator>, config: Config, interrupt: Arc<AtomicBool>) -> Vm {
        Vm { config, mem: MemoryManager::new(allocator), interrupt }
    }

    /// The flag the host flips to interrupt a running script.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }
}
