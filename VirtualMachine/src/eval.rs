// Glue over the whole pipeline: source text in, executed stack out.

use thiserror::Error;
use tracing::debug;

use assembler::Assembler;
use common::errors::{CompilationError, SyntaxError};

use crate::mm::{Gc, OutOfMemoryError, Pinned};
use crate::objects::{BytecodeObj, ErrObj, FunKind, FunObj, ObjObj, ScopeObj, StackObj};
use crate::value::Value;
use crate::Vm;

/// A compile-time failure from any stage of the pipeline.
#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Compilation(#[from] CompilationError),
}

/// Compiles source text into a bytecode image.
pub fn compile(filename: &str, source: &str) -> Result<Vec<u8>, CompileError> {
    let tokens = tokenizer::tokenize(filename, source)?;
    let ast = parser::parse(filename, tokens)?;
    let mut asm = Assembler::new();
    asm.compile_expression(filename, &ast)?;
    let image = asm.assemble();
    debug!(filename, bytes = image.len(), "assembled image");
    Ok(image)
}

impl Vm {
    /// Creates a top-level scope populated with the native library.
    pub fn new_base_scope(&mut self) -> Result<Pinned<ScopeObj>, OutOfMemoryError> {
        let vars = self.mem.gc_new(ObjObj::new())?;
        let scope = self.mem.gc_new(ScopeObj { vars: vars.get(), parent: None })?;
        crate::natives::register(self, scope.get())?;
        Ok(scope)
    }

    /// Compiles and runs source text on the given stack, in the given
    /// scope. Compile-time failures are returned; runtime panics leave the
    /// stack in its panicked state.
    pub fn eval_source(
        &mut self,
        st: Gc<StackObj>,
        scope: Gc<ScopeObj>,
        filename: &str,
        source: &str,
    ) -> Result<(), CompileError> {
        let image = compile(filename, source)?;
        let Ok(code) = self.mem.gc_new(BytecodeObj { bytes: image }) else {
            self.mem.get_mut(st).panicked = true;
            self.mem.get_mut(st).fatal = Some("out of memory");
            return Ok(());
        };
        let main = self.mem.gc_new(FunObj {
            name: Some("<main>".to_string()),
            kind: FunKind::Bytecode { scope, code: code.get(), offset: 0 },
        });
        match main {
            Ok(main) => self.execute(st, main.get()),
            Err(OutOfMemoryError) => {
                self.mem.get_mut(st).panicked = true;
                self.mem.get_mut(st).fatal = Some("out of memory");
            }
        }
        Ok(())
    }

    /// The values currently on the stack: the result pack after a
    /// successful execution, or the error value after a panic.
    pub fn stack_values(&self, st: Gc<StackObj>) -> Vec<Value> {
        self.mem.get(st).values.clone()
    }

    pub fn is_panicked(&self, st: Gc<StackObj>) -> bool {
        self.mem.get(st).panicked
    }

    /// The error of a panicked stack, when one could be allocated.
    pub fn panic_error(&self, st: Gc<StackObj>) -> Option<Gc<ErrObj>> {
        match self.mem.get(st).values.last() {
            Some(Value::Err(err)) => Some(*err),
            _ => None,
        }
    }

    pub fn fatal_message(&self, st: Gc<StackObj>) -> Option<&'static str> {
        self.mem.get(st).fatal
    }

    /// Clears the stack for reuse (the REPL evaluates every line on the
    /// same stack).
    pub fn reset_stack(&mut self, st: Gc<StackObj>) {
        let stack = self.mem.get_mut(st);
        stack.values.clear();
        stack.frames.clear();
        stack.panicked = false;
        stack.fatal = None;
    }
}
