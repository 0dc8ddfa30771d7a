// Shared harness for the language tests: one VM, one stack and one
// persistent scope, so successive snippets see each other's bindings like
// lines of a REPL session.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use vm::mm::{DefaultAllocator, Pinned};
use vm::objects::{ScopeObj, StackObj};
use vm::{Config, Value, Vm};

pub struct TestEnv {
    pub vm: Vm,
    stack: Pinned<StackObj>,
    scope: Pinned<ScopeObj>,
    pub interrupt: Arc<AtomicBool>,
}

/// An expected result value.
#[derive(Debug, Clone, Copy)]
pub enum Expect {
    I(i64),
    F(f64),
    B(bool),
    S(&'static str),
}

impl TestEnv {
    pub fn new() -> TestEnv {
        let interrupt = Arc::new(AtomicBool::new(false));
        let mut vm = Vm::new(
            Box::new(DefaultAllocator::new(16 << 20)),
            // Tight caps so the overflow tests finish quickly.
            Config { stack_values_max: 16_384, stack_frames_max: 128 },
            interrupt.clone(),
        );
        let stack = vm.new_stack().unwrap();
        let scope = vm.new_base_scope().unwrap();
        TestEnv { vm, stack, scope, interrupt }
    }

    /// Evaluates a snippet, returning the result pack, or the rendered
    /// compile/panic failure.
    pub fn eval(&mut self, source: &str) -> Result<Vec<Value>, String> {
        self.vm.reset_stack(self.stack.get());
        self.vm
            .eval_source(self.stack.get(), self.scope.get(), "<test>", source)
            .map_err(|err| err.to_string())?;
        if self.vm.is_panicked(self.stack.get()) {
            let what = match self.vm.panic_error(self.stack.get()) {
                Some(err) => {
                    let payload = self.vm.mem.get(err).obj;
                    self.vm.display_pretty(Value::Obj(payload))
                }
                None => self.vm.fatal_message(self.stack.get()).unwrap_or("fatal").to_string(),
            };
            return Err(format!("panic: {what}"));
        }
        Ok(self.vm.stack_values(self.stack.get()))
    }

    #[track_caller]
    pub fn evaluates(&mut self, source: &str) {
        if let Err(what) = self.eval(source) {
            panic!("expected `{source}` to evaluate, got: {what}");
        }
    }

    #[track_caller]
    pub fn evaluates_to(&mut self, source: &str, expected: &[Expect]) {
        match self.eval(source) {
            Err(what) => panic!("expected `{source}` to evaluate, got: {what}"),
            Ok(values) => {
                let matches = values.len() == expected.len()
                    && values.iter().zip(expected).all(|(v, e)| self.value_matches(*v, *e));
                if !matches {
                    let rendered: Vec<String> =
                        values.iter().map(|v| self.vm.display_pretty(*v)).collect();
                    panic!(
                        "`{source}` evaluated to ({}), expected {expected:?}",
                        rendered.join(", ")
                    );
                }
            }
        }
    }

    #[track_caller]
    pub fn panics(&mut self, source: &str) {
        match self.eval(source) {
            Ok(values) => {
                let rendered: Vec<String> =
                    values.iter().map(|v| self.vm.display_pretty(*v)).collect();
                panic!("expected `{source}` to panic, got ({})", rendered.join(", "));
            }
            Err(what) => assert!(
                what.starts_with("panic:"),
                "expected a runtime panic for `{source}`, got: {what}"
            ),
        }
    }

    /// The `(function, location)` trace of the last panic, when its error
    /// value is still on the stack.
    pub fn panic_trace(&self) -> Option<Vec<(String, String)>> {
        let err = self.vm.panic_error(self.stack.get())?;
        Some(
            self.vm
                .mem
                .get(err)
                .trace
                .iter()
                .map(|entry| (entry.function.clone(), entry.location.clone()))
                .collect(),
        )
    }

    fn value_matches(&self, value: Value, expect: Expect) -> bool {
        match (value, expect) {
            (Value::Int(a), Expect::I(b)) => a == b,
            (Value::Flp(a), Expect::F(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Bln(a), Expect::B(b)) => a == b,
            (Value::Str(str), Expect::S(b)) => self.vm.mem.get(str).bytes == b,
            _ => false,
        }
    }
}
