// The interactive prompt: one persistent scope, one line per evaluation,
// until end of input or the literal line `# exit`.

use std::process::ExitCode;

use anyhow::Context;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use vm::Vm;

pub fn run(vm: &mut Vm) -> anyhow::Result<ExitCode> {
    let stack = vm.new_stack().ok().context("out of memory")?;
    let scope = vm.new_base_scope().ok().context("out of memory")?;
    let mut editor = DefaultEditor::new().context("cannot open the terminal")?;

    loop {
        match editor.readline("fs> ") {
            Ok(line) => {
                if line.trim() == "# exit" {
                    break;
                }
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);

                vm.reset_stack(stack.get());
                if let Err(err) = vm.eval_source(stack.get(), scope.get(), "<repl>", &line) {
                    eprintln!("{err}");
                    continue;
                }
                if vm.is_panicked(stack.get()) {
                    crate::print_panic(vm, stack.get());
                    continue;
                }
                let values = vm.stack_values(stack.get());
                if !values.is_empty() {
                    let rendered: Vec<String> =
                        values.into_iter().map(|val| vm.display_pretty(val)).collect();
                    println!("{}", rendered.join(", "));
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err).context("cannot read from the terminal"),
        }
    }
    Ok(ExitCode::SUCCESS)
}
