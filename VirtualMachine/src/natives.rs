// The native-function bridge and the built-in natives.
//
// A native runs synchronously on the interpreter's stack: it receives the
// argument pack (with its separator) on top and must replace them with its
// result values. Natives must not retain unpinned references across
// allocation sites.

use rand::Rng;

use crate::mm::{Gc, OutOfMemoryError};
use crate::objects::{FunKind, FunObj, ScopeObj, StackObj};
use crate::stack::Control;
use crate::value::Value;
use crate::Vm;

/// Registers the built-in native functions into the given scope.
pub fn register(vm: &mut Vm, scope: Gc<ScopeObj>) -> Result<(), OutOfMemoryError> {
    let natives: &[(&str, crate::objects::NativeFn)] =
        &[("print", native_print), ("random", native_random)];
    for (name, native) in natives {
        let fun = vm.mem.gc_new(FunObj {
            name: Some(name.to_string()),
            kind: FunKind::Native(*native),
        })?;
        let vars = vm.mem.get(scope).vars;
        vm.mem.get_mut(vars).set_field(name, Value::Fun(fun.get()));
    }
    Ok(())
}

/// Prints the argument pack, space-separated, followed by a newline.
/// Returns no values.
fn native_print(vm: &mut Vm, st: Gc<StackObj>) -> Result<(), Control> {
    let sep = vm.top_sep(st)?;
    let args = vm.mem.get(st).values[sep + 1..].to_vec();
    let rendered: Vec<String> = args.into_iter().map(|val| vm.display_plain(val)).collect();
    println!("{}", rendered.join(" "));
    vm.truncate(st, sep);
    Ok(())
}

/// Returns a uniformly distributed float in `[0, 1)`.
fn native_random(vm: &mut Vm, st: Gc<StackObj>) -> Result<(), Control> {
    let discarded = vm.discard(st)?;
    if discarded {
        return Err(vm.raise(st, "no arguments expected"));
    }
    let sample: f64 = rand::thread_rng().gen();
    vm.push(st, Value::Flp(sample))
}
