// Operations on the separator-segmented value stack, scope-chain lookup and
// the construction of runtime panics.

use common::{ERR_FLAG_NAME, ERR_MSG_NAME};

use crate::mm::{Gc, OutOfMemoryError, Pinned};
use crate::objects::{
    ErrObj, FunKind, HeapVariant, ObjObj, ScopeObj, StackObj, StrObj, TraceEntry,
};
use crate::value::Value;
use crate::Vm;

/// Non-local exit of the dispatch loop.
pub enum Control {
    /// A runtime panic carrying its (pinned) error allocation. The stack
    /// unwinds to the top-level boundary, where the error is deposited.
    Panic(Pinned<ErrObj>),
    /// A failure during which no error object could be allocated.
    Fatal(&'static str),
}

impl Vm {
    /// Creates a fresh, dead execution stack.
    pub fn new_stack(&mut self) -> Result<Pinned<StackObj>, OutOfMemoryError> {
        self.mem.gc_new(StackObj::new())
    }

    /// Allocates a tracked object, turning exhaustion into a runtime panic.
    pub(crate) fn alloc<T: HeapVariant>(
        &mut self,
        st: Gc<StackObj>,
        obj: T,
    ) -> Result<Pinned<T>, Control> {
        self.mem.gc_new(obj).map_err(|OutOfMemoryError| self.raise(st, "out of memory"))
    }

    pub(crate) fn values_len(&self, st: Gc<StackObj>) -> usize {
        self.mem.get(st).values.len()
    }

    pub(crate) fn value_at(&self, st: Gc<StackObj>, pos: usize) -> Value {
        self.mem.get(st).values[pos]
    }

    /// Pushes a value, enforcing the configured stack size cap.
    pub(crate) fn push(&mut self, st: Gc<StackObj>, val: Value) -> Result<(), Control> {
        if self.mem.get(st).values.len() >= self.config.stack_values_max {
            return Err(self.raise(st, "value stack overflow"));
        }
        self.mem.get_mut(st).values.push(val);
        Ok(())
    }

    /// Pops the topmost value. The caller guarantees the stack is nonempty.
    pub(crate) fn pop(&mut self, st: Gc<StackObj>) -> Value {
        self.mem.get_mut(st).values.pop().expect("pop from an empty value stack")
    }

    pub(crate) fn truncate(&mut self, st: Gc<StackObj>, len: usize) {
        self.mem.get_mut(st).values.truncate(len);
    }

    /// Position of the topmost separator, or a panic when the stack is not
    /// segmented (which only malformed bytecode can arrange).
    pub(crate) fn top_sep(&mut self, st: Gc<StackObj>) -> Result<usize, Control> {
        let values = &self.mem.get(st).values;
        match values.iter().rposition(Value::is_sep) {
            Some(pos) => Ok(pos),
            None => Err(self.raise(st, "malformed bytecode: missing separator")),
        }
    }

    /// Position of the topmost separator strictly below `before`.
    pub(crate) fn sep_before(
        &mut self,
        st: Gc<StackObj>,
        before: usize,
    ) -> Result<usize, Control> {
        let values = &self.mem.get(st).values;
        match values[..before].iter().rposition(Value::is_sep) {
            Some(pos) => Ok(pos),
            None => Err(self.raise(st, "malformed bytecode: missing separator")),
        }
    }

    /// Discards values down to and including the topmost separator; reports
    /// whether any non-separator values were actually discarded.
    pub(crate) fn discard(&mut self, st: Gc<StackObj>) -> Result<bool, Control> {
        let sep = self.top_sep(st)?;
        let any = self.values_len(st) - sep > 1;
        self.truncate(st, sep);
        Ok(any)
    }

    /// Reverses the topmost value pack in place.
    pub(crate) fn reverse(&mut self, st: Gc<StackObj>) -> Result<(), Control> {
        let sep = self.top_sep(st)?;
        self.mem.get_mut(st).values[sep + 1..].reverse();
        Ok(())
    }

    /// Duplicates the topmost pack, re-inserting a separator in between.
    pub(crate) fn duplicate(&mut self, st: Gc<StackObj>) -> Result<(), Control> {
        let sep = self.top_sep(st)?;
        let pack = self.mem.get(st).values[sep..].to_vec();
        for val in pack {
            self.push(st, val)?;
        }
        Ok(())
    }

    /// Removes the topmost separator, joining two packs into one.
    pub(crate) fn remove_sep(&mut self, st: Gc<StackObj>) -> Result<(), Control> {
        let sep = self.top_sep(st)?;
        self.mem.get_mut(st).values.remove(sep);
        Ok(())
    }

    /// Weak conversion of the topmost pack to a boolean: the pack is
    /// consumed (with its separator) and must hold exactly one boolean.
    pub(crate) fn as_boolean(&mut self, st: Gc<StackObj>) -> Result<bool, Control> {
        let sep = self.top_sep(st)?;
        if self.values_len(st) - sep != 2 {
            return Err(self.raise(st, "a single boolean value is expected"));
        }
        let val = self.value_at(st, sep + 1);
        self.truncate(st, sep);
        match val {
            Value::Bln(bln) => Ok(bln),
            other => {
                Err(self.raise(st, &format!("expected a boolean, got {}", other.type_name())))
            }
        }
    }

    // Scope chain access.

    /// Looks a variable up through the scope chain, innermost first.
    pub(crate) fn get_var(&self, scope: Gc<ScopeObj>, name: &str) -> Option<Value> {
        let mut cursor = Some(scope);
        while let Some(current) = cursor {
            let scope = self.mem.get(current);
            if let Some(val) = self.mem.get(scope.vars).get_field(name) {
                return Some(val);
            }
            cursor = scope.parent;
        }
        None
    }

    /// Assigns to the innermost scope that already holds the variable;
    /// reports whether any scope did.
    pub(crate) fn set_var(
        &mut self,
        st: Gc<StackObj>,
        scope: Gc<ScopeObj>,
        name: &str,
        val: Value,
    ) -> Result<bool, Control> {
        let mut cursor = Some(scope);
        while let Some(current) = cursor {
            let vars = self.mem.get(current).vars;
            if self.mem.get(vars).contains_field(name) {
                self.obj_set_field(st, vars, name, val)?;
                return Ok(true);
            }
            cursor = self.mem.get(current).parent;
        }
        Ok(false)
    }

    /// Binds a variable in the given scope, shadowing any outer binding.
    pub(crate) fn declare_var(
        &mut self,
        st: Gc<StackObj>,
        scope: Gc<ScopeObj>,
        name: &str,
        val: Value,
    ) -> Result<(), Control> {
        let vars = self.mem.get(scope).vars;
        self.obj_set_field(st, vars, name, val)
    }

    /// Sets an object field, charging the allocator for the growth.
    pub(crate) fn obj_set_field(
        &mut self,
        st: Gc<StackObj>,
        obj: Gc<ObjObj>,
        name: &str,
        val: Value,
    ) -> Result<(), Control> {
        if !self.mem.get(obj).contains_field(name) {
            let delta = name.len() + 64;
            if self.mem.grow(obj, delta).is_err() {
                return Err(self.raise(st, "out of memory"));
            }
        }
        self.mem.get_mut(obj).set_field(name, val);
        Ok(())
    }

    /// Gives a function value its name, the first time one is available.
    pub(crate) fn christen(&mut self, val: Value, name: &str) {
        if let Value::Fun(fun) = val {
            let fun = self.mem.get_mut(fun);
            if fun.name.is_none() {
                fun.name = Some(name.to_string());
            }
        }
    }

    // Panics.

    /// Constructs a runtime panic: an error object carrying a message and
    /// the stack trace captured from the live frame stack.
    pub(crate) fn raise(&mut self, st: Gc<StackObj>, msg: &str) -> Control {
        let trace = self.capture_trace(st);
        let Ok(text) = self.mem.gc_new(StrObj { bytes: msg.to_string() }) else {
            return Control::Fatal("out of memory while panicking");
        };
        let Ok(obj) = self.mem.gc_new(ObjObj::new()) else {
            return Control::Fatal("out of memory while panicking");
        };
        {
            let payload = self.mem.get_mut(obj.get());
            payload.set_field(ERR_FLAG_NAME, Value::Bln(true));
            payload.set_field(ERR_MSG_NAME, Value::Str(text.get()));
            payload.positional.push(Value::Str(text.get()));
        }
        let Ok(err) = self.mem.gc_new(ErrObj { obj: obj.get(), trace }) else {
            return Control::Fatal("out of memory while panicking");
        };
        Control::Panic(err)
    }

    /// A panic that carries an existing error object (used when an error
    /// value reaches the bottom frame through the extract operator).
    pub(crate) fn raise_error_object(&mut self, st: Gc<StackObj>, obj: Gc<ObjObj>) -> Control {
        let trace = self.capture_trace(st);
        match self.mem.gc_new(ErrObj { obj, trace }) {
            Ok(err) => Control::Panic(err),
            Err(OutOfMemoryError) => Control::Fatal("out of memory while panicking"),
        }
    }

    /// Walks the frame stack and renders one trace entry per frame.
    fn capture_trace(&self, st: Gc<StackObj>) -> Vec<TraceEntry> {
        let frames = self.mem.get(st).frames.clone();
        frames
            .iter()
            .map(|frame| {
                let frame = self.mem.get(*frame);
                let fun = self.mem.get(frame.fun);
                let location = match &fun.kind {
                    FunKind::Native(_) => "<native>".to_string(),
                    FunKind::Bytecode { code, .. } => {
                        let code = self.mem.get(*code);
                        let file = code.cstr(frame.meta_base).unwrap_or("<unknown>");
                        match code.pos_at(frame.meta_base + frame.cur_meta as usize) {
                            Some(pos) => format!("{file}:{pos}"),
                            None => file.to_string(),
                        }
                    }
                };
                TraceEntry { function: fun.display_name().to_string(), location }
            })
            .collect()
    }
}
