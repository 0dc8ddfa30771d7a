// The fetch-decode-execute loop.
//
// Execution is recursive: calling a bytecode function enters a nested
// dispatch loop, and the frame stack mirrors (and caps) that recursion. The
// loop polls the shared interrupt flag before every instruction and keeps
// the current frame's metadata offset up to date for stack traces.

use std::sync::atomic::Ordering;

use num_traits::FromPrimitive;
use tracing::{error, trace};

use common::instruction::{Instruction, Opcode, TypeTag, INSTRUCTION_SIZE};
use common::TYPE_CHECK_NAME;

use crate::mm::{Gc, Pinned};
use crate::objects::{
    ArrObj, BytecodeObj, FrameObj, FunKind, FunObj, NativeFn, ObjObj, ScopeObj, StackObj, StrObj,
};
use crate::stack::Control;
use crate::value::Value;
use crate::Vm;

/// What the extract opcode decided about control flow.
enum ExtFlow {
    Continue,
    Jump(u64),
    /// The error object was propagated to the function boundary.
    Return,
}

impl Vm {
    /// Runs a function on the given stack to completion. On success the
    /// result pack is left on the stack; on a panic the stack is unwound to
    /// its boundary, the error value is deposited and the stack is marked
    /// panicked.
    pub fn execute(&mut self, st: Gc<StackObj>, fun: Gc<FunObj>) {
        let boundary = self.values_len(st);
        let result = self.push(st, Value::Sep).and_then(|_| self.call_function(st, fun));
        if let Err(control) = result {
            self.truncate(st, boundary);
            self.mem.get_mut(st).panicked = true;
            match control {
                Control::Panic(err) => {
                    let val = Value::Err(err.get());
                    self.mem.get_mut(st).values.push(val);
                }
                Control::Fatal(msg) => {
                    error!(msg, "execution failed fatally");
                    self.mem.get_mut(st).fatal = Some(msg);
                }
            }
        }
    }

    /// Builds a new frame for the callee and runs it. The caller must have
    /// arranged the stack as `[… SEP arguments]`; the callee replaces that
    /// segment with its result pack.
    pub(crate) fn call_function(&mut self, st: Gc<StackObj>, fun: Gc<FunObj>) -> Result<(), Control> {
        if self.mem.get(st).frames.len() >= self.config.stack_frames_max {
            return Err(self.raise(st, "stack overflow"));
        }

        enum Target {
            Bytecode(Gc<ScopeObj>, Gc<BytecodeObj>, usize),
            Native(NativeFn),
        }
        let target = match &self.mem.get(fun).kind {
            FunKind::Bytecode { scope, code, offset } => Target::Bytecode(*scope, *code, *offset),
            FunKind::Native(native) => Target::Native(*native),
        };

        // The callee may have just been popped off the value stack; keep it
        // alive across the frame allocation.
        let fun_pin = self.mem.pin(fun);
        let frame = self.alloc(st, FrameObj { fun, meta_base: 0, cur_meta: 0 })?;
        drop(fun_pin); // The frame roots the callee from here on.
        self.mem.get_mut(st).frames.push(frame.get());
        let result = match target {
            Target::Bytecode(scope, code, offset) => self.top_sep(st).and_then(|frame_start| {
                self.exec_bytecode(st, frame.get(), scope, code, offset, frame_start)
            }),
            Target::Native(native) => native(self, st),
        };
        self.mem.get_mut(st).frames.pop();
        result
    }

    /// The dispatch loop of one frame. `frame_start` is the value-stack
    /// position of the caller's argument separator, used when an error
    /// object is propagated out of this frame.
    fn exec_bytecode(
        &mut self,
        st: Gc<StackObj>,
        frame: Gc<FrameObj>,
        scope: Gc<ScopeObj>,
        code: Gc<BytecodeObj>,
        offset: usize,
        frame_start: usize,
    ) -> Result<(), Control> {
        let mut scope = self.mem.pin(scope);
        let mut ip = offset;
        loop {
            if self.interrupt.swap(false, Ordering::Relaxed) {
                return Err(self.raise(st, "execution interrupted"));
            }
            let Some(ins) = self.mem.get(code).instruction(ip) else {
                return Err(self.raise(st, "malformed bytecode"));
            };
            ip += INSTRUCTION_SIZE;
            self.mem.get_mut(frame).cur_meta = ins.meta;
            trace!(target: "vm", ip, op = ?ins.op, arg = ins.arg, data = ins.data);

            match ins.op {
                Opcode::Nop => {}
                Opcode::Val => self.op_val(st, &ins, scope.get(), code)?,
                Opcode::Sep => self.push(st, Value::Sep)?,
                Opcode::Str => self.op_str(st, &ins, code)?,
                Opcode::Vgt => self.op_vgt(st, &ins, scope.get(), code)?,
                Opcode::Vst => self.op_vst(st, &ins, scope.get(), code)?,
                Opcode::Get => self.op_get(st, &ins, code)?,
                Opcode::Set => self.op_set(st, &ins, code)?,
                Opcode::Has => self.op_has(st, &ins, code)?,
                Opcode::Ind => self.op_ind(st, &ins)?,
                Opcode::Scp => scope = self.op_scp(st, &ins, scope)?,
                Opcode::Osc => scope = self.op_osc(st, scope)?,
                Opcode::Dis => self.op_dis(st, &ins)?,
                Opcode::Rev => self.reverse(st)?,
                Opcode::Dup => self.duplicate(st)?,
                Opcode::Rem => self.remove_sep(st)?,
                Opcode::Arr => self.op_arr(st)?,
                Opcode::Obj => self.op_obj(st, scope.get())?,
                Opcode::Wrp => self.op_wrp(st)?,
                Opcode::Opr => self.op_opr(st, &ins)?,
                Opcode::Mov => self.call_assignment(st)?,
                Opcode::Jmp => ip = ins.data as usize,
                Opcode::Jno => {
                    if !self.as_boolean(st)? {
                        ip = ins.data as usize;
                    }
                }
                Opcode::Jys => {
                    if self.as_boolean(st)? {
                        ip = ins.data as usize;
                    }
                }
                Opcode::Met => self.mem.get_mut(frame).meta_base = ins.data as usize,
                Opcode::Chk => self.op_chk(st, &ins)?,
                Opcode::Ext => match self.op_ext(st, &ins, frame_start)? {
                    ExtFlow::Continue => {}
                    ExtFlow::Jump(target) => ip = target as usize,
                    ExtFlow::Return => return Ok(()),
                },
                Opcode::End => return Ok(()),
            }
        }
    }

    /// Reads the NUL-terminated string the instruction's long argument
    /// points at.
    fn read_cstr(
        &mut self,
        st: Gc<StackObj>,
        code: Gc<BytecodeObj>,
        offset: u64,
    ) -> Result<String, Control> {
        match self.mem.get(code).cstr(offset as usize) {
            Some(name) => Ok(name.to_string()),
            None => Err(self.raise(st, "malformed bytecode")),
        }
    }

    fn op_val(
        &mut self,
        st: Gc<StackObj>,
        ins: &Instruction,
        scope: Gc<ScopeObj>,
        code: Gc<BytecodeObj>,
    ) -> Result<(), Control> {
        let val = match TypeTag::from_u16(ins.arg) {
            Some(TypeTag::Int) => Value::Int(ins.data as i64),
            Some(TypeTag::Flp) => Value::Flp(f64::from_bits(ins.data)),
            Some(TypeTag::Bln) => Value::Bln(ins.data != 0),
            Some(TypeTag::Nul) => Value::Nul,
            Some(TypeTag::Fun) => {
                let fun = self.alloc(
                    st,
                    FunObj {
                        name: None,
                        kind: FunKind::Bytecode { scope, code, offset: ins.data as usize },
                    },
                )?;
                Value::Fun(fun.get())
            }
            _ => return Err(self.raise(st, "malformed bytecode")),
        };
        self.push(st, val)
    }

    fn op_str(
        &mut self,
        st: Gc<StackObj>,
        ins: &Instruction,
        code: Gc<BytecodeObj>,
    ) -> Result<(), Control> {
        let bytes = match self.mem.get(code).str_at(ins.data as usize, ins.arg as usize) {
            Some(str) => str.to_string(),
            None => return Err(self.raise(st, "malformed bytecode")),
        };
        let str = self.alloc(st, StrObj { bytes })?;
        self.push(st, Value::Str(str.get()))
    }

    fn op_vgt(
        &mut self,
        st: Gc<StackObj>,
        ins: &Instruction,
        scope: Gc<ScopeObj>,
        code: Gc<BytecodeObj>,
    ) -> Result<(), Control> {
        let name = self.read_cstr(st, code, ins.data)?;
        match self.get_var(scope, &name) {
            Some(val) => self.push(st, val),
            None => Err(self.raise(st, &format!("variable '{name}' does not exist"))),
        }
    }

    fn op_vst(
        &mut self,
        st: Gc<StackObj>,
        ins: &Instruction,
        scope: Gc<ScopeObj>,
        code: Gc<BytecodeObj>,
    ) -> Result<(), Control> {
        let name = self.read_cstr(st, code, ins.data)?;
        // The value stays on the stack until it is stored, so that a
        // collection triggered by the binding cannot reclaim it.
        let val = match self.mem.get(st).values.last() {
            Some(val) if !val.is_sep() => *val,
            _ => return Err(self.raise(st, "not enough values to assign")),
        };
        // A leading dot in the stored name requests binding in the
        // innermost scope instead of assignment to an existing variable.
        if let Some(plain) = name.strip_prefix('.') {
            self.christen(val, plain);
            self.declare_var(st, scope, plain, val)?;
        } else {
            self.christen(val, &name);
            if !self.set_var(st, scope, &name, val)? {
                return Err(self.raise(st, &format!("variable '{name}' does not exist")));
            }
        }
        self.pop(st);
        Ok(())
    }

    /// Pops the receiver pack, which must hold exactly one object.
    fn pop_receiver(&mut self, st: Gc<StackObj>) -> Result<Gc<ObjObj>, Control> {
        let sep = self.top_sep(st)?;
        if self.values_len(st) - sep != 2 {
            return Err(self.raise(st, "a single object is expected"));
        }
        let val = self.value_at(st, sep + 1);
        let Value::Obj(obj) = val else {
            return Err(self.raise(
                st,
                &format!("cannot access fields of a value of type {}", val.type_name()),
            ));
        };
        self.truncate(st, sep);
        Ok(obj)
    }

    fn op_get(
        &mut self,
        st: Gc<StackObj>,
        ins: &Instruction,
        code: Gc<BytecodeObj>,
    ) -> Result<(), Control> {
        let name = self.read_cstr(st, code, ins.data)?;
        let obj = self.pop_receiver(st)?;
        match self.mem.get(obj).get_field(&name) {
            Some(val) => self.push(st, val),
            None => Err(self.raise(st, &format!("object does not have field '{name}'"))),
        }
    }

    fn op_set(
        &mut self,
        st: Gc<StackObj>,
        ins: &Instruction,
        code: Gc<BytecodeObj>,
    ) -> Result<(), Control> {
        let name = self.read_cstr(st, code, ins.data)?;
        // Both the receiver and the value stay on the stack until the field
        // is stored.
        let sep = self.top_sep(st)?;
        if self.values_len(st) - sep != 2 {
            return Err(self.raise(st, "a single object is expected"));
        }
        let receiver = self.value_at(st, sep + 1);
        let Value::Obj(obj) = receiver else {
            return Err(self.raise(
                st,
                &format!("cannot access fields of a value of type {}", receiver.type_name()),
            ));
        };
        if sep == 0 || self.value_at(st, sep - 1).is_sep() {
            return Err(self.raise(st, "not enough values to assign"));
        }
        let val = self.value_at(st, sep - 1);
        self.christen(val, &name);
        self.obj_set_field(st, obj, &name, val)?;
        self.truncate(st, sep - 1);
        Ok(())
    }

    fn op_has(
        &mut self,
        st: Gc<StackObj>,
        ins: &Instruction,
        code: Gc<BytecodeObj>,
    ) -> Result<(), Control> {
        let name = self.read_cstr(st, code, ins.data)?;
        let obj = self.pop_receiver(st)?;
        let has = self.mem.get(obj).contains_field(&name);
        self.push(st, Value::Bln(has))
    }

    fn op_ind(&mut self, st: Gc<StackObj>, ins: &Instruction) -> Result<(), Control> {
        let sep = self.top_sep(st)?;
        if self.values_len(st) - sep != 2 {
            return Err(self.raise(st, "a single array is expected"));
        }
        let val = self.value_at(st, sep + 1);
        let Value::Arr(arr) = val else {
            return Err(self.raise(st, &format!("cannot index a value of type {}", val.type_name())));
        };
        let index = ins.data as usize;
        let Some(element) = self.mem.get(arr).values.get(index).copied() else {
            return Err(self.raise(st, "array index out of range"));
        };
        self.truncate(st, sep);
        self.push(st, element)
    }

    fn op_scp(
        &mut self,
        st: Gc<StackObj>,
        ins: &Instruction,
        scope: Pinned<ScopeObj>,
    ) -> Result<Pinned<ScopeObj>, Control> {
        if ins.arg != 0 {
            let vars = self.alloc(st, ObjObj::new())?;
            self.alloc(st, ScopeObj { vars: vars.get(), parent: Some(scope.get()) })
        } else {
            match self.mem.get(scope.get()).parent {
                Some(parent) => Ok(self.mem.pin(parent)),
                None => Err(self.raise(st, "scope underflow")),
            }
        }
    }

    /// Adopts an object's fields as a new scope.
    fn op_osc(
        &mut self,
        st: Gc<StackObj>,
        scope: Pinned<ScopeObj>,
    ) -> Result<Pinned<ScopeObj>, Control> {
        let obj = self.pop_receiver(st)?;
        let obj_pin = self.mem.pin(obj);
        let adopted = self.alloc(st, ScopeObj { vars: obj, parent: Some(scope.get()) });
        drop(obj_pin);
        adopted
    }

    fn op_dis(&mut self, st: Gc<StackObj>, ins: &Instruction) -> Result<(), Control> {
        let discarded = self.discard(st)?;
        if ins.arg != 0 && discarded {
            return Err(self.raise(st, "too many values"));
        }
        Ok(())
    }

    fn op_arr(&mut self, st: Gc<StackObj>) -> Result<(), Control> {
        let sep = self.top_sep(st)?;
        let values = self.mem.get(st).values[sep + 1..].to_vec();
        let arr = self.alloc(st, ArrObj { values })?;
        self.truncate(st, sep);
        self.push(st, Value::Arr(arr.get()))
    }

    /// Wraps the current scope's variables object and the topmost pack into
    /// the object value of a `{ … }` expression.
    fn op_obj(&mut self, st: Gc<StackObj>, scope: Gc<ScopeObj>) -> Result<(), Control> {
        let sep = self.top_sep(st)?;
        let pack = self.mem.get(st).values[sep + 1..].to_vec();
        let vars = self.mem.get(scope).vars;
        if self.mem.grow(vars, pack.len() * std::mem::size_of::<Value>()).is_err() {
            return Err(self.raise(st, "out of memory"));
        }
        self.mem.get_mut(vars).positional = pack;
        self.truncate(st, sep);
        self.push(st, Value::Obj(vars))
    }

    /// Wraps the topmost pack into a fresh object holding it positionally.
    fn op_wrp(&mut self, st: Gc<StackObj>) -> Result<(), Control> {
        let sep = self.top_sep(st)?;
        let pack = self.mem.get(st).values[sep + 1..].to_vec();
        let obj = self.alloc(st, ObjObj::new())?;
        self.mem.get_mut(obj.get()).positional = pack;
        self.truncate(st, sep);
        self.push(st, Value::Obj(obj.get()))
    }

    fn op_opr(&mut self, st: Gc<StackObj>, ins: &Instruction) -> Result<(), Control> {
        match common::operators::Operator::from_u16(ins.arg) {
            Some(op) => self.call_operator(st, op),
            None => Err(self.raise(st, "malformed bytecode")),
        }
    }

    /// The type check: the topmost pack holds the types, the pack below the
    /// values, paired from the top of each pack.
    fn op_chk(&mut self, st: Gc<StackObj>, ins: &Instruction) -> Result<(), Control> {
        let lenient = ins.arg != 0;
        let types_sep = self.top_sep(st)?;
        let types = self.mem.get(st).values[types_sep + 1..].to_vec();
        let values_sep = self.sep_before(st, types_sep)?;
        let value_count = types_sep - values_sep - 1;
        if !lenient && value_count != types.len() {
            return Err(self.raise(st, "the value pack does not match the type pack"));
        }
        if lenient && value_count < types.len() {
            return Err(self.raise(st, "not enough values to check"));
        }
        for (offset, ty) in types.iter().rev().enumerate() {
            let val = self.value_at(st, types_sep - 1 - offset);
            self.check_type(st, *ty, val)?;
        }
        self.truncate(st, types_sep);
        Ok(())
    }

    /// Checks one value against one type: an object with a `check_value`
    /// field accepts by returning and rejects by panicking; anything else is
    /// an identity type.
    fn check_type(&mut self, st: Gc<StackObj>, ty: Value, val: Value) -> Result<(), Control> {
        if let Value::Obj(tyobj) = ty {
            if let Some(checker) = self.mem.get(tyobj).get_field(TYPE_CHECK_NAME) {
                let Value::Fun(fun) = checker else {
                    return Err(self.raise(st, "the check_value field is not callable"));
                };
                let base = self.values_len(st);
                self.push(st, Value::Sep)?;
                self.push(st, val)?;
                self.call_function(st, fun)?;
                self.truncate(st, base); // The checker's result is discarded.
                return Ok(());
            }
        }
        if self.is_identical(ty, val) {
            Ok(())
        } else {
            Err(self.raise(st, &format!("a value of type {} failed the type check", val.type_name())))
        }
    }

    /// The extract operator: unwraps a result object or diverts on error.
    fn op_ext(
        &mut self,
        st: Gc<StackObj>,
        ins: &Instruction,
        frame_start: usize,
    ) -> Result<ExtFlow, Control> {
        let sep = self.top_sep(st)?;
        if self.values_len(st) - sep != 2 {
            return Err(self.raise(st, "a single value is expected"));
        }
        let val = self.value_at(st, sep + 1);
        let Value::Obj(obj) = val else {
            return Err(self.raise(
                st,
                &format!("cannot extract from a value of type {}", val.type_name()),
            ));
        };

        let flagged = self.mem.get(obj).get_field(common::ERR_FLAG_NAME) == Some(Value::Bln(true));
        if flagged {
            if ins.data != 0 {
                // A fallback follows: discard the error and fall through.
                self.truncate(st, sep);
                return Ok(ExtFlow::Continue);
            }
            // Propagate to the nearest surrounding function boundary; in
            // the bottom frame the error becomes a panic.
            if self.mem.get(st).frames.len() <= 1 {
                return Err(self.raise_error_object(st, obj));
            }
            self.truncate(st, frame_start);
            self.push(st, Value::Obj(obj))?;
            return Ok(ExtFlow::Return);
        }

        // Not an error: splice the positional contents into the current
        // pack and skip any fallback.
        let contents = self.mem.get(obj).positional.clone();
        self.truncate(st, sep);
        for val in contents {
            self.push(st, val)?;
        }
        Ok(if ins.data != 0 { ExtFlow::Jump(ins.data) } else { ExtFlow::Continue })
    }
}
