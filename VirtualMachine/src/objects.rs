// Concrete heap allocation kinds and their union tracked by the memory
// manager. Every kind knows how to enumerate its outgoing references for
// the mark phase and how much heap it accounts for.

use hashbrown::HashMap;

use common::instruction::{Instruction, INSTRUCTION_SIZE};
use common::location::CodePos;

use crate::mm::Gc;
use crate::stack::Control;
use crate::value::Value;
use crate::Vm;

/// An immutable byte sequence.
pub struct StrObj {
    pub bytes: String,
}

/// A dynamically-sized, contiguous sequence of values.
pub struct ArrObj {
    pub values: Vec<Value>,
}

/// A freeform object: an ordered field mapping plus the positional value
/// pack left over by the body of an object expression.
pub struct ObjObj {
    entries: Vec<(String, Value)>,
    index: HashMap<String, usize>,
    pub positional: Vec<Value>,
}

impl ObjObj {
    pub fn new() -> ObjObj {
        ObjObj { entries: Vec::new(), index: HashMap::new(), positional: Vec::new() }
    }

    pub fn contains_field(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get_field(&self, name: &str) -> Option<Value> {
        self.index.get(name).map(|pos| self.entries[*pos].1)
    }

    /// Inserts or replaces a field, preserving insertion order.
    pub fn set_field(&mut self, name: &str, val: Value) {
        match self.index.get(name) {
            Some(pos) => self.entries[*pos].1 = val,
            None => {
                self.index.insert(name.to_string(), self.entries.len());
                self.entries.push((name.to_string(), val));
            }
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, Value)> {
        self.entries.iter().map(|(name, val)| (name.as_str(), *val))
    }

    pub fn field_count(&self) -> usize {
        self.entries.len()
    }
}

impl Default for ObjObj {
    fn default() -> ObjObj {
        ObjObj::new()
    }
}

/// The scope of an expression: the object holding its variables and the
/// enclosing scope, forming a singly-linked chain searched innermost-first.
pub struct ScopeObj {
    pub vars: Gc<ObjObj>,
    pub parent: Option<Gc<ScopeObj>>,
}

/// The Rust entry point of a native function. It receives the stack with
/// the argument pack (and its separator) on top and must replace them with
/// its result values.
pub type NativeFn = fn(&mut Vm, Gc<StackObj>) -> Result<(), Control>;

/// What a function value executes.
pub enum FunKind {
    /// A closure: captured scope plus an entry offset into a bytecode image.
    Bytecode { scope: Gc<ScopeObj>, code: Gc<BytecodeObj>, offset: usize },
    Native(NativeFn),
}

/// A function value, optionally christened with the name of the first
/// variable or field it was assigned to.
pub struct FunObj {
    pub name: Option<String>,
    pub kind: FunKind,
}

impl FunObj {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }
}

/// Owning holder of an assembled bytecode image.
pub struct BytecodeObj {
    pub bytes: Vec<u8>,
}

impl BytecodeObj {
    /// Decodes the instruction at the given image offset.
    pub fn instruction(&self, offset: usize) -> Option<Instruction> {
        if offset % INSTRUCTION_SIZE != 0 {
            return None;
        }
        Instruction::decode(self.bytes.get(offset..)?)
    }

    /// Reads the NUL-terminated string at the given image offset.
    pub fn cstr(&self, offset: usize) -> Option<&str> {
        let bytes = self.bytes.get(offset..)?;
        let end = bytes.iter().position(|b| *b == 0)?;
        std::str::from_utf8(&bytes[..end]).ok()
    }

    /// Reads the string of the given byte length at the given image offset.
    pub fn str_at(&self, offset: usize, len: usize) -> Option<&str> {
        std::str::from_utf8(self.bytes.get(offset..)?.get(..len)?).ok()
    }

    /// Reads a packed source position record at the given image offset.
    pub fn pos_at(&self, offset: usize) -> Option<CodePos> {
        let bytes = self.bytes.get(offset..)?.get(..16)?;
        let row = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let col = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        Some(CodePos { row: row as usize, col: col as usize })
    }
}

/// A runtime activation record: the called function, the installed metadata
/// base and the metadata offset of the instruction being executed.
pub struct FrameObj {
    pub fun: Gc<FunObj>,
    pub meta_base: usize,
    pub cur_meta: u32,
}

/// One element of a captured stack trace.
#[derive(Clone)]
pub struct TraceEntry {
    pub function: String,
    pub location: String,
}

/// An error allocation: its payload object and the captured stack trace.
pub struct ErrObj {
    pub obj: Gc<ObjObj>,
    pub trace: Vec<TraceEntry>,
}

/// A routine's value stack and frame stack. Itself a tracked allocation, so
/// one stack may hold another.
pub struct StackObj {
    pub values: Vec<Value>,
    pub frames: Vec<Gc<FrameObj>>,
    /// Set when the stack reached its terminal panicked state.
    pub panicked: bool,
    /// Set instead of an error value when even the error object could not
    /// be built (e.g. out of memory while panicking).
    pub fatal: Option<&'static str>,
}

impl StackObj {
    pub fn new() -> StackObj {
        StackObj { values: Vec::new(), frames: Vec::new(), panicked: false, fatal: None }
    }
}

impl Default for StackObj {
    fn default() -> StackObj {
        StackObj::new()
    }
}

/// Union of every allocation kind tracked by the memory manager.
pub enum Heap {
    Str(StrObj),
    Arr(ArrObj),
    Obj(ObjObj),
    Scope(ScopeObj),
    Fun(FunObj),
    Code(BytecodeObj),
    Frame(FrameObj),
    Err(ErrObj),
    Stack(StackObj),
}

impl Heap {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Heap::Str(_) => "string",
            Heap::Arr(_) => "array",
            Heap::Obj(_) => "object",
            Heap::Scope(_) => "scope",
            Heap::Fun(_) => "function",
            Heap::Code(_) => "bytecode",
            Heap::Frame(_) => "frame",
            Heap::Err(_) => "error",
            Heap::Stack(_) => "stack",
        }
    }

    /// Accounted size of the allocation in bytes.
    pub fn heap_size(&self) -> usize {
        const BASE: usize = std::mem::size_of::<Heap>() + 32;
        let value = std::mem::size_of::<Value>();
        BASE + match self {
            Heap::Str(str) => str.bytes.len(),
            Heap::Arr(arr) => arr.values.len() * value,
            Heap::Obj(obj) => {
                obj.entries.iter().map(|(name, _)| name.len() + 64).sum::<usize>()
                    + obj.positional.len() * value
            }
            Heap::Scope(_) | Heap::Frame(_) => 0,
            Heap::Fun(fun) => fun.name.as_ref().map_or(0, |name| name.len()),
            Heap::Code(code) => code.bytes.len(),
            Heap::Err(err) => err
                .trace
                .iter()
                .map(|entry| entry.function.len() + entry.location.len() + 16)
                .sum(),
            Heap::Stack(stack) => stack.values.len() * value + stack.frames.len() * 8,
        }
    }

    /// Enumerates all outgoing references to other allocations.
    pub fn trace(&self, callback: &mut dyn FnMut(usize)) {
        fn value_ref(val: &Value, callback: &mut dyn FnMut(usize)) {
            if let Some(index) = val.heap_index() {
                callback(index);
            }
        }
        match self {
            Heap::Str(_) | Heap::Code(_) => {}
            Heap::Arr(arr) => arr.values.iter().for_each(|v| value_ref(v, callback)),
            Heap::Obj(obj) => {
                obj.entries.iter().for_each(|(_, v)| value_ref(v, callback));
                obj.positional.iter().for_each(|v| value_ref(v, callback));
            }
            Heap::Scope(scope) => {
                callback(scope.vars.index());
                if let Some(parent) = scope.parent {
                    callback(parent.index());
                }
            }
            Heap::Fun(fun) => {
                if let FunKind::Bytecode { scope, code, .. } = &fun.kind {
                    callback(scope.index());
                    callback(code.index());
                }
            }
            Heap::Frame(frame) => callback(frame.fun.index()),
            Heap::Err(err) => callback(err.obj.index()),
            Heap::Stack(stack) => {
                stack.values.iter().for_each(|v| value_ref(v, callback));
                stack.frames.iter().for_each(|f| callback(f.index()));
            }
        }
    }
}

/// Conversion between concrete heap objects and the tracked union.
pub trait HeapVariant: Sized {
    fn into_heap(self) -> Heap;
    fn from_heap(heap: &Heap) -> Option<&Self>;
    fn from_heap_mut(heap: &mut Heap) -> Option<&mut Self>;
}

macro_rules! heap_variant {
    ($type:ty, $variant:ident) => {
        impl HeapVariant for $type {
            fn into_heap(self) -> Heap {
                Heap::$variant(self)
            }

            fn from_heap(heap: &Heap) -> Option<&Self> {
                match heap {
                    Heap::$variant(obj) => Some(obj),
                    _ => None,
                }
            }

            fn from_heap_mut(heap: &mut Heap) -> Option<&mut Self> {
                match heap {
                    Heap::$variant(obj) => Some(obj),
                    _ => None,
                }
            }
        }
    };
}

heap_variant!(StrObj, Str);
heap_variant!(ArrObj, Arr);
heap_variant!(ObjObj, Obj);
heap_variant!(ScopeObj, Scope);
heap_variant!(FunObj, Fun);
heap_variant!(BytecodeObj, Code);
heap_variant!(FrameObj, Frame);
heap_variant!(ErrObj, Err);
heap_variant!(StackObj, Stack);
