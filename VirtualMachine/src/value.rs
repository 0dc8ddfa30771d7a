// The value union and its display helpers.

use crate::mm::Gc;
use crate::objects::{ArrObj, ErrObj, FunObj, ObjObj, StrObj};
use crate::Vm;

/// A Funscript value. Primitive payloads are inline; reference payloads are
/// handles into the memory manager. `Sep` is the pack separator and never
/// escapes to user code.
#[derive(Clone, Copy, PartialEq)]
pub enum Value {
    Sep,
    Int(i64),
    Flp(f64),
    Bln(bool),
    Str(Gc<StrObj>),
    Arr(Gc<ArrObj>),
    Obj(Gc<ObjObj>),
    Fun(Gc<FunObj>),
    Err(Gc<ErrObj>),
    Nul,
    /// A raw allocation pointer, used mostly by native code.
    Ptr(usize),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Sep => "separator",
            Value::Int(_) => "integer",
            Value::Flp(_) => "float",
            Value::Bln(_) => "boolean",
            Value::Str(_) => "string",
            Value::Arr(_) => "array",
            Value::Obj(_) => "object",
            Value::Fun(_) => "function",
            Value::Err(_) => "error",
            Value::Nul => "nul",
            Value::Ptr(_) => "pointer",
        }
    }

    /// The slot index of the referenced allocation, for reference-typed
    /// values.
    pub fn heap_index(&self) -> Option<usize> {
        match self {
            Value::Str(h) => Some(h.index()),
            Value::Arr(h) => Some(h.index()),
            Value::Obj(h) => Some(h.index()),
            Value::Fun(h) => Some(h.index()),
            Value::Err(h) => Some(h.index()),
            Value::Ptr(index) => Some(*index),
            _ => None,
        }
    }

    pub fn is_sep(&self) -> bool {
        matches!(self, Value::Sep)
    }
}

const MAX_DISPLAY_DEPTH: usize = 6;

impl Vm {
    /// Plain rendering of a value: strings stay unquoted.
    pub fn display_plain(&self, val: Value) -> String {
        if let Value::Str(str) = val {
            return self.mem.get(str).bytes.clone();
        }
        self.display_depth(val, 0)
    }

    /// Pretty rendering of a value: strings are quoted, containers show
    /// their contents up to a fixed depth.
    pub fn display_pretty(&self, val: Value) -> String {
        self.display_depth(val, 0)
    }

    fn display_depth(&self, val: Value, depth: usize) -> String {
        if depth > MAX_DISPLAY_DEPTH {
            return "…".to_string();
        }
        match val {
            Value::Sep => "(sep)".to_string(),
            Value::Int(num) => num.to_string(),
            Value::Flp(flp) => display_float(flp),
            Value::Bln(true) => "yes".to_string(),
            Value::Bln(false) => "no".to_string(),
            Value::Nul => "nul".to_string(),
            Value::Str(str) => format!("'{}'", self.mem.get(str).bytes),
            Value::Arr(arr) => {
                let parts: Vec<String> = self
                    .mem
                    .get(arr)
                    .values
                    .clone()
                    .into_iter()
                    .map(|v| self.display_depth(v, depth + 1))
                    .collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Obj(obj) => {
                let fields: Vec<(String, Value)> =
                    self.mem.get(obj).fields().map(|(name, v)| (name.to_string(), v)).collect();
                let positional = self.mem.get(obj).positional.clone();
                let mut parts: Vec<String> = fields
                    .into_iter()
                    .map(|(name, v)| format!(".{} = {}", name, self.display_depth(v, depth + 1)))
                    .collect();
                parts.extend(positional.into_iter().map(|v| self.display_depth(v, depth + 1)));
                format!("{{{}}}", parts.join("; "))
            }
            Value::Fun(fun) => match &self.mem.get(fun).name {
                Some(name) => format!("<function {name}>"),
                None => "<function>".to_string(),
            },
            Value::Err(err) => {
                let obj = self.mem.get(err).obj;
                format!("<error {}>", self.display_depth(Value::Obj(obj), depth + 1))
            }
            Value::Ptr(index) => format!("<ptr {index}>"),
        }
    }
}

/// Formats a float so that it never reads back as an integer literal.
fn display_float(flp: f64) -> String {
    if flp.is_nan() {
        "nan".to_string()
    } else if flp.is_infinite() {
        if flp > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if flp == flp.trunc() && flp.abs() < 1e15 {
        format!("{flp:.1}")
    } else {
        flp.to_string()
    }
}
