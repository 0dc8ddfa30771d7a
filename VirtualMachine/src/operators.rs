// The operator runtime: calls, array indexing, overload dispatch on
// objects, the primitive binary/unary operators and assignment calls.
//
// An operator invocation finds two packs on the stack: the source-level
// left operand on top, the right operand below it. Binary forms take one
// value on each side; unary forms (spellings like `-x` or `not x`) arrive
// with an empty left pack, courtesy of the parser's implicit void operands.

use common::operators::Operator;

use crate::mm::Gc;
use crate::objects::{ArrObj, StackObj, StrObj};
use crate::stack::Control;
use crate::value::Value;
use crate::Vm;

impl Vm {
    pub(crate) fn call_operator(&mut self, st: Gc<StackObj>, op: Operator) -> Result<(), Control> {
        let l_sep = self.top_sep(st)?;
        let r_sep = self.sep_before(st, l_sep)?;
        let l_count = self.values_len(st) - l_sep - 1;
        let r_count = l_sep - r_sep - 1;

        if op == Operator::Call {
            return self.call_value(st, l_sep, r_sep);
        }

        if l_count == 1 && r_count == 1 {
            let l = self.value_at(st, l_sep + 1);
            let r = self.value_at(st, r_sep + 1);
            // An overload on the left object operand wins over everything.
            if let Value::Obj(obj) = l {
                if let Some(name) = op.overload_name() {
                    if let Some(method) = self.mem.get(obj).get_field(name) {
                        return self.call_method(st, method, l, l_sep, r_sep);
                    }
                }
            }
            let result = self.apply_binary(st, op, l, r)?;
            self.truncate(st, r_sep);
            self.push(st, result)
        } else if l_count == 0 && r_count == 1 {
            let r = self.value_at(st, r_sep + 1);
            if op == Operator::Sizeof {
                if let Value::Obj(obj) = r {
                    let name = Operator::Sizeof.overload_name().unwrap();
                    if let Some(method) = self.mem.get(obj).get_field(name) {
                        // [… SEP recv SEP] becomes [… SEP recv], which is
                        // exactly the call convention for the overload.
                        self.truncate(st, l_sep);
                        let Value::Fun(fun) = method else {
                            return Err(self.raise(st, "the get_size overload is not callable"));
                        };
                        return self.call_function(st, fun);
                    }
                }
            }
            let result = self.apply_unary(st, op, r)?;
            self.truncate(st, r_sep);
            self.push(st, result)
        } else {
            Err(self.raise(st, "wrong number of operands for an operator"))
        }
    }

    /// The call operator. The callee pack (on top) must hold one value:
    /// functions are entered, arrays are indexed, objects dispatch to their
    /// `call` field.
    fn call_value(&mut self, st: Gc<StackObj>, l_sep: usize, r_sep: usize) -> Result<(), Control> {
        if self.values_len(st) - l_sep != 2 {
            return Err(self.raise(st, "a single callable value is expected"));
        }
        let callee = self.value_at(st, l_sep + 1);
        match callee {
            Value::Fun(fun) => {
                self.truncate(st, l_sep);
                self.call_function(st, fun)
            }
            Value::Arr(arr) => self.index_array(st, arr, l_sep, r_sep),
            Value::Obj(obj) => {
                let name = Operator::Call.overload_name().unwrap();
                match self.mem.get(obj).get_field(name) {
                    Some(method) => self.call_method(st, method, callee, l_sep, r_sep),
                    None => Err(self.raise(st, "object is not callable")),
                }
            }
            other => Err(self
                .raise(st, &format!("cannot call a value of type {}", other.type_name()))),
        }
    }

    /// Calls an overload method: the callee pack is dropped and the
    /// receiver is inserted as the first argument.
    fn call_method(
        &mut self,
        st: Gc<StackObj>,
        method: Value,
        receiver: Value,
        l_sep: usize,
        r_sep: usize,
    ) -> Result<(), Control> {
        let Value::Fun(fun) = method else {
            return Err(self.raise(st, "the operator overload is not callable"));
        };
        self.truncate(st, l_sep);
        self.mem.get_mut(st).values.insert(r_sep + 1, receiver);
        self.call_function(st, fun)
    }

    /// Indexing an array: the argument pack must hold exactly one array of
    /// integer indices; the addressed elements are pushed in order.
    fn index_array(
        &mut self,
        st: Gc<StackObj>,
        arr: Gc<ArrObj>,
        l_sep: usize,
        r_sep: usize,
    ) -> Result<(), Control> {
        if l_sep - r_sep != 2 {
            return Err(self.raise(st, "a single index array is expected"));
        }
        let index_val = self.value_at(st, r_sep + 1);
        let Value::Arr(indices) = index_val else {
            return Err(self.raise(st, "only arrays can be used as indices"));
        };
        let indices = self.mem.get(indices).values.clone();
        let len = self.mem.get(arr).values.len();
        let mut out = Vec::with_capacity(indices.len());
        for index in indices {
            let Value::Int(index) = index else {
                return Err(self.raise(st, "array indices must be integers"));
            };
            if index < 0 || index as usize >= len {
                return Err(self.raise(st, "array index out of range"));
            }
            out.push(self.mem.get(arr).values[index as usize]);
        }
        self.truncate(st, r_sep);
        for val in out {
            self.push(st, val)?;
        }
        Ok(())
    }

    /// The assignment call (`MOV`), as in `values[1, 2] = 'a', 'b'`: one
    /// value per index is drawn from the reversed right-hand-side pack
    /// below and stored into the array.
    pub(crate) fn call_assignment(&mut self, st: Gc<StackObj>) -> Result<(), Control> {
        let l_sep = self.top_sep(st)?;
        let r_sep = self.sep_before(st, l_sep)?;
        if self.values_len(st) - l_sep != 2 {
            return Err(self.raise(st, "a single assignable value is expected"));
        }
        let callee = self.value_at(st, l_sep + 1);
        let Value::Arr(arr) = callee else {
            return Err(self.raise(st, "expression is not assignable"));
        };
        if l_sep - r_sep != 2 {
            return Err(self.raise(st, "a single index array is expected"));
        }
        let Value::Arr(indices) = self.value_at(st, r_sep + 1) else {
            return Err(self.raise(st, "only arrays can be used as indices"));
        };
        let indices = self.mem.get(indices).values.clone();
        let len = self.mem.get(arr).values.len();
        self.truncate(st, r_sep);
        for index in indices {
            let Value::Int(index) = index else {
                return Err(self.raise(st, "array indices must be integers"));
            };
            if index < 0 || index as usize >= len {
                return Err(self.raise(st, "array index out of range"));
            }
            let val = match self.mem.get(st).values.last() {
                Some(val) if !val.is_sep() => *val,
                _ => return Err(self.raise(st, "not enough values to assign")),
            };
            self.pop(st);
            self.mem.get_mut(arr).values[index as usize] = val;
        }
        Ok(())
    }

    /// Primitive binary operators. Numeric operators demand two integers or
    /// two floats; mixing the types is a panic.
    fn apply_binary(
        &mut self,
        st: Gc<StackObj>,
        op: Operator,
        l: Value,
        r: Value,
    ) -> Result<Value, Control> {
        use Operator::*;
        let result = match (op, l, r) {
            (Times, Value::Int(a), Value::Int(b)) => match a.checked_mul(b) {
                Some(product) => Value::Int(product),
                None => return Err(self.raise(st, "integer overflow")),
            },
            (Times, Value::Flp(a), Value::Flp(b)) => Value::Flp(a * b),
            (Times, Value::Arr(arr), Value::Int(n))
            | (Times, Value::Int(n), Value::Arr(arr)) => self.repeat_array(st, arr, n)?,
            (Divide, Value::Int(_), Value::Int(0)) => {
                return Err(self.raise(st, "division by zero"))
            }
            (Divide, Value::Int(a), Value::Int(b)) => match a.checked_div(b) {
                Some(quotient) => Value::Int(quotient),
                None => return Err(self.raise(st, "integer overflow")),
            },
            (Divide, Value::Flp(a), Value::Flp(b)) => Value::Flp(a / b),
            (Modulo, Value::Int(_), Value::Int(0)) => {
                return Err(self.raise(st, "division by zero"))
            }
            (Modulo, Value::Int(a), Value::Int(b)) => match a.checked_rem(b) {
                Some(rest) => Value::Int(rest),
                None => return Err(self.raise(st, "integer overflow")),
            },
            (Plus, Value::Int(a), Value::Int(b)) => match a.checked_add(b) {
                Some(sum) => Value::Int(sum),
                None => return Err(self.raise(st, "integer overflow")),
            },
            (Plus, Value::Flp(a), Value::Flp(b)) => Value::Flp(a + b),
            (Plus, Value::Str(a), Value::Str(b)) => {
                let bytes = format!("{}{}", self.mem.get(a).bytes, self.mem.get(b).bytes);
                Value::Str(self.alloc(st, StrObj { bytes })?.get())
            }
            (Plus, Value::Arr(a), Value::Arr(b)) => {
                let mut values = self.mem.get(a).values.clone();
                values.extend_from_slice(&self.mem.get(b).values);
                Value::Arr(self.alloc(st, ArrObj { values })?.get())
            }
            (Minus, Value::Int(a), Value::Int(b)) => match a.checked_sub(b) {
                Some(difference) => Value::Int(difference),
                None => return Err(self.raise(st, "integer overflow")),
            },
            (Minus, Value::Flp(a), Value::Flp(b)) => Value::Flp(a - b),

            (Equals, _, _) => Value::Bln(self.values_equal(st, l, r)?),
            (Differs, _, _) => Value::Bln(!self.values_equal(st, l, r)?),
            (Less | Greater | LessEqual | GreaterEqual, _, _) => {
                Value::Bln(self.values_ordered(st, op, l, r)?)
            }

            (Is, _, _) => Value::Bln(self.is_identical(l, r)),

            (BwAnd, Value::Int(a), Value::Int(b)) => Value::Int(a & b),
            (BwOr, Value::Int(a), Value::Int(b)) => Value::Int(a | b),
            (BwXor, Value::Int(a), Value::Int(b)) => Value::Int(a ^ b),
            (BwShl, Value::Int(a), Value::Int(b)) => {
                if !(0..64).contains(&b) {
                    return Err(self.raise(st, "invalid shift amount"));
                }
                Value::Int(((a as u64) << b) as i64)
            }
            (BwShr, Value::Int(a), Value::Int(b)) => {
                if !(0..64).contains(&b) {
                    return Err(self.raise(st, "invalid shift amount"));
                }
                Value::Int(a >> b)
            }

            _ => {
                return Err(self.raise(
                    st,
                    &format!(
                        "operator is not defined for values of types {} and {}",
                        l.type_name(),
                        r.type_name()
                    ),
                ))
            }
        };
        Ok(result)
    }

    /// The ordering comparisons, defined on two integers, two floats or two
    /// strings.
    fn values_ordered(
        &mut self,
        st: Gc<StackObj>,
        op: Operator,
        l: Value,
        r: Value,
    ) -> Result<bool, Control> {
        fn decide<T: PartialOrd>(op: Operator, a: T, b: T) -> bool {
            match op {
                Operator::Less => a < b,
                Operator::Greater => a > b,
                Operator::LessEqual => a <= b,
                Operator::GreaterEqual => a >= b,
                _ => unreachable!("not an ordering operator"),
            }
        }
        match (l, r) {
            (Value::Int(a), Value::Int(b)) => Ok(decide(op, a, b)),
            (Value::Flp(a), Value::Flp(b)) => Ok(decide(op, a, b)),
            (Value::Str(a), Value::Str(b)) => {
                Ok(decide(op, &self.mem.get(a).bytes, &self.mem.get(b).bytes))
            }
            _ => Err(self.raise(
                st,
                &format!(
                    "cannot compare values of types {} and {}",
                    l.type_name(),
                    r.type_name()
                ),
            )),
        }
    }

    /// Primitive unary operators (the left pack was empty).
    fn apply_unary(&mut self, st: Gc<StackObj>, op: Operator, r: Value) -> Result<Value, Control> {
        use Operator::*;
        let result = match (op, r) {
            (Plus, Value::Int(_) | Value::Flp(_)) => r,
            (Minus, Value::Int(a)) => match a.checked_neg() {
                Some(negated) => Value::Int(negated),
                None => return Err(self.raise(st, "integer overflow")),
            },
            (Minus, Value::Flp(a)) => Value::Flp(-a),
            (Not, Value::Bln(a)) => Value::Bln(!a),
            (BwNot, Value::Int(a)) => Value::Int(!a),
            (Sizeof, Value::Str(str)) => Value::Int(self.mem.get(str).bytes.len() as i64),
            (Sizeof, Value::Arr(arr)) => Value::Int(self.mem.get(arr).values.len() as i64),
            _ => {
                return Err(self.raise(
                    st,
                    &format!("operator is not defined for a value of type {}", r.type_name()),
                ))
            }
        };
        Ok(result)
    }

    /// Array repetition for `arr * n` and `n * arr`.
    fn repeat_array(&mut self, st: Gc<StackObj>, arr: Gc<ArrObj>, n: i64) -> Result<Value, Control> {
        if n < 0 {
            return Err(self.raise(st, "negative repetition count"));
        }
        let src = self.mem.get(arr).values.clone();
        let mut values = Vec::with_capacity(src.len() * n as usize);
        for _ in 0..n {
            values.extend_from_slice(&src);
        }
        Ok(Value::Arr(self.alloc(st, ArrObj { values })?.get()))
    }

    /// Equality as used by `==` and `!=`: same-typed operands only;
    /// reference values compare by identity (strings by content).
    fn values_equal(&mut self, st: Gc<StackObj>, l: Value, r: Value) -> Result<bool, Control> {
        let equal = match (l, r) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Flp(a), Value::Flp(b)) => a == b,
            (Value::Bln(a), Value::Bln(b)) => a == b,
            (Value::Nul, Value::Nul) => true,
            (Value::Str(a), Value::Str(b)) => {
                a == b || self.mem.get(a).bytes == self.mem.get(b).bytes
            }
            (Value::Arr(a), Value::Arr(b)) => a == b,
            (Value::Obj(a), Value::Obj(b)) => a == b,
            (Value::Fun(a), Value::Fun(b)) => a == b,
            (Value::Err(a), Value::Err(b)) => a == b,
            _ => {
                return Err(self.raise(
                    st,
                    &format!(
                        "cannot compare values of types {} and {}",
                        l.type_name(),
                        r.type_name()
                    ),
                ))
            }
        };
        Ok(equal)
    }

    /// Identity: value equality on primitives, reference identity on heap
    /// values. Never panics.
    pub fn is_identical(&self, l: Value, r: Value) -> bool {
        match (l, r) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Flp(a), Value::Flp(b)) => a == b,
            (Value::Bln(a), Value::Bln(b)) => a == b,
            (Value::Nul, Value::Nul) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Arr(a), Value::Arr(b)) => a == b,
            (Value::Obj(a), Value::Obj(b)) => a == b,
            (Value::Fun(a), Value::Fun(b)) => a == b,
            (Value::Err(a), Value::Err(b)) => a == b,
            (Value::Ptr(a), Value::Ptr(b)) => a == b,
            _ => false,
        }
    }
}
