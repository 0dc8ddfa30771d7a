// Lowering of AST nodes into instruction sequences.
//
// Every node can be lowered in two modes: `eval` pushes the expression's
// value pack onto the operand stack, `move` consumes a value pack and
// assigns it to the target the expression describes. Only a subset of
// syntactic forms is assignable; everything else is a compilation error.

use common::errors::CompilationError;
use common::instruction::{Instruction, Opcode, TypeTag};
use common::location::CodeLoc;
use common::operators::Operator;
use parser::ast::{Ast, AstNode};
use tokenizer::tokens::Bracket;

use crate::{Assembler, DATA_CHUNK};

/// Optimization info passed up when generating evaluation bytecode.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpEval {
    /// The generated code is statically known to need no scope of its own.
    pub no_scope: bool,
}

/// Optimization info passed up when generating assignment bytecode.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpMove {
    pub no_scope: bool,
}

/// Optimization info passed down when generating evaluation bytecode.
/// Reserved for future use.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownEval;

/// Optimization info passed down when generating assignment bytecode.
/// Reserved for future use.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownMove;

fn error(asm: &Assembler, loc: CodeLoc, msg: &str) -> CompilationError {
    CompilationError::new(&asm.filename, loc, msg)
}

/// Emits instructions that push the expression's value pack.
pub fn compile_eval(
    asm: &mut Assembler,
    ch: usize,
    ast: &Ast,
    d: DownEval,
) -> Result<UpEval, CompilationError> {
    let loc = ast.token_loc;
    match &ast.node {
        AstNode::Integer(num) => {
            let meta = asm.put_meta(loc.beg);
            asm.put(ch, Instruction::new(Opcode::Val, meta, TypeTag::Int as u16, *num as u64));
            Ok(UpEval { no_scope: true })
        }
        AstNode::Float(flp) => {
            let meta = asm.put_meta(loc.beg);
            asm.put(ch, Instruction::new(Opcode::Val, meta, TypeTag::Flp as u16, flp.to_bits()));
            Ok(UpEval { no_scope: true })
        }
        AstNode::Boolean(bln) => {
            let meta = asm.put_meta(loc.beg);
            asm.put(ch, Instruction::new(Opcode::Val, meta, TypeTag::Bln as u16, *bln as u64));
            Ok(UpEval { no_scope: true })
        }
        AstNode::Nul => {
            let meta = asm.put_meta(loc.beg);
            asm.put(ch, Instruction::new(Opcode::Val, meta, TypeTag::Nul as u16, 0));
            Ok(UpEval { no_scope: true })
        }
        AstNode::String(str) => {
            if str.len() > u16::MAX as usize {
                return Err(error(asm, loc, "string literal is too long"));
            }
            let meta = asm.put_meta(loc.beg);
            let pos = asm.put(ch, Instruction::new(Opcode::Str, meta, str.len() as u16, 0));
            let off = asm.add_string(str);
            asm.point_long_arg(ch, pos, DATA_CHUNK, off);
            Ok(UpEval { no_scope: true })
        }
        AstNode::Identifier(name) => {
            let meta = asm.put_meta(loc.beg);
            let pos = asm.put(ch, Instruction::new(Opcode::Vgt, meta, 0, 0));
            let off = asm.add_string(name);
            asm.point_long_arg(ch, pos, DATA_CHUNK, off);
            Ok(UpEval { no_scope: true })
        }
        AstNode::Void => Ok(UpEval { no_scope: true }),
        AstNode::Bracket { bracket, child } => compile_bracket_eval(asm, ch, ast, *bracket, child, d),
        AstNode::Operator { op, left, right } => {
            compile_operator_eval(asm, ch, ast, *op, left, right)
        }
    }
}

fn compile_bracket_eval(
    asm: &mut Assembler,
    ch: usize,
    ast: &Ast,
    bracket: Bracket,
    child: &Ast,
    d: DownEval,
) -> Result<UpEval, CompilationError> {
    let loc = ast.token_loc;
    match bracket {
        Bracket::Plain => {
            let meta = asm.put_meta(loc.beg);
            let scp_pos = asm.put(ch, Instruction::new(Opcode::Scp, meta, 1, 0));
            let u0 = compile_eval(asm, ch, child, d)?;
            let meta_end = asm.put_meta(loc.end);
            if u0.no_scope {
                // The sub-expression needs no scope; patch the pair away.
                asm.put(ch, Instruction::new(Opcode::Nop, meta_end, 0, 0));
                asm.set(ch, scp_pos, Instruction::new(Opcode::Nop, meta, 0, 0));
            } else {
                asm.put(ch, Instruction::new(Opcode::Scp, meta_end, 0, 0));
            }
            Ok(UpEval { no_scope: true })
        }
        Bracket::Curly => {
            let meta = asm.put_meta(loc.beg);
            asm.put(ch, Instruction::new(Opcode::Scp, meta, 1, 0)); // Object scope
            let meta = asm.put_meta(child.location().beg);
            asm.put(ch, Instruction::new(Opcode::Sep, meta, 0, 0));
            compile_eval(asm, ch, child, d)?;
            let meta = asm.put_meta(loc.end);
            asm.put(ch, Instruction::new(Opcode::Obj, meta, 0, 0));
            asm.put(ch, Instruction::new(Opcode::Scp, meta, 0, 0));
            Ok(UpEval { no_scope: true })
        }
        Bracket::Square => {
            let meta = asm.put_meta(loc.beg);
            let scp_pos = asm.put(ch, Instruction::new(Opcode::Scp, meta, 1, 0));
            let sep_meta = asm.put_meta(child.location().beg);
            asm.put(ch, Instruction::new(Opcode::Sep, sep_meta, 0, 0));
            let u0 = compile_eval(asm, ch, child, d)?;
            let meta_end = asm.put_meta(loc.end);
            asm.put(ch, Instruction::new(Opcode::Arr, meta_end, 0, 0));
            if u0.no_scope {
                asm.put(ch, Instruction::new(Opcode::Nop, meta_end, 0, 0));
                asm.set(ch, scp_pos, Instruction::new(Opcode::Nop, meta, 0, 0));
            } else {
                asm.put(ch, Instruction::new(Opcode::Scp, meta_end, 0, 0));
            }
            Ok(UpEval { no_scope: true })
        }
    }
}

fn compile_operator_eval(
    asm: &mut Assembler,
    ch: usize,
    ast: &Ast,
    op: Operator,
    left: &Ast,
    right: &Ast,
) -> Result<UpEval, CompilationError> {
    let loc = ast.token_loc;
    match op {
        Operator::Assign => {
            let meta = asm.put_meta(right.location().beg);
            asm.put(ch, Instruction::new(Opcode::Sep, meta, 0, 0));
            let u1 = compile_eval(asm, ch, right, DownEval)?;
            let meta = asm.put_meta(loc.beg);
            asm.put(ch, Instruction::new(Opcode::Rev, meta, 0, 0));
            let u2 = compile_move(asm, ch, left, DownMove)?;
            let meta = asm.put_meta(loc.beg);
            asm.put(ch, Instruction::new(Opcode::Dis, meta, 1, 0));
            Ok(UpEval { no_scope: u1.no_scope && u2.no_scope })
        }
        Operator::Append => {
            let u1 = compile_eval(asm, ch, left, DownEval)?;
            let u2 = compile_eval(asm, ch, right, DownEval)?;
            Ok(UpEval { no_scope: u1.no_scope && u2.no_scope })
        }
        Operator::Discard => {
            let meta = asm.put_meta(left.location().beg);
            asm.put(ch, Instruction::new(Opcode::Sep, meta, 0, 0));
            let u1 = compile_eval(asm, ch, left, DownEval)?;
            let meta = asm.put_meta(loc.beg);
            asm.put(ch, Instruction::new(Opcode::Dis, meta, 0, 0));
            let u2 = compile_eval(asm, ch, right, DownEval)?;
            Ok(UpEval { no_scope: u1.no_scope && u2.no_scope })
        }
        Operator::Lambda => {
            let new_ch = asm.new_chunk(); // Chunk of the new function
            let meta = asm.put_meta(loc.beg);
            let pos = asm.put(ch, Instruction::new(Opcode::Val, meta, TypeTag::Fun as u16, 0));
            asm.point_long_arg(ch, pos, new_ch, 0);
            // Here goes the bytecode of the new function.
            let met_pos = asm.put(new_ch, Instruction::new(Opcode::Met, 0, 0, 0));
            asm.point_long_arg(new_ch, met_pos, DATA_CHUNK, 0);
            let meta = asm.put_meta(loc.beg);
            asm.put(new_ch, Instruction::new(Opcode::Scp, meta, 1, 0)); // Function scope
            asm.put(new_ch, Instruction::new(Opcode::Rev, meta, 0, 0)); // Argument order
            compile_move(asm, new_ch, left, DownMove)?; // Bind the parameters
            asm.put(new_ch, Instruction::new(Opcode::Dis, meta, 1, 0)); // Enforce the arity
            compile_eval(asm, new_ch, right, DownEval)?; // Function body
            asm.put(new_ch, Instruction::new(Opcode::Scp, meta, 0, 0));
            let end_meta = asm.put_meta(right.location().end);
            asm.put(new_ch, Instruction::new(Opcode::End, end_meta, 0, 0));
            Ok(UpEval { no_scope: true })
        }
        Operator::Index => {
            let Some(name) = right.identifier() else {
                return Err(error(asm, right.location(), "identifier expected"));
            };
            let name = name.to_string();
            if left.is_void() {
                // `.x` in evaluation position reads like a plain identifier.
                let meta = asm.put_meta(loc.beg);
                let pos = asm.put(ch, Instruction::new(Opcode::Vgt, meta, 0, 0));
                let off = asm.add_string(&name);
                asm.point_long_arg(ch, pos, DATA_CHUNK, off);
                return Ok(UpEval { no_scope: true });
            }
            let meta = asm.put_meta(left.location().beg);
            asm.put(ch, Instruction::new(Opcode::Sep, meta, 0, 0));
            compile_eval(asm, ch, left, DownEval)?;
            let meta = asm.put_meta(loc.beg);
            let pos = asm.put(ch, Instruction::new(Opcode::Get, meta, 0, 0));
            let off = asm.add_string(&name);
            asm.point_long_arg(ch, pos, DATA_CHUNK, off);
            Ok(UpEval { no_scope: false })
        }
        Operator::Has => {
            let Some(name) = right.identifier() else {
                return Err(error(asm, right.location(), "identifier expected"));
            };
            let name = name.to_string();
            let meta = asm.put_meta(left.location().beg);
            asm.put(ch, Instruction::new(Opcode::Sep, meta, 0, 0));
            let u1 = compile_eval(asm, ch, left, DownEval)?;
            let meta = asm.put_meta(loc.beg);
            let pos = asm.put(ch, Instruction::new(Opcode::Has, meta, 0, 0));
            let off = asm.add_string(&name);
            asm.point_long_arg(ch, pos, DATA_CHUNK, off);
            Ok(UpEval { no_scope: u1.no_scope })
        }
        Operator::Then => {
            let meta = asm.put_meta(left.location().beg);
            asm.put(ch, Instruction::new(Opcode::Sep, meta, 0, 0));
            let u1 = compile_eval(asm, ch, left, DownEval)?;
            let pos = asm.put(ch, Instruction::nop()); // Jump over the branch
            let u2 = compile_eval(asm, ch, right, DownEval)?;
            let meta = asm.put_meta(loc.beg);
            asm.set(ch, pos, Instruction::new(Opcode::Jno, meta, 0, 0));
            let end = asm.chunk_size(ch);
            asm.point_long_arg(ch, pos, ch, end);
            Ok(UpEval { no_scope: u1.no_scope && u2.no_scope })
        }
        Operator::Else => {
            let AstNode::Operator { op: Operator::Then, left: cond, right: then_branch } =
                &left.node
            else {
                return Err(error(asm, left.location(), "expected `then` operator"));
            };
            let meta = asm.put_meta(cond.location().beg);
            asm.put(ch, Instruction::new(Opcode::Sep, meta, 0, 0));
            let u1 = compile_eval(asm, ch, cond, DownEval)?;
            let pos1 = asm.put(ch, Instruction::nop()); // Jump over `then`
            let u2 = compile_eval(asm, ch, then_branch, DownEval)?;
            let pos2 = asm.put(ch, Instruction::nop()); // Jump over `else`
            let meta = asm.put_meta(left.token_loc.beg);
            asm.set(ch, pos1, Instruction::new(Opcode::Jno, meta, 0, 0));
            let here = asm.chunk_size(ch);
            asm.point_long_arg(ch, pos1, ch, here);
            let u3 = compile_eval(asm, ch, right, DownEval)?;
            let meta = asm.put_meta(loc.beg);
            asm.set(ch, pos2, Instruction::new(Opcode::Jmp, meta, 0, 0));
            let here = asm.chunk_size(ch);
            asm.point_long_arg(ch, pos2, ch, here);
            Ok(UpEval { no_scope: u1.no_scope && u2.no_scope && u3.no_scope })
        }
        Operator::Until => {
            let pos = asm.chunk_size(ch); // Where to jump back to
            let u1 = compile_eval(asm, ch, left, DownEval)?;
            let meta = asm.put_meta(right.location().beg);
            asm.put(ch, Instruction::new(Opcode::Sep, meta, 0, 0));
            let u2 = compile_eval(asm, ch, right, DownEval)?;
            let meta = asm.put_meta(right.location().end);
            let jno = asm.put(ch, Instruction::new(Opcode::Jno, meta, 0, 0));
            asm.point_long_arg(ch, jno, ch, pos);
            Ok(UpEval { no_scope: u1.no_scope && u2.no_scope })
        }
        Operator::Repeats => {
            let pos0 = asm.chunk_size(ch); // Where to jump back to
            let meta = asm.put_meta(loc.beg);
            asm.put(ch, Instruction::new(Opcode::Sep, meta, 0, 0));
            let u1 = compile_eval(asm, ch, left, DownEval)?;
            let pos1 = asm.put(ch, Instruction::nop()); // Jump over the body
            let u2 = compile_eval(asm, ch, right, DownEval)?;
            let meta = asm.put_meta(right.location().end);
            let jmp = asm.put(ch, Instruction::new(Opcode::Jmp, meta, 0, 0));
            asm.point_long_arg(ch, jmp, ch, pos0);
            let meta = asm.put_meta(loc.beg);
            asm.set(ch, pos1, Instruction::new(Opcode::Jno, meta, 0, 0));
            let here = asm.chunk_size(ch);
            asm.point_long_arg(ch, pos1, ch, here);
            Ok(UpEval { no_scope: u1.no_scope && u2.no_scope })
        }
        Operator::And | Operator::Or => {
            let meta = asm.put_meta(left.location().beg);
            asm.put(ch, Instruction::new(Opcode::Sep, meta, 0, 0));
            let u1 = compile_eval(asm, ch, left, DownEval)?;
            // Preserve the value before converting it to a boolean.
            let meta = asm.put_meta(left.location().end);
            asm.put(ch, Instruction::new(Opcode::Dup, meta, 0, 0));
            let pos = asm.put(ch, Instruction::nop()); // Jump over the right operand
            asm.put(ch, Instruction::new(Opcode::Dis, meta, 0, 0));
            let meta = asm.put_meta(right.location().beg);
            asm.put(ch, Instruction::new(Opcode::Sep, meta, 0, 0));
            let u2 = compile_eval(asm, ch, right, DownEval)?;
            let jump = if op == Operator::And { Opcode::Jno } else { Opcode::Jys };
            let meta = asm.put_meta(loc.beg);
            asm.set(ch, pos, Instruction::new(jump, meta, 0, 0));
            let here = asm.chunk_size(ch);
            asm.point_long_arg(ch, pos, ch, here);
            let meta = asm.put_meta(ast.location().end);
            asm.put(ch, Instruction::new(Opcode::Rem, meta, 0, 0));
            Ok(UpEval { no_scope: u1.no_scope && u2.no_scope })
        }
        Operator::Extract => {
            let meta = asm.put_meta(left.location().beg);
            asm.put(ch, Instruction::new(Opcode::Sep, meta, 0, 0));
            let u1 = compile_eval(asm, ch, left, DownEval)?;
            if right.is_void() {
                // As in `.file = open(path)?` — errors are propagated.
                let meta = asm.put_meta(loc.beg);
                asm.put(ch, Instruction::new(Opcode::Ext, meta, 0, 0));
                Ok(UpEval { no_scope: u1.no_scope })
            } else {
                // As in `.name = next_string() ? 'unnamed'`.
                let pos = asm.put(ch, Instruction::nop()); // Extract and jump over fallback
                let u2 = compile_eval(asm, ch, right, DownEval)?;
                let meta = asm.put_meta(loc.beg);
                asm.set(ch, pos, Instruction::new(Opcode::Ext, meta, 0, 0));
                let here = asm.chunk_size(ch);
                asm.point_long_arg(ch, pos, ch, here);
                Ok(UpEval { no_scope: u1.no_scope && u2.no_scope })
            }
        }
        Operator::Check => {
            // The left operand is the type list: `int: x + y`. The types
            // pack ends up on top of the values pack.
            let meta = asm.put_meta(right.location().beg);
            asm.put(ch, Instruction::new(Opcode::Sep, meta, 0, 0));
            let u1 = compile_eval(asm, ch, right, DownEval)?;
            let meta = asm.put_meta(left.location().beg);
            asm.put(ch, Instruction::new(Opcode::Sep, meta, 0, 0));
            let u2 = compile_eval(asm, ch, left, DownEval)?;
            let meta = asm.put_meta(loc.beg);
            asm.put(ch, Instruction::new(Opcode::Chk, meta, 0, 0));
            asm.put(ch, Instruction::new(Opcode::Rem, meta, 0, 0));
            Ok(UpEval { no_scope: u1.no_scope && u2.no_scope })
        }
        _ => {
            // Ordinary operators evaluate both operands (the left one ends
            // up as the topmost pack) and defer to the operator runtime.
            let meta = asm.put_meta(right.location().beg);
            asm.put(ch, Instruction::new(Opcode::Sep, meta, 0, 0));
            let u1 = compile_eval(asm, ch, right, DownEval)?;
            let meta = asm.put_meta(left.location().beg);
            asm.put(ch, Instruction::new(Opcode::Sep, meta, 0, 0));
            let u2 = compile_eval(asm, ch, left, DownEval)?;
            let meta = asm.put_meta(loc.beg);
            asm.put(ch, Instruction::new(Opcode::Opr, meta, op as u16, 0));
            Ok(UpEval { no_scope: u1.no_scope && u2.no_scope })
        }
    }
}

/// Emits instructions that consume a value pack and assign it to the target
/// described by the expression.
pub fn compile_move(
    asm: &mut Assembler,
    ch: usize,
    ast: &Ast,
    _d: DownMove,
) -> Result<UpMove, CompilationError> {
    let loc = ast.token_loc;
    match &ast.node {
        AstNode::Identifier(name) => {
            let meta = asm.put_meta(loc.beg);
            let pos = asm.put(ch, Instruction::new(Opcode::Vst, meta, 0, 0));
            let off = asm.add_string(name);
            asm.point_long_arg(ch, pos, DATA_CHUNK, off);
            Ok(UpMove { no_scope: true })
        }
        AstNode::Void => Ok(UpMove { no_scope: true }),
        AstNode::Bracket { bracket: Bracket::Plain, child } => {
            compile_move(asm, ch, child, DownMove)
        }
        AstNode::Operator { op, left, right } => match op {
            Operator::Append => {
                let u1 = compile_move(asm, ch, left, DownMove)?;
                let u2 = compile_move(asm, ch, right, DownMove)?;
                Ok(UpMove { no_scope: u1.no_scope && u2.no_scope })
            }
            Operator::Index => {
                let Some(name) = right.identifier() else {
                    return Err(error(asm, right.location(), "identifier expected"));
                };
                let name = name.to_string();
                if left.is_void() {
                    // `.x = …` declares in the innermost scope; the leading
                    // dot of the stored name carries that request.
                    let meta = asm.put_meta(loc.beg);
                    let pos = asm.put(ch, Instruction::new(Opcode::Vst, meta, 0, 0));
                    let off = asm.add_string(&format!(".{name}"));
                    asm.point_long_arg(ch, pos, DATA_CHUNK, off);
                    return Ok(UpMove { no_scope: false });
                }
                let meta = asm.put_meta(left.location().beg);
                asm.put(ch, Instruction::new(Opcode::Sep, meta, 0, 0));
                compile_eval(asm, ch, left, DownEval)?;
                let meta = asm.put_meta(loc.beg);
                let pos = asm.put(ch, Instruction::new(Opcode::Set, meta, 0, 0));
                let off = asm.add_string(&name);
                asm.point_long_arg(ch, pos, DATA_CHUNK, off);
                Ok(UpMove { no_scope: false })
            }
            Operator::Call => {
                // The assignment call, as in `arr[5] = 1`.
                let meta = asm.put_meta(right.location().beg);
                asm.put(ch, Instruction::new(Opcode::Sep, meta, 0, 0));
                let u1 = compile_eval(asm, ch, right, DownEval)?;
                let meta = asm.put_meta(left.location().beg);
                asm.put(ch, Instruction::new(Opcode::Sep, meta, 0, 0));
                let u2 = compile_eval(asm, ch, left, DownEval)?;
                let meta = asm.put_meta(loc.beg);
                asm.put(ch, Instruction::new(Opcode::Mov, meta, 0, 0));
                Ok(UpMove { no_scope: u1.no_scope && u2.no_scope })
            }
            Operator::Check => {
                // `.x: int = …` checks the incoming values, then assigns.
                let meta = asm.put_meta(right.location().beg);
                asm.put(ch, Instruction::new(Opcode::Sep, meta, 0, 0));
                let u1 = compile_eval(asm, ch, right, DownEval)?;
                let meta = asm.put_meta(loc.beg);
                asm.put(ch, Instruction::new(Opcode::Rev, meta, 0, 0));
                asm.put(ch, Instruction::new(Opcode::Chk, meta, 1, 0));
                let u2 = compile_move(asm, ch, left, DownMove)?;
                Ok(UpMove { no_scope: u1.no_scope && u2.no_scope })
            }
            _ => Err(error(asm, ast.location(), "expression is not assignable")),
        },
        _ => Err(error(asm, ast.location(), "expression is not assignable")),
    }
}
