// Conversion of the token stream into an abstract syntax tree.
//
// The parser runs the shunting-yard algorithm to obtain a reverse-Polish
// ordering of the tokens and then folds that ordering into a tree with a
// worklist stack. Two kinds of tokens are inserted implicitly on the way:
// void operands (so `-5` and `k = 50%` become ordinary binary expressions)
// and call operators (so `fib 5` and `arr[2][3]` become calls).

use common::errors::CompilationError;
use common::location::{CodeLoc, CodePos};
use common::operators::Operator;
use tokenizer::tokens::{Token, TokenKind};

use crate::ast::{Ast, AstNode};

pub mod ast;

/// Whether a void operand is inserted after a token of this kind.
fn insert_void_after(kind: &TokenKind) -> bool {
    matches!(kind, TokenKind::Operator(_) | TokenKind::LeftBracket(_))
}

/// Whether a call operator is inserted after a token of this kind.
fn insert_call_after(kind: &TokenKind) -> bool {
    !insert_void_after(kind)
}

/// Parses a stream of code tokens into the AST of the whole expression.
pub fn parse(filename: &str, tokens: Vec<Token>) -> Result<Ast, CompilationError> {
    let tokens: Vec<Token> =
        tokens.into_iter().filter(|t| t.kind != TokenKind::Comment).collect();

    // Empty expressions are treated as the void expression `()`.
    if tokens.is_empty() {
        let loc = CodeLoc::at(CodePos { row: 1, col: 1 });
        return Ok(Ast::new(AstNode::Void, loc));
    }

    let queue = into_rpn(filename, &tokens)?;
    build_ast(filename, queue)
}

/// Transforms the token stream into reverse-Polish ordering.
/// <https://en.wikipedia.org/wiki/Shunting_yard_algorithm>
fn into_rpn(filename: &str, tokens: &[Token]) -> Result<Vec<Token>, CompilationError> {
    let mut stack: Vec<Token> = Vec::new(); // Operator stack
    let mut queue: Vec<Token> = Vec::new(); // Output queue

    for (pos, token) in tokens.iter().enumerate() {
        let here = CodeLoc::at(token.loc.beg);
        match &token.kind {
            TokenKind::Nul
            | TokenKind::Integer(_)
            | TokenKind::Float(_)
            | TokenKind::Boolean(_)
            | TokenKind::String(_)
            | TokenKind::Id(_) => {
                // A call operator goes in between two adjacent operands, as
                // in `fib 5`. It has the highest precedence, so it lands on
                // the stack directly.
                if pos != 0 && insert_call_after(&tokens[pos - 1].kind) {
                    stack.push(Token { kind: TokenKind::Operator(Operator::Call), loc: here });
                }
                queue.push(token.clone());
            }
            TokenKind::Operator(op) => {
                // A second consecutive operator (or one right after a left
                // bracket) receives an implicit void operand, as in `(+5)`.
                if pos == 0 || insert_void_after(&tokens[pos - 1].kind) {
                    queue.push(Token { kind: TokenKind::Void, loc: here });
                }
                let m1 = op.meta();
                // Pop operators whose result is computed first.
                while let Some(top) = stack.last() {
                    let TokenKind::Operator(op2) = &top.kind else {
                        break; // Found a bracket.
                    };
                    let m2 = op2.meta();
                    if m2.order < m1.order || (m2.order == m1.order && m1.left) {
                        queue.push(stack.pop().unwrap());
                    } else {
                        break;
                    }
                }
                stack.push(token.clone());
            }
            TokenKind::LeftBracket(_) => {
                if pos != 0 && insert_call_after(&tokens[pos - 1].kind) {
                    // Flush stacked indexing operators first so that chains
                    // like `arr[2][3]` stay left-associative.
                    while let Some(top) = stack.last() {
                        let TokenKind::Operator(op2) = &top.kind else {
                            break;
                        };
                        if op2.meta().order == 0 {
                            queue.push(stack.pop().unwrap());
                        } else {
                            break;
                        }
                    }
                    stack.push(Token { kind: TokenKind::Operator(Operator::Call), loc: here });
                }
                stack.push(token.clone());
            }
            TokenKind::RightBracket(br) => {
                if pos == 0 || insert_void_after(&tokens[pos - 1].kind) {
                    queue.push(Token { kind: TokenKind::Void, loc: here });
                }
                // Pop the operators enclosed by the current bracket pair.
                loop {
                    match stack.last() {
                        None => {
                            return Err(CompilationError::new(
                                filename,
                                token.loc,
                                "unmatched right bracket",
                            ));
                        }
                        Some(top) if matches!(top.kind, TokenKind::LeftBracket(_)) => break,
                        Some(_) => queue.push(stack.pop().unwrap()),
                    }
                }
                let left = stack.pop().unwrap();
                if left.kind != TokenKind::LeftBracket(*br) {
                    return Err(CompilationError::new(
                        filename,
                        token.loc,
                        "brackets do not match",
                    ));
                }
                queue.push(token.clone());
            }
            TokenKind::Comment | TokenKind::Void => {
                unreachable!("filtered token kind in parser input")
            }
        }
    }

    // A trailing operator receives a void operand too, as in `k = 50%`.
    let last = tokens.last().unwrap();
    if insert_void_after(&last.kind) {
        queue.push(Token { kind: TokenKind::Void, loc: CodeLoc::at(last.loc.end) });
    }

    // Drain the remaining operators, checking for orphaned brackets.
    while let Some(top) = stack.pop() {
        if matches!(top.kind, TokenKind::LeftBracket(_)) {
            return Err(CompilationError::new(filename, top.loc, "unmatched left bracket"));
        }
        queue.push(top);
    }

    Ok(queue)
}

/// Folds the reverse-Polish token ordering into a tree.
fn build_ast(filename: &str, queue: Vec<Token>) -> Result<Ast, CompilationError> {
    let mut parts: Vec<Ast> = Vec::new();

    for token in queue {
        let loc = token.loc;
        match token.kind {
            TokenKind::Nul => parts.push(Ast::new(AstNode::Nul, loc)),
            TokenKind::Integer(num) => parts.push(Ast::new(AstNode::Integer(num), loc)),
            TokenKind::Float(flp) => parts.push(Ast::new(AstNode::Float(flp), loc)),
            TokenKind::Boolean(bln) => parts.push(Ast::new(AstNode::Boolean(bln), loc)),
            TokenKind::String(str) => parts.push(Ast::new(AstNode::String(str), loc)),
            TokenKind::Id(name) => parts.push(Ast::new(AstNode::Identifier(name), loc)),
            TokenKind::Void => parts.push(Ast::new(AstNode::Void, loc)),
            TokenKind::Operator(op) => {
                let right = parts
                    .pop()
                    .ok_or_else(|| CompilationError::new(filename, loc, "missing operand"))?;
                let left = parts
                    .pop()
                    .ok_or_else(|| CompilationError::new(filename, loc, "missing operand"))?;
                parts.push(Ast::new(
                    AstNode::Operator { op, left: Box::new(left), right: Box::new(right) },
                    loc,
                ));
            }
            TokenKind::RightBracket(bracket) => {
                let child = parts
                    .pop()
                    .ok_or_else(|| CompilationError::new(filename, loc, "missing operand"))?;
                parts.push(Ast::new(AstNode::Bracket { bracket, child: Box::new(child) }, loc));
            }
            TokenKind::LeftBracket(_) | TokenKind::Comment => {
                unreachable!("impossible token kind in output queue")
            }
        }
    }

    // A well-formed expression folds into exactly one tree.
    if parts.len() != 1 {
        let loc = parts.last().map(|ast| ast.location()).unwrap_or_else(|| {
            CodeLoc::at(CodePos { row: 1, col: 1 })
        });
        return Err(CompilationError::new(filename, loc, "missing operator"));
    }
    Ok(parts.pop().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokenizer::tokenize;
    use tokenizer::tokens::Bracket;

    fn parse_str(source: &str) -> Result<Ast, CompilationError> {
        parse("test", tokenize("test", source).unwrap())
    }

    fn operator(ast: &Ast) -> Operator {
        match &ast.node {
            AstNode::Operator { op, .. } => *op,
            other => panic!("expected an operator node, got {other:?}"),
        }
    }

    #[test]
    fn empty_input_is_void() {
        assert!(parse_str("").unwrap().is_void());
        assert!(parse_str("# a comment only").unwrap().is_void());
    }

    #[test]
    fn parse_yields_a_single_root() {
        let ast = parse_str("1 + 2 * 3").unwrap();
        assert_eq!(operator(&ast), Operator::Plus);
    }

    #[test]
    fn prefix_operators_receive_a_void_operand() {
        let ast = parse_str("-5").unwrap();
        let AstNode::Operator { op, left, right } = &ast.node else { panic!() };
        assert_eq!(*op, Operator::Minus);
        assert!(left.is_void());
        assert_eq!(right.node, AstNode::Integer(5));
    }

    #[test]
    fn trailing_operators_receive_a_void_operand() {
        let ast = parse_str("50%").unwrap();
        let AstNode::Operator { op, right, .. } = &ast.node else { panic!() };
        assert_eq!(*op, Operator::Modulo);
        assert!(right.is_void());
    }

    #[test]
    fn adjacent_operands_become_calls() {
        let ast = parse_str("fib 5").unwrap();
        let AstNode::Operator { op, left, right } = &ast.node else { panic!() };
        assert_eq!(*op, Operator::Call);
        assert_eq!(left.identifier(), Some("fib"));
        assert_eq!(right.node, AstNode::Integer(5));
    }

    #[test]
    fn index_chains_stay_left_associative() {
        // `arr[2][3]` must parse as `(arr[2])[3]`.
        let ast = parse_str("arr[2][3]").unwrap();
        let AstNode::Operator { op, left, right } = &ast.node else { panic!() };
        assert_eq!(*op, Operator::Call);
        assert_eq!(operator(left), Operator::Call);
        let AstNode::Bracket { bracket, .. } = &right.node else { panic!() };
        assert_eq!(*bracket, Bracket::Square);
    }

    #[test]
    fn precedence_orders_the_tree() {
        // `a + b * c` keeps the multiplication below the addition.
        let ast = parse_str("a + b * c").unwrap();
        let AstNode::Operator { op, right, .. } = &ast.node else { panic!() };
        assert_eq!(*op, Operator::Plus);
        assert_eq!(operator(right), Operator::Times);

        // Lambdas bind looser than arithmetic.
        let ast = parse_str(".f = .x -> x + 1").unwrap();
        assert_eq!(operator(&ast), Operator::Assign);
    }

    #[test]
    fn bracket_errors() {
        assert!(parse_str("(1 + 2").is_err());
        assert!(parse_str("1 + 2)").is_err());
        assert!(parse_str("(1, 2]").is_err());
    }

    #[test]
    fn missing_operators_are_rejected() {
        assert!(parse_str("1 , , 2").is_ok()); // voids fill the gaps
        assert!(parse_str("'a' 'b' 'c'").is_ok()); // calls fill the gaps
    }
}
