use common::location::CodeLoc;
use common::operators::Operator;
use tokenizer::tokens::Bracket;

/// A node of the abstract syntax tree. Every node exclusively owns its
/// children; the root is owned by the caller of [`crate::parse`].
#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    Nul,
    Identifier(String),
    /// The empty expression, synthesized for missing operands.
    Void,
    Bracket { bracket: Bracket, child: Box<Ast> },
    Operator { op: Operator, left: Box<Ast>, right: Box<Ast> },
}

/// An expression together with the location of the token that formed it.
#[derive(Debug, Clone, PartialEq)]
pub struct Ast {
    pub node: AstNode,
    pub token_loc: CodeLoc,
}

impl Ast {
    pub fn new(node: AstNode, token_loc: CodeLoc) -> Ast {
        Ast { node, token_loc }
    }

    /// Full source location of the whole expression.
    pub fn location(&self) -> CodeLoc {
        match &self.node {
            AstNode::Operator { left, right, .. } => {
                CodeLoc::span(left.location(), right.location())
            }
            _ => self.token_loc,
        }
    }

    /// The name of the expression, when it is a plain identifier.
    pub fn identifier(&self) -> Option<&str> {
        match &self.node {
            AstNode::Identifier(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self.node, AstNode::Void)
    }
}
