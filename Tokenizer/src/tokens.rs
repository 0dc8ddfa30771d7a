use common::location::CodeLoc;
use common::operators::Operator;

/// Bracket expression shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bracket {
    Plain,
    Curly,
    Square,
}

/// What a single unit of Funscript code is.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Id(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    Nul,
    Operator(Operator),
    LeftBracket(Bracket),
    RightBracket(Bracket),
    /// Filtered out before parsing.
    Comment,
    /// Implicitly inserted during parsing; never produced by the tokenizer.
    Void,
}

/// A single token of code with its source location.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub loc: CodeLoc,
}

/// Every keyword and punctuation string recognized by the tokenizer.
pub(crate) const KEYWORDS: &[&str] = &[
    "*", "/", "+", "-", "=", ".", ",", ";", ":", "%", "==", "!=", "<", ">", "<=", ">=", "?", "->",
    "&", "|", "^", "<<", ">>", "~", "(", ")", "{", "}", "[", "]", "then", "else", "until",
    "repeats", "yes", "no", "nul", "and", "or", "nan", "inf", "is", "not", "has", "sizeof",
];

/// Maps a complete keyword string to the token it forms.
pub(crate) fn keyword_kind(word: &str) -> Option<TokenKind> {
    let kind = match word {
        "*" => TokenKind::Operator(Operator::Times),
        "/" => TokenKind::Operator(Operator::Divide),
        "+" => TokenKind::Operator(Operator::Plus),
        "-" => TokenKind::Operator(Operator::Minus),
        "=" => TokenKind::Operator(Operator::Assign),
        "." => TokenKind::Operator(Operator::Index),
        "," => TokenKind::Operator(Operator::Append),
        ";" => TokenKind::Operator(Operator::Discard),
        ":" => TokenKind::Operator(Operator::Check),
        "%" => TokenKind::Operator(Operator::Modulo),
        "==" => TokenKind::Operator(Operator::Equals),
        "!=" => TokenKind::Operator(Operator::Differs),
        "<" => TokenKind::Operator(Operator::Less),
        ">" => TokenKind::Operator(Operator::Greater),
        "<=" => TokenKind::Operator(Operator::LessEqual),
        ">=" => TokenKind::Operator(Operator::GreaterEqual),
        "?" => TokenKind::Operator(Operator::Extract),
        "->" => TokenKind::Operator(Operator::Lambda),
        "&" => TokenKind::Operator(Operator::BwAnd),
        "|" => TokenKind::Operator(Operator::BwOr),
        "^" => TokenKind::Operator(Operator::BwXor),
        "<<" => TokenKind::Operator(Operator::BwShl),
        ">>" => TokenKind::Operator(Operator::BwShr),
        "~" => TokenKind::Operator(Operator::BwNot),
        "(" => TokenKind::LeftBracket(Bracket::Plain),
        ")" => TokenKind::RightBracket(Bracket::Plain),
        "{" => TokenKind::LeftBracket(Bracket::Curly),
        "}" => TokenKind::RightBracket(Bracket::Curly),
        "[" => TokenKind::LeftBracket(Bracket::Square),
        "]" => TokenKind::RightBracket(Bracket::Square),
        "then" => TokenKind::Operator(Operator::Then),
        "else" => TokenKind::Operator(Operator::Else),
        "until" => TokenKind::Operator(Operator::Until),
        "repeats" => TokenKind::Operator(Operator::Repeats),
        "and" => TokenKind::Operator(Operator::And),
        "or" => TokenKind::Operator(Operator::Or),
        "is" => TokenKind::Operator(Operator::Is),
        "not" => TokenKind::Operator(Operator::Not),
        "has" => TokenKind::Operator(Operator::Has),
        "sizeof" => TokenKind::Operator(Operator::Sizeof),
        "yes" => TokenKind::Boolean(true),
        "no" => TokenKind::Boolean(false),
        "nul" => TokenKind::Nul,
        "nan" => TokenKind::Float(f64::NAN),
        "inf" => TokenKind::Float(f64::INFINITY),
        _ => return None,
    };
    Some(kind)
}
