use num_derive::FromPrimitive;

/// Enumeration of language operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u16)]
pub enum Operator {
    Times,
    Divide,
    Plus,
    Minus,
    Assign,
    Append,
    Discard,
    /// Inserted implicitly between adjacent operands during parsing.
    Call,
    Lambda,
    Index,
    Modulo,
    Equals,
    Differs,
    Not,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Then,
    Else,
    Until,
    Repeats,
    And,
    Or,
    Is,
    Extract,
    Check,
    Has,
    BwAnd,
    BwOr,
    BwXor,
    BwShl,
    BwShr,
    BwNot,
    Sizeof,
}

/// Static operator metadata used by the parser.
#[derive(Debug, Clone, Copy)]
pub struct OperatorMeta {
    /// Precedence of the operator (a lower value binds tighter).
    pub order: u8,
    /// Whether the operator is left-associative.
    pub left: bool,
}

impl Operator {
    /// Precedence and associativity of the operator.
    pub fn meta(self) -> OperatorMeta {
        let (order, left) = match self {
            Operator::Index => (0, true),
            Operator::Call => (0, false),
            Operator::Extract => (1, false),
            Operator::Not | Operator::BwNot | Operator::Sizeof => (2, false),
            Operator::Times | Operator::Divide | Operator::Modulo => (3, true),
            Operator::Plus | Operator::Minus => (4, true),
            Operator::Equals
            | Operator::Differs
            | Operator::Less
            | Operator::Greater
            | Operator::LessEqual
            | Operator::GreaterEqual => (5, true),
            Operator::BwShl | Operator::BwShr => (6, true),
            Operator::BwAnd => (7, true),
            Operator::BwXor => (8, true),
            Operator::BwOr => (9, true),
            Operator::Has => (10, true),
            Operator::Is => (11, true),
            Operator::And => (12, true),
            Operator::Or => (13, true),
            Operator::Check => (14, true),
            Operator::Lambda => (15, false),
            Operator::Append => (16, false),
            Operator::Assign => (17, true),
            Operator::Then => (18, false),
            Operator::Else => (19, false),
            Operator::Until | Operator::Repeats => (20, false),
            Operator::Discard => (21, false),
        };
        OperatorMeta { order, left }
    }

    /// Name of the object field that overloads this operator, if any.
    pub fn overload_name(self) -> Option<&'static str> {
        let name = match self {
            Operator::Call => "call",
            Operator::Times => "times",
            Operator::Divide => "divide",
            Operator::Modulo => "modulo",
            Operator::Plus => "add",
            Operator::Minus => "subtract",
            Operator::Equals => "equals",
            Operator::Differs => "differs_from",
            Operator::Less => "less_than",
            Operator::Greater => "greater_than",
            Operator::LessEqual => "less_equal_than",
            Operator::GreaterEqual => "greater_equal_than",
            Operator::BwShl => "bitwise_shift_left_by",
            Operator::BwShr => "bitwise_shift_right_by",
            Operator::BwAnd => "bitwise_and",
            Operator::BwXor => "bitwise_xor",
            Operator::BwOr => "bitwise_or",
            Operator::Sizeof => "get_size",
            _ => return None,
        };
        Some(name)
    }
}
