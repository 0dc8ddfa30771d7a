use crate::tokens::KEYWORDS;

/// Tracks which token classes remain viable while characters of a candidate
/// token are appended one by one.
///
/// The tokenizer keeps extending the candidate while at least one class is
/// still viable and then classifies the collected prefix, which makes the
/// match greedy (`<=` wins over `<`, `inf` loses to the identifier `info`).
pub struct TokenAutomaton {
    /// Length of the current token part.
    len: usize,
    /// Is the current part a prefix of an identifier.
    id_part: bool,
    /// Is the current part a prefix of an integer literal.
    int_part: bool,
    /// Is the current part a prefix of a floating-point literal.
    flp_part: bool,
    /// Was the dot of the floating-point literal already found.
    flp_dot: bool,
    /// Is the current part a prefix of a string literal.
    str_part: bool,
    /// Is the next string character escaped.
    str_esc: bool,
    /// Was the closing quote of the string literal already found.
    str_end: bool,
    /// Is the current part a prefix of a line comment.
    line_comm_part: bool,
    /// Is the current part a prefix of a block comment.
    block_comm_part: bool,
    /// Was the closing square bracket of the block comment already found.
    block_comm_end_bracket: bool,
    /// Was the closing number sign of the block comment already found.
    block_comm_end_sign: bool,
    /// Keywords which start with the current token part.
    kws_part: Vec<&'static str>,
}

impl TokenAutomaton {
    pub fn new() -> TokenAutomaton {
        TokenAutomaton {
            len: 0,
            id_part: true,
            int_part: true,
            flp_part: true,
            flp_dot: false,
            str_part: true,
            str_esc: false,
            str_end: false,
            line_comm_part: true,
            block_comm_part: true,
            block_comm_end_bracket: false,
            block_comm_end_sign: false,
            kws_part: KEYWORDS.to_vec(),
        }
    }

    /// Appends a single character to the token part and updates the state.
    pub fn append(&mut self, c: char) {
        let first = self.len == 0;

        if self.id_part {
            self.id_part = if first {
                c.is_alphabetic() || c == '_'
            } else {
                c.is_alphanumeric() || c == '_'
            };
        }

        if self.int_part {
            self.int_part = c.is_ascii_digit();
        }

        if self.flp_part {
            if c == '.' && !self.flp_dot {
                self.flp_dot = true;
            } else if !c.is_ascii_digit() {
                self.flp_part = false;
            }
        }

        if self.str_part {
            if first {
                self.str_part = c == '\'';
            } else if self.str_end {
                self.str_part = false;
            } else if self.str_esc {
                self.str_esc = false;
            } else if c == '\\' {
                self.str_esc = true;
            } else if c == '\'' {
                self.str_end = true;
            }
        }

        if self.line_comm_part {
            self.line_comm_part = match self.len {
                0 => c == '#',
                // A part starting with `#[` is a block comment, not a line
                // comment, or `]#` could never terminate it mid-line.
                1 => c != '[' && c != '\n',
                _ => c != '\n',
            };
        }

        if self.block_comm_part {
            match self.len {
                0 => self.block_comm_part = c == '#',
                1 => self.block_comm_part = c == '[',
                _ => {
                    if self.block_comm_end_sign {
                        self.block_comm_part = false;
                    } else if self.block_comm_end_bracket && c == '#' {
                        self.block_comm_end_sign = true;
                    } else {
                        self.block_comm_end_bracket = c == ']';
                    }
                }
            }
        }

        if !self.kws_part.is_empty() {
            let pos = self.len;
            self.kws_part.retain(|kw| kw.chars().nth(pos) == Some(c));
        }

        self.len += 1;
    }

    /// Whether the current token part is still viable in any class.
    pub fn is_valid(&self) -> bool {
        self.id_part
            || self.int_part
            || self.flp_part
            || self.str_part
            || self.line_comm_part
            || self.block_comm_part
            || !self.kws_part.is_empty()
    }
}
