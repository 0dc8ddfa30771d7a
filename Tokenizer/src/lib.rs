// Conversion of Funscript source text into a stream of located tokens.
//
// The tokenizer is greedy: starting at the cursor it keeps extending a
// candidate window while any token class is still viable (see
// `TokenAutomaton`) and then classifies the collected prefix. A prefix that
// classifies as nothing is a syntax error at that position.

use common::errors::SyntaxError;
use common::location::{CodeLoc, CodePos};

use crate::automaton::TokenAutomaton;
use crate::tokens::{keyword_kind, Token, TokenKind};

pub mod automaton;
pub mod tokens;

/// Converts source text into a finite ordered sequence of tokens, each
/// carrying a closed `[begin, end]` location. Comments are emitted as
/// ordinary tokens and filtered by the parser.
pub fn tokenize(filename: &str, source: &str) -> Result<Vec<Token>, SyntaxError> {
    fn step(c: char, pos: &mut usize, row: &mut usize, col: &mut usize) {
        *pos += 1;
        if c == '\n' {
            *row += 1;
            *col = 1;
        } else {
            *col += 1;
        }
    }

    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0usize;
    let mut row = 1usize;
    let mut col = 1usize;

    loop {
        while pos < chars.len() && chars[pos].is_whitespace() {
            step(chars[pos], &mut pos, &mut row, &mut col);
        }
        if pos >= chars.len() {
            break;
        }

        let beg = CodePos { row, col };
        let mut automaton = TokenAutomaton::new();
        let mut part = String::new();
        while pos < chars.len() {
            let c = chars[pos];
            automaton.append(c);
            if !automaton.is_valid() {
                break;
            }
            part.push(c);
            step(c, &mut pos, &mut row, &mut col);
        }

        let loc = CodeLoc { beg, end: CodePos { row, col } };
        match classify(&part) {
            Some(kind) => tokens.push(Token { kind, loc }),
            None => {
                let what = if part.is_empty() {
                    "invalid token".to_string()
                } else {
                    format!("invalid token '{part}'")
                };
                return Err(SyntaxError::new(filename, loc, what));
            }
        }
    }

    Ok(tokens)
}

/// Classifies a complete token part, or returns `None` when the part does
/// not form a valid token.
fn classify(part: &str) -> Option<TokenKind> {
    if let Some(kind) = keyword_kind(part) {
        return Some(kind);
    }
    if let Some(rest) = part.strip_prefix('#') {
        if !rest.starts_with('[') {
            return Some(TokenKind::Comment);
        }
        if part.len() >= 4 && part.ends_with("]#") {
            return Some(TokenKind::Comment);
        }
        return None;
    }
    if part.starts_with('\'') {
        return parse_string_literal(part).map(TokenKind::String);
    }
    if !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()) {
        return part.parse::<i64>().ok().map(TokenKind::Integer);
    }
    if is_float_literal(part) {
        return part.parse::<f64>().ok().map(TokenKind::Float);
    }
    if is_valid_id(part) {
        return Some(TokenKind::Id(part.to_string()));
    }
    None
}

fn is_valid_id(part: &str) -> bool {
    let mut chars = part.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn is_float_literal(part: &str) -> bool {
    part.chars().filter(|c| *c == '.').count() == 1
        && part.chars().any(|c| c.is_ascii_digit())
        && part.chars().all(|c| c.is_ascii_digit() || c == '.')
}

/// Resolves the escapes of a quoted string literal, or returns `None` when
/// the literal is not properly terminated.
fn parse_string_literal(part: &str) -> Option<String> {
    let mut out = String::new();
    let mut chars = part.chars().skip(1);
    loop {
        match chars.next()? {
            '\'' => break,
            '\\' => out.push(match chars.next()? {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '0' => '\0',
                c => c,
            }),
            c => out.push(c),
        }
    }
    // The closing quote must end the token.
    if chars.next().is_some() {
        return None;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::operators::Operator;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize("test", source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn longest_match_wins() {
        assert_eq!(
            kinds("a<=b"),
            vec![
                TokenKind::Id("a".into()),
                TokenKind::Operator(Operator::LessEqual),
                TokenKind::Id("b".into()),
            ]
        );
        // An identifier that merely starts with a keyword stays one token.
        assert_eq!(kinds("info"), vec![TokenKind::Id("info".into())]);
        assert_eq!(kinds("not7"), vec![TokenKind::Id("not7".into())]);
    }

    #[test]
    fn numeric_literals() {
        assert_eq!(kinds("234"), vec![TokenKind::Integer(234)]);
        assert_eq!(kinds(".5"), vec![TokenKind::Float(0.5)]);
        assert_eq!(kinds("5."), vec![TokenKind::Float(5.0)]);
        assert_eq!(
            kinds("2-"),
            vec![TokenKind::Integer(2), TokenKind::Operator(Operator::Minus)]
        );
        // Integer literals that do not fit the value type are rejected.
        assert!(tokenize("test", "99999999999999999999999").is_err());
    }

    #[test]
    fn string_literals_and_escapes() {
        assert_eq!(kinds("'some str'"), vec![TokenKind::String("some str".into())]);
        assert_eq!(kinds(r"'a\'b\n'"), vec![TokenKind::String("a'b\n".into())]);
        assert!(tokenize("test", "'unterminated").is_err());
    }

    #[test]
    fn comments() {
        assert_eq!(kinds("# the whole line"), vec![TokenKind::Comment]);
        assert_eq!(
            kinds("#[ multi\nline ]# 5"),
            vec![TokenKind::Comment, TokenKind::Integer(5)]
        );
        assert!(tokenize("test", "#[ never closed").is_err());
    }

    #[test]
    fn locations_are_tracked_per_line() {
        let tokens = tokenize("test", "1 +\n 22").unwrap();
        assert_eq!(tokens[0].loc.beg.row, 1);
        assert_eq!(tokens[2].loc.beg.row, 2);
        assert_eq!(tokens[2].loc.beg.col, 2);
        assert_eq!(tokens[2].loc.end.col, 4);
    }

    #[test]
    fn invalid_prefixes_fail() {
        assert!(tokenize("test", "@").is_err());
        assert!(tokenize("test", "1 ` 2").is_err());
    }
}
