// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use super::SyntaxError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl Operator {
    fn from_bytes(b: u8, next: Option<u8>) -> Option<(Self, usize)> {
        let op = match (b, next) {
            (b'*', Some(b'*')) => (Operator::Pow, 2),
            (b'=', Some(b'=')) => (Operator::Eq, 2),
            (b'!', Some(b'=')) => (Operator::NotEq, 2),
            (b'<', Some(b'=')) => (Operator::Le, 2),
            (b'>', Some(b'=')) => (Operator::Ge, 2),
            (b'&', Some(b'&')) => (Operator::And, 2),
            (b'|', Some(b'|')) => (Operator::Or, 2),
            (b'+', _) => (Operator::Add, 1),
            (b'-', _) => (Operator::Sub, 1),
            (b'*', _) => (Operator::Mul, 1),
            (b'/', _) => (Operator::Div, 1),
            (b'%', _) => (Operator::Rem, 1),
            (b'^', _) => (Operator::Pow, 1),
            (b'<', _) => (Operator::Lt, 1),
            (b'>', _) => (Operator::Gt, 1),
            _ => return None,
        };
        Some(op)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Token {
    Num(f64),
    Id(String),
    Op(Operator),
    True,
    False,
    Not,
    Lp,
    Rp,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Assign,
    Question,
    Colon,
}

/// Splits the source into tokens. Newlines separate statements just like `;`.
pub(crate) fn lex(src: &str) -> Result<Vec<(Token, usize)>, SyntaxError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut index = 0usize;

    while index < bytes.len() {
        let b = bytes[index];
        let start = index;

        if b == b'\n' {
            tokens.push((Token::Semi, start));
            index += 1;
            continue;
        }
        if (b as char).is_whitespace() {
            index += 1;
            continue;
        }

        let simple = match b {
            b'(' => Some(Token::Lp),
            b')' => Some(Token::Rp),
            b'[' => Some(Token::LBracket),
            b']' => Some(Token::RBracket),
            b',' => Some(Token::Comma),
            b';' => Some(Token::Semi),
            b'?' => Some(Token::Question),
            b':' => Some(Token::Colon),
            _ => None,
        };
        if let Some(token) = simple {
            tokens.push((token, start));
            index += 1;
            continue;
        }

        match b {
            b'=' if bytes.get(index + 1) != Some(&b'=') => {
                tokens.push((Token::Assign, start));
                index += 1;
            }
            b'!' if bytes.get(index + 1) != Some(&b'=') => {
                tokens.push((Token::Not, start));
                index += 1;
            }
            b'0'..=b'9' | b'.' => {
                index += 1;
                while index < bytes.len() && (bytes[index].is_ascii_digit() || bytes[index] == b'.') {
                    index += 1;
                }
                // exponent, e.g. 1e-3
                if index < bytes.len() && (bytes[index] == b'e' || bytes[index] == b'E') {
                    let mut probe = index + 1;
                    if probe < bytes.len() && (bytes[probe] == b'+' || bytes[probe] == b'-') {
                        probe += 1;
                    }
                    if probe < bytes.len() && bytes[probe].is_ascii_digit() {
                        index = probe;
                        while index < bytes.len() && bytes[index].is_ascii_digit() {
                            index += 1;
                        }
                    }
                }
                let number = src[start..index]
                    .parse::<f64>()
                    .map_err(|_| SyntaxError::new(start, "malformed number"))?;
                tokens.push((Token::Num(number), start));
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                index += 1;
                while index < bytes.len() && (bytes[index].is_ascii_alphanumeric() || bytes[index] == b'_') {
                    index += 1;
                }
                let token = match &src[start..index] {
                    "true" | "True" => Token::True,
                    "false" | "False" => Token::False,
                    "and" => Token::Op(Operator::And),
                    "or" => Token::Op(Operator::Or),
                    "not" => Token::Not,
                    ident => Token::Id(ident.to_string()),
                };
                tokens.push((token, start));
            }
            _ => {
                let next = bytes.get(index + 1).copied();
                match Operator::from_bytes(b, next) {
                    Some((op, consumed)) => {
                        tokens.push((Token::Op(op), start));
                        index += consumed;
                    }
                    None => return Err(SyntaxError::new(start, "unexpected character")),
                }
            }
        }
    }

    Ok(tokens)
}
