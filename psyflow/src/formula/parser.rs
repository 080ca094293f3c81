// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use super::lexer::{Operator, Token};
use super::SyntaxError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Function {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Sqrt,
    Abs,
    Exp,
    Ln,
    Log10,
    Floor,
    Ceil,
    Round,
    Fract,
    Sign,
    Min,
    Max,
    Clamp,
    Pow,
    Step,
    Deg2Rad,
    Rad2Deg,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        let f = match name {
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            "asin" => Function::Asin,
            "acos" => Function::Acos,
            "atan" => Function::Atan,
            "atan2" => Function::Atan2,
            "sqrt" => Function::Sqrt,
            "abs" => Function::Abs,
            "exp" => Function::Exp,
            "ln" | "log" => Function::Ln,
            "log10" => Function::Log10,
            "floor" => Function::Floor,
            "ceil" => Function::Ceil,
            "round" => Function::Round,
            "fract" => Function::Fract,
            "sign" => Function::Sign,
            "min" => Function::Min,
            "max" => Function::Max,
            "clamp" => Function::Clamp,
            "pow" => Function::Pow,
            "step" => Function::Step,
            "deg2rad" | "radians" => Function::Deg2Rad,
            "rad2deg" | "degrees" => Function::Rad2Deg,
            _ => return None,
        };
        Some(f)
    }

    /// Number of arguments, `None` for variadic functions (at least one).
    pub(crate) fn arity(self) -> Option<usize> {
        match self {
            Function::Min | Function::Max => None,
            Function::Atan2 | Function::Pow | Function::Step => Some(2),
            Function::Clamp => Some(3),
            _ => Some(1),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Expr {
    Num(f64),
    Bool(bool),
    Var(String),
    Seq(Vec<Expr>),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(Operator, Box<Expr>, Box<Expr>),
    Cond(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

impl Expr {
    /// Collects every variable name the expression reads.
    pub(crate) fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Num(_) | Expr::Bool(_) => {}
            Expr::Var(name) => out.push(name.as_str()),
            Expr::Seq(items) | Expr::Call(_, items) => items.iter().for_each(|e| e.collect_variables(out)),
            Expr::Neg(e) | Expr::Not(e) => e.collect_variables(out),
            Expr::Binary(_, a, b) => {
                a.collect_variables(out);
                b.collect_variables(out);
            }
            Expr::Cond(c, a, b) => {
                c.collect_variables(out);
                a.collect_variables(out);
                b.collect_variables(out);
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Assignment {
    pub target: String,
    pub expr: Expr,
}

/// Deepest nesting of parentheses, brackets, calls, conditionals and unary
/// operators a formula may use.
pub(crate) const MAX_NESTING: usize = 64;

/// Longest token stream a formula may consist of. Binary chains build a
/// tree as deep as they are long, so this bounds evaluation depth as well.
pub(crate) const MAX_TOKENS: usize = 1024;

pub(crate) struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    pub(crate) fn new(tokens: Vec<(Token, usize)>, source_len: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            end: source_len,
            depth: 0,
        }
    }

    fn check_length(&self) -> Result<(), SyntaxError> {
        match self.tokens.get(MAX_TOKENS) {
            Some((_, at)) => Err(SyntaxError::new(*at, "expression too long")),
            None => Ok(()),
        }
    }

    // runs `f` one nesting level deeper
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, SyntaxError>) -> Result<T, SyntaxError> {
        if self.depth >= MAX_NESTING {
            return Err(SyntaxError::new(self.position(), "expression nested too deeply"));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map(|(_, p)| *p).unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), SyntaxError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(SyntaxError::new(self.position(), format!("expected {}", what)))
        }
    }

    fn skip_separators(&mut self) {
        while self.eat(&Token::Semi) {}
    }

    /// Parses a single expression covering the whole input.
    pub(crate) fn parse_formula(mut self) -> Result<Expr, SyntaxError> {
        self.check_length()?;
        self.skip_separators();
        if self.peek().is_none() {
            return Err(SyntaxError::new(self.end, "empty expression"));
        }
        let expr = self.parse_expr()?;
        self.skip_separators();
        if self.peek().is_some() {
            return Err(SyntaxError::new(self.position(), "unexpected trailing input"));
        }
        Ok(expr)
    }

    /// Parses a sequence of `name = expr` statements.
    pub(crate) fn parse_statements(mut self) -> Result<Vec<Assignment>, SyntaxError> {
        self.check_length()?;
        let mut statements = Vec::new();
        loop {
            self.skip_separators();
            let start = self.position();
            let target = match self.next() {
                None => break,
                Some(Token::Id(name)) => name,
                Some(_) => return Err(SyntaxError::new(start, "expected assignment")),
            };
            if Function::from_name(&target).is_some() {
                return Err(SyntaxError::new(start, format!("cannot assign to function \"{}\"", target)));
            }
            self.expect(&Token::Assign, "'='")?;
            let expr = self.parse_expr()?;
            statements.push(Assignment { target, expr });
            match self.peek() {
                None | Some(Token::Semi) => {}
                Some(_) => return Err(SyntaxError::new(self.position(), "expected end of statement")),
            }
        }
        if statements.is_empty() {
            return Err(SyntaxError::new(self.end, "empty statement"));
        }
        Ok(statements)
    }

    fn parse_expr(&mut self) -> Result<Expr, SyntaxError> {
        self.nested(Self::parse_conditional)
    }

    fn parse_conditional(&mut self) -> Result<Expr, SyntaxError> {
        let cond = self.parse_or()?;
        if self.eat(&Token::Question) {
            let then_branch = self.parse_expr()?;
            self.expect(&Token::Colon, "':'")?;
            let else_branch = self.parse_expr()?;
            return Ok(Expr::Cond(Box::new(cond), Box::new(then_branch), Box::new(else_branch)));
        }
        Ok(cond)
    }

    fn parse_binary_level(
        &mut self,
        ops: &[Operator],
        next: fn(&mut Self) -> Result<Expr, SyntaxError>,
    ) -> Result<Expr, SyntaxError> {
        let mut lhs = next(self)?;
        while let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            if !ops.contains(&op) {
                break;
            }
            self.pos += 1;
            let rhs = next(self)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_binary_level(&[Operator::Or], Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_binary_level(&[Operator::And], Self::parse_cmp)
    }

    fn parse_cmp(&mut self) -> Result<Expr, SyntaxError> {
        let lhs = self.parse_add()?;
        if let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            if matches!(
                op,
                Operator::Eq | Operator::NotEq | Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge
            ) {
                self.pos += 1;
                let rhs = self.parse_add()?;
                return Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)));
            }
        }
        Ok(lhs)
    }

    fn parse_add(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_binary_level(&[Operator::Add, Operator::Sub], Self::parse_mul)
    }

    fn parse_mul(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_binary_level(&[Operator::Mul, Operator::Div, Operator::Rem], Self::parse_unary)
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        match self.peek() {
            Some(Token::Op(Operator::Sub)) => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.nested(Self::parse_unary)?)))
            }
            Some(Token::Op(Operator::Add)) => {
                self.pos += 1;
                self.nested(Self::parse_unary)
            }
            Some(Token::Not) => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.nested(Self::parse_unary)?)))
            }
            _ => self.parse_pow(),
        }
    }

    // right associative, exponent may carry its own sign: 2 ** -1
    fn parse_pow(&mut self) -> Result<Expr, SyntaxError> {
        let base = self.parse_atom()?;
        if self.eat(&Token::Op(Operator::Pow)) {
            let exponent = self.nested(Self::parse_unary)?;
            return Ok(Expr::Binary(Operator::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_atom(&mut self) -> Result<Expr, SyntaxError> {
        let start = self.position();
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Num(n)),
            Some(Token::True) => Ok(Expr::Bool(true)),
            Some(Token::False) => Ok(Expr::Bool(false)),
            Some(Token::Lp) => {
                let inner = self.parse_expr()?;
                self.expect(&Token::Rp, "')'")?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let items = self.parse_list(&Token::RBracket, "']'")?;
                Ok(Expr::Seq(items))
            }
            Some(Token::Id(name)) => {
                if self.eat(&Token::Lp) {
                    let function = Function::from_name(&name)
                        .ok_or_else(|| SyntaxError::new(start, format!("unknown function \"{}\"", name)))?;
                    let args = self.parse_list(&Token::Rp, "')'")?;
                    let arity_ok = match function.arity() {
                        Some(n) => args.len() == n,
                        None => !args.is_empty(),
                    };
                    if !arity_ok {
                        return Err(SyntaxError::new(
                            start,
                            format!("wrong number of arguments for \"{}\"", name),
                        ));
                    }
                    Ok(Expr::Call(function, args))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Some(_) => Err(SyntaxError::new(start, "unexpected token")),
            None => Err(SyntaxError::new(start, "unexpected end of input")),
        }
    }

    fn parse_list(&mut self, close: &Token, what: &str) -> Result<Vec<Expr>, SyntaxError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expr()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(&Token::Comma, &format!("',' or {}", what))?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::lexer::lex;
    use super::*;

    fn parse(src: &str) -> Result<Expr, SyntaxError> {
        Parser::new(lex(src)?, src.len()).parse_formula()
    }

    #[test]
    fn respects_precedence() {
        let expr = parse("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                Operator::Add,
                Box::new(Expr::Num(1.0)),
                Box::new(Expr::Binary(Operator::Mul, Box::new(Expr::Num(2.0)), Box::new(Expr::Num(3.0))))
            )
        );
    }

    #[test]
    fn unary_minus_binds_looser_than_power() {
        let expr = parse("-2 ** 2").unwrap();
        assert!(matches!(expr, Expr::Neg(inner) if matches!(*inner, Expr::Binary(Operator::Pow, _, _))));
    }

    #[test]
    fn checks_function_arity() {
        assert!(parse("atan2(1)").is_err());
        assert!(parse("clamp(t, 0, 1)").is_ok());
        assert!(parse("max()").is_err());
        assert!(parse("nope(1)").is_err());
    }

    #[test]
    fn parses_statements() {
        let src = "y = t * 2; x = y + 1";
        let stmts = Parser::new(lex(src).unwrap(), src.len()).parse_statements().unwrap();
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[1].target, "x");
    }

    #[test]
    fn limits_nesting() {
        let src = format!("{}1.0{}", "(".repeat(MAX_NESTING - 1), ")".repeat(MAX_NESTING - 1));
        assert!(parse(&src).is_ok());

        for src in [
            format!("{}1.0{}", "(".repeat(MAX_TOKENS / 2 - 1), ")".repeat(MAX_TOKENS / 2 - 1)),
            format!("{}1.0", "-".repeat(MAX_TOKENS - 1)),
            format!("{}true", "not ".repeat(200)),
            format!("{}1{}", "[".repeat(500), "]".repeat(500)),
            format!("{}1", "2 ** ".repeat(300)),
        ] {
            let err = parse(&src).unwrap_err();
            assert!(err.to_string().contains("nested too deeply"), "{}", err);
        }
    }

    #[test]
    fn limits_length() {
        let src = vec!["1"; MAX_TOKENS].join("+");
        let err = parse(&src).unwrap_err();
        assert!(err.to_string().contains("too long"), "{}", err);

        let src = vec!["1"; MAX_TOKENS / 4].join("+");
        assert!(parse(&src).is_ok());
    }

    #[test]
    fn statements_must_be_assignments() {
        let src = "t * 2";
        assert!(Parser::new(lex(src).unwrap(), src.len()).parse_statements().is_err());
    }
}
