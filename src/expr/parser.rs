//! Recursive descent parser producing the expression tree.
//!
//! Precedence, loosest first: `|`, `,`, `//`, `or`, `and`, comparisons,
//! `+ -`, `* / %`, unary minus, postfix (`.name`, `[..]`, `?`).

use serde_json::Value;

use super::lexer::{StrPart, Token};

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Ast {
    Identity,
    Recurse,
    Literal(Value),
    Str(Vec<StrSegment>),
    Index(Box<Ast>, Box<Ast>),
    Slice(Box<Ast>, Option<Box<Ast>>, Option<Box<Ast>>),
    Iterate(Box<Ast>),
    Try(Box<Ast>),
    Array(Option<Box<Ast>>),
    Object(Vec<(Ast, Ast)>),
    Pipe(Box<Ast>, Box<Ast>),
    Comma(Box<Ast>, Box<Ast>),
    Alt(Box<Ast>, Box<Ast>),
    And(Box<Ast>, Box<Ast>),
    Or(Box<Ast>, Box<Ast>),
    Binary(BinOp, Box<Ast>, Box<Ast>),
    Neg(Box<Ast>),
    If {
        cond: Box<Ast>,
        then: Box<Ast>,
        otherwise: Option<Box<Ast>>,
    },
    Call(String, Vec<Ast>),
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum StrSegment {
    Lit(String),
    Interp(Ast),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

const RESERVED: &[&str] = &["then", "elif", "else", "end", "and", "or"];

pub(super) fn parse(tokens: Vec<Token>) -> Result<Ast, String> {
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.parse_pipe()?;
    match parser.peek() {
        Token::Eof => Ok(ast),
        other => Err(format!("unexpected token {other:?}")),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn peek_next(&self) -> &Token {
        self.tokens.get(self.pos + 1).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        let found = self.advance();
        if found == expected {
            Ok(())
        } else {
            Err(format!("expected {expected:?}, found {found:?}"))
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Token::Ident(name) if name == keyword)
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), String> {
        if self.at_keyword(keyword) {
            self.pos += 1;
            Ok(())
        } else {
            Err(format!("expected '{keyword}', found {:?}", self.peek()))
        }
    }

    fn parse_pipe(&mut self) -> Result<Ast, String> {
        let lhs = self.parse_comma()?;
        if *self.peek() == Token::Pipe {
            self.advance();
            let rhs = self.parse_pipe()?;
            return Ok(Ast::Pipe(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    /// Pipe chain that stops at commas, used for object values.
    fn parse_pipe_no_comma(&mut self) -> Result<Ast, String> {
        let lhs = self.parse_alt()?;
        if *self.peek() == Token::Pipe {
            self.advance();
            let rhs = self.parse_pipe_no_comma()?;
            return Ok(Ast::Pipe(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_comma(&mut self) -> Result<Ast, String> {
        let mut lhs = self.parse_alt()?;
        while *self.peek() == Token::Comma {
            self.advance();
            let rhs = self.parse_alt()?;
            lhs = Ast::Comma(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_alt(&mut self) -> Result<Ast, String> {
        let lhs = self.parse_or()?;
        if *self.peek() == Token::Alt {
            self.advance();
            let rhs = self.parse_alt()?;
            return Ok(Ast::Alt(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> Result<Ast, String> {
        let mut lhs = self.parse_and()?;
        while self.at_keyword("or") {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Ast::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Ast, String> {
        let mut lhs = self.parse_comparison()?;
        while self.at_keyword("and") {
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = Ast::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Ast, String> {
        let lhs = self.parse_additive()?;
        let op = match self.peek() {
            Token::Eq => BinOp::Eq,
            Token::Ne => BinOp::Ne,
            Token::Lt => BinOp::Lt,
            Token::Le => BinOp::Le,
            Token::Gt => BinOp::Gt,
            Token::Ge => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_additive()?;
        Ok(Ast::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_additive(&mut self) -> Result<Ast, String> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Ast, String> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Mod,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> Result<Ast, String> {
        if *self.peek() == Token::Minus {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Ast::Neg(Box::new(operand)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Ast, String> {
        let mut term = self.parse_primary()?;
        loop {
            match self.peek().clone() {
                Token::Field(name) => {
                    self.advance();
                    term = index(term, Ast::Literal(Value::String(name)));
                }
                Token::Dot if matches!(self.peek_next(), Token::Str(_)) => {
                    self.advance();
                    let key = self.parse_primary()?;
                    term = index(term, key);
                }
                Token::Dot if *self.peek_next() == Token::LBracket => {
                    self.advance();
                }
                Token::LBracket => {
                    self.advance();
                    term = self.parse_bracket_suffix(term)?;
                }
                Token::Question => {
                    self.advance();
                    term = Ast::Try(Box::new(term));
                }
                _ => return Ok(term),
            }
        }
    }

    /// Everything after `[` in `term[..]`.
    fn parse_bracket_suffix(&mut self, term: Ast) -> Result<Ast, String> {
        let term = Box::new(term);
        if *self.peek() == Token::RBracket {
            self.advance();
            return Ok(Ast::Iterate(term));
        }
        if *self.peek() == Token::Colon {
            self.advance();
            let end = self.parse_pipe()?;
            self.expect(Token::RBracket)?;
            return Ok(Ast::Slice(term, None, Some(Box::new(end))));
        }
        let start = self.parse_pipe()?;
        if *self.peek() == Token::Colon {
            self.advance();
            let end = if *self.peek() == Token::RBracket {
                None
            } else {
                Some(Box::new(self.parse_pipe()?))
            };
            self.expect(Token::RBracket)?;
            return Ok(Ast::Slice(term, Some(Box::new(start)), end));
        }
        self.expect(Token::RBracket)?;
        Ok(Ast::Index(term, Box::new(start)))
    }

    fn parse_primary(&mut self) -> Result<Ast, String> {
        match self.advance() {
            Token::Dot => match self.peek() {
                Token::Str(_) => {
                    let key = self.parse_primary()?;
                    Ok(index(Ast::Identity, key))
                }
                _ => Ok(Ast::Identity),
            },
            Token::DotDot => Ok(Ast::Recurse),
            Token::Field(name) => Ok(index(Ast::Identity, Ast::Literal(Value::String(name)))),
            Token::Num(n) => Ok(Ast::Literal(super::eval::number(n))),
            Token::Str(parts) => string(parts),
            Token::LParen => {
                let inner = self.parse_pipe()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                if *self.peek() == Token::RBracket {
                    self.advance();
                    return Ok(Ast::Array(None));
                }
                let inner = self.parse_pipe()?;
                self.expect(Token::RBracket)?;
                Ok(Ast::Array(Some(Box::new(inner))))
            }
            Token::LBrace => self.parse_object(),
            Token::Ident(name) => self.parse_ident(name),
            other => Err(format!("unexpected token {other:?}")),
        }
    }

    fn parse_ident(&mut self, name: String) -> Result<Ast, String> {
        match name.as_str() {
            "true" => return Ok(Ast::Literal(Value::Bool(true))),
            "false" => return Ok(Ast::Literal(Value::Bool(false))),
            "null" => return Ok(Ast::Literal(Value::Null)),
            "if" => return self.parse_if(),
            reserved if RESERVED.contains(&reserved) => {
                return Err(format!("unexpected keyword '{reserved}'"));
            }
            _ => {}
        }

        let mut args = Vec::new();
        if *self.peek() == Token::LParen {
            self.advance();
            loop {
                args.push(self.parse_pipe()?);
                match self.advance() {
                    Token::Semicolon => continue,
                    Token::RParen => break,
                    other => return Err(format!("expected ';' or ')', found {other:?}")),
                }
            }
        }
        Ok(Ast::Call(name, args))
    }

    fn parse_if(&mut self) -> Result<Ast, String> {
        let cond = self.parse_pipe()?;
        self.expect_keyword("then")?;
        let then = self.parse_pipe()?;

        let otherwise = if self.at_keyword("elif") {
            self.advance();
            Some(Box::new(self.parse_if()?))
        } else if self.at_keyword("else") {
            self.advance();
            let branch = self.parse_pipe()?;
            self.expect_keyword("end")?;
            Some(Box::new(branch))
        } else {
            self.expect_keyword("end")?;
            None
        };

        Ok(Ast::If {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise,
        })
    }

    fn parse_object(&mut self) -> Result<Ast, String> {
        let mut entries = Vec::new();
        if *self.peek() == Token::RBrace {
            self.advance();
            return Ok(Ast::Object(entries));
        }

        loop {
            let (key, shorthand) = match self.advance() {
                Token::Ident(name) => {
                    let key = Ast::Literal(Value::String(name.clone()));
                    (key, Some(name))
                }
                Token::Str(parts) => {
                    let key = string(parts)?;
                    let shorthand = match &key {
                        Ast::Literal(Value::String(s)) => Some(s.clone()),
                        _ => None,
                    };
                    (key, shorthand)
                }
                Token::LParen => {
                    let key = self.parse_pipe()?;
                    self.expect(Token::RParen)?;
                    (key, None)
                }
                other => return Err(format!("invalid object key {other:?}")),
            };

            let value = if *self.peek() == Token::Colon {
                self.advance();
                self.parse_pipe_no_comma()?
            } else {
                let name = shorthand.ok_or_else(|| "object key needs a value".to_string())?;
                index(Ast::Identity, Ast::Literal(Value::String(name)))
            };
            entries.push((key, value));

            match self.advance() {
                Token::Comma => continue,
                Token::RBrace => break,
                other => return Err(format!("expected ',' or '}}', found {other:?}")),
            }
        }
        Ok(Ast::Object(entries))
    }
}

fn index(target: Ast, key: Ast) -> Ast {
    Ast::Index(Box::new(target), Box::new(key))
}

fn string(parts: Vec<StrPart>) -> Result<Ast, String> {
    let mut segments = Vec::with_capacity(parts.len());
    for part in parts {
        match part {
            StrPart::Lit(text) => segments.push(StrSegment::Lit(text)),
            StrPart::Interp(tokens) => segments.push(StrSegment::Interp(parse(tokens)?)),
        }
    }
    match segments.as_slice() {
        [StrSegment::Lit(text)] => Ok(Ast::Literal(Value::String(text.clone()))),
        _ => Ok(Ast::Str(segments)),
    }
}

#[cfg(test)]
mod tests {
    use super::super::lexer::tokenize;
    use super::*;

    fn parse_str(source: &str) -> Result<Ast, String> {
        parse(tokenize(source)?)
    }

    #[test]
    fn test_field_chain() {
        let ast = parse_str(".a.b").unwrap();
        let expected = index(
            index(Ast::Identity, Ast::Literal(Value::String("a".into()))),
            Ast::Literal(Value::String("b".into())),
        );
        assert_eq!(ast, expected);
    }

    #[test]
    fn test_pipe_binds_loosest() {
        let ast = parse_str(".a, .b | length").unwrap();
        let Ast::Pipe(lhs, _) = ast else {
            panic!("expected pipe");
        };
        assert!(matches!(*lhs, Ast::Comma(..)));
    }

    #[test]
    fn test_if_elif_chain() {
        let ast = parse_str("if . then 1 elif .x then 2 else 3 end").unwrap();
        let Ast::If { otherwise, .. } = ast else {
            panic!("expected if");
        };
        assert!(matches!(otherwise.as_deref(), Some(Ast::If { .. })));
    }

    #[test]
    fn test_rejects_trailing_garbage() {
        assert!(parse_str(".a )").is_err());
        assert!(parse_str("{a: }").is_err());
        assert!(parse_str("if . then 1").is_err());
    }
}
