// SPDX-License-Identifier: MIT

//! Condition expression parser
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! or      := and ( ("or" | "||") and )*
//! and     := unary ( ("and" | "&&") unary )*
//! unary   := ("not" | "!") unary | primary
//! primary := "(" or ")" | "true" | "false" | path [ op literal ]
//! ```

use super::ast::{CompareOp, ConditionError, Expression, Literal};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(String),
    Str(String),
    Num(f64),
    Op(CompareOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

/// Parse a condition string into an expression tree
pub fn parse(input: &str) -> Result<Expression, ConditionError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        input,
        tokens,
        pos: 0,
    };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(ConditionError::new(input, "unexpected trailing tokens"));
    }
    Ok(expr)
}

fn tokenize(input: &str) -> Result<Vec<Token>, ConditionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == c)
                    .ok_or_else(|| ConditionError::new(input, "unterminated string"))?;
                tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            '=' | '!' | '>' | '<' | '&' | '|' => {
                let next = chars.get(i + 1).copied();
                let (token, width) = match (c, next) {
                    ('=', Some('=')) => (Token::Op(CompareOp::Eq), 2),
                    ('!', Some('=')) => (Token::Op(CompareOp::NotEq), 2),
                    ('>', Some('=')) => (Token::Op(CompareOp::Gte), 2),
                    ('<', Some('=')) => (Token::Op(CompareOp::Lte), 2),
                    ('&', Some('&')) => (Token::And, 2),
                    ('|', Some('|')) => (Token::Or, 2),
                    ('>', _) => (Token::Op(CompareOp::Gt), 1),
                    ('<', _) => (Token::Op(CompareOp::Lt), 1),
                    ('!', _) => (Token::Not, 1),
                    _ => {
                        return Err(ConditionError::new(
                            input,
                            format!("unexpected '{}' at {}", c, i),
                        ))
                    }
                };
                tokens.push(token);
                i += width;
            }
            _ => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '.' | '-'))
                {
                    i += 1;
                }
                if start == i {
                    return Err(ConditionError::new(
                        input,
                        format!("unexpected '{}' at {}", c, i),
                    ));
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "contains" => Token::Op(CompareOp::Contains),
                    _ => match word.parse::<f64>() {
                        Ok(n) => Token::Num(n),
                        Err(_) => Token::Path(word),
                    },
                });
            }
        }
    }

    if tokens.is_empty() {
        return Err(ConditionError::new(input, "empty condition"));
    }
    Ok(tokens)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn error(&self, message: impl Into<String>) -> ConditionError {
        ConditionError::new(self.input, message)
    }

    fn parse_or(&mut self) -> Result<Expression, ConditionError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expression::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression, ConditionError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expression::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression, ConditionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expression::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expression, ConditionError> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error("missing ')'")),
                }
            }
            Some(Token::Path(path)) if path == "true" => Ok(Expression::True),
            Some(Token::Path(path)) if path == "false" => Ok(Expression::False),
            Some(Token::Path(path)) => match self.peek() {
                Some(Token::Op(op)) => {
                    let op = *op;
                    self.pos += 1;
                    let right = self.parse_literal()?;
                    Ok(Expression::Compare {
                        left: path,
                        op,
                        right,
                    })
                }
                _ => Ok(Expression::Field(path)),
            },
            Some(other) => Err(self.error(format!("unexpected token {:?}", other))),
            None => Err(self.error("unexpected end of condition")),
        }
    }

    fn parse_literal(&mut self) -> Result<Literal, ConditionError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Literal::String(s)),
            Some(Token::Num(n)) => Ok(Literal::Number(n)),
            Some(Token::Path(word)) => match word.as_str() {
                "true" => Ok(Literal::Boolean(true)),
                "false" => Ok(Literal::Boolean(false)),
                "null" => Ok(Literal::Null),
                _ => Err(self.error(format!("expected literal, found '{}'", word))),
            },
            _ => Err(self.error("expected literal")),
        }
    }
}
