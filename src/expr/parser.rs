use crate::error::{KernelError, Position};

use super::lexer::{Token, TokenKind};
use super::{BinaryOp, Expr};

/// Recursive-descent parser for combiner expressions.
///
/// Precedence, loosest first: `+ -`, `* /`, unary `-`, `^` (right
/// associative), then literals, operand names, `max(..)`/`min(..)` calls and
/// parenthesized groups.
pub(super) struct Parser {
    tokens: Vec<Token>,
    current: usize,
    end: Position,
}

impl Parser {
    pub(super) fn new(tokens: Vec<Token>, end: Position) -> Self {
        Self {
            tokens,
            current: 0,
            end,
        }
    }

    pub(super) fn parse(&mut self) -> crate::error::Result<Expr> {
        let expr = self.additive()?;
        if let Some(token) = self.tokens.get(self.current) {
            return Err(KernelError::parse_error(
                format!("unexpected {:?} after expression", token.lexeme),
                token.position.clone(),
            ));
        }
        Ok(expr)
    }

    fn additive(&mut self) -> crate::error::Result<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = if self.check(TokenKind::Plus) {
                BinaryOp::Add
            } else if self.check(TokenKind::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };
            self.advance();
            let right = self.multiplicative()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> crate::error::Result<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = if self.check(TokenKind::Star) {
                BinaryOp::Mul
            } else if self.check(TokenKind::Slash) {
                BinaryOp::Div
            } else {
                break;
            };
            self.advance();
            let right = self.unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> crate::error::Result<Expr> {
        if self.check(TokenKind::Minus) {
            self.advance();
            let inner = self.unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.power()
    }

    fn power(&mut self) -> crate::error::Result<Expr> {
        let base = self.primary()?;
        if self.check(TokenKind::Caret) {
            self.advance();
            // right-associative; the exponent may carry its own sign
            let exponent = self.unary()?;
            return Ok(Expr::Binary(
                Box::new(base),
                BinaryOp::Pow,
                Box::new(exponent),
            ));
        }
        Ok(base)
    }

    fn primary(&mut self) -> crate::error::Result<Expr> {
        let position = self.current_position();
        let Some(token) = self.tokens.get(self.current).cloned() else {
            return Err(KernelError::parse_error(
                "expected expression, found end of input",
                position,
            ));
        };
        match token.kind {
            TokenKind::Number => {
                self.advance();
                let value = token.lexeme.parse::<f64>().map_err(|_| {
                    KernelError::parse_error(
                        format!("invalid number literal {:?}", token.lexeme),
                        position,
                    )
                })?;
                Ok(Expr::Literal(value))
            }
            TokenKind::Identifier => {
                self.advance();
                if self.check(TokenKind::LeftParen) {
                    return self.call(&token);
                }
                Ok(Expr::Operand(token.lexeme))
            }
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.additive()?;
                self.expect_kind(TokenKind::RightParen, "expected ')' to close group")?;
                Ok(inner)
            }
            _ => Err(KernelError::parse_error(
                format!("expected expression, found {:?}", token.lexeme),
                position,
            )),
        }
    }

    fn call(&mut self, callee: &Token) -> crate::error::Result<Expr> {
        let op = match callee.lexeme.as_str() {
            "max" => BinaryOp::Max,
            "min" => BinaryOp::Min,
            other => {
                return Err(KernelError::parse_error(
                    format!("unknown function '{other}'"),
                    callee.position.clone(),
                ))
            }
        };
        self.expect_kind(TokenKind::LeftParen, "expected '('")?;
        let left = self.additive()?;
        self.expect_kind(
            TokenKind::Comma,
            &format!("'{}' takes exactly two arguments", callee.lexeme),
        )?;
        let right = self.additive()?;
        self.expect_kind(
            TokenKind::RightParen,
            &format!("expected ')' after arguments to '{}'", callee.lexeme),
        )?;
        Ok(Expr::Binary(Box::new(left), op, Box::new(right)))
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.tokens.get(self.current).map(|t| t.kind) == Some(kind)
    }

    fn advance(&mut self) {
        self.current += 1;
    }

    fn expect_kind(&mut self, kind: TokenKind, msg: &str) -> crate::error::Result<()> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(KernelError::parse_error(msg, self.current_position()))
        }
    }

    fn current_position(&self) -> Position {
        self.tokens
            .get(self.current)
            .map(|t| t.position.clone())
            .unwrap_or_else(|| self.end.clone())
    }
}
