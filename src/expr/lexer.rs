use logos::Logos;
use std::fmt;

use crate::error::{KernelError, Position};

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub position: Position,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: String, position: Position) -> Self {
        Self {
            kind,
            lexeme,
            position,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}({:?}) at {}:{}",
            self.kind, self.lexeme, self.position.line, self.position.column
        )
    }
}

#[derive(Logos, Debug, Clone, Copy, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum TokenKind {
    #[regex("[a-zA-Z_][a-zA-Z0-9_]*")]
    Identifier,
    #[regex(r"[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?")]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?")]
    Number,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("^")]
    Caret,
    #[token("(")]
    LeftParen,
    #[token(")")]
    RightParen,
    #[token(",")]
    Comma,
}

pub struct Lexer<'src> {
    source: &'src str,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self { source }
    }

    pub fn tokenize(&self) -> crate::error::Result<Vec<Token>> {
        let mut tokens = Vec::new();

        let line_starts = self.compute_line_starts();
        let mut lex = TokenKind::lexer(self.source);

        while let Some(result) = lex.next() {
            let span = lex.span();
            let lexeme = lex.slice().to_string();
            let position = self.offset_to_position(span.start, &line_starts);

            match result {
                Ok(kind) => tokens.push(Token::new(kind, lexeme, position)),
                Err(()) => {
                    return Err(KernelError::lex_error(
                        format!("unexpected character: {lexeme:?}"),
                        position,
                    ));
                }
            }
        }

        Ok(tokens)
    }

    /// Position just past the last character, for end-of-input diagnostics.
    pub fn end_position(&self) -> Position {
        let line_starts = self.compute_line_starts();
        self.offset_to_position(self.source.len(), &line_starts)
    }

    fn compute_line_starts(&self) -> Vec<usize> {
        let mut starts = vec![0];
        for (i, ch) in self.source.bytes().enumerate() {
            if ch == b'\n' {
                starts.push(i + 1);
            }
        }
        starts
    }

    fn offset_to_position(&self, offset: usize, line_starts: &[usize]) -> Position {
        let line = match line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let column = offset - line_starts[line] + 1;
        Position::new(line + 1, column, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_tokens() {
        assert_eq!(
            kinds("a * (b + 2.5)"),
            vec![
                TokenKind::Identifier,
                TokenKind::Star,
                TokenKind::LeftParen,
                TokenKind::Identifier,
                TokenKind::Plus,
                TokenKind::Number,
                TokenKind::RightParen,
            ]
        );
        assert_eq!(
            kinds("max(x, 1e-3)"),
            vec![
                TokenKind::Identifier,
                TokenKind::LeftParen,
                TokenKind::Identifier,
                TokenKind::Comma,
                TokenKind::Number,
                TokenKind::RightParen,
            ]
        );
    }

    #[test]
    fn test_positions_track_lines() {
        let tokens = Lexer::new("a\n  * b").tokenize().unwrap();
        assert_eq!(tokens[1].position, Position::new(2, 3, 4));
        assert_eq!(tokens[2].position, Position::new(2, 5, 6));
    }

    #[test]
    fn test_unexpected_character() {
        let err = Lexer::new("a % b").tokenize().unwrap_err();
        assert_eq!(err.to_string(), "error[lex] 1:3: unexpected character: \"%\"");
    }
}
