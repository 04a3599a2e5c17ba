use std::fmt;

pub type Result<T> = std::result::Result<T, KernelError>;

/// 1-based location inside a combiner expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Position {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self {
            line: 1,
            column: 1,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub enum KernelError {
    LexError { message: String, position: Position },
    ParseError { message: String, position: Position },
    Shape { message: String },
    Lower { message: String },
    Eval { message: String },
    CodeGen { message: String },
    Native { message: String },
}

impl KernelError {
    pub fn lex_error(message: impl Into<String>, position: Position) -> Self {
        Self::LexError {
            message: message.into(),
            position,
        }
    }

    pub fn parse_error(message: impl Into<String>, position: Position) -> Self {
        Self::ParseError {
            message: message.into(),
            position,
        }
    }

    pub fn shape_error(message: impl Into<String>) -> Self {
        Self::Shape {
            message: message.into(),
        }
    }

    pub fn lower_error(message: impl Into<String>) -> Self {
        Self::Lower {
            message: message.into(),
        }
    }

    pub fn eval_error(message: impl Into<String>) -> Self {
        Self::Eval {
            message: message.into(),
        }
    }

    pub fn codegen_error(message: impl Into<String>) -> Self {
        Self::CodeGen {
            message: message.into(),
        }
    }

    pub fn native_error(message: impl Into<String>) -> Self {
        Self::Native {
            message: message.into(),
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::LexError { message, position } => {
                write!(
                    f,
                    "error[lex] {}:{}: {}",
                    position.line, position.column, message
                )
            }
            KernelError::ParseError { message, position } => {
                write!(
                    f,
                    "error[parse] {}:{}: {}",
                    position.line, position.column, message
                )
            }
            KernelError::Shape { message } => write!(f, "error[shape]: {message}"),
            KernelError::Lower { message } => write!(f, "error[lower]: {message}"),
            KernelError::Eval { message } => write!(f, "error[eval]: {message}"),
            KernelError::CodeGen { message } => write!(f, "error[codegen]: {message}"),
            KernelError::Native { message } => write!(f, "error[native]: {message}"),
        }
    }
}

impl std::error::Error for KernelError {}

/// Format an error with the offending combiner source line and a caret.
///
/// Output format:
/// ```text
/// combiner:1:7  error[parse]: expected expression, found end of input
///     a * (b
///           ^
/// ```
/// Errors without a source position fall back to their `Display` form.
pub fn format_with_source(error: &KernelError, filename: &str, source: &str) -> String {
    let (position, kind, message) = match error {
        KernelError::LexError { message, position } => (position, "lex", message.as_str()),
        KernelError::ParseError { message, position } => (position, "parse", message.as_str()),
        other => return other.to_string(),
    };
    let (line, col) = (position.line, position.column);

    let header = format!("{filename}:{line}:{col}  error[{kind}]: {message}");

    let lines: Vec<&str> = source.lines().collect();
    if line == 0 || line > lines.len() {
        return header;
    }

    let source_line = lines[line - 1];
    let caret_col = col.saturating_sub(1);
    let caret = format!("{:>width$}^", "", width = caret_col + 4);

    format!("{header}\n    {source_line}\n{caret}")
}
