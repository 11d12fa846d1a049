use std::fmt;

/// An error produced while compiling or running Lox source.
///
/// Both variants carry the source line so `Display` can render the
/// `[line N] Error<where>: <message>` form the driver writes to stderr.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoxError {
    /// Scan or parse error. `location` is empty, ` at end`, or ` at '<lexeme>'`.
    #[error("[line {line}] Error{location}: {message}")]
    Compile {
        line: u32,
        location: String,
        message: String,
    },

    /// Error raised by the VM while executing a chunk.
    #[error("[line {line}] Error: {message}")]
    Runtime { line: u32, message: String },
}

impl LoxError {
    pub fn compile(line: u32, location: impl Into<String>, message: impl Into<String>) -> Self {
        LoxError::Compile {
            line,
            location: location.into(),
            message: message.into(),
        }
    }

    pub fn runtime(line: u32, message: impl Into<String>) -> Self {
        LoxError::Runtime {
            line,
            message: message.into(),
        }
    }

    pub fn line(&self) -> u32 {
        match self {
            LoxError::Compile { line, .. } | LoxError::Runtime { line, .. } => *line,
        }
    }
}

/// Outcome of a failed interpret run, distinguishing the two exit paths
/// the outer driver cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum InterpretError {
    /// One or more scan/parse errors; the chunk was never executed.
    Compile(Vec<LoxError>),
    /// A single terminal runtime error.
    Runtime(LoxError),
}

impl InterpretError {
    /// Conventional sysexits code: 65 for bad input, 70 for an internal
    /// software failure at runtime.
    pub fn exit_code(&self) -> i32 {
        match self {
            InterpretError::Compile(_) => 65,
            InterpretError::Runtime(_) => 70,
        }
    }
}

impl fmt::Display for InterpretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpretError::Compile(errors) => {
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{err}")?;
                }
                Ok(())
            }
            InterpretError::Runtime(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for InterpretError {}
