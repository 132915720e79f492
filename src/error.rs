use thiserror::Error;

/// The error type for expression compilation.
///
/// Every variant produced while scanning or parsing carries the byte offset
/// into the source text where the problem was detected; `Display` renders it
/// as `"<offset>: <message>"`. Code generation and OS failures have no
/// source position.
///
/// A failed [`compile`](crate::Abacus::compile) never disturbs the
/// previously compiled function.
#[derive(Debug, Error)]
pub enum JitError {
    /// A byte that cannot start any token.
    #[error("{offset}: unexpected character '{found}'")]
    UnexpectedChar { offset: usize, found: char },
    /// The expression ended where a term was required.
    #[error("{offset}: unexpected end of expression")]
    UnexpectedEnd { offset: usize },
    /// A numeric literal that started well but did not finish (`1.`, `2e+`).
    #[error("{offset}: unable to parse number")]
    BadNumber { offset: usize },
    /// A `(` without its matching `)`.
    #[error("{offset}: expected ')'")]
    ExpectedCloseParen { offset: usize },
    /// An identifier bound to neither a variable nor a function of the
    /// arity used at the call site.
    #[error("{offset}: unknown symbol '{name}'")]
    UnknownSymbol { offset: usize, name: String },
    /// A call with a fourth argument; bound functions take at most three.
    #[error("{offset}: too many arguments for '{name}' function call")]
    TooManyArguments { offset: usize, name: String },
    /// Emitted code met the constant pool; recompile with a larger buffer
    /// via [`Abacus::with_code_capacity`](crate::Abacus::with_code_capacity).
    #[error("code buffer full ({capacity} bytes)")]
    CodeBufferFull { capacity: usize },
    /// The expression needed more live temporaries than the spill area holds.
    #[error("too many register spills (limit {max})")]
    TooManySpills { max: u32 },
    /// The OS refused to allocate or reprotect executable pages.
    #[error("executable page allocation failed")]
    OsPageAllocFailed,
}
