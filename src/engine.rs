use log::debug;

use crate::codegen;
use crate::error::JitError;
use crate::exec::{CodeBuffer, CompiledCode};
use crate::graph::ExprGraph;
use crate::parser::Parser;
use crate::symbols::{Fn1, Fn2, Fn3, NativeFn, SymbolTable};

const DEFAULT_CODE_CAPACITY: usize = 16 * 1024;

/// A JIT compiler instance for scalar `f64` expressions.
///
/// Variables and native functions are bound by name, an expression is
/// compiled once, and [`eval`](Abacus::eval) runs the generated code. The
/// compiled function reads every variable slot live, so updating a variable
/// with [`bind_var`](Abacus::bind_var) changes the next evaluation without
/// recompiling.
///
/// One thread owns an instance: `bind_*`, `compile` and `eval` are not
/// synchronised. Evaluating the compiled function from several threads is
/// safe only while no thread writes the variables it reads and no thread
/// recompiles (recompiling frees the executable pages of the previous
/// function).
///
/// # Examples
///
/// ```
/// use abacus::Abacus;
///
/// let mut jit = Abacus::new();
/// jit.bind_var("x", 2.0);
/// jit.compile("x*x + 1").unwrap();
/// assert_eq!(jit.eval(), 5.0);
///
/// jit.bind_var("x", 3.0); // no recompilation
/// assert_eq!(jit.eval(), 10.0);
/// ```
pub struct Abacus {
    symbols: SymbolTable,
    compiled: Option<CompiledCode>,
    last_error: String,
    code_capacity: usize,
}

impl Default for Abacus {
    fn default() -> Self {
        Self::new()
    }
}

impl Abacus {
    /// An instance with the standard math functions bound and a 16 KiB
    /// code buffer.
    pub fn new() -> Self {
        Self::with_code_capacity(DEFAULT_CODE_CAPACITY)
    }

    /// Same as [`new`](Abacus::new) with an explicit code buffer capacity.
    /// The capacity is rounded up to whole pages; an expression whose code
    /// outgrows it fails to compile with [`JitError::CodeBufferFull`].
    pub fn with_code_capacity(bytes: usize) -> Self {
        Self {
            symbols: SymbolTable::with_builtins(),
            compiled: None,
            last_error: String::new(),
            code_capacity: bytes,
        }
    }

    /// Creates or updates the variable `name`.
    ///
    /// The slot's address is stable for the whole lifetime of the instance;
    /// compiled expressions read it on every evaluation. Binding a variable
    /// over a function name removes the function binding.
    pub fn bind_var(&mut self, name: &str, value: f64) {
        self.symbols.bind_var(name, value);
    }

    /// Current value of a variable, if `name` is bound as one.
    pub fn read_var(&self, name: &str) -> Option<f64> {
        self.symbols.read_var(name)
    }

    /// Binds a 1-argument native function, shadowing any previous binding
    /// of the same name and arity (built-ins included).
    ///
    /// Bound functions must be pure: when every argument at a call site is
    /// a compile-time constant the function is invoked during `compile` and
    /// the call is replaced by its result.
    pub fn bind_fn1(&mut self, name: &str, f: Fn1) {
        self.symbols.bind_fn(name, NativeFn::Unary(f));
    }

    /// Binds a 2-argument native function. See [`bind_fn1`](Abacus::bind_fn1).
    pub fn bind_fn2(&mut self, name: &str, f: Fn2) {
        self.symbols.bind_fn(name, NativeFn::Binary(f));
    }

    /// Binds a 3-argument native function. See [`bind_fn1`](Abacus::bind_fn1).
    pub fn bind_fn3(&mut self, name: &str, f: Fn3) {
        self.symbols.bind_fn(name, NativeFn::Ternary(f));
    }

    /// Compiles `text` and installs the resulting function.
    ///
    /// On failure the previously compiled function (if any) stays
    /// installed and callable; the error is also kept for
    /// [`error`](Abacus::error).
    ///
    /// ```
    /// use abacus::Abacus;
    ///
    /// let mut jit = Abacus::new();
    /// jit.compile("2 + 2").unwrap();
    /// assert_eq!(jit.eval(), 4.0);
    ///
    /// // a failed compile leaves the old function in place
    /// assert!(jit.compile("2 +").is_err());
    /// assert_eq!(jit.eval(), 4.0);
    /// assert!(!jit.error().is_empty());
    /// ```
    pub fn compile(&mut self, text: &str) -> Result<(), JitError> {
        match self.compile_inner(text) {
            Ok(code) => {
                debug!("compiled {text:?}: {} bytes of code", code.code_len());
                // the previous buffer is dropped only here, after the new
                // one sealed successfully
                self.compiled = Some(code);
                self.last_error.clear();
                Ok(())
            }
            Err(err) => {
                debug!("compiling {text:?} failed: {err}");
                self.last_error = err.to_string();
                Err(err)
            }
        }
    }

    fn compile_inner(&self, text: &str) -> Result<CompiledCode, JitError> {
        let mut graph = ExprGraph::new();
        let root = Parser::new(text, &self.symbols, &mut graph)?.parse()?;
        let buf = CodeBuffer::new(self.code_capacity)?;
        codegen::generate(&graph, root, buf)
    }

    /// The diagnostic of the most recent [`compile`](Abacus::compile),
    /// empty after a success. Positioned errors are rendered as
    /// `"<byte offset>: <message>"`.
    pub fn error(&self) -> &str {
        &self.last_error
    }

    /// Runs the compiled function. Never fails: before the first successful
    /// [`compile`](Abacus::compile) this returns `0.0`.
    pub fn eval(&self) -> f64 {
        match &self.compiled {
            Some(code) => code.call(),
            None => 0.0,
        }
    }
}
