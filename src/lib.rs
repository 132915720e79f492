#![doc = include_str!("../README.md")]

#[cfg(not(target_arch = "x86_64"))]
compile_error!("abacus emits x86-64 machine code and cannot build for this architecture");

mod builtins;
mod codegen;
mod engine;
mod error;
mod exec;
mod graph;
mod lexer;
mod parser;
mod symbols;

pub use engine::Abacus;
pub use error::JitError;
pub use symbols::{Fn1, Fn2, Fn3};
