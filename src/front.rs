//! The front-end: the Jack AST and the symbol table collaborator.
//!
//! There is deliberately no lexer or parser here — turning Jack source text
//! into a [`ast::Class`] is out of scope. The CLI driver reads a JSON
//! encoding of [`ast::Class`] instead; see `src/bin/jackregc.rs`.

pub mod ast;
pub mod symbols;

pub use ast::*;
pub use symbols::{ClassSymbols, SymbolTable, VarKind};
