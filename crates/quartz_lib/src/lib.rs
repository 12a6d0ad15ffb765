pub mod bytecode;
pub mod codegen;
pub mod compiler;
pub mod errors;
pub mod irgen;
pub mod language;
pub mod lexer;
pub mod parser;
pub mod source_map;
pub mod target;

pub use compiler::{Compiler, CompilerOptions, MangleStyle, OptimizationLevel, OutputFormat};
pub use errors::{Error, Note};
pub use source_map::{SourceMap, Span};
