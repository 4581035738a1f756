//! Tensor IR: expressions, statements, blocks and functions.
//!
//! The tree defined here is the exchange format of the crate. Builders
//! construct it, schedules consume and produce it, and the printer renders it.

pub mod expr;
pub mod stmt;
pub mod builder;
pub mod printer;

pub use expr::{AccessMode, BinaryOp, Expr};
pub use stmt::{
    Block, Buffer, BufferRegion, BufferScope, DataType, Function, IterKind, IterVar, Loop,
    MatchBuffer, Program, Range, Stmt,
};
pub use builder::{grid, BlockBuilder, FunctionBuilder, ROOT_BLOCK_NAME};
pub use printer::print_function;
