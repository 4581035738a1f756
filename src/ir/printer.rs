//! Script-like rendering of functions, used by logs and the CLI.

use crate::ir::stmt::{Block, Buffer, Function, IterKind, Stmt};
use crate::utils::pretty::{format_list, CodeFormatter};
use std::fmt;

fn shape_str(buffer: &Buffer) -> String {
    if buffer.shape.len() == 1 {
        format!("({},)", buffer.shape[0])
    } else {
        format!("({})", format_list(&buffer.shape, ", "))
    }
}

fn print_block(out: &mut CodeFormatter, block: &Block) {
    out.scope(&format!("with block(\"{}\")", block.name), |out| {
        for iv in &block.iter_vars {
            let kind = match iv.kind {
                IterKind::Spatial => "spatial",
                IterKind::Reduce => "reduce",
            };
            out.writeln(&format!("{} = axis.{}({}, {})", iv.var, kind, iv.extent, iv.binding));
        }
        if let Some(p) = &block.predicate {
            out.writeln(&format!("where({})", p));
        }
        if !block.iter_vars.is_empty() || !block.reads.is_empty() {
            out.writeln(&format!("reads({})", format_list(&block.reads, ", ")));
            out.writeln(&format!("writes({})", format_list(&block.writes, ", ")));
        }
        if !block.annotations.is_empty() {
            let attrs: Vec<String> = block
                .annotations
                .iter()
                .map(|(k, v)| format!("\"{}\": \"{}\"", k, v))
                .collect();
            out.writeln(&format!("block_attr({{{}}})", attrs.join(", ")));
        }
        for buf in &block.alloc_buffers {
            out.writeln(&format!("{} = alloc_buffer({}, \"{}\")", buf.name, shape_str(buf), buf.dtype));
        }
        for m in &block.match_buffers {
            out.writeln(&format!("{} = match_buffer({}, {})", m.buffer.name, m.source, shape_str(&m.buffer)));
        }
        if let Some(init) = &block.init {
            out.scope("with init()", |out| print_stmt(out, init));
        }
        print_stmt(out, &block.body);
    });
}

fn print_stmt(out: &mut CodeFormatter, stmt: &Stmt) {
    match stmt {
        Stmt::Seq(stmts) => stmts.iter().for_each(|s| print_stmt(out, s)),
        Stmt::For(l) => {
            out.scope(&format!("for {} in range({})", l.var, l.extent), |out| {
                print_stmt(out, &l.body)
            });
        }
        Stmt::Block(b) => print_block(out, b),
        Stmt::Store { buffer, indices, value } => {
            out.writeln(&format!("{}[{}] = {}", buffer, format_list(indices, ", "), value));
        }
        Stmt::Evaluate(e) => out.writeln(&format!("evaluate({})", e)),
    }
}

/// Render a function as text.
pub fn print_function(func: &Function) -> String {
    let mut out = CodeFormatter::default_indent();
    let params: Vec<String> = func
        .params
        .iter()
        .map(|b| format!("{}: Buffer({}, \"{}\")", b.name, shape_str(b), b.dtype))
        .collect();
    out.writeln("@prim_func");
    out.scope(&format!("def {}({})", func.name, params.join(", ")), |out| {
        print_block(out, &func.root);
    });
    out.finish()
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", print_function(self))
    }
}
