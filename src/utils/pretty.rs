//! Pretty printing utilities for IR and traces.

use std::fmt;

/// Line-oriented writer for the script form of a function.
#[derive(Debug)]
pub struct CodeFormatter {
    lines: Vec<String>,
    depth: usize,
    indent_str: String,
}

impl CodeFormatter {
    pub fn new(indent_str: &str) -> Self {
        Self { lines: Vec::new(), depth: 0, indent_str: indent_str.to_string() }
    }

    /// Four-space indentation, as in the script form.
    pub fn default_indent() -> Self {
        Self::new("    ")
    }

    /// Append one line at the current depth. Embedded newlines start new
    /// lines at the same depth.
    pub fn writeln(&mut self, s: &str) {
        for line in s.lines() {
            self.lines.push(format!("{}{}", self.indent_str.repeat(self.depth), line));
        }
    }

    /// Write a `header:` line and an indented body.
    pub fn scope<F: FnOnce(&mut Self)>(&mut self, header: &str, f: F) {
        self.writeln(&format!("{}:", header));
        self.depth += 1;
        f(self);
        self.depth -= 1;
    }

    pub fn finish(self) -> String {
        let mut out = self.lines.join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        out
    }
}

/// Format a list with separators.
pub fn format_list<T: fmt::Display>(items: &[T], sep: &str) -> String {
    items.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(sep)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope() {
        let mut fmt = CodeFormatter::default_indent();
        fmt.scope("for i in range(4)", |f| {
            f.scope("with block(\"A\")", |f| f.writeln("A[i] = 0"));
        });
        fmt.writeln("evaluate(0)");
        assert_eq!(
            fmt.finish(),
            "for i in range(4):\n    with block(\"A\"):\n        A[i] = 0\nevaluate(0)\n"
        );
    }

    #[test]
    fn test_format_list() {
        assert_eq!(format_list(&[1, 2, 3], ", "), "1, 2, 3");
        assert_eq!(format_list::<i64>(&[], ", "), "");
    }
}
