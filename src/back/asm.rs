//! The Hack assembly backend's instruction sink.
//!
//! There's no typed instruction set here: Hack assembly is simple enough
//! (two instruction forms, a handful of comp/dest/jump fields) that modeling
//! it as an enum buys nothing over emitting the textual lines directly, the
//! way the project's own assembly-emitting code always has.

use derive_more::Display;
use std::fmt;

use crate::common::id;

#[derive(Clone, Debug, Display, PartialEq, Eq)]
enum Line {
    #[display("{_0}")]
    Instr(String),
    #[display("({_0})")]
    Label(String),
    #[display("// {_0}")]
    Comment(String),
    #[display("")]
    Blank,
}

/// Accumulates a program's worth of Hack assembly text, line by line.
#[derive(Default)]
pub struct AssemblySource {
    lines: Vec<Line>,
    next_label: u32,
}

impl AssemblySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one already-formatted instruction line (e.g. `"@SP"`,
    /// `"D=M-D"`, `"D;JGT"`).
    pub fn instr(&mut self, text: impl Into<String>) {
        self.lines.push(Line::Instr(text.into()));
    }

    /// Append several instruction lines at once.
    pub fn instrs<S: Into<String>>(&mut self, lines: impl IntoIterator<Item = S>) {
        for line in lines {
            self.instr(line);
        }
    }

    pub fn label(&mut self, name: impl Into<String>) {
        self.lines.push(Line::Label(name.into()));
    }

    pub fn comment(&mut self, text: impl Into<String>) {
        self.lines.push(Line::Comment(text.into()));
    }

    pub fn blank(&mut self) {
        self.lines.push(Line::Blank);
    }

    /// Marks the start of a new function's generated code with a blank line
    /// and a banner comment, the way the project's VM translator labels the
    /// start of each function's instructions.
    pub fn start(&mut self, banner: impl Into<String>) {
        self.blank();
        self.comment(banner);
    }

    /// A fresh globally-unique label for a branch target that has no
    /// corresponding named Jack construct (an `if`/`while` test, a
    /// short-circuit comparison).
    pub fn next_label(&mut self, hint: &str) -> crate::common::Id {
        let n = self.next_label;
        self.next_label += 1;
        id(&format!("_{hint}_{n}"))
    }

    /// Count of real instructions emitted so far -- labels, comments, and
    /// blank lines don't occupy a ROM word.
    pub fn instruction_count(&self) -> usize {
        self.lines.iter().filter(|l| matches!(l, Line::Instr(_))).count()
    }
}

impl fmt::Display for AssemblySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_and_comments_do_not_count_as_instructions() {
        let mut asm = AssemblySource::new();
        asm.comment("a function starts here");
        asm.label("Main.main");
        asm.instr("@SP");
        asm.instr("M=M+1");
        assert_eq!(asm.instruction_count(), 2);
    }

    #[test]
    fn generated_labels_are_unique_and_carry_their_hint() {
        let mut asm = AssemblySource::new();
        let a = asm.next_label("eq");
        let b = asm.next_label("eq");
        assert_ne!(a, b);
        assert!(a.starts_with("_eq_"));
    }

    #[test]
    fn display_renders_one_line_per_entry() {
        let mut asm = AssemblySource::new();
        asm.instr("@SP");
        asm.instr("M=M+1");
        let text = asm.to_string();
        assert_eq!(text.lines().count(), 2);
    }
}
