//! The Emitter (§4.7): lowers allocated IR to Hack assembly text.
//!
//! Registers `Reg(0..NUM_REGISTERS)` live in `R5..R11` (Hack's `temp`
//! segment, repurposed as this compiler's register file). A call's result
//! always lands in `R12` (`RESULT`), which the allocator never hands out as
//! a register -- see the crate-level notes on why `RESULT` sits outside the
//! `K` available colors. `R13`/`R14` are call/return scratch (`FRAME`/`RET`,
//! the standard two-register save used to restore a caller's frame). `R15`
//! is transient scratch for computed-address reads and writes.

use crate::common::Id;
use crate::front::ast::Op;
use crate::middle::ir::{Binary, Class, Cmp, Expr, LocKind, Location, Stmt, Subroutine, Unary, UnaryOp, Value};

use super::asm::AssemblySource;

const REG_BASE: u8 = 5;
const RESULT_REG: &str = "R12";
const FRAME_REG: &str = "R13";
const RET_REG: &str = "R14";
const SCRATCH_REG: &str = "R15";

fn reg_name(index: u8) -> String {
    format!("R{}", REG_BASE + index)
}

/// Emit Hack assembly for an entire allocated class.
pub fn emit_class(class: &Class) -> AssemblySource {
    let mut asm = AssemblySource::new();
    for sub in &class.subroutines {
        emit_subroutine(&mut asm, class.name, sub);
    }
    asm
}

fn emit_subroutine(asm: &mut AssemblySource, class_name: Id, sub: &Subroutine) {
    asm.start(format!("function {class_name}.{} {}", sub.name, sub.num_local_slots));
    asm.label(format!("{class_name}.{}", sub.name));

    for _ in 0..sub.num_local_slots {
        asm.comment("initialize local slot to 0");
        asm.instr("D=0");
        push_d(asm);
    }

    for stmt in &sub.body {
        emit_stmt(asm, class_name, stmt);
    }
}

/// `@SP / A=M / M=D / @SP / M=M+1` -- push the value currently in `D`.
fn push_d(asm: &mut AssemblySource) {
    asm.instrs(["@SP", "A=M", "M=D", "@SP", "M=M+1"]);
}

/// `@SP / AM=M-1 / D=M` -- pop the top of the stack into `D`.
fn pop_d(asm: &mut AssemblySource) {
    asm.instrs(["@SP", "AM=M-1", "D=M"]);
}

fn load_const(asm: &mut AssemblySource, c: i16) {
    match c {
        0 => asm.instr("D=0"),
        1 => asm.instr("D=1"),
        -1 => asm.instr("D=-1"),
        c if c > 0 => asm.instrs([format!("@{c}"), "D=A".to_string()]),
        c => asm.instrs([format!("@{}", -c), "D=-A".to_string()]),
    }
}

fn segment_pointer(kind: LocKind) -> &'static str {
    match kind {
        LocKind::Argument => "ARG",
        LocKind::Local => "LCL",
        LocKind::Static => unreachable!("statics are addressed by symbol, not a segment pointer"),
    }
}

/// Load a `Location` into `D`.
fn load_location(asm: &mut AssemblySource, class_name: Id, loc: &Location) {
    match loc.kind {
        LocKind::Static => {
            asm.instrs([format!("@{class_name}.{}", loc.index), "D=M".to_string()]);
        }
        LocKind::Argument | LocKind::Local => {
            let seg = segment_pointer(loc.kind);
            if loc.index == 0 {
                asm.instrs([format!("@{seg}"), "A=M".to_string(), "D=M".to_string()]);
            } else {
                asm.instrs([
                    format!("@{seg}"),
                    "D=M".to_string(),
                    format!("@{}", loc.index),
                    "A=D+A".to_string(),
                    "D=M".to_string(),
                ]);
            }
        }
    }
}

/// Store `D` into a `Location`.
fn store_location(asm: &mut AssemblySource, class_name: Id, loc: &Location) {
    match loc.kind {
        LocKind::Static => {
            asm.instrs([format!("@{class_name}.{}", loc.index), "M=D".to_string()]);
        }
        LocKind::Argument | LocKind::Local => {
            let seg = segment_pointer(loc.kind);
            match loc.index {
                // `A=M`/`A=M+1` read the segment pointer without touching
                // `D`, so the value already sitting in `D` survives.
                0 => asm.instrs([format!("@{seg}"), "A=M".to_string(), "M=D".to_string()]),
                1 => asm.instrs([format!("@{seg}"), "A=M+1".to_string(), "M=D".to_string()]),
                2..=6 => {
                    asm.instrs([format!("@{seg}"), "A=M".to_string()]);
                    for _ in 0..loc.index {
                        asm.instr("A=A+1");
                    }
                    asm.instr("M=D");
                }
                _ => {
                    // Computing `base + index` needs `D`, so the value has
                    // to be stashed first and the target address second,
                    // then both reloaded in the right registers for the
                    // final store.
                    asm.instrs([format!("@{SCRATCH_REG}"), "M=D".to_string()]);
                    asm.instrs([
                        format!("@{seg}"),
                        "D=M".to_string(),
                        format!("@{}", loc.index),
                        "D=D+A".to_string(),
                        format!("@{FRAME_REG}"),
                        "M=D".to_string(),
                        format!("@{SCRATCH_REG}"),
                        "D=M".to_string(),
                        format!("@{FRAME_REG}"),
                        "A=M".to_string(),
                        "M=D".to_string(),
                    ]);
                }
            }
        }
    }
}

/// Load any operand value into `D`. `Value` never carries a `Location`
/// directly (those only appear inside `Expr`), so this needs no class
/// context.
fn load_value(asm: &mut AssemblySource, value: &Value) {
    match value {
        Value::Const(c) => load_const(asm, *c),
        Value::Reg { index, .. } => {
            asm.instrs([format!("@{}", reg_name(*index)), "D=M".to_string()]);
        }
        Value::Local(n) => panic!("internal compiler error: unallocated local `{n}` reached codegen"),
    }
}

/// Like [`load_value`] but for the simple (non-call, non-compound) `Expr`
/// variants, which additionally include direct `Location` reads.
fn load_expr_simple(asm: &mut AssemblySource, class_name: Id, expr: &Expr) {
    match expr {
        Expr::Const(c) => load_const(asm, *c),
        Expr::Reg { index, .. } => asm.instrs([format!("@{}", reg_name(*index)), "D=M".to_string()]),
        Expr::Location(loc) => load_location(asm, class_name, loc),
        Expr::Local(n) => panic!("internal compiler error: unallocated local `{n}` reached codegen"),
        _ => unreachable!("not a simple expression"),
    }
}

fn store_d_into(asm: &mut AssemblySource, dest: &Value) {
    match dest {
        Value::Reg { index, .. } => {
            asm.instrs([format!("@{}", reg_name(*index)), "M=D".to_string()]);
        }
        Value::Const(_) => panic!("internal compiler error: cannot assign to a constant"),
        Value::Local(n) => panic!("internal compiler error: unallocated local `{n}` reached codegen"),
    }
}

/// True if `value` is the same allocated register as `index`.
fn values_match_reg(value: &Value, index: u8) -> bool {
    matches!(value, Value::Reg { index: i, .. } if *i == index)
}

/// `Eval(Reg_i, Const imm)`: `@R{5+i}; M=imm` for `imm` in `{-1,0,1}`; any
/// other constant falls back to loading it into `D` first.
fn emit_reg_const_assign(asm: &mut AssemblySource, index: u8, c: i16) {
    match c {
        -1 | 0 | 1 => asm.instrs([format!("@{}", reg_name(index)), format!("M={c}")]),
        _ => {
            load_const(asm, c);
            asm.instrs([format!("@{}", reg_name(index)), "M=D".to_string()]);
        }
    }
}

/// The in-place ALU mnemonic for `left ⊕ right` once one side is already
/// sitting in `M` (the destination register) and the other in `D`.
fn inplace_comp(op: Op, dest_is_right: bool) -> &'static str {
    match (op, dest_is_right) {
        (Op::Plus, false) => "M+D",
        (Op::Plus, true) => "D+M",
        (Op::Minus, false) => "M-D",
        (Op::Minus, true) => "D-M",
        (Op::And, false) => "M&D",
        (Op::And, true) => "D&M",
        (Op::Or, false) => "M|D",
        (Op::Or, true) => "D|M",
        (Op::Lt | Op::Gt | Op::Eq | Op::Star | Op::Slash, _) => {
            unreachable!("not an in-place-eligible operator")
        }
    }
}

/// `Eval(Reg_i, Binary(Reg_i, +/-, Const imm))` in place, for the immediates
/// this machine can fold into the comp field directly. Returns `false` (no
/// instructions emitted) when `c` needs to be loaded through `D` instead.
fn emit_inplace_const(asm: &mut AssemblySource, index: u8, op: Op, c: i16) -> bool {
    let reg = reg_name(index);
    match (op, c) {
        (Op::Plus, 0) | (Op::Minus, 0) => true, // `+0`/`-0`: the register already holds the answer.
        (Op::Plus, 1) | (Op::Minus, -1) => {
            asm.instrs([format!("@{reg}"), "M=M+1".to_string()]);
            true
        }
        (Op::Plus, -1) | (Op::Minus, 1) => {
            asm.instrs([format!("@{reg}"), "M=M-1".to_string()]);
            true
        }
        _ => false,
    }
}

/// `Eval(Reg_i, Binary(left, op, right))` where one operand is `Reg_i`
/// itself: update the register in place instead of routing through `D` and
/// a separate store. Returns `false` if the binary doesn't have this shape
/// (a comparison, or neither operand names `index`).
fn emit_inplace_binary(asm: &mut AssemblySource, index: u8, b: &Binary) -> bool {
    if !matches!(b.op, Op::Plus | Op::Minus | Op::And | Op::Or) {
        return false;
    }

    if values_match_reg(&b.left, index) {
        if let Value::Const(c) = &b.right {
            if emit_inplace_const(asm, index, b.op, *c) {
                return true;
            }
        }
        load_value(asm, &b.right);
        asm.instrs([format!("@{}", reg_name(index)), format!("M={}", inplace_comp(b.op, false))]);
        true
    } else if values_match_reg(&b.right, index) {
        load_value(asm, &b.left);
        asm.instrs([format!("@{}", reg_name(index)), format!("M={}", inplace_comp(b.op, true))]);
        true
    } else {
        false
    }
}

/// `Eval(Reg_i, Unary(op, Reg_i))` in place: `@R; M=-M` or `@R; M=!M`.
fn emit_inplace_unary(asm: &mut AssemblySource, index: u8, op: UnaryOp) {
    let reg = reg_name(index);
    match op {
        UnaryOp::Neg => asm.instrs([format!("@{reg}"), "M=-M".to_string()]),
        UnaryOp::Not => asm.instrs([format!("@{reg}"), "M=!M".to_string()]),
    }
}

/// An `Eval` whose destination is a register gets a chance at an in-place
/// peephole before falling back to the general "compute into `D`, then
/// store" path.
fn emit_eval(asm: &mut AssemblySource, class_name: Id, dest: &Value, expr: &Expr) {
    if let Value::Reg { index, .. } = dest {
        match expr {
            Expr::Const(c) => {
                emit_reg_const_assign(asm, *index, *c);
                return;
            }
            Expr::Binary(b) if emit_inplace_binary(asm, *index, b) => return,
            Expr::Unary(u) if values_match_reg(&u.value, *index) => {
                emit_inplace_unary(asm, *index, u.op);
                return;
            }
            _ => {}
        }
    }

    emit_expr_to_d(asm, class_name, expr);
    store_d_into(asm, dest);
}

fn jump_for(cmp: Cmp) -> &'static str {
    match cmp {
        Cmp::Eq => "JEQ",
        Cmp::Ne => "JNE",
        Cmp::Lt => "JLT",
        Cmp::Gt => "JGT",
        Cmp::Le => "JLE",
        Cmp::Ge => "JGE",
    }
}

/// Compile `value <cmp> 0` as a conditional jump to `target`.
fn branch_if(asm: &mut AssemblySource, value: &Value, cmp: Cmp, target: &str) {
    load_value(asm, value);
    asm.instrs([format!("@{target}"), format!("D;{}", jump_for(cmp))]);
}

/// Compile a binary op whose operands are already-allocated `Value`s.
fn emit_binary(asm: &mut AssemblySource, b: &Binary) {
    load_value(asm, &b.right);
    asm.instrs([format!("@{SCRATCH_REG}"), "M=D".to_string()]);
    load_value(asm, &b.left);

    match b.op {
        Op::Plus => asm.instrs([format!("@{SCRATCH_REG}"), "D=D+M".to_string()]),
        Op::Minus => asm.instrs([format!("@{SCRATCH_REG}"), "D=D-M".to_string()]),
        Op::And => asm.instrs([format!("@{SCRATCH_REG}"), "D=D&M".to_string()]),
        Op::Or => asm.instrs([format!("@{SCRATCH_REG}"), "D=D|M".to_string()]),
        Op::Lt | Op::Gt | Op::Eq => {
            let cmp = match b.op {
                Op::Lt => Cmp::Lt,
                Op::Gt => Cmp::Gt,
                Op::Eq => Cmp::Eq,
                _ => unreachable!(),
            };
            asm.instrs([format!("@{SCRATCH_REG}"), "D=D-M".to_string()]);
            let when_true = asm.next_label("cmp");
            let end = asm.next_label("cmp");
            asm.instrs([format!("@{when_true}"), format!("D;{}", jump_for(cmp))]);
            asm.instr("D=0");
            asm.instrs([format!("@{end}"), "0;JMP".to_string()]);
            asm.label(when_true.to_string());
            asm.instr("D=-1");
            asm.label(end.to_string());
        }
        Op::Star | Op::Slash => unreachable!("`*`/`/` are lowered to Math calls before codegen"),
    }
}

fn emit_unary(asm: &mut AssemblySource, u: &Unary) {
    load_value(asm, &u.value);
    match u.op {
        UnaryOp::Neg => asm.instr("D=-D"),
        UnaryOp::Not => asm.instr("D=!D"),
    }
}

/// `@R15 / M=D / @R15 / A=M / D=M` -- dereference the address in `D`.
fn emit_indirect_read(asm: &mut AssemblySource, address: &Value) {
    load_value(asm, address);
    asm.instrs([format!("@{SCRATCH_REG}"), "M=D".to_string(), format!("@{SCRATCH_REG}"), "A=M".to_string(), "D=M".to_string()]);
}

fn emit_indirect_write(asm: &mut AssemblySource, address: &Value, value: &Value) {
    load_value(asm, address);
    asm.instrs([format!("@{SCRATCH_REG}"), "M=D".to_string()]);
    load_value(asm, value);
    asm.instrs([format!("@{SCRATCH_REG}"), "A=M".to_string(), "M=D".to_string()]);
}

/// The standard call sequence: save the caller's frame, reposition `ARG`
/// and `LCL` for the callee, jump, and fall through to a freshly generated
/// return-address label.
fn emit_call(asm: &mut AssemblySource, class_name: Id, sub_name: Id, nargs: u16) {
    let return_label = asm.next_label("ret");
    asm.comment(format!("call {class_name}.{sub_name} {nargs}"));
    asm.instrs([format!("@{return_label}"), "D=A".to_string()]);
    push_d(asm);
    for seg in ["LCL", "ARG", "THIS", "THAT"] {
        asm.instrs([format!("@{seg}"), "D=M".to_string()]);
        push_d(asm);
    }
    asm.instrs([
        "@SP".to_string(),
        "D=M".to_string(),
        format!("@{}", nargs + 5),
        "D=D-A".to_string(),
        "@ARG".to_string(),
        "M=D".to_string(),
        "@SP".to_string(),
        "D=M".to_string(),
        "@LCL".to_string(),
        "M=D".to_string(),
        format!("@{class_name}.{sub_name}"),
        "0;JMP".to_string(),
    ]);
    asm.label(return_label.to_string());
    // The callee leaves its result on top of the stack; land it in RESULT
    // so the caller's `Eval`/`Discard` can read it like any other operand.
    pop_d(asm);
    asm.instrs([format!("@{RESULT_REG}"), "M=D".to_string()]);
}

/// The standard return sequence, using `FRAME`/`RET` scratch registers to
/// avoid clobbering the return value while the caller's frame is restored.
fn emit_return(asm: &mut AssemblySource) {
    asm.instrs([
        "@LCL".to_string(),
        "D=M".to_string(),
        format!("@{FRAME_REG}"),
        "M=D".to_string(),
        format!("@{FRAME_REG}"),
        "A=M".to_string(),
        "A=A-1".to_string(),
        "A=A-1".to_string(),
        "A=A-1".to_string(),
        "A=A-1".to_string(),
        "A=A-1".to_string(),
        "D=M".to_string(),
        format!("@{RET_REG}"),
        "M=D".to_string(),
    ]);
    pop_d(asm);
    asm.instrs(["@ARG", "A=M", "M=D"]);
    asm.instrs(["@ARG", "D=M+1", "@SP", "M=D"]);
    for (seg, back) in [("THAT", 1u8), ("THIS", 2), ("ARG", 3), ("LCL", 4)] {
        asm.instrs([format!("@{FRAME_REG}"), "A=M".to_string()]);
        for _ in 0..back {
            asm.instr("A=A-1");
        }
        asm.instr("D=M");
        asm.instrs([format!("@{seg}"), "M=D".to_string()]);
    }
    asm.instrs([format!("@{RET_REG}"), "A=M".to_string(), "0;JMP".to_string()]);
}

fn emit_stmt(asm: &mut AssemblySource, class_name: Id, stmt: &Stmt) {
    match stmt {
        Stmt::Eval { dest, expr } => emit_eval(asm, class_name, dest, expr),
        Stmt::Store { location, value } => {
            load_value(asm, value);
            store_location(asm, class_name, location);
        }
        Stmt::IndirectWrite { address, value } => {
            emit_indirect_write(asm, address, value);
        }
        Stmt::If { value, cmp, when_true, when_false } => {
            let else_label = asm.next_label("else");
            let end_label = asm.next_label("endif");
            branch_if(asm, value, cmp.negate(), &else_label.to_string());
            for s in when_true {
                emit_stmt(asm, class_name, s);
            }
            if when_false.is_some() {
                asm.instrs([format!("@{end_label}"), "0;JMP".to_string()]);
            }
            asm.label(else_label.to_string());
            if let Some(when_false) = when_false {
                for s in when_false {
                    emit_stmt(asm, class_name, s);
                }
                asm.label(end_label.to_string());
            }
        }
        Stmt::While { test, value, cmp, body } => {
            let top_label = asm.next_label("loop");
            let end_label = asm.next_label("endloop");
            asm.label(top_label.to_string());
            for s in test {
                emit_stmt(asm, class_name, s);
            }
            branch_if(asm, value, cmp.negate(), &end_label.to_string());
            for s in body {
                emit_stmt(asm, class_name, s);
            }
            asm.instrs([format!("@{top_label}"), "0;JMP".to_string()]);
            asm.label(end_label.to_string());
        }
        Stmt::Return { expr } => {
            emit_expr_to_d(asm, class_name, expr);
            push_d(asm);
            emit_return(asm);
        }
        Stmt::Push { expr } => {
            emit_expr_to_d(asm, class_name, expr);
            push_d(asm);
        }
        Stmt::Discard { call } => {
            emit_call(asm, call.class_name, call.sub_name, call.nargs);
        }
    }
}

fn emit_expr_to_d(asm: &mut AssemblySource, class_name: Id, expr: &Expr) {
    match expr {
        Expr::Binary(b) => emit_binary(asm, b),
        Expr::Unary(u) => emit_unary(asm, u),
        Expr::IndirectRead { address } => emit_indirect_read(asm, address),
        Expr::CallSub(call) => {
            emit_call(asm, call.class_name, call.sub_name, call.nargs);
            asm.instrs([format!("@{RESULT_REG}"), "D=M".to_string()]);
        }
        simple => load_expr_simple(asm, class_name, simple),
    }
}
