//! §4.6: the allocator driver. Ties liveness, spill selection, promotion,
//! and coloring into the spill-fallback loop that lowers a flattened
//! subroutine's locals to either a `Reg` or a `local` segment slot.

use crate::common::{Id, Set};
use crate::middle::color::color_locals;
use crate::middle::ir::{Class, Expr, Location, Stmt, Subroutine, Value};
use crate::middle::liveness::analyze_liveness;
use crate::middle::promote::promote_locals;
use crate::middle::spill::need_saving;

/// Number of general-purpose working registers available to the allocator
/// (`R5..R11`, Hack's `temp` segment repurposed as the register file; see
/// the crate-level design notes on `RESULT` at `R12`).
pub const NUM_REGISTERS: u8 = 7;

fn all_locals(stmts: &[Stmt], out: &mut Set<Id>) {
    fn value_local(v: &Value, out: &mut Set<Id>) {
        if let Some(n) = v.local_name() {
            out.insert(n);
        }
    }
    fn expr_locals(e: &Expr, out: &mut Set<Id>) {
        match e {
            Expr::Local(n) => {
                out.insert(*n);
            }
            Expr::Binary(b) => {
                value_local(&b.left, out);
                value_local(&b.right, out);
            }
            Expr::Unary(u) => value_local(&u.value, out),
            Expr::IndirectRead { address } => value_local(address, out),
            _ => {}
        }
    }
    for stmt in stmts {
        match stmt {
            Stmt::Eval { dest, expr } => {
                value_local(dest, out);
                expr_locals(expr, out);
            }
            Stmt::Store { value, .. } => value_local(value, out),
            Stmt::IndirectWrite { address, value } => {
                value_local(address, out);
                value_local(value, out);
            }
            Stmt::If { value, when_true, when_false, .. } => {
                value_local(value, out);
                all_locals(when_true, out);
                if let Some(wf) = when_false {
                    all_locals(wf, out);
                }
            }
            Stmt::While { test, value, body, .. } => {
                all_locals(test, out);
                value_local(value, out);
                all_locals(body, out);
            }
            Stmt::Return { expr } | Stmt::Push { expr } => expr_locals(expr, out),
            Stmt::Discard { .. } => {}
        }
    }
}

/// Rewrite every `Value::Local`/`Expr::Local` naming a colored name into the
/// corresponding `Reg`. Names absent from `colors` are left untouched --
/// by the time this runs, every remaining `Local` has either been promoted
/// away by [`promote_locals`] or colored here, so none should remain.
fn assign_registers(stmts: &[Stmt], colors: &crate::common::Map<Id, u8>) -> Vec<Stmt> {
    fn rv(v: &Value, colors: &crate::common::Map<Id, u8>) -> Value {
        match v {
            Value::Local(n) => match colors.get(n) {
                Some(c) => Value::Reg { index: *c, name: *n },
                None => v.clone(),
            },
            other => other.clone(),
        }
    }
    fn re(e: &Expr, colors: &crate::common::Map<Id, u8>) -> Expr {
        match e {
            Expr::Local(n) => match colors.get(n) {
                Some(c) => Expr::Reg { index: *c, name: *n },
                None => e.clone(),
            },
            Expr::Binary(b) => Expr::Binary(crate::middle::ir::Binary {
                left: rv(&b.left, colors),
                op: b.op,
                right: rv(&b.right, colors),
            }),
            Expr::Unary(u) => Expr::Unary(crate::middle::ir::Unary { op: u.op, value: rv(&u.value, colors) }),
            Expr::IndirectRead { address } => Expr::IndirectRead { address: rv(address, colors) },
            other => other.clone(),
        }
    }

    stmts
        .iter()
        .map(|stmt| match stmt {
            Stmt::Eval { dest, expr } => Stmt::Eval { dest: rv(dest, colors), expr: re(expr, colors) },
            Stmt::Store { location, value } => Stmt::Store { location: *location, value: rv(value, colors) },
            Stmt::IndirectWrite { address, value } => {
                Stmt::IndirectWrite { address: rv(address, colors), value: rv(value, colors) }
            }
            Stmt::If { value, cmp, when_true, when_false } => Stmt::If {
                value: rv(value, colors),
                cmp: *cmp,
                when_true: assign_registers(when_true, colors),
                when_false: when_false.as_deref().map(|b| assign_registers(b, colors)),
            },
            Stmt::While { test, value, cmp, body } => Stmt::While {
                test: assign_registers(test, colors),
                value: rv(value, colors),
                cmp: *cmp,
                body: assign_registers(body, colors),
            },
            Stmt::Return { expr } => Stmt::Return { expr: re(expr, colors) },
            Stmt::Push { expr } => Stmt::Push { expr: re(expr, colors) },
            Stmt::Discard { call } => Stmt::Discard { call: call.clone() },
        })
        .collect()
}

fn assert_no_locals_remain(stmts: &[Stmt]) {
    let mut remaining = Set::new();
    all_locals(stmts, &mut remaining);
    assert!(
        remaining.is_empty(),
        "internal compiler error: unallocated locals after register assignment: {remaining:?}"
    );
}

/// §4.6: lower one subroutine's body from `Local`-only IR to a mix of `Reg`
/// and fixed `local` segment `Location`s, retrying with a wider promoted set
/// each time the colorer can't fit everything into [`NUM_REGISTERS`].
pub fn lock_down_locals(sub: &Subroutine, declared_locals: i32) -> Subroutine {
    let mut body = sub.body.clone();
    let mut base_index = declared_locals;
    let mut already_promoted: Set<Id> = Set::new();
    let mut round = 0u32;

    loop {
        round += 1;
        let mut live_names = Set::new();
        all_locals(&body, &mut live_names);
        let candidates: Set<Id> = live_names.difference(&already_promoted).copied().collect();

        let live = analyze_liveness(&body, &Set::new());
        let must_save: Set<Id> = need_saving(&live).difference(&already_promoted).copied().collect();

        if !must_save.is_empty() {
            tracing::debug!(subroutine = %sub.name, round, count = must_save.len(), "promoting locals live across a call");
            let (new_body, new_base) = promote_locals(&body, &must_save, base_index);
            body = new_body;
            base_index = new_base;
            already_promoted.extend(must_save);
            continue;
        }

        let (colors, uncolored) = color_locals(&live, &candidates, NUM_REGISTERS);

        if uncolored.is_empty() {
            let body = assign_registers(&body, &colors);
            assert_no_locals_remain(&body);
            return Subroutine {
                name: sub.name,
                num_local_slots: base_index,
                body,
            };
        }

        tracing::warn!(
            subroutine = %sub.name,
            round,
            count = uncolored.len(),
            "register pressure exceeded, promoting to extend the local segment"
        );
        let (new_body, new_base) = promote_locals(&body, &uncolored, base_index);
        body = new_body;
        base_index = new_base;
        already_promoted.extend(uncolored);
    }
}

/// Run allocation over every subroutine of a class. Declared Jack locals
/// are just another `Value::Local` candidate to the flattener, so every
/// subroutine starts allocation from an empty `local` segment (index 0) --
/// promotion is what grows it, not the source-level declaration count.
pub fn allocate(class: &Class) -> Class {
    let subroutines = class.subroutines.iter().map(|sub| lock_down_locals(sub, 0)).collect();
    Class { name: class.name, subroutines }
}

#[allow(dead_code)]
fn location_segment_name(loc: &Location) -> &'static str {
    match loc.kind {
        crate::middle::ir::LocKind::Static => "static",
        crate::middle::ir::LocKind::Argument => "argument",
        crate::middle::ir::LocKind::Local => "local",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;
    use crate::front::ast::Op;
    use crate::middle::ir::{Binary, CallSub};

    #[test]
    fn a_simple_subroutine_colors_every_local_into_a_register() {
        let sub = Subroutine {
            name: id("run"),
            num_local_slots: 0,
            body: vec![
                Stmt::Eval { dest: Value::Local(id("a")), expr: Expr::Const(1) },
                Stmt::Eval { dest: Value::Local(id("b")), expr: Expr::Const(2) },
                Stmt::Return {
                    expr: Expr::Binary(Binary { left: Value::Local(id("a")), op: Op::Plus, right: Value::Local(id("b")) }),
                },
            ],
        };
        let result = lock_down_locals(&sub, 0);
        assert_eq!(result.num_local_slots, 0);
        for stmt in &result.body {
            if let Stmt::Eval { dest, .. } = stmt {
                assert!(matches!(dest, Value::Reg { .. }));
            }
        }
    }

    #[test]
    fn a_local_live_across_a_call_is_promoted_to_the_local_segment() {
        let sub = Subroutine {
            name: id("run"),
            num_local_slots: 0,
            body: vec![
                Stmt::Eval { dest: Value::Local(id("x")), expr: Expr::Const(5) },
                Stmt::Discard {
                    call: CallSub { class_name: id("Output"), sub_name: id("println"), nargs: 0 },
                },
                Stmt::Return { expr: Expr::Local(id("x")) },
            ],
        };
        let result = lock_down_locals(&sub, 2);
        assert_eq!(result.num_local_slots, 3);
        let has_store = result.body.iter().any(|s| matches!(s, Stmt::Store { .. }));
        assert!(has_store, "expected x's write to become a Store: {:#?}", result.body);
    }

    #[test]
    fn heavy_register_pressure_spills_the_overflow_to_the_local_segment() {
        let names: Vec<Id> = (0..10).map(|i| id(&format!("v{i}"))).collect();
        let mut body = Vec::new();
        for n in &names {
            body.push(Stmt::Eval { dest: Value::Local(*n), expr: Expr::Const(1) });
        }
        // Ten values pushed back to back as call arguments: reading backward
        // from the call, every one of them is simultaneously live right up
        // to the first push -- more than fits in `NUM_REGISTERS` at once.
        for n in &names {
            body.push(Stmt::Push { expr: Expr::Local(*n) });
        }
        body.push(Stmt::Discard {
            call: CallSub { class_name: id("Sys"), sub_name: id("wait"), nargs: names.len() as u16 },
        });

        let sub = Subroutine { name: id("run"), num_local_slots: 0, body };
        let result = lock_down_locals(&sub, 0);
        assert!(result.num_local_slots > 0, "expected some overflow to spill to the local segment");
    }
}
