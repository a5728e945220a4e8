//! §4.4: the Promoter. Locals identified by [`crate::middle::spill`] as
//! needing to be saved are rewritten out of register-candidate space
//! entirely: each write becomes a `Store` to a fixed `local` segment slot,
//! and each read is reloaded into a short-lived fresh temporary right before
//! it's used, which the allocator is then free to assign a register to since
//! the reload temp never itself crosses a call.

use crate::common::{id, Id, Map, Set};
use crate::middle::ir::{Binary, Expr, LocKind, Location, Stmt, Unary, Value};

/// Assign each promoted name the next `local` slot past `base_index`
/// (the subroutine's already-declared Jack locals), rewrite the body, and
/// return the new body along with the total slot count now in use.
pub fn promote_locals(body: &[Stmt], to_promote: &Set<Id>, base_index: i32) -> (Vec<Stmt>, i32) {
    let mut slots = Map::new();
    let mut next = base_index;
    for name in to_promote {
        slots.insert(*name, next);
        next += 1;
    }

    let mut counter = 0u32;
    let new_body = promote_stmts(body, &slots, &mut counter);
    (new_body, next)
}

fn fresh(counter: &mut u32) -> Id {
    let n = id(&format!("$spill{counter}"));
    *counter += 1;
    n
}

fn location_of(name: Id, slots: &Map<Id, i32>) -> Location {
    Location {
        kind: LocKind::Local,
        index: *slots.get(&name).expect("promoted name has no assigned slot"),
        name,
    }
}

/// Rewrite a single operand: if it names a promoted local, append a reload
/// `Eval` to `pre` and return the fresh temporary that now holds the value.
fn rewrite_value(value: &Value, slots: &Map<Id, i32>, pre: &mut Vec<Stmt>, counter: &mut u32) -> Value {
    match value {
        Value::Local(n) if slots.contains_key(n) => {
            let loc = location_of(*n, slots);
            let tmp = fresh(counter);
            pre.push(Stmt::Eval {
                dest: Value::Local(tmp),
                expr: Expr::Location(loc),
            });
            Value::Local(tmp)
        }
        other => other.clone(),
    }
}

fn rewrite_expr(expr: &Expr, slots: &Map<Id, i32>, pre: &mut Vec<Stmt>, counter: &mut u32) -> Expr {
    match expr {
        Expr::Local(n) if slots.contains_key(n) => Expr::Location(location_of(*n, slots)),
        Expr::Binary(b) => Expr::Binary(Binary {
            left: rewrite_value(&b.left, slots, pre, counter),
            op: b.op,
            right: rewrite_value(&b.right, slots, pre, counter),
        }),
        Expr::Unary(u) => Expr::Unary(Unary {
            op: u.op,
            value: rewrite_value(&u.value, slots, pre, counter),
        }),
        Expr::IndirectRead { address } => Expr::IndirectRead {
            address: rewrite_value(address, slots, pre, counter),
        },
        other => other.clone(),
    }
}

fn promote_stmts(stmts: &[Stmt], slots: &Map<Id, i32>, counter: &mut u32) -> Vec<Stmt> {
    let mut out = Vec::with_capacity(stmts.len());
    for stmt in stmts {
        promote_stmt(stmt, slots, counter, &mut out);
    }
    out
}

fn promote_stmt(stmt: &Stmt, slots: &Map<Id, i32>, counter: &mut u32, out: &mut Vec<Stmt>) {
    match stmt {
        Stmt::Eval { dest, expr } => {
            let mut pre = Vec::new();
            let expr2 = rewrite_expr(expr, slots, &mut pre, counter);
            out.append(&mut pre);

            match dest {
                Value::Local(n) if slots.contains_key(n) => {
                    let loc = location_of(*n, slots);
                    match expr2.as_value() {
                        Some(v) => out.push(Stmt::Store { location: loc, value: v }),
                        None => {
                            let tmp = fresh(counter);
                            out.push(Stmt::Eval { dest: Value::Local(tmp), expr: expr2 });
                            out.push(Stmt::Store { location: loc, value: Value::Local(tmp) });
                        }
                    }
                }
                _ => out.push(Stmt::Eval { dest: dest.clone(), expr: expr2 }),
            }
        }
        Stmt::Store { location, value } => {
            let mut pre = Vec::new();
            let value2 = rewrite_value(value, slots, &mut pre, counter);
            out.append(&mut pre);
            out.push(Stmt::Store { location: *location, value: value2 });
        }
        Stmt::IndirectWrite { address, value } => {
            let mut pre = Vec::new();
            let address2 = rewrite_value(address, slots, &mut pre, counter);
            let value2 = rewrite_value(value, slots, &mut pre, counter);
            out.append(&mut pre);
            out.push(Stmt::IndirectWrite { address: address2, value: value2 });
        }
        Stmt::If { value, cmp, when_true, when_false } => {
            let mut pre = Vec::new();
            let value2 = rewrite_value(value, slots, &mut pre, counter);
            out.append(&mut pre);
            out.push(Stmt::If {
                value: value2,
                cmp: *cmp,
                when_true: promote_stmts(when_true, slots, counter),
                when_false: when_false.as_deref().map(|b| promote_stmts(b, slots, counter)),
            });
        }
        Stmt::While { test, value, cmp, body } => {
            let mut test2 = promote_stmts(test, slots, counter);
            let mut value_pre = Vec::new();
            let value2 = rewrite_value(value, slots, &mut value_pre, counter);
            test2.extend(value_pre);
            out.push(Stmt::While {
                test: test2,
                value: value2,
                cmp: *cmp,
                body: promote_stmts(body, slots, counter),
            });
        }
        Stmt::Return { expr } => {
            let mut pre = Vec::new();
            let expr2 = rewrite_expr(expr, slots, &mut pre, counter);
            out.append(&mut pre);
            out.push(Stmt::Return { expr: expr2 });
        }
        Stmt::Push { expr } => {
            let mut pre = Vec::new();
            let expr2 = rewrite_expr(expr, slots, &mut pre, counter);
            out.append(&mut pre);
            out.push(Stmt::Push { expr: expr2 });
        }
        Stmt::Discard { call } => out.push(Stmt::Discard { call: call.clone() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::ast::Op;
    use crate::middle::ir::CallSub;

    #[test]
    fn a_write_to_a_promoted_local_becomes_a_store() {
        let body = vec![Stmt::Eval {
            dest: Value::Local(id("x")),
            expr: Expr::Const(5),
        }];
        let (new_body, total) = promote_locals(&body, &Set::from([id("x")]), 0);
        assert_eq!(total, 1);
        assert_eq!(
            new_body,
            vec![Stmt::Store {
                location: Location { kind: LocKind::Local, index: 0, name: id("x") },
                value: Value::Const(5),
            }]
        );
    }

    #[test]
    fn a_read_of_a_promoted_local_is_reloaded_just_before_use() {
        let body = vec![
            Stmt::Discard {
                call: CallSub { class_name: id("Output"), sub_name: id("println"), nargs: 0 },
            },
            Stmt::Eval {
                dest: Value::Local(id("y")),
                expr: Expr::Binary(Binary { left: Value::Local(id("x")), op: Op::Plus, right: Value::Const(1) }),
            },
        ];
        let (new_body, _) = promote_locals(&body, &Set::from([id("x")]), 0);
        // statement 1: the Discard is untouched; statement 2 is preceded by a reload Eval.
        assert!(matches!(new_body[0], Stmt::Discard { .. }));
        assert!(matches!(
            &new_body[1],
            Stmt::Eval { expr: Expr::Location(loc), .. } if loc.name == id("x")
        ));
        assert!(matches!(&new_body[2], Stmt::Eval { expr: Expr::Binary(_), .. }));
    }

    #[test]
    fn promoting_an_empty_set_is_a_no_op() {
        let body = vec![Stmt::Eval {
            dest: Value::Local(id("a")),
            expr: Expr::Const(1),
        }];
        let (new_body, total) = promote_locals(&body, &Set::new(), 3);
        assert_eq!(new_body, body);
        assert_eq!(total, 3);
    }

    #[test]
    fn promoting_an_already_promoted_body_again_changes_nothing() {
        let body = vec![Stmt::Eval {
            dest: Value::Local(id("x")),
            expr: Expr::Const(5),
        }];
        let (once, total1) = promote_locals(&body, &Set::from([id("x")]), 0);
        // No `Value::Local("x")` remains anywhere in `once` for a second
        // round to find, even if asked to promote it again.
        let (twice, total2) = promote_locals(&once, &Set::from([id("x")]), total1);
        assert_eq!(once, twice);
    }
}
