//! The Liveness Analyzer (§4.2): computes, for each statement, the set of
//! local names live immediately before it, processed in reverse.

use crate::common::{Id, Set};
use crate::middle::ir::{Expr, Stmt, Value};

/// The liveness-annotated children of an `If`/`While`, kept alongside the
/// flattened `statement` field so a consumer that needs to see inside a
/// branch or loop body (interference, must-save selection) doesn't have to
/// re-run liveness itself to get it.
#[derive(Debug, Clone)]
pub enum Nested {
    None,
    If { when_true: Vec<LiveStmt>, when_false: Option<Vec<LiveStmt>> },
    While { test: Vec<LiveStmt>, body: Vec<LiveStmt> },
}

/// A statement annotated with its live-in (`before`), live-during (`during`,
/// which excludes names the statement itself writes), and live-out
/// (`after`) sets. `nested` carries the same annotation for an `If`/`While`'s
/// own children -- `statement` alone only has the branch's boundary sets.
#[derive(Debug, Clone)]
pub struct LiveStmt {
    pub statement: Stmt,
    pub before: Set<Id>,
    pub during: Set<Id>,
    pub after: Set<Id>,
    pub nested: Nested,
}

/// The `Local` names referenced (read) by an expression.
pub fn refs(expr: &Expr) -> Set<Id> {
    match expr {
        Expr::Local(n) => Set::from([*n]),
        Expr::Binary(b) => {
            let mut s = value_refs(&b.left);
            s.extend(value_refs(&b.right));
            s
        }
        Expr::Unary(u) => value_refs(&u.value),
        Expr::IndirectRead { address } => value_refs(address),
        _ => Set::new(),
    }
}

fn value_refs(value: &Value) -> Set<Id> {
    match value.local_name() {
        Some(n) => Set::from([n]),
        None => Set::new(),
    }
}

/// Analyze a statement sequence against a given live-out set, returning the
/// same statements annotated with before/during/after liveness.
pub fn analyze_liveness(stmts: &[Stmt], live_at_end: &Set<Id>) -> Vec<LiveStmt> {
    let mut result = Vec::with_capacity(stmts.len());
    let mut live_set = live_at_end.clone();

    for stmt in stmts.iter().rev() {
        let after = live_set.clone();

        // `If`/`While` recurse into their own bodies and compute the live-in
        // set directly, rather than going through a flat written/read set,
        // since what they "write" depends on which nested statements run.
        match stmt {
            Stmt::If { value, cmp, when_true, when_false } => {
                let (annotated_stmt, before, nested) =
                    analyze_if(value.clone(), *cmp, when_true, when_false.as_deref(), &after);
                live_set = before.clone();
                result.insert(0, LiveStmt { statement: annotated_stmt, before, during: after.clone(), after, nested });
                continue;
            }
            Stmt::While { test, value, cmp, body } => {
                // The body's true live-out set is "jump back to the test",
                // i.e. whatever is live at the top of the loop -- which is
                // exactly what this pass computes. So seed with the exit
                // liveness, then re-run feeding the body its real live-out
                // (the first pass's answer). A second re-run must reproduce
                // the same set, or the loop's liveness never stabilized.
                let (_, live_at_top1, _) = analyze_while(test, value.clone(), *cmp, body, &after);
                let (annotated_stmt, live_at_top2, nested) =
                    analyze_while(test, value.clone(), *cmp, body, &live_at_top1);
                assert_eq!(live_at_top2, live_at_top1, "liveness fixed point not reached");
                live_set = live_at_top2.clone();
                result.insert(
                    0,
                    LiveStmt { statement: annotated_stmt, before: live_at_top2, during: after.clone(), after, nested },
                );
                continue;
            }
            _ => {}
        }

        let mut written = Set::new();
        let mut read = Set::new();

        match stmt {
            Stmt::Eval { dest, expr } => {
                read.extend(refs(expr));
                if let Some(n) = dest.local_name() {
                    written.insert(n);
                }
            }
            Stmt::IndirectWrite { address, value } => {
                read.extend(value_refs(address));
                read.extend(value_refs(value));
            }
            Stmt::Store { value, .. } => {
                read.extend(value_refs(value));
            }
            Stmt::Return { expr } => {
                read.extend(refs(expr));
            }
            Stmt::Push { expr } => {
                read.extend(refs(expr));
            }
            Stmt::Discard { .. } => {}
            Stmt::If { .. } | Stmt::While { .. } => unreachable!(),
        }

        for w in &written {
            live_set.remove(w);
        }
        let during = live_set.clone();
        live_set.extend(read);
        let before = live_set.clone();

        result.insert(
            0,
            LiveStmt { statement: stmt.clone(), before, during, after, nested: Nested::None },
        );
    }

    result
}

fn analyze_if(
    value: Value,
    cmp: crate::middle::ir::Cmp,
    when_true: &[Stmt],
    when_false: Option<&[Stmt]>,
    live_at_end: &Set<Id>,
) -> (Stmt, Set<Id>, Nested) {
    let when_true_live = analyze_liveness(when_true, live_at_end);
    let live_at_true_start = when_true_live.first().map(|l| l.before.clone()).unwrap_or_else(|| live_at_end.clone());

    let (when_false_live, live_at_false_start) = match when_false {
        Some(wf) => {
            let live = analyze_liveness(wf, live_at_end);
            let start = live.first().map(|l| l.before.clone()).unwrap_or_else(|| live_at_end.clone());
            (Some(live), start)
        }
        None => (None, live_at_end.clone()),
    };

    let mut live_at_body_start = live_at_true_start;
    live_at_body_start.extend(live_at_false_start);

    let stmt = Stmt::If {
        value: value.clone(),
        cmp,
        when_true: when_true_live.iter().map(|l| l.statement.clone()).collect(),
        when_false: when_false_live.as_ref().map(|wf| wf.iter().map(|l| l.statement.clone()).collect()),
    };

    let mut live = live_at_body_start;
    live.extend(value_refs(&value));

    let nested = Nested::If { when_true: when_true_live, when_false: when_false_live };

    (stmt, live, nested)
}

fn analyze_while(
    test: &[Stmt],
    value: Value,
    cmp: crate::middle::ir::Cmp,
    body: &[Stmt],
    live_at_end: &Set<Id>,
) -> (Stmt, Set<Id>, Nested) {
    let body_live = analyze_liveness(body, live_at_end);
    let live_at_body_start = body_live.first().map(|l| l.before.clone()).unwrap_or_else(|| live_at_end.clone());

    let mut live_at_test_end = live_at_body_start;
    live_at_test_end.extend(value_refs(&value));

    let test_live = analyze_liveness(test, &live_at_test_end);
    let live_at_test_start = test_live.first().map(|l| l.before.clone()).unwrap_or_else(|| live_at_test_end.clone());

    let stmt = Stmt::While {
        test: test_live.iter().map(|l| l.statement.clone()).collect(),
        value,
        cmp,
        body: body_live.iter().map(|l| l.statement.clone()).collect(),
    };

    let nested = Nested::While { test: test_live, body: body_live };

    (stmt, live_at_test_start, nested)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;
    use crate::middle::ir::*;

    #[test]
    fn eval_reads_rhs_and_writes_dest() {
        let stmts = vec![Stmt::Eval {
            dest: Value::Local(id("a")),
            expr: Expr::Local(id("b")),
        }];
        let live = analyze_liveness(&stmts, &Set::new());
        assert_eq!(live[0].before, Set::from([id("b")]));
        assert_eq!(live[0].after, Set::new());
    }

    #[test]
    fn discard_call_does_not_read_locals() {
        let stmts = vec![Stmt::Discard {
            call: CallSub { class_name: id("Output"), sub_name: id("println"), nargs: 0 },
        }];
        let live = analyze_liveness(&stmts, &Set::from([id("x")]));
        assert_eq!(live[0].before, Set::from([id("x")]));
    }

    #[test]
    fn while_reaches_a_liveness_fixed_point() {
        // while (i < n) { i = i + 1; }
        let stmts = vec![Stmt::While {
            test: vec![Stmt::Eval {
                dest: Value::Local(id("$t")),
                expr: Expr::Binary(Binary { left: Value::Local(id("i")), op: crate::front::ast::Op::Minus, right: Value::Local(id("n")) }),
            }],
            value: Value::Local(id("$t")),
            cmp: Cmp::Lt,
            body: vec![Stmt::Eval {
                dest: Value::Local(id("i")),
                expr: Expr::Binary(Binary { left: Value::Local(id("i")), op: crate::front::ast::Op::Plus, right: Value::Const(1) }),
            }],
        }];
        let live = analyze_liveness(&stmts, &Set::new());
        // `i` and `n` must both be live at the top of the loop, every time around.
        assert!(live[0].before.contains(&id("i")));
        assert!(live[0].before.contains(&id("n")));
    }

    #[test]
    fn nested_liveness_is_kept_for_if_branches() {
        // if (x) { a = 1; return a; }
        let stmts = vec![Stmt::If {
            value: Value::Local(id("x")),
            cmp: Cmp::Ne,
            when_true: vec![
                Stmt::Eval { dest: Value::Local(id("a")), expr: Expr::Const(1) },
                Stmt::Return { expr: Expr::Local(id("a")) },
            ],
            when_false: None,
        }];
        let live = analyze_liveness(&stmts, &Set::new());
        match &live[0].nested {
            Nested::If { when_true, when_false } => {
                assert_eq!(when_true.len(), 2);
                assert!(when_true[0].after.contains(&id("a")));
                assert!(when_false.is_none());
            }
            Nested::While { .. } | Nested::None => panic!("expected Nested::If"),
        }
    }

    #[test]
    fn nested_liveness_is_kept_for_while_bodies() {
        let stmts = vec![Stmt::While {
            test: vec![Stmt::Eval {
                dest: Value::Local(id("$t")),
                expr: Expr::Binary(Binary { left: Value::Local(id("i")), op: crate::front::ast::Op::Minus, right: Value::Local(id("n")) }),
            }],
            value: Value::Local(id("$t")),
            cmp: Cmp::Lt,
            body: vec![Stmt::Eval {
                dest: Value::Local(id("i")),
                expr: Expr::Binary(Binary { left: Value::Local(id("i")), op: crate::front::ast::Op::Plus, right: Value::Const(1) }),
            }],
        }];
        let live = analyze_liveness(&stmts, &Set::new());
        match &live[0].nested {
            Nested::While { test, body } => {
                assert_eq!(test.len(), 1);
                assert_eq!(body.len(), 1);
            }
            Nested::If { .. } | Nested::None => panic!("expected Nested::While"),
        }
    }
}
