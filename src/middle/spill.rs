//! §4.3: deciding which locals must live on the stack rather than in a
//! register, because they're live across a call.

use crate::common::{Id, Set};
use crate::middle::ir::Stmt;
use crate::middle::liveness::{LiveStmt, Nested};

/// The set of local names that are live across at least one `Discard` (a
/// `do`-statement call whose result is dropped) or a call embedded in an
/// `Eval`/`Return`/`Push` expression, and therefore cannot be kept in a
/// register: nothing survives a `call` in this machine's register file.
pub fn need_saving(stmts: &[LiveStmt]) -> Set<Id> {
    let mut saved = Set::new();
    collect_need_saving(stmts, &mut saved);
    saved
}

/// Recurse into `If`/`While` children using their own real per-statement
/// `during` sets -- a local that crosses a call strictly inside one branch
/// but dies before the branch exits is only visible there, never in the
/// outer `If`/`While` statement's boundary liveness.
fn collect_need_saving(stmts: &[LiveStmt], saved: &mut Set<Id>) {
    for live in stmts {
        let has_call = match &live.statement {
            Stmt::Discard { .. } => true,
            Stmt::Eval { expr, .. } | Stmt::Return { expr } | Stmt::Push { expr } => {
                matches!(expr, crate::middle::ir::Expr::CallSub(_))
            }
            _ => false,
        };
        if has_call {
            saved.extend(live.during.iter().copied());
        }

        match &live.nested {
            Nested::None => {}
            Nested::If { when_true, when_false } => {
                collect_need_saving(when_true, saved);
                if let Some(when_false) = when_false {
                    collect_need_saving(when_false, saved);
                }
            }
            Nested::While { test, body } => {
                collect_need_saving(test, saved);
                collect_need_saving(body, saved);
            }
        }
    }
}
