//! The Flattener (§4.1): rewrites a Jack class AST into the flat IR,
//! introducing a fresh [`Local`](crate::middle::ir::Value::Local) for every
//! sub-expression that isn't already trivial.

use crate::common::{id, Id};
use crate::front::ast::{self, Keyword, Op, Receiver, Statement, SubroutineCall, SubroutineDec, SubroutineKind};
use crate::front::symbols::{ClassSymbols, SubroutineSymbols, SymbolTable, VarKind};
use crate::middle::ir::*;

/// Where a subroutine's `this` pointer comes from, and whether it has
/// already been materialized into a plain local.
enum ThisSource {
    /// `function`s never reference `this`.
    None,
    /// `method`s: `this` is `argument[0]`.
    MethodArg0,
    /// `constructor`s: `this` was bound to a local by the preamble's
    /// `Memory.alloc` call.
    Local(Id),
}

struct Ctx<'a> {
    symbols: &'a SubroutineSymbols,
    this: ThisSource,
    counter: u32,
}

impl<'a> Ctx<'a> {
    fn next_var(&mut self, hint: Option<&str>) -> Id {
        let name = format!("${}{}", hint.unwrap_or(""), self.counter);
        self.counter += 1;
        id(&name)
    }

    /// Produce a `Value` holding `this`, materializing it via a fresh local
    /// the first time a method needs to read `argument[0]` and reusing that
    /// local for every later reference in the same subroutine.
    fn this_value(&mut self) -> (Vec<Stmt>, Value) {
        match &self.this {
            ThisSource::Local(name) => (vec![], Value::Local(*name)),
            ThisSource::MethodArg0 => {
                let var = self.next_var(Some("this"));
                let stmt = Stmt::Eval {
                    dest: Value::Local(var),
                    expr: Expr::Location(Location {
                        kind: LocKind::Argument,
                        index: 0,
                        name: id("this"),
                    }),
                };
                self.this = ThisSource::Local(var);
                (vec![stmt], Value::Local(var))
            }
            ThisSource::None => panic!("internal compiler error: `this` referenced outside a method or constructor"),
        }
    }

    /// Address of field `index` relative to `this`; omits the addition when
    /// `index == 0` (§4.1).
    fn field_address(&mut self, index: i32, field_name: Id) -> (Vec<Stmt>, Value) {
        let (mut stmts, this_var) = self.this_value();
        if index == 0 {
            (stmts, this_var)
        } else {
            let addr_var = self.next_var(Some(&field_name.to_string()));
            stmts.push(Stmt::Eval {
                dest: Value::Local(addr_var),
                expr: Expr::Binary(Binary {
                    left: this_var,
                    op: Op::Plus,
                    right: Value::Const(index as i16),
                }),
            });
            (stmts, Value::Local(addr_var))
        }
    }
}

/// What a variable reference resolves to.
enum Resolved {
    Local(Id),
    Location(Location),
    Field { index: i32, name: Id },
}

fn resolve_name(ctx: &Ctx, name: Id) -> Resolved {
    match ctx
        .symbols
        .kind_of(name)
        .unwrap_or_else(|| panic!("internal compiler error: unresolved identifier `{name}`"))
    {
        VarKind::Local => Resolved::Local(name),
        VarKind::Field => Resolved::Field {
            index: ctx.symbols.index_of(name),
            name,
        },
        VarKind::Static => Resolved::Location(Location {
            kind: LocKind::Static,
            index: ctx.symbols.index_of(name),
            name,
        }),
        VarKind::Argument => Resolved::Location(Location {
            kind: LocKind::Argument,
            index: ctx.symbols.index_of(name),
            name,
        }),
    }
}

pub fn flatten_class(class: &ast::Class) -> Class {
    let symbols = ClassSymbols::build(class);
    let subroutines = class
        .subroutines
        .iter()
        .map(|s| flatten_subroutine(s, &symbols.for_subroutine(s)))
        .collect();
    Class {
        name: class.name,
        subroutines,
    }
}

pub fn flatten_subroutine(ast: &SubroutineDec, symbols: &SubroutineSymbols) -> Subroutine {
    let mut ctx = Ctx {
        symbols,
        this: match ast.kind {
            SubroutineKind::Function => ThisSource::None,
            SubroutineKind::Method => ThisSource::MethodArg0,
            SubroutineKind::Constructor => ThisSource::None, // filled in below, once we have the local's name
        },
        counter: 0,
    };

    let mut preamble = Vec::new();
    if ast.kind == SubroutineKind::Constructor {
        let this_var = ctx.next_var(Some("this"));
        ctx.this = ThisSource::Local(this_var);
        let field_count = symbols.count(VarKind::Field);
        preamble.push(Stmt::Push {
            expr: Expr::Const(field_count as i16),
        });
        preamble.push(Stmt::Eval {
            dest: Value::Local(this_var),
            expr: Expr::CallSub(CallSub {
                class_name: id("Memory"),
                sub_name: id("alloc"),
                nargs: 1,
            }),
        });
    }

    let mut body = preamble;
    for stmt in &ast.body {
        body.extend(flatten_statement(&mut ctx, stmt));
    }

    Subroutine {
        name: ast.name,
        // Meaningless until allocation runs; filled in by `regalloc`.
        num_local_slots: 0,
        body,
    }
}

fn flatten_statement(ctx: &mut Ctx, stmt: &Statement) -> Vec<Stmt> {
    match stmt {
        Statement::Let {
            name,
            index: None,
            value,
        } => match resolve_name(ctx, *name) {
            Resolved::Local(local) => {
                let (mut stmts, expr) = flatten_expression(ctx, value, false);
                stmts.push(Stmt::Eval {
                    dest: Value::Local(local),
                    expr,
                });
                stmts
            }
            Resolved::Field { index, name } => {
                let (mut stmts, addr) = ctx.field_address(index, name);
                let (value_stmts, value) = flatten_expression_forced(ctx, value);
                stmts.extend(value_stmts);
                stmts.push(Stmt::IndirectWrite { address: addr, value });
                stmts
            }
            Resolved::Location(loc) => {
                let (mut stmts, value) = flatten_expression_forced(ctx, value);
                stmts.push(Stmt::Store { location: loc, value });
                stmts
            }
        },
        Statement::Let {
            name,
            index: Some(index_expr),
            value,
        } => {
            let (mut stmts, addr) = array_address(ctx, *name, index_expr);
            let (value_stmts, value) = flatten_expression_forced(ctx, value);
            stmts.extend(value_stmts);
            stmts.push(Stmt::IndirectWrite { address: addr, value });
            stmts
        }
        Statement::If {
            cond,
            when_true,
            when_false,
        } => {
            let (mut stmts, value, cmp) = flatten_condition(ctx, cond);
            let when_true = when_true.iter().flat_map(|s| flatten_statement(ctx, s)).collect();
            let when_false = when_false
                .as_ref()
                .map(|ss| ss.iter().flat_map(|s| flatten_statement(ctx, s)).collect());
            stmts.push(Stmt::If {
                value,
                cmp,
                when_true,
                when_false,
            });
            stmts
        }
        Statement::While { cond, body } => {
            let (test, value, cmp) = flatten_condition(ctx, cond);
            let body = body.iter().flat_map(|s| flatten_statement(ctx, s)).collect();
            vec![Stmt::While { test, value, cmp, body }]
        }
        Statement::Do(call) => {
            let (mut stmts, expr) = flatten_call(ctx, call);
            let call = match expr {
                Expr::CallSub(c) => c,
                other => panic!("internal compiler error: `do` of a non-call expression: {other:?}"),
            };
            stmts.push(Stmt::Discard { call });
            stmts
        }
        Statement::Return(Some(e)) => {
            let (mut stmts, expr) = flatten_expression(ctx, e, false);
            stmts.push(Stmt::Return { expr });
            stmts
        }
        Statement::Return(None) => vec![Stmt::Return { expr: Expr::Const(0) }],
    }
}

/// §4.1 condition lowering: reduce an if/while condition to a value
/// compared against zero with one of the six comparators.
fn flatten_condition(ctx: &mut Ctx, expr: &ast::Expression) -> (Vec<Stmt>, Value, Cmp) {
    use ast::Expression::*;
    use ast::UnaryOp;

    if let Unary { op: UnaryOp::Not, expr: inner } = expr {
        if let Binary { left, op, right } = inner.as_ref() {
            let collapsed = match op {
                Op::Lt => Some(Cmp::Ge),
                Op::Gt => Some(Cmp::Le),
                Op::Eq => Some(Cmp::Ne),
                _ => None,
            };
            if let Some(cmp) = collapsed {
                return flatten_comparison(ctx, left, cmp, right);
            }
        }
    }

    if let Binary { left, op, right } = expr {
        let cmp = match op {
            Op::Lt => Some(Cmp::Lt),
            Op::Gt => Some(Cmp::Gt),
            Op::Eq => Some(Cmp::Eq),
            _ => None,
        };
        if let Some(cmp) = cmp {
            return flatten_comparison(ctx, left, cmp, right);
        }
    }

    let (stmts, value) = flatten_expression_forced(ctx, expr);
    (stmts, value, Cmp::Ne)
}

fn is_zero(expr: &ast::Expression) -> bool {
    matches!(expr, ast::Expression::IntegerConstant(0))
}

fn flatten_comparison(
    ctx: &mut Ctx,
    left: &ast::Expression,
    cmp: Cmp,
    right: &ast::Expression,
) -> (Vec<Stmt>, Value, Cmp) {
    if is_zero(right) {
        let (stmts, value) = flatten_expression_forced(ctx, left);
        (stmts, value, cmp)
    } else if is_zero(left) {
        // `0 <cmp> x`: invert the comparator and emit x (§4.1).
        let (stmts, value) = flatten_expression_forced(ctx, right);
        (stmts, value, cmp.negate())
    } else {
        let (mut stmts, left_value) = flatten_expression_forced(ctx, left);
        let (right_stmts, right_value) = flatten_expression_forced(ctx, right);
        stmts.extend(right_stmts);
        let diff = ctx.next_var(None);
        stmts.push(Stmt::Eval {
            dest: Value::Local(diff),
            expr: Expr::Binary(Binary {
                left: left_value,
                op: Op::Minus,
                right: right_value,
            }),
        });
        (stmts, Value::Local(diff), cmp)
    }
}

fn array_address(ctx: &mut Ctx, name: Id, index: &ast::Expression) -> (Vec<Stmt>, Value) {
    if is_zero(index) {
        flatten_expression_forced(ctx, &ast::Expression::VarRef(name))
    } else {
        let (mut stmts, base) = flatten_expression_forced(ctx, &ast::Expression::VarRef(name));
        let (idx_stmts, idx) = flatten_expression_forced(ctx, index);
        stmts.extend(idx_stmts);
        let addr = ctx.next_var(None);
        stmts.push(Stmt::Eval {
            dest: Value::Local(addr),
            expr: Expr::Binary(Binary { left: base, op: Op::Plus, right: idx }),
        });
        (stmts, Value::Local(addr))
    }
}

/// `flatten_expression` with `force = true`, unwrapped to a [`Value`].
fn flatten_expression_forced(ctx: &mut Ctx, expr: &ast::Expression) -> (Vec<Stmt>, Value) {
    let (stmts, e) = flatten_expression(ctx, expr, true);
    let value = e
        .as_value()
        .unwrap_or_else(|| panic!("internal compiler error: forced expression did not reduce to a value: {e:?}"));
    (stmts, value)
}

/// §4.1: reduce `expr` to something trivial, preceded by the statements
/// that compute it. If `force`, the result is always a [`Value`]; otherwise
/// it may be any [`Expr`] (only valid directly on the RHS of `Eval`/`Push`/
/// `Return`/`Discard`).
fn flatten_expression(ctx: &mut Ctx, expr: &ast::Expression, force: bool) -> (Vec<Stmt>, Expr) {
    use ast::Expression::*;

    let (mut stmts, flat): (Vec<Stmt>, Expr) = match expr {
        IntegerConstant(v) => (vec![], Expr::Const(*v)),
        KeywordConstant(Keyword::True) => (vec![], Expr::Const(-1)),
        KeywordConstant(Keyword::False) => (vec![], Expr::Const(0)),
        KeywordConstant(Keyword::Null) => (vec![], Expr::Const(0)),
        KeywordConstant(Keyword::This) => {
            let (stmts, value) = ctx.this_value();
            (stmts, value.into())
        }
        VarRef(name) => match resolve_name(ctx, *name) {
            Resolved::Local(l) => (vec![], Expr::Local(l)),
            Resolved::Field { index, name } => {
                let (stmts, addr) = ctx.field_address(index, name);
                (stmts, Expr::IndirectRead { address: addr })
            }
            Resolved::Location(loc) => (vec![], Expr::Location(loc)),
        },
        StringConstant(s) => flatten_string_constant(ctx, s),
        ArrayRef { name, index } => {
            let (stmts, addr) = array_address(ctx, *name, index);
            (stmts, Expr::IndirectRead { address: addr })
        }
        Call(call) => flatten_call(ctx, call),
        Binary { left, op: Op::Star, right } => {
            return flatten_math_call(ctx, "multiply", left, right, force);
        }
        Binary { left, op: Op::Slash, right } => {
            return flatten_math_call(ctx, "divide", left, right, force);
        }
        Binary { left, op, right } => {
            let (mut stmts, lv) = flatten_expression_forced(ctx, left);
            let (rstmts, rv) = flatten_expression_forced(ctx, right);
            stmts.extend(rstmts);
            (stmts, Expr::Binary(crate::middle::ir::Binary { left: lv, op: *op, right: rv }))
        }
        Unary { op, expr: inner } => {
            let (stmts, value) = flatten_expression_forced(ctx, inner);
            let unary_op = match op {
                ast::UnaryOp::Neg => UnaryOp::Neg,
                ast::UnaryOp::Not => UnaryOp::Not,
            };
            if let (Value::Const(c), ast::UnaryOp::Neg) = (&value, op) {
                (stmts, Expr::Const(-c))
            } else {
                (stmts, Expr::Unary(crate::middle::ir::Unary { op: unary_op, value }))
            }
        }
    };

    if force {
        if let Some(v) = flat.as_value() {
            return (stmts, v.into());
        }
        let var = ctx.next_var(None);
        stmts.push(Stmt::Eval { dest: Value::Local(var), expr: flat });
        (stmts, Expr::Local(var))
    } else {
        (stmts, flat)
    }
}

fn flatten_math_call(
    ctx: &mut Ctx,
    sub_name: &str,
    left: &ast::Expression,
    right: &ast::Expression,
    force: bool,
) -> (Vec<Stmt>, Expr) {
    let call = SubroutineCall {
        receiver: Some(Receiver::Class(id("Math"))),
        sub_name: id(sub_name),
        args: vec![left.clone(), right.clone()],
    };
    flatten_expression(ctx, &ast::Expression::Call(call), force)
}

/// String literals compile to a chain of `String.new`/`String.appendChar`
/// calls, each feeding the next call's implicit receiver (§4.1).
fn flatten_string_constant(ctx: &mut Ctx, s: &str) -> (Vec<Stmt>, Expr) {
    let mut stmts = vec![
        Stmt::Push { expr: Expr::Const(s.chars().count() as i16) },
        Stmt::Push {
            expr: Expr::CallSub(CallSub {
                class_name: id("String"),
                sub_name: id("new"),
                nargs: 1,
            }),
        },
    ];
    for c in s.chars() {
        stmts.push(Stmt::Push { expr: Expr::Const(c as i16) });
        stmts.push(Stmt::Push {
            expr: Expr::CallSub(CallSub {
                class_name: id("String"),
                sub_name: id("appendChar"),
                nargs: 2,
            }),
        });
    }
    let last = stmts.pop().unwrap();
    let flat_expr = match last {
        Stmt::Push { expr } => expr,
        _ => unreachable!(),
    };
    (stmts, flat_expr)
}

fn flatten_call(ctx: &mut Ctx, call: &SubroutineCall) -> (Vec<Stmt>, Expr) {
    let arg_pairs: Vec<_> = call
        .args
        .iter()
        .map(|a| flatten_expression(ctx, a, false))
        .collect();
    let arg_stmts: Vec<Stmt> = arg_pairs
        .into_iter()
        .flat_map(|(stmts, expr)| stmts.into_iter().chain(std::iter::once(Stmt::Push { expr })))
        .collect();

    match &call.receiver {
        Some(Receiver::Class(class_name)) => {
            let call = CallSub {
                class_name: *class_name,
                sub_name: call.sub_name,
                nargs: call.args.len() as u16,
            };
            (arg_stmts, Expr::CallSub(call))
        }
        Some(Receiver::Var(var_name)) => {
            let (mut stmts, instance) = flatten_expression_forced(ctx, &ast::Expression::VarRef(*var_name));
            stmts.push(Stmt::Push { expr: instance.into() });
            stmts.extend(arg_stmts);
            let target_class = ctx.symbols.type_of(*var_name);
            let call = CallSub {
                class_name: target_class,
                sub_name: call.sub_name,
                nargs: call.args.len() as u16 + 1,
            };
            (stmts, Expr::CallSub(call))
        }
        None => {
            let (mut stmts, this_value) = ctx.this_value();
            stmts.push(Stmt::Push { expr: this_value.into() });
            stmts.extend(arg_stmts);
            let target_class = ctx.symbols.class_name();
            let call = CallSub {
                class_name: target_class,
                sub_name: call.sub_name,
                nargs: call.args.len() as u16 + 1,
            };
            (stmts, Expr::CallSub(call))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::ast::*;

    fn one_local_sub(body: Vec<Statement>, locals: Vec<&str>) -> (SubroutineDec, ClassSymbols) {
        let class = ast::Class {
            name: id("Main"),
            class_vars: vec![],
            subroutines: vec![SubroutineDec {
                kind: SubroutineKind::Function,
                return_type: id("void"),
                name: id("run"),
                params: vec![],
                locals: vec![VarDec {
                    type_name: id("int"),
                    names: locals.iter().map(|n| id(n)).collect(),
                }],
                body,
            }],
        };
        let symbols = ClassSymbols::build(&class);
        (class.subroutines[0].clone(), symbols)
    }

    #[test]
    fn let_zero_produces_a_single_eval() {
        let (sub, symbols) = one_local_sub(
            vec![Statement::Let {
                name: id("x"),
                index: None,
                value: Expression::int(0),
            }],
            vec!["x"],
        );
        let ir_sub = flatten_subroutine(&sub, &symbols.for_subroutine(&sub));
        assert_eq!(ir_sub.body.len(), 1);
        match &ir_sub.body[0] {
            Stmt::Eval { dest, expr } => {
                assert_eq!(*dest, Value::Local(id("x")));
                assert_eq!(*expr, Expr::Const(0));
            }
            other => panic!("expected Eval, got {other:?}"),
        }
    }

    #[test]
    fn every_eval_dest_is_a_local_before_allocation() {
        let (sub, symbols) = one_local_sub(
            vec![Statement::Let {
                name: id("a"),
                index: None,
                value: Expression::Binary {
                    left: Box::new(Expression::var("b")),
                    op: Op::Plus,
                    right: Box::new(Expression::int(1)),
                },
            }],
            vec!["a", "b"],
        );
        let ir_sub = flatten_subroutine(&sub, &symbols.for_subroutine(&sub));
        for stmt in &ir_sub.body {
            if let Stmt::Eval { dest, .. } = stmt {
                assert!(matches!(dest, Value::Local(_)), "dest should be a Local pre-allocation: {dest:?}");
            }
        }
    }

    #[test]
    fn do_call_becomes_a_discard() {
        let (sub, symbols) = one_local_sub(
            vec![Statement::Do(SubroutineCall {
                receiver: Some(Receiver::Class(id("Output"))),
                sub_name: id("printInt"),
                args: vec![Expression::Binary {
                    left: Box::new(Expression::var("x")),
                    op: Op::Plus,
                    right: Box::new(Expression::int(1)),
                }],
            })],
            vec!["x"],
        );
        let ir_sub = flatten_subroutine(&sub, &symbols.for_subroutine(&sub));
        match ir_sub.body.last().unwrap() {
            Stmt::Discard { call } => {
                assert_eq!(call.class_name, id("Output"));
                assert_eq!(call.sub_name, id("printInt"));
                assert_eq!(call.nargs, 1);
            }
            other => panic!("expected Discard, got {other:?}"),
        }
    }

    #[test]
    fn if_without_else_tests_the_value_directly() {
        let (sub, symbols) = one_local_sub(
            vec![Statement::If {
                cond: Expression::Binary {
                    left: Box::new(Expression::var("x")),
                    op: Op::Eq,
                    right: Box::new(Expression::int(0)),
                },
                when_true: vec![],
                when_false: None,
            }],
            vec!["x"],
        );
        let ir_sub = flatten_subroutine(&sub, &symbols.for_subroutine(&sub));
        match ir_sub.body.last().unwrap() {
            Stmt::If { value, cmp, when_false, .. } => {
                assert_eq!(*value, Value::Local(id("x")));
                assert_eq!(*cmp, Cmp::Eq);
                assert!(when_false.is_none());
            }
            other => panic!("expected If, got {other:?}"),
        }
    }

    #[test]
    fn string_constant_lowers_to_new_and_append_char_calls() {
        let (sub, symbols) = one_local_sub(
            vec![Statement::Return(Some(Expression::StringConstant("hi".to_string())))],
            vec![],
        );
        let ir_sub = flatten_subroutine(&sub, &symbols.for_subroutine(&sub));
        let calls: Vec<_> = ir_sub
            .body
            .iter()
            .filter_map(|s| match s {
                Stmt::Push { expr: Expr::CallSub(c) } => Some((c.sub_name, c.nargs)),
                _ => None,
            })
            .collect();
        assert_eq!(calls[0], (id("new"), 1));
        assert_eq!(calls[1], (id("appendChar"), 2));
        assert_eq!(calls[2], (id("appendChar"), 2));
        assert!(matches!(ir_sub.body.last().unwrap(), Stmt::Return { .. }));
    }
}
