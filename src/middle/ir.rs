//! The tiny, flattened IR (§3 DATA MODEL).
//!
//! Every value is a signed 16-bit word. The IR is rebuilt, never mutated in
//! place, by each pass (flatten, promote, lock-down): each pass consumes a
//! `Vec<Stmt>` and produces a fresh one.

use crate::common::Id;
use crate::front::ast::Op;

/// A location identified by segment and index. `field` is never a valid
/// `kind` here — field access is always rewritten to address arithmetic on
/// `this` before an IR `Location` is constructed (§3 invariants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LocKind {
    Static,
    Argument,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    pub kind: LocKind,
    pub index: i32,
    pub name: Id,
}

/// A value that's eligible to appear anywhere an operand is expected:
/// an immediate, an unallocated local, or an allocated register.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Const(i16),
    Local(Id),
    Reg { index: u8, name: Id },
}

impl Value {
    pub fn local(name: Id) -> Value {
        Value::Local(name)
    }

    /// The `Local` name referenced by this value, if any.
    pub fn local_name(&self) -> Option<Id> {
        match self {
            Value::Local(n) => Some(*n),
            _ => None,
        }
    }
}

/// Comparators. The source lists only `!=` in one type alias, but both the
/// emitter and condition lowering handle the full set; this crate treats
/// the full set as supported (§9 Open Questions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Cmp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl Cmp {
    /// Negate a comparator, e.g. for branching over a `then` block when the
    /// test is false.
    pub fn negate(self) -> Cmp {
        match self {
            Cmp::Eq => Cmp::Ne,
            Cmp::Ne => Cmp::Eq,
            Cmp::Lt => Cmp::Ge,
            Cmp::Gt => Cmp::Le,
            Cmp::Le => Cmp::Gt,
            Cmp::Ge => Cmp::Lt,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Cmp::Eq => "=",
            Cmp::Ne => "!=",
            Cmp::Lt => "<",
            Cmp::Gt => ">",
            Cmp::Le => "<=",
            Cmp::Ge => ">=",
        }
    }
}

/// Subroutine call. Arguments are assumed already pushed onto the stack by
/// preceding `Push` statements (`nargs` of them).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSub {
    pub class_name: Id,
    pub sub_name: Id,
    pub nargs: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binary {
    pub left: Value,
    pub op: Op,
    pub right: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unary {
    pub op: UnaryOp,
    pub value: Value,
}

/// Expressions: a superset of [`Value`] that may only appear as the
/// right-hand side of `Eval`, `Push`, `Return`, or `Discard` (§3 invariants).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Const(i16),
    Local(Id),
    Reg { index: u8, name: Id },
    Location(Location),
    Binary(Binary),
    Unary(Unary),
    IndirectRead { address: Value },
    CallSub(CallSub),
}

impl From<Value> for Expr {
    fn from(v: Value) -> Expr {
        match v {
            Value::Const(c) => Expr::Const(c),
            Value::Local(n) => Expr::Local(n),
            Value::Reg { index, name } => Expr::Reg { index, name },
        }
    }
}

impl Expr {
    /// Downcast to a [`Value`] if this expression is already trivial.
    pub fn as_value(&self) -> Option<Value> {
        match self {
            Expr::Const(c) => Some(Value::Const(*c)),
            Expr::Local(n) => Some(Value::Local(*n)),
            Expr::Reg { index, name } => Some(Value::Reg {
                index: *index,
                name: *name,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    /// Evaluate an expression and store the result in `dest` (a `Local`
    /// before allocation, a `Reg` after).
    Eval { dest: Value, expr: Expr },
    /// Store a value to a fixed location (static/argument/local segment).
    Store { location: Location, value: Value },
    /// Write a value through a computed address (`poke`).
    IndirectWrite { address: Value, value: Value },
    If {
        value: Value,
        cmp: Cmp,
        when_true: Vec<Stmt>,
        when_false: Option<Vec<Stmt>>,
    },
    While {
        test: Vec<Stmt>,
        value: Value,
        cmp: Cmp,
        body: Vec<Stmt>,
    },
    Return { expr: Expr },
    /// Used only to set up a `CallSub`'s arguments: evaluate and push onto
    /// the operand stack.
    Push { expr: Expr },
    /// Call a subroutine and discard its result.
    Discard { call: CallSub },
}

#[derive(Debug, Clone)]
pub struct Subroutine {
    pub name: Id,
    /// Cumulative stack slots consumed by promotion; `None` until
    /// allocation has run to completion.
    pub num_local_slots: i32,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct Class {
    pub name: Id,
    pub subroutines: Vec<Subroutine>,
}
