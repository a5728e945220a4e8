//! The Jack abstract syntax tree.
//!
//! This is intentionally only as rich as the flattener's contract (§4.1)
//! requires: class/static field declarations, subroutine declarations, and
//! the five statement forms and handful of expression forms that Jack
//! programs are built from. A real parser would produce values of these
//! types; since parsing is out of scope, fixtures are built by hand or
//! decoded from JSON.

use crate::common::Id;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Class {
    pub name: Id,
    pub class_vars: Vec<ClassVarDec>,
    pub subroutines: Vec<SubroutineDec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassVarKind {
    Static,
    Field,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassVarDec {
    pub kind: ClassVarKind,
    pub type_name: Id,
    pub names: Vec<Id>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubroutineKind {
    Function,
    Method,
    Constructor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub type_name: Id,
    pub name: Id,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarDec {
    pub type_name: Id,
    pub names: Vec<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubroutineDec {
    pub kind: SubroutineKind,
    pub return_type: Id,
    pub name: Id,
    pub params: Vec<Param>,
    pub locals: Vec<VarDec>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Statement {
    Let {
        name: Id,
        index: Option<Expression>,
        value: Expression,
    },
    If {
        cond: Expression,
        when_true: Vec<Statement>,
        when_false: Option<Vec<Statement>>,
    },
    While {
        cond: Expression,
        body: Vec<Statement>,
    },
    Do(SubroutineCall),
    Return(Option<Expression>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Keyword {
    True,
    False,
    Null,
    This,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Plus,
    Minus,
    Star,
    Slash,
    And,
    Or,
    Lt,
    Gt,
    Eq,
}

impl Op {
    pub fn symbol(self) -> &'static str {
        match self {
            Op::Plus => "+",
            Op::Minus => "-",
            Op::Star => "*",
            Op::Slash => "/",
            Op::And => "&",
            Op::Or => "|",
            Op::Lt => "<",
            Op::Gt => ">",
            Op::Eq => "=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// The receiver of a subroutine call: `Receiver::Class` for `Type.sub(...)`,
/// `Receiver::Var` for `obj.sub(...)`, or `None` (on [`SubroutineCall`]) for
/// an unqualified call within a method, which implicitly targets `this`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Receiver {
    Class(Id),
    Var(Id),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubroutineCall {
    pub receiver: Option<Receiver>,
    pub sub_name: Id,
    pub args: Vec<Expression>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expression {
    IntegerConstant(i16),
    StringConstant(String),
    KeywordConstant(Keyword),
    VarRef(Id),
    ArrayRef {
        name: Id,
        index: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expression>,
    },
    Binary {
        left: Box<Expression>,
        op: Op,
        right: Box<Expression>,
    },
    Call(SubroutineCall),
}

impl Expression {
    pub fn int(v: i16) -> Expression {
        Expression::IntegerConstant(v)
    }

    pub fn var(name: &str) -> Expression {
        Expression::VarRef(crate::common::id(name))
    }
}
