//! The symbol resolver collaborator (§2 step 1, §6 External Interfaces).
//!
//! The real compiler treats this as supplied externally: "maps each
//! identifier in a subroutine to a kind and an index". Building one from a
//! [`super::ast::Class`] is simple enough bookkeeping that it's included
//! here so the rest of the pipeline has something to call; it is not the
//! "hard engineering" this crate is about.

use crate::common::{id, Id, Map};
use crate::front::ast::{Class, ClassVarKind, SubroutineDec, SubroutineKind};

/// The storage kind of a resolved variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VarKind {
    Static,
    Field,
    Argument,
    Local,
}

/// §6: "Symbol Table: `kind_of`, `index_of`, `type_of`, `count`, `class_name`."
pub trait SymbolTable {
    fn kind_of(&self, name: Id) -> Option<VarKind>;
    fn index_of(&self, name: Id) -> i32;
    fn type_of(&self, name: Id) -> Id;
    fn count(&self, kind: VarKind) -> i32;
    fn class_name(&self) -> Id;
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    kind: VarKind,
    index: i32,
}

/// A symbol table scoped to one subroutine: class-level statics/fields
/// layered under that subroutine's arguments and locals. Arguments of a
/// `method` start at index 1 — index 0 is the implicit `this`, which the
/// flattener addresses directly via `Location("argument", 0, "this")` and
/// never looks up by name.
#[derive(Debug, Clone)]
pub struct SubroutineSymbols {
    class_name: Id,
    vars: Map<Id, (Entry, Id)>,
    counts: Map<VarKind, i32>,
}

impl SymbolTable for SubroutineSymbols {
    fn kind_of(&self, name: Id) -> Option<VarKind> {
        self.vars.get(&name).map(|(e, _)| e.kind)
    }

    fn index_of(&self, name: Id) -> i32 {
        self.vars
            .get(&name)
            .unwrap_or_else(|| panic!("internal compiler error: unresolved identifier `{name}`"))
            .0
            .index
    }

    fn type_of(&self, name: Id) -> Id {
        self.vars
            .get(&name)
            .unwrap_or_else(|| panic!("internal compiler error: unresolved identifier `{name}`"))
            .1
    }

    fn count(&self, kind: VarKind) -> i32 {
        *self.counts.get(&kind).unwrap_or(&0)
    }

    fn class_name(&self) -> Id {
        self.class_name
    }
}

/// Builds a [`SubroutineSymbols`] for each subroutine of a class, by a
/// single pass over class var declarations and, per subroutine, a pass over
/// its parameters and locals.
#[derive(Debug, Clone)]
pub struct ClassSymbols {
    class_name: Id,
    class_vars: Map<Id, (Entry, Id)>,
    class_counts: Map<VarKind, i32>,
}

impl ClassSymbols {
    pub fn build(class: &Class) -> ClassSymbols {
        let mut class_vars = Map::new();
        let mut class_counts = Map::new();
        for dec in &class.class_vars {
            let kind = match dec.kind {
                ClassVarKind::Static => VarKind::Static,
                ClassVarKind::Field => VarKind::Field,
            };
            for name in &dec.names {
                let index = *class_counts.get(&kind).unwrap_or(&0);
                class_vars.insert(*name, (Entry { kind, index }, dec.type_name));
                class_counts.insert(kind, index + 1);
            }
        }
        ClassSymbols {
            class_name: class.name,
            class_vars,
            class_counts,
        }
    }

    /// Layer a subroutine's parameters and locals on top of the class scope.
    pub fn for_subroutine(&self, sub: &SubroutineDec) -> SubroutineSymbols {
        let mut vars = self.class_vars.clone();
        let mut counts = self.class_counts.clone();

        let mut next_arg = if sub.kind == SubroutineKind::Method { 1 } else { 0 };
        for param in &sub.params {
            vars.insert(
                param.name,
                (
                    Entry {
                        kind: VarKind::Argument,
                        index: next_arg,
                    },
                    param.type_name,
                ),
            );
            next_arg += 1;
        }
        counts.insert(VarKind::Argument, next_arg);

        let mut next_local = 0;
        for dec in &sub.locals {
            for name in &dec.names {
                vars.insert(
                    *name,
                    (
                        Entry {
                            kind: VarKind::Local,
                            index: next_local,
                        },
                        dec.type_name,
                    ),
                );
                next_local += 1;
            }
        }
        counts.insert(VarKind::Local, next_local);

        SubroutineSymbols {
            class_name: self.class_name,
            vars,
            counts,
        }
    }
}

/// Convenience for tests and fixtures: intern a variable name.
pub fn var(name: &str) -> Id {
    id(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::ast::*;

    fn square_class() -> Class {
        Class {
            name: id("Square"),
            class_vars: vec![
                ClassVarDec {
                    kind: ClassVarKind::Field,
                    type_name: id("int"),
                    names: vec![id("x"), id("y"), id("size")],
                },
                ClassVarDec {
                    kind: ClassVarKind::Static,
                    type_name: id("int"),
                    names: vec![id("count")],
                },
            ],
            subroutines: vec![SubroutineDec {
                kind: SubroutineKind::Method,
                return_type: id("void"),
                name: id("draw"),
                params: vec![Param {
                    type_name: id("int"),
                    name: id("color"),
                }],
                locals: vec![VarDec {
                    type_name: id("int"),
                    names: vec![id("i"), id("j")],
                }],
                body: vec![],
            }],
        }
    }

    #[test]
    fn class_fields_and_statics_are_indexed_in_declaration_order() {
        let class = square_class();
        let symbols = ClassSymbols::build(&class);
        let sub = symbols.for_subroutine(&class.subroutines[0]);

        assert_eq!(sub.kind_of(id("x")), Some(VarKind::Field));
        assert_eq!(sub.index_of(id("x")), 0);
        assert_eq!(sub.index_of(id("y")), 1);
        assert_eq!(sub.index_of(id("size")), 2);
        assert_eq!(sub.kind_of(id("count")), Some(VarKind::Static));
        assert_eq!(sub.index_of(id("count")), 0);
        assert_eq!(sub.count(VarKind::Field), 3);
    }

    #[test]
    fn method_arguments_start_at_one() {
        let class = square_class();
        let symbols = ClassSymbols::build(&class);
        let sub = symbols.for_subroutine(&class.subroutines[0]);

        assert_eq!(sub.kind_of(id("color")), Some(VarKind::Argument));
        assert_eq!(sub.index_of(id("color")), 1);
        assert_eq!(sub.count(VarKind::Argument), 2);
    }

    #[test]
    fn locals_are_indexed_from_zero() {
        let class = square_class();
        let symbols = ClassSymbols::build(&class);
        let sub = symbols.for_subroutine(&class.subroutines[0]);

        assert_eq!(sub.index_of(id("i")), 0);
        assert_eq!(sub.index_of(id("j")), 1);
        assert_eq!(sub.count(VarKind::Local), 2);
        assert_eq!(sub.class_name(), id("Square"));
    }
}
