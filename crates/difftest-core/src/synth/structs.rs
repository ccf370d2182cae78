//! Struct declarations of a synthesized contract.
//!
//! Struct types in the structured input are anonymous and structural. Each
//! distinct field list becomes one named struct `S<n>`, numbered in order of
//! first appearance. Nested structs are registered before the struct that
//! contains them so declarations come out in dependency order.

use difftest_types::VyperType;

use crate::ast::{Constructor, ContractDescription, Expr, FunctionDecl, Statement};

#[derive(Debug, Clone, Default)]
pub struct StructRegistry {
    structs: Vec<Vec<VyperType>>,
}

impl StructRegistry {
    /// Register every struct type in `desc` in traversal order: storage,
    /// constructor, then functions in description order.
    pub fn collect(desc: &ContractDescription) -> Self {
        let mut registry = Self::default();
        for ty in &desc.storage {
            registry.register(ty);
        }
        if let Some(ctor) = &desc.constructor {
            registry.register_constructor(ctor);
        }
        for func in &desc.functions {
            registry.register_function(func);
        }
        registry
    }

    fn register_constructor(&mut self, ctor: &Constructor) {
        for ty in &ctor.params {
            self.register(ty);
        }
        self.register_block(&ctor.body);
    }

    fn register_function(&mut self, func: &FunctionDecl) {
        for ty in &func.params {
            self.register(ty);
        }
        if let Some(ty) = &func.returns {
            self.register(ty);
        }
        self.register_block(&func.body);
    }

    fn register_block(&mut self, block: &[Statement]) {
        for stmt in block {
            match stmt {
                Statement::Declare { ty, value } => {
                    self.register(ty);
                    self.register_expr(value);
                }
                Statement::Assign { value, .. } => self.register_expr(value),
                Statement::If {
                    condition,
                    then,
                    otherwise,
                } => {
                    self.register_expr(condition);
                    self.register_block(then);
                    self.register_block(otherwise);
                }
                Statement::For { body, .. } => self.register_block(body),
                Statement::Return { value } => {
                    if let Some(value) = value {
                        self.register_expr(value);
                    }
                }
                Statement::Assert { condition } => self.register_expr(condition),
                Statement::Call { args, .. } => {
                    for arg in args {
                        self.register_expr(arg);
                    }
                }
                Statement::Pass => {}
            }
        }
    }

    fn register_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal { ty, .. } => self.register(ty),
            Expr::Convert { operand, ty } => {
                self.register_expr(operand);
                self.register(ty);
            }
            Expr::Var { .. } | Expr::Storage { .. } | Expr::Env { .. } => {}
            Expr::Binary { lhs, rhs, .. }
            | Expr::Compare { lhs, rhs, .. }
            | Expr::Logical { lhs, rhs, .. } => {
                self.register_expr(lhs);
                self.register_expr(rhs);
            }
            Expr::Not { operand } | Expr::Negate { operand } | Expr::Len { operand } => {
                self.register_expr(operand)
            }
            Expr::Field { base, .. } => self.register_expr(base),
            Expr::Index { base, index } => {
                self.register_expr(base);
                self.register_expr(index);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    self.register_expr(arg);
                }
            }
        }
    }

    /// Register `ty` and any struct nested in it.
    pub fn register(&mut self, ty: &VyperType) {
        match ty {
            VyperType::DynArray { elem, .. } | VyperType::Array { elem, .. } => self.register(elem),
            VyperType::Struct { fields } => {
                for field in fields {
                    self.register(field);
                }
                if self.index_of(fields).is_none() {
                    self.structs.push(fields.clone());
                }
            }
            _ => {}
        }
    }

    pub fn index_of(&self, fields: &[VyperType]) -> Option<usize> {
        self.structs.iter().position(|s| s.as_slice() == fields)
    }

    /// Name of a registered struct. Unregistered field lists fall back to
    /// the next free number; `collect` registers everything reachable.
    pub fn name_of(&self, fields: &[VyperType]) -> String {
        format!("S{}", self.index_of(fields).unwrap_or(self.structs.len()))
    }

    /// Source form of a type, with structs by name.
    pub fn render_type(&self, ty: &VyperType) -> String {
        match ty {
            VyperType::Struct { fields } => self.name_of(fields),
            VyperType::DynArray { elem, max_len } => {
                format!("DynArray[{}, {max_len}]", self.render_type(elem))
            }
            VyperType::Array { elem, len } => format!("{}[{len}]", self.render_type(elem)),
            other => other.to_string(),
        }
    }

    /// `struct S<n>:` blocks in registration order.
    pub fn declarations(&self) -> String {
        let mut out = String::new();
        for (i, fields) in self.structs.iter().enumerate() {
            out.push_str(&format!("struct S{i}:\n"));
            for (j, field) in fields.iter().enumerate() {
                out.push_str(&format!("    f{j}: {}\n", self.render_type(field)));
            }
            out.push('\n');
        }
        out
    }

    pub fn len(&self) -> usize {
        self.structs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_structs_registered_inner_first() {
        let inner = VyperType::Struct {
            fields: vec![VyperType::Bool],
        };
        let outer = VyperType::Struct {
            fields: vec![inner.clone(), VyperType::uint256()],
        };
        let mut registry = StructRegistry::default();
        registry.register(&VyperType::Array {
            elem: Box::new(outer.clone()),
            len: 2,
        });
        registry.register(&inner);
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.render_type(&VyperType::DynArray {
                elem: Box::new(outer),
                max_len: 3
            }),
            "DynArray[S1, 3]"
        );
        assert_eq!(
            registry.declarations(),
            "struct S0:\n    f0: bool\n\nstruct S1:\n    f0: S0\n    f1: uint256\n\n"
        );
    }
}
