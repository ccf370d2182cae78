//! Source synthesizer: structured input to Vyper source.
//!
//! Output layout is fixed: struct declarations, storage declarations,
//! functions in call-graph emission order, then the constructor. Type checks
//! run while emitting; any contradiction is a [`ConversionError`] naming the
//! node kind, which callers treat as a harness defect.

mod literal;
mod structs;

pub use literal::render_literal;
pub use structs::StructRegistry;

use difftest_types::{TypeMap, VyperType, CONSTRUCTOR_NAME};

use crate::ast::{
    Constructor, ContractDescription, Expr, FunctionDecl, LogicOp, Mutability, Statement, Target,
    Visibility,
};
use crate::call_graph::CallGraph;
use crate::errors::{ConversionError, ConversionFault, DependencyError, HarnessError};

const INDENT: &str = "    ";

/// Result of a successful synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synthesis {
    pub source: String,
    /// Declared parameter types per function name, `__init__` included.
    pub type_map: TypeMap,
    /// Emission order of function indices.
    pub order: Vec<usize>,
}

pub fn function_name(index: usize) -> String {
    format!("func_{index}")
}

fn storage_name(index: usize) -> String {
    format!("var_{index}")
}

fn local_name(index: usize) -> String {
    format!("x_{index}")
}

/// Synthesize source text and the parameter-type map.
pub fn synthesize(desc: &ContractDescription) -> Result<Synthesis, HarnessError> {
    validate_declared_types(desc)?;
    let graph = CallGraph::from_description(desc)?;
    let order = graph.emission_order();
    let structs = StructRegistry::collect(desc);

    let mut out = structs.declarations();
    for (j, ty) in desc.storage.iter().enumerate() {
        out.push_str(&format!("{}: {}\n", storage_name(j), structs.render_type(ty)));
    }
    if !desc.storage.is_empty() {
        out.push('\n');
    }

    let mut type_map = TypeMap::new();
    let emitter = Emitter {
        desc,
        structs: &structs,
    };
    let mut blocks = Vec::with_capacity(order.len() + 1);
    for &index in &order {
        let func = &desc.functions[index];
        blocks.push(emitter.function(index, func)?);
        type_map.insert(function_name(index), func.params.clone());
    }
    if let Some(ctor) = &desc.constructor {
        blocks.push(emitter.constructor(ctor)?);
        type_map.insert(CONSTRUCTOR_NAME, ctor.params.clone());
    }
    out.push_str(&blocks.join("\n"));

    Ok(Synthesis {
        source: out,
        type_map,
        order,
    })
}

fn validate_declared_types(desc: &ContractDescription) -> Result<(), HarnessError> {
    let ctor_params = desc.constructor.iter().flat_map(|c| c.params.iter());
    let func_types = desc
        .functions
        .iter()
        .flat_map(|f| f.params.iter().chain(f.returns.iter()));
    for ty in desc.storage.iter().chain(ctor_params).chain(func_types) {
        ty.validate()?;
    }
    Ok(())
}

fn mismatch(node: &'static str, detail: impl Into<String>) -> ConversionError {
    ConversionError::new(node, ConversionFault::TypeMismatch, detail)
}

/// Variables visible inside one function body.
struct Scope {
    name: String,
    frames: Vec<Vec<(usize, VyperType)>>,
    next_local: usize,
    returns: Option<VyperType>,
}

impl Scope {
    fn new(name: String, params: &[VyperType], returns: Option<VyperType>) -> Self {
        Self {
            name,
            frames: vec![params.iter().cloned().enumerate().collect()],
            next_local: params.len(),
            returns,
        }
    }

    fn lookup(&self, index: usize) -> Option<&VyperType> {
        self.frames
            .iter()
            .rev()
            .flat_map(|frame| frame.iter())
            .find(|(k, _)| *k == index)
            .map(|(_, ty)| ty)
    }

    fn declare(&mut self, ty: VyperType) -> usize {
        let index = self.next_local;
        self.next_local += 1;
        if let Some(frame) = self.frames.last_mut() {
            frame.push((index, ty));
        }
        index
    }
}

struct Emitter<'a> {
    desc: &'a ContractDescription,
    structs: &'a StructRegistry,
}

impl<'a> Emitter<'a> {
    fn signature_params(&self, params: &[VyperType]) -> String {
        params
            .iter()
            .enumerate()
            .map(|(k, ty)| format!("{}: {}", local_name(k), self.structs.render_type(ty)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn function(&self, index: usize, func: &FunctionDecl) -> Result<String, HarnessError> {
        let name = function_name(index);
        let mut out = String::new();
        out.push_str(match func.visibility {
            Visibility::External => "@external\n",
            Visibility::Internal => "@internal\n",
        });
        match func.mutability {
            Mutability::Pure => out.push_str("@pure\n"),
            Mutability::View => out.push_str("@view\n"),
            Mutability::Payable => out.push_str("@payable\n"),
            Mutability::Nonpayable => {}
        }
        out.push_str(&format!(
            "def {name}({})",
            self.signature_params(&func.params)
        ));
        if let Some(ret) = &func.returns {
            out.push_str(&format!(" -> {}", self.structs.render_type(ret)));
        }
        out.push_str(":\n");

        let mut scope = Scope::new(name, &func.params, func.returns.clone());
        self.block(&func.body, &mut scope, 1, &mut out)?;
        Ok(out)
    }

    fn constructor(&self, ctor: &Constructor) -> Result<String, HarnessError> {
        let mut out = String::from("@external\n");
        if ctor.payable {
            out.push_str("@payable\n");
        }
        out.push_str(&format!(
            "def {CONSTRUCTOR_NAME}({}):\n",
            self.signature_params(&ctor.params)
        ));
        let mut scope = Scope::new(CONSTRUCTOR_NAME.to_string(), &ctor.params, None);
        self.block(&ctor.body, &mut scope, 1, &mut out)?;
        Ok(out)
    }

    fn block(
        &self,
        block: &[Statement],
        scope: &mut Scope,
        depth: usize,
        out: &mut String,
    ) -> Result<(), HarnessError> {
        if block.is_empty() {
            push_line(out, depth, "pass");
            return Ok(());
        }
        for stmt in block {
            self.statement(stmt, scope, depth, out)?;
        }
        Ok(())
    }

    fn nested_block(
        &self,
        block: &[Statement],
        scope: &mut Scope,
        depth: usize,
        out: &mut String,
        loop_var: Option<VyperType>,
    ) -> Result<Option<usize>, HarnessError> {
        scope.frames.push(Vec::new());
        let declared = loop_var.map(|ty| scope.declare(ty));
        let result = self.block(block, scope, depth, out);
        scope.frames.pop();
        result.map(|_| declared)
    }

    fn statement(
        &self,
        stmt: &Statement,
        scope: &mut Scope,
        depth: usize,
        out: &mut String,
    ) -> Result<(), HarnessError> {
        let node = stmt.kind();
        match stmt {
            Statement::Declare { ty, value } => {
                ty.validate()?;
                let (text, value_ty) = self.expr(value, scope)?;
                if &value_ty != ty {
                    return Err(mismatch(node, format!("declared {ty}, assigned {value_ty}")).into());
                }
                let index = scope.declare(ty.clone());
                push_line(
                    out,
                    depth,
                    &format!(
                        "{}: {} = {text}",
                        local_name(index),
                        self.structs.render_type(ty)
                    ),
                );
            }
            Statement::Assign { target, value } => {
                let (target_text, target_ty) = match target {
                    Target::Local { index } => {
                        let ty = scope.lookup(*index).cloned().ok_or_else(|| {
                            ConversionError::new(
                                node,
                                ConversionFault::UnknownVariable,
                                format!("{} is not in scope", local_name(*index)),
                            )
                        })?;
                        (local_name(*index), ty)
                    }
                    Target::Storage { index } => {
                        let ty = self.storage_type(node, *index)?;
                        (format!("self.{}", storage_name(*index)), ty.clone())
                    }
                };
                let (text, value_ty) = self.expr(value, scope)?;
                if value_ty != target_ty {
                    return Err(mismatch(
                        node,
                        format!("{target_text} is {target_ty}, assigned {value_ty}"),
                    )
                    .into());
                }
                push_line(out, depth, &format!("{target_text} = {text}"));
            }
            Statement::If {
                condition,
                then,
                otherwise,
            } => {
                let cond = self.condition(node, condition, scope)?;
                push_line(out, depth, &format!("if {cond}:"));
                self.nested_block(then, scope, depth + 1, out, None)?;
                if !otherwise.is_empty() {
                    push_line(out, depth, "else:");
                    self.nested_block(otherwise, scope, depth + 1, out, None)?;
                }
            }
            Statement::For { count, body } => {
                if *count == 0 {
                    return Err(ConversionError::new(
                        node,
                        ConversionFault::InvalidLiteral,
                        "loop bound must be positive",
                    )
                    .into());
                }
                // The loop variable takes the next local number; emit the
                // header after the body has been checked in its own scope.
                let mut body_out = String::new();
                let index = self
                    .nested_block(body, scope, depth + 1, &mut body_out, Some(VyperType::uint256()))?
                    .unwrap_or(scope.next_local);
                push_line(
                    out,
                    depth,
                    &format!("for {} in range({count}):", local_name(index)),
                );
                out.push_str(&body_out);
            }
            Statement::Return { value } => match (value, &scope.returns) {
                (None, None) => push_line(out, depth, "return"),
                (Some(value), Some(expected)) => {
                    let (text, ty) = self.expr(value, scope)?;
                    if &ty != expected {
                        return Err(ConversionError::new(
                            node,
                            ConversionFault::ReturnMismatch,
                            format!("{} returns {expected}, got {ty}", scope.name),
                        )
                        .into());
                    }
                    push_line(out, depth, &format!("return {text}"));
                }
                (Some(_), None) => {
                    return Err(ConversionError::new(
                        node,
                        ConversionFault::ReturnMismatch,
                        format!("{} returns nothing", scope.name),
                    )
                    .into())
                }
                (None, Some(expected)) => {
                    return Err(ConversionError::new(
                        node,
                        ConversionFault::ReturnMismatch,
                        format!("{} must return {expected}", scope.name),
                    )
                    .into())
                }
            },
            Statement::Assert { condition } => {
                let cond = self.condition(node, condition, scope)?;
                push_line(out, depth, &format!("assert {cond}"));
            }
            Statement::Call { function, args } => {
                let (text, _) = self.call(node, *function, args, scope, false)?;
                push_line(out, depth, &text);
            }
            Statement::Pass => push_line(out, depth, "pass"),
        }
        Ok(())
    }

    fn condition(
        &self,
        node: &'static str,
        condition: &Expr,
        scope: &Scope,
    ) -> Result<String, HarnessError> {
        let (text, ty) = self.expr(condition, scope)?;
        if ty != VyperType::Bool {
            return Err(mismatch(node, format!("condition is {ty}, expected bool")).into());
        }
        Ok(text)
    }

    fn storage_type(&self, node: &'static str, index: usize) -> Result<&VyperType, ConversionError> {
        self.desc.storage.get(index).ok_or_else(|| {
            ConversionError::new(
                node,
                ConversionFault::UnknownVariable,
                format!("{} is not declared", storage_name(index)),
            )
        })
    }

    fn call(
        &self,
        node: &'static str,
        function: usize,
        args: &[Expr],
        scope: &Scope,
        needs_value: bool,
    ) -> Result<(String, Option<VyperType>), HarnessError> {
        let callee = self.desc.functions.get(function).ok_or_else(|| DependencyError {
            caller: scope.name.clone(),
            callee: function,
        })?;
        if args.len() != callee.params.len() {
            return Err(ConversionError::new(
                node,
                ConversionFault::ArityMismatch,
                format!(
                    "{} takes {} arguments, got {}",
                    function_name(function),
                    callee.params.len(),
                    args.len()
                ),
            )
            .into());
        }
        let mut rendered = Vec::with_capacity(args.len());
        for (k, (arg, param)) in args.iter().zip(&callee.params).enumerate() {
            let (text, ty) = self.expr(arg, scope)?;
            if &ty != param {
                return Err(mismatch(
                    node,
                    format!(
                        "argument {k} of {} is {param}, got {ty}",
                        function_name(function)
                    ),
                )
                .into());
            }
            rendered.push(text);
        }
        if needs_value && callee.returns.is_none() {
            return Err(mismatch(
                node,
                format!("{} returns nothing", function_name(function)),
            )
            .into());
        }
        Ok((
            format!("self.{}({})", function_name(function), rendered.join(", ")),
            callee.returns.clone(),
        ))
    }

    /// Render an expression and infer its type.
    fn expr(&self, expr: &Expr, scope: &Scope) -> Result<(String, VyperType), HarnessError> {
        let node = expr.kind();
        let typed = match expr {
            Expr::Literal { ty, value } => {
                ty.validate()?;
                (render_literal(value, ty, self.structs)?, ty.clone())
            }
            Expr::Var { index } => {
                let ty = scope.lookup(*index).ok_or_else(|| {
                    ConversionError::new(
                        node,
                        ConversionFault::UnknownVariable,
                        format!("{} is not in scope", local_name(*index)),
                    )
                })?;
                (local_name(*index), ty.clone())
            }
            Expr::Storage { index } => {
                let ty = self.storage_type(node, *index)?;
                (format!("self.{}", storage_name(*index)), ty.clone())
            }
            Expr::Binary { op, lhs, rhs } => {
                let (l, lt) = self.expr(lhs, scope)?;
                let (r, rt) = self.expr(rhs, scope)?;
                if lt != rt || !lt.is_numeric() {
                    return Err(mismatch(
                        node,
                        format!("`{}` on {lt} and {rt}", op.symbol()),
                    )
                    .into());
                }
                (format!("({l} {} {r})", op.symbol()), lt)
            }
            Expr::Compare { op, lhs, rhs } => {
                let (l, lt) = self.expr(lhs, scope)?;
                let (r, rt) = self.expr(rhs, scope)?;
                let comparable = if op.is_ordering() {
                    lt.is_numeric()
                } else {
                    !lt.is_composite()
                };
                if lt != rt || !comparable {
                    return Err(mismatch(
                        node,
                        format!("`{}` on {lt} and {rt}", op.symbol()),
                    )
                    .into());
                }
                (format!("({l} {} {r})", op.symbol()), VyperType::Bool)
            }
            Expr::Logical { op, lhs, rhs } => {
                let (l, lt) = self.expr(lhs, scope)?;
                let (r, rt) = self.expr(rhs, scope)?;
                if lt != VyperType::Bool || rt != VyperType::Bool {
                    return Err(mismatch(node, format!("operands are {lt} and {rt}")).into());
                }
                let keyword = match op {
                    LogicOp::And => "and",
                    LogicOp::Or => "or",
                };
                (format!("({l} {keyword} {r})"), VyperType::Bool)
            }
            Expr::Not { operand } => {
                let (text, ty) = self.expr(operand, scope)?;
                if ty != VyperType::Bool {
                    return Err(mismatch(node, format!("operand is {ty}")).into());
                }
                (format!("(not {text})"), ty)
            }
            Expr::Negate { operand } => {
                let (text, ty) = self.expr(operand, scope)?;
                if !matches!(ty, VyperType::Int { .. } | VyperType::Decimal) {
                    return Err(mismatch(node, format!("cannot negate {ty}")).into());
                }
                (format!("(-{text})"), ty)
            }
            Expr::Call { function, args } => {
                let (text, ty) = self.call(node, *function, args, scope, true)?;
                let ty = ty.ok_or_else(|| {
                    mismatch(node, format!("{} returns nothing", function_name(*function)))
                })?;
                (text, ty)
            }
            Expr::Len { operand } => {
                let (text, ty) = self.expr(operand, scope)?;
                if !matches!(
                    ty,
                    VyperType::Bytes { .. } | VyperType::String { .. } | VyperType::DynArray { .. }
                ) {
                    return Err(mismatch(node, format!("len() of {ty}")).into());
                }
                (format!("len({text})"), VyperType::uint256())
            }
            Expr::Index { base, index } => {
                let (b, bt) = self.expr(base, scope)?;
                let (i, it) = self.expr(index, scope)?;
                if !matches!(it, VyperType::Uint { .. } | VyperType::Int { .. }) {
                    return Err(mismatch(node, format!("index is {it}")).into());
                }
                let elem = match bt {
                    VyperType::Array { elem, .. } | VyperType::DynArray { elem, .. } => *elem,
                    other => return Err(mismatch(node, format!("cannot index {other}")).into()),
                };
                (format!("{b}[{i}]"), elem)
            }
            Expr::Field { base, field } => {
                let (b, bt) = self.expr(base, scope)?;
                let ty = match &bt {
                    VyperType::Struct { fields } => fields.get(*field).cloned(),
                    _ => None,
                }
                .ok_or_else(|| mismatch(node, format!("{bt} has no field f{field}")))?;
                (format!("{b}.f{field}"), ty)
            }
            Expr::Convert { operand, ty } => {
                ty.validate()?;
                let (text, _) = self.expr(operand, scope)?;
                (
                    format!("convert({text}, {})", self.structs.render_type(ty)),
                    ty.clone(),
                )
            }
            Expr::Env { var } => (var.source().to_string(), var.ty()),
        };
        Ok(typed)
    }
}

fn push_line(out: &mut String, depth: usize, text: &str) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
    out.push_str(text);
    out.push('\n');
}
