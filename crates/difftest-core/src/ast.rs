//! Structured input: the typed tree a mutation engine hands to the synthesizer.
//!
//! Node kinds are closed sum types tagged by `kind` in JSON. Functions are
//! referenced by their position in [`ContractDescription::functions`],
//! variables by the number `k` of the `x_k` they name, storage by index.

use serde::{Deserialize, Serialize};

use difftest_types::{Value, VyperType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDescription {
    #[serde(default)]
    pub storage: Vec<VyperType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constructor: Option<Constructor>,
    #[serde(default)]
    pub functions: Vec<FunctionDecl>,
}

impl ContractDescription {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    External,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutability {
    Pure,
    View,
    Nonpayable,
    Payable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub visibility: Visibility,
    pub mutability: Mutability,
    #[serde(default)]
    pub params: Vec<VyperType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<VyperType>,
    #[serde(default)]
    pub body: Vec<Statement>,
}

impl FunctionDecl {
    /// Callee indices in order of appearance, duplicates included.
    pub fn call_sites(&self) -> Vec<usize> {
        let mut calls = Vec::new();
        collect_block_calls(&self.body, &mut calls);
        calls
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constructor {
    #[serde(default)]
    pub payable: bool,
    #[serde(default)]
    pub params: Vec<VyperType>,
    #[serde(default)]
    pub body: Vec<Statement>,
}

impl Constructor {
    pub fn call_sites(&self) -> Vec<usize> {
        let mut calls = Vec::new();
        collect_block_calls(&self.body, &mut calls);
        calls
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statement {
    /// Declare the next local `x_k`.
    Declare { ty: VyperType, value: Expr },
    Assign { target: Target, value: Expr },
    If {
        condition: Expr,
        #[serde(default)]
        then: Vec<Statement>,
        #[serde(default)]
        otherwise: Vec<Statement>,
    },
    /// `for x_k in range(count)`, the loop variable is a `uint256` local.
    For {
        count: u32,
        #[serde(default)]
        body: Vec<Statement>,
    },
    Return {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Expr>,
    },
    Assert { condition: Expr },
    Call {
        function: usize,
        #[serde(default)]
        args: Vec<Expr>,
    },
    Pass,
}

impl Statement {
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::Declare { .. } => "declare",
            Statement::Assign { .. } => "assign",
            Statement::If { .. } => "if",
            Statement::For { .. } => "for",
            Statement::Return { .. } => "return",
            Statement::Assert { .. } => "assert",
            Statement::Call { .. } => "call",
            Statement::Pass => "pass",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    Local { index: usize },
    Storage { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    /// Whether the operator needs ordered (numeric) operands.
    pub fn is_ordering(&self) -> bool {
        !matches!(self, CmpOp::Eq | CmpOp::Ne)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvVar {
    MsgSender,
    BlockNumber,
    BlockTimestamp,
    SelfAddress,
}

impl EnvVar {
    pub fn source(&self) -> &'static str {
        match self {
            EnvVar::MsgSender => "msg.sender",
            EnvVar::BlockNumber => "block.number",
            EnvVar::BlockTimestamp => "block.timestamp",
            EnvVar::SelfAddress => "self",
        }
    }

    pub fn ty(&self) -> VyperType {
        match self {
            EnvVar::MsgSender | EnvVar::SelfAddress => VyperType::Address,
            EnvVar::BlockNumber | EnvVar::BlockTimestamp => VyperType::uint256(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Literal { ty: VyperType, value: Value },
    Var { index: usize },
    Storage { index: usize },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Compare { op: CmpOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Logical { op: LogicOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Not { operand: Box<Expr> },
    Negate { operand: Box<Expr> },
    Call {
        function: usize,
        #[serde(default)]
        args: Vec<Expr>,
    },
    Len { operand: Box<Expr> },
    Index { base: Box<Expr>, index: Box<Expr> },
    Field { base: Box<Expr>, field: usize },
    Convert { operand: Box<Expr>, ty: VyperType },
    Env { var: EnvVar },
}

impl Expr {
    pub fn kind(&self) -> &'static str {
        match self {
            Expr::Literal { .. } => "literal",
            Expr::Var { .. } => "var",
            Expr::Storage { .. } => "storage",
            Expr::Binary { .. } => "binary",
            Expr::Compare { .. } => "compare",
            Expr::Logical { .. } => "logical",
            Expr::Not { .. } => "not",
            Expr::Negate { .. } => "negate",
            Expr::Call { .. } => "call",
            Expr::Len { .. } => "len",
            Expr::Index { .. } => "index",
            Expr::Field { .. } => "field",
            Expr::Convert { .. } => "convert",
            Expr::Env { .. } => "env",
        }
    }

    pub fn literal(ty: VyperType, value: Value) -> Self {
        Expr::Literal { ty, value }
    }

    pub fn var(index: usize) -> Self {
        Expr::Var { index }
    }
}

fn collect_block_calls(block: &[Statement], out: &mut Vec<usize>) {
    for stmt in block {
        match stmt {
            Statement::Declare { value, .. } | Statement::Assign { value, .. } => {
                collect_expr_calls(value, out)
            }
            Statement::If {
                condition,
                then,
                otherwise,
            } => {
                collect_expr_calls(condition, out);
                collect_block_calls(then, out);
                collect_block_calls(otherwise, out);
            }
            Statement::For { body, .. } => collect_block_calls(body, out),
            Statement::Return { value } => {
                if let Some(value) = value {
                    collect_expr_calls(value, out);
                }
            }
            Statement::Assert { condition } => collect_expr_calls(condition, out),
            Statement::Call { function, args } => {
                for arg in args {
                    collect_expr_calls(arg, out);
                }
                out.push(*function);
            }
            Statement::Pass => {}
        }
    }
}

fn collect_expr_calls(expr: &Expr, out: &mut Vec<usize>) {
    match expr {
        Expr::Literal { .. } | Expr::Var { .. } | Expr::Storage { .. } | Expr::Env { .. } => {}
        Expr::Binary { lhs, rhs, .. }
        | Expr::Compare { lhs, rhs, .. }
        | Expr::Logical { lhs, rhs, .. } => {
            collect_expr_calls(lhs, out);
            collect_expr_calls(rhs, out);
        }
        Expr::Not { operand }
        | Expr::Negate { operand }
        | Expr::Len { operand }
        | Expr::Convert { operand, .. } => collect_expr_calls(operand, out),
        Expr::Field { base, .. } => collect_expr_calls(base, out),
        Expr::Index { base, index } => {
            collect_expr_calls(base, out);
            collect_expr_calls(index, out);
        }
        Expr::Call { function, args } => {
            for arg in args {
                collect_expr_calls(arg, out);
            }
            out.push(*function);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged_tree() {
        let json = r#"{
            "storage": [{"type": "uint", "bits": 256}],
            "functions": [{
                "visibility": "external",
                "mutability": "view",
                "params": [{"type": "bool"}],
                "returns": {"type": "uint", "bits": 256},
                "body": [
                    {"kind": "if", "condition": {"kind": "var", "index": 0},
                     "then": [{"kind": "return", "value": {"kind": "call", "function": 1}}]},
                    {"kind": "return", "value": {"kind": "storage", "index": 0}}
                ]
            }]
        }"#;
        let desc = ContractDescription::from_json(json).unwrap();
        assert_eq!(desc.functions.len(), 1);
        assert!(desc.constructor.is_none());
        assert_eq!(desc.functions[0].call_sites(), vec![1]);
    }

    #[test]
    fn test_call_sites_order() {
        let func = FunctionDecl {
            visibility: Visibility::Internal,
            mutability: Mutability::Nonpayable,
            params: vec![],
            returns: None,
            body: vec![
                Statement::Call {
                    function: 2,
                    args: vec![Expr::Call {
                        function: 3,
                        args: vec![],
                    }],
                },
                Statement::For {
                    count: 2,
                    body: vec![Statement::Call {
                        function: 2,
                        args: vec![],
                    }],
                },
            ],
        };
        assert_eq!(func.call_sites(), vec![3, 2, 2]);
    }
}
