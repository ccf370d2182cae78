//! ABI JSON entries as emitted by the compiler.

use serde::{Deserialize, Serialize};

use crate::ty::{UnsupportedTypeError, VyperType};

/// State mutability of an ABI function entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateMutability {
    Pure,
    View,
    Nonpayable,
    Payable,
}

/// One parameter or output of an ABI entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiParam {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<AbiParam>,
}

impl AbiParam {
    /// Canonical type string with tuple components expanded.
    pub fn canonical_type(&self) -> String {
        match self.ty.strip_prefix("tuple") {
            Some(suffix) => {
                let inner: Vec<String> = self.components.iter().map(AbiParam::canonical_type).collect();
                format!("({}){suffix}", inner.join(","))
            }
            None => self.ty.clone(),
        }
    }

    pub fn vyper_type(&self, default_max_len: u32) -> Result<VyperType, UnsupportedTypeError> {
        VyperType::from_abi_type(&self.canonical_type(), default_max_len)
    }
}

/// One entry of a contract ABI (`function`, `constructor`, `event`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiEntry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub inputs: Vec<AbiParam>,
    #[serde(default)]
    pub outputs: Vec<AbiParam>,
    #[serde(
        rename = "stateMutability",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub state_mutability: Option<StateMutability>,
}

impl AbiEntry {
    /// Functions the runners invoke: `type == "function"` with nonpayable,
    /// view or pure mutability.
    pub fn is_invocable(&self) -> bool {
        self.kind == "function"
            && matches!(
                self.state_mutability,
                Some(StateMutability::Nonpayable | StateMutability::View | StateMutability::Pure)
            )
    }

    pub fn is_constructor(&self) -> bool {
        self.kind == "constructor"
    }
}
