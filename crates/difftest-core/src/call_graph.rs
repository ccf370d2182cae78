//! Call graph resolution and emission order.
//!
//! Vyper resolves internal calls by position, so a callee has to be emitted
//! before any caller that reaches it. The order is a post-order DFS over
//! ascending function indices. An edge into a node that is still being
//! visited closes a cycle; it is skipped, the first-discovered node of the
//! cycle keeps its position, and the back-edge caller may precede its callee.

use std::collections::BTreeMap;

use difftest_types::VyperType;

use crate::ast::ContractDescription;
use crate::errors::DependencyError;

/// One function of a contract as the resolver sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDescriptor {
    pub index: usize,
    /// Declared parameter types.
    pub params: Vec<VyperType>,
    /// Call-site references in order of appearance.
    pub calls: Vec<usize>,
}

impl FunctionDescriptor {
    pub fn new(index: usize, params: Vec<VyperType>, calls: Vec<usize>) -> Self {
        Self {
            index,
            params,
            calls,
        }
    }
}

/// Function index to callee indices, built once per contract.
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    edges: BTreeMap<usize, Vec<usize>>,
    params: BTreeMap<usize, Vec<VyperType>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

impl CallGraph {
    /// Build the graph, rejecting call sites that name a missing function.
    pub fn new(functions: &[FunctionDescriptor]) -> Result<Self, DependencyError> {
        let mut edges = BTreeMap::new();
        let mut params = BTreeMap::new();
        for func in functions {
            edges.insert(func.index, func.calls.clone());
            params.insert(func.index, func.params.clone());
        }
        for func in functions {
            if let Some(&callee) = func.calls.iter().find(|c| !edges.contains_key(c)) {
                return Err(DependencyError {
                    caller: format!("func_{}", func.index),
                    callee,
                });
            }
        }
        Ok(Self { edges, params })
    }

    pub fn from_description(desc: &ContractDescription) -> Result<Self, DependencyError> {
        let descriptors: Vec<FunctionDescriptor> = desc
            .functions
            .iter()
            .enumerate()
            .map(|(index, func)| {
                FunctionDescriptor::new(index, func.params.clone(), func.call_sites())
            })
            .collect();
        Self::new(&descriptors)
    }

    pub fn callees(&self, index: usize) -> &[usize] {
        self.edges.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Declared parameter types of `index`, `None` for an unknown function.
    pub fn params(&self, index: usize) -> Option<&[VyperType]> {
        self.params.get(&index).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Every function index exactly once, callees before callers except at
    /// cycle back-edges.
    pub fn emission_order(&self) -> Vec<usize> {
        let mut marks: BTreeMap<usize, Mark> = BTreeMap::new();
        let mut order = Vec::with_capacity(self.edges.len());

        for &root in self.edges.keys() {
            if marks.contains_key(&root) {
                continue;
            }
            // Explicit stack of (node, next callee position) so deep call
            // chains cannot overflow the thread stack.
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            marks.insert(root, Mark::InProgress);

            while let Some(frame) = stack.last_mut() {
                let (node, next) = *frame;
                let callees = self.callees(node);
                if next < callees.len() {
                    frame.1 += 1;
                    let callee = callees[next];
                    if !marks.contains_key(&callee) {
                        marks.insert(callee, Mark::InProgress);
                        stack.push((callee, 0));
                    }
                    // InProgress: re-entrant edge, skipped. Done: already emitted.
                } else {
                    stack.pop();
                    marks.insert(node, Mark::Done);
                    order.push(node);
                }
            }
        }
        order
    }
}

/// Resolve the emission order of a set of functions.
pub fn resolve(functions: &[FunctionDescriptor]) -> Result<Vec<usize>, DependencyError> {
    Ok(CallGraph::new(functions)?.emission_order())
}
