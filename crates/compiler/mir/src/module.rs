//! # MIR Module
//!
//! Every compiled entry of every method of one compilation, plus auxiliary
//! functions such as bound substitutability snippets. Calls between entries
//! are resolved through [`CallTarget`]s.

use index_vec::IndexVec;
use rustc_hash::FxHashMap;

use flatjit_common::MethodId;

use crate::{indent_str, CallTarget, FunctionId, MirFunction, PrettyPrint};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MirModule {
    pub functions: IndexVec<FunctionId, MirFunction>,

    /// Method entry -> function implementing it
    pub entries: FxHashMap<CallTarget, FunctionId>,
}

impl MirModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a function, registering it as the implementation of its entry if
    /// it belongs to a method
    pub fn add_function(&mut self, function: MirFunction) -> FunctionId {
        let target = function.method.map(|method| CallTarget {
            method,
            entry: function.entry,
        });
        let function_id = self.functions.push(function);
        if let Some(target) = target {
            self.entries.insert(target, function_id);
        }
        function_id
    }

    /// The function implementing a method entry
    pub fn lookup_entry(&self, target: CallTarget) -> Option<&MirFunction> {
        self.entries
            .get(&target)
            .and_then(|id| self.functions.get(*id))
    }

    /// All compiled entries of a method
    pub fn entries_of(&self, method: MethodId) -> impl Iterator<Item = &MirFunction> {
        self.functions
            .iter()
            .filter(move |function| function.method == Some(method))
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Checks that every registered entry points at a function compiled for
    /// that entry, and that every function is well formed
    pub fn validate(&self) -> Result<(), String> {
        for (target, &id) in &self.entries {
            let function = self
                .functions
                .get(id)
                .ok_or_else(|| format!("Entry {target:?} references missing function {id:?}"))?;
            if function.method != Some(target.method) || function.entry != target.entry {
                return Err(format!(
                    "Entry {target:?} is implemented by '{}' compiled for {:?}",
                    function.name, function.entry
                ));
            }
        }

        for function in &self.functions {
            function
                .validate()
                .map_err(|err| format!("Function {} validation failed: {err}", function.name))?;
        }
        Ok(())
    }
}

impl PrettyPrint for MirModule {
    fn pretty_print(&self, indent: usize) -> String {
        let mut result = format!("{}module {{\n", indent_str(indent));
        for function in &self.functions {
            result.push_str(&function.pretty_print(indent + 1));
            result.push('\n');
        }
        result.push_str(&format!("{}}}\n", indent_str(indent)));
        result
    }
}
