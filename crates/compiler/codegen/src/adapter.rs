//! Call-site adapters: what a caller holding every argument boxed runs around
//! a call to the entry the planner picked for it.

use flatjit_common::MethodId;
use flatjit_compiler_mir::{CompilationContext, EntryKind, PrettyPrint};

use crate::{decode_return, unpack, CallLayout, CodegenResult, MacroAssembler, MachineCode};

#[derive(Debug, Clone)]
pub struct CallSiteAdapter {
    pub method: MethodId,
    pub name: String,
    /// Layout of the boxed arguments the caller holds
    pub current: CallLayout,
    /// Layout the called entry expects
    pub expected: CallLayout,
    /// Runs before the call
    pub arguments: MachineCode,
    /// Runs after the call when the entry returns a tagged value
    pub returns: Option<(CallLayout, MachineCode)>,
}

/// Builds the adapter for a call to `method`
pub fn call_site_adapter(
    ctx: CompilationContext<'_>,
    method: MethodId,
    statically_bound: bool,
) -> CodegenResult<CallSiteAdapter> {
    let plan = ctx.plan(method)?;
    let entry = plan.entry_for_call(statically_bound);
    let current = CallLayout::arguments(&plan, EntryKind::Boxed);
    let expected = CallLayout::arguments(&plan, entry);
    let arguments = unpack(&plan, &current, &expected)?;

    let returns = match &plan.ret {
        Some(ret) if plan.return_scalarized_in(entry) => {
            let layout = CallLayout::returns(&plan, entry)?;
            let mut masm = MacroAssembler::new();
            decode_return(&mut masm, ret, &layout)?;
            Some((layout, masm.finish()?))
        }
        _ => None,
    };

    log::debug!(
        "adapter for {}: {} argument instructions",
        plan.name,
        arguments.len()
    );
    Ok(CallSiteAdapter {
        method,
        name: plan.name.clone(),
        current,
        expected,
        arguments,
        returns,
    })
}

impl PrettyPrint for CallSiteAdapter {
    fn pretty_print(&self, indent: usize) -> String {
        let base = "  ".repeat(indent);
        let code = |code: &MachineCode| {
            code.to_asm()
                .lines()
                .map(|line| format!("{base}  {line}\n"))
                .collect::<String>()
        };

        let mut result = format!(
            "{base}adapter {}: {:?} -> {:?}\n",
            self.name, self.current.entry, self.expected.entry
        );
        result.push_str(&format!("{base}current:\n"));
        result.push_str(&self.current.pretty_print(indent + 1));
        result.push_str(&format!("{base}expected:\n"));
        result.push_str(&self.expected.pretty_print(indent + 1));
        result.push_str(&format!("{base}arguments:\n"));
        result.push_str(&code(&self.arguments));
        if let Some((layout, decode)) = &self.returns {
            result.push_str(&format!("{base}returns:\n"));
            result.push_str(&layout.pretty_print(indent + 1));
            result.push_str(&code(decode));
        }
        result
    }
}
