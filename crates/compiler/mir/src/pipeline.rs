//! Compilation pipeline: build every entry of a method, optimize while value
//! objects are virtual, then materialize and lower what is left.

use flatjit_common::MethodId;

use crate::passes::{FixedPoint, MAX_ITERATIONS};
use crate::{
    CompilationContext, CompileError, CompileResult, EntryKind, LowerComparisons, Lowered,
    MaterializeInlineValues, MirBuilder, MirFunction, MirModule, MirPass, PassManager, Validation,
    Value,
};

/// The body of a method, written against a builder.
///
/// Receives the method's arguments (receiver first); those the entry passes
/// scalarized arrive as inline values. Returns the result, or
/// `Lowered::Deoptimized` when the body ended in a deoptimization.
pub trait MethodBody {
    fn build(
        &self,
        builder: &mut MirBuilder<'_>,
        args: &[Value],
    ) -> CompileResult<Lowered<Option<Value>>>;
}

impl<F> MethodBody for F
where
    F: Fn(&mut MirBuilder<'_>, &[Value]) -> CompileResult<Lowered<Option<Value>>>,
{
    fn build(
        &self,
        builder: &mut MirBuilder<'_>,
        args: &[Value],
    ) -> CompileResult<Lowered<Option<Value>>> {
        self(builder, args)
    }
}

/// Builds one entry of `method` without optimizing it
pub fn build_entry(
    ctx: CompilationContext<'_>,
    method: MethodId,
    entry: EntryKind,
    body: &dyn MethodBody,
) -> CompileResult<MirFunction> {
    let (mut builder, args) = MirBuilder::for_method(ctx, method, entry)?;
    if let Lowered::Value(result) = body.build(&mut builder, &args)? {
        builder.return_value(result)?;
    }
    Ok(builder.finish())
}

/// Builds and optimizes every entry the plan of `method` calls for
pub fn compile_method(
    ctx: CompilationContext<'_>,
    method: MethodId,
    body: &dyn MethodBody,
) -> CompileResult<Vec<MirFunction>> {
    let plan = ctx.plan(method)?;
    plan.entries()
        .into_iter()
        .map(|entry| {
            let mut function = build_entry(ctx, method, entry, body)?;
            optimize_function(ctx, &mut function)?;
            Ok(function)
        })
        .collect()
}

/// Compiles a set of methods into one module whose calls resolve among them
pub fn compile_module<'b>(
    ctx: CompilationContext<'_>,
    methods: impl IntoIterator<Item = (MethodId, &'b dyn MethodBody)>,
) -> CompileResult<MirModule> {
    let mut module = MirModule::new();
    for (method, body) in methods {
        for function in compile_method(ctx, method, body)? {
            module.add_function(function);
        }
    }
    Ok(module)
}

/// Runs the value-object pipeline on `function`, failing on the first error
pub fn optimize_function(
    ctx: CompilationContext<'_>,
    function: &mut MirFunction,
) -> CompileResult<()> {
    let validation_error = |function: &MirFunction, message: String| CompileError::Validation {
        function: function.name.clone(),
        message,
    };
    Validation::new()
        .check(function)
        .map_err(|message| validation_error(function, message))?;

    FixedPoint::new(PassManager::virtual_pipeline(ctx), MAX_ITERATIONS).run(function);

    let mut materialize = MaterializeInlineValues::new(ctx);
    materialize.run(function);
    if let Some(error) = materialize.take_error() {
        return Err(error);
    }

    let mut lower = LowerComparisons::new();
    lower.run(function);
    if let Some(error) = lower.take_error() {
        return Err(error);
    }

    FixedPoint::new(PassManager::cleanup_pipeline(), MAX_ITERATIONS).run(function);

    Validation::lowered()
        .check(function)
        .map_err(|message| validation_error(function, message))?;
    log::debug!(
        "optimized '{}': {} blocks",
        function.name,
        function.block_count()
    );
    Ok(())
}
