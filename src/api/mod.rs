//! Public compilation API: source text in, analysis results, IR and the
//! derived interface descriptions out.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{info, instrument};

use crate::ast::Module;
use crate::diagnostic::Diagnostic;
use crate::ir::IrNode;
use crate::typecheck::{Analysis, ImportResolver, StorageLayoutOverride};

mod pipeline;
mod resolver;
mod tools;
#[cfg(test)]
mod tests;

pub use resolver::{BuiltinInterfaces, DirectoryResolver, ResolverChain};
pub use tools::{render_output, OutputFormat};

/// Options controlling compilation.
pub struct CompileOptions {
    /// Run the IR optimizer over the generated tree.
    pub optimize: bool,
    /// Pin storage variables to explicit slots instead of allocating them.
    pub storage_layout: Option<StorageLayoutOverride>,
    /// Source of imported interfaces. Defaults to the built-in ones.
    pub resolver: Option<Box<dyn ImportResolver>>,
    /// Keep the IR as generated next to the optimized tree.
    pub emit_unoptimized: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            optimize: true,
            storage_layout: None,
            resolver: None,
            emit_unoptimized: false,
        }
    }
}

impl CompileOptions {
    pub fn unoptimized() -> Self {
        Self {
            optimize: false,
            ..Self::default()
        }
    }

    pub fn with_resolver(mut self, resolver: impl ImportResolver + 'static) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    pub fn with_storage_layout(mut self, layout: StorageLayoutOverride) -> Self {
        self.storage_layout = Some(layout);
        self
    }
}

/// Everything produced by one compilation.
#[derive(Clone, Debug)]
pub struct CompilerOutput {
    pub module: Module,
    /// Contract information and the type of every expression node.
    pub analysis: Analysis,
    /// Root IR: `(seq <constructor> (deploy <runtime> ..))`.
    pub ir: IrNode,
    /// The tree before optimization, when requested or when the optimizer
    /// was disabled.
    pub unoptimized_ir: Option<IrNode>,
    pub abi: Value,
    /// Signature to `0x`-prefixed method id.
    pub method_identifiers: BTreeMap<String, String>,
    pub layout: Value,
    /// Upper gas bound per function body.
    pub function_gas: BTreeMap<String, u64>,
}

impl CompilerOutput {
    /// The deployed code's IR.
    pub fn runtime_ir(&self) -> Option<&IrNode> {
        self.ir
            .iter()
            .find(|n| n.is_op("deploy"))
            .and_then(|d| d.args.first())
    }
}

/// Compile a contract.
#[instrument(skip_all, fields(bytes = source.len()))]
pub fn compile_code(source: &str, options: &CompileOptions) -> Result<CompilerOutput, Vec<Diagnostic>> {
    let module = pipeline::parse(source)?;
    let analysis = pipeline::analyze(&module, options)?;
    let program = crate::codegen::generate(&analysis).map_err(|d| vec![d])?;

    let ir = if options.optimize {
        crate::ir::optimize(&program.ir).map_err(|e| vec![Diagnostic::from(e)])?
    } else {
        program.ir.clone()
    };
    let unoptimized_ir = (options.emit_unoptimized || !options.optimize).then(|| program.ir.clone());

    let abi = pipeline::abi(&analysis);
    let method_identifiers = pipeline::method_identifiers(&analysis);
    let layout = analysis.contract.layout.to_json();
    info!(
        functions = analysis.contract.functions.len(),
        gas = ir.gas,
        optimized = options.optimize,
        "compiled contract"
    );
    Ok(CompilerOutput {
        module,
        analysis,
        ir,
        unoptimized_ir,
        abi,
        method_identifiers,
        layout,
        function_gas: program.function_gas,
    })
}

/// Parse and analyze without generating code.
pub fn check_code(source: &str, options: &CompileOptions) -> Result<Analysis, Vec<Diagnostic>> {
    let module = pipeline::parse(source)?;
    pipeline::analyze(&module, options)
}
