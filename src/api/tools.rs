//! Output selection for the command line: which parts of a compilation to
//! print, and how.

use std::fmt::Write as _;
use std::str::FromStr;

use super::CompilerOutput;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Abi,
    Ir,
    UnoptimizedIr,
    Layout,
    MethodIds,
    Gas,
}

impl OutputFormat {
    pub fn name(self) -> &'static str {
        match self {
            OutputFormat::Abi => "abi",
            OutputFormat::Ir => "ir",
            OutputFormat::UnoptimizedIr => "ir-unopt",
            OutputFormat::Layout => "layout",
            OutputFormat::MethodIds => "method_ids",
            OutputFormat::Gas => "gas",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "abi" => Ok(OutputFormat::Abi),
            "ir" => Ok(OutputFormat::Ir),
            "ir-unopt" | "ir_unopt" => Ok(OutputFormat::UnoptimizedIr),
            "layout" => Ok(OutputFormat::Layout),
            "method_ids" | "method-ids" => Ok(OutputFormat::MethodIds),
            "gas" => Ok(OutputFormat::Gas),
            other => Err(format!(
                "unknown output format '{}' (expected abi, ir, ir-unopt, layout, method_ids or gas)",
                other
            )),
        }
    }
}

fn pretty_json(value: &impl serde::Serialize) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|err| format!("<unprintable: {}>", err))
}

/// Render one output of a compilation.
pub fn render_output(output: &CompilerOutput, format: OutputFormat) -> String {
    match format {
        OutputFormat::Abi => pretty_json(&output.abi),
        OutputFormat::Ir => format!("{:#}", output.ir),
        OutputFormat::UnoptimizedIr => match &output.unoptimized_ir {
            Some(ir) => format!("{:#}", ir),
            None => format!("{:#}", output.ir),
        },
        OutputFormat::Layout => pretty_json(&output.layout),
        OutputFormat::MethodIds => pretty_json(&output.method_identifiers),
        OutputFormat::Gas => {
            let width = output.function_gas.keys().map(String::len).max().unwrap_or(0);
            let mut out = String::new();
            for (name, gas) in &output.function_gas {
                let _ = writeln!(out, "{:<width$}  {}", name, gas, width = width);
            }
            out
        }
    }
}
