use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;

use tracing_subscriber::EnvFilter;
use viper::diagnostic::{render_diagnostics, Diagnostic};
use viper::typecheck::StorageLayoutOverride;
use viper::{
    check_code, compile_code, render_output, BuiltinInterfaces, CompileOptions, DirectoryResolver,
    OutputFormat, ResolverChain,
};

#[derive(Parser)]
#[command(
    name = "viper",
    version,
    about = "Compiler for a statically typed, Python-like contract language"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a contract and print the selected outputs
    Build {
        /// Input .vy file (or IR text with --ir-in)
        input: PathBuf,
        /// Comma-separated outputs: abi, ir, ir-unopt, layout, method_ids, gas
        #[arg(short = 'f', long, value_delimiter = ',', default_value = "abi")]
        format: Vec<OutputFormat>,
        /// JSON file pinning storage variables to slots
        #[arg(long, value_name = "PATH")]
        storage_layout: Option<PathBuf>,
        /// Skip the IR optimizer
        #[arg(long)]
        no_optimize: bool,
        /// Directory searched for imported interfaces (repeatable)
        #[arg(short = 'p', long = "path", value_name = "DIR")]
        paths: Vec<PathBuf>,
        /// Treat the input as IR text: validate, optimize and print it
        #[arg(long)]
        ir_in: bool,
    },
    /// Type-check a contract without generating code
    Check {
        /// Input .vy file
        input: PathBuf,
        /// Directory searched for imported interfaces (repeatable)
        #[arg(short = 'p', long = "path", value_name = "DIR")]
        paths: Vec<PathBuf>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Build {
            input,
            format,
            storage_layout,
            no_optimize,
            paths,
            ir_in,
        } => {
            if ir_in {
                cmd_ir(&input, !no_optimize);
            } else {
                cmd_build(&input, &format, storage_layout, no_optimize, paths);
            }
        }
        Command::Check { input, paths } => cmd_check(&input, paths),
    }
}

fn read_file(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", path.display(), e);
            process::exit(1);
        }
    }
}

fn fail(diagnostics: &[Diagnostic], input: &Path, source: &str) -> ! {
    render_diagnostics(diagnostics, &input.display().to_string(), source);
    process::exit(1);
}

/// Import search starts next to the input, then the `-p` directories,
/// then the built-in interfaces.
fn options_for(input: &Path, paths: Vec<PathBuf>) -> CompileOptions {
    let mut roots = Vec::new();
    if let Some(dir) = input.parent() {
        roots.push(dir.to_path_buf());
    }
    roots.extend(paths);
    let resolver = ResolverChain::new()
        .with(DirectoryResolver::new(roots))
        .with(BuiltinInterfaces);
    CompileOptions::default().with_resolver(resolver)
}

// --- viper build ---

fn cmd_build(
    input: &Path,
    formats: &[OutputFormat],
    storage_layout: Option<PathBuf>,
    no_optimize: bool,
    paths: Vec<PathBuf>,
) {
    let source = read_file(input);
    let mut options = options_for(input, paths);
    options.optimize = !no_optimize;
    options.emit_unoptimized = formats.contains(&OutputFormat::UnoptimizedIr);
    if let Some(path) = storage_layout {
        let text = read_file(&path);
        match serde_json::from_str::<StorageLayoutOverride>(&text) {
            Ok(layout) => options = options.with_storage_layout(layout),
            Err(e) => {
                eprintln!("error: invalid storage layout '{}': {}", path.display(), e);
                process::exit(1);
            }
        }
    }

    let output = match compile_code(&source, &options) {
        Ok(output) => output,
        Err(errors) => fail(&errors, input, &source),
    };
    for (i, format) in formats.iter().enumerate() {
        if formats.len() > 1 {
            if i > 0 {
                println!();
            }
            println!("// {}", format.name());
        }
        println!("{}", render_output(&output, *format));
    }
}

// --- viper build --ir-in ---

fn cmd_ir(input: &Path, optimize: bool) {
    let text = read_file(input);
    let tree = match viper::ir::parse_ir(&text) {
        Ok(tree) => tree,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };
    let tree = if optimize {
        match viper::ir::optimize(&tree) {
            Ok(tree) => tree,
            Err(e) => {
                eprintln!("error: {}", e);
                process::exit(1);
            }
        }
    } else {
        tree
    };
    println!("{:#}", tree);
    eprintln!("gas: {}", tree.gas);
}

// --- viper check ---

fn cmd_check(input: &Path, paths: Vec<PathBuf>) {
    let source = read_file(input);
    let options = options_for(input, paths);
    match check_code(&source, &options) {
        Ok(analysis) => {
            eprintln!(
                "OK: {} ({} functions, {} storage variables)",
                input.display(),
                analysis.contract.functions.len(),
                analysis.contract.storage.len()
            );
        }
        Err(errors) => fail(&errors, input, &source),
    }
}
