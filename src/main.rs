use std::path::PathBuf;
use std::process::exit;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::error;

use quartz_lib::{Compiler, CompilerOptions, MangleStyle, OptimizationLevel, OutputFormat};

#[derive(Parser, Debug)]
#[command(name = "qrc", version, about = "Compiler for the Quartz programming language.")]
struct Cli {
    /// Input files; the first is compiled, the rest are linked in.
    files: Vec<PathBuf>,

    /// Enable verbose output.
    #[arg(long)]
    verbose: bool,

    /// Do not link libc into the final executable.
    #[arg(long = "no-libc")]
    no_libc: bool,

    /// Print all available targets and exit.
    #[arg(long = "print-all-targets")]
    print_all_targets: bool,

    /// Run the program after compiling it instead of emitting a file.
    #[arg(long)]
    jit: bool,

    /// Optimization level used for code generation.
    #[arg(short = 'O', value_name = "LEVEL", default_value = "2")]
    optimization: String,

    /// Output format.
    #[arg(long, value_enum, default_value_t = FormatArg::Exe)]
    format: FormatArg,

    /// Symbol mangling style.
    #[arg(long = "mangle-style", value_enum, default_value_t = MangleArg::Minimal)]
    mangle_style: MangleArg,

    /// Program entry point.
    #[arg(long, default_value = "main")]
    entry: String,

    /// Output path; derived from the input file and format by default.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Target triple; defaults to the host.
    #[arg(long)]
    target: Option<String>,

    /// Import search path (repeatable).
    #[arg(short = 'I', value_name = "PATH")]
    imports: Vec<PathBuf>,

    /// Library to link against (repeatable).
    #[arg(short = 'l', value_name = "NAME")]
    libraries: Vec<String>,

    /// Library search path for the linker (repeatable).
    #[arg(short = 'L', value_name = "PATH")]
    library_paths: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    /// Emit LLVM IR.
    LlvmIr,
    /// Emit LLVM bitcode.
    LlvmBc,
    /// Emit assembly code.
    Asm,
    /// Emit object code.
    Obj,
    /// Emit an executable (default).
    Exe,
    /// Emit a shared library.
    Shared,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::LlvmIr => OutputFormat::LlvmIr,
            FormatArg::LlvmBc => OutputFormat::LlvmBitcode,
            FormatArg::Asm => OutputFormat::Assembly,
            FormatArg::Obj => OutputFormat::Object,
            FormatArg::Exe => OutputFormat::Executable,
            FormatArg::Shared => OutputFormat::SharedLibrary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum MangleArg {
    Full,
    Minimal,
    None,
}

impl From<MangleArg> for MangleStyle {
    fn from(arg: MangleArg) -> Self {
        match arg {
            MangleArg::Full => MangleStyle::Full,
            MangleArg::Minimal => MangleStyle::Minimal,
            MangleArg::None => MangleStyle::None,
        }
    }
}

fn parse_optimization(level: &str) -> Option<OptimizationLevel> {
    match level {
        "0" => Some(OptimizationLevel::O0),
        "1" => Some(OptimizationLevel::O1),
        "2" => Some(OptimizationLevel::O2),
        "3" => Some(OptimizationLevel::O3),
        "s" => Some(OptimizationLevel::Os),
        "z" => Some(OptimizationLevel::Oz),
        _ => None,
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let level = if args.verbose {
        log::Level::Debug
    } else {
        log::Level::Warn
    };
    simple_logger::init_with_level(level)?;

    if args.print_all_targets {
        quartz_lib::compiler::print_all_targets();
        return Ok(());
    }

    if args.jit {
        error!("JIT execution is not supported in this build");
        exit(1);
    }

    if args.files.is_empty() {
        error!("no input files");
        exit(1);
    }

    let Some(optimization) = parse_optimization(&args.optimization) else {
        error!("invalid optimization level '-O{}'", args.optimization);
        exit(1);
    };

    let options = CompilerOptions {
        files: args.files,
        output: args.output,
        entry: args.entry,
        target: args.target,
        imports: args.imports,
        library_names: args.libraries,
        library_paths: args.library_paths,
        linker: None,
        extras: Vec::new(),
        format: args.format.into(),
        optimization,
        mangle_style: args.mangle_style.into(),
        verbose: args.verbose,
        no_libc: args.no_libc,
    };

    exit(Compiler::new(options).compile());
}
