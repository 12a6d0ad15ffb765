//! The compilation driver.
//!
//! Owns the options, orchestrates the pipeline (source, tokens, AST,
//! bytecode, passes, LLVM, output file) and invokes the external linker
//! for executable and shared library outputs. Diagnostics are rendered
//! here through the source map; the process exit code is the only thing
//! the binary layer has to forward.

use std::path::{Path, PathBuf};
use std::process::Command;

use inkwell::context::Context;
use inkwell::targets::{InitializationConfig, Target as LlvmTarget};

use crate::bytecode::PassManager;
use crate::codegen::LlvmCodegen;
use crate::errors::{Error, Result};
use crate::irgen;
use crate::language::State;
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::source_map::Span;
use crate::target::Target;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Object,
    LlvmIr,
    LlvmBitcode,
    Assembly,
    Executable,
    SharedLibrary,
}

impl OutputFormat {
    /// Output file extension; empty for executables.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Object => "o",
            OutputFormat::LlvmIr => "ll",
            OutputFormat::LlvmBitcode => "bc",
            OutputFormat::Assembly => "s",
            OutputFormat::Executable => "",
            OutputFormat::SharedLibrary => {
                if cfg!(windows) {
                    "lib"
                } else {
                    "so"
                }
            }
        }
    }

    pub fn str(self) -> &'static str {
        match self {
            OutputFormat::Object => "object",
            OutputFormat::LlvmIr => "LLVM IR",
            OutputFormat::LlvmBitcode => "LLVM bitcode",
            OutputFormat::Assembly => "assembly",
            OutputFormat::Executable => "executable",
            OutputFormat::SharedLibrary => "shared library",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationLevel {
    O0,
    O1,
    O2,
    O3,
    Os,
    Oz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MangleStyle {
    Full,
    Minimal,
    None,
}

pub struct CompilerOptions {
    /// The first file is the compilation unit; any further inputs are
    /// handed to the linker as additional object files.
    pub files: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub entry: String,
    pub target: Option<String>,

    pub imports: Vec<PathBuf>,
    pub library_names: Vec<String>,
    pub library_paths: Vec<String>,
    pub linker: Option<String>,
    /// Extra linker options as `(flag, value)`; value may be empty.
    pub extras: Vec<(String, String)>,

    pub format: OutputFormat,
    pub optimization: OptimizationLevel,
    pub mangle_style: MangleStyle,

    pub verbose: bool,
    pub no_libc: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            files: Vec::new(),
            output: None,
            entry: "main".into(),
            target: None,
            imports: Vec::new(),
            library_names: Vec::new(),
            library_paths: Vec::new(),
            linker: None,
            extras: Vec::new(),
            format: OutputFormat::Executable,
            optimization: OptimizationLevel::O2,
            mangle_style: MangleStyle::Minimal,
            verbose: false,
            no_libc: false,
        }
    }
}

pub struct Compiler {
    options: CompilerOptions,
}

impl Compiler {
    pub fn new(options: CompilerOptions) -> Self {
        Compiler { options }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    fn input_file(&self) -> &Path {
        &self.options.files[0]
    }

    fn output_path(&self) -> PathBuf {
        if let Some(output) = &self.options.output {
            return output.clone();
        }

        let extension = self.options.format.extension();
        if extension.is_empty() {
            self.input_file().with_extension("")
        } else {
            self.input_file().with_extension(extension)
        }
    }

    fn linker(&self) -> String {
        if let Some(linker) = &self.options.linker {
            return linker.clone();
        }

        if self.options.no_libc {
            "ld".into()
        } else {
            "cc".into()
        }
    }

    pub fn linker_arguments(&self, object: &Path, output: &Path) -> Vec<String> {
        let mut args = vec!["-o".to_string(), output.to_string_lossy().into_owned()];

        if self.options.entry != "main" || self.linker() == "ld" {
            args.push("-e".into());
            args.push(self.options.entry.clone());
        }

        for (flag, value) in &self.options.extras {
            args.push(flag.clone());
            if !value.is_empty() {
                args.push(value.clone());
            }
        }

        args.push(object.to_string_lossy().into_owned());
        for file in &self.options.files[1..] {
            args.push(file.to_string_lossy().into_owned());
        }

        for name in &self.options.library_names {
            args.push(format!("-l{name}"));
        }
        for path in &self.options.library_paths {
            args.push(format!("-L{path}"));
        }

        if self.options.format == OutputFormat::SharedLibrary {
            args.push("-shared".into());
        }

        args
    }

    /// Run the whole pipeline; 0 on success, 1 after a reported error.
    pub fn compile(&self) -> i32 {
        let target = match &self.options.target {
            Some(triple) => Target::new(triple.clone()),
            None => Target::host(),
        };

        let mut state = State::new(target);

        match self.run(&mut state) {
            Ok(()) => 0,
            Err(error) => {
                eprintln!("{}", state.sources.format_error(&error));
                1
            }
        }
    }

    fn run(&self, state: &mut State) -> Result<()> {
        if self.options.files.is_empty() {
            return Err(Error::new(Span::default(), "no input files"));
        }

        let file = self.input_file();
        state.entry_name = self.options.entry.clone();
        state.mangle_style = self.options.mangle_style;
        state.import_paths = self.options.imports.clone();
        state.library_path = std::env::var_os("QUARTZ_PATH").map(PathBuf::from);
        state.root_dir = file.parent().map(|parent| parent.to_path_buf());

        log::info!("compiling '{}'", file.display());

        let source = state.sources.load(file).map_err(|error| {
            Error::new(
                Span::default(),
                format!("could not read '{}': {error}", file.display()),
            )
        })?;
        let code = state.sources.get(source).unwrap().code().to_string();

        let tokens = Lexer::new(&code, source).lex()?;
        let ast = Parser::new(tokens).parse()?;

        irgen::generate(state, &ast)?;
        PassManager::default_passes().run(state);

        let module_name = file
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "module".into());

        let context = Context::create();
        let mut codegen = LlvmCodegen::new(&context, &module_name);
        codegen.generate(state)?;

        let output = self.output_path();
        let needs_link = matches!(
            self.options.format,
            OutputFormat::Executable | OutputFormat::SharedLibrary
        );

        let emit_path = if needs_link {
            output.with_extension("o")
        } else {
            output.clone()
        };

        log::info!(
            "emitting {} to '{}'",
            self.options.format.str(),
            emit_path.display()
        );
        codegen.emit(&self.options, &emit_path)?;

        if needs_link {
            self.link(&emit_path, &output)?;
        }

        Ok(())
    }

    fn link(&self, object: &Path, output: &Path) -> Result<()> {
        let linker = self.linker();
        let args = self.linker_arguments(object, output);

        log::info!("linking with '{linker} {}'", args.join(" "));

        let status = Command::new(&linker)
            .args(&args)
            .status()
            .map_err(|error| {
                Error::new(
                    Span::default(),
                    format!("could not invoke linker '{linker}': {error}"),
                )
            })?;

        if !status.success() {
            return Err(Error::new(
                Span::default(),
                format!(
                    "linker '{linker}' exited with status {}",
                    status.code().unwrap_or(-1)
                ),
            ));
        }

        Ok(())
    }
}

/// Print every target LLVM was built with a backend for.
pub fn print_all_targets() {
    LlvmTarget::initialize_all(&InitializationConfig::default());

    // Probing by name is the stable way to enumerate without reaching into
    // LLVM's registry directly.
    const CANDIDATES: &[&str] = &[
        "aarch64", "arm", "avr", "bpf", "hexagon", "lanai", "loongarch", "mips", "msp430",
        "nvptx", "powerpc", "riscv32", "riscv64", "sparc", "systemz", "wasm32", "wasm64", "x86",
        "x86-64", "xcore",
    ];

    println!("available targets:");
    for name in CANDIDATES {
        if let Some(target) = LlvmTarget::from_name(name) {
            let description = target.get_description().to_string_lossy().into_owned();
            println!("  {name:<12} {description}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(format: OutputFormat) -> CompilerOptions {
        CompilerOptions {
            files: vec![PathBuf::from("demo.qr")],
            format,
            ..CompilerOptions::default()
        }
    }

    #[test]
    fn test_output_extension_follows_format() {
        assert_eq!(
            Compiler::new(options(OutputFormat::LlvmIr)).output_path(),
            PathBuf::from("demo.ll")
        );
        assert_eq!(
            Compiler::new(options(OutputFormat::Object)).output_path(),
            PathBuf::from("demo.o")
        );
        assert_eq!(
            Compiler::new(options(OutputFormat::Executable)).output_path(),
            PathBuf::from("demo")
        );
    }

    #[test]
    fn test_linker_arguments() {
        let mut opts = options(OutputFormat::Executable);
        opts.library_names = vec!["m".into()];
        opts.library_paths = vec!["/opt/lib".into()];

        let compiler = Compiler::new(opts);
        let args = compiler.linker_arguments(Path::new("demo.o"), Path::new("demo"));

        assert_eq!(
            args,
            vec!["-o", "demo", "demo.o", "-lm", "-L/opt/lib"]
        );
    }

    #[test]
    fn test_linker_arguments_with_custom_entry() {
        let mut opts = options(OutputFormat::SharedLibrary);
        opts.entry = "start".into();

        let compiler = Compiler::new(opts);
        let args = compiler.linker_arguments(Path::new("demo.o"), Path::new("libdemo.so"));

        assert!(args.contains(&"-e".to_string()));
        assert!(args.contains(&"start".to_string()));
        assert_eq!(args.last().unwrap(), "-shared");
    }

    #[test]
    fn test_no_libc_switches_to_ld() {
        let mut opts = options(OutputFormat::Executable);
        opts.no_libc = true;

        let compiler = Compiler::new(opts);
        assert_eq!(compiler.linker(), "ld");
        // ld always receives an explicit entry symbol.
        let args = compiler.linker_arguments(Path::new("a.o"), Path::new("a"));
        assert!(args.contains(&"-e".to_string()));
    }
}
