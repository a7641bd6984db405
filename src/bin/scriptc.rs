//! Script compiler CLI
//!
//! Compiles automation scripts and the native packages they import into one
//! binary.
//!
//! ```text
//! scriptc --output ./automations --package-path ./packages main.js watchdog.js
//! ```

use clap::Parser;
use scriptc::{CompileOptions, Compiler, TracingLogger};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "scriptc", version, about = "Compile automation scripts to a native binary")]
struct Cli {
    /// Scripts to compile. Each file name must be unique.
    #[arg(required = true)]
    scripts: Vec<PathBuf>,

    /// JSON file with compile options. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Target operating system.
    #[arg(long)]
    os: Option<String>,

    /// Target architecture.
    #[arg(long)]
    arch: Option<String>,

    #[arg(long)]
    build_dir: Option<PathBuf>,

    /// Where the finished binary is copied.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory holding installed native packages. Repeatable.
    #[arg(long = "package-path", env = "SCRIPTC_PACKAGE_PATH", value_delimiter = ':')]
    package_paths: Vec<PathBuf>,

    #[arg(long)]
    minify: bool,

    /// Build the program in debug mode.
    #[arg(long)]
    debug: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn options(&self) -> scriptc::Result<CompileOptions> {
        let mut options = match &self.config {
            Some(path) => CompileOptions::from_json_file(path)?,
            None => CompileOptions::default(),
        };
        if let Some(os) = &self.os {
            options.os = os.clone();
        }
        if let Some(arch) = &self.arch {
            options.arch = arch.clone();
        }
        if let Some(dir) = &self.build_dir {
            options.build_dir = dir.clone();
        }
        if let Some(output) = &self.output {
            options.output_file = output.clone();
        }
        if !self.package_paths.is_empty() {
            options.package_paths = self.package_paths.clone();
        }
        options.minify_scripts |= self.minify;
        if self.debug {
            options.release = false;
        }
        Ok(options)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(io::stderr)
        .init();

    match compile(&cli) {
        Ok(output) => {
            eprintln!("Compiled {} script(s) into {}", cli.scripts.len(), output.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error[{}]: {}", e.code(), e);
            eprintln!("  guarantee: {}", e.guarantee());
            ExitCode::FAILURE
        }
    }
}

fn compile(cli: &Cli) -> scriptc::Result<PathBuf> {
    let mut compiler = Compiler::with_options(cli.options()?);
    compiler.set_logger(Arc::new(TracingLogger));
    for script in &cli.scripts {
        compiler.add_script(script)?;
    }
    compiler.run()?;
    Ok(compiler.options().output_file.clone())
}
