//! Native build backend.
//!
//! The packaged build directory is a complete Cargo project. The backend
//! compiles it for the configured target and places the binary at the output
//! path. Diagnostics are passed through untouched; on failure the raw stderr
//! ends up in [`CompileError::Backend`].

use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

use crate::error::{CompileError, Result};
use crate::options::CompileOptions;

/// Name of the generated Cargo package and its binary.
pub const PROGRAM_NAME: &str = "scriptc_program";

pub trait NativeBackend: Send + Sync {
    fn build(&self, options: &CompileOptions) -> Result<()>;
}

/// Rust target triple for an `os`/`arch` pair, if it is a known one.
pub fn target_triple(os: &str, arch: &str) -> Option<String> {
    let arch = match arch {
        "amd64" | "x86_64" => "x86_64",
        "arm64" | "aarch64" => "aarch64",
        "386" | "x86" | "i686" => "i686",
        _ => return None,
    };
    let suffix = match os {
        "linux" => "unknown-linux-gnu",
        "darwin" | "macos" => "apple-darwin",
        "windows" => "pc-windows-msvc",
        "freebsd" => "unknown-freebsd",
        _ => return None,
    };
    Some(format!("{}-{}", arch, suffix))
}

/// Runs `cargo build` inside the build directory.
#[derive(Debug, Clone)]
pub struct CargoBackend {
    pub cargo: PathBuf,
}

impl Default for CargoBackend {
    fn default() -> Self {
        Self {
            cargo: std::env::var_os("CARGO")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("cargo")),
        }
    }
}

impl CargoBackend {
    fn artifact_path(&self, options: &CompileOptions, triple: Option<&str>) -> PathBuf {
        let mut path = options.build_dir.join("target");
        if let Some(triple) = triple {
            path.push(triple);
        }
        path.push(if options.release { "release" } else { "debug" });
        let mut name = PROGRAM_NAME.to_string();
        if options.os == "windows" {
            name.push_str(".exe");
        }
        path.join(name)
    }
}

impl NativeBackend for CargoBackend {
    fn build(&self, options: &CompileOptions) -> Result<()> {
        let triple = target_triple(&options.os, &options.arch);
        let mut command = Command::new(&self.cargo);
        command
            .arg("build")
            .current_dir(&options.build_dir)
            .env("SCRIPTC_TARGET_OS", &options.os)
            .env("SCRIPTC_TARGET_ARCH", &options.arch)
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped());
        if options.release {
            command.arg("--release");
        }
        if let Some(triple) = &triple {
            command.env("CARGO_BUILD_TARGET", triple);
        }

        info!(dir = %options.build_dir.display(), target = ?triple, "invoking native build");
        let mut child = command
            .spawn()
            .map_err(|e| CompileError::io(format!("cannot run {}", self.cargo.display()), e))?;

        // Tee stderr: stream it through and keep it for the error report.
        let mut diagnostics = String::new();
        if let Some(stderr) = child.stderr.take() {
            let mut sink = io::stderr();
            for line in BufReader::new(stderr).lines() {
                let line =
                    line.map_err(|e| CompileError::io("cannot read native build output", e))?;
                let _ = writeln!(sink, "{}", line);
                diagnostics.push_str(&line);
                diagnostics.push('\n');
            }
        }

        let status = child
            .wait()
            .map_err(|e| CompileError::io("native build did not finish", e))?;
        if !status.success() {
            return Err(CompileError::Backend {
                status: status.to_string(),
                diagnostics,
            });
        }

        let artifact = self.artifact_path(options, triple.as_deref());
        copy_artifact(&artifact, &options.output_file)?;
        debug!(output = %options.output_file.display(), "native binary written");
        Ok(())
    }
}

fn copy_artifact(artifact: &Path, output: &Path) -> Result<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| CompileError::io(format!("cannot create {}", parent.display()), e))?;
    }
    fs::copy(artifact, output).map_err(|e| {
        CompileError::io(
            format!(
                "cannot copy {} to {}",
                artifact.display(),
                output.display()
            ),
            e,
        )
    })?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::NativeBackend;
    use crate::error::{CompileError, Result};
    use crate::options::CompileOptions;
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::sync::Arc;

    /// Records invocations instead of compiling. `builds` is shared so tests
    /// can keep a handle after the backend is boxed into a compiler.
    #[derive(Default)]
    pub struct RecordingBackend {
        pub builds: Arc<Mutex<Vec<PathBuf>>>,
        pub fail_with: Option<String>,
    }

    impl NativeBackend for RecordingBackend {
        fn build(&self, options: &CompileOptions) -> Result<()> {
            self.builds.lock().push(options.build_dir.clone());
            match &self.fail_with {
                Some(diagnostics) => Err(CompileError::Backend {
                    status: "exit status: 101".to_string(),
                    diagnostics: diagnostics.clone(),
                }),
                None => Ok(()),
            }
        }
    }
}
