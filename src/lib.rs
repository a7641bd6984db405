//! # scriptc
//!
//! Compiles a set of independent automation scripts, plus the native packages
//! they bind through `//native_import:` macros, into one Cargo project and then
//! into one static binary.
//!
//! ## Pipeline Invariants
//!
//! 1. **Stage Ordering**: stages run in the fixed order of [`compiler::STAGES`].
//!    A stage starts only after every unit finished the previous one, and the
//!    first failing stage ends the build.
//!
//! 2. **Full Join**: inside a stage every unit runs to completion even when
//!    another unit already failed. The reported error is the first failure in
//!    registration order, tagged with the stage name.
//!
//! 3. **Aggregate Resolution**: missing native packages are reported together,
//!    one error listing every unresolved import path (S-ERR-RESOLVE-001).
//!
//! 4. **Shared Declarations**: each distinct import path is parsed exactly once
//!    and shared read-only between units.
//!
//! 5. **Deterministic Bindings**: a binding depends only on its call-site and the
//!    declaration table. The same inputs give the same descriptors and the same
//!    shim text.
//!
//! 6. **Error Channel**: only the final flattened return position, and only when
//!    it is the `Err` arm of a `Result`, is raised as a script exception.
//!
//! 7. **Priority Groups**: derived once at the entry point stage; distinct
//!    priorities keep first-encounter order, the generated program runs them
//!    lowest first.

pub mod backend;
pub mod cache;
pub mod codegen;
pub mod compiler;
pub mod declarations;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod finalize;
pub mod logger;
pub mod macros;
pub mod obfuscate;
pub mod options;
pub mod parallel;
pub mod priority;
pub mod sanity_check;
pub mod swizzle;
pub mod types;
pub mod unit;
pub mod visitor;

#[cfg(test)]
mod compiler_tests;

pub use backend::{CargoBackend, NativeBackend};
pub use compiler::Compiler;
pub use error::{CompileError, Result};
pub use logger::{Logger, NullLogger, TracingLogger};
pub use obfuscate::{NoopObfuscator, Obfuscator};
pub use options::CompileOptions;
pub use priority::PriorityGroups;
pub use swizzle::{Binding, Conversion};
