//! Target engine version detection.
//!
//! `v0` scripts run the legacy three-hook lifecycle; `v1` scripts expose a single
//! `Deploy` entry point.

use oxc_ast::ast::Statement;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{CompileError, Result};
use crate::unit::ScriptUnit;

const LEGACY_HOOKS: [&str; 3] = ["BeforeDeploy", "Deploy", "AfterDeploy"];
const ENTRY_POINT: &str = "Deploy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineVersion {
    V0,
    V1,
}

impl EngineVersion {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "v0" | "0" => Some(EngineVersion::V0),
            "v1" | "1" => Some(EngineVersion::V1),
            _ => None,
        }
    }

    /// Functions the runtime calls, in call order.
    pub fn entry_points(self) -> &'static [&'static str] {
        match self {
            EngineVersion::V0 => &LEGACY_HOOKS,
            EngineVersion::V1 => &[ENTRY_POINT],
        }
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineVersion::V0 => write!(f, "v0"),
            EngineVersion::V1 => write!(f, "v1"),
        }
    }
}

/// Works out which engine a unit targets and checks that its entry points exist.
pub fn detect_version(unit: &ScriptUnit) -> Result<EngineVersion> {
    let declared: HashSet<String> = unit.tree.with_program(|program| {
        program
            .body
            .iter()
            .filter_map(|stmt| match stmt {
                Statement::FunctionDeclaration(func) => {
                    func.id.as_ref().map(|id| id.name.to_string())
                }
                _ => None,
            })
            .collect()
    });

    let version = match unit.macros.engine {
        Some(version) => version,
        None if LEGACY_HOOKS.iter().all(|h| declared.contains(*h)) => EngineVersion::V0,
        None => EngineVersion::V1,
    };

    let missing: Vec<&str> = version
        .entry_points()
        .iter()
        .copied()
        .filter(|name| !declared.contains(*name))
        .collect();

    if !missing.is_empty() {
        return Err(CompileError::MissingEntryPoint {
            unit: unit.file_name.clone(),
            message: format!(
                "engine {} requires top-level function(s) {}",
                version,
                missing.join(", ")
            ),
        });
    }

    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::process_macros;
    use std::path::PathBuf;

    fn unit(source: &str) -> ScriptUnit {
        let mut unit =
            ScriptUnit::from_source("t.js", PathBuf::from("/tmp/t.js"), source.to_string())
                .unwrap();
        unit.macros = process_macros(&unit.tree).unwrap();
        unit
    }

    #[test]
    fn test_single_deploy_is_v1() {
        let u = unit("function Deploy() { return true; }");
        assert_eq!(detect_version(&u).unwrap(), EngineVersion::V1);
    }

    #[test]
    fn test_three_hooks_is_v0() {
        let u = unit(
            "function BeforeDeploy() {}\nfunction Deploy() {}\nfunction AfterDeploy() {}",
        );
        assert_eq!(detect_version(&u).unwrap(), EngineVersion::V0);
    }

    #[test]
    fn test_explicit_engine_must_have_hooks() {
        let u = unit("//engine:v0\nfunction Deploy() {}");
        let err = detect_version(&u).unwrap_err();
        assert!(err.to_string().contains("BeforeDeploy"));
    }

    #[test]
    fn test_missing_deploy_fails() {
        let u = unit("var x = 1;");
        assert!(matches!(
            detect_version(&u),
            Err(CompileError::MissingEntryPoint { .. })
        ));
    }
}
