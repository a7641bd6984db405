#[cfg(test)]
mod tests {
    use crate::backend::testing::RecordingBackend;
    use crate::compiler::Compiler;
    use crate::error::CompileError;
    use crate::logger::testing::MemoryLogger;
    use crate::options::CompileOptions;
    use crate::swizzle::ErrorFormat;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use tempfile::TempDir;

    const NET_TOOLS_LIB: &str = "pub mod http;\n";
    const NET_TOOLS_HTTP: &str = r#"
#[derive(Debug)]
pub struct Error(String);

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn Fetch(url: &str) -> Result<String, Error> {
    Ok(url.to_string())
}
"#;

    struct Fixture {
        root: TempDir,
        logger: Arc<MemoryLogger>,
        builds: Arc<parking_lot::Mutex<Vec<PathBuf>>>,
        compiler: Compiler,
    }

    fn write(root: &Path, rel: &str, contents: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    /// A compiler whose package root holds `net-tools` and whose backend only
    /// records invocations.
    fn fixture() -> Fixture {
        let root = TempDir::new().unwrap();
        write(
            root.path(),
            "packages/net-tools/Cargo.toml",
            "[package]\nname = \"net-tools\"\nversion = \"0.1.0\"\n",
        );
        write(root.path(), "packages/net-tools/src/lib.rs", NET_TOOLS_LIB);
        write(root.path(), "packages/net-tools/src/http.rs", NET_TOOLS_HTTP);

        let options = CompileOptions {
            build_dir: root.path().join("build"),
            output_file: root.path().join("out.bin"),
            package_paths: vec![root.path().join("packages")],
            ..CompileOptions::default()
        };
        let logger = Arc::new(MemoryLogger::default());
        let backend = RecordingBackend::default();
        let builds = backend.builds.clone();

        let mut compiler = Compiler::with_options(options);
        compiler.set_logger(logger.clone());
        compiler.set_backend(Box::new(backend));

        Fixture {
            root,
            logger,
            builds,
            compiler,
        }
    }

    impl Fixture {
        fn add(&self, name: &str, source: &str) {
            let path = write(self.root.path(), &format!("scripts/{}", name), source);
            self.compiler.add_script(path).unwrap();
        }

        fn build_file(&self, rel: &str) -> String {
            fs::read_to_string(self.root.path().join("build").join(rel)).unwrap()
        }
    }

    const DEPLOY: &str = "//native_import:net-tools::http as net\n\
                          function Deploy() {\n\
                          \x20 var body = net.Fetch(\"https://example.com\");\n\
                          \x20 return body;\n\
                          }\n";

    #[test]
    fn test_fetch_script_end_to_end() {
        let f = fixture();
        f.add("deploy.js", DEPLOY);
        f.compiler.run().unwrap();

        let units = f.compiler.units();
        let unit = &units[0];
        assert_eq!(unit.call_sites.len(), 1);
        assert_eq!(unit.bindings.len(), 1);
        let binding = &unit.bindings[0];
        assert_eq!(binding.rust_path, "net_tools::http");
        assert_eq!(binding.return_shim.delivered(), 1);
        assert_eq!(
            binding.return_shim.error.as_ref().map(|e| e.format),
            Some(ErrorFormat::Display)
        );

        let module = f.build_file("src/units/unit_deploy_js.rs");
        assert!(module.contains("pub fn __net__Fetch"));
        assert!(module.contains("runtime :: raise (& err)"));
        assert!(module.contains("registry . define (\"net\" , \"Fetch\" , __net__Fetch)"));

        let manifest = f.build_file("Cargo.toml");
        assert!(manifest.contains("net_tools = { package = \"net-tools\""));
        assert!(f.build_file("src/main.rs").contains("units::unit_deploy_js::UNIT"));
        assert!(f.build_file("src/units/mod.rs").contains("pub mod unit_deploy_js;"));
        assert!(f.build_file("src/runtime.rs").contains("pub fn run_groups"));
        assert_eq!(f.build_file("scripts/deploy.js"), DEPLOY);
        assert!(f.build_file("preload/deploy.js").contains("var SCRIPT_PRIORITY = 100;"));
        assert!(f.build_file("bundles/deploy.js.json").contains("\"rustPath\": \"net_tools::http\""));

        assert_eq!(f.builds.lock().len(), 1);
        assert!(f.logger.errors().is_empty());
    }

    #[test]
    fn test_declarations_are_shared_between_units() {
        let f = fixture();
        f.add("a.js", DEPLOY);
        f.add("b.js", DEPLOY);
        f.compiler.run().unwrap();

        assert_eq!(f.compiler.package_cache().builds(), 1);
        let units = f.compiler.units();
        assert!(Arc::ptr_eq(&units[0].packages["net"], &units[1].packages["net"]));
    }

    #[test]
    fn test_missing_packages_are_reported_together() {
        let f = fixture();
        f.add(
            "a.js",
            "//native_import:cloud-kit::s3 as s3\nfunction Deploy() {}",
        );
        f.add(
            "b.js",
            "//native_import:net-tools::http as net\n//native_import:dns as dns\nfunction Deploy() {}",
        );

        let err = f.compiler.run().unwrap_err();
        match err.root() {
            CompileError::UnresolvedPackages { paths } => {
                assert_eq!(paths, &vec!["cloud-kit::s3".to_string(), "dns".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.code(), "S-ERR-RESOLVE-001");
        assert!(f.compiler.package_cache().import_paths().is_empty());
        assert!(f.builds.lock().is_empty());
    }

    #[test]
    fn test_macro_failure_stops_the_pipeline() {
        let f = fixture();
        f.add("bad.js", "//priority:soon\nfunction Deploy() {}");
        f.add("good.js", DEPLOY);

        let err = f.compiler.run().unwrap_err();
        match &err {
            CompileError::StageFailed { stage, unit, source } => {
                assert_eq!(*stage, "process_macros");
                assert_eq!(unit, "bad.js");
                assert!(matches!(**source, CompileError::InvalidMacro { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }

        // The healthy unit finished the stage, nothing after it ran.
        let units = f.compiler.units();
        assert_eq!(units[1].macros.native_imports.len(), 1);
        assert!(units[1].imports.is_empty());
        assert!(units[1].call_sites.is_empty());
        assert!(f.compiler.priority_groups().is_none());
        assert!(!f.logger.errors().is_empty());
    }

    #[test]
    fn test_priority_groups() {
        let f = fixture();
        for (name, priority) in [("u1.js", 5), ("u2.js", 1), ("u3.js", 5), ("u4.js", 3)] {
            f.add(name, &format!("//priority:{}\nfunction Deploy() {{}}", priority));
        }
        f.compiler.run().unwrap();

        let groups = f.compiler.priority_groups().unwrap();
        assert_eq!(groups.order, vec![5, 1, 3]);
        assert_eq!(groups.get(5), &["u1.js".to_string(), "u3.js".to_string()]);
        assert_eq!(groups.get(1), &["u2.js".to_string()]);

        let main = f.build_file("src/main.rs");
        let first = main.find("(1, &[units::unit_u2_js::UNIT])").unwrap();
        let last = main
            .find("(5, &[units::unit_u1_js::UNIT, units::unit_u3_js::UNIT])")
            .unwrap();
        assert!(first < last);
    }

    #[test]
    fn test_unknown_native_function() {
        let f = fixture();
        f.add(
            "upload.js",
            "//native_import:net-tools::http as net\nfunction Deploy() {\n  net.Upload(\"x\");\n}",
        );

        let err = f.compiler.run().unwrap_err();
        assert!(matches!(
            err,
            CompileError::StageFailed { stage: "swizzle_native_calls", .. }
        ));
        match err.root() {
            CompileError::UnknownNativeFunction { namespace, name, location, .. } => {
                assert_eq!(namespace, "net");
                assert_eq!(name, "Upload");
                assert_eq!(location.line, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!f.root.path().join("build/Cargo.toml").exists());
    }

    #[test]
    fn test_literal_mismatch_fails_sanity_check() {
        let f = fixture();
        f.add(
            "typo.js",
            "//native_import:net-tools::http as net\nfunction Deploy() { net.Fetch(42); }",
        );

        let err = f.compiler.run().unwrap_err();
        assert!(matches!(
            err,
            CompileError::StageFailed { stage: "sanity_check_swizzles", .. }
        ));
        assert_eq!(err.code(), "S-ERR-BIND-002");
        assert!(err.to_string().contains("net.Fetch"));
    }

    #[test]
    fn test_backend_failure_is_reported() {
        let mut f = fixture();
        f.compiler.set_backend(Box::new(RecordingBackend {
            fail_with: Some("error[E0425]: cannot find value".to_string()),
            ..RecordingBackend::default()
        }));
        f.add("deploy.js", DEPLOY);

        let err = f.compiler.run().unwrap_err();
        match &err {
            CompileError::Backend { diagnostics, .. } => {
                assert!(diagnostics.contains("E0425"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!f.root.path().join("out.bin").exists());
    }

    #[test]
    fn test_duplicate_script_names() {
        let f = fixture();
        f.add("deploy.js", DEPLOY);
        let other = write(f.root.path(), "elsewhere/deploy.js", DEPLOY);
        let err = f.compiler.add_script(other).unwrap_err();
        assert!(matches!(err, CompileError::DuplicateScript { ref file } if file == "deploy.js"));
        assert_eq!(f.compiler.units().len(), 1);
    }

    #[test]
    fn test_module_name_collision_is_rejected() {
        let f = fixture();
        f.add("a-b.js", DEPLOY);
        let err = f
            .compiler
            .add_script(write(f.root.path(), "scripts/a_b.js", DEPLOY))
            .unwrap_err();
        match &err {
            CompileError::ModuleNameCollision {
                file,
                existing,
                module,
            } => {
                assert_eq!(file, "a_b.js");
                assert_eq!(existing, "a-b.js");
                assert_eq!(module, "unit_a_b_js");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.code(), "S-ERR-INGEST-005");

        let upper = write(f.root.path(), "scripts/A-B.js", DEPLOY);
        assert!(matches!(
            f.compiler.add_script(upper),
            Err(CompileError::ModuleNameCollision { .. })
        ));
        assert_eq!(f.compiler.units().len(), 1);
    }

    #[test]
    fn test_empty_build() {
        let f = fixture();
        let err = f.compiler.run().unwrap_err();
        assert!(matches!(err, CompileError::NoUnits));
        assert_eq!(err.guarantee(), "A build always contains at least one script.");
    }
}
