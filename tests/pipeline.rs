//! End-to-end pipeline scenarios, exercised through the public
//! [`sfc_compiler::Engine`] seam rather than its internal stages directly.

use sfc_compiler::hmr::HmrDirective;
use sfc_compiler::pipeline::CompileMode;
use sfc_compiler::testutil::ScratchProject;
use sfc_compiler::Error;

#[test]
fn simple_typed_script_dev_mode() {
    let project = ScratchProject::new().unwrap();
    let path = project.add_source("x.ts", "export const x: number = 42; export default x;").unwrap();
    let engine = sfc_compiler::Engine::builder(project.root()).build();

    let output = engine.compile_path(&path).unwrap();
    assert!(output.artifact.contains("export const x = 42"));
    assert!(output.artifact.contains("export default x"));
}

#[test]
fn sfc_with_template_and_typed_script_component_reloads() {
    let project = ScratchProject::new().unwrap();
    let path = project
        .add_source(
            "App.sfc",
            r#"<template><div>{{msg}}</div></template><script setup lang="typed">const msg: string = 'hi';</script>"#,
        )
        .unwrap();
    let engine = sfc_compiler::Engine::builder(project.root()).build();

    let output = engine.compile_path(&path).unwrap();
    assert!(matches!(output.hmr_action, HmrDirective::ComponentReload { .. }));
}

#[test]
fn alias_rewrite_resolves_existing_file_and_warns_on_missing() {
    let project = ScratchProject::with_config(r#"{"alias_map": [["@/*", "src/*"]]}"#).unwrap();
    project.add_source("src/util.ts", "export const noop = () => {};").unwrap();
    let path = project.add_source("entry.ts", r#"import x from "@/util"; export default x;"#).unwrap();
    let engine = sfc_compiler::Engine::builder(project.root()).build();

    let output = engine.compile_path(&path).unwrap();
    assert!(output.artifact.contains(r#"import x from "/src/util.ts""#), "{}", output.artifact);

    let missing_path = project
        .add_source("entry2.ts", r#"import y from "@/missing"; export default y;"#)
        .unwrap();
    let output2 = engine.compile_path(&missing_path).unwrap();
    assert!(!output2.diagnostics.is_empty());
}

#[test]
fn cache_invalidation_on_configuration_change() {
    let project = ScratchProject::with_config(r#"{"production": false}"#).unwrap();
    let path = project.add_source("a.ts", "export const x = 1;").unwrap();
    let engine = sfc_compiler::Engine::builder(project.root()).build();

    let first = engine.compile_path(&path).unwrap();

    std::fs::write(project.root().join("project.config.json"), r#"{"production": true}"#).unwrap();
    // mtime must observably change for the config cache to invalidate.
    std::thread::sleep(std::time::Duration::from_millis(10));
    filetime_touch(&project.root().join("project.config.json"));

    let second = engine.compile_path(&path).unwrap();
    // Both remain independently retrievable; production mode at minimum
    // exercises a different code path (minification) than dev mode.
    assert!(first.artifact.len() >= second.artifact.len());
}

#[test]
fn integrity_failure_stops_propagation() {
    let project = ScratchProject::new().unwrap();
    // Trips the balanced-bracket structure check: one stray closing brace.
    let path = project.add_source("broken.ts", "export const x = 1; }").unwrap();
    let engine = sfc_compiler::Engine::builder(project.root()).build();

    let err = engine.compile_path(&path).unwrap_err();
    assert!(matches!(err, Error::SyntaxError { .. } | Error::IntegrityFailure { .. }));
    assert_eq!(engine.cache().stats().entries, 0);
}

#[test]
fn worker_pool_resilience_under_saturation() {
    let project = ScratchProject::with_config(r#"{"type_check": true}"#).unwrap();
    let mut paths = Vec::new();
    for i in 0..200 {
        paths.push(
            project
                .add_source(&format!("f{i}.ts"), &format!("export const v{i}: number = {i};"))
                .unwrap(),
        );
    }
    let engine = sfc_compiler::Engine::builder(project.root()).build();

    let results = engine.compile_many_paths(&paths, CompileMode::Batch);
    let succeeded = results.iter().filter(|(_, r)| r.is_ok()).count();
    assert!(succeeded as f64 / results.len() as f64 >= 0.95);
}

fn filetime_touch(path: &std::path::Path) {
    let now = std::time::SystemTime::now();
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(now).unwrap();
}
