//! Host tests against the JSON geometry fixture

use std::io::Write;
use std::sync::Arc;

use flatjit_compiler::{CompilationHost, HostError};
use flatjit_compiler_mir::{EntryKind, PrettyPrint};
use flatjit_test_utils::{fixture_path, init_tracing};
use rayon::prelude::*;

fn geometry_host() -> CompilationHost {
    init_tracing();
    CompilationHost::from_files(&fixture_path("metadata/geometry.json"), None)
        .expect("geometry fixture loads")
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_plan_static_method() {
    let host = geometry_host();
    let plan = host.plan("Point.mirror").unwrap();

    assert!(!plan.has_receiver);
    assert_eq!(plan.params.len(), 1);
    assert!(plan.params[0].is_scalarized());
    assert!(plan.return_scalarized());
    assert_eq!(plan.entries(), vec![EntryKind::Scalarized, EntryKind::Boxed]);

    let text = plan.pretty_print(0);
    assert!(text.starts_with("Point.mirror\n"));
    assert!(text.contains("param 0: "));
    assert!(text.contains("scalarized {x: int, y: int}"));
    assert!(!text.contains("not_null"));
}

#[test]
fn test_plan_nullable_parameter_carries_not_null() {
    let host = geometry_host();
    let plan = host.plan("Container.swap").unwrap();

    assert!(plan.has_receiver);
    assert!(!plan.receiver_scalarized());
    assert!(plan.params[1].is_scalarized());
    assert!(plan
        .pretty_print(0)
        .contains("scalarized {x: int, y: int, not_null: boolean}"));
}

#[test]
fn test_unknown_method() {
    let host = geometry_host();
    assert!(matches!(
        host.plan("Point.missing"),
        Err(HostError::UnknownMethod(name)) if name == "Point.missing"
    ));
    assert!(matches!(
        host.adapter("mirror", true),
        Err(HostError::UnknownMethod(_))
    ));
}

#[test]
fn test_missing_metadata_file() {
    let result = CompilationHost::from_files(&fixture_path("metadata/absent.json"), None);
    assert!(matches!(result, Err(HostError::Io { .. })));
}

#[test]
fn test_config_disables_scalarization() {
    let config = config_file("inline_types_enabled = false\n");
    let host = CompilationHost::from_files(
        &fixture_path("metadata/geometry.json"),
        Some(config.path()),
    )
    .unwrap();

    assert!(!host.config().inline_types_enabled);
    let plan = host.plan("Point.mirror").unwrap();
    assert!(!plan.is_scalarized());
    assert_eq!(plan.entries(), vec![EntryKind::Boxed]);
    assert!(!plan.pretty_print(0).contains("scalarized"));
}

#[test]
fn test_config_keeps_defaults_for_missing_keys() {
    let config = config_file("max_scalarized_slots = 2\n");
    let host = CompilationHost::from_files(
        &fixture_path("metadata/geometry.json"),
        Some(config.path()),
    )
    .unwrap();

    assert_eq!(host.config().max_scalarized_slots, 2);
    assert_eq!(host.config().max_substitutability_depth, 3);
}

#[test]
fn test_invalid_config() {
    let config = config_file("scalarize_everything = true\n");
    let result = CompilationHost::from_files(
        &fixture_path("metadata/geometry.json"),
        Some(config.path()),
    );
    assert!(matches!(result, Err(HostError::Config(_))));
}

#[test]
fn test_mirror_adapter() {
    let host = geometry_host();
    let adapter = host.adapter("Point.mirror", true).unwrap();

    assert_eq!(adapter.current.entry, EntryKind::Boxed);
    assert_eq!(adapter.expected.entry, EntryKind::Scalarized);
    assert!(adapter.returns.is_some());

    let listing = adapter
        .arguments
        .to_asm()
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    insta::assert_snapshot!(listing, @r"
    mov rsi, dword [rdi+20]
    mov rdi, dword [rdi+16]
    ");
    assert!(adapter
        .pretty_print(0)
        .starts_with("adapter Point.mirror: Boxed -> Scalarized\n"));
}

#[test]
fn test_virtual_call_keeps_receiver_boxed() {
    let host = geometry_host();
    let adapter = host.adapter("Line.reversed", false).unwrap();

    assert_eq!(adapter.expected.entry, EntryKind::ScalarizedReceiverBoxed);
    assert!(adapter.arguments.is_empty());
    assert!(adapter.returns.is_some());

    let bound = host.adapter("Line.reversed", true).unwrap();
    assert_eq!(bound.expected.entry, EntryKind::Scalarized);
    assert!(!bound.arguments.is_empty());
}

#[test]
fn test_plan_all_follows_declaration_order() {
    let host = geometry_host();
    let names: Vec<String> = host
        .plan_all()
        .unwrap()
        .iter()
        .map(|plan| plan.name.clone())
        .collect();
    assert_eq!(
        names,
        vec!["Point.mirror", "Point.sum", "Line.reversed", "Container.swap"]
    );
    assert_eq!(host.context().signatures.len(), 4);
}

#[test]
fn test_concurrent_compilations_share_cached_results() {
    let host = geometry_host();
    let point = host.metadata().lookup("Point").unwrap();
    let names = ["Point.mirror", "Container.swap", "Line.reversed"];

    let results: Vec<_> = (0..96)
        .into_par_iter()
        .map(|i| {
            let plan = host.plan(names[i % names.len()]).unwrap();
            let descriptor = host.context().describe(point).unwrap();
            (i % names.len(), plan, descriptor)
        })
        .collect();

    let first_descriptor = &results[0].2;
    for (index, plan, descriptor) in &results {
        let expected = host.plan(names[*index]).unwrap();
        assert!(Arc::ptr_eq(plan, &expected));
        assert!(Arc::ptr_eq(descriptor, first_descriptor));
    }
    assert_eq!(host.context().signatures.len(), names.len());
}
