#![allow(clippy::option_if_let_else)]

//! Shared fixtures for flatjit tests: a geometry type universe built in code,
//! plus JSON metadata descriptions under the workspace `test_data/` directory.

use std::path::PathBuf;

use flatjit_common::{
    Dispatch, FieldType, Kind, Metadata, MetadataDescription, MethodId, MethodMeta, TypeId,
};
use once_cell::sync::Lazy;

pub(crate) static WORKSPACE_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    let mut current = PathBuf::from(env!("CARGO_MANIFEST_DIR"));

    loop {
        if current.join("Cargo.toml").exists() {
            let cargo_toml = std::fs::read_to_string(current.join("Cargo.toml"))
                .expect("Failed to read Cargo.toml");
            if cargo_toml.contains("[workspace]") {
                return current;
            }
        }

        current = current
            .parent()
            .expect("Could not find workspace root")
            .to_path_buf();
    }
});

pub fn test_data_path() -> PathBuf {
    WORKSPACE_ROOT.join("test_data")
}

/// Get the path to a test fixture file relative to the test_data directory
///
/// ## Arguments
/// * `name` - The relative path to the fixture file (e.g., "metadata/geometry.json")
pub fn fixture_path(name: &str) -> PathBuf {
    test_data_path().join(name)
}

/// Read the contents of a test fixture file
pub fn read_fixture(name: &str) -> String {
    let path = fixture_path(name);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read fixture '{}': {}", path.display(), e))
}

/// List all JSON fixtures in a given subdirectory
pub fn list_fixtures(subdir: &str) -> Vec<String> {
    let dir_path = test_data_path().join(subdir);

    let mut names: Vec<String> = std::fs::read_dir(&dir_path)
        .unwrap_or_else(|e| panic!("Failed to read directory '{}': {}", dir_path.display(), e))
        .filter_map(|entry| {
            entry.ok().and_then(|e| {
                let path = e.path();
                if path.extension()?.to_str()? == "json" {
                    path.file_name()?.to_str().map(String::from)
                } else {
                    None
                }
            })
        })
        .collect();
    names.sort();
    names
}

/// Builds metadata from a JSON fixture
pub fn load_metadata(name: &str) -> Metadata {
    MetadataDescription::from_json(&read_fixture(name))
        .and_then(|description| description.build())
        .unwrap_or_else(|e| panic!("Invalid metadata fixture '{name}': {e}"))
}

/// Installs a test-friendly `tracing` subscriber that also captures `log` records.
/// Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The geometry type universe used across the test suites
///
/// | type | shape | notes |
/// |---|---|---|
/// | `Point` | value | `x: int @16`, `y: int @20`, nullable usages allowed |
/// | `Pair` | value | same layout as `Point`, distinct type |
/// | `Line` | value, null-free | flat `start: Point!`, flat `end: Point!` |
/// | `Measure` | value | `value: double`, `count: long` |
/// | `Labeled` | value | `label: Node`, `origin: Point` (reference leaves) |
/// | `Chain` | value | `id: int`, `next: Chain` (self-referential reference) |
/// | `Empty` | value | no fields |
/// | `Node` | identity | `next: Node`, `value: long` |
/// | `Shape` | abstract | may or may not be a value |
/// | `Container` | identity | `tag: int`, flat nullable `p: Point`, flat `q: Point!`, `owner: Node` |
/// | `Holder` | identity | flat nullable `item: Labeled` (reference leaves behind a marker) |
#[derive(Debug, Clone)]
pub struct Geometry {
    pub metadata: Metadata,
    pub point: TypeId,
    pub pair: TypeId,
    pub line: TypeId,
    pub measure: TypeId,
    pub labeled: TypeId,
    pub chain: TypeId,
    pub empty: TypeId,
    pub node: TypeId,
    pub shape: TypeId,
    pub container: TypeId,
    pub holder: TypeId,
    /// `Point![]`, flat
    pub points: TypeId,
    /// `Point[]`, flat with a null marker per element
    pub nullable_points: TypeId,
    /// `Point[]`, references
    pub point_refs: TypeId,
    /// `static Point! Point.mirror(Point!)`: returns `(y, x)`
    pub mirror: MethodId,
    /// `static Point Point.identity(Point)`: returns its argument
    pub identity: MethodId,
    /// `int Point.sum()`
    pub sum: MethodId,
    /// `Point! Point.translate(int)` dispatched at runtime
    pub translate: MethodId,
    /// `static long Line.length2(Line!)`
    pub length2: MethodId,
}

impl Geometry {
    pub fn new() -> Self {
        let mut metadata = Metadata::new();

        let node = metadata
            .declare("Node", flatjit_common::TypeShape::Identity)
            .expect("Node");
        let shape = metadata
            .declare("Shape", flatjit_common::TypeShape::Abstract)
            .expect("Shape");
        let point = metadata
            .value_class("Point")
            .field("x", Kind::Int)
            .field("y", Kind::Int)
            .build()
            .expect("Point");
        let pair = metadata
            .value_class("Pair")
            .field("x", Kind::Int)
            .field("y", Kind::Int)
            .build()
            .expect("Pair");
        let line = metadata
            .value_class("Line")
            .null_free(true)
            .flat("start", point, true)
            .flat("end", point, true)
            .build()
            .expect("Line");
        let measure = metadata
            .value_class("Measure")
            .field("value", Kind::Double)
            .field("count", Kind::Long)
            .build()
            .expect("Measure");
        let labeled = metadata
            .value_class("Labeled")
            .reference("label", node, false)
            .reference("origin", point, false)
            .build()
            .expect("Labeled");
        let chain = metadata
            .declare("Chain", flatjit_common::TypeShape::Value)
            .expect("Chain");
        metadata
            .layout_class(
                chain,
                vec![
                    flatjit_common::FieldSpec {
                        name: "id".to_string(),
                        ty: FieldType::Primitive(Kind::Int),
                        flat: false,
                        null_free: true,
                    },
                    flatjit_common::FieldSpec {
                        name: "next".to_string(),
                        ty: FieldType::Reference(chain),
                        flat: false,
                        null_free: false,
                    },
                ],
            )
            .expect("Chain layout");
        let empty = metadata.value_class("Empty").build().expect("Empty");
        metadata
            .layout_class(
                node,
                vec![
                    flatjit_common::FieldSpec {
                        name: "next".to_string(),
                        ty: FieldType::Reference(node),
                        flat: false,
                        null_free: false,
                    },
                    flatjit_common::FieldSpec {
                        name: "value".to_string(),
                        ty: FieldType::Primitive(Kind::Long),
                        flat: false,
                        null_free: true,
                    },
                ],
            )
            .expect("Node layout");
        let container = metadata
            .identity_class("Container")
            .field("tag", Kind::Int)
            .flat("p", point, false)
            .flat("q", point, true)
            .reference("owner", node, false)
            .build()
            .expect("Container");
        let holder = metadata
            .identity_class("Holder")
            .flat("item", labeled, false)
            .build()
            .expect("Holder");

        let point_ty = FieldType::Reference(point);
        let points = metadata.array_of(point_ty, true, true).expect("Point![]");
        let nullable_points = metadata.array_of(point_ty, true, false).expect("Point[]#flat");
        let point_refs = metadata.array_of(point_ty, false, false).expect("Point[]");

        let mirror = metadata
            .add_method(
                MethodMeta::new("mirror", point, Dispatch::Static)
                    .with_param(point_ty, true)
                    .with_return(point_ty, true),
            )
            .expect("mirror");
        let identity = metadata
            .add_method(
                MethodMeta::new("identity", point, Dispatch::Static)
                    .with_param(point_ty, false)
                    .with_return(point_ty, false),
            )
            .expect("identity");
        let sum = metadata
            .add_method(
                MethodMeta::new("sum", point, Dispatch::Direct)
                    .with_return(FieldType::Primitive(Kind::Int), true),
            )
            .expect("sum");
        let translate = metadata
            .add_method(
                MethodMeta::new("translate", point, Dispatch::Virtual)
                    .with_param(FieldType::Primitive(Kind::Int), true)
                    .with_return(point_ty, true),
            )
            .expect("translate");
        let length2 = metadata
            .add_method(
                MethodMeta::new("length2", line, Dispatch::Static)
                    .with_param(FieldType::Reference(line), true)
                    .with_return(FieldType::Primitive(Kind::Long), true),
            )
            .expect("length2");

        Self {
            metadata,
            point,
            pair,
            line,
            measure,
            labeled,
            chain,
            empty,
            node,
            shape,
            container,
            holder,
            points,
            nullable_points,
            point_refs,
            mirror,
            identity,
            sum,
            translate,
            length2,
        }
    }

    /// Offset of a declared field
    pub fn offset(&self, ty: TypeId, field: &str) -> u32 {
        self.metadata
            .ty(ty)
            .field(field)
            .unwrap_or_else(|| panic!("no field '{field}'"))
            .offset
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new()
    }
}
