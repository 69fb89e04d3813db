//! Schema store
//!
//! Holds the schema documents that describe every data model. Schemas are
//! embedded into the binary at compile time and may be supplemented from a
//! directory on disk. Documents are indexed by `$id` and by short name so
//! that `{"$ref": "ref_common-1.0.0"}` resolves the way schema authors
//! write it.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock, RwLock};

use include_dir::{include_dir, Dir};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{DataModelError, Result};

static EMBEDDED_SCHEMAS: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/schemas");

/// Maximum `$ref` nesting before a reference is treated as cyclic
const MAX_REF_DEPTH: usize = 32;

/// Collection of raw schema documents plus a cache of resolved ones
#[derive(Debug, Default)]
pub struct SchemaStore {
    /// `$id` -> raw document
    by_id: HashMap<String, JsonValue>,
    /// Short name (last `$id` segment) -> `$id`s carrying it
    by_name: HashMap<String, Vec<String>>,
    /// `$id` -> document with all references inlined
    resolved: RwLock<HashMap<String, Arc<JsonValue>>>,
}

impl SchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store containing every schema shipped with the crate
    pub fn embedded() -> Result<Self> {
        let mut store = Self::new();
        let mut files: Vec<(&Path, &str)> = Vec::new();
        collect_embedded_files(&EMBEDDED_SCHEMAS, &mut files);
        for (path, content) in files {
            let json: JsonValue =
                serde_json::from_str(content).map_err(|e| DataModelError::SchemaLoad {
                    uri: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            store.insert(json)?;
        }
        debug!(count = store.len(), "loaded embedded schemas");
        Ok(store)
    }

    /// Add every `*.json` schema found below `dir`
    pub fn load_directory(&mut self, dir: &Path) -> Result<usize> {
        let mut added = 0;
        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() || path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            let content = fs::read_to_string(path)?;
            let json: JsonValue =
                serde_json::from_str(&content).map_err(|e| DataModelError::SchemaLoad {
                    uri: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            self.insert(json)?;
            added += 1;
        }
        debug!(dir = %dir.display(), added, "loaded schema directory");
        Ok(added)
    }

    /// Add one schema document. It must carry a string `$id`.
    pub fn insert(&mut self, schema: JsonValue) -> Result<()> {
        let id = schema
            .get("$id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| DataModelError::SchemaLoad {
                uri: "<unknown>".to_string(),
                reason: "schema has no $id".to_string(),
            })?;
        if self.by_id.contains_key(&id) {
            warn!(%id, "replacing schema");
        } else {
            self.by_name.entry(short_name(&id).to_string()).or_default().push(id.clone());
        }
        self.by_id.insert(id, schema);
        if let Ok(mut cache) = self.resolved.write() {
            cache.clear();
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.by_id.contains_key(uri)
    }

    /// All schema ids, sorted
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.by_id.keys().map(String::as_str).collect();
        ids.sort();
        ids
    }

    /// The raw document as authored, references untouched
    pub fn load_schema(&self, uri: &str) -> Result<&JsonValue> {
        self.by_id.get(uri).ok_or_else(|| DataModelError::SchemaLoad {
            uri: uri.to_string(),
            reason: "schema not found".to_string(),
        })
    }

    /// Find the `$id` a reference points at, seen from schema `base`
    pub fn resolve_ref(&self, base: &str, reference: &str) -> Option<&str> {
        if let Some((id, _)) = self.by_id.get_key_value(reference) {
            return Some(id);
        }
        if let Some((dir, _)) = base.rsplit_once('/') {
            let joined = format!("{}/{}", dir, reference);
            if let Some((id, _)) = self.by_id.get_key_value(&joined) {
                return Some(id);
            }
        }
        match self.by_name.get(reference).map(Vec::as_slice) {
            Some([only]) => Some(only),
            _ => None,
        }
    }

    /// Self-contained schema for `uri`: every `$ref` inlined, `$id` and
    /// `$schema` stripped.
    pub fn resolve(&self, uri: &str) -> Result<Arc<JsonValue>> {
        if let Some(hit) = self.resolved.read().ok().and_then(|c| c.get(uri).cloned()) {
            return Ok(hit);
        }
        let raw = self.load_schema(uri)?;
        let mut stack = vec![uri.to_string()];
        let inlined = Arc::new(self.inline(raw, uri, &mut stack)?);
        if let Ok(mut cache) = self.resolved.write() {
            cache.insert(uri.to_string(), Arc::clone(&inlined));
        }
        Ok(inlined)
    }

    fn inline(&self, value: &JsonValue, base: &str, stack: &mut Vec<String>) -> Result<JsonValue> {
        match value {
            JsonValue::Object(map) => {
                if let Some(reference) = map.get("$ref").and_then(|r| r.as_str()) {
                    let target = self.resolve_ref(base, reference).ok_or_else(|| {
                        DataModelError::SchemaLoad {
                            uri: base.to_string(),
                            reason: format!("unresolved $ref '{}'", reference),
                        }
                    })?;
                    if stack.iter().any(|s| s == target) || stack.len() >= MAX_REF_DEPTH {
                        return Err(DataModelError::SchemaLoad {
                            uri: base.to_string(),
                            reason: format!("cyclic $ref '{}'", reference),
                        });
                    }
                    let target = target.to_string();
                    let raw = self.load_schema(&target)?;
                    stack.push(target.clone());
                    let mut inlined = self.inline(raw, &target, stack)?;
                    stack.pop();

                    // Keywords written next to the $ref still apply
                    let siblings: Map<String, JsonValue> = map
                        .iter()
                        .filter(|(k, _)| !matches!(k.as_str(), "$ref" | "$id" | "$schema"))
                        .map(|(k, v)| -> Result<(String, JsonValue)> {
                            Ok((k.clone(), self.inline(v, base, stack)?))
                        })
                        .collect::<Result<_>>()?;
                    if !siblings.is_empty() {
                        inlined = JsonValue::Object(
                            [(
                                "allOf".to_string(),
                                JsonValue::Array(vec![inlined, JsonValue::Object(siblings)]),
                            )]
                            .into_iter()
                            .collect(),
                        );
                    }
                    return Ok(inlined);
                }
                let mut out = Map::with_capacity(map.len());
                for (k, v) in map {
                    if k == "$id" || k == "$schema" {
                        continue;
                    }
                    out.insert(k.clone(), self.inline(v, base, stack)?);
                }
                Ok(JsonValue::Object(out))
            }
            JsonValue::Array(items) => Ok(JsonValue::Array(
                items
                    .iter()
                    .map(|v| self.inline(v, base, stack))
                    .collect::<Result<_>>()?,
            )),
            other => Ok(other.clone()),
        }
    }
}

/// Subschema governing `key` inside a resolved object schema.
///
/// Looks at `properties` on the schema itself and inside every `allOf`
/// member. Several hits combine into one `allOf`.
pub fn property_fragment(schema: &JsonValue, key: &str) -> Option<JsonValue> {
    let mut hits = Vec::new();
    collect_property(schema, key, &mut hits);
    match hits.len() {
        0 => None,
        1 => hits.pop(),
        _ => Some(JsonValue::Object(
            [("allOf".to_string(), JsonValue::Array(hits))].into_iter().collect(),
        )),
    }
}

fn collect_property(schema: &JsonValue, key: &str, hits: &mut Vec<JsonValue>) {
    if let Some(prop) = schema.get("properties").and_then(|p| p.get(key)) {
        hits.push(prop.clone());
    }
    if let Some(members) = schema.get("allOf").and_then(|a| a.as_array()) {
        for member in members {
            collect_property(member, key, hits);
        }
    }
}

fn short_name(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

fn collect_embedded_files<'a>(dir: &'a Dir<'static>, files: &mut Vec<(&'a Path, &'a str)>) {
    for file in dir.files() {
        let path = file.path();
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            if let Some(content) = file.contents_utf8() {
                files.push((path, content));
            }
        }
    }

    for subdir in dir.dirs() {
        collect_embedded_files(subdir, files);
    }
}

static STORE: OnceLock<SchemaStore> = OnceLock::new();

/// Install a custom store. Fails if the process-wide store already exists.
pub fn init_schema_store(store: SchemaStore) -> std::result::Result<(), SchemaStore> {
    STORE.set(store)
}

/// Process-wide schema store, built from the embedded schemas on first use.
pub fn schema_store() -> Result<&'static SchemaStore> {
    if let Some(store) = STORE.get() {
        return Ok(store);
    }
    let store = SchemaStore::embedded()?;
    Ok(STORE.get_or_init(|| store))
}
