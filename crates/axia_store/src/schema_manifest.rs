use aideon_axia_core::{AxiaError, AxiaResult, SchemaManifest};

pub fn schema_manifest_json() -> &'static str {
    include_str!(concat!(env!("OUT_DIR"), "/schema_manifest.json"))
}

pub fn load_schema_manifest() -> AxiaResult<SchemaManifest> {
    serde_json::from_str(schema_manifest_json())
        .map_err(|err| AxiaError::storage(format!("schema manifest parse: {err}")))
}
