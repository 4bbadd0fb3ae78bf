use std::sync::Arc;

use anyhow::anyhow;
use jsonschema::{JSONSchema, SchemaResolver, SchemaResolverError};
use log::debug;
use serde_json::Value;
use url::Url;

/// included schema documents
static COMMON: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/schema/common.json"));
static RUN_RECORD: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/schema/run_record.json"));
static JOB_RECORD: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/schema/job_record.json"));

/// Compiled validators for both record kinds
pub struct Schemas {
    pub run: JSONSchema,
    pub job: JSONSchema,
}

impl Schemas {
    pub fn load() -> Result<Schemas, String> {
        Ok(Schemas {
            run: compile_schema(RUN_RECORD)?,
            job: compile_schema(JOB_RECORD)?,
        })
    }
}

/// Check a document, joining every violation into one message
pub fn validate(schema: &JSONSchema, document: &Value) -> Result<(), String> {
    debug!("Validating record against JSON schema");
    schema.validate(document).map_err(|errors| {
        errors
            .map(|err| format!("{} at '{}'", err, err.instance_path))
            .collect::<Vec<_>>()
            .join("; ")
    })
}

fn parse(text: &str) -> Result<Value, String> {
    serde_json::from_str(text).map_err(|err| format!("embedded schema is not valid JSON: {err}"))
}

fn compile_schema(text: &str) -> Result<JSONSchema, String> {
    let schema = parse(text)?;
    JSONSchema::options()
        .with_resolver(EmbeddedResolver)
        .compile(&schema)
        .map_err(|err| format!("embedded schema does not compile: {err}"))
}

/*
Schemas reference shared definitions with relative references such as "common.json#/...", which
resolve against the default "json-schema:///" base. Those documents are compiled into the binary,
so nothing is ever read from disk or the network.
*/
struct EmbeddedResolver;

impl SchemaResolver for EmbeddedResolver {
    fn resolve(&self, _root_schema: &Value, url: &Url, original_reference: &str) -> Result<Arc<Value>, SchemaResolverError> {
        match (url.scheme(), url.path().trim_start_matches('/')) {
            ("json-schema", "common.json") => Ok(Arc::new(parse(COMMON).map_err(|err| anyhow!(err))?)),
            _ => Err(anyhow!("can't resolve schema reference {original_reference}")),
        }
    }
}
