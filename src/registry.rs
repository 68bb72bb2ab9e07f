use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::GatewayError;
use crate::policy::validate::FieldRule;

/// What a handler returns: the operation-specific result plus the upstream
/// usage figures the ledger records.
#[derive(Clone, Debug)]
pub struct Completion {
    pub result: Value,
    pub tokens: u32,
    pub cost_usd_micros: u64,
}

/// The single capability every catalogued operation implements. Adding an
/// operation means registering a new slug/handler pair; the pipeline never
/// branches on operation type.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn execute(&self, payload: &Value) -> Result<Completion, GatewayError>;
}

/// Static metadata for one catalogued operation.
#[derive(Clone, Copy, Debug)]
pub struct OperationSpec {
    pub slug: &'static str,
    /// Fixed credit cost per invocation.
    pub cost: u32,
    /// Canonical model label for the usage log.
    pub model: &'static str,
    /// Tool name exposed over the agent protocol.
    pub tool_name: &'static str,
    pub description: &'static str,
    pub fields: &'static [FieldRule],
}

pub struct OperationEntry {
    pub spec: OperationSpec,
    /// JSON-schema shaped descriptor for the agent-protocol tool listing.
    pub input_schema: Value,
    pub handler: Arc<dyn OperationHandler>,
}

/// Closed catalog, loaded once at process start.
#[derive(Default)]
pub struct OperationRegistry {
    entries: Vec<OperationEntry>,
    by_slug: HashMap<&'static str, usize>,
    by_tool: HashMap<&'static str, usize>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        spec: OperationSpec,
        input_schema: Value,
        handler: Arc<dyn OperationHandler>,
    ) {
        let index = self.entries.len();
        self.by_slug.insert(spec.slug, index);
        self.by_tool.insert(spec.tool_name, index);
        self.entries.push(OperationEntry {
            spec,
            input_schema,
            handler,
        });
    }

    pub fn get(&self, slug: &str) -> Result<&OperationEntry, GatewayError> {
        self.by_slug
            .get(slug)
            .map(|&index| &self.entries[index])
            .ok_or_else(|| GatewayError::UnknownOperation {
                slug: slug.to_string(),
            })
    }

    pub fn get_by_tool(&self, tool_name: &str) -> Option<&OperationEntry> {
        self.by_tool.get(tool_name).map(|&index| &self.entries[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperationEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Service directory for the REST surface.
    pub fn catalog(&self) -> Value {
        let services: Vec<Value> = self
            .entries
            .iter()
            .map(|entry| {
                json!({
                    "slug": entry.spec.slug,
                    "credit_cost": entry.spec.cost,
                    "model": entry.spec.model,
                    "description": entry.spec.description,
                })
            })
            .collect();
        Value::Array(services)
    }
}
