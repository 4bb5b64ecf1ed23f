//! Parameter resolution: substituting references to earlier step
//! outputs before a step runs.
//!
//! A string parameter of the form `<step_id>.<path>` is replaced by the
//! value at `path` inside the referenced step's output; `path` is a
//! dot-separated chain of object keys and array indexes. Anything else
//! passes through unchanged. Resolution is pure and re-runnable; a
//! reference into a completed step whose output lacks the path fails
//! fast with `MissingReference` instead of substituting null.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use planweave_core_types::{ParamMap, Step, StepId, WeaveError};

use crate::context::ExecutionContext;

static REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^<([^<>\s]+)>\.(\S+)$").expect("reference pattern is valid"));

pub struct DataFlowResolver;

impl DataFlowResolver {
    /// Step ids referenced anywhere in a parameter template. The engine
    /// treats these as implicit dependencies when computing readiness.
    pub fn referenced_steps(params: &ParamMap) -> Vec<StepId> {
        let mut refs = Vec::new();
        for value in params.values() {
            collect_refs(value, &mut refs);
        }
        refs
    }

    /// Produce the fully resolved parameter map for a step, leaving the
    /// template untouched.
    pub fn resolve(step: &Step, ctx: &ExecutionContext) -> Result<ParamMap, WeaveError> {
        let mut resolved = ParamMap::new();
        for (key, value) in &step.params {
            resolved.insert(key.clone(), resolve_value(value, ctx)?);
        }
        Ok(resolved)
    }
}

fn collect_refs(value: &Value, out: &mut Vec<StepId>) {
    match value {
        Value::String(text) => {
            if let Some(captures) = REFERENCE.captures(text) {
                let id = StepId::from_name(&captures[1]);
                if !out.contains(&id) {
                    out.push(id);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_refs(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_refs(item, out);
            }
        }
        _ => {}
    }
}

fn resolve_value(value: &Value, ctx: &ExecutionContext) -> Result<Value, WeaveError> {
    match value {
        Value::String(text) => match REFERENCE.captures(text) {
            Some(captures) => {
                let step_id = StepId::from_name(&captures[1]);
                let path = &captures[2];
                let output = ctx.get(&step_id).ok_or_else(|| {
                    WeaveError::missing_reference(step_id.clone(), path.to_string())
                })?;
                lookup_path(&step_id, &output, path)
            }
            None => Ok(value.clone()),
        },
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut resolved = serde_json::Map::new();
            for (key, item) in map {
                resolved.insert(key.clone(), resolve_value(item, ctx)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn lookup_path(step_id: &StepId, output: &Value, path: &str) -> Result<Value, WeaveError> {
    let mut current = output;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index)),
            _ => None,
        }
        .ok_or_else(|| WeaveError::missing_reference(step_id.clone(), path.to_string()))?;
    }
    Ok(current.clone())
}
