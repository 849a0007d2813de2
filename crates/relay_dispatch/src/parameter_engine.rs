//! Parameter Engine (§4.C): validates client-supplied parameters against a
//! template's binding schema, coerces them to the declared type, merges in
//! defaults, and injects the result into a fresh clone of the template graph.

use relay_protocol::error::{FailureKind, JobError};
use relay_protocol::template::{BindingSchema, DataType, InputValue, Template, SYSTEM_PARAM_ALLOWLIST};
use serde_json::Value;
use std::collections::BTreeMap;

/// Coerce a raw client value to the type a binding schema declares for it
/// (§4.C step 3). Numeric strings coerce to `int`/`float`; `"true"`/`"false"`
/// (any case) coerce to `bool`; everything else coerces via `to_string`.
fn coerce(value: &Value, data_type: DataType) -> Result<Value, JobError> {
    match (data_type, value) {
        (DataType::Int, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        (DataType::Int, Value::Number(n)) => Ok(Value::from(n.as_f64().unwrap_or(0.0) as i64)),
        (DataType::Int, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| invalid(format!("cannot coerce `{s}` to int"))),
        (DataType::Float, Value::Number(n)) => Ok(Value::from(n.as_f64().unwrap_or(0.0))),
        (DataType::Float, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Value::from)
            .map_err(|_| invalid(format!("cannot coerce `{s}` to float"))),
        (DataType::Bool, Value::Bool(_)) => Ok(value.clone()),
        (DataType::Bool, Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            other => Err(invalid(format!("cannot coerce `{other}` to bool"))),
        },
        (DataType::String, Value::String(_)) => Ok(value.clone()),
        (DataType::String, other) => Ok(Value::String(other.to_string())),
        _ => Err(invalid(format!("value `{value}` is not compatible with {data_type:?}"))),
    }
}

fn invalid(message: String) -> JobError {
    JobError { kind: FailureKind::Validation, message, details: None }
}

/// §4.C step 1-2: reject unknown params (not in `allowed_params` and not a
/// system param), leaving the rest untouched for coercion.
fn validate_known(schema: &BindingSchema, params: &BTreeMap<String, Value>) -> Result<(), JobError> {
    for key in params.keys() {
        if SYSTEM_PARAM_ALLOWLIST.contains(&key.as_str()) {
            continue;
        }
        if !schema.allowed_params.iter().any(|a| a == key) {
            return Err(invalid(format!("parameter `{key}` is not accepted by this template")));
        }
    }
    Ok(())
}

/// §4.C step 4: `seed == -1` (or absent, when the mapping declares a
/// default of `-1`) is replaced with a fresh random 31-bit seed so repeated
/// submissions with "randomize" don't collide.
fn resolve_seed(raw: &Value) -> Value {
    let requests_random = matches!(raw, Value::Number(n) if n.as_i64() == Some(-1))
        || matches!(raw, Value::String(s) if s.trim() == "-1");
    if requests_random {
        Value::from(rand::random::<u32>() & 0x7fff_ffff)
    } else {
        raw.clone()
    }
}

/// Validate, coerce, merge defaults, and inject client parameters into a
/// freshly cloned copy of `template`'s graph (§4.C). Returns the ready graph
/// as an opaque JSON-serialisable `TemplateGraph`-shaped value so callers
/// pass it straight to the submit step without further mutation.
pub fn resolve_parameters(
    template: &Template,
    params: &BTreeMap<String, Value>,
) -> Result<relay_protocol::template::TemplateGraph, JobError> {
    validate_known(&template.schema, params)?;

    let mut graph = template.graph.clone();

    for (name, mapping) in &template.schema.parameter_mapping {
        let raw = params
            .get(name)
            .cloned()
            .or_else(|| mapping.default_value.clone());

        let Some(raw) = raw else {
            continue; // no client value and no default: leave graph as authored
        };

        let raw = if name == "seed" { resolve_seed(&raw) } else { raw };
        let coerced = coerce(&raw, mapping.data_type)
            .map_err(|e| invalid(format!("parameter `{name}`: {}", e.message)))?;

        let Some(node) = graph.get_mut(&mapping.graph_node_id) else {
            tracing::warn!(
                param = %name,
                node_id = %mapping.graph_node_id,
                "parameter mapping references a graph node that does not exist, skipping"
            );
            continue;
        };
        node.inputs.insert(mapping.input_field.clone(), InputValue::Literal(coerced));
    }

    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_protocol::template::{BindingSchema, GraphNode, ParamMapping, TemplateGraph};

    fn sample_template() -> Template {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "3".to_string(),
            GraphNode { class_type: "KSampler".to_string(), inputs: BTreeMap::new() },
        );
        nodes.insert(
            "6".to_string(),
            GraphNode { class_type: "CLIPTextEncode".to_string(), inputs: BTreeMap::new() },
        );

        let mut parameter_mapping = BTreeMap::new();
        parameter_mapping.insert(
            "seed".to_string(),
            ParamMapping {
                graph_node_id: "3".to_string(),
                input_field: "seed".to_string(),
                data_type: DataType::Int,
                default_value: Some(Value::from(-1)),
            },
        );
        parameter_mapping.insert(
            "steps".to_string(),
            ParamMapping {
                graph_node_id: "3".to_string(),
                input_field: "steps".to_string(),
                data_type: DataType::Int,
                default_value: Some(Value::from(20)),
            },
        );
        parameter_mapping.insert(
            "prompt".to_string(),
            ParamMapping {
                graph_node_id: "6".to_string(),
                input_field: "text".to_string(),
                data_type: DataType::String,
                default_value: None,
            },
        );

        Template {
            schema: BindingSchema {
                name: "sd_basic".to_string(),
                allowed_params: vec!["prompt".to_string(), "steps".to_string(), "seed".to_string()],
                parameter_mapping,
            },
            graph: TemplateGraph { nodes },
        }
    }

    #[test]
    fn unknown_parameter_is_rejected() {
        let template = sample_template();
        let mut params = BTreeMap::new();
        params.insert("not_a_real_param".to_string(), Value::from(1));
        let result = resolve_parameters(&template, &params);
        assert!(matches!(result, Err(e) if e.kind == FailureKind::Validation));
    }

    #[test]
    fn system_params_bypass_allowlist_but_are_not_injected() {
        let template = sample_template();
        let mut params = BTreeMap::new();
        params.insert("job_id".to_string(), Value::from("abc"));
        params.insert("prompt".to_string(), Value::from("a cat"));
        let graph = resolve_parameters(&template, &params).unwrap();
        assert_eq!(graph.nodes["6"].inputs["text"], InputValue::Literal(Value::from("a cat")));
    }

    #[test]
    fn missing_optional_param_falls_back_to_default() {
        let template = sample_template();
        let params = BTreeMap::new();
        let graph = resolve_parameters(&template, &params).unwrap();
        assert_eq!(graph.nodes["3"].inputs["steps"], InputValue::Literal(Value::from(20)));
    }

    #[test]
    fn seed_of_negative_one_is_randomized() {
        let template = sample_template();
        let params = BTreeMap::new();
        let graph = resolve_parameters(&template, &params).unwrap();
        let InputValue::Literal(Value::Number(seed)) = &graph.nodes["3"].inputs["seed"] else {
            panic!("expected a numeric seed");
        };
        assert!(seed.as_i64().unwrap() >= 0);
    }

    #[test]
    fn explicit_seed_is_preserved() {
        let template = sample_template();
        let mut params = BTreeMap::new();
        params.insert("seed".to_string(), Value::from(12345));
        let graph = resolve_parameters(&template, &params).unwrap();
        assert_eq!(graph.nodes["3"].inputs["seed"], InputValue::Literal(Value::from(12345)));
    }

    #[test]
    fn string_coerces_to_int_when_numeric() {
        let template = sample_template();
        let mut params = BTreeMap::new();
        params.insert("steps".to_string(), Value::from("30"));
        let graph = resolve_parameters(&template, &params).unwrap();
        assert_eq!(graph.nodes["3"].inputs["steps"], InputValue::Literal(Value::from(30)));
    }

    #[test]
    fn non_numeric_string_fails_int_coercion() {
        let template = sample_template();
        let mut params = BTreeMap::new();
        params.insert("steps".to_string(), Value::from("not-a-number"));
        let result = resolve_parameters(&template, &params);
        assert!(matches!(result, Err(e) if e.kind == FailureKind::Validation));
    }

    #[test]
    fn mapping_to_missing_node_is_logged_and_skipped() {
        let mut template = sample_template();
        template.schema.parameter_mapping.insert(
            "broken".to_string(),
            ParamMapping {
                graph_node_id: "999".to_string(),
                input_field: "x".to_string(),
                data_type: DataType::Int,
                default_value: Some(Value::from(1)),
            },
        );
        let params = BTreeMap::new();
        let graph = resolve_parameters(&template, &params).unwrap();
        // the rest of the graph still resolves; the bogus mapping is simply absent
        assert_eq!(graph.nodes["3"].inputs["steps"], InputValue::Literal(Value::from(20)));
    }
}
