//! Loop expansion: turn a `loop` step into a set of iteration workloads
//! (§4.G steps 1-4).

use noetl_core::{loop_iter_node_id, Value};
use thiserror::Error;

use crate::playbook::LoopSpec;
use crate::template::{coerce, render_str_value, Mode};

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("rendering loop `in` expression failed: {0}")]
    RenderIn(#[from] crate::template::RenderError),
}

/// One expanded iteration (or, when `chunk > 0`, one chunk of items).
#[derive(Debug, Clone)]
pub struct LoopIteration {
    pub node_id: String,
    pub index: usize,
    /// The item (or, for a chunked iteration, the list of items) bound to
    /// the loop iterator name.
    pub item: Value,
    /// Base workload with the iterator bound and `_loop` metadata attached.
    pub workload: Value,
}

/// Coerce an arbitrary rendered value into a list of items to iterate.
/// A bare string is never iterated character-by-character (§9 Open
/// Question, resolved in `SPEC_FULL.md` Part III item 3): a JSON/literal
/// parse is attempted first, and if that still isn't a list, the whole
/// string becomes the single item.
pub fn coerce_items(value: &Value) -> Vec<Value> {
    match value {
        Value::List(items) => items.clone(),
        Value::String(s) => match coerce(s) {
            Value::List(items) => items,
            other => vec![other],
        },
        Value::Map(m) => m.values().cloned().collect(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

/// Expand a loop step into its kept, possibly-chunked iterations.
pub fn expand_loop(
    loop_spec: &LoopSpec,
    execution_id: &str,
    step_index: usize,
    base_workload: &Value,
    context: &Value,
    loop_id: &str,
    loop_name: &str,
) -> Result<Vec<LoopIteration>, LoopError> {
    let rendered_in = render_str_value(&loop_spec.in_expr, context, Mode::Lenient)?;
    let all_items = coerce_items(&rendered_in);

    let mut kept: Vec<(usize, Value)> = Vec::new();
    for (idx, item) in all_items.into_iter().enumerate() {
        let include = match &loop_spec.filter {
            None => true,
            Some(filter_expr) => {
                let mut filter_ctx = context.clone();
                filter_ctx.insert(loop_spec.iterator.clone(), item.clone());
                match render_str_value(filter_expr, &filter_ctx, Mode::Lenient) {
                    Ok(v) => v.truthy(),
                    Err(_) => true,
                }
            }
        };
        if include {
            kept.push((idx, item));
        }
    }

    let items_count = kept.len();
    let chunk_size = loop_spec.chunk.unwrap_or(0).max(0) as usize;

    let mut iterations = Vec::new();
    if chunk_size > 0 {
        for (k, chunk) in kept.chunks(chunk_size).enumerate() {
            let items: Vec<Value> = chunk.iter().map(|(_, v)| v.clone()).collect();
            let node_id = loop_iter_node_id(execution_id, step_index, k);
            let workload = build_iteration_workload(
                base_workload,
                &loop_spec.iterator,
                &Value::List(items.clone()),
                loop_id,
                loop_name,
                k,
                items_count,
            );
            iterations.push(LoopIteration {
                node_id,
                index: k,
                item: Value::List(items),
                workload,
            });
        }
    } else {
        for (k, (_, item)) in kept.into_iter().enumerate() {
            let node_id = loop_iter_node_id(execution_id, step_index, k);
            let workload = build_iteration_workload(
                base_workload,
                &loop_spec.iterator,
                &item,
                loop_id,
                loop_name,
                k,
                items_count,
            );
            iterations.push(LoopIteration {
                node_id,
                index: k,
                item,
                workload,
            });
        }
    }

    Ok(iterations)
}

#[allow(clippy::too_many_arguments)]
fn build_iteration_workload(
    base_workload: &Value,
    iterator: &str,
    item: &Value,
    loop_id: &str,
    loop_name: &str,
    current_index: usize,
    items_count: usize,
) -> Value {
    let mut workload = base_workload.clone();
    workload.insert(iterator.to_string(), item.clone());

    let mut loop_meta = Value::map();
    loop_meta.insert("loop_id", Value::String(loop_id.to_string()));
    loop_meta.insert("loop_name", Value::String(loop_name.to_string()));
    loop_meta.insert("iterator", Value::String(iterator.to_string()));
    loop_meta.insert("current_index", Value::Int(current_index as i64));
    loop_meta.insert("current_item", item.clone());
    loop_meta.insert("items_count", Value::Int(items_count as i64));
    workload.insert("_loop", loop_meta);

    workload
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with_items(items: Vec<i64>) -> Value {
        let mut m = std::collections::BTreeMap::new();
        m.insert(
            "items".to_string(),
            Value::List(items.into_iter().map(Value::Int).collect()),
        );
        Value::Map(m)
    }

    #[test]
    fn filters_and_keeps_original_index_order() {
        let spec = LoopSpec {
            iterator: "i".to_string(),
            in_expr: "{{ items }}".to_string(),
            filter: Some("{{ i > 1 }}".to_string()),
            chunk: None,
        };
        let context = ctx_with_items(vec![1, 2, 3, 4]);
        let iterations = expand_loop(
            &spec,
            "exec-1",
            0,
            &Value::map(),
            &context,
            "loop-1",
            "loop_step",
        )
        .unwrap();
        assert_eq!(iterations.len(), 3);
        assert_eq!(iterations[0].item, Value::Int(2));
        assert_eq!(iterations[0].node_id, "exec-1-step-0-iter-0");
    }

    #[test]
    fn never_iterates_a_bare_string_by_character() {
        let mut ctx = std::collections::BTreeMap::new();
        ctx.insert("items".to_string(), Value::String("hello".to_string()));
        let context = Value::Map(ctx);
        let spec = LoopSpec {
            iterator: "i".to_string(),
            in_expr: "{{ items }}".to_string(),
            filter: None,
            chunk: None,
        };
        let iterations =
            expand_loop(&spec, "exec-1", 0, &Value::map(), &context, "loop-1", "loop_step").unwrap();
        assert_eq!(iterations.len(), 1);
        assert_eq!(iterations[0].item, Value::String("hello".to_string()));
    }

    #[test]
    fn chunking_groups_kept_items() {
        let spec = LoopSpec {
            iterator: "i".to_string(),
            in_expr: "{{ items }}".to_string(),
            filter: None,
            chunk: Some(2),
        };
        let context = ctx_with_items(vec![1, 2, 3, 4, 5]);
        let iterations = expand_loop(
            &spec,
            "exec-1",
            2,
            &Value::map(),
            &context,
            "loop-1",
            "loop_step",
        )
        .unwrap();
        assert_eq!(iterations.len(), 3);
        assert_eq!(
            iterations[2].item,
            Value::List(vec![Value::Int(5)])
        );
    }
}
