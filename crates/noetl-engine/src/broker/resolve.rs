//! Action-spec resolution: turn a step's `task`/`call`/`action` into a
//! concrete action value plus its default `with` parameters (§4.F step 6,
//! "resolve the action spec from the workbook or the step itself").

use noetl_core::Value;

use crate::playbook::{Playbook, Step};

/// `(action, default_with)` for a step, before merging transition/step
/// overrides on top of `default_with`.
pub fn resolve_action(playbook: &Playbook, step: &Step) -> (Value, Value) {
    if let Some(task_name) = &step.task {
        if let Some(task) = playbook.workbook_task(task_name) {
            let action = task.action.clone().unwrap_or_else(|| {
                let mut m = Value::map();
                if let Some(t) = &task.task_type {
                    m.insert("type", Value::String(t.clone()));
                }
                m
            });
            return (action, task.with.clone());
        }
        // Dangling workbook reference: fall through to a type-only action
        // so the worker surfaces a clear "unknown action type" error
        // rather than the broker silently stalling.
        let mut m = Value::map();
        m.insert("type", Value::String(task_name.clone()));
        return (m, Value::map());
    }

    if let Some(call) = &step.call {
        let mut m = Value::map();
        m.insert("type", Value::String(call.clone()));
        return (m, Value::map());
    }

    if let Some(action) = &step.action {
        return (action.clone(), Value::map());
    }

    (Value::Null, Value::map())
}

/// Merge two map values: `base`'s keys, overridden by `overlay`'s keys
/// (§4.C-style shallow merge, used for `with` precedence: workbook
/// defaults ← step overrides ← transition `with`).
pub fn merge_maps(base: &Value, overlay: &Value) -> Value {
    match (base.as_map(), overlay.as_map()) {
        (Some(base_map), Some(overlay_map)) => {
            let mut out = base_map.clone();
            for (k, v) in overlay_map {
                out.insert(k.clone(), v.clone());
            }
            Value::Map(out)
        }
        (None, Some(_)) => overlay.clone(),
        (Some(_), None) => base.clone(),
        (None, None) => Value::map(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_overrides_win_over_workbook_defaults() {
        let mut base = Value::map();
        base.insert("timeout", Value::Int(30));
        base.insert("url", Value::String("default".into()));

        let mut overlay = Value::map();
        overlay.insert("url", Value::String("overridden".into()));

        let merged = merge_maps(&base, &overlay);
        assert_eq!(merged.get_path("timeout"), Some(&Value::Int(30)));
        assert_eq!(
            merged.get_path("url"),
            Some(&Value::String("overridden".into()))
        );
    }
}
