//! The broker evaluator (§4.F): the stateless, idempotent function that
//! drives an execution one step at a time.

use chrono::Utc;
use noetl_core::{
    new_event_id, new_execution_id, step_node_id, Event, EventType, LoopFields, Status, Value,
    LOOP_AGGREGATION_ACTION_TYPE,
};
use tracing::{instrument, warn};

use crate::context::build_context_with_lineage;
use crate::loop_engine::{aggregate, collect_iteration_results, expand_loop, INLINE_AGGREGATION_MAX};
use crate::persistence::{EventStore, QueueStore, StoreError, TransitionRow, WorkbookRow, WorkflowRow, WorkflowTableStore};
use crate::playbook::{NextTarget, Playbook, Step};
use crate::template::{render_value, Mode};

use super::outcome::{BrokerError, Outcome};
use super::resolve::{merge_maps, resolve_action};

const MAX_SKIP_HOPS: usize = 256;

/// Evaluate one step of `execution_id`'s playbook run. Never throws to the
/// caller: internal failures are caught and reported as
/// `Outcome::InternalError`.
///
/// `inline_aggregation_max` bounds how many collected loop iterations an
/// `end_loop` step aggregates inline; larger loops enqueue a dedicated
/// aggregation job instead (§9 Open Question, resolved in `SPEC_FULL.md`
/// Part III item 8).
#[instrument(skip(playbook, events, queue, tables), fields(execution_id = %execution_id))]
pub async fn evaluate(
    execution_id: &str,
    playbook: &Playbook,
    events: &dyn EventStore,
    queue: &dyn QueueStore,
    tables: &dyn WorkflowTableStore,
    inline_aggregation_max: usize,
) -> Outcome {
    match evaluate_inner(execution_id, playbook, events, queue, tables, inline_aggregation_max).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(error = %err, "broker evaluation failed");
            Outcome::InternalError(err.to_string())
        }
    }
}

async fn evaluate_inner(
    execution_id: &str,
    playbook: &Playbook,
    events: &dyn EventStore,
    queue: &dyn QueueStore,
    tables: &dyn WorkflowTableStore,
    inline_aggregation_max: usize,
) -> Result<Outcome, BrokerError> {
    // 1. Load context, folding in one level of parent lineage for nested
    // sub-playbook executions.
    let event_log = events.get_events(execution_id).await?;
    let context = build_context_with_lineage(&event_log, Some(playbook), None, events).await?;

    // 2. Early stop on failure.
    if events.find_error(execution_id).await?.is_some() {
        return Ok(Outcome::Terminal("failed".to_string()));
    }

    // 3. Materialize tables, best-effort.
    materialize_best_effort(execution_id, playbook, tables).await;

    // 4. Select next step, skipping speculative/control steps as we go.
    let completed_count = count_completed_steps(&event_log, playbook);
    let (mut candidate, mut candidate_with) =
        select_initial_candidate(&event_log, playbook, &context, completed_count)?;

    let mut hops = 0;
    loop {
        let Some(step_name) = candidate.clone() else {
            return complete_execution(execution_id, &event_log, &context, events).await;
        };
        let Some(step) = playbook.step(&step_name) else {
            return Ok(Outcome::InternalError(format!("unknown step: {step_name}")));
        };

        // `pass` is rendered and checked before `when` (§9 Open Question,
        // resolved in SPEC_FULL.md Part III item 9).
        let passed = match &step.pass {
            Some(Value::Bool(b)) => *b,
            Some(other) => other.truthy(),
            None => false,
        };
        let when_false = match &step.when {
            Some(expr) => {
                let rendered = crate::template::render_str_value(expr, &context, Mode::Lenient)?;
                !rendered.truthy()
            }
            None => false,
        };

        if passed || when_false {
            let reason = if passed { "pass" } else { "when=false" };
            emit_skip(execution_id, events, step, reason).await?;
            hops += 1;
            if hops > MAX_SKIP_HOPS {
                return Ok(Outcome::InternalError("skip chain exceeded max hops".to_string()));
            }
            let (next, next_with) = advance_after_skip(playbook, step, completed_count + hops);
            candidate = next;
            candidate_with = next_with;
            continue;
        }

        return dispatch(
            execution_id,
            playbook,
            step,
            &context,
            &event_log,
            events,
            queue,
            tables,
            candidate_with,
            inline_aggregation_max,
        )
        .await;
    }
}

/// Marks the execution terminal (idempotently emitting `execution_completed`
/// once) and, if `event_log`'s `execution_start` carries a
/// `parent_execution_id` (a sub-playbook call, `original_source/plugin/playbook/context.py`),
/// asks the caller to also re-evaluate the parent.
async fn complete_execution(
    execution_id: &str,
    event_log: &[Event],
    context: &Value,
    events: &dyn EventStore,
) -> Result<Outcome, BrokerError> {
    let already_completed = event_log
        .iter()
        .any(|e| e.event_type.as_str() == EventType::EXECUTION_COMPLETED);

    if !already_completed {
        let event = Event {
            event_id: new_event_id(),
            parent_event_id: None,
            execution_id: execution_id.to_string(),
            parent_execution_id: None,
            timestamp: Utc::now(),
            insertion_rank: 0,
            event_type: EventType::new(EventType::EXECUTION_COMPLETED),
            status: Status::Completed,
            node_id: None,
            node_name: None,
            node_type: None,
            input_context: None,
            output_result: Some(context.get_path("results").cloned().unwrap_or_else(Value::map)),
            metadata: None,
            loop_fields: LoopFields::default(),
            error: None,
        };
        events.emit(event).await?;
    }

    let outcome = Outcome::Terminal("no_more_steps".to_string());
    match find_parent_execution_id(event_log) {
        Some(peer_execution_id) => Ok(Outcome::NotifyPeer {
            outcome: Box::new(outcome),
            peer_execution_id,
        }),
        None => Ok(outcome),
    }
}

fn find_parent_execution_id(event_log: &[Event]) -> Option<String> {
    event_log
        .iter()
        .find(|e| e.event_type.as_str() == EventType::EXECUTION_START)
        .and_then(|e| e.parent_execution_id.clone())
}

fn count_completed_steps(event_log: &[Event], playbook: &Playbook) -> usize {
    let mut seen = std::collections::HashSet::new();
    for event in event_log {
        if event.status == Status::Completed {
            if let Some(name) = &event.node_name {
                if playbook.step(name).is_some() {
                    seen.insert(name.clone());
                }
            }
        }
    }
    seen.len()
}

fn latest_completed_step<'a>(event_log: &[Event], playbook: &'a Playbook) -> Option<&'a Step> {
    event_log
        .iter()
        .rev()
        .find(|e| e.status == Status::Completed && e.node_name.is_some() && !e.node_id.as_deref().unwrap_or("").contains("-iter-"))
        .and_then(|e| playbook.step(e.node_name.as_deref().unwrap()))
}

fn select_initial_candidate(
    event_log: &[Event],
    playbook: &Playbook,
    context: &Value,
    completed_count: usize,
) -> Result<(Option<String>, Value), BrokerError> {
    let last = latest_completed_step(event_log, playbook);
    if let Some(last_step) = last {
        if let Some(target) = select_via_next(last_step, context)? {
            return Ok((Some(target.step.clone()), target.with.clone()));
        }
    }
    Ok((
        playbook.workflow.get(completed_count).map(|s| s.name.clone()),
        Value::Null,
    ))
}

fn advance_after_skip(playbook: &Playbook, skipped_step: &Step, completed_count: usize) -> (Option<String>, Value) {
    if let Ok(Some(target)) = select_via_next_sync(skipped_step) {
        return (Some(target.step.clone()), target.with.clone());
    }
    (
        playbook.workflow.get(completed_count).map(|s| s.name.clone()),
        Value::Null,
    )
}

/// Evaluate `next` cases; returns the first matching target, if any.
/// `when`-less, non-`else` cases never match (malformed playbook).
fn select_via_next<'a>(step: &'a Step, context: &Value) -> Result<Option<&'a NextTarget>, BrokerError> {
    for case in &step.next {
        if case.is_else {
            if let Some(target) = case.then.first() {
                return Ok(Some(target));
            }
            continue;
        }
        if let Some(when) = &case.when {
            let rendered = crate::template::render_str_value(when, context, Mode::Lenient)?;
            if rendered.truthy() {
                if let Some(target) = case.then.first() {
                    return Ok(Some(target));
                }
            }
        }
    }
    Ok(None)
}

/// A `when`-insensitive variant used right after a skip, where no
/// meaningful context change has happened: only unconditional (`else` or
/// `when`-less) transitions are honored.
fn select_via_next_sync(step: &Step) -> Result<Option<&NextTarget>, BrokerError> {
    for case in &step.next {
        if case.is_else || case.when.is_none() {
            if let Some(target) = case.then.first() {
                return Ok(Some(target));
            }
        }
    }
    Ok(None)
}

async fn emit_skip(
    execution_id: &str,
    events: &dyn EventStore,
    step: &Step,
    reason: &str,
) -> Result<(), StoreError> {
    let event = Event {
        event_id: new_event_id(),
        parent_event_id: None,
        execution_id: execution_id.to_string(),
        parent_execution_id: None,
        timestamp: Utc::now(),
        insertion_rank: 0,
        event_type: EventType::new(EventType::ACTION_COMPLETED),
        status: Status::Completed,
        node_id: None,
        node_name: Some(step.name.clone()),
        node_type: step.step_type.clone(),
        input_context: None,
        output_result: Some(skipped_result(reason)),
        metadata: None,
        loop_fields: LoopFields::default(),
        error: None,
    };
    events.emit(event).await
}

fn skipped_result(reason: &str) -> Value {
    let mut m = Value::map();
    m.insert("skipped", Value::Bool(true));
    m.insert("reason", Value::String(reason.to_string()));
    m
}

async fn materialize_best_effort(execution_id: &str, playbook: &Playbook, tables: &dyn WorkflowTableStore) {
    let workflow_rows: Vec<WorkflowRow> = playbook
        .workflow
        .iter()
        .enumerate()
        .map(|(i, s)| WorkflowRow {
            execution_id: execution_id.to_string(),
            step_id: i as i64,
            step_name: s.name.clone(),
            step_type: s.step_type.clone(),
            description: s.description.clone(),
            raw_config: serde_json::to_value(s).map(Value::from_json).unwrap_or(Value::Null),
        })
        .collect();
    if let Err(e) = tables.upsert_workflow_rows(workflow_rows).await {
        warn!(error = %e, "best-effort workflow materialization failed");
    }

    let workbook_rows: Vec<WorkbookRow> = playbook
        .workbook
        .iter()
        .enumerate()
        .map(|(i, t)| WorkbookRow {
            execution_id: execution_id.to_string(),
            task_id: i as i64,
            task_name: t.name.clone(),
            task_type: t.task_type.clone(),
            raw_config: serde_json::to_value(t).map(Value::from_json).unwrap_or(Value::Null),
        })
        .collect();
    if let Err(e) = tables.upsert_workbook_rows(workbook_rows).await {
        warn!(error = %e, "best-effort workbook materialization failed");
    }

    let mut transition_rows = Vec::new();
    for step in &playbook.workflow {
        for case in &step.next {
            if let Some(target) = case.then.first() {
                transition_rows.push(TransitionRow {
                    execution_id: execution_id.to_string(),
                    from_step: step.name.clone(),
                    to_step: target.step.clone(),
                    condition: case.when.clone(),
                    with_params: if target.with.is_null() { None } else { Some(target.with.clone()) },
                });
            }
        }
    }
    if let Err(e) = tables.upsert_transition_rows(transition_rows).await {
        warn!(error = %e, "best-effort transition materialization failed");
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch(
    execution_id: &str,
    playbook: &Playbook,
    step: &Step,
    context: &Value,
    event_log: &[Event],
    events: &dyn EventStore,
    queue: &dyn QueueStore,
    tables: &dyn WorkflowTableStore,
    transition_with: Value,
    inline_aggregation_max: usize,
) -> Result<Outcome, BrokerError> {
    if step.is_terminal_control() {
        emit_skip(execution_id, events, step, "control_step").await?;
        return Ok(Outcome::Terminal("control_step".to_string()));
    }

    if step.is_loop_entry() {
        return dispatch_loop_entry(execution_id, playbook, step, context, queue).await;
    }

    if step.is_end_loop() {
        return dispatch_end_loop(
            execution_id,
            playbook,
            step,
            context,
            event_log,
            events,
            queue,
            inline_aggregation_max,
        )
        .await;
    }

    dispatch_normal_action(
        execution_id,
        playbook,
        step,
        context,
        event_log,
        events,
        queue,
        tables,
        transition_with,
    )
    .await
}

async fn dispatch_loop_entry(
    execution_id: &str,
    playbook: &Playbook,
    step: &Step,
    context: &Value,
    queue: &dyn QueueStore,
) -> Result<Outcome, BrokerError> {
    let loop_spec = step.loop_spec.as_ref().expect("checked by is_loop_entry");
    let step_index = playbook.step_index(&step.name).unwrap_or(0);
    let base_workload = context.get_path("workload").cloned().unwrap_or(Value::map());
    let loop_node_id = step_node_id(execution_id, step_index);

    let iterations = expand_loop(
        loop_spec,
        execution_id,
        step_index,
        &base_workload,
        context,
        &loop_node_id,
        &step.name,
    )?;

    let Some(body_step_name) = step.next.first().and_then(|c| c.then.first()).map(|t| t.step.clone()) else {
        return Ok(Outcome::InternalError(format!("loop step {} has no body transition", step.name)));
    };
    let Some(body_step) = playbook.step(&body_step_name) else {
        return Ok(Outcome::InternalError(format!("loop body step not found: {body_step_name}")));
    };

    let (action, base_with) = resolve_action(playbook, body_step);

    let mut first_scheduled: Option<String> = None;
    let mut any_active_or_done = false;
    for iteration in &iterations {
        if queue.find_active(execution_id, &iteration.node_id).await?.is_some() {
            any_active_or_done = true;
            continue;
        }

        let mut iter_context = context.clone();
        if let Some(map) = iteration.workload.as_map() {
            for (k, v) in map {
                iter_context.insert(k.clone(), v.clone());
            }
        }
        iter_context.insert("workload", iteration.workload.clone());
        iter_context.insert("work", iteration.workload.clone());

        let merged_with = merge_maps(&base_with, &body_step.with);
        let rendered_with = render_value(&merged_with, &iter_context, Mode::Lenient)?;

        queue
            .enqueue(
                execution_id,
                &iteration.node_id,
                action.clone(),
                rendered_with,
                0,
                5,
                Utc::now(),
            )
            .await?;
        first_scheduled.get_or_insert_with(|| iteration.node_id.clone());
    }

    match first_scheduled {
        Some(node_id) => Ok(Outcome::Scheduled(node_id)),
        None if any_active_or_done => Ok(Outcome::Stalled("loop iterations already scheduled".to_string())),
        None => Ok(Outcome::Stalled("loop has no iterations to schedule".to_string())),
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_end_loop(
    execution_id: &str,
    playbook: &Playbook,
    step: &Step,
    context: &Value,
    event_log: &[Event],
    events: &dyn EventStore,
    queue: &dyn QueueStore,
    inline_aggregation_max: usize,
) -> Result<Outcome, BrokerError> {
    let end_loop = step.end_loop.as_ref().expect("checked by is_end_loop");
    let Some(loop_step_name) = &end_loop.loop_step else {
        return Ok(Outcome::InternalError(format!("end_loop step {} has no loop_step pointer", step.name)));
    };
    let Some(loop_step) = playbook.step(loop_step_name) else {
        return Ok(Outcome::InternalError(format!("unknown loop step: {loop_step_name}")));
    };
    let Some(loop_spec) = &loop_step.loop_spec else {
        return Ok(Outcome::InternalError(format!("step {loop_step_name} is not a loop entry")));
    };
    let Some(body_step_name) = loop_step.next.first().and_then(|c| c.then.first()).map(|t| t.step.clone()) else {
        return Ok(Outcome::InternalError(format!("loop step {loop_step_name} has no body transition")));
    };

    let step_index = playbook.step_index(loop_step_name).unwrap_or(0);
    let base_workload = context.get_path("workload").cloned().unwrap_or(Value::map());
    let loop_node_id = step_node_id(execution_id, step_index);
    let expected = expand_loop(
        loop_spec,
        execution_id,
        step_index,
        &base_workload,
        context,
        &loop_node_id,
        loop_step_name,
    )?
    .len();

    let collected = collect_iteration_results(event_log, &body_step_name);
    if collected.len() < expected {
        return Ok(Outcome::Stalled(format!(
            "loop iterations incomplete: {}/{expected}",
            collected.len()
        )));
    }

    let step_index = playbook.step_index(&step.name).unwrap_or(0);
    let node_id = step_node_id(execution_id, step_index);

    if event_log
        .iter()
        .any(|e| e.node_id.as_deref() == Some(node_id.as_str()) && e.status == Status::Completed)
    {
        return Ok(Outcome::Stalled(format!("{} already completed", step.name)));
    }
    if queue.find_active(execution_id, &node_id).await?.is_some() {
        return Ok(Outcome::Stalled(format!("{} already scheduled", step.name)));
    }

    // Above `inline_aggregation_max` collected iterations, hand the
    // reduction to a dedicated queue job instead of aggregating inline on
    // the evaluator's own call stack.
    if collected.len() > inline_aggregation_max {
        let mut job_context = context.clone();
        let results_list = Value::List(collected.clone());
        job_context.insert(format!("{}_results", step.name), results_list.clone());
        job_context.insert("loop_results", results_list);

        let mut action = Value::map();
        action.insert("type", Value::String(LOOP_AGGREGATION_ACTION_TYPE.to_string()));
        if let Some(template) = &end_loop.result {
            action.insert("result_template", template.clone());
        }

        queue
            .enqueue(execution_id, &node_id, action, job_context, 0, 5, Utc::now())
            .await?;
        return Ok(Outcome::Scheduled(node_id));
    }

    let aggregated = aggregate(&step.name, &collected, end_loop.result.as_ref(), context)?;

    let event = Event {
        event_id: new_event_id(),
        parent_event_id: None,
        execution_id: execution_id.to_string(),
        parent_execution_id: None,
        timestamp: Utc::now(),
        insertion_rank: 0,
        event_type: EventType::new(EventType::ACTION_COMPLETED),
        status: Status::Completed,
        node_id: Some(node_id.clone()),
        node_name: Some(step.name.clone()),
        node_type: step.step_type.clone(),
        input_context: None,
        output_result: Some(aggregated),
        metadata: None,
        loop_fields: LoopFields::default(),
        error: None,
    };
    events.emit(event).await?;

    Ok(Outcome::Scheduled(node_id))
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_normal_action(
    execution_id: &str,
    playbook: &Playbook,
    step: &Step,
    context: &Value,
    event_log: &[Event],
    events: &dyn EventStore,
    queue: &dyn QueueStore,
    tables: &dyn WorkflowTableStore,
    transition_with: Value,
) -> Result<Outcome, BrokerError> {
    let step_index = playbook.step_index(&step.name).unwrap_or(0);
    let node_id = step_node_id(execution_id, step_index);

    if event_log
        .iter()
        .any(|e| e.node_id.as_deref() == Some(node_id.as_str()) && e.status == Status::Completed)
    {
        return Ok(Outcome::Stalled(format!("{} already completed", step.name)));
    }

    let (action, base_with) = resolve_action(playbook, step);
    // workbook defaults ← step overrides ← transition `with`.
    let merged_with = merge_maps(&base_with, &step.with);
    let merged_with = merge_maps(&merged_with, &transition_with);

    let mut render_ctx = context.clone();
    render_ctx.insert("env", process_env_value());
    render_ctx.insert("job", {
        let mut job = Value::map();
        job.insert("uuid", Value::String(node_id.clone()));
        job
    });
    let rendered_with = render_value(&merged_with, &render_ctx, Mode::Lenient)?;

    if action.get_path("type").and_then(|v| v.as_str()) == Some("playbook") {
        return dispatch_subplaybook_call(execution_id, step, &node_id, event_log, events, &rendered_with).await;
    }

    if queue.find_active(execution_id, &node_id).await?.is_some() {
        return Ok(Outcome::Stalled(format!("{} already scheduled", step.name)));
    }

    queue
        .enqueue(execution_id, &node_id, action, rendered_with.clone(), 0, 5, Utc::now())
        .await?;

    if let Some(last_step) = latest_completed_step(event_log, playbook) {
        if let Ok(Some(target)) = select_via_next(last_step, context) {
            if target.step == step.name {
                let condition = last_step
                    .next
                    .iter()
                    .find(|c| c.then.first().map(|t| t.step.as_str()) == Some(step.name.as_str()))
                    .and_then(|c| c.when.clone());
                let _ = tables
                    .upsert_transition(TransitionRow {
                        execution_id: execution_id.to_string(),
                        from_step: last_step.name.clone(),
                        to_step: step.name.clone(),
                        condition,
                        with_params: if target.with.is_null() {
                            None
                        } else {
                            Some(target.with.clone())
                        },
                    })
                    .await;
            }
        }
    }

    Ok(Outcome::Scheduled(node_id))
}

/// Dispatches a `task_type: playbook` step (`original_source/plugin/playbook/context.py`
/// `build_nested_context`): first pass starts a child execution carrying
/// `parent_execution_id` and asks the caller to evaluate it; later passes
/// poll the child's event log for completion/failure and fold its result
/// into this step.
async fn dispatch_subplaybook_call(
    execution_id: &str,
    step: &Step,
    node_id: &str,
    event_log: &[Event],
    events: &dyn EventStore,
    rendered_with: &Value,
) -> Result<Outcome, BrokerError> {
    let dispatched = event_log
        .iter()
        .find(|e| e.node_id.as_deref() == Some(node_id) && e.event_type.as_str() == EventType::ACTION_STARTED);

    let Some(marker) = dispatched else {
        return start_subplaybook_call(execution_id, step, node_id, events, rendered_with).await;
    };

    let Some(child_execution_id) = marker
        .metadata
        .as_ref()
        .and_then(|m| m.get_path("child_execution_id"))
        .and_then(|v| v.as_str())
    else {
        return Ok(Outcome::InternalError(format!(
            "{} sub-playbook marker missing child_execution_id",
            step.name
        )));
    };
    let child_execution_id = child_execution_id.to_string();

    if let Some(failed) = events.find_error(&child_execution_id).await? {
        let event = Event {
            event_id: new_event_id(),
            parent_event_id: None,
            execution_id: execution_id.to_string(),
            parent_execution_id: None,
            timestamp: Utc::now(),
            insertion_rank: 0,
            event_type: EventType::new(EventType::ACTION_ERROR),
            status: Status::Failed,
            node_id: Some(node_id.to_string()),
            node_name: Some(step.name.clone()),
            node_type: step.step_type.clone(),
            input_context: None,
            output_result: None,
            metadata: None,
            loop_fields: LoopFields::default(),
            error: Some(failed.error.unwrap_or_else(|| "sub-playbook execution failed".to_string())),
        };
        events.emit(event).await?;
        return Ok(Outcome::Terminal("failed".to_string()));
    }

    let child_events = events.get_events(&child_execution_id).await?;
    let Some(completed) = child_events
        .iter()
        .find(|e| e.event_type.as_str() == EventType::EXECUTION_COMPLETED)
    else {
        return Ok(Outcome::Stalled(format!("{} sub-playbook execution still running", step.name)));
    };

    let event = Event {
        event_id: new_event_id(),
        parent_event_id: None,
        execution_id: execution_id.to_string(),
        parent_execution_id: None,
        timestamp: Utc::now(),
        insertion_rank: 0,
        event_type: EventType::new(EventType::ACTION_COMPLETED),
        status: Status::Completed,
        node_id: Some(node_id.to_string()),
        node_name: Some(step.name.clone()),
        node_type: step.step_type.clone(),
        input_context: None,
        output_result: completed.output_result.clone(),
        metadata: None,
        loop_fields: LoopFields::default(),
        error: None,
    };
    events.emit(event).await?;

    Ok(Outcome::Scheduled(node_id.to_string()))
}

async fn start_subplaybook_call(
    execution_id: &str,
    step: &Step,
    node_id: &str,
    events: &dyn EventStore,
    rendered_with: &Value,
) -> Result<Outcome, BrokerError> {
    let Some(path) = rendered_with.get_path("path").and_then(|v| v.as_str()) else {
        return Ok(Outcome::InternalError(format!("{} sub-playbook call missing path", step.name)));
    };
    let path = path.to_string();
    let version = rendered_with
        .get_path("version")
        .and_then(|v| v.as_str())
        .unwrap_or("latest")
        .to_string();
    let workload = match rendered_with.get_path("workload") {
        Some(w) => w.clone(),
        None => {
            let mut w = rendered_with.clone();
            if let Some(map) = w.as_map_mut() {
                map.remove("path");
                map.remove("version");
            }
            w
        }
    };

    let child_execution_id = new_execution_id();

    let mut child_input = Value::map();
    child_input.insert("path", Value::String(path));
    child_input.insert("version", Value::String(version));
    child_input.insert("workload", workload);

    let child_start = Event {
        event_id: new_event_id(),
        parent_event_id: None,
        execution_id: child_execution_id.clone(),
        parent_execution_id: Some(execution_id.to_string()),
        timestamp: Utc::now(),
        insertion_rank: 0,
        event_type: EventType::new(EventType::EXECUTION_START),
        status: Status::Pending,
        node_id: None,
        node_name: None,
        node_type: None,
        input_context: Some(child_input),
        output_result: None,
        metadata: None,
        loop_fields: LoopFields::default(),
        error: None,
    };
    events.emit(child_start).await?;

    let mut marker_metadata = Value::map();
    marker_metadata.insert("child_execution_id", Value::String(child_execution_id.clone()));
    let marker = Event {
        event_id: new_event_id(),
        parent_event_id: None,
        execution_id: execution_id.to_string(),
        parent_execution_id: None,
        timestamp: Utc::now(),
        insertion_rank: 0,
        event_type: EventType::new(EventType::ACTION_STARTED),
        status: Status::Running,
        node_id: Some(node_id.to_string()),
        node_name: Some(step.name.clone()),
        node_type: step.step_type.clone(),
        input_context: None,
        output_result: None,
        metadata: Some(marker_metadata),
        loop_fields: LoopFields::default(),
        error: None,
    };
    events.emit(marker).await?;

    Ok(Outcome::NotifyPeer {
        outcome: Box::new(Outcome::Scheduled(node_id.to_string())),
        peer_execution_id: child_execution_id,
    })
}

/// The process environment, exposed to dispatch-time rendering as `env`.
fn process_env_value() -> Value {
    let mut env = Value::map();
    for (key, val) in std::env::vars() {
        env.insert(key, Value::String(val));
    }
    env
}
