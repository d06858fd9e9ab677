//! Playbook document shape (§3 DATA MODEL, §4.E PLAYBOOK PARSER). Field
//! names follow the source YAML literally rather than a redesigned DSL:
//! `step`/`name`, `type`, `task`, `call`, `action`, `with`, `when`, `pass`,
//! `next`, `loop`, `end_loop`.

use std::collections::BTreeMap;

use noetl_core::Value;
use serde::{Deserialize, Serialize};

/// The parsed playbook document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub version: Option<String>,

    /// Default initial map, merged under the execution's caller-supplied
    /// workload at `execution_start`.
    #[serde(default)]
    pub workload: Value,

    /// Ordered list of step definitions.
    #[serde(default)]
    pub workflow: Vec<Step>,

    /// Reusable action definitions indexed by name.
    #[serde(default)]
    pub workbook: Vec<WorkbookTask>,
}

impl Playbook {
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.workflow.iter().find(|s| s.name == name)
    }

    pub fn step_index(&self, name: &str) -> Option<usize> {
        self.workflow.iter().position(|s| s.name == name)
    }

    pub fn workbook_task(&self, name: &str) -> Option<&WorkbookTask> {
        self.workbook.iter().find(|t| t.name == name)
    }
}

/// One step of the `workflow` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// `step` or `name` in the source document.
    #[serde(alias = "step")]
    pub name: String,

    #[serde(rename = "type", default)]
    pub step_type: Option<String>,

    /// A workbook task reference this step delegates to.
    #[serde(default)]
    pub task: Option<String>,

    /// A bare callable reference (action type shorthand).
    #[serde(default)]
    pub call: Option<String>,

    /// An inline action specification.
    #[serde(default)]
    pub action: Option<Value>,

    #[serde(default)]
    pub description: Option<String>,

    /// Parameters merged into the action's `with` map (step overrides
    /// workbook defaults; transition `with` overrides the step).
    #[serde(default)]
    pub with: Value,

    /// Guard expression; rendered lenient, coerced loosely truthy.
    #[serde(default)]
    pub when: Option<String>,

    /// Unconditional skip marker (rendered before `when`, per the resolved
    /// Open Question in `SPEC_FULL.md` Part III item 9).
    #[serde(default)]
    pub pass: Option<Value>,

    #[serde(default)]
    pub next: Vec<NextCase>,

    #[serde(rename = "loop", default)]
    pub loop_spec: Option<LoopSpec>,

    #[serde(default)]
    pub end_loop: Option<EndLoop>,
}

impl Step {
    /// Whether this is a terminal control marker: `start`/`end` type, or a
    /// typeless step carrying no task/call/action/loop/end_loop payload.
    pub fn is_terminal_control(&self) -> bool {
        match self.step_type.as_deref() {
            Some("start") | Some("end") => true,
            _ => {
                self.task.is_none()
                    && self.call.is_none()
                    && self.action.is_none()
                    && self.loop_spec.is_none()
                    && self.end_loop.is_none()
            }
        }
    }

    pub fn is_loop_entry(&self) -> bool {
        self.loop_spec.is_some()
    }

    pub fn is_end_loop(&self) -> bool {
        self.end_loop.is_some()
    }
}

/// One `next` transition case: `{when, then: [...]}` or `{else: [...]}`.
/// An `else` entry's value becomes `then`, with `is_else = true`.
#[derive(Debug, Clone, Serialize)]
pub struct NextCase {
    #[serde(default)]
    pub when: Option<String>,
    pub then: Vec<NextTarget>,
    pub is_else: bool,
}

impl<'de> Deserialize<'de> for NextCase {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            when: Option<String>,
            #[serde(default)]
            then: Vec<NextTarget>,
            #[serde(default)]
            r#else: Vec<NextTarget>,
        }
        let raw = Raw::deserialize(deserializer)?;
        if !raw.r#else.is_empty() || (raw.when.is_none() && raw.then.is_empty()) {
            Ok(NextCase {
                when: None,
                then: raw.r#else,
                is_else: true,
            })
        } else {
            Ok(NextCase {
                when: raw.when,
                then: raw.then,
                is_else: false,
            })
        }
    }
}

/// A transition target: a step name, optionally with transition-scoped
/// `with` overrides. Accepts either a bare step-name string or a
/// `{step, with}` map in the source YAML.
#[derive(Debug, Clone, Serialize)]
pub struct NextTarget {
    pub step: String,
    #[serde(default)]
    pub with: Value,
}

impl<'de> Deserialize<'de> for NextTarget {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Name(String),
            Full {
                #[serde(alias = "step", alias = "name")]
                step: String,
                #[serde(default)]
                with: Value,
            },
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Name(step) => NextTarget {
                step,
                with: Value::Null,
            },
            Raw::Full { step, with } => NextTarget { step, with },
        })
    }
}

/// `loop: {iterator, in, filter?, chunk?}` (§4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSpec {
    pub iterator: String,
    #[serde(rename = "in")]
    pub in_expr: String,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub chunk: Option<i64>,
}

/// `end_loop`: a pointer back to the loop entry plus an optional
/// aggregation result template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndLoop {
    #[serde(default)]
    pub loop_step: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
}

/// A reusable action definition in the `workbook`/`tasks` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkbookTask {
    pub name: String,

    #[serde(rename = "type", default)]
    pub task_type: Option<String>,

    #[serde(default)]
    pub action: Option<Value>,

    /// Default parameters, overridden by the calling step's own `with`.
    #[serde(default)]
    pub with: Value,

    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}
