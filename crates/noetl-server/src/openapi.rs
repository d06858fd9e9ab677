//! OpenAPI specification generation for the `noetl-server` REST surface
//! (§6 EXTERNAL INTERFACES). Shared between the Swagger UI mounted by
//! `main` and anything that wants to export the spec as static JSON.

use crate::api;
use crate::api::ErrorResponse;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::events::emit_event,
        api::events::list_events,
        api::executions::list_executions,
        api::executions::get_execution,
        api::queue::enqueue,
        api::queue::lease,
        api::queue::complete,
        api::queue::fail,
        api::queue::heartbeat,
        api::queue::reap_expired,
        api::queue::list,
        api::context::render,
        api::aggregate::loop_results,
    ),
    components(schemas(ErrorResponse)),
    tags(
        (name = "events", description = "Append-only event log: emit and read back"),
        (name = "executions", description = "Execution listing and computed-progress summaries"),
        (name = "queue", description = "Durable, lease-based work queue"),
        (name = "context", description = "Context reconstruction and template rendering"),
        (name = "aggregate", description = "Loop iteration result aggregation"),
    ),
    info(
        title = "NoETL API",
        version = "0.1.0",
        description = "REST transport for the NoETL workflow orchestration engine: the event log, work queue, and context/template surfaces the broker and workers run on top of.",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate the OpenAPI spec as a pretty-printed JSON string.
    pub fn to_json() -> String {
        Self::openapi()
            .to_pretty_json()
            .expect("failed to serialize OpenAPI spec")
    }
}
