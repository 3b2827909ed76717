mod args;
pub mod cleanup;
mod handlers;

use serde_json::{Value, json};

use crate::context::AppContext;
use crate::error::RpcError;
use crate::registry::{OpType, ToolDef};

/// Run a resolved tool against its operation handler. On success the result
/// is wrapped into MCP content: one text block whose body is the JSON
/// result shape. An `Err` means the invocation itself failed — argument
/// extraction, guard checks or the Odoo call; since the tool was already
/// resolved by the caller, the session handler reports such failures as
/// `isError` content rather than a protocol-level error.
pub async fn call_tool(ctx: &AppContext, tool: &ToolDef, args: Value) -> Result<Value, RpcError> {
    let payload = dispatch(ctx, tool, &args).await?;
    Ok(text_content(payload))
}

async fn dispatch(ctx: &AppContext, tool: &ToolDef, args: &Value) -> Result<Value, RpcError> {
    let op = &tool.op;
    match op.op_type {
        OpType::Search => handlers::search(ctx, op, args).await,
        OpType::SearchRead => handlers::search_read(ctx, op, args).await,
        OpType::Read => handlers::read(ctx, op, args).await,
        OpType::Create => handlers::create(ctx, op, args).await,
        OpType::Write => handlers::write(ctx, op, args).await,
        OpType::Unlink => handlers::unlink(ctx, op, args).await,
        OpType::SearchCount => handlers::search_count(ctx, op, args).await,
        OpType::Execute => handlers::execute(ctx, op, args).await,
        OpType::WorkflowAction => handlers::workflow_action(ctx, op, args).await,
        OpType::GenerateReport => handlers::generate_report(ctx, op, args).await,
        OpType::GetModelMetadata => handlers::get_model_metadata(ctx, op, args).await,
        OpType::ListModels => handlers::list_models(ctx, op, args).await,
        OpType::CheckAccess => handlers::check_access(ctx, op, args).await,
        OpType::CreateBatch => handlers::create_batch(ctx, op, args).await,
        OpType::ReadGroup => handlers::read_group(ctx, op, args).await,
        OpType::NameSearch => handlers::name_search(ctx, op, args).await,
        OpType::NameGet => handlers::name_get(ctx, op, args).await,
        OpType::DefaultGet => handlers::default_get(ctx, op, args).await,
        OpType::Copy => handlers::copy(ctx, op, args).await,
        OpType::Onchange => handlers::onchange(ctx, op, args).await,
        OpType::DatabaseCleanup => handlers::database_cleanup(ctx, op, args).await,
        OpType::DeepCleanup => handlers::deep_cleanup(ctx, op, args).await,
    }
}

pub(crate) use handlers::fetch_model_metadata;

fn text_content(payload: Value) -> Value {
    json!({
        "content": [{
            "type": "text",
            "text": serde_json::to_string_pretty(&payload).unwrap_or_else(|_| "{}".to_string()),
        }]
    })
}
