use std::sync::Arc;

use cog_core::MetadataPatch;
use cog_store::{ActivationEngine, StoreError};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone)]
pub struct CogletServer {
    engine: Arc<ActivationEngine>,
    tool_router: ToolRouter<Self>,
}

impl CogletServer {
    pub fn new(engine: ActivationEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            tool_router: Self::tool_router(),
        }
    }
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(value).unwrap_or_default(),
    )]))
}

fn store_error(e: StoreError) -> McpError {
    if e.is_structural() {
        McpError::invalid_params(e.to_string(), None)
    } else {
        McpError::internal_error(e.to_string(), None)
    }
}

fn object_or_empty(value: Option<Value>) -> Result<Map<String, Value>, McpError> {
    match value {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(McpError::invalid_params(
            "metadata must be a JSON object",
            None,
        )),
    }
}

// --- Tool parameter types ---

#[derive(Debug, Deserialize, JsonSchema)]
struct CreateSetRequest {
    /// Memory set id: 1-128 chars of letters, digits, `_`, `-`, `.`, `:`
    set_id: String,
    /// Optional human-readable description
    description: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SetRequest {
    /// Memory set id
    set_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct AddRequest {
    /// Memory set to add to. Must already exist.
    set_id: String,
    /// Text content of the coglet
    content: String,
    /// Optional caller metadata (JSON object). `connections`, `importance`
    /// and `emotion` feed the legacy weighting strategy.
    metadata: Option<Value>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct IdRequest {
    /// Coglet id
    id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct UpdateRequest {
    /// Coglet id
    id: String,
    /// JSON object merged into the coglet's metadata. `weight` and
    /// `last_update_time` change only when present; `null` removes a key.
    metadata: Value,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RefreshRequest {
    /// Coglet ids to reinforce. Unknown ids are reported, not fatal.
    ids: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RecallRequest {
    /// Memory set to search
    set_id: String,
    /// Query text
    query: String,
    /// Candidates to fetch; never fewer than the configured recall_top_k
    top_k: Option<usize>,
}

#[tool_router]
impl CogletServer {
    #[tool(description = "Create an empty memory set. Fails if the set already exists.")]
    async fn coglet_create_set(
        &self,
        Parameters(req): Parameters<CreateSetRequest>,
    ) -> Result<CallToolResult, McpError> {
        let store = self.engine.store();
        store
            .create_set(&req.set_id, req.description.as_deref())
            .map_err(store_error)?;
        let info = store.get_set_info(&req.set_id).map_err(store_error)?;
        json_result(&info)
    }

    #[tool(description = "List every memory set with its description and coglet count.")]
    async fn coglet_list_sets(&self) -> Result<CallToolResult, McpError> {
        let sets = self.engine.store().list_sets().map_err(store_error)?;
        json_result(&sets)
    }

    #[tool(description = "Show one memory set: description, creation time and coglet count.")]
    async fn coglet_set_info(
        &self,
        Parameters(req): Parameters<SetRequest>,
    ) -> Result<CallToolResult, McpError> {
        let info = self
            .engine
            .store()
            .get_set_info(&req.set_id)
            .map_err(store_error)?;
        json_result(&info)
    }

    #[tool(description = "Delete a memory set and every coglet in it. Irreversible.")]
    async fn coglet_delete_set(
        &self,
        Parameters(req): Parameters<SetRequest>,
    ) -> Result<CallToolResult, McpError> {
        let removed = self
            .engine
            .store()
            .delete_set(&req.set_id)
            .await
            .map_err(store_error)?;
        json_result(&serde_json::json!({
            "set_id": req.set_id,
            "deleted": true,
            "coglets_removed": removed,
        }))
    }

    #[tool(description = "Remove every coglet from a memory set but keep the set.")]
    async fn coglet_clear_set(
        &self,
        Parameters(req): Parameters<SetRequest>,
    ) -> Result<CallToolResult, McpError> {
        let removed = self
            .engine
            .store()
            .clear_set(&req.set_id)
            .await
            .map_err(store_error)?;
        json_result(&serde_json::json!({
            "set_id": req.set_id,
            "coglets_removed": removed,
        }))
    }

    #[tool(
        description = "Store a coglet (a short piece of text) in a memory set. Identical content in the same set maps to the same id; re-adding merges metadata and keeps the existing weight."
    )]
    async fn coglet_add(
        &self,
        Parameters(req): Parameters<AddRequest>,
    ) -> Result<CallToolResult, McpError> {
        let metadata = object_or_empty(req.metadata)?;
        let id = self
            .engine
            .store()
            .add(&req.set_id, &req.content, metadata)
            .await
            .map_err(store_error)?;
        json_result(&serde_json::json!({ "id": id, "set_id": req.set_id }))
    }

    #[tool(description = "Fetch a coglet by id: content, weight, timestamps and metadata.")]
    async fn coglet_get(
        &self,
        Parameters(req): Parameters<IdRequest>,
    ) -> Result<CallToolResult, McpError> {
        let coglet = self.engine.store().get(&req.id).map_err(store_error)?;
        json_result(&coglet)
    }

    #[tool(description = "Merge metadata into a coglet. Weight is untouched unless given.")]
    async fn coglet_update(
        &self,
        Parameters(req): Parameters<UpdateRequest>,
    ) -> Result<CallToolResult, McpError> {
        let patch = MetadataPatch::from_json(req.metadata)
            .map_err(|e| McpError::invalid_params(e.to_string(), None))?;
        let updated = self
            .engine
            .store()
            .update(&req.id, patch)
            .await
            .map_err(store_error)?;
        json_result(&serde_json::json!({ "id": req.id, "updated": updated }))
    }

    #[tool(description = "Delete a coglet. Returns deleted=false if the id does not exist.")]
    async fn coglet_delete(
        &self,
        Parameters(req): Parameters<IdRequest>,
    ) -> Result<CallToolResult, McpError> {
        let deleted = self
            .engine
            .store()
            .delete(&req.id)
            .await
            .map_err(store_error)?;
        json_result(&serde_json::json!({ "id": req.id, "deleted": deleted }))
    }

    #[tool(
        description = "Reinforce coglets: advance their weights to now and persist. Returns the ids that succeeded plus any that failed."
    )]
    async fn coglet_refresh(
        &self,
        Parameters(req): Parameters<RefreshRequest>,
    ) -> Result<CallToolResult, McpError> {
        let report = self.engine.refresh(&req.ids).await;
        json_result(&report)
    }

    #[tool(
        description = "Recall from a memory set: similarity search, rank by current weight, activate the top 61.8% and reinforce them. Returns all_results and the activated prefix."
    )]
    async fn coglet_recall(
        &self,
        Parameters(req): Parameters<RecallRequest>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .engine
            .recall(&req.set_id, &req.query, req.top_k)
            .await
            .map_err(store_error)?;
        json_result(&result)
    }
}

#[tool_handler]
impl ServerHandler for CogletServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Coglet memory: small text records with a weight that decays over time and \
                 grows each time the record is activated.\n\n\
                 1. Create a memory set once with coglet_create_set.\n\
                 2. Store facts with coglet_add.\n\
                 3. Retrieve with coglet_recall. The `activated` list is what matters; \
                    recalling reinforces exactly those entries.\n\
                 4. Use coglet_refresh to reinforce entries you used without recalling them."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
