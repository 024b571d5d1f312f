use std::time::Duration;

use serde_json::Value;

use crate::handshake::ReadyState;
use crate::mcp::{
    ListPromptsRequest, ListPromptsResult, ListResourceTemplatesRequest,
    ListResourceTemplatesResult, ListResourcesRequest, ListResourcesResult, ListToolsRequest,
    ListToolsResult, PaginatedParams, ReadResourceRequest, ReadResourceRequestParams,
    ReadResourceResult,
};
use crate::{CallError, McpRequest};

/// A connection that completed the handshake. Read-only calls only.
pub struct Session {
    client: mcp_jsonrpc::Client,
    ready: ReadyState,
    request_timeout: Duration,
}

impl Session {
    pub fn new(client: mcp_jsonrpc::Client, ready: ReadyState, request_timeout: Duration) -> Self {
        Self {
            client,
            ready,
            request_timeout,
        }
    }

    pub fn ready(&self) -> &ReadyState {
        &self.ready
    }

    pub fn into_client(self) -> mcp_jsonrpc::Client {
        self.client
    }

    /// One request, bounded by the session timeout. Expiry abandons only this call.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, CallError> {
        tracing::debug!(method, server = %self.ready.server_name, "mcp request");
        self.client
            .request_with_timeout(method, params, self.request_timeout)
            .await
            .map_err(|err| CallError::from_jsonrpc(method, err))
    }

    pub async fn request_typed<R: McpRequest>(
        &self,
        params: R::Params,
    ) -> Result<R::Result, CallError> {
        let params = match serde_json::to_value(params) {
            Ok(Value::Null) => None,
            Ok(params) => Some(params),
            Err(source) => {
                return Err(CallError::Codec {
                    method: R::METHOD.to_string(),
                    source,
                });
            }
        };
        let result = self.request(R::METHOD, params).await?;
        serde_json::from_value(result).map_err(|source| CallError::Codec {
            method: R::METHOD.to_string(),
            source,
        })
    }

    pub async fn list_tools(&self, cursor: Option<String>) -> Result<ListToolsResult, CallError> {
        self.request_typed::<ListToolsRequest>(page(cursor)).await
    }

    pub async fn list_resources(
        &self,
        cursor: Option<String>,
    ) -> Result<ListResourcesResult, CallError> {
        self.request_typed::<ListResourcesRequest>(page(cursor))
            .await
    }

    pub async fn list_resource_templates(
        &self,
        cursor: Option<String>,
    ) -> Result<ListResourceTemplatesResult, CallError> {
        self.request_typed::<ListResourceTemplatesRequest>(page(cursor))
            .await
    }

    pub async fn list_prompts(&self, cursor: Option<String>) -> Result<ListPromptsResult, CallError> {
        self.request_typed::<ListPromptsRequest>(page(cursor)).await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, CallError> {
        self.request_typed::<ReadResourceRequest>(ReadResourceRequestParams {
            uri: uri.to_string(),
        })
        .await
    }
}

fn page(cursor: Option<String>) -> Option<PaginatedParams> {
    cursor.map(|cursor| PaginatedParams {
        cursor: Some(cursor),
    })
}
