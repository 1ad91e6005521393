//! Typed tool binding.
//!
//! [`bind_tool`] turns a typed handler plus a [`Tool`] descriptor into an
//! erased raw handler that runs the full pipeline on every `tools/call`:
//! decode arguments → apply schema defaults → validate (unknown fields are
//! always rejected) → invoke → shape the result. Schemas missing from the
//! descriptor are generated from the handler's input/output types and cached
//! by type identity; supplied schemas are cached by pointer identity.

use std::any::TypeId;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error as ThisError;
use tokio_util::sync::CancellationToken;
use tracing::error;

use ferromcp_protocol::types::{CallToolRequest, CallToolResult, ContentBlock, Tool};
use ferromcp_protocol::{Error, Result};

use crate::schema::{is_object_schema, ResolvedSchema, SchemaCache};

/// Context handed to tool handlers.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    /// Cancelled when the originating request (or owning task) is cancelled.
    pub cancellation: CancellationToken,
}

/// Error returned by typed tool handlers.
///
/// The two variants land on the two sides of the error taxonomy: `Protocol`
/// flows back as a JSON-RPC error object, `Tool` becomes a successful
/// response with `isError: true` and the message as text content.
#[derive(Debug, ThisError)]
pub enum ToolError {
    /// Propagated to the caller as a JSON-RPC protocol error.
    #[error(transparent)]
    Protocol(#[from] Error),
    /// Tool-level failure.
    #[error("{0}")]
    Tool(String),
}

impl ToolError {
    /// A tool-level failure with the given message.
    pub fn tool(message: impl Into<String>) -> Self {
        Self::Tool(message.into())
    }
}

/// Erased handler stored in the tool registry.
pub(crate) type RawToolHandler = Arc<
    dyn Fn(RequestContext, CallToolRequest) -> BoxFuture<'static, Result<CallToolResult>>
        + Send
        + Sync,
>;

/// A tool descriptor bound to its raw handler.
#[derive(Clone)]
pub(crate) struct RegisteredTool {
    pub tool: Tool,
    pub handler: RawToolHandler,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("name", &self.tool.name)
            .finish()
    }
}

fn generate_schema<T: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    let mut value = serde_json::to_value(schema).expect("schema generation cannot fail");
    if let Some(object) = value.as_object_mut() {
        object.insert("additionalProperties".to_string(), Value::Bool(false));
    }
    value
}

/// Bind a typed handler to a tool descriptor.
///
/// `Out = serde_json::Value` plays the role of "any": it suppresses output
/// schema generation (structured content is still produced when the handler
/// returns a non-null value).
///
/// # Panics
///
/// Panics when `In` (or a non-`Value` `Out`) does not describe a JSON
/// object, or when a supplied schema is not an object schema. Both are
/// registration-time programming errors.
pub(crate) fn bind_tool<In, Out, F, Fut>(
    cache: &SchemaCache,
    mut tool: Tool,
    handler: F,
) -> Result<RegisteredTool>
where
    In: DeserializeOwned + JsonSchema + Send + 'static,
    Out: Serialize + JsonSchema + Send + 'static,
    F: Fn(RequestContext, In) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = std::result::Result<Out, ToolError>> + Send + 'static,
{
    let input_schema = match tool.input_schema.take() {
        Some(document) => {
            assert!(
                is_object_schema(&document),
                "input schema of tool '{}' must describe a JSON object",
                tool.name
            );
            cache.resolve_pointer(&Arc::new(document))?
        }
        None => {
            let resolved = cache.resolve_for_type::<In>(generate_schema::<In>)?;
            assert!(
                is_object_schema(resolved.document()),
                "input type of tool '{}' must be a JSON object",
                tool.name
            );
            resolved
        }
    };

    let out_is_any = TypeId::of::<Out>() == TypeId::of::<Value>();
    let output_schema = match tool.output_schema.take() {
        Some(document) => {
            assert!(
                is_object_schema(&document),
                "output schema of tool '{}' must describe a JSON object",
                tool.name
            );
            Some(cache.resolve_pointer(&Arc::new(document))?)
        }
        None if out_is_any => None,
        None => {
            let resolved = cache.resolve_for_type::<Out>(generate_schema::<Out>)?;
            assert!(
                is_object_schema(resolved.document()),
                "output type of tool '{}' must be a JSON object",
                tool.name
            );
            Some(resolved)
        }
    };

    tool.input_schema = Some(input_schema.document().as_ref().clone());
    tool.output_schema = output_schema
        .as_ref()
        .map(|schema| schema.document().as_ref().clone());

    let handler = Arc::new(handler);
    let name = tool.name.clone();
    let raw: RawToolHandler = Arc::new(move |ctx, request| {
        let handler = handler.clone();
        let input_schema = input_schema.clone();
        let output_schema = output_schema.clone();
        let name = name.clone();
        async move {
            let mut arguments = request.arguments.unwrap_or_else(|| json!({}));
            input_schema.apply_defaults(&mut arguments);
            input_schema.validate(&arguments)?;
            let typed: In = serde_json::from_value(arguments)
                .map_err(|e| Error::invalid_params(format!("invalid arguments: {e}")))?;

            let invocation = AssertUnwindSafe(handler(ctx, typed)).catch_unwind().await;
            match invocation {
                Err(panic) => {
                    let detail = panic_message(&panic);
                    error!(tool = name, detail, "tool handler panicked");
                    Err(Error::internal(format!("tool handler panicked: {detail}")))
                }
                Ok(Err(ToolError::Protocol(e))) => Err(e),
                Ok(Err(ToolError::Tool(message))) => Ok(CallToolResult::error(message)),
                Ok(Ok(out)) => shape_output(out, output_schema.as_deref()),
            }
        }
        .boxed()
    });

    Ok(RegisteredTool { tool, handler: raw })
}

/// Turn a handler's typed output into a wire result.
///
/// Structured and unstructured content must agree exactly: the text block is
/// the JSON serialization of `structuredContent`, byte for byte. A null/empty
/// output leaves `content` as the empty array (never JSON `null`).
fn shape_output<Out: Serialize>(
    out: Out,
    output_schema: Option<&ResolvedSchema>,
) -> Result<CallToolResult> {
    let value = serde_json::to_value(&out)?;
    if value.is_null() {
        return Ok(CallToolResult::default());
    }
    if let Some(schema) = output_schema {
        // A handler emitting output that fails its own schema is a server
        // bug, not the caller's.
        schema
            .validate(&value)
            .map_err(|e| Error::internal(format!("tool output rejected by schema: {e}")))?;
    }
    let text = serde_json::to_string(&value)?;
    Ok(CallToolResult {
        content: vec![ContentBlock::text(text)],
        is_error: None,
        structured_content: Some(value),
        meta: None,
    })
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("opaque panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferromcp_protocol::types::TaskSupport;
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct GreetInput {
        name: String,
        #[serde(default)]
        #[allow(dead_code)]
        shout: bool,
    }

    #[derive(Debug, Serialize, JsonSchema)]
    struct GreetOutput {
        greeting: String,
    }

    fn greet_tool() -> Tool {
        Tool::new("greet", "Greets someone")
    }

    fn bound() -> RegisteredTool {
        let cache = SchemaCache::new();
        bind_tool(
            &cache,
            greet_tool(),
            |_ctx, input: GreetInput| async move {
                Ok(GreetOutput {
                    greeting: format!("hello {}", input.name),
                })
            },
        )
        .unwrap()
    }

    fn call(args: Value) -> CallToolRequest {
        CallToolRequest {
            name: "greet".into(),
            arguments: Some(args),
            task: None,
            meta: None,
        }
    }

    #[tokio::test]
    async fn generated_schemas_land_on_the_descriptor() {
        let registered = bound();
        let input = registered.tool.input_schema.as_ref().unwrap();
        assert_eq!(input["additionalProperties"], false);
        assert!(input["properties"]["name"].is_object());
        assert!(registered.tool.output_schema.is_some());
    }

    #[tokio::test]
    async fn structured_and_text_content_agree_byte_for_byte() {
        let registered = bound();
        let result = (registered.handler)(RequestContext::default(), call(json!({"name": "ada"})))
            .await
            .unwrap();
        let structured = result.structured_content.as_ref().unwrap();
        match &result.content[0] {
            ContentBlock::Text(text) => {
                assert_eq!(text.text, serde_json::to_string(structured).unwrap());
            }
            other => panic!("expected text content, got {other:?}"),
        }
        assert_eq!(structured["greeting"], "hello ada");
    }

    #[tokio::test]
    async fn unknown_fields_are_invalid_params() {
        let registered = bound();
        let err = (registered.handler)(
            RequestContext::default(),
            call(json!({"name": "ada", "bogus": true})),
        )
        .await
        .unwrap_err();
        assert_eq!(err.jsonrpc_code(), Some(-32602));
    }

    #[tokio::test]
    async fn missing_required_argument_is_invalid_params() {
        let registered = bound();
        let err = (registered.handler)(RequestContext::default(), call(json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.jsonrpc_code(), Some(-32602));
    }

    #[tokio::test]
    async fn plain_errors_become_tool_errors() {
        let cache = SchemaCache::new();
        let registered = bind_tool(
            &cache,
            greet_tool(),
            |_ctx, _input: GreetInput| async move {
                Err::<GreetOutput, _>(ToolError::tool("backend unavailable"))
            },
        )
        .unwrap();
        let result = (registered.handler)(RequestContext::default(), call(json!({"name": "x"})))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        match &result.content[0] {
            ContentBlock::Text(text) => assert_eq!(text.text, "backend unavailable"),
            other => panic!("expected text content, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn protocol_errors_propagate() {
        let cache = SchemaCache::new();
        let registered = bind_tool(
            &cache,
            greet_tool(),
            |_ctx, _input: GreetInput| async move {
                Err::<GreetOutput, _>(ToolError::Protocol(Error::invalid_params("nope")))
            },
        )
        .unwrap();
        let err = (registered.handler)(RequestContext::default(), call(json!({"name": "x"})))
            .await
            .unwrap_err();
        assert_eq!(err.jsonrpc_code(), Some(-32602));
    }

    #[tokio::test]
    async fn panics_become_internal_errors() {
        let cache = SchemaCache::new();
        let registered = bind_tool(
            &cache,
            greet_tool(),
            |_ctx, _input: GreetInput| async move {
                panic!("boom");
                #[allow(unreachable_code)]
                Ok::<GreetOutput, ToolError>(unreachable!())
            },
        )
        .unwrap();
        let err = (registered.handler)(RequestContext::default(), call(json!({"name": "x"})))
            .await
            .unwrap_err();
        assert_eq!(err.jsonrpc_code(), Some(-32603));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn defaults_apply_before_validation() {
        #[derive(Debug, Deserialize, JsonSchema)]
        struct WithDefault {
            #[serde(default = "default_limit")]
            limit: u32,
        }
        fn default_limit() -> u32 {
            10
        }

        let cache = SchemaCache::new();
        let registered = bind_tool(
            &cache,
            greet_tool(),
            |_ctx, input: WithDefault| async move { Ok(json!({"limit": input.limit})) },
        )
        .unwrap();
        let result = (registered.handler)(RequestContext::default(), call(json!({})))
            .await
            .unwrap();
        assert_eq!(result.structured_content.unwrap()["limit"], 10);
    }

    #[tokio::test]
    async fn value_output_suppresses_output_schema() {
        let cache = SchemaCache::new();
        let registered = bind_tool(
            &cache,
            greet_tool(),
            |_ctx, _input: GreetInput| async move { Ok(json!({"free": "form"})) },
        )
        .unwrap();
        assert!(registered.tool.output_schema.is_none());
        let result = (registered.handler)(RequestContext::default(), call(json!({"name": "x"})))
            .await
            .unwrap();
        assert_eq!(result.structured_content.unwrap()["free"], "form");
    }

    #[tokio::test]
    async fn null_value_output_yields_empty_content_array() {
        let cache = SchemaCache::new();
        let registered = bind_tool(
            &cache,
            greet_tool(),
            |_ctx, _input: GreetInput| async move { Ok(Value::Null) },
        )
        .unwrap();
        let result = (registered.handler)(RequestContext::default(), call(json!({"name": "x"})))
            .await
            .unwrap();
        assert!(result.content.is_empty());
        assert!(result.structured_content.is_none());
        let wire = serde_json::to_string(&result).unwrap();
        assert!(wire.contains("\"content\":[]"));
    }

    #[test]
    fn task_support_defaults_survive_binding() {
        let registered = bound();
        assert_eq!(registered.tool.task_support(), TaskSupport::Forbidden);
    }
}
