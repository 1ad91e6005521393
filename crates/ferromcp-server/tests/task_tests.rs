//! Task-augmented tool call flows over the in-memory transport.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use ferromcp_client::{Client, ClientOptions};
use ferromcp_protocol::types::{
    TaskStatus, TaskSupport, Tool, ToolExecution, RELATED_TASK_META_KEY,
};
use ferromcp_server::{Server, ServerOptions, ToolError};
use ferromcp_transport::InMemoryTransport;

#[derive(Debug, Deserialize, JsonSchema)]
struct SlowInput {
    /// How long the tool works before answering
    delay_ms: u64,
}

#[derive(Debug, Serialize, JsonSchema)]
struct SlowOutput {
    finished: bool,
}

fn slow_tool(task_support: TaskSupport) -> Tool {
    Tool {
        execution: Some(ToolExecution {
            task_support: Some(task_support),
        }),
        ..Tool::new("slow", "Sleeps, then answers")
    }
}

fn task_server(task_support: TaskSupport) -> Server {
    let server = Server::new(ServerOptions::default());
    server
        .add_tool(
            slow_tool(task_support),
            |ctx, input: SlowInput| async move {
                tokio::select! {
                    _ = ctx.cancellation.cancelled() => {
                        Err(ToolError::tool("interrupted"))
                    }
                    _ = tokio::time::sleep(Duration::from_millis(input.delay_ms)) => {
                        Ok(SlowOutput { finished: true })
                    }
                }
            },
        )
        .unwrap();
    server
}

async fn connected(server: &Server) -> ferromcp_client::ClientSession {
    let (client_end, server_end) = InMemoryTransport::pair();
    server.serve(server_end);
    Client::new(ClientOptions::default())
        .connect(client_end)
        .await
        .unwrap()
}

#[tokio::test]
async fn optional_task_support_advertises_the_tasks_capability() {
    let server = task_server(TaskSupport::Optional);
    let session = connected(&server).await;
    let caps = session.initialize_result().unwrap().capabilities;
    assert!(caps.tasks.unwrap().supports_tool_calls());
}

#[tokio::test]
async fn task_flow_create_then_result_carries_related_task_meta() {
    let server = task_server(TaskSupport::Optional);
    let session = connected(&server).await;

    let created = session
        .call_tool_as_task("slow", json!({"delay_ms": 30}), Some(60_000))
        .await
        .unwrap();
    assert_eq!(created.task.status, TaskStatus::Working);
    assert_eq!(created.task.ttl, Some(60_000));

    // tasks/result blocks until the execution finishes.
    let result = session.task_result(&created.task.task_id).await.unwrap();
    assert_ne!(result.is_error, Some(true));
    assert_eq!(result.structured_content.unwrap()["finished"], true);
    let related = &result.meta.unwrap()[RELATED_TASK_META_KEY];
    assert_eq!(related["taskId"], created.task.task_id.as_str());

    let task = session.get_task(&created.task.task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
}

#[tokio::test]
async fn cancel_before_completion_then_cancel_again_is_terminal() {
    let server = task_server(TaskSupport::Optional);
    let session = connected(&server).await;

    let created = session
        .call_tool_as_task("slow", json!({"delay_ms": 60_000}), None)
        .await
        .unwrap();

    let cancelled = session.cancel_task(&created.task.task_id).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);

    let err = session.cancel_task(&created.task.task_id).await.unwrap_err();
    assert_eq!(err.jsonrpc_code(), Some(-32602));
    assert!(err.to_string().contains("terminal status"), "{err}");
}

#[tokio::test]
async fn required_task_support_rejects_plain_calls() {
    let server = task_server(TaskSupport::Required);
    let session = connected(&server).await;
    let err = session
        .call_tool("slow", json!({"delay_ms": 1}))
        .await
        .unwrap_err();
    assert_eq!(err.jsonrpc_code(), Some(-32602));
}

#[tokio::test]
async fn forbidden_task_support_makes_augmentation_method_not_found() {
    let server = task_server(TaskSupport::Forbidden);
    let session = connected(&server).await;
    let err = session
        .call_tool_as_task("slow", json!({"delay_ms": 1}), None)
        .await
        .unwrap_err();
    assert_eq!(err.jsonrpc_code(), Some(-32601));
}

#[tokio::test]
async fn failed_execution_is_reported_in_task_status() {
    let server = Server::new(ServerOptions::default());
    server
        .add_tool(
            slow_tool(TaskSupport::Optional),
            |_ctx, _input: SlowInput| async move {
                Err::<SlowOutput, _>(ToolError::tool("backend down"))
            },
        )
        .unwrap();
    let session = connected(&server).await;

    let created = session
        .call_tool_as_task("slow", json!({"delay_ms": 1}), None)
        .await
        .unwrap();
    // Tool-level failure: the result is still retrievable, isError is set,
    // and the task lands in failed.
    let result = session.task_result(&created.task.task_id).await.unwrap();
    assert_eq!(result.is_error, Some(true));
    let task = session.get_task(&created.task.task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.status_message.as_deref(), Some("tool execution failed"));
}

#[tokio::test]
async fn tasks_list_pages_by_sequence() {
    let server = task_server(TaskSupport::Optional);
    let session = connected(&server).await;

    let mut ids = Vec::new();
    for _ in 0..5 {
        let created = session
            .call_tool_as_task("slow", json!({"delay_ms": 10}), None)
            .await
            .unwrap();
        ids.push(created.task.task_id);
    }

    let mut listed = Vec::new();
    let mut cursor = None;
    loop {
        let page = session.list_tasks(cursor.clone()).await.unwrap();
        listed.extend(page.tasks.into_iter().map(|t| t.task_id));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    // Creation order is sequence order.
    assert_eq!(listed, ids);
}

#[tokio::test]
async fn tasks_are_scoped_to_their_creating_session() {
    let server = task_server(TaskSupport::Optional);
    let session_a = connected(&server).await;
    let session_b = connected(&server).await;

    let created = session_a
        .call_tool_as_task("slow", json!({"delay_ms": 10}), None)
        .await
        .unwrap();

    let err = session_b.get_task(&created.task.task_id).await.unwrap_err();
    assert_eq!(err.jsonrpc_code(), Some(-32602));
    let listed = session_b.list_tasks(None).await.unwrap();
    assert!(listed.tasks.is_empty());
}

#[tokio::test]
async fn expired_task_reports_expiry_once_then_vanishes() {
    let server = task_server(TaskSupport::Optional);
    let session = connected(&server).await;

    let created = session
        .call_tool_as_task("slow", json!({"delay_ms": 5}), Some(1))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let err = session.get_task(&created.task.task_id).await.unwrap_err();
    assert!(err.to_string().contains("Task has expired"), "{err}");
    let err = session.get_task(&created.task.task_id).await.unwrap_err();
    assert!(err.to_string().contains("unknown task"), "{err}");
}

#[tokio::test]
async fn status_notifications_reach_the_client() {
    let statuses: std::sync::Arc<std::sync::Mutex<Vec<TaskStatus>>> = Default::default();
    let sink = statuses.clone();

    let server = task_server(TaskSupport::Optional);
    let (client_end, server_end) = InMemoryTransport::pair();
    server.serve(server_end);
    let session = Client::new(ClientOptions {
        on_task_status: Some(std::sync::Arc::new(move |notification| {
            sink.lock().unwrap().push(notification.status);
        })),
        ..Default::default()
    })
    .connect(client_end)
    .await
    .unwrap();

    let created = session
        .call_tool_as_task("slow", json!({"delay_ms": 10}), None)
        .await
        .unwrap();
    session.task_result(&created.task.task_id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(statuses
        .lock()
        .unwrap()
        .contains(&TaskStatus::Completed));
}
