//! Task engine: durable, cancellable executions of `tools/call`.
//!
//! Tasks live in a single-mutex table keyed by 128-bit hex ids. Each entry
//! carries its creator session, a monotonic sequence number (the pagination
//! key), deep copies of the originating request metadata and arguments, an
//! optional TTL, a cancel handle, and a done latch that `tasks/result`
//! blocks on. Terminal statuses are permanent: completion never overwrites
//! an explicit cancel. Expired entries are evicted lazily by `get`/`list`.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ferromcp_core::cursor::{decode_sequence_cursor, encode_sequence_cursor};
use ferromcp_protocol::jsonrpc::JsonRpcError;
use ferromcp_protocol::types::{
    attach_related_task, CallToolResult, Meta, Task, TaskMetadata, TaskStatus,
};
use ferromcp_protocol::{Error, Result};

/// Terminal outcome of a task's execution.
#[derive(Debug, Clone)]
enum TaskOutcome {
    /// The tool produced a result (possibly with `isError: true`)
    Result(CallToolResult),
    /// The execution failed at the protocol level or was cancelled
    Error(JsonRpcError),
}

struct TaskEntry {
    task: Task,
    sequence: u64,
    owner: u64,
    /// Deep copy of the originating request's `_meta`
    request_meta: Option<Meta>,
    /// Deep copy of the raw arguments
    arguments: Option<Value>,
    expires_at: Option<DateTime<Utc>>,
    cancel: CancellationToken,
    done: watch::Sender<bool>,
    outcome: Option<TaskOutcome>,
}

impl TaskEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Per-server task registry.
pub(crate) struct TaskStore {
    inner: SyncMutex<TaskTable>,
}

struct TaskTable {
    entries: HashMap<String, TaskEntry>,
    next_sequence: u64,
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

impl TaskStore {
    pub fn new() -> Self {
        Self {
            inner: SyncMutex::new(TaskTable {
                entries: HashMap::new(),
                next_sequence: 1,
            }),
        }
    }

    /// Create a task for `owner`, capturing the request's metadata and raw
    /// arguments. Returns the wire task plus the execution cancel token.
    pub fn create(
        &self,
        owner: u64,
        metadata: &TaskMetadata,
        request_meta: Option<&Meta>,
        arguments: Option<&Value>,
    ) -> (Task, CancellationToken) {
        let now = Utc::now();
        let created = now_rfc3339();
        let task = Task {
            task_id: Uuid::new_v4().simple().to_string(),
            status: TaskStatus::Working,
            status_message: None,
            created_at: created.clone(),
            last_updated_at: created,
            ttl: metadata.ttl,
            poll_interval: None,
        };
        let cancel = CancellationToken::new();
        let (done, _) = watch::channel(false);

        let mut table = self.inner.lock();
        let sequence = table.next_sequence;
        table.next_sequence += 1;
        table.entries.insert(
            task.task_id.clone(),
            TaskEntry {
                task: task.clone(),
                sequence,
                owner,
                request_meta: request_meta.cloned(),
                arguments: arguments.cloned(),
                expires_at: metadata
                    .ttl
                    .map(|ttl| now + ChronoDuration::milliseconds(ttl as i64)),
                cancel: cancel.clone(),
                done,
                outcome: None,
            },
        );
        (task, cancel)
    }

    /// Look up a task; expired entries are evicted on the way.
    pub fn get(&self, owner: u64, task_id: &str) -> Result<Task> {
        let mut table = self.inner.lock();
        let now = Utc::now();
        let Some(entry) = table.entries.get(task_id) else {
            return Err(unknown_task(task_id));
        };
        if entry.owner != owner {
            // Tasks are visible only to the session that created them.
            return Err(unknown_task(task_id));
        }
        if entry.is_expired(now) {
            table.entries.remove(task_id);
            return Err(Error::invalid_params("Task has expired"));
        }
        Ok(table.entries[task_id].task.clone())
    }

    /// The calling session's tasks ascending by sequence, one page at a time.
    ///
    /// The cursor is the decimal sequence number of the last entry returned;
    /// a cursor whose sequence no longer exists is `InvalidParams`.
    pub fn list(
        &self,
        owner: u64,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<(Vec<Task>, Option<String>)> {
        let mut table = self.inner.lock();
        let now = Utc::now();
        table.entries.retain(|_, entry| !entry.is_expired(now));

        let mut owned: Vec<(u64, Task)> = table
            .entries
            .values()
            .filter(|entry| entry.owner == owner)
            .map(|entry| (entry.sequence, entry.task.clone()))
            .collect();
        owned.sort_by_key(|(sequence, _)| *sequence);

        let after = match cursor {
            Some(cursor) => {
                let sequence = decode_sequence_cursor(cursor)?;
                if !owned.iter().any(|(s, _)| *s == sequence) {
                    return Err(Error::invalid_params("invalid cursor"));
                }
                Some(sequence)
            }
            None => None,
        };

        let mut remaining: Vec<(u64, Task)> = match after {
            Some(sequence) => owned.into_iter().filter(|(s, _)| *s > sequence).collect(),
            None => owned,
        };
        let has_more = remaining.len() > page_size;
        remaining.truncate(page_size);
        let next_cursor = if has_more {
            remaining
                .last()
                .map(|(sequence, _)| encode_sequence_cursor(*sequence))
        } else {
            None
        };
        Ok((remaining.into_iter().map(|(_, task)| task).collect(), next_cursor))
    }

    /// Cancel a task. Rejects tasks already in a terminal status; the
    /// execution's cancel handle is invoked after the table lock is released.
    pub fn cancel(&self, owner: u64, task_id: &str) -> Result<Task> {
        let (task, cancel) = {
            let mut table = self.inner.lock();
            let Some(entry) = table.entries.get_mut(task_id) else {
                return Err(unknown_task(task_id));
            };
            if entry.owner != owner {
                return Err(unknown_task(task_id));
            }
            if entry.task.status.is_terminal() {
                return Err(Error::invalid_params(format!(
                    "already in terminal status {}",
                    entry.task.status
                )));
            }
            entry.task.status = TaskStatus::Cancelled;
            entry.task.last_updated_at = now_rfc3339();
            entry.outcome = Some(TaskOutcome::Error(
                Error::invalid_params("task was cancelled").to_jsonrpc_error(),
            ));
            let _ = entry.done.send(true);
            (entry.task.clone(), entry.cancel.clone())
        };
        cancel.cancel();
        Ok(task)
    }

    /// Record the execution's terminal state.
    ///
    /// Terminal status derivation: a protocol-level failure maps to `failed`
    /// with the error text, a result with `isError: true` maps to `failed`
    /// with "tool execution failed", anything else to `completed`. Returns
    /// `None` when the task was already terminal (an explicit cancel wins).
    pub fn finish(
        &self,
        task_id: &str,
        execution: std::result::Result<CallToolResult, Error>,
    ) -> Option<Task> {
        let mut table = self.inner.lock();
        let entry = table.entries.get_mut(task_id)?;
        if entry.task.status.is_terminal() {
            return None;
        }
        match execution {
            Err(error) => {
                entry.task.status = TaskStatus::Failed;
                entry.task.status_message = Some(error.to_string());
                entry.outcome = Some(TaskOutcome::Error(error.to_jsonrpc_error()));
            }
            Ok(result) => {
                if result.is_error == Some(true) {
                    entry.task.status = TaskStatus::Failed;
                    entry.task.status_message = Some("tool execution failed".to_string());
                } else {
                    entry.task.status = TaskStatus::Completed;
                }
                entry.outcome = Some(TaskOutcome::Result(result));
            }
        }
        entry.task.last_updated_at = now_rfc3339();
        let _ = entry.done.send(true);
        Some(entry.task.clone())
    }

    /// Block on the done latch, then hand back the terminal result with the
    /// related-task `_meta` injected.
    pub async fn result(&self, owner: u64, task_id: &str) -> Result<CallToolResult> {
        let mut done = {
            let table = self.inner.lock();
            let Some(entry) = table.entries.get(task_id) else {
                return Err(unknown_task(task_id));
            };
            if entry.owner != owner {
                return Err(unknown_task(task_id));
            }
            if let Some(outcome) = &entry.outcome {
                return finish_outcome(task_id, outcome.clone());
            }
            entry.done.subscribe()
        };

        done.changed()
            .await
            .map_err(|_| Error::internal("task abandoned before completion"))?;

        let table = self.inner.lock();
        let entry = table
            .entries
            .get(task_id)
            .ok_or_else(|| unknown_task(task_id))?;
        let outcome = entry
            .outcome
            .clone()
            .ok_or_else(|| Error::internal("task latch fired without outcome"))?;
        finish_outcome(task_id, outcome)
    }

    /// Captured raw arguments of a task (deep copy made at creation).
    #[cfg(test)]
    pub fn captured_arguments(&self, task_id: &str) -> Option<Value> {
        self.inner
            .lock()
            .entries
            .get(task_id)
            .and_then(|entry| entry.arguments.clone())
    }

    /// Captured request `_meta` of a task.
    #[cfg(test)]
    pub fn captured_meta(&self, task_id: &str) -> Option<Meta> {
        self.inner
            .lock()
            .entries
            .get(task_id)
            .and_then(|entry| entry.request_meta.clone())
    }
}

fn finish_outcome(task_id: &str, outcome: TaskOutcome) -> Result<CallToolResult> {
    match outcome {
        TaskOutcome::Result(mut result) => {
            attach_related_task(&mut result.meta, task_id);
            Ok(result)
        }
        TaskOutcome::Error(error) => Err(Error::JsonRpc(error)),
    }
}

fn unknown_task(task_id: &str) -> Error {
    Error::invalid_params(format!("unknown task: {task_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferromcp_protocol::types::RELATED_TASK_META_KEY;
    use serde_json::json;

    const OWNER: u64 = 1;

    fn create(store: &TaskStore, ttl: Option<u64>) -> (Task, CancellationToken) {
        store.create(OWNER, &TaskMetadata { ttl }, None, Some(&json!({"x": 1})))
    }

    #[test]
    fn ids_are_128_bit_hex() {
        let store = TaskStore::new();
        let (task, _) = create(&store, None);
        assert_eq!(task.task_id.len(), 32);
        assert!(task.task_id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tasks_are_visible_only_to_their_owner() {
        let store = TaskStore::new();
        let (task, _) = create(&store, None);
        assert!(store.get(OWNER, &task.task_id).is_ok());
        assert!(store.get(OWNER + 1, &task.task_id).is_err());
    }

    #[test]
    fn expired_tasks_are_evicted_on_get() {
        let store = TaskStore::new();
        let (task, _) = create(&store, Some(0));
        let err = store.get(OWNER, &task.task_id).unwrap_err();
        assert!(err.to_string().contains("Task has expired"));
        // Evicted: a second get no longer reports expiry.
        let err = store.get(OWNER, &task.task_id).unwrap_err();
        assert!(err.to_string().contains("unknown task"));
    }

    #[test]
    fn list_is_ascending_by_sequence_and_paginated() {
        let store = TaskStore::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(create(&store, None).0.task_id);
        }
        let (page1, cursor1) = store.list(OWNER, None, 2).unwrap();
        assert_eq!(
            page1.iter().map(|t| &t.task_id).collect::<Vec<_>>(),
            vec![&ids[0], &ids[1]]
        );
        let cursor1 = cursor1.unwrap();
        let (page2, cursor2) = store.list(OWNER, Some(&cursor1), 2).unwrap();
        assert_eq!(
            page2.iter().map(|t| &t.task_id).collect::<Vec<_>>(),
            vec![&ids[2], &ids[3]]
        );
        let (page3, cursor3) = store.list(OWNER, cursor2.as_deref(), 2).unwrap();
        assert_eq!(page3.len(), 1);
        assert_eq!(page3[0].task_id, ids[4]);
        assert!(cursor3.is_none());
    }

    #[test]
    fn list_cursor_for_vanished_sequence_is_invalid_params() {
        let store = TaskStore::new();
        create(&store, None);
        let err = store.list(OWNER, Some("99"), 2).unwrap_err();
        assert_eq!(err.jsonrpc_code(), Some(-32602));
        let err = store.list(OWNER, Some("rubbish"), 2).unwrap_err();
        assert_eq!(err.jsonrpc_code(), Some(-32602));
    }

    #[test]
    fn cancel_trips_the_execution_token() {
        let store = TaskStore::new();
        let (task, token) = create(&store, None);
        let cancelled = store.cancel(OWNER, &task.task_id).unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_of_a_terminal_task_is_invalid_params() {
        let store = TaskStore::new();
        let (task, _) = create(&store, None);
        store.cancel(OWNER, &task.task_id).unwrap();
        let err = store.cancel(OWNER, &task.task_id).unwrap_err();
        assert_eq!(err.jsonrpc_code(), Some(-32602));
        assert!(err.to_string().contains("terminal status cancelled"));
    }

    #[test]
    fn completion_does_not_overwrite_cancelled() {
        let store = TaskStore::new();
        let (task, _) = create(&store, None);
        store.cancel(OWNER, &task.task_id).unwrap();
        let after = store.finish(&task.task_id, Ok(CallToolResult::default()));
        assert!(after.is_none());
        assert_eq!(
            store.get(OWNER, &task.task_id).unwrap().status,
            TaskStatus::Cancelled
        );
    }

    #[test]
    fn terminal_status_derivation() {
        let store = TaskStore::new();

        let (ok_task, _) = create(&store, None);
        let finished = store.finish(&ok_task.task_id, Ok(CallToolResult::default()));
        assert_eq!(finished.unwrap().status, TaskStatus::Completed);

        let (tool_err_task, _) = create(&store, None);
        let finished = store.finish(
            &tool_err_task.task_id,
            Ok(CallToolResult::error("went wrong")),
        );
        let finished = finished.unwrap();
        assert_eq!(finished.status, TaskStatus::Failed);
        assert_eq!(
            finished.status_message.as_deref(),
            Some("tool execution failed")
        );

        let (proto_err_task, _) = create(&store, None);
        let finished = store.finish(
            &proto_err_task.task_id,
            Err(Error::internal("handler blew up")),
        );
        let finished = finished.unwrap();
        assert_eq!(finished.status, TaskStatus::Failed);
        assert!(finished.status_message.unwrap().contains("handler blew up"));
    }

    #[tokio::test]
    async fn result_blocks_until_finish_and_carries_related_task_meta() {
        let store = std::sync::Arc::new(TaskStore::new());
        let (task, _) = create(&store, None);
        let task_id = task.task_id.clone();

        let waiter = {
            let store = store.clone();
            let task_id = task_id.clone();
            tokio::spawn(async move { store.result(OWNER, &task_id).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        store.finish(
            &task_id,
            Ok(CallToolResult {
                structured_content: Some(json!({"answer": 42})),
                ..Default::default()
            }),
        );
        let result = waiter.await.unwrap().unwrap();
        let related = &result.meta.unwrap()[RELATED_TASK_META_KEY];
        assert_eq!(related["taskId"], task_id);
    }

    #[test]
    fn creation_captures_deep_copies() {
        let store = TaskStore::new();
        let mut meta = Meta::new();
        meta.insert("trace".into(), json!("abc"));
        let (task, _) = store.create(
            OWNER,
            &TaskMetadata { ttl: None },
            Some(&meta),
            Some(&json!({"input": [1, 2, 3]})),
        );
        assert_eq!(
            store.captured_arguments(&task.task_id).unwrap()["input"],
            json!([1, 2, 3])
        );
        assert_eq!(store.captured_meta(&task.task_id).unwrap()["trace"], "abc");
    }
}
