//! State Store & message bus (C1).
//!
//! Single process-wide authoritative model for the Project singleton, Agent
//! rows, the ordered Message log with per-recipient read cursors, the
//! pending-decision queue, and optional Task bookkeeping. Every mutation is
//! followed by an atomic JSON snapshot (temp-file-then-rename) of the
//! affected collection.

pub mod entities;
mod error;
mod patch;
mod store;

pub use entities::*;
pub use error::StateError;
pub use patch::{AgentPatch, TaskPatch};
pub use store::StateStore;

#[cfg(test)]
mod tests {
    use super::*;

    async fn fresh_store() -> (StateStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn init_project_sets_singleton() {
        let (store, _dir) = fresh_store().await;
        store.init_project("X", "desc", "/repo").await;
        let project = store.get_project().await;
        assert_eq!(project.name, "X");
        assert!(project.started_at.is_some());
    }

    #[tokio::test]
    async fn register_agent_rejects_duplicate_id() {
        let (store, _dir) = fresh_store().await;
        store
            .register_agent("archie", "lead", "/ws", false, false, None)
            .await
            .unwrap();
        let err = store
            .register_agent("archie", "lead", "/ws", false, false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::AgentAlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn update_agent_merges_context_not_replaces() {
        let (store, _dir) = fresh_store().await;
        store
            .register_agent("fe-1", "fe", "/ws", false, false, None)
            .await
            .unwrap();

        store
            .update_agent(
                "fe-1",
                AgentPatch {
                    context: Some(SavedContext {
                        files_modified: vec!["a.rs".into()],
                        progress: Some("halfway".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        store
            .update_agent(
                "fe-1",
                AgentPatch {
                    context: Some(SavedContext {
                        files_modified: vec!["b.rs".into()],
                        next_steps: Some("ship it".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let agent = store.get_agent("fe-1").await.unwrap();
        let context = agent.context.unwrap();
        assert_eq!(context.files_modified, vec!["a.rs", "b.rs"]);
        assert_eq!(context.progress.as_deref(), Some("halfway"));
        assert_eq!(context.next_steps.as_deref(), Some("ship it"));
    }

    #[tokio::test]
    async fn update_agent_unknown_id_errors() {
        let (store, _dir) = fresh_store().await;
        let err = store
            .update_agent("nope", AgentPatch::status(AgentStatus::Working))
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::AgentNotFound(_)));
    }

    #[tokio::test]
    async fn remove_agent_is_idempotent() {
        let (store, _dir) = fresh_store().await;
        store
            .register_agent("fe-1", "fe", "/ws", false, false, None)
            .await
            .unwrap();
        assert!(store.remove_agent("fe-1").await);
        assert!(!store.remove_agent("fe-1").await);
    }

    #[tokio::test]
    async fn message_ids_are_strictly_increasing() {
        let (store, _dir) = fresh_store().await;
        let m1 = store.add_message("archie", "fe-1", "hi").await;
        let m2 = store.add_message("fe-1", "archie", "ack").await;
        assert!(m2.id > m1.id);
    }

    #[tokio::test]
    async fn get_messages_delivers_broadcast_once() {
        let (store, _dir) = fresh_store().await;
        store.add_message("archie", BROADCAST, "standup").await;

        let (first, _) = store.get_messages("fe-1", None, true).await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].content, "standup");

        let (second, _) = store.get_messages("fe-1", None, true).await;
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn get_messages_since_unknown_id_returns_none_and_does_not_advance_cursor() {
        let (store, _dir) = fresh_store().await;
        store.add_message("archie", "fe-1", "hello").await;

        let (messages, cursor) = store.get_messages("fe-1", Some(9_999), true).await;
        assert!(messages.is_empty());
        assert_eq!(cursor, Some(9_999));

        // Cursor override does not persist: an unqualified read still sees
        // the message because no persisted cursor for fe-1 was advanced.
        let (second, _) = store.get_messages("fe-1", None, true).await;
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn each_recipient_has_an_independent_cursor() {
        let (store, _dir) = fresh_store().await;
        store.add_message("archie", BROADCAST, "standup").await;
        let (a, _) = store.get_messages("a", None, true).await;
        let (b, _) = store.get_messages("b", None, true).await;
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[tokio::test]
    async fn escalation_lifecycle() {
        let (store, _dir) = fresh_store().await;
        let decision = store
            .add_pending_decision("merge?", vec!["y".into(), "n".into()])
            .await;
        assert_eq!(store.get_pending_decisions().await.len(), 1);

        assert!(store.answer_decision(&decision.id, "y").await);
        assert!(store.get_pending_decisions().await.is_empty());
        // Re-answering an already-answered decision still succeeds (it just
        // overwrites the prior answer) — only an unknown id returns false.
        assert!(store.answer_decision(&decision.id, "n").await);
    }

    #[tokio::test]
    async fn answer_decision_unknown_id_returns_false() {
        let (store, _dir) = fresh_store().await;
        assert!(!store.answer_decision("ghost", "y").await);
    }

    #[tokio::test]
    async fn update_task_sets_completed_at_on_done() {
        let (store, _dir) = fresh_store().await;
        let task = store.add_task("fe-1", "build the thing").await;
        assert!(task.completed_at.is_none());

        let updated = store
            .update_task(&task.id, TaskPatch {
                status: Some(TaskStatus::Done),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(updated.completed_at.is_some());
    }

    #[tokio::test]
    async fn reloading_store_recovers_prior_state() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = StateStore::open(dir.path()).await.unwrap();
            store.init_project("X", "d", "/r").await;
            store
                .register_agent("archie", "lead", "/ws", false, false, None)
                .await
                .unwrap();
            store.add_message("archie", BROADCAST, "hello").await;
        }

        let reopened = StateStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get_project().await.name, "X");
        assert!(reopened.get_agent("archie").await.is_some());
        assert_eq!(reopened.get_all_messages().await.len(), 1);

        // Newly minted ids continue strictly above anything on disk.
        let m2 = reopened.add_message("archie", "fe-1", "again").await;
        assert_eq!(m2.id, 2);
    }
}
