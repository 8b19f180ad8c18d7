use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot, Mutex};

/// One entry per connected agent, kept alive across SSE reconnects so a
/// blocking `escalate_to_user` call survives a dropped connection.
pub struct AgentSession {
    pub agent_id: String,
    pending_escalations: Mutex<HashMap<String, oneshot::Sender<String>>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl AgentSession {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            pending_escalations: Mutex::new(HashMap::new()),
            outbound: Mutex::new(None),
        }
    }

    /// Wire a fresh SSE channel, replacing whatever was there before (the
    /// previous subscriber, if any, is implicitly dropped on reconnect).
    pub async fn attach(&self, tx: mpsc::UnboundedSender<String>) {
        *self.outbound.lock().await = Some(tx);
    }

    pub async fn detach(&self) {
        *self.outbound.lock().await = None;
    }

    /// Push a tool-result payload to the connected SSE stream, if any.
    pub async fn send(&self, payload: String) {
        let guard = self.outbound.lock().await;
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(payload);
        }
    }

    pub async fn register_escalation(&self, decision_id: &str) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.pending_escalations
            .lock()
            .await
            .insert(decision_id.to_string(), tx);
        rx
    }

    /// Resolve a pending escalation. Returns `false` if no such id is
    /// outstanding (already answered, or never asked through this session).
    pub async fn answer_escalation(&self, decision_id: &str, answer: &str) -> bool {
        let tx = self.pending_escalations.lock().await.remove(decision_id);
        match tx {
            Some(tx) => tx.send(answer.to_string()).is_ok(),
            None => false,
        }
    }

    /// Cancel every outstanding escalation, e.g. at server shutdown.
    pub async fn cancel_all_escalations(&self) {
        let mut pending = self.pending_escalations.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(String::new());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn escalation_round_trip_resolves_the_waiter() {
        let session = AgentSession::new("archie");
        let rx = session.register_escalation("dec-1").await;
        assert!(session.answer_escalation("dec-1", "yes").await);
        assert_eq!(rx.await.unwrap(), "yes");
    }

    #[tokio::test]
    async fn answering_unknown_escalation_returns_false() {
        let session = AgentSession::new("archie");
        assert!(!session.answer_escalation("missing", "yes").await);
    }

    #[tokio::test]
    async fn cancel_all_resolves_waiters_with_empty_answer() {
        let session = AgentSession::new("archie");
        let rx = session.register_escalation("dec-1").await;
        session.cancel_all_escalations().await;
        assert_eq!(rx.await.unwrap(), "");
    }

    #[tokio::test]
    async fn send_without_an_attached_channel_is_a_no_op() {
        let session = AgentSession::new("fe-1");
        session.send("hello".to_string()).await;
    }

    #[tokio::test]
    async fn attach_then_send_delivers_to_the_channel() {
        let session = AgentSession::new("fe-1");
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.attach(tx).await;
        session.send("payload".to_string()).await;
        assert_eq!(rx.recv().await.unwrap(), "payload");
    }
}
