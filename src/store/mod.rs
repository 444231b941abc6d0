//! Replaceable persistence of workflow descriptions.
//!
//! The engine never assumes where workflows live; the scheduler ticker
//! and the execute-by-id path read them through this trait.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::workflow::WorkflowDescription;

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Insert or replace; the `(id, version)` pair identifies a document.
    async fn put(&self, description: WorkflowDescription);

    /// Latest version for the id.
    async fn get(&self, workflow_id: Uuid) -> Option<WorkflowDescription>;

    async fn list(&self) -> Vec<WorkflowDescription>;

    async fn remove(&self, workflow_id: Uuid) -> bool;
}

#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    workflows: RwLock<HashMap<Uuid, WorkflowDescription>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn put(&self, description: WorkflowDescription) {
        let mut workflows = self.workflows.write();
        match workflows.get(&description.metadata.id) {
            Some(existing) if existing.metadata.version > description.metadata.version => {}
            _ => {
                workflows.insert(description.metadata.id, description);
            }
        }
    }

    async fn get(&self, workflow_id: Uuid) -> Option<WorkflowDescription> {
        self.workflows.read().get(&workflow_id).cloned()
    }

    async fn list(&self) -> Vec<WorkflowDescription> {
        let mut all: Vec<_> = self.workflows.read().values().cloned().collect();
        all.sort_by_key(|w| w.metadata.id);
        all
    }

    async fn remove(&self, workflow_id: Uuid) -> bool {
        self.workflows.write().remove(&workflow_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn describe(id: u128, version: u32) -> WorkflowDescription {
        serde_json::from_value(json!({
            "metadata": {
                "id": Uuid::from_u128(id),
                "version": version,
                "name": "wf"
            },
            "trigger": "t",
            "nodes": [{"id": "t", "type": "sms_received"}],
            "edges": []
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn put_keeps_the_newest_version() {
        let repo = InMemoryWorkflowRepository::new();
        repo.put(describe(1, 2)).await;
        repo.put(describe(1, 1)).await;
        assert_eq!(
            repo.get(Uuid::from_u128(1)).await.unwrap().metadata.version,
            2
        );
        repo.put(describe(1, 3)).await;
        assert_eq!(
            repo.get(Uuid::from_u128(1)).await.unwrap().metadata.version,
            3
        );
    }

    #[tokio::test]
    async fn list_and_remove() {
        let repo = InMemoryWorkflowRepository::new();
        repo.put(describe(1, 1)).await;
        repo.put(describe(2, 1)).await;
        assert_eq!(repo.list().await.len(), 2);
        assert!(repo.remove(Uuid::from_u128(1)).await);
        assert!(!repo.remove(Uuid::from_u128(1)).await);
        assert_eq!(repo.list().await.len(), 1);
    }
}
