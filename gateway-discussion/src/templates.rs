//! Named prompt-template CRUD, supplemented from
//! `original_source/lib/gateway/routes/discussion.py`'s "templates CRUD"
//! mention. Kept in-process here since templates are small and read-heavy;
//! durability rides along with whatever `StateStore` backend is chosen by
//! wiring this into `gateway-cli` against the same pool when `database`
//! is enabled.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscussionTemplate {
    pub name: String,
    pub prompt: String,
}

#[derive(Default)]
pub struct TemplateStore {
    templates: RwLock<HashMap<String, DiscussionTemplate>>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, template: DiscussionTemplate) {
        self.templates.write().await.insert(template.name.clone(), template);
    }

    pub async fn get(&self, name: &str) -> Option<DiscussionTemplate> {
        self.templates.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<DiscussionTemplate> {
        self.templates.read().await.values().cloned().collect()
    }

    pub async fn delete(&self, name: &str) -> bool {
        self.templates.write().await.remove(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn crud_roundtrip() {
        let store = TemplateStore::new();
        store
            .create(DiscussionTemplate {
                name: "debate".into(),
                prompt: "Argue both sides of {topic}".into(),
            })
            .await;
        assert!(store.get("debate").await.is_some());
        assert_eq!(store.list().await.len(), 1);
        assert!(store.delete("debate").await);
        assert!(store.get("debate").await.is_none());
    }
}
