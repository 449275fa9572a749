use crate::backend::TodoBackend;
use crate::errors::{AppError, AppResult};
use crate::models::Tag;
use std::sync::{Arc, RwLock};

/// Process-wide registry of tag labels. Readers share one snapshot; a
/// refresh swaps in a whole new list, never a partial merge.
#[derive(Debug, Default)]
pub struct TagIndex {
    tags: RwLock<Arc<Vec<Tag>>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<Vec<Tag>> {
        match self.tags.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.snapshot().iter().map(|tag| tag.name.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.snapshot().iter().any(|tag| tag.name == name)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Replaces the list; keeps the store's name-ascending order.
    pub fn replace(&self, mut tags: Vec<Tag>) -> AppResult<()> {
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        let mut writer = self
            .tags
            .write()
            .map_err(|_| AppError::Internal("tag index lock poisoned".to_string()))?;
        *writer = Arc::new(tags);
        Ok(())
    }

    /// Re-fetches the full registry. On failure the previous list stays.
    pub async fn refresh<B: TodoBackend>(&self, backend: &B) -> AppResult<usize> {
        let tags = backend.list_tags().await?;
        let count = tags.len();
        self.replace(tags)?;
        tracing::debug!(count, "tag index refreshed");
        Ok(count)
    }
}
