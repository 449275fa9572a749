use crate::db::Database;
use crate::errors::AppResult;
use crate::models::{PageResponse, Tag, Todo, TodoCreate, TodoListQuery, TodoUpdate};
use std::future::Future;
use std::sync::Arc;

/// Asynchronous persistence surface the caches and the service are written
/// against. Each call suspends the caller until the store answers.
pub trait TodoBackend: Send + Sync + 'static {
    fn add_todo(&self, create: TodoCreate) -> impl Future<Output = AppResult<Todo>> + Send;
    fn get_todo(&self, id: i64) -> impl Future<Output = AppResult<Option<Todo>>> + Send;
    fn update_todo(&self, update: TodoUpdate) -> impl Future<Output = AppResult<Todo>> + Send;
    fn soft_delete(&self, id: i64) -> impl Future<Output = AppResult<()>> + Send;
    fn permanently_delete(&self, id: i64) -> impl Future<Output = AppResult<()>> + Send;
    fn restore(&self, id: i64) -> impl Future<Output = AppResult<Todo>> + Send;
    fn list_todos(&self, query: TodoListQuery) -> impl Future<Output = AppResult<PageResponse<Todo>>> + Send;
    fn list_deleted_todos(
        &self,
        query: TodoListQuery,
    ) -> impl Future<Output = AppResult<PageResponse<Todo>>> + Send;
    fn get_or_create_tag(&self, name: String) -> impl Future<Output = AppResult<Tag>> + Send;
    fn delete_tag(&self, id: i64) -> impl Future<Output = AppResult<()>> + Send;
    fn list_tags(&self) -> impl Future<Output = AppResult<Vec<Tag>>> + Send;
}

/// SQLite store driven from async code. Every call hops onto the blocking
/// pool so a slow disk never stalls the runtime's worker threads.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    db: Arc<Database>,
}

impl SqliteBackend {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    async fn blocking<T, F>(&self, call: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> AppResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || call(&db)).await?
    }
}

impl TodoBackend for SqliteBackend {
    async fn add_todo(&self, create: TodoCreate) -> AppResult<Todo> {
        self.blocking(move |db| db.add_todo(&create)).await
    }

    async fn get_todo(&self, id: i64) -> AppResult<Option<Todo>> {
        self.blocking(move |db| db.get_todo(id)).await
    }

    async fn update_todo(&self, update: TodoUpdate) -> AppResult<Todo> {
        self.blocking(move |db| db.update_todo(&update)).await
    }

    async fn soft_delete(&self, id: i64) -> AppResult<()> {
        self.blocking(move |db| db.soft_delete_todo(id)).await
    }

    async fn permanently_delete(&self, id: i64) -> AppResult<()> {
        self.blocking(move |db| db.permanently_delete_todo(id)).await
    }

    async fn restore(&self, id: i64) -> AppResult<Todo> {
        self.blocking(move |db| db.restore_todo(id)).await
    }

    async fn list_todos(&self, query: TodoListQuery) -> AppResult<PageResponse<Todo>> {
        self.blocking(move |db| db.list_todos(&query)).await
    }

    async fn list_deleted_todos(&self, query: TodoListQuery) -> AppResult<PageResponse<Todo>> {
        self.blocking(move |db| db.list_deleted_todos(&query)).await
    }

    async fn get_or_create_tag(&self, name: String) -> AppResult<Tag> {
        self.blocking(move |db| db.get_or_create_tag(&name)).await
    }

    async fn delete_tag(&self, id: i64) -> AppResult<()> {
        self.blocking(move |db| db.delete_tag(id)).await
    }

    async fn list_tags(&self) -> AppResult<Vec<Tag>> {
        self.blocking(|db| db.list_tags()).await
    }
}


#[cfg(test)]
mod tests {
    use super::{SqliteBackend, TodoBackend};
    use crate::db::Database;
    use crate::models::{TodoCreate, TodoListQuery};
    use std::sync::Arc;

    #[tokio::test]
    async fn sqlite_backend_round_trips_through_blocking_pool() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(&dir.path().join("fon.db")).expect("db"));
        let backend = SqliteBackend::new(db);

        let created = backend
            .add_todo(TodoCreate {
                tags: vec!["work".to_string()],
                ..TodoCreate::titled("async")
            })
            .await
            .expect("add");
        let page = backend.list_todos(TodoListQuery::default()).await.expect("list");
        assert_eq!(page.total, 1);
        assert_eq!(page.data[0].id, created.id);

        let first = backend.get_or_create_tag("work".to_string()).await.expect("tag");
        let tags = backend.list_tags().await.expect("tags");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].id, first.id);
    }
}
