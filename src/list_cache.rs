use crate::backend::TodoBackend;
use crate::errors::AppResult;
use crate::models::{PageResponse, Todo, TodoListQuery};

/// Total reported before the first successful fetch. Larger than any real
/// count, so `load_more` is allowed until a real total is known.
pub const UNKNOWN_TOTAL: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListSource {
    Active,
    Deleted,
}

/// One partition's client-side window onto the store: the rows loaded so
/// far, the store's full match count, and the page cursor.
///
/// Fetches never dedupe against rows already held; callers serialize
/// `refresh` and `load_more` on one instance.
#[derive(Debug, Clone)]
pub struct ListCache {
    source: ListSource,
    defaults: TodoListQuery,
    query: TodoListQuery,
    items: Vec<Todo>,
    total: u64,
}

impl ListCache {
    pub fn new(source: ListSource, defaults: TodoListQuery) -> Self {
        Self {
            source,
            query: defaults.clone(),
            defaults,
            items: Vec::new(),
            total: UNKNOWN_TOTAL,
        }
    }

    pub fn source(&self) -> ListSource {
        self.source
    }

    pub fn items(&self) -> &[Todo] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn page(&self) -> Option<u32> {
        self.query.page
    }

    pub fn query(&self) -> &TodoListQuery {
        &self.query
    }

    pub fn position(&self, id: i64) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.position(id).is_some()
    }

    /// The query a refresh would issue: the cache's defaults overlaid with `overrides`.
    pub fn refresh_query(&self, overrides: &TodoListQuery) -> TodoListQuery {
        self.defaults.merged_with(overrides)
    }

    /// Replaces rows, total and query in one step.
    pub fn apply_refresh(&mut self, query: TodoListQuery, page: PageResponse<Todo>) {
        self.query = query;
        self.items = page.data;
        self.total = page.total;
    }

    /// The next page's query, or `None` when there is nothing left to load.
    /// A zero page size never advances.
    pub fn next_page_query(&self) -> Option<TodoListQuery> {
        let page = self.query.page?;
        let page_size = self.query.page_size.filter(|size| *size > 0)?;
        if u64::from(page).saturating_mul(u64::from(page_size)) >= self.total {
            return None;
        }
        Some(TodoListQuery {
            page: Some(page + 1),
            ..self.query.clone()
        })
    }

    /// Appends a fetched page and advances the cursor. The total is taken from
    /// the response since the true count may have moved since the last fetch.
    pub fn apply_next_page(&mut self, query: TodoListQuery, page: PageResponse<Todo>) {
        self.query = query;
        self.items.extend(page.data);
        self.total = page.total;
    }

    pub async fn refresh<B: TodoBackend>(&mut self, backend: &B, overrides: &TodoListQuery) -> AppResult<()> {
        let query = self.refresh_query(overrides);
        let page = fetch(backend, self.source, query.clone()).await?;
        tracing::debug!(
            source = ?self.source,
            rows = page.data.len(),
            total = page.total,
            "list cache refreshed"
        );
        self.apply_refresh(query, page);
        Ok(())
    }

    /// Returns `Ok(false)` without touching the store when every matching row
    /// is already loaded or the cache is unpaged.
    pub async fn load_more<B: TodoBackend>(&mut self, backend: &B) -> AppResult<bool> {
        let Some(query) = self.next_page_query() else {
            return Ok(false);
        };
        let page = fetch(backend, self.source, query.clone()).await?;
        self.apply_next_page(query, page);
        Ok(true)
    }

    /// Inserts ahead of the first row created strictly earlier, keeping the
    /// list in descending creation order; appends when there is none.
    pub fn insert_by_created_at(&mut self, todo: Todo) -> usize {
        let index = self
            .items
            .iter()
            .position(|item| item.created_at < todo.created_at)
            .unwrap_or(self.items.len());
        self.items.insert(index, todo);
        index
    }

    /// Swaps the row with the same id in place. Position never changes.
    pub fn replace(&mut self, todo: Todo) -> bool {
        match self.position(todo.id) {
            Some(index) => {
                self.items[index] = todo;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: i64) -> Option<Todo> {
        let index = self.position(id)?;
        Some(self.items.remove(index))
    }
}

pub(crate) async fn fetch<B: TodoBackend>(
    backend: &B,
    source: ListSource,
    query: TodoListQuery,
) -> AppResult<PageResponse<Todo>> {
    match source {
        ListSource::Active => backend.list_todos(query).await,
        ListSource::Deleted => backend.list_deleted_todos(query).await,
    }
}
