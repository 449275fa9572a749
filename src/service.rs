use crate::backend::{SqliteBackend, TodoBackend};
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::list_cache;
use crate::models::{AppSettings, Tag, Todo, TodoCreate, TodoListQuery, TodoUpdate};
use crate::partition::{Partition, ResolvedView, ViewRouter};
use crate::reconcile::{ListCaches, Mutation, MutationKind};
use crate::tag_index::TagIndex;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 256;
const INITIAL_NAV: &str = "#all";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StoreEvent {
    MutationCommitted { kind: MutationKind, id: i64 },
    ViewChanged { key: String, title: String },
    TagsRefreshed { count: usize },
    TagRefreshFailed { message: String },
}

/// Session-scoped owner of the list caches and the tag index.
///
/// Store calls are awaited without any cache lock held; the reconciler then
/// runs under the cache lock with no suspension point, so readers never see a
/// half-applied write. Independent mutations are not serialized against each
/// other and may land in a different order than they were issued.
pub struct TodoService<B: TodoBackend> {
    backend: Arc<B>,
    caches: Mutex<ListCaches>,
    tags: Arc<TagIndex>,
    router: ViewRouter,
    nav: Mutex<String>,
    events: broadcast::Sender<StoreEvent>,
    tag_refresh: Mutex<TagRefreshChain>,
    tag_refresh_done: Arc<watch::Sender<u64>>,
}

/// Tail of the background tag refresh chain and the generation it was issued as.
#[derive(Default)]
struct TagRefreshChain {
    head: Option<JoinHandle<()>>,
    issued: u64,
}

// Publishes a finished generation even when the refresh task unwinds.
struct MarkSettled {
    done: Arc<watch::Sender<u64>>,
    generation: u64,
}

impl Drop for MarkSettled {
    fn drop(&mut self) {
        let generation = self.generation;
        self.done.send_modify(|done| *done = (*done).max(generation));
    }
}

impl TodoService<SqliteBackend> {
    /// Opens `<app_data_dir>/data/db/fon.db` and sizes the caches from the
    /// stored settings.
    pub fn open(app_data_dir: &Path) -> AppResult<Self> {
        let db_path = app_data_dir.join("data").join("db").join("fon.db");
        let db = Arc::new(Database::new(&db_path)?);
        let settings = db.get_settings()?;
        Ok(Self::new(
            Arc::new(SqliteBackend::new(db)),
            ViewRouter::default(),
            &settings,
        ))
    }

    pub fn database(&self) -> &Arc<Database> {
        self.backend.database()
    }
}

impl<B: TodoBackend> TodoService<B> {
    pub fn new(backend: Arc<B>, router: ViewRouter, settings: &AppSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            backend,
            caches: Mutex::new(ListCaches::new(settings.page_size, settings.done_page_size)),
            tags: Arc::new(TagIndex::new()),
            router,
            nav: Mutex::new(INITIAL_NAV.to_string()),
            events,
            tag_refresh: Mutex::new(TagRefreshChain::default()),
            tag_refresh_done: Arc::new(watch::channel(0).0),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn caches(&self) -> MutexGuard<'_, ListCaches> {
        self.caches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn add_todo(&self, create: TodoCreate) -> AppResult<Todo> {
        let todo = self
            .backend
            .add_todo(create)
            .await
            .inspect_err(|error| tracing::warn!(error = %error, "failed to add todo"))?;
        self.commit(MutationKind::Create, todo.id, [Mutation::Insert(todo.clone())]);
        Ok(todo)
    }

    pub async fn update_todo(&self, update: TodoUpdate) -> AppResult<Todo> {
        let id = update.id;
        let todo = self
            .backend
            .update_todo(update)
            .await
            .inspect_err(|error| tracing::warn!(todo_id = id, error = %error, "failed to update todo"))?;
        self.commit(MutationKind::Update, todo.id, [Mutation::Update(todo.clone())]);
        Ok(todo)
    }

    /// Soft delete. The row leaves the undone/done caches; the trash cache
    /// does not gain it until that cache is refreshed.
    pub async fn delete_todo(&self, id: i64) -> AppResult<()> {
        self.backend
            .soft_delete(id)
            .await
            .inspect_err(|error| tracing::warn!(todo_id = id, error = %error, "failed to delete todo"))?;
        self.commit(MutationKind::Delete, id, [Mutation::Delete(id)]);
        Ok(())
    }

    pub async fn permanently_delete_todo(&self, id: i64) -> AppResult<()> {
        self.backend
            .permanently_delete(id)
            .await
            .inspect_err(|error| tracing::warn!(todo_id = id, error = %error, "failed to purge todo"))?;
        self.commit(MutationKind::PermanentDelete, id, [Mutation::RemoveFromTrash(id)]);
        Ok(())
    }

    pub async fn restore_todo(&self, id: i64) -> AppResult<Todo> {
        let todo = self
            .backend
            .restore(id)
            .await
            .inspect_err(|error| tracing::warn!(todo_id = id, error = %error, "failed to restore todo"))?;
        self.commit(
            MutationKind::Restore,
            id,
            [Mutation::Insert(todo.clone()), Mutation::RemoveFromTrash(id)],
        );
        Ok(todo)
    }

    /// Removes the tag everywhere, then re-reads the caches of the current view
    /// since their rows carried the label.
    pub async fn delete_tag(&self, id: i64) -> AppResult<()> {
        self.backend
            .delete_tag(id)
            .await
            .inspect_err(|error| tracing::warn!(tag_id = id, error = %error, "failed to delete tag"))?;
        self.spawn_tag_refresh();
        let view = self.current_view()?;
        self.refresh_view(&view).await
    }

    pub async fn get_todo(&self, id: i64) -> AppResult<Option<Todo>> {
        self.backend.get_todo(id).await
    }

    pub async fn get_or_create_tag(&self, name: &str) -> AppResult<Tag> {
        self.backend.get_or_create_tag(name.to_string()).await
    }

    /// Switches to the view matching `nav` (falling back to the router's
    /// default) and re-reads the caches that view shows. An earlier view's
    /// fetch still in flight is not cancelled and overwrites when it lands.
    pub async fn open_view(&self, nav: &str) -> AppResult<ResolvedView> {
        let view = self
            .router
            .resolve_or_default(nav)
            .ok_or_else(|| AppError::Invalid(format!("no view matches '{}'", nav)))?;
        *self.nav.lock().unwrap_or_else(PoisonError::into_inner) = nav.to_string();
        let _ = self.events.send(StoreEvent::ViewChanged {
            key: view.key.clone(),
            title: view.title.clone(),
        });
        tracing::info!(view = %view.key, title = %view.title, "view opened");

        self.refresh_view(&view).await?;
        Ok(view)
    }

    pub fn current_nav(&self) -> String {
        self.nav.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn current_view(&self) -> AppResult<ResolvedView> {
        let nav = self.current_nav();
        self.router
            .resolve_or_default(&nav)
            .ok_or_else(|| AppError::Invalid(format!("no view matches '{}'", nav)))
    }

    async fn refresh_view(&self, view: &ResolvedView) -> AppResult<()> {
        match view.kind.partitions() {
            [single] => self.refresh_with(*single, &view.query).await,
            [first, second] => {
                let (first, second) = tokio::join!(
                    self.refresh_with(*first, &view.query),
                    self.refresh_with(*second, &view.query)
                );
                first.and(second)
            }
            partitions => {
                for partition in partitions {
                    self.refresh_with(*partition, &view.query).await?;
                }
                Ok(())
            }
        }
    }

    /// Re-reads one partition. Partitions shown by the current view use its
    /// filters; the others use their plain defaults.
    pub async fn refresh_partition(&self, partition: Partition) -> AppResult<()> {
        let view = self.current_view()?;
        let overrides = if view.kind.partitions().contains(&partition) {
            view.query
        } else {
            TodoListQuery::default()
        };
        self.refresh_with(partition, &overrides).await
    }

    async fn refresh_with(&self, partition: Partition, overrides: &TodoListQuery) -> AppResult<()> {
        let (source, query) = {
            let caches = self.caches();
            let cache = caches.get(partition);
            (cache.source(), cache.refresh_query(overrides))
        };

        let page = list_cache::fetch(self.backend.as_ref(), source, query.clone())
            .await
            .inspect_err(|error| {
                tracing::warn!(partition = partition.as_str(), error = %error, "list refresh failed")
            })?;
        tracing::debug!(
            partition = partition.as_str(),
            rows = page.data.len(),
            total = page.total,
            "list refreshed"
        );

        self.caches().get_mut(partition).apply_refresh(query, page);
        Ok(())
    }

    /// Appends the partition's next page. `Ok(false)` means nothing was left
    /// to load and no fetch was issued.
    pub async fn load_more(&self, partition: Partition) -> AppResult<bool> {
        let (source, query) = {
            let caches = self.caches();
            let cache = caches.get(partition);
            match cache.next_page_query() {
                Some(query) => (cache.source(), query),
                None => return Ok(false),
            }
        };

        let page = list_cache::fetch(self.backend.as_ref(), source, query.clone())
            .await
            .inspect_err(|error| {
                tracing::warn!(partition = partition.as_str(), error = %error, "load more failed")
            })?;
        self.caches().get_mut(partition).apply_next_page(query, page);
        Ok(true)
    }

    pub fn snapshot(&self, partition: Partition) -> Vec<Todo> {
        self.caches().get(partition).items().to_vec()
    }

    pub fn total(&self, partition: Partition) -> u64 {
        self.caches().get(partition).total()
    }

    pub fn position(&self, partition: Partition, id: i64) -> Option<usize> {
        self.caches().get(partition).position(id)
    }

    pub fn partitions_of(&self, id: i64) -> Vec<Partition> {
        self.caches().partitions_of(id)
    }

    pub fn tags(&self) -> Arc<Vec<Tag>> {
        self.tags.snapshot()
    }

    pub fn tag_index(&self) -> &Arc<TagIndex> {
        &self.tags
    }

    pub async fn refresh_tags(&self) -> AppResult<usize> {
        self.tags.refresh(self.backend.as_ref()).await
    }

    /// Waits for every background tag refresh issued so far. Refreshes issued
    /// while waiting stay queued behind them.
    pub async fn tag_refresh_settled(&self) {
        let target = self.tag_refresh.lock().unwrap_or_else(PoisonError::into_inner).issued;
        let mut done = self.tag_refresh_done.subscribe();
        if done.wait_for(|finished| *finished >= target).await.is_err() {
            tracing::warn!("tag refresh tracking closed");
        }
    }

    fn commit<const N: usize>(&self, kind: MutationKind, id: i64, mutations: [Mutation; N]) {
        {
            let mut caches = self.caches();
            for mutation in mutations {
                caches.apply(mutation);
            }
        }
        if kind.stales_trash() {
            tracing::debug!(todo_id = id, "trash cache stale until its next refresh");
        }
        let _ = self.events.send(StoreEvent::MutationCommitted { kind, id });
        if kind.refreshes_tags() {
            self.spawn_tag_refresh();
        }
    }

    /// Queues a full tag re-fetch behind any refresh already running, so the
    /// last one issued is the last one applied.
    fn spawn_tag_refresh(&self) {
        let backend = self.backend.clone();
        let tags = self.tags.clone();
        let events = self.events.clone();

        let mut chain = self.tag_refresh.lock().unwrap_or_else(PoisonError::into_inner);
        chain.issued += 1;
        let settled = MarkSettled {
            done: self.tag_refresh_done.clone(),
            generation: chain.issued,
        };
        let previous = chain.head.take();
        chain.head = Some(tokio::spawn(async move {
            let _settled = settled;
            if let Some(previous) = previous {
                if let Err(error) = previous.await {
                    tracing::warn!(error = %error, "tag refresh task ended abnormally");
                }
            }
            match tags.refresh(backend.as_ref()).await {
                Ok(count) => {
                    let _ = events.send(StoreEvent::TagsRefreshed { count });
                }
                Err(error) => {
                    tracing::warn!(error = %error, "tag index refresh failed");
                    let _ = events.send(StoreEvent::TagRefreshFailed {
                        message: error.to_string(),
                    });
                }
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::{StoreEvent, TodoService};
    use crate::backend::fake::FakeBackend;
    use crate::models::{AppSettings, TodoCreate, TodoUpdate};
    use crate::partition::{Partition, ViewRouter};
    use crate::reconcile::MutationKind;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn service(backend: FakeBackend) -> TodoService<FakeBackend> {
        TodoService::new(Arc::new(backend), ViewRouter::default(), &AppSettings::default())
    }

    fn ids(service: &TodoService<FakeBackend>, partition: Partition) -> Vec<i64> {
        service.snapshot(partition).iter().map(|todo| todo.id).collect()
    }

    #[tokio::test]
    async fn open_view_fills_active_caches() {
        let backend = FakeBackend::new();
        let older = backend.seed("older", 10, false, false);
        let newer = backend.seed("newer", 20, false, false);
        let finished = backend.seed("finished", 15, true, false);
        backend.seed("trashed", 5, false, true);
        let service = service(backend);

        let view = service.open_view("#all").await.expect("open");
        assert_eq!(view.title, "All");
        assert_eq!(ids(&service, Partition::Undone), vec![newer.id, older.id]);
        assert_eq!(ids(&service, Partition::Done), vec![finished.id]);
        assert!(service.snapshot(Partition::Deleted).is_empty());
        assert_eq!(service.total(Partition::Undone), 2);
    }

    #[tokio::test]
    async fn add_inserts_and_refreshes_tags_in_background() {
        let service = service(FakeBackend::new());
        service.open_view("#all").await.expect("open");

        let created = service
            .add_todo(TodoCreate {
                tags: vec!["work".to_string()],
                ..TodoCreate::titled("new")
            })
            .await
            .expect("add");
        assert_eq!(ids(&service, Partition::Undone), vec![created.id]);

        service.tag_refresh_settled().await;
        assert!(service.tag_index().contains("work"));
    }

    #[tokio::test]
    async fn completing_moves_between_caches() {
        let backend = FakeBackend::new();
        let a = backend.seed("a", 30, false, false);
        let b = backend.seed("b", 20, false, false);
        let c = backend.seed("c", 10, false, false);
        let service = service(backend);
        service.open_view("#all").await.expect("open");

        service
            .update_todo(TodoUpdate {
                is_done: Some(true),
                ..TodoUpdate::new(b.id)
            })
            .await
            .expect("complete");

        assert_eq!(ids(&service, Partition::Undone), vec![a.id, c.id]);
        assert_eq!(ids(&service, Partition::Done), vec![b.id]);
        assert_eq!(service.partitions_of(b.id), vec![Partition::Done]);
    }

    #[tokio::test]
    async fn rename_keeps_position() {
        let backend = FakeBackend::new();
        backend.seed("a", 30, false, false);
        let b = backend.seed("b", 20, false, false);
        backend.seed("c", 10, false, false);
        let service = service(backend);
        service.open_view("#all").await.expect("open");

        service
            .update_todo(TodoUpdate {
                title: Some("renamed".to_string()),
                ..TodoUpdate::new(b.id)
            })
            .await
            .expect("rename");

        assert_eq!(service.position(Partition::Undone, b.id), Some(1));
        assert_eq!(service.snapshot(Partition::Undone)[1].title, "renamed");
    }

    #[tokio::test]
    async fn soft_delete_leaves_trash_stale_until_refreshed() {
        let backend = FakeBackend::new();
        let finished = backend.seed("finished", 10, true, false);
        let service = service(backend);
        service.open_view("#all").await.expect("open");
        service.refresh_partition(Partition::Deleted).await.expect("trash");

        service.delete_todo(finished.id).await.expect("delete");
        assert!(service.snapshot(Partition::Done).is_empty());
        assert!(service.snapshot(Partition::Deleted).is_empty());

        service.refresh_partition(Partition::Deleted).await.expect("trash");
        assert_eq!(ids(&service, Partition::Deleted), vec![finished.id]);
    }

    #[tokio::test]
    async fn restore_and_purge_follow_the_trash() {
        let backend = FakeBackend::new();
        let first = backend.seed("first", 10, false, true);
        let second = backend.seed("second", 20, true, true);
        let service = service(backend);
        service.open_view("#deleted").await.expect("trash view");
        assert_eq!(service.snapshot(Partition::Deleted).len(), 2);

        let restored = service.restore_todo(second.id).await.expect("restore");
        assert!(!restored.is_deleted);
        assert_eq!(ids(&service, Partition::Done), vec![second.id]);
        assert_eq!(ids(&service, Partition::Deleted), vec![first.id]);

        service.permanently_delete_todo(first.id).await.expect("purge");
        assert!(service.snapshot(Partition::Deleted).is_empty());
        assert!(service.get_todo(first.id).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn failed_write_leaves_caches_and_events_untouched() {
        let backend = FakeBackend::new();
        let a = backend.seed("a", 10, false, false);
        let service = service(backend);
        service.open_view("#all").await.expect("open");
        let mut events = service.subscribe();

        service.backend().fail_writes.store(true, Ordering::SeqCst);
        assert!(service.delete_todo(a.id).await.is_err());
        assert!(service.add_todo(TodoCreate::titled("nope")).await.is_err());

        assert_eq!(ids(&service, Partition::Undone), vec![a.id]);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn tag_view_filters_and_delete_tag_rereads() {
        let backend = FakeBackend::new();
        let service = service(backend);
        let tagged = service
            .add_todo(TodoCreate {
                tags: vec!["work".to_string()],
                ..TodoCreate::titled("tagged")
            })
            .await
            .expect("add");
        service.add_todo(TodoCreate::titled("plain")).await.expect("add");

        let view = service.open_view("#tag/work").await.expect("tag view");
        assert_eq!(view.title, "#work");
        assert_eq!(ids(&service, Partition::Undone), vec![tagged.id]);

        let tag = service.get_or_create_tag("work").await.expect("tag");
        service.delete_tag(tag.id).await.expect("delete tag");
        service.tag_refresh_settled().await;

        assert!(service.snapshot(Partition::Undone).is_empty());
        assert!(service.tags().is_empty());
    }

    #[tokio::test]
    async fn events_announce_commits_and_views() {
        let service = service(FakeBackend::new());
        let mut events = service.subscribe();

        service.open_view("#deleted").await.expect("open");
        let created = service.add_todo(TodoCreate::titled("x")).await.expect("add");
        service.tag_refresh_settled().await;

        assert_eq!(
            events.recv().await.expect("view event"),
            StoreEvent::ViewChanged {
                key: "deleted".to_string(),
                title: "Deleted".to_string(),
            }
        );
        assert_eq!(
            events.recv().await.expect("commit event"),
            StoreEvent::MutationCommitted {
                kind: MutationKind::Create,
                id: created.id,
            }
        );
        assert_eq!(
            events.recv().await.expect("tags event"),
            StoreEvent::TagsRefreshed { count: 0 }
        );
    }

    #[tokio::test]
    async fn settling_keeps_later_refreshes_queued() {
        let service = service(FakeBackend::new());
        service.tag_refresh_settled().await;

        service
            .add_todo(TodoCreate {
                tags: vec!["alpha".to_string()],
                ..TodoCreate::titled("first")
            })
            .await
            .expect("add");
        let (_, second) = tokio::join!(
            service.tag_refresh_settled(),
            service.add_todo(TodoCreate {
                tags: vec!["beta".to_string()],
                ..TodoCreate::titled("second")
            })
        );
        second.expect("add");
        service.tag_refresh_settled().await;

        assert_eq!(service.tag_index().names(), vec!["alpha".to_string(), "beta".to_string()]);
        assert_eq!(service.backend().tag_list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_nav_falls_back_to_all() {
        let service = service(FakeBackend::new());
        let view = service.open_view("#nowhere").await.expect("fallback");
        assert_eq!(view.key, "all");
        assert_eq!(service.current_nav(), "#nowhere");
    }

    #[tokio::test]
    async fn load_more_stops_at_total() {
        let backend = FakeBackend::new();
        for index in 0..3 {
            backend.seed(&format!("t{}", index), index, true, false);
        }
        let service = TodoService::new(
            Arc::new(backend),
            ViewRouter::default(),
            &AppSettings {
                done_page_size: 2,
                ..AppSettings::default()
            },
        );
        service.open_view("#all").await.expect("open");
        assert_eq!(service.snapshot(Partition::Done).len(), 2);
        let before = service.backend().list_count();

        assert!(service.load_more(Partition::Done).await.expect("page 2"));
        assert!(!service.load_more(Partition::Done).await.expect("done"));
        assert_eq!(service.snapshot(Partition::Done).len(), 3);
        assert_eq!(service.backend().list_count(), before + 1);
    }
}
