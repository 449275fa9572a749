use crate::list_cache::{ListCache, ListSource};
use crate::models::{Todo, TodoListQuery};
use crate::partition::Partition;
use serde::{Deserialize, Serialize};

/// A committed store write, carrying only what the caches need to follow it.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// New row, or a row whose partition newly includes it (restore).
    Insert(Todo),
    /// Row re-read after a write.
    Update(Todo),
    /// Soft delete: leaves the trash cache stale until its own refresh.
    Delete(i64),
    /// Gone from the trash: restored elsewhere or permanently deleted.
    RemoveFromTrash(i64),
}

/// The store operation that produced one or more [`Mutation`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    PermanentDelete,
    Restore,
}

impl MutationKind {
    /// Every kind triggers a full tag-index re-fetch afterwards, permanent
    /// delete included.
    pub fn refreshes_tags(self) -> bool {
        match self {
            Self::Create | Self::Update | Self::Delete | Self::PermanentDelete | Self::Restore => true,
        }
    }

    /// Soft delete is the only kind that leaves a partition behind the store:
    /// the trash cache lacks the row until it is refreshed.
    pub fn stales_trash(self) -> bool {
        matches!(self, Self::Delete)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::PermanentDelete => "permanent-delete",
            Self::Restore => "restore",
        }
    }
}

/// The three partition caches, each owned here and nowhere else.
#[derive(Debug, Clone)]
pub struct ListCaches {
    pub undone: ListCache,
    pub done: ListCache,
    pub deleted: ListCache,
}

impl ListCaches {
    pub fn new(page_size: u32, done_page_size: u32) -> Self {
        Self {
            undone: ListCache::new(
                ListSource::Active,
                TodoListQuery {
                    is_done: Some(false),
                    ..TodoListQuery::paged(1, page_size)
                },
            ),
            done: ListCache::new(
                ListSource::Active,
                TodoListQuery {
                    is_done: Some(true),
                    ..TodoListQuery::paged(1, done_page_size)
                },
            ),
            deleted: ListCache::new(ListSource::Deleted, TodoListQuery::paged(1, page_size)),
        }
    }

    pub fn get(&self, partition: Partition) -> &ListCache {
        match partition {
            Partition::Undone => &self.undone,
            Partition::Done => &self.done,
            Partition::Deleted => &self.deleted,
        }
    }

    pub fn get_mut(&mut self, partition: Partition) -> &mut ListCache {
        match partition {
            Partition::Undone => &mut self.undone,
            Partition::Done => &mut self.done,
            Partition::Deleted => &mut self.deleted,
        }
    }

    /// Applies a committed write in memory. Never fails; an id missing from a
    /// cache is a no-op for that cache.
    pub fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::Insert(todo) => {
                let target = Partition::of(&todo);
                let id = todo.id;
                let index = self.get_mut(target).insert_by_created_at(todo);
                tracing::debug!(todo_id = id, partition = target.as_str(), index, "reconciled insert");
            }
            Mutation::Update(todo) => self.apply_update(todo),
            Mutation::Delete(id) => {
                let from_undone = self.undone.remove(id).is_some();
                let from_done = self.done.remove(id).is_some();
                tracing::debug!(todo_id = id, from_undone, from_done, "reconciled soft delete");
            }
            Mutation::RemoveFromTrash(id) => {
                let removed = self.deleted.remove(id).is_some();
                tracing::debug!(todo_id = id, removed, "reconciled trash removal");
            }
        }
    }

    fn apply_update(&mut self, todo: Todo) {
        let id = todo.id;

        // An edit that sets the deletion flag leaves the active lists like a
        // soft delete; one that clears it on a trashed row acts as a restore.
        if todo.is_deleted {
            self.undone.remove(id);
            self.done.remove(id);
            self.deleted.replace(todo);
            tracing::debug!(todo_id = id, "reconciled update into trash");
            return;
        }
        if self.deleted.remove(id).is_some() {
            let target = Partition::of(&todo);
            self.get_mut(target).insert_by_created_at(todo);
            tracing::debug!(todo_id = id, partition = target.as_str(), "reconciled update out of trash");
            return;
        }

        if todo.is_done && self.undone.contains(id) {
            self.undone.remove(id);
            self.done.insert_by_created_at(todo);
            tracing::debug!(todo_id = id, "reconciled move undone -> done");
            return;
        }

        if !todo.is_done && self.done.contains(id) {
            self.done.remove(id);
            self.undone.insert_by_created_at(todo);
            tracing::debug!(todo_id = id, "reconciled move done -> undone");
            return;
        }

        for partition in Partition::ALL {
            self.get_mut(partition).replace(todo.clone());
        }
        tracing::debug!(todo_id = id, "reconciled update in place");
    }

    /// Partitions currently holding `id`.
    pub fn partitions_of(&self, id: i64) -> Vec<Partition> {
        Partition::ALL
            .into_iter()
            .filter(|partition| self.get(*partition).contains(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{ListCaches, Mutation, MutationKind};
    use crate::models::{Repeat, Todo};
    use crate::partition::Partition;
    use chrono::{DateTime, Duration, Utc};

    fn todo(id: i64, created_secs: i64) -> Todo {
        let created = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("epoch") + Duration::seconds(created_secs);
        Todo {
            id,
            title: format!("todo {}", id),
            date: None,
            repeat: Repeat::Never,
            end_repeat_type: None,
            end_repeat_date: None,
            remaining_count: None,
            content: String::new(),
            tags: Vec::new(),
            category: None,
            is_done: false,
            is_deleted: false,
            created_at: created,
            updated_at: created,
        }
    }

    fn done(mut todo: Todo) -> Todo {
        todo.is_done = true;
        todo
    }

    fn ids(caches: &ListCaches, partition: Partition) -> Vec<i64> {
        caches.get(partition).items().iter().map(|todo| todo.id).collect()
    }

    fn assert_exclusive(caches: &ListCaches) {
        for id in 1..=20 {
            assert!(caches.partitions_of(id).len() <= 1, "todo {} in more than one cache", id);
        }
    }

    #[test]
    fn insert_lands_between_older_and_newer_rows() {
        let mut caches = ListCaches::new(50, 50);
        caches.apply(Mutation::Insert(todo(1, 300)));
        caches.apply(Mutation::Insert(todo(2, 100)));

        caches.apply(Mutation::Insert(todo(3, 200)));

        assert_eq!(ids(&caches, Partition::Undone), vec![1, 3, 2]);
    }

    #[test]
    fn insert_order_is_independent_of_arrival_order() {
        for order in [[1, 2, 3], [3, 2, 1], [2, 3, 1], [3, 1, 2]] {
            let mut caches = ListCaches::new(50, 50);
            for id in order {
                caches.apply(Mutation::Insert(todo(id, 1000 - id * 100)));
            }
            assert_eq!(ids(&caches, Partition::Undone), vec![1, 2, 3]);
        }
    }

    #[test]
    fn equal_creation_times_append_after_existing() {
        let mut caches = ListCaches::new(50, 50);
        caches.apply(Mutation::Insert(todo(1, 5)));
        caches.apply(Mutation::Insert(todo(2, 5)));
        assert_eq!(ids(&caches, Partition::Undone), vec![1, 2]);
    }

    #[test]
    fn done_insert_targets_done_cache() {
        let mut caches = ListCaches::new(50, 50);
        caches.apply(Mutation::Insert(done(todo(1, 1))));
        assert_eq!(ids(&caches, Partition::Done), vec![1]);
        assert!(caches.undone.is_empty());
    }

    #[test]
    fn update_in_place_preserves_position_even_if_sort_key_changes() {
        let mut caches = ListCaches::new(50, 50);
        for (id, at) in [(1, 300), (2, 200), (3, 100)] {
            caches.apply(Mutation::Insert(todo(id, at)));
        }

        let mut edited = todo(2, 999);
        edited.title = "edited".to_string();
        caches.apply(Mutation::Update(edited));

        assert_eq!(ids(&caches, Partition::Undone), vec![1, 2, 3]);
        assert_eq!(caches.undone.items()[1].title, "edited");
    }

    #[test]
    fn completing_moves_undone_to_done() {
        let mut caches = ListCaches::new(50, 50);
        for (id, at) in [(1, 300), (2, 200), (3, 100)] {
            caches.apply(Mutation::Insert(todo(id, at)));
        }
        caches.apply(Mutation::Insert(done(todo(4, 400))));
        caches.apply(Mutation::Insert(done(todo(5, 50))));
        let before = caches.undone.len();

        caches.apply(Mutation::Update(done(todo(2, 200))));

        assert_eq!(caches.undone.len(), before - 1);
        assert_eq!(ids(&caches, Partition::Undone), vec![1, 3]);
        assert_eq!(ids(&caches, Partition::Done), vec![4, 2, 5]);
        assert_exclusive(&caches);
    }

    #[test]
    fn reopening_moves_done_to_undone() {
        let mut caches = ListCaches::new(50, 50);
        caches.apply(Mutation::Insert(todo(1, 300)));
        caches.apply(Mutation::Insert(done(todo(2, 400))));

        caches.apply(Mutation::Update(todo(2, 400)));

        assert_eq!(ids(&caches, Partition::Undone), vec![2, 1]);
        assert!(caches.done.is_empty());
        assert_exclusive(&caches);
    }

    #[test]
    fn update_for_uncached_row_changes_nothing() {
        let mut caches = ListCaches::new(50, 50);
        caches.apply(Mutation::Insert(todo(1, 1)));
        caches.apply(Mutation::Update(done(todo(9, 9))));
        assert_eq!(ids(&caches, Partition::Undone), vec![1]);
        assert!(caches.done.is_empty());
    }

    #[test]
    fn soft_delete_removes_from_active_but_not_into_trash() {
        let mut caches = ListCaches::new(50, 50);
        caches.apply(Mutation::Insert(todo(4, 10)));
        caches.apply(Mutation::Insert(done(todo(5, 20))));

        caches.apply(Mutation::Delete(5));

        assert!(caches.done.is_empty());
        assert_eq!(ids(&caches, Partition::Undone), vec![4]);
        assert!(caches.deleted.is_empty());
        assert!(MutationKind::Delete.stales_trash());
    }

    #[test]
    fn remove_from_trash_is_idempotent() {
        let mut caches = ListCaches::new(50, 50);
        let mut trashed = todo(7, 7);
        trashed.is_deleted = true;
        caches.deleted.insert_by_created_at(trashed);

        caches.apply(Mutation::RemoveFromTrash(7));
        caches.apply(Mutation::RemoveFromTrash(7));
        assert!(caches.deleted.is_empty());
    }

    #[test]
    fn restore_is_insert_plus_trash_removal() {
        let mut caches = ListCaches::new(50, 50);
        caches.apply(Mutation::Insert(todo(1, 100)));
        let mut trashed = done(todo(2, 200));
        trashed.is_deleted = true;
        caches.deleted.insert_by_created_at(trashed.clone());

        trashed.is_deleted = false;
        caches.apply(Mutation::Insert(trashed));
        caches.apply(Mutation::RemoveFromTrash(2));

        assert_eq!(ids(&caches, Partition::Done), vec![2]);
        assert!(caches.deleted.is_empty());
        assert_exclusive(&caches);
    }

    #[test]
    fn update_setting_deleted_flag_leaves_active_lists() {
        let mut caches = ListCaches::new(50, 50);
        caches.apply(Mutation::Insert(todo(1, 1)));
        let mut trashed = todo(1, 1);
        trashed.is_deleted = true;

        caches.apply(Mutation::Update(trashed));

        assert!(caches.undone.is_empty());
        assert!(caches.deleted.is_empty());
        assert_exclusive(&caches);
    }

    #[test]
    fn update_clearing_deleted_flag_moves_out_of_trash() {
        let mut caches = ListCaches::new(50, 50);
        let mut trashed = todo(3, 3);
        trashed.is_deleted = true;
        caches.apply(Mutation::Insert(trashed));
        assert_eq!(ids(&caches, Partition::Deleted), vec![3]);

        caches.apply(Mutation::Update(todo(3, 3)));

        assert!(caches.deleted.is_empty());
        assert_eq!(ids(&caches, Partition::Undone), vec![3]);
    }

    #[test]
    fn every_kind_refreshes_tags() {
        for kind in [
            MutationKind::Create,
            MutationKind::Update,
            MutationKind::Delete,
            MutationKind::PermanentDelete,
            MutationKind::Restore,
        ] {
            assert!(kind.refreshes_tags(), "{} should refresh tags", kind.as_str());
        }
        assert!(!MutationKind::Restore.stales_trash());
    }
}
