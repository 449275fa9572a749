use crate::models::{Todo, TodoListQuery};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// The three mutually exclusive groupings a todo can sit in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Partition {
    Undone,
    Done,
    Deleted,
}

impl Partition {
    pub const ALL: [Partition; 3] = [Partition::Undone, Partition::Done, Partition::Deleted];

    /// Deletion wins over completion.
    pub fn of(todo: &Todo) -> Self {
        Self::from_flags(todo.is_deleted, todo.is_done)
    }

    pub fn from_flags(is_deleted: bool, is_done: bool) -> Self {
        match (is_deleted, is_done) {
            (true, _) => Self::Deleted,
            (false, true) => Self::Done,
            (false, false) => Self::Undone,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Undone => "undone",
            Self::Done => "done",
            Self::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewKind {
    /// Backed by the undone and done caches.
    Normal,
    /// Backed by the deleted cache.
    Trash,
}

impl ViewKind {
    pub fn partitions(self) -> &'static [Partition] {
        match self {
            Self::Normal => &[Partition::Undone, Partition::Done],
            Self::Trash => &[Partition::Deleted],
        }
    }
}

pub enum ViewTitle {
    Fixed(&'static str),
    Captured(fn(&Captures<'_>) -> String),
}

pub struct ViewTemplate {
    pub key: &'static str,
    pub pattern: Regex,
    pub kind: ViewKind,
    pub title: ViewTitle,
    pub query: fn(&Captures<'_>) -> TodoListQuery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedView {
    pub key: String,
    pub kind: ViewKind,
    pub title: String,
    pub query: TodoListQuery,
}

/// Ordered view table matched against the navigation hash (`#all`,
/// `#tag/<name>`, `#deleted`). First match wins.
pub struct ViewRouter {
    templates: Vec<ViewTemplate>,
    fallback_nav: String,
}

impl ViewRouter {
    pub fn new(templates: Vec<ViewTemplate>, fallback_nav: impl Into<String>) -> Self {
        Self {
            templates,
            fallback_nav: fallback_nav.into(),
        }
    }

    pub fn resolve(&self, nav: &str) -> Option<ResolvedView> {
        self.templates.iter().find_map(|template| {
            let captures = template.pattern.captures(nav)?;
            let title = match &template.title {
                ViewTitle::Fixed(title) => (*title).to_string(),
                ViewTitle::Captured(render) => render(&captures),
            };
            Some(ResolvedView {
                key: template.key.to_string(),
                kind: template.kind,
                title,
                query: (template.query)(&captures),
            })
        })
    }

    /// Resolves `nav`, or the router's fallback navigation when nothing matches.
    pub fn resolve_or_default(&self, nav: &str) -> Option<ResolvedView> {
        self.resolve(nav).or_else(|| self.resolve(&self.fallback_nav))
    }

    pub fn fallback_nav(&self) -> &str {
        &self.fallback_nav
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.templates.iter().map(|template| template.key)
    }
}

impl Default for ViewRouter {
    fn default() -> Self {
        Self::new(
            vec![
                ViewTemplate {
                    key: "all",
                    pattern: Regex::new(r"^#all").expect("valid all-view pattern"),
                    kind: ViewKind::Normal,
                    title: ViewTitle::Fixed("All"),
                    query: |_| TodoListQuery::default(),
                },
                ViewTemplate {
                    key: "tag",
                    pattern: Regex::new(r"^#tag/([^/]+)").expect("valid tag-view pattern"),
                    kind: ViewKind::Normal,
                    title: ViewTitle::Captured(|captures| format!("#{}", &captures[1])),
                    query: |captures| TodoListQuery {
                        tags: Some(vec![captures[1].to_string()]),
                        ..TodoListQuery::default()
                    },
                },
                ViewTemplate {
                    key: "deleted",
                    pattern: Regex::new(r"^#deleted").expect("valid trash-view pattern"),
                    kind: ViewKind::Trash,
                    title: ViewTitle::Fixed("Deleted"),
                    query: |_| TodoListQuery::default(),
                },
            ],
            "#all",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{Partition, ViewKind, ViewRouter};

    #[test]
    fn deletion_dominates_completion() {
        assert_eq!(Partition::from_flags(true, true), Partition::Deleted);
        assert_eq!(Partition::from_flags(true, false), Partition::Deleted);
        assert_eq!(Partition::from_flags(false, true), Partition::Done);
        assert_eq!(Partition::from_flags(false, false), Partition::Undone);
    }

    #[test]
    fn tag_view_carries_name_in_title_and_query() {
        let router = ViewRouter::default();
        let view = router.resolve("#tag/work").expect("tag view");
        assert_eq!(view.key, "tag");
        assert_eq!(view.title, "#work");
        assert_eq!(view.kind, ViewKind::Normal);
        assert_eq!(view.query.tags, Some(vec!["work".to_string()]));
    }

    #[test]
    fn trash_view_maps_to_deleted_partition() {
        let router = ViewRouter::default();
        let view = router.resolve("#deleted").expect("trash view");
        assert_eq!(view.kind, ViewKind::Trash);
        assert_eq!(view.kind.partitions(), &[Partition::Deleted]);
        assert!(view.query.tags.is_none());
    }

    #[test]
    fn unmatched_nav_is_none_unless_defaulted() {
        let router = ViewRouter::default();
        assert!(router.resolve("#settings").is_none());
        assert!(router.resolve("#tag/").is_none());

        let fallback = router.resolve_or_default("#settings").expect("fallback");
        assert_eq!(fallback.key, "all");
        assert_eq!(fallback.title, "All");
    }

    #[test]
    fn declared_order_decides_ties() {
        let router = ViewRouter::default();
        let keys: Vec<_> = router.keys().collect();
        assert_eq!(keys, vec!["all", "tag", "deleted"]);
        assert_eq!(router.resolve("#all/anything").expect("all").key, "all");
    }
}
