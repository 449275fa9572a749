use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Repeat {
    #[default]
    Never,
    Daily,
    Weekly,
    Monthly,
}

impl Repeat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndRepeatType {
    Always,
    Date,
    Count,
}

impl EndRepeatType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::Date => "date",
            Self::Count => "count",
        }
    }
}

/// A to-do item as stored and as held by the list caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    pub id: i64,
    pub title: String,
    pub date: Option<DateTime<Utc>>,
    pub repeat: Repeat,
    pub end_repeat_type: Option<EndRepeatType>,
    pub end_repeat_date: Option<DateTime<Utc>>,
    pub remaining_count: Option<i64>,
    pub content: String,
    /// Sorted by name when read back from the store.
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub is_done: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TodoCreate {
    pub title: String,
    pub date: Option<DateTime<Utc>>,
    pub repeat: Repeat,
    pub end_repeat_type: Option<EndRepeatType>,
    pub end_repeat_date: Option<DateTime<Utc>>,
    pub remaining_count: Option<i64>,
    pub content: String,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub is_done: bool,
    pub is_deleted: bool,
}

impl TodoCreate {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Adds every `#label` written in the title to `tags`, keeping existing order.
    pub fn with_title_hashtags(mut self) -> Self {
        for tag in crate::hashtags::extract_hashtags(&self.title) {
            if !self.tags.contains(&tag) {
                self.tags.push(tag);
            }
        }
        self
    }
}

/// Partial update. Nullable columns use `Option<Option<_>>` so that
/// `Some(None)` clears the column and `None` leaves it untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TodoUpdate {
    pub id: i64,
    pub title: Option<String>,
    #[serde(deserialize_with = "present_or_null")]
    pub date: Option<Option<DateTime<Utc>>>,
    pub repeat: Option<Repeat>,
    #[serde(deserialize_with = "present_or_null")]
    pub end_repeat_type: Option<Option<EndRepeatType>>,
    #[serde(deserialize_with = "present_or_null")]
    pub end_repeat_date: Option<Option<DateTime<Utc>>>,
    #[serde(deserialize_with = "present_or_null")]
    pub remaining_count: Option<Option<i64>>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    #[serde(deserialize_with = "present_or_null")]
    pub category: Option<Option<String>>,
    pub is_done: Option<bool>,
    pub is_deleted: Option<bool>,
}

// A present key, `null` included, becomes `Some`; only a missing key is `None`.
fn present_or_null<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl TodoUpdate {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Id,
    Title,
    Date,
    CreatedAt,
    UpdatedAt,
}

impl SortField {
    pub fn column(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Title => "title",
            Self::Date => "date",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TodoListQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub sort: Option<SortField>,
    pub order: Option<SortOrder>,
    pub is_done: Option<bool>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl TodoListQuery {
    pub fn paged(page: u32, page_size: u32) -> Self {
        Self {
            page: Some(page),
            page_size: Some(page_size),
            ..Self::default()
        }
    }

    /// Field-wise overlay: every field set in `overrides` wins.
    pub fn merged_with(&self, overrides: &TodoListQuery) -> TodoListQuery {
        TodoListQuery {
            page: overrides.page.or(self.page),
            page_size: overrides.page_size.or(self.page_size),
            sort: overrides.sort.or(self.sort),
            order: overrides.order.or(self.order),
            is_done: overrides.is_done.or(self.is_done),
            category: overrides.category.clone().or_else(|| self.category.clone()),
            tags: overrides.tags.clone().or_else(|| self.tags.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResponse<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

impl<T> PageResponse<T> {
    pub fn new(data: Vec<T>, total: u64, page: u32, page_size: u32) -> Self {
        let total_pages = if page_size > 0 {
            total.div_ceil(u64::from(page_size)) as u32
        } else {
            0
        };
        Self {
            data,
            total,
            page,
            page_size,
            total_pages,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub resource_dir: String,
    pub page_size: u32,
    pub done_page_size: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            resource_dir: "resources".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            done_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAttachment {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BooleanResponse {
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::{PageResponse, SortField, TodoCreate, TodoListQuery, TodoUpdate};

    #[test]
    fn merged_query_prefers_overrides() {
        let defaults = TodoListQuery {
            is_done: Some(true),
            ..TodoListQuery::paged(1, 50)
        };
        let overrides = TodoListQuery {
            tags: Some(vec!["work".to_string()]),
            page_size: Some(10),
            ..TodoListQuery::default()
        };

        let merged = defaults.merged_with(&overrides);
        assert_eq!(merged.page, Some(1));
        assert_eq!(merged.page_size, Some(10));
        assert_eq!(merged.is_done, Some(true));
        assert_eq!(merged.tags.as_deref(), Some(&["work".to_string()][..]));
    }

    #[test]
    fn total_pages_round_up() {
        let page = PageResponse::new(vec![1, 2, 3], 101, 1, 50);
        assert_eq!(page.total_pages, 3);
        let empty = PageResponse::<i32>::new(Vec::new(), 0, 1, 50);
        assert_eq!(empty.total_pages, 0);
        let unsized_page = PageResponse::<i32>::new(Vec::new(), 7, 1, 0);
        assert_eq!(unsized_page.total_pages, 0);
    }

    #[test]
    fn update_leaves_absent_fields_untouched() {
        let raw = serde_json::json!({ "id": 4, "title": "x" });
        let update: TodoUpdate = serde_json::from_value(raw).expect("update");
        assert_eq!(update.id, 4);
        assert_eq!(update.title.as_deref(), Some("x"));
        assert!(update.date.is_none());
        assert!(update.tags.is_none());
        assert!(update.is_done.is_none());
    }

    #[test]
    fn explicit_null_clears_nullable_columns() {
        let raw = serde_json::json!({ "id": 4, "category": null, "date": null });
        let update: TodoUpdate = serde_json::from_value(raw).expect("update");
        assert_eq!(update.category, Some(None));
        assert_eq!(update.date, Some(None));
        assert!(update.end_repeat_date.is_none());
    }

    #[test]
    fn create_collects_title_hashtags() {
        let create = TodoCreate {
            tags: vec!["home".to_string()],
            ..TodoCreate::titled("buy milk #home #errand ")
        }
        .with_title_hashtags();
        assert_eq!(create.tags, vec!["home".to_string(), "errand".to_string()]);
    }

    #[test]
    fn sort_field_serializes_as_column_name() {
        let raw = serde_json::to_string(&SortField::CreatedAt).expect("json");
        assert_eq!(raw, "\"created_at\"");
        assert_eq!(SortField::UpdatedAt.column(), "updated_at");
    }
}
