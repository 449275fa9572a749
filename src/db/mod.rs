use crate::errors::{AppError, AppResult};
use crate::models::{
    AppSettings, EndRepeatType, PageResponse, Repeat, SortField, SortOrder, Tag, Todo, TodoCreate, TodoListQuery,
    TodoUpdate, DEFAULT_PAGE, DEFAULT_PAGE_SIZE,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = include_str!("schema.sql");

const TODO_COLUMNS: &str = "id, title, date, repeat, end_repeat_type, end_repeat_date, remaining_count, content, category, is_done, is_deleted, created_at, updated_at";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };

        db.ensure_default_settings()?;

        tracing::debug!(path = %db.db_path.display(), "todo database opened");
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    pub fn add_todo(&self, create: &TodoCreate) -> AppResult<Todo> {
        let now = Utc::now().timestamp_millis();

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO todos (
               title, date, repeat, end_repeat_type, end_repeat_date,
               remaining_count, content, category, is_done, is_deleted,
               created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                create.title,
                create.date.map(|value| value.timestamp_millis()),
                create.repeat.as_str(),
                create.end_repeat_type.map(EndRepeatType::as_str),
                create.end_repeat_date.map(|value| value.timestamp_millis()),
                create.remaining_count,
                create.content,
                create.category,
                create.is_done,
                create.is_deleted,
                now,
                now,
            ],
        )?;
        let id = tx.last_insert_rowid();
        sync_todo_tags(&tx, id, &create.tags, now)?;
        tx.commit()?;

        load_todo(&conn, id)?.ok_or_else(|| AppError::Internal(format!("todo {} missing after insert", id)))
    }

    pub fn get_todo(&self, id: i64) -> AppResult<Option<Todo>> {
        let conn = self.conn()?;
        load_todo(&conn, id)
    }

    pub fn update_todo(&self, update: &TodoUpdate) -> AppResult<Todo> {
        let now = Utc::now().timestamp_millis();
        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(title) = &update.title {
            sets.push("title = ?");
            values.push(Value::Text(title.clone()));
        }
        if let Some(date) = update.date {
            sets.push("date = ?");
            values.push(optional_millis(date));
        }
        if let Some(repeat) = update.repeat {
            sets.push("repeat = ?");
            values.push(Value::Text(repeat.as_str().to_string()));
        }
        if let Some(end_repeat_type) = update.end_repeat_type {
            sets.push("end_repeat_type = ?");
            values.push(
                end_repeat_type
                    .map(|value| Value::Text(value.as_str().to_string()))
                    .unwrap_or(Value::Null),
            );
        }
        if let Some(end_repeat_date) = update.end_repeat_date {
            sets.push("end_repeat_date = ?");
            values.push(optional_millis(end_repeat_date));
        }
        if let Some(remaining_count) = update.remaining_count {
            sets.push("remaining_count = ?");
            values.push(remaining_count.map(Value::Integer).unwrap_or(Value::Null));
        }
        if let Some(content) = &update.content {
            sets.push("content = ?");
            values.push(Value::Text(content.clone()));
        }
        if let Some(category) = &update.category {
            sets.push("category = ?");
            values.push(category.clone().map(Value::Text).unwrap_or(Value::Null));
        }
        if let Some(is_done) = update.is_done {
            sets.push("is_done = ?");
            values.push(Value::Integer(i64::from(is_done)));
        }
        if let Some(is_deleted) = update.is_deleted {
            sets.push("is_deleted = ?");
            values.push(Value::Integer(i64::from(is_deleted)));
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if !todo_exists(&tx, update.id)? {
            return Err(AppError::NotFound(format!("todo {} not found", update.id)));
        }

        if !sets.is_empty() || update.tags.is_some() {
            sets.push("updated_at = MAX(?, created_at)");
            values.push(Value::Integer(now));
            values.push(Value::Integer(update.id));
            let sql = format!("UPDATE todos SET {} WHERE id = ?", sets.join(", "));
            tx.execute(&sql, params_from_iter(values.iter()))?;
        }
        if let Some(tags) = &update.tags {
            sync_todo_tags(&tx, update.id, tags, now)?;
        }
        tx.commit()?;

        load_todo(&conn, update.id)?
            .ok_or_else(|| AppError::NotFound(format!("todo {} not found after update", update.id)))
    }

    pub fn soft_delete_todo(&self, id: i64) -> AppResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE todos SET is_deleted = 1, updated_at = MAX(?1, created_at) WHERE id = ?2",
            params![Utc::now().timestamp_millis(), id],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("todo {} not found", id)));
        }
        Ok(())
    }

    /// Only rows in the trash can be restored; a live row is `Invalid`.
    pub fn restore_todo(&self, id: i64) -> AppResult<Todo> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE todos SET is_deleted = 0, updated_at = MAX(?1, created_at) WHERE id = ?2 AND is_deleted = 1",
            params![Utc::now().timestamp_millis(), id],
        )?;
        if changed == 0 {
            if todo_exists(&conn, id)? {
                return Err(AppError::Invalid(format!("todo {} is not in the trash", id)));
            }
            return Err(AppError::NotFound(format!("todo {} not found", id)));
        }
        load_todo(&conn, id)?.ok_or_else(|| AppError::NotFound(format!("todo {} not found after restore", id)))
    }

    pub fn permanently_delete_todo(&self, id: i64) -> AppResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM todo_tags WHERE todo_id = ?1", [id])?;
        tx.execute("DELETE FROM todos WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_todos(&self, query: &TodoListQuery) -> AppResult<PageResponse<Todo>> {
        self.list_partition(query, false, SortField::CreatedAt)
    }

    pub fn list_deleted_todos(&self, query: &TodoListQuery) -> AppResult<PageResponse<Todo>> {
        self.list_partition(query, true, SortField::UpdatedAt)
    }

    fn list_partition(
        &self,
        query: &TodoListQuery,
        deleted: bool,
        default_sort: SortField,
    ) -> AppResult<PageResponse<Todo>> {
        let mut conditions: Vec<String> = vec!["is_deleted = ?".to_string()];
        let mut values: Vec<Value> = vec![Value::Integer(i64::from(deleted))];

        if let Some(is_done) = query.is_done {
            conditions.push("is_done = ?".to_string());
            values.push(Value::Integer(i64::from(is_done)));
        }
        if let Some(category) = &query.category {
            conditions.push("category = ?".to_string());
            values.push(Value::Text(category.clone()));
        }
        if let Some(tags) = query.tags.as_ref().filter(|tags| !tags.is_empty()) {
            let placeholders = vec!["?"; tags.len()].join(", ");
            conditions.push(format!(
                "id IN (
                   SELECT DISTINCT tt.todo_id FROM todo_tags tt
                   INNER JOIN tags t ON tt.tag_id = t.id
                   WHERE t.name IN ({}))",
                placeholders
            ));
            values.extend(tags.iter().cloned().map(Value::Text));
        }
        let where_clause = conditions.join(" AND ");

        let sort = query.sort.unwrap_or(default_sort);
        let order = query.order.unwrap_or(SortOrder::Desc);
        let page = query.page.unwrap_or(DEFAULT_PAGE).max(1);
        let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        let offset = i64::from(page - 1) * i64::from(page_size);

        let conn = self.conn()?;
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM todos WHERE {}", where_clause),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {} FROM todos WHERE {} ORDER BY {} {}, id {} LIMIT ? OFFSET ?",
            TODO_COLUMNS,
            where_clause,
            sort.column(),
            order.as_sql(),
            order.as_sql()
        );
        values.push(Value::Integer(i64::from(page_size)));
        values.push(Value::Integer(offset));

        let mut statement = conn.prepare(&sql)?;
        let mut todos = statement
            .query_map(params_from_iter(values.iter()), parse_todo_row)?
            .collect::<Result<Vec<_>, _>>()?;
        for todo in &mut todos {
            todo.tags = load_todo_tags(&conn, todo.id)?;
        }

        Ok(PageResponse::new(todos, total.max(0) as u64, page, page_size))
    }

    /// Lookup by exact name, insert when absent. Two callers racing on the same
    /// new name can both miss the lookup; the loser gets `AppError::Conflict`
    /// from the UNIQUE constraint.
    pub fn get_or_create_tag(&self, name: &str) -> AppResult<Tag> {
        let conn = self.conn()?;
        get_or_create_tag_on(&conn, name, Utc::now().timestamp_millis())
    }

    pub fn get_tag_by_name(&self, name: &str) -> AppResult<Option<Tag>> {
        let conn = self.conn()?;
        find_tag(&conn, name)
    }

    pub fn list_tags(&self) -> AppResult<Vec<Tag>> {
        let conn = self.conn()?;
        let mut statement = conn.prepare("SELECT id, name, created_at FROM tags ORDER BY name ASC")?;
        let tags = statement
            .query_map([], parse_tag_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    pub fn delete_tag(&self, id: i64) -> AppResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM todo_tags WHERE tag_id = ?1", [id])?;
        tx.execute("DELETE FROM tags WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_settings(&self) -> AppResult<AppSettings> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = 'app'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => match serde_json::from_str::<AppSettings>(&raw) {
                Ok(settings) => Ok(settings),
                Err(error) => {
                    tracing::warn!(error = %error, "stored settings unreadable, using defaults");
                    Ok(AppSettings::default())
                }
            },
            None => Ok(AppSettings::default()),
        }
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: AppSettings = serde_json::from_value(merged)
            .map_err(|error| AppError::Invalid(format!("invalid settings: {}", error)))?;
        if settings.page_size == 0 || settings.done_page_size == 0 {
            return Err(AppError::Invalid("page sizes must be at least 1".to_string()));
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES ('app', ?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![serde_json::to_string(&settings)?, Utc::now().to_rfc3339()],
        )?;

        Ok(settings)
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(1) FROM settings WHERE key = 'app'", [], |row| row.get(0))?;
        if count == 0 {
            conn.execute(
                "INSERT INTO settings (key, value_json, updated_at) VALUES ('app', ?1, ?2)",
                params![
                    serde_json::to_string(&AppSettings::default())?,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        Ok(())
    }
}

fn todo_exists(conn: &Connection, id: i64) -> AppResult<bool> {
    let found = conn
        .query_row("SELECT 1 FROM todos WHERE id = ?1", [id], |row| row.get::<_, i64>(0))
        .optional()?;
    Ok(found.is_some())
}

fn load_todo(conn: &Connection, id: i64) -> AppResult<Option<Todo>> {
    let todo = conn
        .query_row(
            &format!("SELECT {} FROM todos WHERE id = ?1", TODO_COLUMNS),
            [id],
            parse_todo_row,
        )
        .optional()?;

    match todo {
        Some(mut todo) => {
            todo.tags = load_todo_tags(conn, id)?;
            Ok(Some(todo))
        }
        None => Ok(None),
    }
}

fn load_todo_tags(conn: &Connection, todo_id: i64) -> AppResult<Vec<String>> {
    let mut statement = conn.prepare_cached(
        "SELECT t.name FROM tags t
         INNER JOIN todo_tags tt ON t.id = tt.tag_id
         WHERE tt.todo_id = ?1
         ORDER BY t.name ASC",
    )?;
    let names = statement
        .query_map([todo_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

/// Replaces the tag associations of a todo. Repeated labels collapse to one row.
fn sync_todo_tags(conn: &Connection, todo_id: i64, tags: &[String], now: i64) -> AppResult<()> {
    conn.execute("DELETE FROM todo_tags WHERE todo_id = ?1", [todo_id])?;
    for name in tags {
        let tag = get_or_create_tag_on(conn, name, now)?;
        conn.execute(
            "INSERT OR IGNORE INTO todo_tags (todo_id, tag_id) VALUES (?1, ?2)",
            params![todo_id, tag.id],
        )?;
    }
    Ok(())
}

fn find_tag(conn: &Connection, name: &str) -> AppResult<Option<Tag>> {
    conn.query_row(
        "SELECT id, name, created_at FROM tags WHERE name = ?1",
        [name],
        parse_tag_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn get_or_create_tag_on(conn: &Connection, name: &str, now: i64) -> AppResult<Tag> {
    if let Some(existing) = find_tag(conn, name)? {
        return Ok(existing);
    }

    conn.execute(
        "INSERT INTO tags (name, created_at) VALUES (?1, ?2)",
        params![name, now],
    )?;
    Ok(Tag {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        created_at: millis_to_time(now).map_err(AppError::from)?,
    })
}

fn parse_todo_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Todo> {
    Ok(Todo {
        id: row.get(0)?,
        title: row.get(1)?,
        date: row
            .get::<_, Option<i64>>(2)?
            .map(millis_to_time)
            .transpose()?,
        repeat: parse_repeat(&row.get::<_, String>(3)?)?,
        end_repeat_type: row
            .get::<_, Option<String>>(4)?
            .map(|raw| parse_end_repeat_type(&raw))
            .transpose()?,
        end_repeat_date: row
            .get::<_, Option<i64>>(5)?
            .map(millis_to_time)
            .transpose()?,
        remaining_count: row.get(6)?,
        content: row.get(7)?,
        tags: Vec::new(),
        category: row.get(8)?,
        is_done: row.get::<_, i64>(9)? != 0,
        is_deleted: row.get::<_, i64>(10)? != 0,
        created_at: millis_to_time(row.get(11)?)?,
        updated_at: millis_to_time(row.get(12)?)?,
    })
}

fn parse_tag_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: millis_to_time(row.get(2)?)?,
    })
}

fn parse_repeat(raw: &str) -> rusqlite::Result<Repeat> {
    match raw {
        "never" => Ok(Repeat::Never),
        "daily" => Ok(Repeat::Daily),
        "weekly" => Ok(Repeat::Weekly),
        "monthly" => Ok(Repeat::Monthly),
        other => Err(invalid_column(format!("Unknown repeat rule '{}'", other))),
    }
}

fn parse_end_repeat_type(raw: &str) -> rusqlite::Result<EndRepeatType> {
    match raw {
        "always" => Ok(EndRepeatType::Always),
        "date" => Ok(EndRepeatType::Date),
        "count" => Ok(EndRepeatType::Count),
        other => Err(invalid_column(format!("Unknown repeat end '{}'", other))),
    }
}

fn millis_to_time(raw: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(raw)
        .ok_or_else(|| invalid_column(format!("timestamp {} out of range", raw)))
}

fn optional_millis(value: Option<DateTime<Utc>>) -> Value {
    value
        .map(|time| Value::Integer(time.timestamp_millis()))
        .unwrap_or(Value::Null)
}

fn invalid_column(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}
