use crate::attachments::AttachmentStore;
use crate::backend::SqliteBackend;
use crate::models::{AppSettings, BooleanResponse, StoredAttachment, Tag, Todo, TodoCreate, TodoUpdate};
use crate::partition::{Partition, ResolvedView};
use crate::service::TodoService;
use crate::{init_tracing, to_client_error};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tauri::{Emitter, Manager};

const STORE_EVENT: &str = "fon://store";

#[derive(Clone)]
struct AppState {
    service: Arc<TodoService<SqliteBackend>>,
    app_data_dir: PathBuf,
}

impl AppState {
    fn attachments(&self) -> Result<AttachmentStore, String> {
        let settings = self.service.database().get_settings().map_err(to_client_error)?;
        Ok(AttachmentStore::new(self.app_data_dir.clone(), settings.resource_dir))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct PartitionSnapshot {
    partition: Partition,
    items: Vec<Todo>,
    total: Option<u64>,
}

#[tauri::command]
async fn todo_add(state: tauri::State<'_, AppState>, payload: TodoCreate) -> Result<Todo, String> {
    state
        .service
        .add_todo(payload.with_title_hashtags())
        .await
        .map_err(to_client_error)
}

#[tauri::command]
async fn todo_update(state: tauri::State<'_, AppState>, payload: TodoUpdate) -> Result<Todo, String> {
    state.service.update_todo(payload).await.map_err(to_client_error)
}

#[tauri::command]
async fn todo_delete(state: tauri::State<'_, AppState>, id: i64) -> Result<BooleanResponse, String> {
    state.service.delete_todo(id).await.map_err(to_client_error)?;
    Ok(BooleanResponse { success: true })
}

#[tauri::command]
async fn todo_restore(state: tauri::State<'_, AppState>, id: i64) -> Result<Todo, String> {
    state.service.restore_todo(id).await.map_err(to_client_error)
}

#[tauri::command]
async fn todo_delete_permanently(state: tauri::State<'_, AppState>, id: i64) -> Result<BooleanResponse, String> {
    state
        .service
        .permanently_delete_todo(id)
        .await
        .map_err(to_client_error)?;
    Ok(BooleanResponse { success: true })
}

#[tauri::command]
async fn todo_get(state: tauri::State<'_, AppState>, id: i64) -> Result<Option<Todo>, String> {
    state.service.get_todo(id).await.map_err(to_client_error)
}

#[tauri::command]
async fn todos_view_open(state: tauri::State<'_, AppState>, nav: String) -> Result<ResolvedView, String> {
    state.service.open_view(&nav).await.map_err(to_client_error)
}

#[tauri::command]
async fn todos_load_more(state: tauri::State<'_, AppState>, partition: Partition) -> Result<BooleanResponse, String> {
    let loaded = state.service.load_more(partition).await.map_err(to_client_error)?;
    Ok(BooleanResponse { success: loaded })
}

#[tauri::command]
fn todos_snapshot(state: tauri::State<'_, AppState>, partition: Partition) -> PartitionSnapshot {
    let total = state.service.total(partition);
    PartitionSnapshot {
        partition,
        items: state.service.snapshot(partition),
        total: (total != crate::list_cache::UNKNOWN_TOTAL).then_some(total),
    }
}

#[tauri::command]
fn tags_list(state: tauri::State<'_, AppState>) -> Vec<Tag> {
    state.service.tags().as_ref().clone()
}

#[tauri::command]
async fn tag_delete(state: tauri::State<'_, AppState>, id: i64) -> Result<BooleanResponse, String> {
    state.service.delete_tag(id).await.map_err(to_client_error)?;
    Ok(BooleanResponse { success: true })
}

#[tauri::command]
async fn attachment_save(
    state: tauri::State<'_, AppState>,
    sub_path: String,
    file_name: String,
    bytes: Vec<u8>,
) -> Result<StoredAttachment, String> {
    state
        .attachments()?
        .save(&sub_path, &file_name, &bytes)
        .await
        .map_err(to_client_error)
}

#[tauri::command]
async fn attachment_list(state: tauri::State<'_, AppState>, sub_path: String) -> Result<Vec<StoredAttachment>, String> {
    state.attachments()?.list(&sub_path).await.map_err(to_client_error)
}

#[tauri::command]
async fn attachment_delete(state: tauri::State<'_, AppState>, path: String) -> Result<BooleanResponse, String> {
    state.attachments()?.delete(&path).await.map_err(to_client_error)?;
    Ok(BooleanResponse { success: true })
}

#[tauri::command]
fn settings_get(state: tauri::State<'_, AppState>) -> Result<AppSettings, String> {
    state.service.database().get_settings().map_err(to_client_error)
}

#[tauri::command]
fn settings_update(state: tauri::State<'_, AppState>, settings: serde_json::Value) -> Result<AppSettings, String> {
    state
        .service
        .database()
        .update_settings(settings)
        .map_err(to_client_error)
}

pub fn run() {
    tauri::Builder::default()
        .setup(|app| {
            let app_data_dir = app.path().app_data_dir().map_err(|error| error.to_string())?;
            std::fs::create_dir_all(&app_data_dir).map_err(|error| error.to_string())?;
            init_tracing(&app_data_dir).map_err(|error| error.to_string())?;

            let service = Arc::new(TodoService::open(&app_data_dir).map_err(|error| error.to_string())?);
            let handle = app.handle().clone();

            tauri::async_runtime::spawn({
                let mut events = service.subscribe();
                async move {
                    loop {
                        match events.recv().await {
                            Ok(event) => {
                                if let Err(error) = handle.emit(STORE_EVENT, &event) {
                                    tracing::warn!(error = %error, "failed to forward store event");
                                }
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                                tracing::warn!(skipped, "store event listener lagged");
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            });

            tauri::async_runtime::spawn({
                let service = service.clone();
                async move {
                    if let Err(error) = service.refresh_tags().await {
                        tracing::warn!(error = %error, "startup tag load failed");
                    }
                }
            });

            app.manage(AppState { service, app_data_dir });
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            todo_add,
            todo_update,
            todo_delete,
            todo_restore,
            todo_delete_permanently,
            todo_get,
            todos_view_open,
            todos_load_more,
            todos_snapshot,
            tags_list,
            tag_delete,
            attachment_save,
            attachment_list,
            attachment_delete,
            settings_get,
            settings_update
        ])
        .run(tauri::generate_context!())
        .expect("failed to run tauri app");
}
