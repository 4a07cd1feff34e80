//! Tauri IPC commands between the grid frontend and the tracker.
//!
//! Errors cross the boundary as [`TrackerError`] JSON strings.

use std::sync::Arc;
use tauri::{AppHandle, Emitter, Manager, State};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::file_store::JsonFileStore;
use crate::model::{ChoreSummary, Recurrence, Task, User};
use crate::reconcile::{Reconciler, RefreshOutcome};
use crate::view::GridView;

/// Event name the frontend listens on.
pub const TRACKER_EVENT: &str = "tracker-event";

/// Application state shared across commands.
pub struct AppState {
    pub tracker: Reconciler<JsonFileStore>,
    pub config: TrackerConfig,
}

impl AppState {
    pub fn new(config: TrackerConfig) -> Self {
        let store = Arc::new(JsonFileStore::new(config.data_file()));
        Self {
            tracker: Reconciler::new(store, &config),
            config,
        }
    }
}

fn ipc(e: TrackerError) -> String {
    e.to_json()
}

/// Fetch and publish the grid, returning its render model.
#[tauri::command]
pub async fn load_grid(state: State<'_, AppState>) -> Result<Option<GridView>, String> {
    if let RefreshOutcome::Stale { seq } = state.tracker.refresh().await.map_err(ipc)? {
        info!(seq, "load_grid raced a newer fetch");
    }
    Ok(state.tracker.view().await)
}

/// Render model of the currently published grid, without fetching.
#[tauri::command]
pub async fn get_grid(state: State<'_, AppState>) -> Result<Option<GridView>, String> {
    Ok(state.tracker.view().await)
}

/// Toggle a cell. Returns as soon as the local grid is updated; the save
/// result arrives as a `tracker-event`.
#[tauri::command]
pub async fn toggle_slot(
    state: State<'_, AppState>,
    task_id: String,
    week_index: usize,
    user_id: Option<String>,
) -> Result<Option<GridView>, String> {
    let user = user_id
        .or_else(|| state.config.user.clone())
        .ok_or_else(|| ipc(crate::tracker_err!(ConfigInvalid, "No acting user configured")))?;
    state
        .tracker
        .toggle(&task_id, week_index, &user)
        .await
        .map_err(ipc)?;
    Ok(state.tracker.view().await)
}

#[tauri::command]
pub async fn create_chore(
    state: State<'_, AppState>,
    title: String,
    recurrence: Option<String>,
) -> Result<Task, String> {
    let recurrence = match recurrence.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<Recurrence>().map_err(ipc)?),
    };
    state.tracker.create_task(&title, recurrence).await.map_err(ipc)
}

#[tauri::command]
pub async fn list_chores(state: State<'_, AppState>) -> Result<Vec<ChoreSummary>, String> {
    state.tracker.chore_summaries().await.map_err(ipc)
}

#[tauri::command]
pub async fn list_users(state: State<'_, AppState>) -> Result<Vec<User>, String> {
    Ok(state.tracker.users().await)
}

/// Forward tracker events to the webview until the channel closes.
fn forward_events(app: AppHandle) {
    let mut events = app.state::<AppState>().tracker.subscribe();
    tauri::async_runtime::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let _ = app.emit(TRACKER_EVENT, event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event forwarder lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Desktop entry point.
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    crate::init_tracing();

    let config = match TrackerConfig::load_default() {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "falling back to default config");
            TrackerConfig::default()
        }
    };
    info!(data_file = %config.data_file().display(), "starting chore tracker");

    let result = tauri::Builder::default()
        .manage(AppState::new(config))
        .setup(|app| {
            forward_events(app.handle().clone());
            #[cfg(debug_assertions)]
            {
                if let Some(window) = app.get_webview_window("main") {
                    window.open_devtools();
                }
            }
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            load_grid,
            get_grid,
            toggle_slot,
            create_chore,
            list_chores,
            list_users,
        ])
        .run(tauri::generate_context!());

    if let Err(e) = result {
        tracing::error!(error = %e, "tauri application exited with an error");
        std::process::exit(1);
    }
}
