//! Upload receiver: accepts multipart uploads, lists stored files and serves
//! them back for download.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

use crate::error::{DicomwatchError, Result};
use crate::extract::SubjectMetadata;
use crate::sink::secure_file_name;
use crate::store::UploadStore;

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    store: UploadStore,
    /// Accepted upload extension, lowercase without the dot
    extension: String,
}

/// Build the receiver router. Only uploads named `*.<extension>` are accepted.
pub fn router(store: UploadStore, max_upload_bytes: usize, extension: &str) -> Router {
    let extension = extension.trim_start_matches('.').to_ascii_lowercase();
    Router::new()
        .route("/", get(handle_list))
        .route("/upload", post(handle_upload))
        .route("/download/:filename", get(handle_download))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { store, extension })
}

/// Serve the receiver on 127.0.0.1:`port` until the process stops
pub async fn serve(
    store: UploadStore,
    port: u16,
    max_upload_bytes: usize,
    extension: &str,
) -> Result<()> {
    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        DicomwatchError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to bind to {}: {}", addr, e),
        ))
    })?;
    log::info!("Upload receiver listening on http://{}", addr);

    axum::serve(listener, router(store, max_upload_bytes, extension))
        .await
        .map_err(|e| {
            DicomwatchError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("HTTP server error: {}", e),
            ))
        })?;
    Ok(())
}

fn allowed_file(file_name: &str, extension: &str) -> bool {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, message.to_string()).into_response()
}

fn internal_error(e: DicomwatchError) -> Response {
    log::error!("Receiver error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "error": "Internal server error",
            "details": e.to_string()
        })),
    )
        .into_response()
}

async fn handle_list(State(state): State<AppState>) -> Response {
    match state.store.list().await {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn handle_upload(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut name = None;
    let mut id = None;
    let mut birth_date = None;
    let mut sex = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return bad_request(&format!("Malformed multipart body: {}", e)),
        };
        let field_name = field.name().unwrap_or_default().to_string();
        if field_name == "file" {
            let file_name = field.file_name().unwrap_or_default().to_string();
            match field.bytes().await {
                Ok(bytes) => file = Some((file_name, bytes.to_vec())),
                Err(e) => return bad_request(&format!("Failed to read file part: {}", e)),
            }
            continue;
        }
        let slot = match field_name.as_str() {
            "patient_name" => &mut name,
            "patient_id" => &mut id,
            "patient_birth_date" => &mut birth_date,
            "patient_sex" => &mut sex,
            _ => continue,
        };
        match field.text().await {
            Ok(text) => *slot = Some(text),
            Err(e) => return bad_request(&format!("Failed to read field {}: {}", field_name, e)),
        }
    }

    let Some((file_name, bytes)) = file else {
        return bad_request("No file part");
    };
    if file_name.is_empty() || !allowed_file(&file_name, &state.extension) {
        return bad_request("No selected file");
    }
    let Some(file_name) = secure_file_name(&file_name) else {
        return bad_request("No selected file");
    };

    let metadata = SubjectMetadata::from_fields(name, id, birth_date, sex);
    match state.store.save(&file_name, &bytes, &metadata).await {
        Ok(record) => {
            log::info!(
                "Received {} ({} bytes), Name: {}, ID: {}",
                record.file_name,
                record.size_bytes,
                record.patient_name,
                record.patient_id
            );
            Redirect::to("/").into_response()
        }
        Err(e) => internal_error(e),
    }
}

async fn handle_download(State(state): State<AppState>, Path(filename): Path<String>) -> Response {
    // Names that change under sanitizing were never stored.
    if secure_file_name(&filename).as_deref() != Some(filename.as_str()) {
        return StatusCode::NOT_FOUND.into_response();
    }
    match state.store.read(&filename).await {
        Ok(Some((record, bytes))) => (
            [
                (header::CONTENT_TYPE, "application/dicom".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", record.file_name),
                ),
            ],
            bytes,
        )
            .into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => internal_error(e),
    }
}
