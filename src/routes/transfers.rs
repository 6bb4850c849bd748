//! Transfer Routes
//!
//! Endpoints:
//! - GET /api/torrents - Refreshed snapshot of every transfer
//! - POST /api/torrent - Add from a magnet URI
//! - POST /api/torrent/file - Add from raw `.torrent` bytes
//! - DELETE /api/torrent/:info_hash - Remove a transfer
//! - POST /api/torrent/:info_hash/start - Start fetching
//! - POST /api/torrent/:info_hash/stop - Stop fetching
//! - GET /api/torrent/:info_hash/files - Transfer with its file list
//! - PUT /api/torrent/:info_hash/files - Select or deselect files
//! - POST /api/torrent/:info_hash/files/start - Start a single file

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::StatusResponse;
use crate::error::{AppError, EngineError, Result};
use crate::identifier::InfoHash;
use crate::state::AppState;
use crate::transfer::Transfer;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/torrents", get(list_transfers))
        .route("/torrent", post(add_magnet))
        .route("/torrent/file", post(add_metainfo))
        .route("/torrent/:info_hash", delete(delete_transfer))
        .route("/torrent/:info_hash/start", post(start_transfer))
        .route("/torrent/:info_hash/stop", post(stop_transfer))
        .route("/torrent/:info_hash/files", get(get_files).put(select_files))
        .route("/torrent/:info_hash/files/start", post(start_file))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AddMagnetRequest {
    pub magnet: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddResponse {
    pub status: &'static str,
    pub info_hash: InfoHash,
}

#[derive(Debug, Deserialize)]
pub struct SelectFilesRequest {
    pub paths: Vec<String>,
    pub download: bool,
}

#[derive(Debug, Deserialize)]
pub struct StartFileRequest {
    pub path: String,
}

fn parse_info_hash(raw: &str) -> std::result::Result<InfoHash, EngineError> {
    Ok(InfoHash::from_hex(raw)?)
}

// ============================================================================
// Handlers
// ============================================================================

async fn list_transfers(State(state): State<AppState>) -> Result<Json<Vec<Transfer>>> {
    let transfers = state.engine().refresh_all()?;
    Ok(Json(transfers))
}

async fn add_magnet(
    State(state): State<AppState>,
    Json(request): Json<AddMagnetRequest>,
) -> Result<(StatusCode, Json<AddResponse>)> {
    let info_hash = state.engine().add_by_reference(request.magnet.trim()).await?;
    Ok((
        StatusCode::CREATED,
        Json(AddResponse {
            status: "success",
            info_hash,
        }),
    ))
}

async fn add_metainfo(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<AddResponse>)> {
    if body.is_empty() {
        return Err(AppError::BadRequest("Empty torrent file".to_string()));
    }

    let info_hash = state.engine().add_from_bytes(&body).await?;
    Ok((
        StatusCode::CREATED,
        Json(AddResponse {
            status: "success",
            info_hash,
        }),
    ))
}

async fn delete_transfer(
    State(state): State<AppState>,
    Path(info_hash): Path<String>,
) -> Result<Json<StatusResponse>> {
    let info_hash = parse_info_hash(&info_hash)?;
    state.engine().delete(&info_hash).await?;
    Ok(Json(StatusResponse::success()))
}

async fn start_transfer(
    State(state): State<AppState>,
    Path(info_hash): Path<String>,
) -> Result<Json<StatusResponse>> {
    let info_hash = parse_info_hash(&info_hash)?;
    state.engine().start(&info_hash)?;
    Ok(Json(StatusResponse::success()))
}

async fn stop_transfer(
    State(state): State<AppState>,
    Path(info_hash): Path<String>,
) -> Result<Json<StatusResponse>> {
    let info_hash = parse_info_hash(&info_hash)?;
    state.engine().stop(&info_hash)?;
    Ok(Json(StatusResponse::success()))
}

async fn get_files(
    State(state): State<AppState>,
    Path(info_hash): Path<String>,
) -> Result<Json<Transfer>> {
    let info_hash = parse_info_hash(&info_hash)?;
    Ok(Json(state.engine().get_files(&info_hash)?))
}

async fn select_files(
    State(state): State<AppState>,
    Path(info_hash): Path<String>,
    Json(request): Json<SelectFilesRequest>,
) -> Result<Json<StatusResponse>> {
    let info_hash = parse_info_hash(&info_hash)?;
    state
        .engine()
        .set_file_selection(&info_hash, &request.paths, request.download)?;
    Ok(Json(StatusResponse::success()))
}

async fn start_file(
    State(state): State<AppState>,
    Path(info_hash): Path<String>,
    Json(request): Json<StartFileRequest>,
) -> Result<Json<StatusResponse>> {
    let info_hash = parse_info_hash(&info_hash)?;
    state.engine().start_file(&info_hash, &request.path)?;
    Ok(Json(StatusResponse::success()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::descriptor::tests::sample_torrent;
    use crate::descriptor::Source;
    use crate::engine::tests::{harness, Harness, MAGNET};
    use axum_test::TestServer;
    use serde_json::{json, Value};

    fn server(h: &Harness) -> TestServer {
        let state = AppState::new(Config::default(), h.engine.clone());
        TestServer::new(crate::routes::app(state)).unwrap()
    }

    fn sample_hash() -> String {
        Source::from_bytes(&sample_torrent())
            .unwrap()
            .info_hash()
            .to_hex()
    }

    #[tokio::test]
    async fn test_add_magnet_and_list() {
        let h = harness(false).await;
        let server = server(&h);

        let response = server
            .post("/api/torrent")
            .json(&json!({ "magnet": MAGNET }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let body: Value = response.json();
        assert_eq!(body["status"], "success");
        assert_eq!(body["infoHash"], "c12fe1c06bba254a9dc9f519b335aa7c1367a88a");

        let list: Value = server.get("/api/torrents").await.json();
        let list = list.as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["metadataLoaded"], false);
        assert_eq!(list[0]["name"], "pending");
    }

    #[tokio::test]
    async fn test_add_invalid_magnet() {
        let h = harness(false).await;
        let server = server(&h);

        let response = server
            .post("/api/torrent")
            .json(&json!({ "magnet": "http://example.com/x.torrent" }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], "invalid_source");
    }

    #[tokio::test]
    async fn test_upload_and_manage_files() {
        let h = harness(false).await;
        let server = server(&h);
        let id = sample_hash();

        server
            .post("/api/torrent/file")
            .bytes(sample_torrent().into())
            .await
            .assert_status(StatusCode::CREATED);

        let files: Value = server.get(&format!("/api/torrent/{id}/files")).await.json();
        assert_eq!(files["files"].as_array().unwrap().len(), 3);
        assert_eq!(files["size"], 18);

        server
            .put(&format!("/api/torrent/{id}/files"))
            .json(&json!({ "paths": ["b.txt"], "download": false }))
            .await
            .assert_status_ok();
        server
            .post(&format!("/api/torrent/{id}/start"))
            .await
            .assert_status_ok();

        let files: Value = server.get(&format!("/api/torrent/{id}/files")).await.json();
        assert_eq!(files["running"], true);
        assert_eq!(files["files"][1]["selected"], false);
        assert_eq!(files["files"][1]["running"], true);

        server
            .post(&format!("/api/torrent/{id}/stop"))
            .await
            .assert_status_ok();
        let response = server.post(&format!("/api/torrent/{id}/stop")).await;
        response.assert_status(StatusCode::CONFLICT);
        let body: Value = response.json();
        assert_eq!(body["error"], "already_stopped");

        server
            .post(&format!("/api/torrent/{id}/files/start"))
            .json(&json!({ "path": "a.txt" }))
            .await
            .assert_status_ok();
        server
            .post(&format!("/api/torrent/{id}/files/start"))
            .json(&json!({ "path": "nope.txt" }))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_empty_upload_rejected() {
        let h = harness(false).await;
        let server = server(&h);
        server
            .post("/api/torrent/file")
            .bytes(Bytes::new())
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_deeply_nested_upload_rejected() {
        let h = harness(false).await;
        let server = server(&h);

        let mut body = b"d1:a".to_vec();
        body.extend(std::iter::repeat(b'l').take(1_000_000));
        let response = server.post("/api/torrent/file").bytes(body.into()).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let json: Value = response.json();
        assert_eq!(json["error"], "invalid_source");

        server.get("/health").await.assert_status_ok();
    }

    #[tokio::test]
    async fn test_files_before_metadata_conflict() {
        let h = harness(false).await;
        let server = server(&h);
        server
            .post("/api/torrent")
            .json(&json!({ "magnet": MAGNET }))
            .await;

        server
            .get("/api/torrent/c12fe1c06bba254a9dc9f519b335aa7c1367a88a/files")
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_identifier_errors() {
        let h = harness(false).await;
        let server = server(&h);

        let response = server.post("/api/torrent/not-a-hash/start").await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], "invalid_identifier");

        server
            .post("/api/torrent/0000000000000000000000000000000000000000/start")
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete() {
        let h = harness(false).await;
        let server = server(&h);
        let id = sample_hash();
        server
            .post("/api/torrent/file")
            .bytes(sample_torrent().into())
            .await;

        server
            .delete(&format!("/api/torrent/{id}"))
            .await
            .assert_status_ok();
        server
            .delete(&format!("/api/torrent/{id}"))
            .await
            .assert_status(StatusCode::NOT_FOUND);

        let list: Value = server.get("/api/torrents").await.json();
        assert!(list.as_array().unwrap().is_empty());
    }
}
