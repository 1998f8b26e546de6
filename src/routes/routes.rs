//! Route table.
//!
//! - **Storage API** (`/api/v1/storage`)
//!   - `POST /upload`, `/upload/stage`, `/upload/commit`: public uploads
//!   - `POST /secret/upload`, `/secret/upload/stage`, `/secret/upload/commit`: private uploads
//!   - `GET  /download/{file_id}`: signed link (redirect, or JSON with `silent=true`)
//!   - `GET  /download/request/{file_id}`: issue the share password
//!   - `POST /secret`, `PUT /secret/retrieve`, `PUT /secret/pin`: secrets
//! - **Progress**: `GET /api/v1/progress/{session_id}` (server-sent events)
//! - **Share**: `GET /share/download/{file_id}`
//! - **Blobs**: `GET /blobs/{*path}` behind a signed link
//! - **Health**: `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        progress_handlers::progress,
        secret_handlers::{create_secret, reset_pin_code, retrieve_secret},
        share_handlers::{file_info, read_blob},
        storage_handlers::{
            commit_chunk, commit_chunk_with_secret, download, request_download, upload,
            upload_chunk, upload_chunk_with_secret, upload_with_secret,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};

/// Build the application router. Upload routes accept bodies up to
/// `upload_limit` bytes.
pub fn routes(upload_limit: usize) -> Router<AppState> {
    let uploads = Router::new()
        .route("/upload", post(upload))
        .route("/upload/stage", post(upload_chunk))
        .route("/secret/upload", post(upload_with_secret))
        .route("/secret/upload/stage", post(upload_chunk_with_secret))
        .layer(DefaultBodyLimit::max(upload_limit));

    let storage = Router::new()
        .merge(uploads)
        .route("/upload/commit", post(commit_chunk))
        .route("/secret/upload/commit", post(commit_chunk_with_secret))
        .route("/download/{file_id}", get(download))
        .route("/download/request/{file_id}", get(request_download))
        .route("/secret", post(create_secret))
        .route("/secret/retrieve", put(retrieve_secret))
        .route("/secret/pin", put(reset_pin_code));

    let api = Router::new()
        .nest("/storage", storage)
        .route("/progress/{session_id}", get(progress));

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .nest("/api/v1", api)
        .route("/share/download/{file_id}", get(file_info))
        .route("/blobs/{*path}", get(read_blob))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, db, services::test_support::TEST_PUBLIC_URL};
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
        response::Response,
    };
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "medioa-test-boundary";

    struct TestApp {
        _dir: TempDir,
        router: Router,
    }

    impl TestApp {
        async fn new(upload_max_size_mb: u64) -> Self {
            let dir = TempDir::new().unwrap();
            let storage_dir = dir.path().join("blobs");
            std::fs::create_dir_all(&storage_dir).unwrap();
            let config = AppConfig {
                host: "127.0.0.1".into(),
                port: 3000,
                public_url: TEST_PUBLIC_URL.into(),
                storage_dir: storage_dir.display().to_string(),
                database_url: format!("sqlite://{}", dir.path().join("meta.db").display()),
                secret_key: "master".into(),
                signing_key: "signing".into(),
                upload_max_size_mb,
                download_expire_days: 30,
                password_hash_cost: 4,
            };
            let pool = db::connect(&config.database_url).await.unwrap();
            db::run_migrations(&pool).await.unwrap();
            let limit = config.upload_max_bytes();
            let router = routes(limit).with_state(AppState::new(config, pool));
            Self { _dir: dir, router }
        }

        async fn send(&self, req: Request<Body>) -> Response {
            self.router.clone().oneshot(req).await.unwrap()
        }

        async fn upload(&self, uri: &str, file_name: &str, data: &[u8]) -> Response {
            self.form(uri, &[], "file", file_name, data).await
        }

        /// Posts `fields` as text parts followed by one file part.
        async fn form(
            &self,
            uri: &str,
            fields: &[(&str, &str)],
            part: &str,
            file_name: &str,
            data: &[u8],
        ) -> Response {
            let mut body = Vec::new();
            for (name, value) in fields {
                body.extend_from_slice(
                    format!(
                        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                    )
                    .as_bytes(),
                );
            }
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{part}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
            self.send(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={BOUNDARY}"),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
        }

        async fn get(&self, uri: &str) -> Response {
            self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
        }

        async fn json(&self, method: &str, uri: &str, body: Value) -> Response {
            self.send(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
        }
    }

    async fn body_bytes(res: Response) -> Vec<u8> {
        res.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    async fn json_body(res: Response) -> Value {
        serde_json::from_slice(&body_bytes(res).await).unwrap()
    }

    fn local(url: &str) -> &str {
        url.strip_prefix(TEST_PUBLIC_URL).unwrap()
    }

    #[tokio::test]
    async fn health_and_ready() {
        let app = TestApp::new(1).await;
        assert_eq!(app.get("/healthz").await.status(), StatusCode::OK);

        let res = app.get("/readyz").await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["checks"]["sqlite"]["ok"], json!(true));
        assert_eq!(body["checks"]["blob_store"]["ok"], json!(true));
    }

    #[tokio::test]
    async fn uploaded_file_reads_back_through_signed_link() {
        let app = TestApp::new(1).await;

        let res = app
            .upload("/api/v1/storage/upload", "notes.txt", b"hello medioa")
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let uploaded = json_body(res).await;
        assert_eq!(uploaded["ext"], ".txt");
        assert_eq!(uploaded["file_size"], json!(12));

        let download = local(uploaded["url"].as_str().unwrap()).to_string();
        let res = app.get(&download).await;
        assert_eq!(res.status(), StatusCode::TEMPORARY_REDIRECT);
        let location = res.headers()[header::LOCATION].to_str().unwrap().to_string();
        assert!(location.starts_with(&format!("{TEST_PUBLIC_URL}/blobs/public/")));

        let res = app.get(&format!("{download}&silent=true")).await;
        assert_eq!(res.status(), StatusCode::OK);
        let signed = json_body(res).await["url"].as_str().unwrap().to_string();

        let res = app.get(local(&signed)).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::CONTENT_LENGTH], "12");
        assert_eq!(body_bytes(res).await, b"hello medioa");
    }

    #[tokio::test]
    async fn tampered_blob_link_is_forbidden() {
        let app = TestApp::new(1).await;
        let uploaded = json_body(app.upload("/api/v1/storage/upload", "a.bin", b"abc").await).await;
        let res = app
            .get(&format!("{}&silent=true", local(uploaded["url"].as_str().unwrap())))
            .await;
        let signed = json_body(res).await["url"].as_str().unwrap().to_string();

        let tampered = format!("{}0", local(&signed));
        assert_eq!(app.get(&tampered).await.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_with_the_limit() {
        let app = TestApp::new(1).await;
        let data = vec![7u8; (1 << 20) + 1024];

        let res = app.upload("/api/v1/storage/upload", "big.bin", &data).await;
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json_body(res).await["error"], "file size too large (max: 1MB)");
    }

    #[tokio::test]
    async fn secret_lifecycle_over_http() {
        let app = TestApp::new(1).await;
        let create = json!({"username": "ana", "password": "pw", "pin_code": "1234"});

        let res = app.json("POST", "/api/v1/storage/secret", create.clone()).await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let created = json_body(res).await;
        let token = created["access_token"].as_str().unwrap().to_string();

        let res = app.json("POST", "/api/v1/storage/secret", create).await;
        assert_eq!(res.status(), StatusCode::CONFLICT);

        let res = app
            .upload(
                &format!("/api/v1/storage/secret/upload?secret={token}"),
                "private.txt",
                b"private",
            )
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let uploaded = json_body(res).await;

        // The public download path refuses private objects without credentials.
        let download = local(uploaded["url"].as_str().unwrap()).to_string();
        let res = app.get(&format!("{download}&silent=true")).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = app
            .json(
                "PUT",
                "/api/v1/storage/secret/retrieve",
                json!({"username": "ana", "password": "wrong"}),
            )
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn share_info_reports_password_requirement() {
        let app = TestApp::new(1).await;
        let uploaded = json_body(app.upload("/api/v1/storage/upload", "pic.bin", b"xyz").await).await;
        let file_id = uploaded["file_id"].as_str().unwrap();
        let token = uploaded["token"].as_str().unwrap();

        let res = app
            .get(&format!("/share/download/{file_id}?token={token}"))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let info = json_body(res).await;
        assert_eq!(info["file_id"], file_id);
        assert_eq!(info["password_required"], json!(false));

        let res = app.get(&format!("/share/download/{file_id}?token=wrong")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn chunks_staged_out_of_order_commit_over_http() {
        let app = TestApp::new(1).await;
        let stage = "/api/v1/storage/upload/stage";

        let res = app
            .form(
                stage,
                &[("chunk_index", "1"), ("total_chunks", "2")],
                "chunk",
                "clip.bin",
                b"world",
            )
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let staged = json_body(res).await;
        let file_id = staged["file_id"].as_str().unwrap().to_string();
        assert!(!staged["chunk_id"].as_str().unwrap().is_empty());

        let res = app
            .form(
                stage,
                &[
                    ("file_id", file_id.as_str()),
                    ("chunk_index", "0"),
                    ("total_chunks", "2"),
                ],
                "chunk",
                "clip.bin",
                b"hello ",
            )
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(json_body(res).await["file_id"], file_id.as_str());

        let res = app
            .form(
                stage,
                &[
                    ("file_id", file_id.as_str()),
                    ("chunk_index", "first"),
                    ("total_chunks", "2"),
                ],
                "chunk",
                "clip.bin",
                b"x",
            )
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let commit = "/api/v1/storage/upload/commit";
        let res = app.json("POST", commit, json!({ "file_id": file_id })).await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let committed = json_body(res).await;
        assert_eq!(committed["file_id"], file_id.as_str());
        assert_eq!(committed["file_size"], json!(11));

        let res = app.get(local(committed["url"].as_str().unwrap())).await;
        assert_eq!(res.status(), StatusCode::TEMPORARY_REDIRECT);
        let location = res.headers()[header::LOCATION].to_str().unwrap().to_string();
        let res = app.get(local(&location)).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_bytes(res).await, b"hello world");

        let res = app.json("POST", commit, json!({ "file_id": file_id })).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn private_chunks_need_the_access_token() {
        let app = TestApp::new(1).await;
        let create = json!({"username": "bo", "password": "pw", "pin_code": "4321"});
        let created = json_body(app.json("POST", "/api/v1/storage/secret", create).await).await;
        let token = created["access_token"].as_str().unwrap().to_string();
        let fields = [("chunk_index", "0"), ("total_chunks", "1")];

        let res = app
            .form(
                "/api/v1/storage/secret/upload/stage?secret=nope",
                &fields,
                "chunk",
                "part.bin",
                b"abc",
            )
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = app
            .form(
                &format!("/api/v1/storage/secret/upload/stage?secret={token}"),
                &fields,
                "chunk",
                "part.bin",
                b"abc",
            )
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let file_id = json_body(res).await["file_id"].as_str().unwrap().to_string();

        let res = app
            .json(
                "POST",
                &format!("/api/v1/storage/secret/upload/commit?secret={token}"),
                json!({ "file_id": file_id }),
            )
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(json_body(res).await["file_size"], json!(3));
    }

    #[tokio::test]
    async fn bad_user_header_is_rejected() {
        let app = TestApp::new(1).await;
        let res = app
            .send(
                Request::builder()
                    .uri("/api/v1/storage/download/x?token=y")
                    .header("x-user-id", "nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
