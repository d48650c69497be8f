//! HTTP API 服务器
//!
//! # 路由
//!
//! - `POST /upload`：multipart/form-data 上传单个文件，返回 `{"port": <code>}`
//! - `GET /download/:code`：通过下载桥取回文件，只接受已登记的取件码
//! - `OPTIONS *`：204，所有响应都带 CORS 头

use log::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::{ErrorKind, ShareError};
use crate::transfer::bridge::{DownloadBridge, parse_code};
use crate::transfer::multipart::{MultipartParser, boundary_from_content_type};
use crate::workflow::FileSharer;
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Path, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{MethodFilter, on, post},
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// 上传成功的响应体
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadResponse {
    pub port: u16,
}

pub struct AppState {
    pub sharer: Arc<FileSharer>,
    pub bridge: DownloadBridge,
}

/// 构建路由
pub fn router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route(
            "/upload",
            post(upload_handler).fallback(method_not_allowed),
        )
        .route(
            "/download/:code",
            on(MethodFilter::GET, download_handler).fallback(method_not_allowed),
        )
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

/// API 服务器
pub struct ApiServer {
    listener: TcpListener,
    state: Arc<AppState>,
    max_upload_bytes: usize,
}

impl ApiServer {
    pub async fn bind(config: &ServerConfig) -> anyhow::Result<Self> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.staging_dir).await?;

        let listener = TcpListener::bind(config.http_addr()).await?;
        let state = Arc::new(AppState {
            sharer: Arc::new(FileSharer::new(config)),
            bridge: DownloadBridge::from_config(config),
        });

        Ok(Self {
            listener,
            state,
            max_upload_bytes: config.max_upload_bytes,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn sharer(&self) -> Arc<FileSharer> {
        self.state.sharer.clone()
    }

    /// 运行直到 `signal` 完成，然后停止所有等待中的取件码
    pub async fn run_until<F>(self, signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.listener.local_addr()?;
        let sharer = self.state.sharer.clone();
        let app = router(self.state, self.max_upload_bytes);

        info!("API server listening on {}", addr);
        axum::serve(self.listener, app)
            .with_graceful_shutdown(signal)
            .await?;

        sharer.shutdown().await;
        info!("API server stopped");
        Ok(())
    }
}

async fn cors(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type,Authorization"),
    );
    response
}

async fn method_not_allowed() -> Response {
    (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed").into_response()
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "NOT FOUND").into_response()
}

async fn upload_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let boundary = match boundary_from_content_type(content_type) {
        Ok(boundary) => boundary,
        Err(e) => return upload_error(&e),
    };

    let Some(upload) = MultipartParser::new(&body, &boundary).parse() else {
        return upload_error(&ShareError::Unparseable);
    };

    match state.sharer.share(&upload).await {
        Ok(code) => {
            info!("Upload {} available under code {}", upload.file_name, code);
            Json(UploadResponse { port: code }).into_response()
        }
        Err(e) => {
            error!("Error processing file upload: {}", e);
            upload_error(&e)
        }
    }
}

fn upload_error(e: &ShareError) -> Response {
    match e.kind() {
        ErrorKind::ClientInput | ErrorKind::Protocol => {
            (StatusCode::BAD_REQUEST, format!("Bad Request: {e}")).into_response()
        }
        ErrorKind::Resource => {
            (StatusCode::INTERNAL_SERVER_ERROR, format!("server error: {e}")).into_response()
        }
    }
}

async fn download_handler(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Response {
    match download(&state, &code).await {
        Ok(response) => response,
        Err(e) => {
            let message = format!("error downloading the file: {e}");
            warn!("{}", message);
            (
                StatusCode::BAD_REQUEST,
                [(header::CONTENT_TYPE, "text/plain")],
                message,
            )
                .into_response()
        }
    }
}

async fn download(state: &AppState, segment: &str) -> Result<Response, ShareError> {
    let code = parse_code(segment)?;

    // 下载桥只连接本服务分配的端口
    let registry = state.sharer.registry();
    if !registry.range().contains(&code) {
        return Err(ShareError::InvalidCode(segment.to_string()));
    }
    if registry.lookup(code).await.is_none() {
        return Err(ShareError::UnknownCode(code));
    }

    let file = state.bridge.fetch(code).await?;

    let disposition = format!("attachment; filename=\"{}\"", file.file_name);
    let size = file.size;
    let stream = file.into_stream().await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, size.to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}
