use crate::encoding::{self, COMPACT_DTYPE, COMPACT_ENCODING};
use crate::pipeline::SegmentError;
use crate::server::multipart::{extract_boundary, extract_file};
use crate::server::{AppState, SERVICE_NAME};

use ndarray::Array3;
use serde_json::{Value, json};
use std::io::Read;
use tiny_http::{Header, Method, Request, Response, StatusCode};
use tracing::{error, info, warn};

/// Multipart field the endpoints read the upload from.
pub const UPLOAD_FIELD: &str = "file";

/// A JSON reply before it is turned into an HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl ApiResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            body: Some(body),
        }
    }

    pub fn error(status: u16, message: impl Into<String>, kind: &str) -> Self {
        Self {
            status,
            body: Some(json!({
                "success": false,
                "error": message.into(),
                "kind": kind,
            })),
        }
    }

    fn no_content() -> Self {
        Self {
            status: 204,
            body: None,
        }
    }

    fn into_http(self) -> Response<std::io::Cursor<Vec<u8>>> {
        let mut headers = vec![
            ("Access-Control-Allow-Origin", "*"),
            ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
            ("Access-Control-Allow-Headers", "*"),
        ];
        let data = match &self.body {
            Some(body) => {
                headers.push(("Content-Type", "application/json"));
                body.to_string().into_bytes()
            }
            None => Vec::new(),
        };

        headers
            .into_iter()
            .filter_map(|(name, value)| Header::from_bytes(name.as_bytes(), value.as_bytes()).ok())
            .fold(
                Response::from_data(data).with_status_code(StatusCode(self.status)),
                |response, header| response.with_header(header),
            )
    }
}

fn failure(route: &str, err: &SegmentError) -> ApiResponse {
    let kind = err.kind();
    error!(route, ?kind, error = %err, "request failed");
    ApiResponse::error(kind.http_status(), err.to_string(), kind.as_str())
}

fn nested(labels: &Array3<u8>) -> Vec<Vec<Vec<u8>>> {
    labels
        .outer_iter()
        .map(|plane| plane.outer_iter().map(|row| row.to_vec()).collect())
        .collect()
}

fn shape_of(labels: &Array3<u8>) -> [usize; 3] {
    let (x, y, z) = labels.dim();
    [x, y, z]
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub fn root(state: &AppState) -> ApiResponse {
    ApiResponse::ok(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "model_loaded": state.segmenter.model().is_loaded(),
    }))
}

pub fn health(state: &AppState) -> ApiResponse {
    let model = state.segmenter.model();
    ApiResponse::ok(json!({
        "status": "healthy",
        "model_loaded": model.is_loaded(),
        "engine": model.describe(),
    }))
}

fn uploaded_file(content_type: &str, body: &[u8]) -> Result<(String, Vec<u8>), SegmentError> {
    if !content_type.starts_with("multipart/form-data") {
        return Err(SegmentError::InvalidInput(format!(
            "expected multipart/form-data upload, got {content_type:?}"
        )));
    }
    let boundary = extract_boundary(content_type)
        .ok_or_else(|| SegmentError::InvalidInput("multipart body has no boundary".to_owned()))?;
    let file = extract_file(body, &boundary, UPLOAD_FIELD)
        .ok_or_else(|| SegmentError::InvalidInput(format!("no file uploaded in field {UPLOAD_FIELD:?}")))?;
    Ok((file.filename, file.data))
}

/// `POST /segment` and `POST /segment/compact`
pub fn segment(state: &AppState, content_type: &str, body: &[u8], compact: bool) -> ApiResponse {
    let route = if compact { "/segment/compact" } else { "/segment" };
    let outcome = uploaded_file(content_type, body).and_then(|(filename, bytes)| {
        info!(route, filename = %filename, bytes = bytes.len(), "processing upload");
        let segmentation = state.segmenter.segment_file(&bytes, &filename)?;
        Ok((filename, segmentation))
    });
    let (filename, segmentation) = match outcome {
        Ok(done) => done,
        Err(err) => return failure(route, &err),
    };

    let context = &segmentation.context;
    if compact {
        return match encoding::encode_compact(&segmentation.labels) {
            Ok(data) => ApiResponse::ok(json!({
                "success": true,
                "shape": segmentation.shape(),
                "dtype": COMPACT_DTYPE,
                "encoding": COMPACT_ENCODING,
                "inference_time": context.timings.total,
                "data": data,
            })),
            Err(err) => failure(route, &err.into()),
        };
    }

    let unique = segmentation.unique_labels();
    ApiResponse::ok(json!({
        "success": true,
        "filename": filename,
        "original_shape": context.original_shape,
        "resampled_shape": context.resampled_shape,
        "segmentation_shape": segmentation.shape(),
        "num_labels": unique.len(),
        "unique_labels": unique,
        "timing": context.timings,
        "segmentation": nested(&segmentation.labels),
    }))
}

/// `POST /segment/tensor`. Accepts the cube as a multipart file or as the
/// raw request body.
pub fn segment_tensor(state: &AppState, content_type: &str, body: &[u8]) -> ApiResponse {
    let route = "/segment/tensor";
    let upload = if content_type.starts_with("multipart/form-data") {
        match uploaded_file(content_type, body) {
            Ok((_, bytes)) => bytes,
            Err(err) => return failure(route, &err),
        }
    } else {
        body.to_vec()
    };
    info!(route, bytes = upload.len(), "received tensor upload");

    let outcome = state.segmenter.segment_tensor(&upload).and_then(|result| {
        let data = encoding::encode_compact(&result.labels)?;
        Ok((result, data))
    });
    match outcome {
        Ok((result, data)) => ApiResponse::ok(json!({
            "success": true,
            "shape": shape_of(&result.labels),
            "dtype": COMPACT_DTYPE,
            "encoding": COMPACT_ENCODING,
            "inference_time": result.inference_seconds,
            "total_time": result.total_seconds,
            "data": data,
        })),
        Err(err) => failure(route, &err),
    }
}

/// Route a request that has already been read into memory.
pub fn handle(state: &AppState, method: &Method, path: &str, content_type: &str, body: &[u8]) -> ApiResponse {
    match (method, path) {
        (Method::Options, _) => ApiResponse::no_content(),
        (Method::Get, "/") => root(state),
        (Method::Get, "/health") => health(state),
        (Method::Post, "/segment") => segment(state, content_type, body, false),
        (Method::Post, "/segment/compact") => segment(state, content_type, body, true),
        (Method::Post, "/segment/tensor") => segment_tensor(state, content_type, body),
        _ => ApiResponse::error(404, format!("no route for {method} {path}"), "not_found"),
    }
}

// ---------------------------------------------------------------------------
// Request dispatcher
// ---------------------------------------------------------------------------

fn read_body(request: &mut Request, limit: usize) -> Result<Vec<u8>, ApiResponse> {
    let too_large = || {
        ApiResponse::error(
            413,
            format!("request body exceeds the {limit} byte upload limit"),
            "invalid_input",
        )
    };
    if request.body_length().is_some_and(|len| len > limit) {
        return Err(too_large());
    }

    let mut body = Vec::new();
    request
        .as_reader()
        .take(limit as u64 + 1)
        .read_to_end(&mut body)
        .map_err(|e| ApiResponse::error(400, format!("failed to read request body: {e}"), "invalid_input"))?;
    if body.len() > limit {
        return Err(too_large());
    }
    Ok(body)
}

/// Reads the request, routes it and sends the reply.
pub fn dispatch(mut request: Request, state: &AppState) {
    let method = request.method().clone();
    let url = request.url().to_owned();
    let path = url.split('?').next().unwrap_or_default().to_owned();
    let content_type = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Content-Type"))
        .map(|h| h.value.as_str().to_owned())
        .unwrap_or_default();

    let response = if method == Method::Post {
        match read_body(&mut request, state.max_upload_bytes) {
            Ok(body) => handle(state, &method, &path, &content_type, &body),
            Err(response) => response,
        }
    } else {
        handle(state, &method, &path, &content_type, &[])
    };

    if let Err(e) = request.respond(response.into_http()) {
        warn!(%method, path = %path, error = %e, "failed to send response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, InferenceEngine, ModelService};
    use crate::pipeline::{ConformSettings, Segmenter};

    use ndarray::{Array5, ArrayView5};
    use std::sync::Arc;

    struct BackgroundEngine;

    impl InferenceEngine for BackgroundEngine {
        fn predict(&self, input: ArrayView5<'_, f32>) -> Result<Array5<f32>, EngineError> {
            let s = input.shape();
            Ok(Array5::from_shape_fn((1, s[1], s[2], s[3], 3), |(.., c)| if c == 1 { 1.0 } else { 0.0 }))
        }

        fn describe(&self) -> String {
            "background".to_owned()
        }
    }

    fn state(model: ModelService) -> AppState {
        AppState {
            segmenter: Segmenter::with_settings(
                Arc::new(model),
                ConformSettings {
                    cube_edge: 4,
                    target_spacing: 1.0,
                },
            ),
            max_upload_bytes: 1024,
        }
    }

    #[test]
    fn health_reports_engine_state() {
        let unloaded = state(ModelService::lazy(|| Err(EngineError::Unavailable)));
        assert_eq!(root(&unloaded).body.unwrap()["model_loaded"], false);

        let loaded = state(ModelService::with_engine(Box::new(BackgroundEngine)));
        let body = health(&loaded).body.unwrap();
        assert_eq!(body["model_loaded"], true);
        assert_eq!(body["engine"], "background");
    }

    #[test]
    fn tensor_route_returns_compact_labels() {
        let state = state(ModelService::with_engine(Box::new(BackgroundEngine)));
        let response = handle(&state, &Method::Post, "/segment/tensor", "application/octet-stream", &[7u8; 64]);
        assert_eq!(response.status, 200);

        let body = response.body.unwrap();
        assert_eq!(body["shape"], json!([4, 4, 4]));
        let labels = encoding::decode_compact(body["data"].as_str().unwrap(), [4, 4, 4]).unwrap();
        assert!(labels.iter().all(|&l| l == 1));
    }

    #[test]
    fn bad_uploads_are_client_errors() {
        let state = state(ModelService::with_engine(Box::new(BackgroundEngine)));

        let short = handle(&state, &Method::Post, "/segment/tensor", "application/octet-stream", &[0u8; 63]);
        assert_eq!(short.status, 400);
        assert_eq!(short.body.unwrap()["kind"], "invalid_input");

        let not_multipart = handle(&state, &Method::Post, "/segment", "application/json", b"{}");
        assert_eq!(not_multipart.status, 400);
    }

    #[test]
    fn unknown_routes_and_preflight() {
        let state = state(ModelService::lazy(|| Err(EngineError::Unavailable)));
        assert_eq!(handle(&state, &Method::Get, "/nope", "", &[]).status, 404);
        assert_eq!(handle(&state, &Method::Options, "/segment", "", &[]).status, 204);
    }

    #[test]
    fn engine_failures_are_server_errors() {
        let state = state(ModelService::lazy(|| Err(EngineError::Unavailable)));
        let response = handle(&state, &Method::Post, "/segment/tensor", "", &[0u8; 64]);
        assert_eq!(response.status, 500);
        assert_eq!(response.body.unwrap()["kind"], "engine");
    }
}
