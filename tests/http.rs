//! Router tests: requests go through `tower::ServiceExt::oneshot`, no socket.

#![cfg(feature = "server")]

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{config_in, entries, media_boxes, pdf_with_pages, png_bytes, StubRenderer};
use http_body_util::BodyExt;
use pagemill::server::{build_router, DEFAULT_BODY_LIMIT};
use pagemill::ConversionPipeline;
use serde_json::{json, Value};
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;

const BOUNDARY: &str = "pagemill-test-boundary";

struct Part<'a> {
    name: &'a str,
    filename: Option<&'a str>,
    content_type: Option<&'a str>,
    data: Vec<u8>,
}

impl<'a> Part<'a> {
    fn file(name: &'a str, filename: &'a str, content_type: &'a str, data: Vec<u8>) -> Self {
        Self {
            name,
            filename: Some(filename),
            content_type: Some(content_type),
            data,
        }
    }

    fn text(name: &'a str, value: &str) -> Self {
        Self {
            name,
            filename: None,
            content_type: None,
            data: value.as_bytes().to_vec(),
        }
    }
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", part.name);
        if let Some(filename) = part.filename {
            disposition.push_str(&format!("; filename=\"{filename}\""));
        }
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(b"\r\n");
        if let Some(ct) = part.content_type {
            body.extend_from_slice(format!("Content-Type: {ct}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(&part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn router(root: &Path) -> Router {
    let pipeline = ConversionPipeline::new(config_in(root), Arc::new(StubRenderer::default()));
    build_router(Arc::new(pipeline), DEFAULT_BODY_LIMIT)
}

async fn post(app: Router, uri: &str, parts: &[Part<'_>]) -> axum::response::Response {
    app.oneshot(
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(parts)))
            .expect("request builder should not fail"),
    )
    .await
    .expect("handler should respond")
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("response body must be readable")
        .to_bytes()
        .to_vec()
}

async fn json_body(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("error body must be JSON")
}

fn header_str<'a>(response: &'a axum::response::Response, name: header::HeaderName) -> &'a str {
    response
        .headers()
        .get(name)
        .expect("header present")
        .to_str()
        .expect("header must be valid utf-8")
}

#[tokio::test]
async fn health_returns_ok_json() {
    let root = tempfile::tempdir().unwrap();
    let response = router(root.path())
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "status": "ok" }));
}

#[tokio::test]
async fn images_are_returned_as_pdf_attachment() {
    let root = tempfile::tempdir().unwrap();
    let response = post(
        router(root.path()),
        "/convert/images-to-document",
        &[
            Part::file("images", "tall.png", "image/png", png_bytes(100, 200)),
            Part::file("images", "square.png", "image/png", png_bytes(50, 50)),
        ],
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CONTENT_TYPE), "application/pdf");
    assert_eq!(
        header_str(&response, header::CONTENT_DISPOSITION),
        "attachment; filename=\"images.pdf\""
    );
    let pdf = body_bytes(response).await;
    assert_eq!(media_boxes(&pdf), vec![vec![0, 0, 100, 200], vec![0, 0, 50, 50]]);
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test]
async fn image_kind_falls_back_to_extension() {
    let root = tempfile::tempdir().unwrap();
    let response = post(
        router(root.path()),
        "/convert/images-to-document",
        &[Part::file(
            "images",
            "scan.png",
            "application/octet-stream",
            png_bytes(30, 40),
        )],
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(media_boxes(&body_bytes(response).await), vec![vec![0, 0, 30, 40]]);
}

#[tokio::test]
async fn zero_images_is_400() {
    let root = tempfile::tempdir().unwrap();
    let response = post(
        router(root.path()),
        "/convert/images-to-document",
        &[Part::text("note", "no files here")],
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Invalid input");
    assert!(body["details"].as_str().unwrap().contains("No images"));
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test]
async fn unsupported_image_type_is_400() {
    let root = tempfile::tempdir().unwrap();
    let response = post(
        router(root.path()),
        "/convert/images-to-document",
        &[Part::file("images", "anim.gif", "image/gif", b"GIF89a".to_vec())],
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["details"].as_str().unwrap().contains("image/gif"));
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test]
async fn corrupt_image_is_500_with_details() {
    let root = tempfile::tempdir().unwrap();
    let response = post(
        router(root.path()),
        "/convert/images-to-document",
        &[
            Part::file("images", "ok.png", "image/png", png_bytes(5, 5)),
            Part::file("images", "broken.png", "image/png", b"\x89PNG broken".to_vec()),
        ],
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Conversion failed");
    assert!(body["details"].as_str().unwrap().contains("image #2"));
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test]
async fn document_pages_are_returned_as_zip() {
    let root = tempfile::tempdir().unwrap();
    let response = post(
        router(root.path()),
        "/convert/document-to-images",
        &[
            Part::text("format", "jpeg"),
            Part::text("scale", "2"),
            Part::file("document", "report.pdf", "application/pdf", pdf_with_pages(3)),
        ],
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CONTENT_TYPE), "application/zip");
    assert_eq!(
        header_str(&response, header::CONTENT_DISPOSITION),
        "attachment; filename=\"pages.zip\""
    );

    let mut archive = zip::ZipArchive::new(Cursor::new(body_bytes(response).await)).unwrap();
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    assert_eq!(names, ["page_1.jpg", "page_2.jpg", "page_3.jpg"]);

    let mut first = Vec::new();
    archive.by_index(0).unwrap().read_to_end(&mut first).unwrap();
    let img = image::load_from_memory(&first).unwrap();
    assert_eq!((img.width(), img.height()), (200, 100));
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test]
async fn single_page_document_returns_image() {
    let root = tempfile::tempdir().unwrap();
    let response = post(
        router(root.path()),
        "/convert/document-to-images",
        &[
            Part::file("document", "one.pdf", "application/pdf", pdf_with_pages(1)),
            Part::text("format", "bmp"),
            Part::text("resolution", "72"),
        ],
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CONTENT_TYPE), "image/png");
    assert_eq!(
        header_str(&response, header::CONTENT_DISPOSITION),
        "attachment; filename=\"page_1.png\""
    );
    let img = image::load_from_memory(&body_bytes(response).await).unwrap();
    assert_eq!((img.width(), img.height()), (100, 50));
}

#[tokio::test]
async fn zero_page_document_is_400() {
    let root = tempfile::tempdir().unwrap();
    let response = post(
        router(root.path()),
        "/convert/document-to-images",
        &[Part::file("document", "empty.pdf", "application/pdf", pdf_with_pages(0))],
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Invalid input");
    assert!(body["details"].as_str().unwrap().contains("no pages"));
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test]
async fn missing_document_is_400() {
    let root = tempfile::tempdir().unwrap();
    let response = post(
        router(root.path()),
        "/convert/document-to-images",
        &[Part::text("format", "png")],
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "Invalid input");
    assert_eq!(entries(root.path()), 0);
}
