//! Saving generated assets: files appear only for successful submissions.

mod common;

use assert_matches::assert_matches;
use common::{build_state, png_bytes, template_dir, Reply, StubBackend};
use comfyui_invoke_proxy::api::request::{GenerationParams, Submission};
use comfyui_invoke_proxy::backend::AssetResult;
use comfyui_invoke_proxy::media::AcceptHeader;
use comfyui_invoke_proxy::utils::output::generate_to_path;
use comfyui_invoke_proxy::AppError;

#[tokio::test]
async fn successful_generation_writes_the_asset() {
    let templates = template_dir();
    let out_dir = tempfile::tempdir().unwrap();
    let path = out_dir.path().join("dog.png");
    let png = png_bytes(6, 6);
    let state = build_state(
        StubBackend::new(Reply::Asset(AssetResult::new(png.clone(), "image/png"))),
        &templates,
    );

    let asset = generate_to_path(
        &state,
        Submission::Generate(GenerationParams::new("hill happy dog")),
        &AcceptHeader::default(),
        &path,
    )
    .await
    .unwrap();

    assert_eq!(asset.content_type, "image/png");
    assert_eq!(std::fs::read(&path).unwrap(), png);
}

#[tokio::test]
async fn timeout_leaves_no_output_file() {
    let templates = template_dir();
    let out_dir = tempfile::tempdir().unwrap();
    let path = out_dir.path().join("dog.png");
    let state = build_state(StubBackend::new(Reply::Timeout), &templates);

    let result = generate_to_path(
        &state,
        Submission::Generate(GenerationParams::new("hill happy dog")),
        &AcceptHeader::default(),
        &path,
    )
    .await;

    assert_matches!(result, Err(AppError::BackendTimeout(_)));
    assert!(!path.exists());
    assert_eq!(std::fs::read_dir(out_dir.path()).unwrap().count(), 0);
}
