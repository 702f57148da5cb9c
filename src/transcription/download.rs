use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

const MODEL_BASE_URL: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";

/// HuggingFace filename for a ggml model
fn model_filename(model_name: &str) -> String {
    format!("ggml-{model_name}.bin")
}

/// Ensures the model file is present, downloading it if it is not
///
/// Returns true if a download happened, false if the file already existed.
/// Leftover `.tmp` files from a previous interrupted download are removed
/// before a fresh attempt.
///
/// # Errors
/// Returns an error if the download or any filesystem operation fails
pub fn ensure_model_available(model_name: &str, model_path: &Path) -> Result<bool> {
    if model_path.exists() {
        tracing::info!(
            path = %model_path.display(),
            "model already exists, skipping download"
        );
        return Ok(false);
    }

    tracing::info!(
        model = model_name,
        path = %model_path.display(),
        "model not found, starting download"
    );

    fetch_model(model_name, model_path)?;

    Ok(true)
}

fn fetch_model(model_name: &str, model_path: &Path) -> Result<()> {
    let url = format!("{}/{}", MODEL_BASE_URL, model_filename(model_name));

    if let Some(parent) = model_path.parent() {
        fs::create_dir_all(parent).context("failed to create model directory")?;
    }

    // Stream into a temp file and rename so an interrupted download never
    // leaves a truncated file at the final path.
    let temp_path = model_path.with_extension("tmp");
    if temp_path.exists() {
        fs::remove_file(&temp_path).context("failed to remove stale temp file")?;
    }

    tracing::info!(url = %url, "downloading model");

    let mut response = reqwest::blocking::get(&url)
        .with_context(|| format!("failed to download model from {url}"))?;

    if !response.status().is_success() {
        anyhow::bail!("download failed with status {}: {}", response.status(), url);
    }

    let mut file = fs::File::create(&temp_path)
        .with_context(|| format!("failed to create temp file at {}", temp_path.display()))?;

    let bytes_written = response
        .copy_to(&mut file)
        .context("failed to stream model to temp file")?;

    drop(file);

    fs::rename(&temp_path, model_path).with_context(|| {
        format!(
            "failed to rename {} to {}",
            temp_path.display(),
            model_path.display()
        )
    })?;

    tracing::info!(
        path = %model_path.display(),
        size = bytes_written,
        "model downloaded successfully"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_filename() {
        assert_eq!(model_filename("tiny"), "ggml-tiny.bin");
        assert_eq!(model_filename("base.en"), "ggml-base.en.bin");
        assert_eq!(model_filename("small"), "ggml-small.bin");
    }

    #[test]
    fn test_existing_model_skips_download() {
        let temp_dir = std::env::temp_dir();
        let model_path = temp_dir.join("dictate_test_existing_model.bin");

        fs::write(&model_path, b"dummy model data").unwrap();

        let downloaded = ensure_model_available("small", &model_path).unwrap();
        assert!(!downloaded);

        fs::remove_file(&model_path).unwrap();
    }

    #[test]
    fn test_invalid_model_name_fails() {
        let temp_dir = std::env::temp_dir();
        let model_path = temp_dir.join("dictate_test_invalid_model.bin");
        let _ = fs::remove_file(&model_path);

        let result = fetch_model("nonexistent-model-xyz", &model_path);
        assert!(result.is_err());
        assert!(!model_path.exists());

        let _ = fs::remove_file(model_path.with_extension("tmp"));
    }

    #[test]
    #[ignore = "requires network access and downloads a large file"]
    fn test_download_tiny_model() {
        let temp_dir = std::env::temp_dir();
        let model_path = temp_dir.join("dictate_download_test").join("ggml-tiny.bin");
        let _ = fs::remove_dir_all(temp_dir.join("dictate_download_test"));

        let downloaded = ensure_model_available("tiny", &model_path).unwrap();
        assert!(downloaded);
        assert!(model_path.exists());
        assert!(fs::metadata(&model_path).unwrap().len() > 0);

        fs::remove_dir_all(temp_dir.join("dictate_download_test")).unwrap();
    }
}
