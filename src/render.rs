use std::path::Path;

use anyhow::{Context, Result};
use tokio::process::Command;

use crate::ingest::pdf::has_command;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Renders one 1-based page of `pdf_path` to PNG bytes with poppler's
/// `pdftoppm`, which writes to stdout when no output root is given.
pub async fn render_page_png(pdf_path: &Path, page: u32) -> Result<Vec<u8>> {
    if page == 0 {
        anyhow::bail!("page numbers start at 1");
    }
    if !has_command("pdftoppm").await {
        anyhow::bail!("pdftoppm is not installed; cannot render PDF pages");
    }

    let output = Command::new("pdftoppm")
        .args(render_args(page))
        .arg(pdf_path)
        .output()
        .await
        .with_context(|| format!("failed to run pdftoppm on {}", pdf_path.display()))?;

    if !output.status.success() {
        anyhow::bail!(
            "pdftoppm failed on {} page {page}: {}",
            pdf_path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    if !output.stdout.starts_with(PNG_SIGNATURE) {
        anyhow::bail!(
            "pdftoppm produced no image for {} page {page}",
            pdf_path.display()
        );
    }

    Ok(output.stdout)
}

fn render_args(page: u32) -> Vec<String> {
    let page = page.to_string();
    vec![
        "-f".to_string(),
        page.clone(),
        "-l".to_string(),
        page,
        "-png".to_string(),
        "-singlefile".to_string(),
    ]
}
