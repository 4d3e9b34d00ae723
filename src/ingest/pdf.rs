use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::process::Command;

use crate::models::PageUnit;

const FORM_FEED: char = '\u{000C}';

/// The file name a PDF is cited under, e.g. `Chapitre 2.pdf`.
pub fn document_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// One unit per non-empty page, numbered from 1.
///
/// Uses poppler's `pdftotext` page by page when installed and falls back to
/// `pdf-extract`, whose output separates pages with form feeds.
pub async fn extract_pdf_pages(pdf_path: &Path, source_hash: &str) -> Result<Vec<PageUnit>> {
    let document = document_name(pdf_path);
    let mut units = Vec::new();

    if has_command("pdftotext").await {
        let page_count = get_pdf_page_count(pdf_path).await.unwrap_or(0);
        for page in 1..=page_count {
            let output = Command::new("pdftotext")
                .arg("-f")
                .arg(page.to_string())
                .arg("-l")
                .arg(page.to_string())
                .arg("-layout")
                .arg("-nopgbrk")
                .arg(pdf_path)
                .arg("-")
                .output()
                .await
                .with_context(|| format!("failed to run pdftotext for page {page}"))?;

            if !output.status.success() {
                tracing::warn!("pdftotext failed on {} page {page}", pdf_path.display());
                continue;
            }

            let content = normalize_text(&String::from_utf8_lossy(&output.stdout));
            if content.is_empty() {
                tracing::warn!("no extractable text on {} page {page}", pdf_path.display());
                continue;
            }

            units.push(PageUnit {
                document: document.clone(),
                page,
                content,
                source_hash: source_hash.to_string(),
            });
        }
    }

    if units.is_empty() {
        let owned_path = pdf_path.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || pdf_extract::extract_text(&owned_path))
            .await
            .context("PDF extraction task panicked")?
            .with_context(|| format!("failed to extract text from {}", pdf_path.display()))?;

        units = split_pages(&document, &extracted, source_hash);
    }

    Ok(units)
}

fn split_pages(document: &str, extracted: &str, source_hash: &str) -> Vec<PageUnit> {
    extracted
        .split(FORM_FEED)
        .zip(1u32..)
        .filter_map(|(raw, page)| {
            let content = normalize_text(raw);
            (!content.is_empty()).then(|| PageUnit {
                document: document.to_string(),
                page,
                content,
                source_hash: source_hash.to_string(),
            })
        })
        .collect()
}

async fn get_pdf_page_count(pdf_path: &Path) -> Result<u32> {
    let output = Command::new("pdfinfo")
        .arg(pdf_path)
        .output()
        .await
        .context("failed to run pdfinfo")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("pdfinfo exited with non-zero status"));
    }

    parse_page_count(&String::from_utf8_lossy(&output.stdout))
}

fn parse_page_count(pdfinfo_stdout: &str) -> Result<u32> {
    let regex = Regex::new(r"(?m)^Pages:\s+(\d+)\s*$")?;
    regex
        .captures(pdfinfo_stdout)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .ok_or_else(|| anyhow::anyhow!("unable to parse page count from pdfinfo"))
}

pub(crate) async fn has_command(binary: &str) -> bool {
    // Some poppler tools exit non-zero on --version, so probe PATH with `which`.
    Command::new("which")
        .arg(binary)
        .output()
        .await
        .map(|out| out.status.success() && !out.stdout.is_empty())
        .unwrap_or(false)
}

fn normalize_text(input: &str) -> String {
    input
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace('\u{00A0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
