//! Axum route handlers for the scrape API.

use axum::{
    body::Bytes,
    extract::{Query, State},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::pipeline::models::RunReport;
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ScrapeParams {
    pub scraper: Option<String>,
}

/// The compiled artifact, returned inline as a file download.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDownloadResponse {
    pub message: String,
    pub run_id: Uuid,
    pub scraper: String,
    pub file_name: String,
    /// Base64 of the artifact bytes.
    pub file_content: String,
    pub content_type: String,
    pub file_size: usize,
    pub success: bool,
    pub report: RunReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScraperKind {
    HackerNews,
    LinkedIn,
}

impl ScraperKind {
    fn parse(raw: Option<&str>) -> Result<Self, AppError> {
        match raw {
            Some("hackernews") => Ok(Self::HackerNews),
            Some("linkedin") => Ok(Self::LinkedIn),
            _ => Err(AppError::Validation(
                "Invalid or missing scraper parameter. Use 'hackernews' or 'linkedin'".to_string(),
            )),
        }
    }
}

fn parse_urls(body: &[u8]) -> Result<Vec<String>, AppError> {
    let urls: Vec<String> = serde_json::from_slice(body).map_err(|_| {
        AppError::Validation("Invalid request body. Expected a JSON array of strings.".to_string())
    })?;
    if urls.is_empty() {
        return Err(AppError::Validation(
            "Request body must list at least one page URL".to_string(),
        ));
    }
    Ok(urls)
}

fn artifact_file_name() -> String {
    format!(
        "hackernews_jobs_{}.log",
        Local::now().format("%Y-%m-%d_%H-%M-%S")
    )
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /scrape?scraper=hackernews
///
/// Runs the extraction pipeline over the listed thread pages and returns the
/// compiled artifact. Unit failures do not fail the request; they show up in
/// `report.failed_units` with `report.complete = false`.
pub async fn handle_scrape(
    State(state): State<AppState>,
    Query(params): Query<ScrapeParams>,
    body: Bytes,
) -> Result<Json<FileDownloadResponse>, AppError> {
    let urls = parse_urls(&body)?;

    match ScraperKind::parse(params.scraper.as_deref())? {
        ScraperKind::LinkedIn => Err(AppError::NotImplemented(
            "LinkedIn scraper functionality is currently unavailable".to_string(),
        )),
        ScraperKind::HackerNews => {
            info!(
                "Running Hacker News scraper over {} pages ({} concurrent calls)",
                urls.len(),
                state.config.pipeline.scheduler.max_concurrent
            );
            let output = state.pipeline.run(&urls).await?;

            let message = if output.report.complete {
                "Hacker News scraping completed successfully".to_string()
            } else {
                format!(
                    "Hacker News scraping completed with {} failed units",
                    output.report.failed_units.len()
                )
            };

            Ok(Json(FileDownloadResponse {
                message,
                run_id: output.run_id,
                scraper: "hackernews".to_string(),
                file_name: artifact_file_name(),
                file_content: STANDARD.encode(&output.artifact.bytes),
                content_type: "text/plain".to_string(),
                file_size: output.handle.size_bytes,
                success: true,
                report: output.report,
            }))
        }
    }
}
