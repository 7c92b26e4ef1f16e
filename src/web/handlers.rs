//! HTTP request handlers.

use super::AppState;
use crate::storage::{StorageError, StorageReader};
use crate::types::{format_duration, CheckResult};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
};
use chrono::DateTime;

const STATUS_TEMPLATE: &str = include_str!("templates/status.html");

fn error_response(err: StorageError) -> Response {
    let status = match err {
        StorageError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string()).into_response()
}

fn reader(state: &AppState) -> Result<&dyn StorageReader, Response> {
    state.storage.reader().ok_or_else(|| {
        (
            StatusCode::NOT_IMPLEMENTED,
            format!("{} storage cannot be read", state.storage.kind()),
        )
            .into_response()
    })
}

/// Name of the most recently indexed record.
async fn latest(reader: &dyn StorageReader) -> Result<Option<String>, StorageError> {
    let index = reader.get_index().await?;
    Ok(index
        .into_iter()
        .max_by_key(|(name, stamp)| (*stamp, name.clone()))
        .map(|(name, _)| name))
}

// ============================================================================
// API
// ============================================================================

pub async fn handle_get_index(State(state): State<AppState>) -> Response {
    let reader = match reader(&state) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match reader.get_index().await {
        Ok(index) => Json(index).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_get_check(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let reader = match reader(&state) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match reader.fetch(&name).await {
        Ok(results) => Json(results).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_get_latest(State(state): State<AppState>) -> Response {
    let reader = match reader(&state) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let name = match latest(reader).await {
        Ok(Some(name)) => name,
        Ok(None) => return (StatusCode::NOT_FOUND, "no checks stored yet").into_response(),
        Err(e) => return error_response(e),
    };
    match reader.fetch(&name).await {
        Ok(results) => Json(results).into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Status page
// ============================================================================

pub async fn handle_status(State(state): State<AppState>) -> Response {
    let reader = match reader(&state) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let results = match latest(reader).await {
        Ok(Some(name)) => match reader.fetch(&name).await {
            Ok(results) => results,
            Err(e) => return error_response(e),
        },
        Ok(None) => Vec::new(),
        Err(e) => return error_response(e),
    };

    Html(render_status(&state.config.title, &results)).into_response()
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn render_row(result: &CheckResult) -> String {
    let status = result.status();
    let mut notes = result.notice.clone();
    if !result.message.is_empty() {
        if !notes.is_empty() {
            notes.push_str(" / ");
        }
        notes.push_str(&result.message);
    }
    format!(
        "<tr><td>{}<br><small>{}</small></td><td class=\"{}\">{}</td><td>{}</td><td>{}</td></tr>",
        escape(&result.title),
        escape(&result.endpoint),
        status.as_str(),
        status.as_str(),
        format_duration(result.compute_stats().median),
        escape(&notes),
    )
}

pub(crate) fn render_status(title: &str, results: &[CheckResult]) -> String {
    let summary = match results.iter().map(|r| r.timestamp).max() {
        None => "No checks have been stored yet.".to_string(),
        Some(nanos) => {
            let unhealthy = results.iter().filter(|r| !r.healthy).count();
            let when = DateTime::from_timestamp_nanos(nanos).to_rfc3339();
            format!(
                "{} endpoints, {} unhealthy, last checked {}",
                results.len(),
                unhealthy,
                when
            )
        }
    };
    let rows: String = results.iter().map(render_row).collect();

    STATUS_TEMPLATE
        .replace("{{title}}", &escape(title))
        .replace("{{summary}}", &escape(&summary))
        .replace("{{rows}}", &rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_status() {
        let results = vec![
            CheckResult {
                healthy: true,
                ..CheckResult::new("Site", "https://example.com")
            },
            CheckResult {
                down: true,
                notice: "<refused>".into(),
                message: "investigating".into(),
                ..CheckResult::new("API", "https://api.example.com")
            },
        ];
        let page = render_status("Status", &results);

        assert!(page.contains("<title>Status</title>"));
        assert!(page.contains("2 endpoints, 1 unhealthy"));
        assert!(page.contains("class=\"down\">down"));
        assert!(page.contains("&lt;refused&gt; / investigating"));
        assert!(!page.contains("{{rows}}"));
    }

    #[test]
    fn test_render_empty_status() {
        let page = render_status("Status", &[]);
        assert!(page.contains("No checks have been stored yet."));
    }
}
