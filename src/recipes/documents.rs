//! Document sections and PDF rendering.

use crate::client::Project;
use crate::types::JobProgress;
use eyre::{Context, Result, eyre};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// One section of a document.
#[derive(Debug, Clone, Serialize)]
pub struct SectionReport {
    pub name: String,
    pub kind: String,
    pub config: Value,
    /// Section content, parsed as JSON when it is JSON
    pub data: Option<Value>,
}

/// List the sections of document `id`.
pub fn describe_document(project: &Project<'_>, id: &str) -> Result<Vec<SectionReport>> {
    let doc = project.get_item_as_doc(id)?;
    Ok(doc
        .inner_dhf_fields()
        .iter()
        .map(|field| SectionReport {
            name: field.field_name().to_string(),
            kind: field.field_type().to_string(),
            config: field.config().clone(),
            data: field
                .data()
                .map(|data| serde_json::from_str(data).unwrap_or_else(|_| Value::String(data.to_string()))),
        })
        .collect())
}

/// The result of `render_document`.
#[derive(Debug, Clone, Serialize)]
pub struct RenderReport {
    pub url: String,
    pub events: usize,
    pub path: PathBuf,
    pub bytes: usize,
}

/// Render document `id` to PDF, report each progress event, and save the
/// result to `output`.
pub fn render_document<F>(project: &Project<'_>, id: &str, output: &Path, mut on_progress: F) -> Result<RenderReport>
where
    F: FnMut(&JobProgress),
{
    let doc = project.get_item_as_doc(id)?;
    let mut last: Option<JobProgress> = None;
    let mut events = 0;
    let url = project.to_pdf(&doc, |_, progress| {
        on_progress(progress);
        events += 1;
        last = Some(progress.clone());
    })?;

    let last = last.ok_or_else(|| eyre!("render of {} reported no progress", id))?;
    let file = last
        .job_files
        .first()
        .ok_or_else(|| eyre!("render of {} produced no files", id))?;
    let bytes = project.download_job_result(last.job_id, file.file_id)?;
    fs::write(output, &bytes).with_context(|| format!("Failed to write {}", output.display()))?;

    Ok(RenderReport {
        url,
        events,
        path: output.to_path_buf(),
        bytes: bytes.len(),
    })
}
