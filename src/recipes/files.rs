//! Uploads and file references stored in item fields.

use super::FILES_FIELD;
use crate::client::Project;
use crate::types::{FileAck, UploadProgress};
use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

/// One entry of a `Files` raw field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub file_name: String,
    /// `id?key=...` reference
    pub file_id: String,
}

/// The attachments listed in `item_id`'s `Files` field.
pub fn list_attachments(project: &Project<'_>, item_id: &str) -> Result<Vec<Attachment>> {
    let mut item = project.get_item(item_id)?;
    let files = item.raw(FILES_FIELD)?;
    Ok(files.json_list()?)
}

/// The result of `upload_file`.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub ack: FileAck,
    pub url: String,
    pub chunks: usize,
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(String::from)
        .ok_or_else(|| eyre!("{} has no file name", path.display()))
}

/// Upload a local file and compute its download URL.
pub fn upload_file(project: &Project<'_>, path: &Path) -> Result<UploadReport> {
    let name = file_name(path)?;
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    project.session().set_comment("Creating attachment");
    let mut chunks = 0;
    let mut on_chunk = |progress: &UploadProgress| {
        log::debug!("Uploading {}: {} bytes sent", name, progress.sent);
        chunks = progress.chunks;
    };
    let ack = project.upload_local_file(file, &name, Some(&mut on_chunk))?;
    let url = project.compute_file_url(&ack);
    Ok(UploadReport { ack, url, chunks })
}

/// The result of `attach_file`.
#[derive(Debug, Clone, Serialize)]
pub struct AttachReport {
    pub item: String,
    pub url: String,
    pub files: Vec<Attachment>,
}

/// Upload a file and append a reference to it to `item_id`'s `Files` field.
pub fn attach_file(project: &Project<'_>, path: &Path, item_id: &str) -> Result<AttachReport> {
    let upload = upload_file(project, path)?;

    let mut item = project.get_item(item_id)?;
    let files = {
        let mut handler = item.raw(FILES_FIELD)?;
        let mut files: Vec<Attachment> = handler.json_list()?;
        files.push(Attachment {
            file_name: upload.ack.file_name.clone(),
            file_id: upload.ack.reference(),
        });
        handler.set_json(&files)?;
        files
    };
    let item = project.update_item(&item)?;
    log::info!("Updated {}", item.id().unwrap_or(item_id));

    Ok(AttachReport {
        item: item_id.to_string(),
        url: upload.url,
        files,
    })
}

/// The result of `place_image`.
#[derive(Debug, Clone, Serialize)]
pub struct PlacedImage {
    pub item: String,
    pub url: String,
}

/// Upload an image and append it to the first use case's description.
pub fn place_image(project: &Project<'_>, path: &Path) -> Result<PlacedImage> {
    let upload = upload_file(project, path)?;

    let ids = project.search_for_ids("mrql:category=UC")?;
    let first = ids.first().ok_or_else(|| eyre!("no UC items found"))?;
    let mut uc = project.get_item(first)?;
    uc.rich_text("Description")?.push_html(&format!(
        r#"Adding an image with the SDK: <img width="400" src="{}"><br>"#,
        upload.url
    ));
    let uc = project.update_item(&uc)?;
    log::info!("Added image to {}", first);

    Ok(PlacedImage {
        item: uc.id().unwrap_or(first).to_string(),
        url: upload.url,
    })
}
