//! Core data types shared by the client, the wire protocol and the loopback server.

use crate::error::{ClientError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Which parts of an item a fetch populates.
///
/// Downlinks are opt-in for searches because they dominate payload size.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldMask {
    pub fields: bool,
    pub labels: bool,
    pub downlinks: bool,
}

impl FieldMask {
    /// Everything. Used by `get_item`.
    pub fn full() -> Self {
        Self {
            fields: true,
            labels: true,
            downlinks: true,
        }
    }

    /// Fields and labels, no downlinks. Used by searches unless overridden.
    pub fn search_default() -> Self {
        Self {
            fields: true,
            labels: true,
            downlinks: false,
        }
    }

    pub fn with_fields(mut self, include: bool) -> Self {
        self.fields = include;
        self
    }

    pub fn with_labels(mut self, include: bool) -> Self {
        self.labels = include;
        self
    }

    pub fn with_downlinks(mut self, include: bool) -> Self {
        self.downlinks = include;
        self
    }
}

impl Default for FieldMask {
    fn default() -> Self {
        Self::full()
    }
}

/// A directed traceability reference to another item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Link {
    /// Target item ID
    pub to: String,

    /// Target title, filled in by the server on fetch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Link {
    pub fn to(id: impl Into<String>) -> Self {
        Self {
            to: id.into(),
            title: None,
        }
    }
}

/// A table column. `field_id` is stable; the column's position is not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Column {
    pub field_id: String,
    pub name: String,
}

impl Column {
    pub fn new(field_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            field_id: field_id.into(),
            name: name.into(),
        }
    }
}

/// Tabular field content. Rows are keyed by column field id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<Column>,
    #[serde(default)]
    pub rows: Vec<BTreeMap<String, String>>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Resolve a column position to its stable field id.
    pub fn column_number_to_field_id(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(|c| c.field_id.as_str())
    }

    pub fn column_data(&self, row: usize, field_id: &str) -> Option<&str> {
        self.rows.get(row)?.get(field_id).map(String::as_str)
    }

    /// Insert a row at `index`, values given in column order.
    pub(crate) fn insert_row(&mut self, index: usize, values: &[&str]) -> Result<()> {
        if index > self.rows.len() {
            return Err(ClientError::RowOutOfRange {
                row: index,
                rows: self.rows.len(),
            });
        }
        if values.len() > self.columns.len() {
            return Err(ClientError::Rejected(format!(
                "row has {} values but the table has {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        let row = self
            .columns
            .iter()
            .zip(values)
            .map(|(column, value)| (column.field_id.clone(), value.to_string()))
            .collect();
        self.rows.insert(index, row);
        Ok(())
    }

    pub(crate) fn set_column_data(&mut self, row: usize, field_id: &str, value: &str) -> Result<()> {
        if !self.columns.iter().any(|c| c.field_id == field_id) {
            return Err(ClientError::FieldNotFound(format!("column {}", field_id)));
        }
        let rows = self.rows.len();
        let cells = self
            .rows
            .get_mut(row)
            .ok_or(ClientError::RowOutOfRange { row, rows })?;
        cells.insert(field_id.to_string(), value.to_string());
        Ok(())
    }
}

/// A document section: one inner field of a document item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Section {
    /// Section type, e.g. "richtext", "table", "items"
    #[serde(rename = "type")]
    pub section_type: String,

    /// Type-specific configuration, passed through as-is
    #[serde(default)]
    pub config: serde_json::Value,

    /// Section content, usually a JSON or HTML string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Field content, one variant per handler kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    RichText(String),
    Table(Table),
    Raw(Option<String>),
    Section(Section),
}

impl FieldValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::RichText(_) => "rich text",
            FieldValue::Table(_) => "table",
            FieldValue::Raw(_) => "raw data",
            FieldValue::Section(_) => "document section",
        }
    }
}

/// A typed field on an item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Field {
    pub id: u32,
    pub name: String,
    pub value: FieldValue,
}

/// A requirement, specification, test case or any other item (or folder).
///
/// Items are snapshots: mutations stay local until passed to
/// `Project::put_item` or `Project::update_item`, which return a fresh copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    /// Server-assigned ID, `None` until persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) id: Option<String>,

    pub(crate) category: String,

    pub(crate) title: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) labels: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) fields: Vec<Field>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) downlinks: Vec<Link>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub(crate) is_folder: bool,

    /// Bumped by the server on every successful update
    #[serde(default)]
    pub(crate) revision: u64,

    /// Parts populated by the fetch that produced this snapshot
    #[serde(default)]
    pub(crate) loaded: FieldMask,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) modified_at: Option<DateTime<Utc>>,

    #[serde(skip)]
    pub(crate) dirty: bool,
}

impl Item {
    /// A fresh, unsaved item.
    pub(crate) fn new_local(category: &str, fields: Vec<Field>, is_folder: bool) -> Self {
        Self {
            id: None,
            category: category.to_string(),
            title: String::new(),
            labels: Vec::new(),
            fields,
            downlinks: Vec::new(),
            is_folder,
            revision: 0,
            loaded: FieldMask::full(),
            created_at: None,
            modified_at: None,
            dirty: true,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) -> &mut Self {
        self.title = title.into();
        self.dirty = true;
        self
    }

    pub fn is_folder(&self) -> bool {
        self.is_folder
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn loaded(&self) -> FieldMask {
        self.loaded
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.modified_at
    }

    /// True if there are local mutations not yet sent to the server.
    pub fn needs_save(&self) -> bool {
        self.dirty
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l == name)
    }

    /// Add a label. Setting a label that is already present changes nothing.
    pub fn set_label(&mut self, name: &str) -> Result<&mut Self> {
        self.require_labels()?;
        if !self.has_label(name) {
            self.labels.push(name.to_string());
            self.dirty = true;
        }
        Ok(self)
    }

    /// Remove a label. Unsetting an absent label changes nothing.
    pub fn unset_label(&mut self, name: &str) -> Result<&mut Self> {
        self.require_labels()?;
        let before = self.labels.len();
        self.labels.retain(|l| l != name);
        if self.labels.len() != before {
            self.dirty = true;
        }
        Ok(self)
    }

    /// Replace the whole label set. Duplicates collapse.
    pub fn set_labels<I, S>(&mut self, labels: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.require_labels()?;
        let mut next: Vec<String> = Vec::new();
        for label in labels {
            let label = label.into();
            if !next.contains(&label) {
                next.push(label);
            }
        }
        self.labels = next;
        self.dirty = true;
        Ok(self)
    }

    fn require_labels(&self) -> Result<()> {
        if self.loaded.labels {
            Ok(())
        } else {
            Err(ClientError::NotLoaded("labels"))
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// All fields with this name. Names are not unique server-side.
    pub fn fields_by_name(&self, name: &str) -> Vec<&Field> {
        self.fields.iter().filter(|f| f.name == name).collect()
    }

    /// The first field with this name.
    pub fn field(&self, name: &str) -> Result<&Field> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| ClientError::FieldNotFound(name.to_string()))
    }

    /// Outgoing links. Clone the slice before mutating if you need it later.
    pub fn downlinks(&self) -> &[Link] {
        &self.downlinks
    }

    pub fn has_downlink(&self, to: &str) -> bool {
        self.downlinks.iter().any(|l| l.to == to)
    }

    /// Link this item to `to`. Linking twice is a no-op.
    pub fn add_downlink(&mut self, to: &str) -> Result<()> {
        self.require_downlinks()?;
        if !self.has_downlink(to) {
            self.downlinks.push(Link::to(to));
            self.dirty = true;
        }
        Ok(())
    }

    /// Unlink `to`. Returns whether a link was removed.
    pub fn remove_downlink(&mut self, to: &str) -> Result<bool> {
        self.require_downlinks()?;
        let before = self.downlinks.len();
        self.downlinks.retain(|l| l.to != to);
        let removed = self.downlinks.len() != before;
        if removed {
            self.dirty = true;
        }
        Ok(removed)
    }

    fn require_downlinks(&self) -> Result<()> {
        if self.loaded.downlinks {
            Ok(())
        } else {
            Err(ClientError::NotLoaded("downlinks"))
        }
    }

    /// Validate the item before sending it.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        // Folders may be created before they are titled by the server
        if self.title.is_empty() && !self.is_folder {
            return Err(ValidationError::EmptyTitle);
        }
        if self.title.chars().count() > 500 {
            return Err(ValidationError::TitleTooLong);
        }
        if self.title.chars().any(|c| c.is_control()) {
            return Err(ValidationError::InvalidCharacters);
        }
        for label in &self.labels {
            if label.is_empty() || !label.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
                return Err(ValidationError::InvalidLabel(label.clone()));
            }
        }
        Ok(())
    }
}

/// Validation errors for items.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("title cannot be empty")]
    EmptyTitle,
    #[error("title exceeds 500 characters")]
    TitleTooLong,
    #[error("title contains control characters")]
    InvalidCharacters,
    #[error("invalid label '{0}': must be alphanumeric with hyphens/underscores")]
    InvalidLabel(String),
    #[error("item {0} is already persisted; use update_item")]
    AlreadyPersisted(String),
    #[error("item has not been persisted yet; use put_item")]
    NotPersisted,
}

/// An item leaf in the project tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreeItem {
    pub id: String,
    pub title: String,
}

/// A folder in the project tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FolderNode {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub folders: Vec<FolderNode>,
    #[serde(default)]
    pub items: Vec<TreeItem>,
    #[serde(skip)]
    path: String,
}

impl FolderNode {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            folders: Vec::new(),
            items: Vec::new(),
            path: String::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Slash-separated titles from the root down to this folder.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn item_children(&self) -> &[TreeItem] {
        &self.items
    }

    pub fn folder_children(&self) -> &[FolderNode] {
        &self.folders
    }

    /// Find a folder by ID anywhere below (and including) this node.
    pub fn find_folder(&self, id: &str) -> Option<&FolderNode> {
        if self.id == id {
            return Some(self);
        }
        self.folders.iter().find_map(|f| f.find_folder(id))
    }

    /// Find a direct child folder by title. Does not recurse.
    pub fn find_direct_folder_by_title(&self, title: &str) -> Option<&FolderNode> {
        self.folders.iter().find(|f| f.title == title)
    }

    pub(crate) fn assign_paths(&mut self, parent: Option<&str>) {
        self.path = match parent {
            Some(parent) => format!("{}/{}", parent, self.title),
            None => self.title.clone(),
        };
        let path = self.path.clone();
        for folder in &mut self.folders {
            folder.assign_paths(Some(&path));
        }
    }
}

/// Schema of one field within a category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldSpec {
    pub id: u32,
    pub name: String,
    pub kind: FieldSpecKind,
}

/// The kind of a schema field, with whatever the empty value needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldSpecKind {
    RichText,
    Table { columns: Vec<Column> },
    Raw,
    Section {
        section_type: String,
        #[serde(default)]
        config: serde_json::Value,
    },
}

impl FieldSpec {
    pub(crate) fn empty_field(&self) -> Field {
        let value = match &self.kind {
            FieldSpecKind::RichText => FieldValue::RichText(String::new()),
            FieldSpecKind::Table { columns } => FieldValue::Table(Table::new(columns.clone())),
            FieldSpecKind::Raw => FieldValue::Raw(None),
            FieldSpecKind::Section { section_type, config } => FieldValue::Section(Section {
                section_type: section_type.clone(),
                config: config.clone(),
                data: None,
            }),
        };
        Field {
            id: self.id,
            name: self.name.clone(),
            value,
        }
    }
}

/// Schema of one item category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryConfig {
    pub category: String,
    pub label: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    /// Categories every item of this category must link down to
    #[serde(default)]
    pub downlinks_required: Vec<String>,
}

/// Project schema: the categories and their fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ItemConfig {
    pub categories: Vec<CategoryConfig>,
}

impl ItemConfig {
    pub fn categories(&self) -> Vec<&str> {
        self.categories.iter().map(|c| c.category.as_str()).collect()
    }

    pub fn item_configuration(&self, category: &str) -> Option<&CategoryConfig> {
        self.categories.iter().find(|c| c.category == category)
    }

    /// Build an unsaved item (or folder) of `category` with empty fields.
    pub fn new_item(&self, category: &str, is_folder: bool) -> Result<Item> {
        let config = self
            .item_configuration(category)
            .ok_or_else(|| ClientError::InvalidCategory(category.to_string()))?;
        let fields = if is_folder {
            Vec::new()
        } else {
            config.fields.iter().map(FieldSpec::empty_field).collect()
        };
        Ok(Item::new_local(category, fields, is_folder))
    }
}

/// Parameters of a bulk derivation, e.g. test cases into execution records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecuteParam {
    /// Source item or folder IDs
    pub sources: Vec<String>,
    /// Category of the items to create
    pub category: String,
    /// Title of the folder that will hold the results
    pub name: String,
    /// Folder the result folder is created in
    pub parent_folder: String,
    /// Link each source to its derived item
    pub link_sources: bool,
}

/// Summary of a finished bulk derivation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecuteResult {
    /// The folder holding the created items
    pub folder: String,
    /// IDs of the created items
    pub created: Vec<String>,
}

/// One output file of a render job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobFile {
    pub file_id: u64,
    pub name: String,
    pub url: String,
}

/// A progress notification for a server-side render job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobProgress {
    pub job_id: u64,
    pub status: String,
    /// 0-100
    pub progress: u8,
    /// Empty until the job completes
    #[serde(default)]
    pub job_files: Vec<JobFile>,
}

impl JobProgress {
    pub fn is_done(&self) -> bool {
        self.progress >= 100
    }
}

/// Acknowledgment of a completed upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileAck {
    pub file_id: u64,
    pub key: String,
    pub file_name: String,
    pub size: u64,
    pub sha256: String,
}

impl FileAck {
    /// The `id?key=...` form used to reference the file from item fields.
    pub fn reference(&self) -> String {
        format!("{}?key={}", self.file_id, self.key)
    }
}

/// Upload progress, reported after each chunk is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub sent: u64,
    pub chunks: usize,
}

/// A server-wide key/value setting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerSettings {
    pub setting_list: Vec<Setting>,
}

impl ServerSettings {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.setting_list
            .iter()
            .find(|s| s.key == key)
            .map(|s| s.value.as_str())
    }
}

/// A notification attached to an item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Todo {
    pub id: u64,
    pub item: String,
    pub assignees: Vec<String>,
    pub kind: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub done: bool,
}

/// Filter for `Project::get_todos`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TodoQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    #[serde(default)]
    pub include_done: bool,
    #[serde(default)]
    pub all_users: bool,
}

impl TodoQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item(mut self, id: impl Into<String>) -> Self {
        self.item = Some(id.into());
        self
    }

    pub fn include_done(mut self, include: bool) -> Self {
        self.include_done = include;
        self
    }

    pub fn all_users(mut self, all: bool) -> Self {
        self.all_users = all;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_item(title: &str) -> Item {
        let mut item = Item::new_local("TC", Vec::new(), false);
        item.id = Some("TC-1".to_string());
        item.title = title.to_string();
        item.dirty = false;
        item
    }

    fn steps_table() -> Table {
        Table::new(vec![Column::new("action", "Action"), Column::new("expected", "Expected")])
    }

    #[test]
    fn test_item_validation_valid() {
        let item = make_item("Valid title");
        assert!(item.validate().is_ok());
    }

    #[test]
    fn test_item_validation_empty_title() {
        let item = make_item("");
        assert_eq!(item.validate(), Err(ValidationError::EmptyTitle));
    }

    #[test]
    fn test_item_validation_title_too_long() {
        let item = make_item(&"x".repeat(501));
        assert_eq!(item.validate(), Err(ValidationError::TitleTooLong));
    }

    #[test]
    fn test_item_validation_control_chars() {
        let item = make_item("Title\x00with null");
        assert_eq!(item.validate(), Err(ValidationError::InvalidCharacters));
    }

    #[test]
    fn test_item_validation_invalid_label() {
        let mut item = make_item("Valid title");
        item.set_labels(["valid-label", "invalid label"]).unwrap();
        assert_eq!(
            item.validate(),
            Err(ValidationError::InvalidLabel("invalid label".to_string()))
        );
    }

    #[test]
    fn test_set_label_is_idempotent() {
        let mut once = make_item("Labels");
        once.set_label("DAYTIME").unwrap();
        let mut twice = make_item("Labels");
        twice.set_label("DAYTIME").unwrap().set_label("DAYTIME").unwrap();
        assert_eq!(once.labels(), twice.labels());
    }

    #[test]
    fn test_set_label_accumulates() {
        let mut item = make_item("Labels");
        item.set_label("DAYTIME").unwrap().set_label("NIGHTTIME").unwrap();
        item.set_label("APPLE").unwrap().set_label("ORANGE").unwrap();
        assert_eq!(item.labels(), ["DAYTIME", "NIGHTTIME", "APPLE", "ORANGE"]);
    }

    #[test]
    fn test_unset_absent_label_is_noop() {
        let mut item = make_item("Labels");
        item.set_labels(["APPLE"]).unwrap();
        item.dirty = false;
        item.unset_label("DAYTIME").unwrap();
        assert_eq!(item.labels(), ["APPLE"]);
        assert!(!item.needs_save());
    }

    #[test]
    fn test_set_labels_replaces_and_marks_dirty() {
        let mut item = make_item("Labels");
        item.set_label("A").unwrap().set_label("B").unwrap();
        item.dirty = false;
        item.set_labels(Vec::<String>::new()).unwrap();
        assert!(item.labels().is_empty());
        assert!(item.needs_save());
    }

    #[test]
    fn test_label_mutation_requires_loaded_labels() {
        let mut item = make_item("Labels");
        item.loaded = FieldMask::search_default().with_labels(false);
        assert!(matches!(item.set_label("APPLE"), Err(ClientError::NotLoaded("labels"))));
        assert!(matches!(item.unset_label("APPLE"), Err(ClientError::NotLoaded(_))));
        assert!(matches!(item.set_labels(["APPLE"]), Err(ClientError::NotLoaded(_))));
        assert!(item.labels().is_empty());
        assert!(!item.needs_save());
    }

    #[test]
    fn test_add_then_remove_downlink_restores_set() {
        let mut item = make_item("Links");
        item.downlinks = vec![Link::to("TC-4"), Link::to("TC-9")];
        let original = item.downlinks().to_vec();

        item.add_downlink("TC-12").unwrap();
        assert!(item.has_downlink("TC-12"));
        assert!(item.remove_downlink("TC-12").unwrap());

        assert_eq!(item.downlinks(), original.as_slice());
    }

    #[test]
    fn test_downlink_mutation_requires_loaded_downlinks() {
        let mut item = make_item("Links");
        item.loaded = FieldMask::search_default();
        assert!(matches!(item.add_downlink("TC-1"), Err(ClientError::NotLoaded(_))));
        assert!(matches!(item.remove_downlink("TC-1"), Err(ClientError::NotLoaded(_))));
    }

    #[test]
    fn test_column_id_survives_row_insertion() {
        let mut table = steps_table();
        table.insert_row(0, &["Open fridge", "Fridge door opens"]).unwrap();
        table.insert_row(1, &["Drink milk", "Milk is gone"]).unwrap();
        let column = table.column_number_to_field_id(0).unwrap().to_string();

        table.insert_row(0, &["Walk to kitchen", "In kitchen"]).unwrap();

        assert_eq!(table.column_number_to_field_id(0), Some(column.as_str()));
        assert_eq!(table.column_data(2, &column), Some("Drink milk"));
    }

    #[test]
    fn test_insert_row_past_end_fails() {
        let mut table = steps_table();
        let err = table.insert_row(1, &["a", "b"]).unwrap_err();
        assert!(matches!(err, ClientError::RowOutOfRange { row: 1, rows: 0 }));
    }

    #[test]
    fn test_set_column_data_unknown_column_fails() {
        let mut table = steps_table();
        table.insert_row(0, &["a"]).unwrap();
        assert!(table.set_column_data(0, "nope", "x").is_err());
        table.set_column_data(0, "expected", "b").unwrap();
        assert_eq!(table.column_data(0, "expected"), Some("b"));
    }

    #[test]
    fn test_find_folder_and_paths() {
        let mut root = FolderNode::new("", "WHEELY");
        let mut tcs = FolderNode::new("F-TC-1", "Tests");
        tcs.folders.push(FolderNode::new("F-TC-2", "Smoke"));
        root.folders.push(tcs);
        root.assign_paths(None);

        let smoke = root.find_folder("F-TC-2").unwrap();
        assert_eq!(smoke.path(), "WHEELY/Tests/Smoke");
        assert!(root.find_direct_folder_by_title("Smoke").is_none());
        assert!(root.find_folder("F-TC-1").unwrap().find_direct_folder_by_title("Smoke").is_some());
    }

    #[test]
    fn test_new_item_unknown_category() {
        let config = ItemConfig::default();
        assert!(matches!(
            config.new_item("UC", false),
            Err(ClientError::InvalidCategory(c)) if c == "UC"
        ));
    }

    #[test]
    fn test_item_serialization_roundtrip() {
        let mut item = make_item("Serialize me");
        item.fields.push(Field {
            id: 1,
            name: "Steps".to_string(),
            value: FieldValue::Table(steps_table()),
        });
        item.set_label("READY").unwrap();
        item.dirty = false;
        let json = serde_json::to_string(&item).unwrap();
        let deserialized: Item = serde_json::from_str(&json).unwrap();
        assert_eq!(item, deserialized);
    }
}
