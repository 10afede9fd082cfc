//! Typed handlers over item fields, and the document view of an item.
//!
//! A handler mutably borrows the item it came from, so it cannot outlive that
//! snapshot: after `update_item` returns a new item, take a new handler from it.

use crate::error::{ClientError, Result};
use crate::types::{Field, FieldValue, Item, Section, Table};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Read/write access to a rich-text (HTML) field.
pub struct RichTextHandler<'a> {
    html: &'a mut String,
    dirty: &'a mut bool,
}

impl RichTextHandler<'_> {
    pub fn html(&self) -> &str {
        self.html
    }

    pub fn set_html(&mut self, html: impl Into<String>) {
        *self.html = html.into();
        *self.dirty = true;
    }

    /// Append to the existing HTML.
    pub fn push_html(&mut self, html: &str) {
        self.html.push_str(html);
        *self.dirty = true;
    }
}

/// Row/column access to a table field.
pub struct TableHandler<'a> {
    table: &'a mut Table,
    dirty: &'a mut bool,
}

impl TableHandler<'_> {
    pub fn row_count(&self) -> usize {
        self.table.row_count()
    }

    /// Insert a row at `index` with values in column order.
    pub fn insert_row(&mut self, index: usize, values: &[&str]) -> Result<()> {
        self.table.insert_row(index, values)?;
        *self.dirty = true;
        Ok(())
    }

    pub fn column_data(&self, row: usize, column_id: &str) -> Option<&str> {
        self.table.column_data(row, column_id)
    }

    pub fn set_column_data(&mut self, row: usize, column_id: &str, value: &str) -> Result<()> {
        self.table.set_column_data(row, column_id, value)?;
        *self.dirty = true;
        Ok(())
    }

    /// Stable column id for a column position. Keep the id, not the position.
    pub fn column_number_to_field_id(&self, index: usize) -> Option<String> {
        self.table.column_number_to_field_id(index).map(String::from)
    }

    pub fn table(&self) -> &Table {
        self.table
    }
}

/// Access to a field storing opaque serialized data.
///
/// An absent value and an empty string both mean "no data".
pub struct RawHandler<'a> {
    data: &'a mut Option<String>,
    dirty: &'a mut bool,
}

impl RawHandler<'_> {
    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    pub fn has_data(&self) -> bool {
        self.data.as_deref().is_some_and(|d| !d.is_empty())
    }

    pub fn set_data(&mut self, data: impl Into<String>) {
        *self.data = Some(data.into());
        *self.dirty = true;
    }

    /// Decode the data as a JSON array; no data decodes as an empty list.
    pub fn json_list<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        if !self.has_data() {
            return Ok(Vec::new());
        }
        let data = self.data.as_deref().unwrap_or_default();
        serde_json::from_str(data).map_err(|e| ClientError::Rejected(format!("field data is not a JSON list: {}", e)))
    }

    pub fn set_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let data = serde_json::to_string(value).map_err(|e| ClientError::Rejected(e.to_string()))?;
        self.set_data(data);
        Ok(())
    }
}

impl Item {
    /// Handler for the first rich-text field called `name`.
    pub fn rich_text(&mut self, name: &str) -> Result<RichTextHandler<'_>> {
        let field = self.fields.iter_mut().find(|f| f.name == name);
        match field {
            Some(Field {
                value: FieldValue::RichText(html),
                ..
            }) => Ok(RichTextHandler {
                html,
                dirty: &mut self.dirty,
            }),
            Some(_) => Err(wrong_kind(name, "rich text")),
            None => Err(ClientError::FieldNotFound(name.to_string())),
        }
    }

    /// Handler for the first table field called `name`.
    pub fn table(&mut self, name: &str) -> Result<TableHandler<'_>> {
        let field = self.fields.iter_mut().find(|f| f.name == name);
        match field {
            Some(Field {
                value: FieldValue::Table(table),
                ..
            }) => Ok(TableHandler {
                table,
                dirty: &mut self.dirty,
            }),
            Some(_) => Err(wrong_kind(name, "table")),
            None => Err(ClientError::FieldNotFound(name.to_string())),
        }
    }

    /// Handler for the first raw-data field called `name`.
    pub fn raw(&mut self, name: &str) -> Result<RawHandler<'_>> {
        let field = self.fields.iter_mut().find(|f| f.name == name);
        match field {
            Some(Field {
                value: FieldValue::Raw(data),
                ..
            }) => Ok(RawHandler {
                data,
                dirty: &mut self.dirty,
            }),
            Some(_) => Err(wrong_kind(name, "raw data")),
            None => Err(ClientError::FieldNotFound(name.to_string())),
        }
    }

    /// Read-only table lookup, for verifying a fetched snapshot.
    pub fn table_value(&self, name: &str) -> Result<&Table> {
        match &self.field(name)?.value {
            FieldValue::Table(table) => Ok(table),
            _ => Err(wrong_kind(name, "table")),
        }
    }

    /// Read-only rich-text lookup.
    pub fn html_value(&self, name: &str) -> Result<&str> {
        match &self.field(name)?.value {
            FieldValue::RichText(html) => Ok(html),
            _ => Err(wrong_kind(name, "rich text")),
        }
    }
}

fn wrong_kind(name: &str, expected: &'static str) -> ClientError {
    ClientError::WrongFieldKind {
        name: name.to_string(),
        expected,
    }
}

/// An item viewed as a document: its section fields in order.
#[derive(Debug, Clone)]
pub struct Document {
    item: Item,
}

impl Document {
    pub(crate) fn new(item: Item) -> Self {
        Self { item }
    }

    pub fn item(&self) -> &Item {
        &self.item
    }

    pub fn into_item(self) -> Item {
        self.item
    }

    /// The document's sections, in field order.
    pub fn inner_dhf_fields(&self) -> Vec<DhfField<'_>> {
        self.item
            .fields
            .iter()
            .filter_map(|field| match &field.value {
                FieldValue::Section(section) => Some(DhfField { field, section }),
                _ => None,
            })
            .collect()
    }
}

/// One section of a document.
#[derive(Debug, Clone, Copy)]
pub struct DhfField<'a> {
    field: &'a Field,
    section: &'a Section,
}

impl<'a> DhfField<'a> {
    pub fn field_name(&self) -> &'a str {
        &self.field.name
    }

    pub fn field_type(&self) -> &'a str {
        &self.section.section_type
    }

    pub fn config(&self) -> &'a serde_json::Value {
        &self.section.config
    }

    pub fn data(&self) -> Option<&'a str> {
        self.section.data.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Column, Item};
    use serde::Deserialize;

    fn use_case() -> Item {
        let mut item = Item::new_local("UC", Vec::new(), false);
        item.fields = vec![
            Field {
                id: 1,
                name: "Description".to_string(),
                value: FieldValue::RichText(String::new()),
            },
            Field {
                id: 2,
                name: "Use Case Steps".to_string(),
                value: FieldValue::Table(Table::new(vec![
                    Column::new("action", "Action"),
                    Column::new("response", "Response"),
                ])),
            },
            Field {
                id: 3,
                name: "Files".to_string(),
                value: FieldValue::Raw(None),
            },
        ];
        item.dirty = false;
        item
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Entry {
        name: String,
    }

    #[test]
    fn test_rich_text_set_marks_dirty() {
        let mut item = use_case();
        item.rich_text("Description").unwrap().set_html("This is a test");
        assert!(item.needs_save());
        assert_eq!(item.html_value("Description").unwrap(), "This is a test");
    }

    #[test]
    fn test_wrong_kind_is_reported() {
        let mut item = use_case();
        let err = item.table("Description").err().unwrap();
        assert!(matches!(err, ClientError::WrongFieldKind { expected: "table", .. }));
        assert!(matches!(item.raw("Missing"), Err(ClientError::FieldNotFound(_))));
    }

    #[test]
    fn test_table_handler_rows_and_columns() {
        let mut item = use_case();
        let mut steps = item.table("Use Case Steps").unwrap();
        steps.insert_row(0, &["Open fridge", "Fridge door opens"]).unwrap();
        steps.insert_row(1, &["Get milk", "Milk is in hand"]).unwrap();
        steps.insert_row(2, &["Drink milk", "Milk is gone"]).unwrap();
        let column = steps.column_number_to_field_id(0).unwrap();
        steps.set_column_data(2, &column, "Throw milk away").unwrap();

        assert_eq!(steps.row_count(), 3);
        assert_eq!(steps.column_data(2, &column), Some("Throw milk away"));
        assert_eq!(steps.column_data(2, "response"), Some("Milk is gone"));
    }

    #[test]
    fn test_raw_empty_and_absent_are_empty_lists() {
        let mut item = use_case();
        let handler = item.raw("Files").unwrap();
        assert!(handler.json_list::<Entry>().unwrap().is_empty());

        let mut handler = item.raw("Files").unwrap();
        handler.set_data("");
        assert!(handler.json_list::<Entry>().unwrap().is_empty());
    }

    #[test]
    fn test_raw_json_roundtrip() {
        let mut item = use_case();
        let mut handler = item.raw("Files").unwrap();
        handler
            .set_json(&vec![Entry {
                name: "typewriter.jpg".to_string(),
            }])
            .unwrap();
        let entries: Vec<Entry> = handler.json_list().unwrap();
        assert_eq!(entries[0].name, "typewriter.jpg");
    }

    #[test]
    fn test_document_lists_only_sections() {
        let mut item = use_case();
        item.fields.push(Field {
            id: 9,
            name: "Introduction".to_string(),
            value: FieldValue::Section(Section {
                section_type: "richtext".to_string(),
                config: serde_json::json!({"page_break": false}),
                data: Some("<p>Hello</p>".to_string()),
            }),
        });
        let doc = Document::new(item);
        let sections = doc.inner_dhf_fields();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].field_name(), "Introduction");
        assert_eq!(sections[0].field_type(), "richtext");
        assert_eq!(sections[0].data(), Some("<p>Hello</p>"));
    }
}
