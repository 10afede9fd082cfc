//! The `WHEELY_OBSERVABLE` demo project.

use super::repository::{ProjectState, Repository};
use crate::types::{
    CategoryConfig, Column, Field, FieldSpec, FieldSpecKind, FieldValue, Item, ItemConfig, Link,
};
use serde_json::json;

pub const DEMO_PROJECT: &str = "WHEELY_OBSERVABLE";
pub const DEMO_USER: &str = "demo";
pub const DEMO_TOKEN: &str = "demo";

impl Repository {
    /// A server with user `demo`/`demo` and the `WHEELY_OBSERVABLE` project.
    pub fn demo() -> Self {
        let mut repository = Repository::new();
        repository.add_user(DEMO_USER, DEMO_TOKEN);
        let project = repository.add_project(DEMO_PROJECT, demo_config());
        seed_items(project);
        repository
    }
}

fn rich_text(id: u32, name: &str) -> FieldSpec {
    FieldSpec {
        id,
        name: name.to_string(),
        kind: FieldSpecKind::RichText,
    }
}

fn table(id: u32, name: &str, columns: &[(&str, &str)]) -> FieldSpec {
    FieldSpec {
        id,
        name: name.to_string(),
        kind: FieldSpecKind::Table {
            columns: columns.iter().map(|(id, name)| Column::new(*id, *name)).collect(),
        },
    }
}

fn raw(id: u32, name: &str) -> FieldSpec {
    FieldSpec {
        id,
        name: name.to_string(),
        kind: FieldSpecKind::Raw,
    }
}

fn section(id: u32, name: &str, section_type: &str, config: serde_json::Value) -> FieldSpec {
    FieldSpec {
        id,
        name: name.to_string(),
        kind: FieldSpecKind::Section {
            section_type: section_type.to_string(),
            config,
        },
    }
}

fn category(category: &str, label: &str, fields: Vec<FieldSpec>, downlinks_required: &[&str]) -> CategoryConfig {
    CategoryConfig {
        category: category.to_string(),
        label: label.to_string(),
        fields,
        downlinks_required: downlinks_required.iter().map(|c| c.to_string()).collect(),
    }
}

/// The demo schema.
pub fn demo_config() -> ItemConfig {
    ItemConfig {
        categories: vec![
            category(
                "UC",
                "Use Case",
                vec![
                    rich_text(1, "Description"),
                    table(2, "Use Case Steps", &[("action", "Action"), ("response", "Response")]),
                ],
                &["REQ"],
            ),
            category("REQ", "Requirement", vec![rich_text(1, "Description")], &["SPEC"]),
            category(
                "SPEC",
                "Specification",
                vec![rich_text(1, "Description"), raw(2, "Files")],
                &["TC"],
            ),
            category(
                "TC",
                "Test Case",
                vec![
                    rich_text(1, "Description"),
                    table(2, "Test Case Steps", &[("action", "Action"), ("expected", "Expected Result")]),
                ],
                &[],
            ),
            category(
                "XTC",
                "Test Case Execution",
                vec![
                    rich_text(1, "Description"),
                    table(
                        2,
                        "Test Case Steps",
                        &[("action", "Action"), ("expected", "Expected Result"), ("passfail", "Pass/Fail")],
                    ),
                    raw(3, "Test Run Result"),
                ],
                &[],
            ),
            category(
                "DOC",
                "Document",
                vec![
                    section(1, "Introduction", "richtext", json!({})),
                    section(2, "Scope", "richtext", json!({})),
                    section(3, "Requirements", "items", json!({ "folder": "F-REQ-1", "includeFolders": false })),
                    section(4, "Signatures", "signatures", json!({ "minimum": 1 })),
                ],
                &[],
            ),
        ],
    }
}

struct Seed {
    item: Item,
}

impl Seed {
    fn item(config: &ItemConfig, category: &str, title: &str) -> Self {
        let fields = config
            .item_configuration(category)
            .map(|c| c.fields.iter().map(FieldSpec::empty_field).collect())
            .unwrap_or_default();
        let mut item = Item::new_local(category, fields, false);
        item.title = title.to_string();
        Self { item }
    }

    fn folder(category: &str, title: &str) -> Self {
        let mut item = Item::new_local(category, Vec::new(), true);
        item.title = title.to_string();
        Self { item }
    }

    fn html(mut self, name: &str, html: &str) -> Self {
        if let Some(field) = self.field(name) {
            field.value = FieldValue::RichText(html.to_string());
        }
        self
    }

    fn rows(mut self, name: &str, rows: &[&[&str]]) -> Self {
        if let Some(Field {
            value: FieldValue::Table(table),
            ..
        }) = self.field(name)
        {
            for (index, values) in rows.iter().enumerate() {
                if let Err(e) = table.insert_row(index, values) {
                    log::warn!("Seed row {} of {} rejected: {}", index, name, e);
                }
            }
        }
        self
    }

    fn raw(mut self, name: &str, data: &str) -> Self {
        if let Some(field) = self.field(name) {
            field.value = FieldValue::Raw(Some(data.to_string()));
        }
        self
    }

    fn section_data(mut self, name: &str, data: &str) -> Self {
        if let Some(Field {
            value: FieldValue::Section(section),
            ..
        }) = self.field(name)
        {
            section.data = Some(data.to_string());
        }
        self
    }

    fn labels(mut self, labels: &[&str]) -> Self {
        self.item.labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    fn links(mut self, to: &[&str]) -> Self {
        self.item.downlinks = to.iter().map(|id| Link::to(*id)).collect();
        self
    }

    fn field(&mut self, name: &str) -> Option<&mut Field> {
        self.item.fields.iter_mut().find(|f| f.name == name)
    }

    fn build(self) -> Item {
        self.item
    }
}

fn seed_items(project: &mut ProjectState) {
    let config = demo_config();
    let c = &config;

    for (id, category, title) in [
        ("F-UC-1", "UC", "Use Cases"),
        ("F-REQ-1", "REQ", "Requirements"),
        ("F-SPEC-1", "SPEC", "Specifications"),
        ("F-TC-1", "TC", "Test Cases"),
        ("F-XTC-1", "XTC", "Test Runs"),
        ("F-DOC-1", "DOC", "Documents"),
    ] {
        project.seed("", id, Seed::folder(category, title).build());
    }

    project.seed(
        "F-UC-1",
        "UC-1",
        Seed::item(c, "UC", "Open the fridge")
            .html("Description", "The user opens the fridge door.")
            .rows(
                "Use Case Steps",
                &[&["Walk to kitchen", "In kitchen"], &["Pull the handle", "Door opens"]],
            )
            .links(&["REQ-1"])
            .build(),
    );
    project.seed(
        "F-UC-1",
        "UC-2",
        Seed::item(c, "UC", "Pour a glass of milk")
            .html("Description", "The user pours cold milk.")
            .links(&["REQ-2"])
            .build(),
    );

    project.seed(
        "F-REQ-1",
        "REQ-1",
        Seed::item(c, "REQ", "Door opens with one hand")
            .html("Description", "The door <b>shall</b> open with a single hand.")
            .links(&["SPEC-1"])
            .build(),
    );
    project.seed(
        "F-REQ-1",
        "REQ-2",
        Seed::item(c, "REQ", "Milk stays cold")
            .html("Description", "Stored milk <b>shall</b> stay below 5&deg;C.")
            .labels(&["DAYTIME"])
            .links(&["SPEC-2"])
            .build(),
    );
    project.seed(
        "F-REQ-1",
        "REQ-3",
        Seed::item(c, "REQ", "Light turns on when opened")
            .html("Description", "The interior light <b>shall</b> turn on.")
            .build(),
    );

    project.seed(
        "F-SPEC-1",
        "SPEC-1",
        Seed::item(c, "SPEC", "Door hinge torque")
            .html("Description", "Hinge torque below 2 Nm.")
            .links(&["TC-1"])
            .build(),
    );
    project.seed(
        "F-SPEC-1",
        "SPEC-2",
        Seed::item(c, "SPEC", "Compressor duty cycle")
            .html("Description", "Compressor runs at most 60% of the time.")
            .raw("Files", r#"[{"fileName":"duty-cycle.csv","fileId":"1?key=key-0000000000000000"}]"#)
            .links(&["TC-2"])
            .build(),
    );
    project.seed(
        "F-SPEC-1",
        "SPEC-3",
        Seed::item(c, "SPEC", "Interior light placement")
            .html("Description", "Light sits above the top shelf.")
            .build(),
    );

    project.seed(
        "F-TC-1",
        "TC-1",
        Seed::item(c, "TC", "Measure hinge torque")
            .html("Description", "Use a torque gauge on the handle.")
            .rows(
                "Test Case Steps",
                &[&["Attach gauge", "Gauge reads zero"], &["Open door", "Reading below 2 Nm"]],
            )
            .labels(&["NIGHTTIME"])
            .build(),
    );
    project.seed(
        "F-TC-1",
        "TC-2",
        Seed::item(c, "TC", "Log compressor cycles")
            .html("Description", "Record the compressor for 24 hours.")
            .rows("Test Case Steps", &[&["Start logger", "Logger running"]])
            .build(),
    );

    project.seed(
        "F-DOC-1",
        "DOC-8",
        Seed::item(c, "DOC", "Design Specification")
            .section_data(
                "Introduction",
                &json!({ "html": "<p>This document describes the Wheely fridge.</p>" }).to_string(),
            )
            .section_data("Scope", "<p>Door, cooling and lighting.</p>")
            .section_data("Requirements", r#"{"items":["REQ-1","REQ-2","REQ-3"]}"#)
            .build(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_has_recipe_fixtures() {
        let repository = Repository::demo();
        let project = repository.project(DEMO_PROJECT).unwrap();
        for id in ["F-UC-1", "F-TC-1", "F-XTC-1", "SPEC-2", "DOC-8", "UC-1", "UC-2"] {
            assert!(project.item(id).is_some(), "missing {}", id);
        }
        let doc = project.item("DOC-8").unwrap();
        assert_eq!(doc.fields().len(), 4);
    }

    #[test]
    fn test_demo_step_tables_are_complete() {
        let repository = Repository::demo();
        let project = repository.project(DEMO_PROJECT).unwrap();
        for (id, field, rows) in [
            ("UC-1", "Use Case Steps", 2),
            ("TC-1", "Test Case Steps", 2),
            ("TC-2", "Test Case Steps", 1),
        ] {
            let table = project.item(id).unwrap().table_value(field).unwrap();
            assert_eq!(table.row_count(), rows, "{} {}", id, field);
            assert!(table.column_data(rows - 1, "action").is_some_and(|a| !a.is_empty()));
        }
    }

    #[test]
    fn test_demo_config_relationships() {
        let config = demo_config();
        assert_eq!(config.categories(), vec!["UC", "REQ", "SPEC", "TC", "XTC", "DOC"]);
        assert_eq!(config.item_configuration("SPEC").unwrap().downlinks_required, vec!["TC"]);
    }
}
