//! Server settings, schema, todos and the fetch log.

use crate::client::{Project, Session};
use crate::types::{ItemConfig, Todo, TodoQuery};
use chrono::Utc;
use eyre::{Context, Result, ensure};
use serde::Serialize;
use serde_json::{Value, json};

const FAVORITES_KEY: &str = "favorites";

/// Graphviz digraph of the categories' required downlinks.
pub fn relationship_graph(config: &ItemConfig) -> String {
    let edges: Vec<String> = config
        .categories()
        .into_iter()
        .filter_map(|category| config.item_configuration(category))
        .filter(|c| !c.downlinks_required.is_empty())
        .map(|c| format!("  {} -> {}", c.category, c.downlinks_required.join(",")))
        .collect();
    format!("digraph {{\n{}\n rankdir=\"LR\";\n}}", edges.join("\n"))
}

/// The result of `favorites`.
#[derive(Debug, Clone, Serialize)]
pub struct Favorites {
    /// False when this run stored the defaults
    pub existing: bool,
    pub value: Value,
}

/// Read the `favorites` server setting, storing defaults if it is missing.
pub fn favorites(session: &Session) -> Result<Favorites> {
    let settings = session.server_settings()?;
    if let Some(stored) = settings.get(FAVORITES_KEY) {
        log::info!("Found existing favorites");
        let value = serde_json::from_str(stored).context("Stored favorites are not JSON")?;
        return Ok(Favorites { existing: true, value });
    }

    let value = json!({
        "car": "Mustang",
        "food": "Tacos",
        "music": "Post-rock",
    });
    session.put_server_setting(FAVORITES_KEY, &value.to_string())?;
    log::info!("Saved favorites");
    Ok(Favorites { existing: false, value })
}

/// The result of `notify`.
#[derive(Debug, Clone, Serialize)]
pub struct NotifyReport {
    pub created: Vec<u64>,
    pub todos: Vec<Todo>,
}

/// Attach notifications to the first two use cases and list every user's todos.
pub fn notify(project: &Project<'_>) -> Result<NotifyReport> {
    let ucs = project.search_for_items("mrql:category=UC")?;
    ensure!(ucs.len() >= 2, "need two UC items, found {}", ucs.len());

    let text = "Here is a notification";
    let first = project.create_todo(&ucs[0], &["mike"], "user", text, Some(Utc::now()))?;
    let second = project.create_todo(&ucs[1], &["francois"], "user", text, Some(Utc::now()))?;
    log::info!("Created todos {}, {}", first, second);

    let todos = project.get_todos(&TodoQuery::new().all_users(true))?;
    Ok(NotifyReport {
        created: vec![first, second],
        todos,
    })
}

/// Run one search and return the session's fetch log.
pub fn fetch_log(project: &Project<'_>) -> Result<Vec<String>> {
    project.search_for_items("mrql:category=REQ or category=UC")?;
    Ok(project.session().fetch_log())
}
