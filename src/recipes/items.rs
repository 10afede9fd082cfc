//! Creating items, editing labels and rewiring downlinks.

use super::{pick, unique_title};
use crate::client::Project;
use eyre::{Context, Result, ensure, eyre};
use serde::Serialize;

const UC_FOLDER: &str = "F-UC-1";
const STEPS_FIELD: &str = "Use Case Steps";
const DESCRIPTION_FIELD: &str = "Description";

/// The result of `create_use_case`.
#[derive(Debug, Clone, Serialize)]
pub struct UseCaseReport {
    pub id: String,
    pub title: String,
    /// Field id of the first steps column
    pub column: String,
    /// Third step as stored on the server
    pub third_step: String,
    pub deleted: bool,
}

/// Create a use case with three steps, then rewrite the third.
///
/// Without `cleanup` the rewrite happens before the first save and the item
/// stays on the server. With `cleanup` the item is saved, the step is
/// changed through an update, verified, and the item deleted.
pub fn create_use_case(project: &Project<'_>, cleanup: bool) -> Result<UseCaseReport> {
    let mut uc = project.create_item("UC")?;
    let title = unique_title("Test");
    uc.set_title(title.as_str());
    uc.rich_text(DESCRIPTION_FIELD)?.set_html("This is a test");

    let column = {
        let mut steps = uc.table(STEPS_FIELD)?;
        steps.insert_row(0, &["Open fridge", "Fridge door opens"])?;
        steps.insert_row(1, &["Get milk", "Milk is in hand"])?;
        steps.insert_row(2, &["Drink milk", "Milk is gone"])?;
        let column = steps
            .column_number_to_field_id(0)
            .ok_or_else(|| eyre!("{} has no columns", STEPS_FIELD))?;
        if !cleanup {
            steps.set_column_data(2, &column, "Throw milk away")?;
        }
        column
    };

    project.session().set_comment("Saving our first Item");
    let mut uc = project.put_item(UC_FOLDER, &uc).context("Failed to save use case")?;
    let id = uc.id().ok_or_else(|| eyre!("server returned an item without id"))?.to_string();
    log::info!("Created {}", id);

    if cleanup {
        // The saved copy is a new snapshot; take a fresh handler from it
        uc.table(STEPS_FIELD)?.set_column_data(2, &column, "Throw milk away")?;
        uc = project.update_item(&uc).context("Failed to update use case")?;
        log::info!("Updated {}", id);
    }

    let third_step = uc
        .table_value(STEPS_FIELD)?
        .column_data(2, &column)
        .unwrap_or_default()
        .to_string();
    ensure!(
        third_step == "Throw milk away",
        "{} step 3 is '{}' after save",
        id,
        third_step
    );

    if cleanup {
        project.delete_item(&id).context("Failed to delete use case")?;
        log::info!("Deleted {}", id);
    }

    Ok(UseCaseReport {
        id,
        title,
        column,
        third_step,
        deleted: cleanup,
    })
}

/// Create a use case whose description will later hold an image.
pub fn add_attachment(project: &Project<'_>) -> Result<String> {
    let mut uc = project.create_item("UC")?;
    uc.set_title(unique_title("Test"));
    uc.rich_text(DESCRIPTION_FIELD)?
        .set_html("We'll put an <b>image</b> here.");

    project.session().set_comment("Creating attachment");
    let uc = project.put_item(UC_FOLDER, &uc)?;
    uc.id()
        .map(String::from)
        .ok_or_else(|| eyre!("server returned an item without id"))
}

/// Labels after one step of `walk_labels`.
#[derive(Debug, Clone, Serialize)]
pub struct LabelStep {
    pub message: String,
    pub labels: Vec<String>,
}

/// The result of `walk_labels`.
#[derive(Debug, Clone, Serialize)]
pub struct LabelWalk {
    pub id: String,
    pub steps: Vec<LabelStep>,
    /// True when local edits were left unsaved
    pub needs_save: bool,
}

/// Walk a random test case through a series of local label edits.
///
/// Nothing is saved: the item is reported dirty and dropped.
pub fn walk_labels(project: &Project<'_>) -> Result<LabelWalk> {
    let tcs = project.search_for_items("mrql:category=TC")?;
    let mut tc = pick(&tcs).cloned().ok_or_else(|| eyre!("no TC items found"))?;
    let id = tc.id().unwrap_or_default().to_string();

    project.session().set_comment("Changing labels");
    let mut steps = Vec::new();
    let mut record = |message: &str, labels: &[String]| {
        steps.push(LabelStep {
            message: message.to_string(),
            labels: labels.to_vec(),
        });
    };

    record("Initial state", tc.labels());
    tc.set_label("DAYTIME")?;
    record("After set of DAYTIME", tc.labels());
    tc.set_label("NIGHTTIME")?;
    record("After set of NIGHTTIME", tc.labels());
    tc.set_label("APPLE")?.set_label("ORANGE")?;
    record("After set of APPLE and ORANGE", tc.labels());
    tc.unset_label("DAYTIME")?;
    record("After unset of DAYTIME", tc.labels());
    tc.set_labels(Vec::<String>::new())?;
    record("Labels set to empty", tc.labels());

    let needs_save = tc.needs_save();
    if needs_save {
        log::info!("{} is dirty, not saving to the server", id);
    }
    Ok(LabelWalk { id, steps, needs_save })
}

/// The result of `swap_downlink`.
#[derive(Debug, Clone, Serialize)]
pub struct DownlinkSwap {
    pub id: String,
    /// The downlink that was removed and restored
    pub link: String,
    /// Items matching the query at the start
    pub candidates: usize,
}

/// Remove a spec's test case link, check the search no longer finds it, then
/// put the link back and check it is found again.
pub fn swap_downlink(project: &Project<'_>) -> Result<DownlinkSwap> {
    const QUERY: &str = "mrql:category=SPEC and downLink=TC";

    project.session().set_comment("Changing for a test");
    let mask = project.construct_search_field_mask().with_downlinks(true);
    let search = || project.search(QUERY).mask(mask).items();

    let specs = search()?;
    let mut spec = pick(&specs)
        .cloned()
        .ok_or_else(|| eyre!("no SPEC items with TC downlinks"))?;
    let id = spec.id().unwrap_or_default().to_string();
    log::info!(
        "Found {} SPEC items that have TC downlinks, chose {}",
        specs.len(),
        id
    );

    // Copy the links out; the item is about to change
    let old_links = spec.downlinks().to_vec();
    let link = old_links
        .first()
        .map(|l| l.to.clone())
        .ok_or_else(|| eyre!("{} has no downlinks", id))?;

    spec.remove_downlink(&link)?;
    let mut spec = project.update_item(&spec)?;
    let found = search()?.iter().filter(|item| item.id() == Some(id.as_str())).count();
    ensure!(found == 0, "{} still matches after unlinking {}", id, link);

    spec.add_downlink(&link)?;
    project.update_item(&spec)?;
    let found = search()?.iter().filter(|item| item.id() == Some(id.as_str())).count();
    ensure!(found == 1, "{} does not match after relinking {}", id, link);

    Ok(DownlinkSwap {
        id,
        link,
        candidates: specs.len(),
    })
}
