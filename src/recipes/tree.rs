//! Project tree walks and bulk execution.

use super::unique_title;
use crate::client::Project;
use crate::types::{ExecuteParam, ExecuteResult, FolderNode};
use eyre::{Result, ensure, eyre};
use serde::Serialize;

const TC_FOLDER: &str = "F-TC-1";
const XTC_FOLDER: &str = "F-XTC-1";
const RESULTS_FOLDER_TITLE: &str = "Test Results";

/// Every leaf of the project tree as a slash-separated path.
pub fn tree_paths(project: &Project<'_>) -> Result<Vec<String>> {
    let tree = project.get_project_tree()?;
    Ok(folder_paths(&tree))
}

/// Paths of the items in `folder` and below. An empty folder yields its own
/// path.
pub fn folder_paths(folder: &FolderNode) -> Vec<String> {
    if folder.item_children().is_empty() && folder.folder_children().is_empty() {
        return vec![folder.path().to_string()];
    }

    let mut paths: Vec<String> = folder
        .item_children()
        .iter()
        .map(|item| format!("{}/{}", folder.path(), item.title))
        .collect();
    for child in folder.folder_children() {
        paths.extend(folder_paths(child));
    }
    paths
}

/// The ID of the folder titled `name` directly inside `parent`, creating it
/// as a `category` folder if missing.
pub fn get_or_create_output_folder(project: &Project<'_>, category: &str, parent: &str, name: &str) -> Result<String> {
    let tree = project.get_project_tree()?;
    let parent_node = tree
        .find_folder(parent)
        .ok_or_else(|| eyre!("folder {} not found", parent))?;
    if let Some(existing) = parent_node.find_direct_folder_by_title(name) {
        return Ok(existing.id().to_string());
    }

    let mut folder = project.create_folder(category)?;
    folder.set_title(name);
    let folder = project.put_item(parent, &folder)?;
    folder
        .id()
        .map(String::from)
        .ok_or_else(|| eyre!("server returned a folder without id"))
}

/// The result of `execute_test_cases`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteReport {
    pub param: ExecuteParam,
    pub result: ExecuteResult,
}

/// Turn every test case under the TC root folder into execution records.
pub fn execute_test_cases(project: &Project<'_>) -> Result<ExecuteReport> {
    project.session().set_comment("Creating XTCs");
    let tree = project.get_project_tree()?;
    let tc_folder = tree
        .find_folder(TC_FOLDER)
        .ok_or_else(|| eyre!("folder {} not found", TC_FOLDER))?;
    ensure!(
        !tc_folder.item_children().is_empty(),
        "{} has no test cases",
        TC_FOLDER
    );

    let mut param = project.create_execute_param_with_defaults(&[TC_FOLDER], "XTC", &unique_title("Create XTCs"))?;
    param.parent_folder = get_or_create_output_folder(project, "XTC", XTC_FOLDER, RESULTS_FOLDER_TITLE)?;
    let result = project.execute(&param)?;
    Ok(ExecuteReport { param, result })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TreeItem;

    #[test]
    fn test_folder_paths() {
        let mut root = FolderNode::new("", "WHEELY");
        let mut tcs = FolderNode::new("F-TC-1", "Tests");
        tcs.items.push(TreeItem {
            id: "TC-1".to_string(),
            title: "Hinge".to_string(),
        });
        root.folders.push(tcs);
        root.folders.push(FolderNode::new("F-XTC-1", "Runs"));
        root.assign_paths(None);

        assert_eq!(folder_paths(&root), vec!["WHEELY/Tests/Hinge", "WHEELY/Runs"]);
    }
}
