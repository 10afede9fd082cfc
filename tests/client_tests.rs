//! Integration tests for the client against a loopback server.

mod common;

use common::{TestEnv, put_requirement};
use mreq::loopback::DEMO_PROJECT;
use mreq::{ClientError, ConnectionConfig, FieldMask, Session, TodoQuery, UploadProgress};

// =============================================================================
// Sessions
// =============================================================================

#[test]
fn test_login_with_bad_token_fails() {
    let env = TestEnv::new();
    let mut config = env.config();
    config.token = "wrong".to_string();

    let result = Session::connect(&config);
    assert!(matches!(result, Err(ClientError::Auth(_))));
}

#[test]
fn test_connect_to_closed_port_is_transport_error() {
    let config = ConnectionConfig::new("127.0.0.1:1", "demo", "demo");
    let err = Session::connect(&config).err().expect("connect should fail");
    assert!(err.is_retryable());
}

#[test]
fn test_projects_and_ping() {
    let env = TestEnv::new();
    env.session.ping().unwrap();
    assert_eq!(env.session.projects().unwrap(), vec![DEMO_PROJECT.to_string()]);
}

#[test]
fn test_open_unknown_project() {
    let env = TestEnv::new();
    let result = env.session.open_project("NOPE");
    assert!(matches!(result, Err(ClientError::NotFound(_))));
}

// =============================================================================
// Item lifecycle
// =============================================================================

#[test]
fn test_put_then_get_round_trip() {
    let env = TestEnv::new();
    let project = env.project();

    let mut req = project.create_item("REQ").unwrap();
    req.set_title("Door closes by itself").set_label("DAYTIME").unwrap();
    req.rich_text("Description").unwrap().set_html("<p>Gently</p>");
    let saved = project.put_item("F-REQ-1", &req).unwrap();

    let id = saved.id().unwrap().to_string();
    assert!(id.starts_with("REQ-"));
    assert_eq!(saved.revision(), 1);
    assert!(!saved.needs_save());

    let fetched = project.get_item(&id).unwrap();
    assert_eq!(fetched.title(), "Door closes by itself");
    assert_eq!(fetched.labels(), ["DAYTIME".to_string()]);
    assert_eq!(fetched.html_value("Description").unwrap(), "<p>Gently</p>");
    assert!(fetched.created_at().is_some());
}

#[test]
fn test_put_rejects_persisted_item() {
    let env = TestEnv::new();
    let project = env.project();

    let existing = project.get_item("REQ-1").unwrap();
    let result = project.put_item("F-REQ-1", &existing);
    assert!(matches!(result, Err(ClientError::Validation(_))));
}

#[test]
fn test_put_requires_title() {
    let env = TestEnv::new();
    let project = env.project();

    let req = project.create_item("REQ").unwrap();
    let result = project.put_item("F-REQ-1", &req);
    assert!(matches!(result, Err(ClientError::Validation(_))));
    assert!(env.server_item("REQ-4").is_none());
}

#[test]
fn test_create_item_unknown_category() {
    let env = TestEnv::new();
    let project = env.project();

    let result = project.create_item("RISK");
    assert!(matches!(result, Err(ClientError::InvalidCategory(_))));
}

#[test]
fn test_put_into_other_category_folder_is_rejected() {
    let env = TestEnv::new();
    let project = env.project();

    let mut req = project.create_item("REQ").unwrap();
    req.set_title("Misplaced");
    let result = project.put_item("F-UC-1", &req);
    assert!(matches!(result, Err(ClientError::Rejected(_))));
}

#[test]
fn test_get_missing_item() {
    let env = TestEnv::new();
    let project = env.project();

    assert!(matches!(project.get_item("REQ-999"), Err(ClientError::NotFound(_))));
    assert!(matches!(project.delete_item("REQ-999"), Err(ClientError::NotFound(_))));
}

#[test]
fn test_update_with_stale_revision_conflicts() {
    let env = TestEnv::new();
    let project = env.project();

    let mut first = project.get_item("REQ-3").unwrap();
    let mut second = project.get_item("REQ-3").unwrap();

    first.set_title("Light turns on instantly");
    let updated = project.update_item(&first).unwrap();
    assert_eq!(updated.revision(), first.revision() + 1);

    second.set_title("Light turns on eventually");
    let result = project.update_item(&second);
    assert!(matches!(result, Err(ClientError::Conflict(_))));
    assert_eq!(env.server_item("REQ-3").unwrap().title(), "Light turns on instantly");
}

#[test]
fn test_label_edit_needs_loaded_labels() {
    let env = TestEnv::new();
    let project = env.project();

    let mask = FieldMask::search_default().with_labels(false);
    let mut items = project.search("mrql:id=REQ-1").mask(mask).items().unwrap();
    let req = &mut items[0];
    assert!(matches!(req.set_label("APPLE"), Err(ClientError::NotLoaded("labels"))));
    assert!(!req.needs_save());

    let mut full = project.get_item("REQ-1").unwrap();
    full.set_label("APPLE").unwrap();
    project.update_item(&full).unwrap();
    assert_eq!(project.get_item("REQ-1").unwrap().labels(), ["APPLE".to_string()]);
}

#[test]
fn test_delete_then_get_fails() {
    let env = TestEnv::new();
    let project = env.project();

    let req = put_requirement(&project, "Short lived");
    let id = req.id().unwrap();
    project.delete_item(id).unwrap();

    assert!(matches!(project.get_item(id), Err(ClientError::NotFound(_))));
}

// =============================================================================
// Search
// =============================================================================

#[test]
fn test_search_sees_earlier_writes() {
    let env = TestEnv::new();
    let project = env.project();

    let req = put_requirement(&project, "Shelves are adjustable");
    let ids = project.search_for_ids("mrql:category=REQ").unwrap();
    assert_eq!(ids.last().map(String::as_str), req.id());

    let found = project.search_for_items("adjustable").unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), req.id());
}

#[test]
fn test_search_orders_ids_numerically() {
    let env = TestEnv::new();
    let project = env.project();

    for n in 0..8 {
        put_requirement(&project, &format!("Filler {}", n));
    }
    let ids = project.search_for_ids("mrql:category=REQ").unwrap();
    let numbers: Vec<u32> = ids
        .iter()
        .map(|id| id.trim_start_matches("REQ-").parse().unwrap())
        .collect();
    let mut sorted = numbers.clone();
    sorted.sort();
    assert_eq!(numbers, sorted);
    assert_eq!(ids.len(), 11);
}

#[test]
fn test_search_default_mask_omits_downlinks() {
    let env = TestEnv::new();
    let project = env.project();

    let mut items = project.search_for_items("mrql:id=SPEC-1").unwrap();
    assert_eq!(items.len(), 1);
    let spec = &mut items[0];
    assert!(!spec.loaded().downlinks);
    assert!(matches!(spec.add_downlink("TC-2"), Err(ClientError::NotLoaded(_))));

    let mask = FieldMask::search_default().with_downlinks(true);
    let items = project.search("mrql:id=SPEC-1").mask(mask).items().unwrap();
    assert!(items[0].has_downlink("TC-1"));
}

#[test]
fn test_search_with_label_filter() {
    let env = TestEnv::new();
    let project = env.project();

    let ids = project.search("mrql:category=REQ").filter("DAYTIME").ids().unwrap();
    assert_eq!(ids, vec!["REQ-2".to_string()]);

    let ids = project.search("mrql:category=REQ").filter("!DAYTIME").ids().unwrap();
    assert_eq!(ids, vec!["REQ-1".to_string(), "REQ-3".to_string()]);
}

#[test]
fn test_search_bad_query() {
    let env = TestEnv::new();
    let project = env.project();

    let result = project.search_for_ids("mrql:category=");
    assert!(matches!(result, Err(ClientError::Query(_))));
    let result = project.search_for_ids("mrql:colour=red");
    assert!(matches!(result, Err(ClientError::Query(_))));
}

#[test]
fn test_search_deeply_nested_query() {
    let env = TestEnv::new();
    let project = env.project();

    let deep = format!("mrql:{}category=REQ{}", "(".repeat(50_000), ")".repeat(50_000));
    let result = project.search_for_ids(&deep);
    assert!(matches!(result, Err(ClientError::Query(ref m)) if m.contains("nested too deeply")));

    // The server is still answering
    assert_eq!(project.search_for_ids("mrql:category=REQ").unwrap().len(), 3);
}

// =============================================================================
// Tree, execute, documents
// =============================================================================

#[test]
fn test_project_tree_paths() {
    let env = TestEnv::new();
    let project = env.project();

    let tree = project.get_project_tree().unwrap();
    assert_eq!(tree.path(), DEMO_PROJECT);

    let tcs = tree.find_folder("F-TC-1").unwrap();
    assert_eq!(tcs.path(), format!("{}/Test Cases", DEMO_PROJECT));
    assert_eq!(tcs.item_children().len(), 2);
    assert!(tree.find_direct_folder_by_title("Test Cases").is_some());
    assert!(tcs.find_direct_folder_by_title("Test Cases").is_none());
}

#[test]
fn test_execute_creates_linked_items() {
    let env = TestEnv::new();
    let project = env.project();

    let param = project
        .create_execute_param_with_defaults(&["F-TC-1"], "XTC", "Run 1")
        .unwrap();
    assert_eq!(param.parent_folder, "F-XTC-1");

    let result = project.execute(&param).unwrap();
    assert_eq!(result.created.len(), 2);

    let folder = env.server_item(&result.folder).unwrap();
    assert!(folder.is_folder());
    assert_eq!(folder.title(), "Run 1");

    let tc = project.get_item("TC-1").unwrap();
    assert!(result.created.iter().any(|id| tc.has_downlink(id)));
}

#[test]
fn test_execute_into_wrong_folder_creates_nothing() {
    let env = TestEnv::new();
    let project = env.project();

    let mut param = project
        .create_execute_param_with_defaults(&["F-TC-1"], "XTC", "Run 1")
        .unwrap();
    param.parent_folder = "F-TC-1".to_string();

    assert!(project.execute(&param).is_err());
    assert!(project.search_for_ids("mrql:category=XTC").unwrap().is_empty());
}

#[test]
fn test_document_sections() {
    let env = TestEnv::new();
    let project = env.project();

    let doc = project.get_item_as_doc("DOC-8").unwrap();
    let sections = doc.inner_dhf_fields();
    let names: Vec<&str> = sections.iter().map(|s| s.field_name()).collect();
    assert_eq!(names, vec!["Introduction", "Scope", "Requirements", "Signatures"]);
    assert_eq!(sections[2].field_type(), "items");
    assert_eq!(sections[2].config()["folder"], "F-REQ-1");
}

#[test]
fn test_render_pdf_reports_progress_then_downloads() {
    let env = TestEnv::new();
    let project = env.project();

    let doc = project.get_item_as_doc("DOC-8").unwrap();
    let mut seen = Vec::new();
    let url = project.to_pdf(&doc, |_, progress| seen.push(progress.progress)).unwrap();

    assert_eq!(seen, vec![25, 50, 75, 100]);
    assert!(url.ends_with("/1"));
    assert!(url.starts_with("http://"));

    let job = project.render_pdf(&doc).unwrap();
    let job_id = job.job_id();
    job.wait().unwrap();
    let bytes = project.download_job_result(job_id, 1).unwrap();
    assert!(bytes.starts_with(b"%PDF"));
}

// =============================================================================
// Files, todos, settings, audit
// =============================================================================

#[test]
fn test_upload_reports_each_chunk() {
    let env = TestEnv::new();
    let project = env.project();

    let contents: Vec<u8> = (0..150_000u32).map(|n| (n % 251) as u8).collect();
    let mut chunks = Vec::new();
    let mut on_chunk = |progress: &UploadProgress| chunks.push(progress.sent);
    let ack = project
        .upload_local_file(contents.as_slice(), "blob.bin", Some(&mut on_chunk))
        .unwrap();

    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks.last().copied(), Some(150_000));
    assert_eq!(ack.size, 150_000);

    let (name, stored) = env.server_file(ack.file_id).unwrap();
    assert_eq!(name, "blob.bin");
    assert_eq!(stored, contents);

    let url = project.compute_file_url(&ack);
    assert!(url.ends_with(&format!("/rest/1/{}/file/{}?key={}", DEMO_PROJECT, ack.file_id, ack.key)));
}

#[test]
fn test_todos_visible_to_assignee_only() {
    let env = TestEnv::new();
    let project = env.project();

    let uc = project.get_item("UC-1").unwrap();
    project.create_todo(&uc, &["mike"], "user", "Look at this", None).unwrap();
    project.create_todo(&uc, &["demo"], "user", "And this", None).unwrap();

    let mine = project.get_todos(&TodoQuery::new()).unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].text, "And this");

    let everyone = project.get_todos(&TodoQuery::new().all_users(true).item("UC-1")).unwrap();
    assert_eq!(everyone.len(), 2);
}

#[test]
fn test_todo_on_unsaved_item_fails() {
    let env = TestEnv::new();
    let project = env.project();

    let uc = project.create_item("UC").unwrap();
    let result = project.create_todo(&uc, &["mike"], "user", "Nope", None);
    assert!(matches!(result, Err(ClientError::Validation(_))));
}

#[test]
fn test_server_settings_round_trip() {
    let env = TestEnv::new();

    assert!(env.session.server_settings().unwrap().get("color").is_none());
    env.session.put_server_setting("color", "blue").unwrap();
    env.session.put_server_setting("color", "green").unwrap();

    let settings = env.session.server_settings().unwrap();
    assert_eq!(settings.get("color"), Some("green"));
    assert_eq!(settings.setting_list.len(), 1);
}

#[test]
fn test_comment_travels_with_mutations() {
    let env = TestEnv::new();
    let project = env.project();

    env.session.set_comment("Adding filler");
    put_requirement(&project, "Filler");
    project.get_item("REQ-1").unwrap();

    let audit = env.audit_reasons();
    assert_eq!(audit, vec![("put_item".to_string(), Some("Adding filler".to_string()))]);
}

#[test]
fn test_fetch_log_lists_requests() {
    let env = TestEnv::new();
    let project = env.project();

    project.search_for_ids("mrql:category=UC").unwrap();
    project.get_item("UC-1").unwrap();

    let log = env.session.fetch_log();
    assert_eq!(
        log,
        vec![
            "- login".to_string(),
            format!("{} open_project", DEMO_PROJECT),
            format!("{} search_ids mrql:category=UC", DEMO_PROJECT),
            format!("{} get_item UC-1", DEMO_PROJECT),
        ]
    );
}
