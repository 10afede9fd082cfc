//! Client for a requirements-management server.
//!
//! A [`Session`] is one authenticated connection. [`Session::open_project`]
//! returns a [`Project`] handle that borrows the session; all item, search,
//! tree, document, upload and todo operations go through it.

use crate::config::ConnectionConfig;
use crate::error::{ClientError, Result};
use crate::handlers::Document;
use crate::id::finish_hex;
use crate::protocol::{Envelope, Request, Response};
use crate::transport::{TcpTransport, Transport};
use crate::types::{
    ExecuteParam, ExecuteResult, FieldMask, FileAck, FolderNode, Item, ItemConfig, JobProgress, ServerSettings, Todo,
    TodoQuery, UploadProgress, ValidationError,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::cell::RefCell;
use std::io::Read;
use std::thread;
use std::time::Duration;

/// Upload chunk size in bytes.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// An authenticated connection to one server.
pub struct Session {
    transport: RefCell<Box<dyn Transport>>,
    token: String,
    user: String,
    base_url: String,
    poll_interval: Duration,
    comment: RefCell<Option<String>>,
    fetch_log: RefCell<Vec<String>>,
}

impl Session {
    /// Connect over TCP and log in.
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        let transport = TcpTransport::connect(&config.server, config.timeout())?;
        Self::with_transport(Box::new(transport), config)
    }

    /// Log in over an already established transport.
    pub fn with_transport(transport: Box<dyn Transport>, config: &ConnectionConfig) -> Result<Self> {
        let mut session = Self {
            transport: RefCell::new(transport),
            token: String::new(),
            user: config.user.clone(),
            base_url: config.base_url(),
            poll_interval: config.poll_interval(),
            comment: RefCell::new(None),
            fetch_log: RefCell::new(Vec::new()),
        };

        let response = session.send(
            None,
            Request::Login {
                user: config.user.clone(),
                token: config.token.clone(),
            },
        )?;

        match response {
            Response::Session { token } => session.token = token,
            _ => return Err(ClientError::UnexpectedResponse("login")),
        }

        log::info!("Logged in to {} as {}", session.base_url, session.user);
        Ok(session)
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Attach an audit comment to every mutating request sent from now on.
    pub fn set_comment(&self, text: impl Into<String>) {
        *self.comment.borrow_mut() = Some(text.into());
    }

    pub fn comment(&self) -> Option<String> {
        self.comment.borrow().clone()
    }

    /// One line per request sent on this session, oldest first.
    pub fn fetch_log(&self) -> Vec<String> {
        self.fetch_log.borrow().clone()
    }

    /// Send a request and receive a response.
    fn send(&self, project: Option<&str>, request: Request) -> Result<Response> {
        let reason = if request.is_mutating() {
            self.comment.borrow().clone()
        } else {
            None
        };

        let line = match request.subject() {
            Some(subject) => format!("{} {} {}", project.unwrap_or("-"), request.name(), subject),
            None => format!("{} {}", project.unwrap_or("-"), request.name()),
        };
        log::debug!("-> {}", line);
        self.fetch_log.borrow_mut().push(line);

        let envelope = Envelope {
            token: (!self.token.is_empty()).then(|| self.token.clone()),
            project: project.map(String::from),
            reason,
            request,
        };

        let response = self.transport.borrow_mut().exchange(&envelope)?;
        match response {
            Response::Error { code, message } => {
                log::debug!("<- error {:?}: {}", code, message);
                Err(ClientError::from_code(code, message))
            }
            response => Ok(response),
        }
    }

    /// List the projects this session can open.
    pub fn projects(&self) -> Result<Vec<String>> {
        match self.send(None, Request::ListProjects)? {
            Response::Projects { projects } => Ok(projects),
            _ => Err(ClientError::UnexpectedResponse("list_projects")),
        }
    }

    /// Open a project by name and load its schema.
    pub fn open_project(&self, name: &str) -> Result<Project<'_>> {
        match self.send(Some(name), Request::OpenProject)? {
            Response::Config { config } => {
                log::info!("Opened project {} ({} categories)", name, config.categories.len());
                Ok(Project {
                    session: self,
                    name: name.to_string(),
                    config,
                })
            }
            _ => Err(ClientError::UnexpectedResponse("open_project")),
        }
    }

    pub fn server_settings(&self) -> Result<ServerSettings> {
        match self.send(None, Request::ServerSettings)? {
            Response::Settings { settings } => Ok(settings),
            _ => Err(ClientError::UnexpectedResponse("server_settings")),
        }
    }

    pub fn put_server_setting(&self, key: &str, value: &str) -> Result<()> {
        let request = Request::PutServerSetting {
            key: key.to_string(),
            value: value.to_string(),
        };
        match self.send(None, request)? {
            Response::Ok => Ok(()),
            _ => Err(ClientError::UnexpectedResponse("put_server_setting")),
        }
    }

    /// Ping the server.
    pub fn ping(&self) -> Result<()> {
        match self.send(None, Request::Ping)? {
            Response::Pong => Ok(()),
            _ => Err(ClientError::UnexpectedResponse("ping")),
        }
    }
}

/// A handle to one project on a session.
pub struct Project<'s> {
    session: &'s Session,
    name: String,
    config: ItemConfig,
}

impl<'s> Project<'s> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session(&self) -> &'s Session {
        self.session
    }

    /// The project schema, loaded when the project was opened.
    pub fn item_config(&self) -> &ItemConfig {
        &self.config
    }

    fn call(&self, request: Request) -> Result<Response> {
        self.session.send(Some(&self.name), request)
    }

    /// Build an unsaved item of `category`. Nothing is sent to the server.
    pub fn create_item(&self, category: &str) -> Result<Item> {
        self.config.new_item(category, false)
    }

    /// Build an unsaved folder of `category`.
    pub fn create_folder(&self, category: &str) -> Result<Item> {
        self.config.new_item(category, true)
    }

    /// Get an item by ID, with all its parts.
    pub fn get_item(&self, id: &str) -> Result<Item> {
        match self.call(Request::GetItem { id: id.to_string() })? {
            Response::Item { item } => Ok(item),
            _ => Err(ClientError::UnexpectedResponse("get_item")),
        }
    }

    /// Create `item` under the folder `parent`. Returns the persisted copy.
    pub fn put_item(&self, parent: &str, item: &Item) -> Result<Item> {
        if let Some(id) = item.id() {
            return Err(ValidationError::AlreadyPersisted(id.to_string()).into());
        }
        item.validate()?;

        let request = Request::PutItem {
            parent: parent.to_string(),
            item: item.clone(),
        };
        match self.call(request)? {
            Response::Item { item } => {
                log::info!("Created {} under {}", item.id().unwrap_or("?"), parent);
                Ok(item)
            }
            _ => Err(ClientError::UnexpectedResponse("put_item")),
        }
    }

    /// Persist changes to an existing item. Returns the refreshed copy.
    ///
    /// Fails with `Conflict` if the item changed on the server since this
    /// snapshot was fetched.
    pub fn update_item(&self, item: &Item) -> Result<Item> {
        if item.id().is_none() {
            return Err(ValidationError::NotPersisted.into());
        }
        item.validate()?;

        match self.call(Request::UpdateItem { item: item.clone() })? {
            Response::Item { item } => Ok(item),
            _ => Err(ClientError::UnexpectedResponse("update_item")),
        }
    }

    pub fn delete_item(&self, id: &str) -> Result<()> {
        match self.call(Request::DeleteItem { id: id.to_string() })? {
            Response::Ok => Ok(()),
            _ => Err(ClientError::UnexpectedResponse("delete_item")),
        }
    }

    /// Start building a search.
    pub fn search(&self, query: &str) -> Search<'_> {
        Search {
            session: self.session,
            project: &self.name,
            query: query.to_string(),
            filter: String::new(),
            tree_order: false,
            mask: FieldMask::search_default(),
        }
    }

    /// Items matching `query`, without downlinks.
    pub fn search_for_items(&self, query: &str) -> Result<Vec<Item>> {
        self.search(query).items()
    }

    /// IDs of items matching `query`.
    pub fn search_for_ids(&self, query: &str) -> Result<Vec<String>> {
        self.search(query).ids()
    }

    /// The default search mask, to be adjusted with its `with_*` methods.
    pub fn construct_search_field_mask(&self) -> FieldMask {
        FieldMask::search_default()
    }

    /// The whole folder tree, with paths filled in.
    pub fn get_project_tree(&self) -> Result<FolderNode> {
        match self.call(Request::ProjectTree)? {
            Response::Tree { mut root } => {
                root.assign_paths(None);
                Ok(root)
            }
            _ => Err(ClientError::UnexpectedResponse("project_tree")),
        }
    }

    /// Parameters for deriving `category` items from `sources`.
    ///
    /// Results land in a new folder titled `name` inside the category's root
    /// folder unless `parent_folder` is changed before calling `execute`.
    pub fn create_execute_param_with_defaults(
        &self,
        sources: &[&str],
        category: &str,
        name: &str,
    ) -> Result<ExecuteParam> {
        if self.config.item_configuration(category).is_none() {
            return Err(ClientError::InvalidCategory(category.to_string()));
        }
        Ok(ExecuteParam {
            sources: sources.iter().map(|s| s.to_string()).collect(),
            category: category.to_string(),
            name: name.to_string(),
            parent_folder: format!("F-{}-1", category),
            link_sources: true,
        })
    }

    /// Run a bulk derivation and wait for it to finish.
    pub fn execute(&self, param: &ExecuteParam) -> Result<ExecuteResult> {
        match self.call(Request::Execute { param: param.clone() })? {
            Response::Executed { result } => {
                log::info!("Execute created {} items in {}", result.created.len(), result.folder);
                Ok(result)
            }
            _ => Err(ClientError::UnexpectedResponse("execute")),
        }
    }

    /// Fetch an item as a document.
    pub fn get_item_as_doc(&self, id: &str) -> Result<Document> {
        Ok(Document::new(self.get_item(id)?))
    }

    /// Start rendering a document. The returned job yields progress events.
    pub fn render_pdf(&self, doc: &Document) -> Result<RenderJob<'_>> {
        let id = doc
            .item()
            .id()
            .ok_or(ClientError::Validation(ValidationError::NotPersisted))?;
        match self.call(Request::RenderPdf { id: id.to_string() })? {
            Response::Job { job_id } => Ok(RenderJob {
                project: self,
                job_id,
                polled: false,
                finished: false,
            }),
            _ => Err(ClientError::UnexpectedResponse("render_pdf")),
        }
    }

    /// Render a document, reporting each progress event to `on_progress`.
    /// Returns the download URL of the primary output.
    pub fn to_pdf<F>(&self, doc: &Document, mut on_progress: F) -> Result<String>
    where
        F: FnMut(u64, &JobProgress),
    {
        let mut job = self.render_pdf(doc)?;
        let mut last = None;
        for progress in &mut job {
            let progress = progress?;
            on_progress(progress.job_id, &progress);
            last = Some(progress);
        }
        self.primary_url(last)
    }

    fn primary_url(&self, last: Option<JobProgress>) -> Result<String> {
        let last = last.ok_or_else(|| ClientError::Job("no progress reported".to_string()))?;
        let file = last
            .job_files
            .first()
            .ok_or_else(|| ClientError::Job(format!("job {} produced no files", last.job_id)))?;
        if file.url.starts_with('/') {
            Ok(format!("{}{}", self.session.base_url, file.url))
        } else {
            Ok(file.url.clone())
        }
    }

    /// Raw bytes of one output file of a finished job.
    pub fn download_job_result(&self, job_id: u64, file_id: u64) -> Result<Vec<u8>> {
        match self.call(Request::DownloadJobFile { job_id, file_id })? {
            Response::Bytes { data } => BASE64
                .decode(data)
                .map_err(|e| ClientError::Transport(format!("invalid file payload: {}", e))),
            _ => Err(ClientError::UnexpectedResponse("download_job_file")),
        }
    }

    /// Stream `reader` to server storage in chunks.
    ///
    /// Returns only once the server has stored the whole file and confirmed
    /// its SHA-256 digest.
    pub fn upload_local_file<R: Read>(
        &self,
        mut reader: R,
        file_name: &str,
        mut progress: Option<&mut dyn FnMut(&UploadProgress)>,
    ) -> Result<FileAck> {
        let upload_id = match self.call(Request::BeginUpload {
            file_name: file_name.to_string(),
        })? {
            Response::Upload { upload_id } => upload_id,
            _ => return Err(ClientError::UnexpectedResponse("begin_upload")),
        };

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; UPLOAD_CHUNK_SIZE];
        let mut sent = 0u64;
        let mut chunks = 0usize;

        loop {
            let read = reader
                .read(&mut buffer)
                .map_err(|e| ClientError::Transport(format!("failed to read {}: {}", file_name, e)))?;
            if read == 0 {
                break;
            }
            let chunk = &buffer[..read];
            hasher.update(chunk);

            let request = Request::UploadChunk {
                upload_id: upload_id.clone(),
                data: BASE64.encode(chunk),
            };
            match self.call(request)? {
                Response::Ok => {}
                _ => return Err(ClientError::UnexpectedResponse("upload_chunk")),
            }

            sent += read as u64;
            chunks += 1;
            if let Some(report) = progress.as_deref_mut() {
                report(&UploadProgress { sent, chunks });
            }
        }

        let request = Request::FinishUpload {
            upload_id,
            sha256: finish_hex(hasher),
        };
        match self.call(request)? {
            Response::File { ack } => {
                log::info!("Uploaded {} ({} bytes) as file {}", ack.file_name, ack.size, ack.file_id);
                Ok(ack)
            }
            _ => Err(ClientError::UnexpectedResponse("finish_upload")),
        }
    }

    /// URL under which an uploaded file can be fetched. Pure; no request.
    pub fn compute_file_url(&self, ack: &FileAck) -> String {
        format!("{}/rest/1/{}/file/{}", self.session.base_url, self.name, ack.reference())
    }

    /// Attach a todo to a persisted item. Returns the todo ID.
    pub fn create_todo(
        &self,
        item: &Item,
        assignees: &[&str],
        kind: &str,
        text: &str,
        due: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        let id = item.id().ok_or(ClientError::Validation(ValidationError::NotPersisted))?;
        let request = Request::CreateTodo {
            item: id.to_string(),
            assignees: assignees.iter().map(|s| s.to_string()).collect(),
            kind: kind.to_string(),
            text: text.to_string(),
            due,
        };
        match self.call(request)? {
            Response::TodoCreated { todo_id } => Ok(todo_id),
            _ => Err(ClientError::UnexpectedResponse("create_todo")),
        }
    }

    pub fn get_todos(&self, query: &TodoQuery) -> Result<Vec<Todo>> {
        match self.call(Request::Todos { query: query.clone() })? {
            Response::Todos { todos } => Ok(todos),
            _ => Err(ClientError::UnexpectedResponse("todos")),
        }
    }
}

/// A search under construction.
pub struct Search<'a> {
    session: &'a Session,
    project: &'a str,
    query: String,
    filter: String,
    tree_order: bool,
    mask: FieldMask,
}

impl Search<'_> {
    /// Restrict results by a label filter expression.
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Return results in tree order instead of server order.
    pub fn tree_order(mut self, tree_order: bool) -> Self {
        self.tree_order = tree_order;
        self
    }

    /// Choose which parts of each item to populate.
    pub fn mask(mut self, mask: FieldMask) -> Self {
        self.mask = mask;
        self
    }

    /// Execute the search and return matching items.
    pub fn items(self) -> Result<Vec<Item>> {
        let request = Request::Search {
            query: self.query,
            filter: self.filter,
            tree_order: self.tree_order,
            mask: self.mask,
        };
        match self.session.send(Some(self.project), request)? {
            Response::Items { items } => Ok(items),
            _ => Err(ClientError::UnexpectedResponse("search")),
        }
    }

    /// Execute the search and return matching IDs.
    pub fn ids(self) -> Result<Vec<String>> {
        let request = Request::SearchIds {
            query: self.query,
            filter: self.filter,
        };
        match self.session.send(Some(self.project), request)? {
            Response::Ids { ids } => Ok(ids),
            _ => Err(ClientError::UnexpectedResponse("search_ids")),
        }
    }
}

/// A running render job, consumed as a sequence of progress events.
///
/// Each `next` polls the server (sleeping the configured poll interval
/// between polls). The sequence ends after the event with progress 100, or
/// after the first error.
pub struct RenderJob<'a> {
    project: &'a Project<'a>,
    job_id: u64,
    polled: bool,
    finished: bool,
}

impl RenderJob<'_> {
    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    fn poll(&self) -> Result<JobProgress> {
        match self.project.call(Request::JobStatus { job_id: self.job_id })? {
            Response::Progress { progress } => Ok(progress),
            _ => Err(ClientError::UnexpectedResponse("job_status")),
        }
    }

    /// Drain the job and return the download URL of its primary output.
    pub fn wait(mut self) -> Result<String> {
        let mut last = None;
        for progress in &mut self {
            last = Some(progress?);
        }
        self.project.primary_url(last)
    }
}

impl Iterator for RenderJob<'_> {
    type Item = Result<JobProgress>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.polled {
            thread::sleep(self.project.session.poll_interval);
        }
        self.polled = true;

        let result = self.poll();
        match &result {
            Ok(progress) if !progress.is_done() => {}
            _ => self.finished = true,
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorCode;
    use crate::types::JobFile;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Replays canned responses and records every envelope it is given.
    struct Scripted {
        responses: VecDeque<Response>,
        sent: Rc<RefCell<Vec<Envelope>>>,
    }

    impl Transport for Scripted {
        fn exchange(&mut self, envelope: &Envelope) -> Result<Response> {
            self.sent.borrow_mut().push(envelope.clone());
            self.responses
                .pop_front()
                .ok_or_else(|| ClientError::Transport("script exhausted".to_string()))
        }
    }

    fn session_with(responses: Vec<Response>) -> (Session, Rc<RefCell<Vec<Envelope>>>) {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let mut all = vec![Response::Session {
            token: "sess-abc".to_string(),
        }];
        all.extend(responses);
        let transport = Scripted {
            responses: all.into(),
            sent: Rc::clone(&sent),
        };
        let config =
            ConnectionConfig::new("reqs.example.com:5150", "alice", "secret").with_poll_interval(Duration::ZERO);
        let session = Session::with_transport(Box::new(transport), &config).unwrap();
        (session, sent)
    }

    fn config_response() -> Response {
        Response::Config {
            config: ItemConfig::default(),
        }
    }

    #[test]
    fn test_login_failure_is_auth_error() {
        let transport = Scripted {
            responses: vec![Response::error(ErrorCode::Auth, "bad token")].into(),
            sent: Rc::new(RefCell::new(Vec::new())),
        };
        let config = ConnectionConfig::new("localhost:1", "alice", "wrong");
        let err = Session::with_transport(Box::new(transport), &config).err().unwrap();
        assert!(matches!(err, ClientError::Auth(_)));
    }

    #[test]
    fn test_comment_only_on_mutating_requests() {
        let (session, sent) = session_with(vec![config_response(), Response::Ok, Response::Ids { ids: vec![] }]);
        let project = session.open_project("WHEELY").unwrap();
        session.set_comment("Cleaning up");
        project.delete_item("UC-3").unwrap();
        project.search_for_ids("mrql:category=UC").unwrap();

        let sent = sent.borrow();
        assert_eq!(sent[2].reason.as_deref(), Some("Cleaning up"));
        assert_eq!(sent[2].token.as_deref(), Some("sess-abc"));
        assert_eq!(sent[3].reason, None);
        assert_eq!(sent[3].project.as_deref(), Some("WHEELY"));
    }

    #[test]
    fn test_fetch_log_records_requests() {
        let (session, _) = session_with(vec![config_response(), Response::Items { items: vec![] }]);
        let project = session.open_project("WHEELY").unwrap();
        project.search_for_items("mrql:category=REQ").unwrap();

        let log = session.fetch_log();
        assert_eq!(log[0], "- login");
        assert_eq!(log[1], "WHEELY open_project");
        assert_eq!(log[2], "WHEELY search mrql:category=REQ");
    }

    #[test]
    fn test_server_errors_are_typed() {
        let (session, _) = session_with(vec![
            config_response(),
            Response::error(ErrorCode::NotFound, "SPEC-99"),
            Response::error(ErrorCode::Query, "unexpected token"),
        ]);
        let project = session.open_project("WHEELY").unwrap();
        assert!(matches!(project.get_item("SPEC-99"), Err(ClientError::NotFound(_))));
        assert!(matches!(project.search_for_ids("mrql:(("), Err(ClientError::Query(_))));
    }

    #[test]
    fn test_render_job_stops_at_completion() {
        let running = |p| Response::Progress {
            progress: JobProgress {
                job_id: 7,
                status: "running".to_string(),
                progress: p,
                job_files: vec![],
            },
        };
        let done = Response::Progress {
            progress: JobProgress {
                job_id: 7,
                status: "done".to_string(),
                progress: 100,
                job_files: vec![JobFile {
                    file_id: 1,
                    name: "DOC-8.pdf".to_string(),
                    url: "/rest/1/WHEELY/job/7/1".to_string(),
                }],
            },
        };
        let mut doc_item = Item::new_local("DOC", Vec::new(), false);
        doc_item.id = Some("DOC-8".to_string());
        let (session, _) = session_with(vec![
            config_response(),
            Response::Job { job_id: 7 },
            running(30),
            running(60),
            done,
        ]);
        let project = session.open_project("WHEELY").unwrap();
        let doc = Document::new(doc_item);

        let mut seen = Vec::new();
        let url = project.to_pdf(&doc, |_, p| seen.push(p.progress)).unwrap();
        assert_eq!(seen, vec![30, 60, 100]);
        assert_eq!(url, "http://reqs.example.com:5150/rest/1/WHEELY/job/7/1");
    }

    #[test]
    fn test_put_item_rejects_persisted_item() {
        let (session, sent) = session_with(vec![config_response()]);
        let project = session.open_project("WHEELY").unwrap();
        let mut item = Item::new_local("UC", Vec::new(), false);
        item.id = Some("UC-1".to_string());
        item.title = "Existing".to_string();

        let err = project.put_item("F-UC-1", &item).unwrap_err();
        assert!(matches!(err, ClientError::Validation(ValidationError::AlreadyPersisted(_))));
        assert_eq!(sent.borrow().len(), 2);
    }

    #[test]
    fn test_compute_file_url_is_pure() {
        let (session, sent) = session_with(vec![config_response()]);
        let project = session.open_project("WHEELY").unwrap();
        let ack = FileAck {
            file_id: 42,
            key: "k-1".to_string(),
            file_name: "typewriter.jpg".to_string(),
            size: 3,
            sha256: String::new(),
        };
        let first = project.compute_file_url(&ack);
        let second = project.compute_file_url(&ack);
        assert_eq!(first, second);
        assert_eq!(first, "http://reqs.example.com:5150/rest/1/WHEELY/file/42?key=k-1");
        assert_eq!(sent.borrow().len(), 2);
    }
}
