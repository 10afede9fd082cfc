//! In-memory server state for the loopback server.
//!
//! `Repository::handle` is a plain state machine: one envelope in, one
//! response out, every request observing the effects of every earlier one.

use super::mrql::{self, Catalog};
use crate::id::{generate_token, sha256_hex};
use crate::protocol::{Envelope, ErrorCode, Request, Response};
use crate::types::{
    ExecuteParam, ExecuteResult, Field, FieldMask, FieldSpec, FieldValue, FileAck, FolderNode, Item, ItemConfig,
    JobFile, JobProgress, Link, ServerSettings, Setting, Todo, TodoQuery, TreeItem,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

/// Parent key of top-level folders.
const ROOT: &str = "";

/// Progress added to a render job on every status poll.
const DEFAULT_RENDER_STEP: u8 = 25;

/// The only output file of a render job.
const RENDER_FILE_ID: u64 = 1;

/// Live sessions per user; a login past this drops the user's oldest.
const MAX_SESSIONS_PER_USER: usize = 8;

/// Unfinished uploads per project; beginning one more drops the oldest.
const MAX_PENDING_UPLOADS: usize = 16;

/// Render jobs per project not yet downloaded; starting one more drops the oldest.
const MAX_OPEN_JOBS: usize = 16;

/// A request that could not be served.
#[derive(Debug)]
struct Failure {
    code: ErrorCode,
    message: String,
}

impl Failure {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn not_found(what: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::NotFound, format!("{} not found", what))
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Invalid, message)
    }
}

type Outcome<T = Response> = std::result::Result<T, Failure>;

/// One mutating request, as recorded in the audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub user: String,
    pub project: Option<String>,
    pub action: String,
    pub subject: Option<String>,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

struct PendingUpload {
    file_name: String,
    bytes: Vec<u8>,
    seq: u64,
}

struct StoredFile {
    file_name: String,
    bytes: Vec<u8>,
}

struct RenderState {
    item_id: String,
    title: String,
    progress: u8,
}

/// One project: schema, items, folder tree and per-project side tables.
pub struct ProjectState {
    name: String,
    config: ItemConfig,
    items: BTreeMap<String, Item>,
    parents: HashMap<String, String>,
    children: HashMap<String, Vec<String>>,
    counters: HashMap<String, u64>,
    todos: Vec<Todo>,
    next_todo: u64,
    files: HashMap<u64, StoredFile>,
    next_file: u64,
    uploads: HashMap<String, PendingUpload>,
    next_upload: u64,
    jobs: BTreeMap<u64, RenderState>,
    next_job: u64,
}

struct Session {
    user: String,
    seq: u64,
}

/// The whole server: users, sessions, projects, settings and audit trail.
pub struct Repository {
    users: BTreeMap<String, String>,
    sessions: HashMap<String, Session>,
    next_session: u64,
    projects: BTreeMap<String, ProjectState>,
    settings: Vec<Setting>,
    audit: Vec<AuditEntry>,
    render_step: u8,
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}

impl Repository {
    /// An empty server with no users and no projects.
    pub fn new() -> Self {
        Self {
            users: BTreeMap::new(),
            sessions: HashMap::new(),
            next_session: 0,
            projects: BTreeMap::new(),
            settings: Vec::new(),
            audit: Vec::new(),
            render_step: DEFAULT_RENDER_STEP,
        }
    }

    pub fn add_user(&mut self, user: &str, token: &str) {
        self.users.insert(user.to_string(), token.to_string());
    }

    /// Add an empty project and return it for seeding.
    pub fn add_project(&mut self, name: &str, config: ItemConfig) -> &mut ProjectState {
        self.projects
            .entry(name.to_string())
            .or_insert_with(|| ProjectState::new(name, config))
    }

    pub fn project(&self, name: &str) -> Option<&ProjectState> {
        self.projects.get(name)
    }

    /// Progress added per status poll (clamped to at least 1).
    pub fn set_render_step(&mut self, step: u8) {
        self.render_step = step.max(1);
    }

    pub fn audit(&self) -> &[AuditEntry] {
        &self.audit
    }

    pub fn settings(&self) -> &[Setting] {
        &self.settings
    }

    /// Serve one request.
    pub fn handle(&mut self, envelope: Envelope) -> Response {
        let name = envelope.request.name();
        match self.dispatch(envelope) {
            Ok(response) => response,
            Err(failure) => {
                log::debug!("{} failed: {}", name, failure.message);
                Response::error(failure.code, failure.message)
            }
        }
    }

    fn dispatch(&mut self, envelope: Envelope) -> Outcome {
        let Envelope {
            token,
            project,
            reason,
            request,
        } = envelope;

        match request {
            Request::Ping => return Ok(Response::Pong),
            Request::Login { user, token } => return self.login(&user, &token),
            _ => {}
        }

        let user = self.authenticate(token.as_deref())?;
        let action = request.name();
        let subject = request.subject();
        let mutating = request.is_mutating();

        let response = match request {
            Request::ListProjects => Response::Projects {
                projects: self.projects.keys().cloned().collect(),
            },
            Request::ServerSettings => Response::Settings {
                settings: ServerSettings {
                    setting_list: self.settings.clone(),
                },
            },
            Request::PutServerSetting { key, value } => {
                self.put_setting(key, value)?;
                Response::Ok
            }
            request => {
                let name = project
                    .as_deref()
                    .ok_or_else(|| Failure::invalid(format!("{} needs a project", action)))?;
                let state = self
                    .projects
                    .get_mut(name)
                    .ok_or_else(|| Failure::not_found(format!("project {}", name)))?;
                state.handle(&user, request, self.render_step)?
            }
        };

        if mutating {
            self.audit.push(AuditEntry {
                user,
                project,
                action: action.to_string(),
                subject,
                reason,
                at: Utc::now(),
            });
        }

        Ok(response)
    }

    fn login(&mut self, user: &str, token: &str) -> Outcome {
        if self.users.get(user).map(String::as_str) != Some(token) {
            return Err(Failure::new(ErrorCode::Auth, format!("invalid credentials for {}", user)));
        }
        let live = self.sessions.values().filter(|s| s.user == user).count();
        if live >= MAX_SESSIONS_PER_USER {
            let oldest = self
                .sessions
                .iter()
                .filter(|(_, s)| s.user == user)
                .min_by_key(|(_, s)| s.seq)
                .map(|(token, _)| token.clone());
            if let Some(oldest) = oldest {
                self.sessions.remove(&oldest);
                log::debug!("Dropped oldest session of {}", user);
            }
        }

        let session = generate_token("sess", user, Utc::now());
        self.next_session += 1;
        self.sessions.insert(
            session.clone(),
            Session {
                user: user.to_string(),
                seq: self.next_session,
            },
        );
        log::info!("User {} logged in", user);
        Ok(Response::Session { token: session })
    }

    fn authenticate(&self, token: Option<&str>) -> Outcome<String> {
        let token = token.ok_or_else(|| Failure::new(ErrorCode::Auth, "not logged in"))?;
        self.sessions
            .get(token)
            .map(|s| s.user.clone())
            .ok_or_else(|| Failure::new(ErrorCode::Auth, "unknown or expired session"))
    }

    fn put_setting(&mut self, key: String, value: String) -> Outcome<()> {
        if key.trim().is_empty() {
            return Err(Failure::invalid("setting key cannot be empty"));
        }
        match self.settings.iter_mut().find(|s| s.key == key) {
            Some(setting) => setting.value = value,
            None => self.settings.push(Setting { key, value }),
        }
        Ok(())
    }
}

impl ProjectState {
    pub fn new(name: &str, config: ItemConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            items: BTreeMap::new(),
            parents: HashMap::new(),
            children: HashMap::new(),
            counters: HashMap::new(),
            todos: Vec::new(),
            next_todo: 0,
            files: HashMap::new(),
            next_file: 0,
            uploads: HashMap::new(),
            next_upload: 0,
            jobs: BTreeMap::new(),
            next_job: 0,
        }
    }

    pub fn item(&self, id: &str) -> Option<&Item> {
        self.items.get(id)
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn todos(&self) -> &[Todo] {
        &self.todos
    }

    /// Name and contents of a completed upload.
    pub fn file(&self, file_id: u64) -> Option<(&str, &[u8])> {
        self.files
            .get(&file_id)
            .map(|f| (f.file_name.as_str(), f.bytes.as_slice()))
    }

    /// Insert an item under a fixed ID, keeping the ID counters ahead of it.
    pub(crate) fn seed(&mut self, parent: &str, id: &str, item: Item) {
        if let Some((prefix, number)) = id.rsplit_once('-')
            && let Ok(number) = number.parse::<u64>()
        {
            let counter = self.counters.entry(prefix.to_string()).or_insert(0);
            *counter = (*counter).max(number);
        }
        self.persist(parent, id.to_string(), item, Utc::now());
    }

    fn handle(&mut self, user: &str, request: Request, render_step: u8) -> Outcome {
        match request {
            Request::OpenProject => Ok(Response::Config {
                config: self.config.clone(),
            }),
            Request::GetItem { id } => {
                let item = self.get(&id)?;
                Ok(Response::Item {
                    item: self.snapshot(item, FieldMask::full()),
                })
            }
            Request::PutItem { parent, item } => Ok(Response::Item {
                item: self.put(&parent, item)?,
            }),
            Request::UpdateItem { item } => Ok(Response::Item {
                item: self.update(item)?,
            }),
            Request::DeleteItem { id } => {
                self.delete(&id)?;
                Ok(Response::Ok)
            }
            Request::Search {
                query,
                filter,
                tree_order,
                mask,
            } => {
                let items = self
                    .search(&query, &filter, tree_order)?
                    .into_iter()
                    .map(|item| self.snapshot(item, mask))
                    .collect();
                Ok(Response::Items { items })
            }
            Request::SearchIds { query, filter } => {
                let ids = self
                    .search(&query, &filter, false)?
                    .into_iter()
                    .filter_map(|item| item.id.clone())
                    .collect();
                Ok(Response::Ids { ids })
            }
            Request::ProjectTree => Ok(Response::Tree { root: self.tree() }),
            Request::Execute { param } => Ok(Response::Executed {
                result: self.execute(&param)?,
            }),
            Request::RenderPdf { id } => Ok(Response::Job {
                job_id: self.start_render(&id)?,
            }),
            Request::JobStatus { job_id } => Ok(Response::Progress {
                progress: self.advance_job(job_id, render_step)?,
            }),
            Request::DownloadJobFile { job_id, file_id } => Ok(Response::Bytes {
                data: BASE64.encode(self.job_file(job_id, file_id)?),
            }),
            Request::BeginUpload { file_name } => Ok(Response::Upload {
                upload_id: self.begin_upload(file_name)?,
            }),
            Request::UploadChunk { upload_id, data } => {
                self.upload_chunk(&upload_id, &data)?;
                Ok(Response::Ok)
            }
            Request::FinishUpload { upload_id, sha256 } => Ok(Response::File {
                ack: self.finish_upload(&upload_id, &sha256)?,
            }),
            Request::CreateTodo {
                item,
                assignees,
                kind,
                text,
                due,
            } => Ok(Response::TodoCreated {
                todo_id: self.create_todo(item, assignees, kind, text, due)?,
            }),
            Request::Todos { query } => Ok(Response::Todos {
                todos: self.query_todos(user, &query),
            }),
            other => Err(Failure::invalid(format!("{} is not a project request", other.name()))),
        }
    }

    fn get(&self, id: &str) -> Outcome<&Item> {
        self.items.get(id).ok_or_else(|| Failure::not_found(format!("item {}", id)))
    }

    fn children_of(&self, id: &str) -> &[String] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// A copy of `item` holding only the parts selected by `mask`.
    fn snapshot(&self, item: &Item, mask: FieldMask) -> Item {
        let mut copy = item.clone();
        if !mask.fields {
            copy.fields.clear();
        }
        if !mask.labels {
            copy.labels.clear();
        }
        if mask.downlinks {
            for link in &mut copy.downlinks {
                link.title = self.items.get(&link.to).map(|target| target.title.clone());
            }
        } else {
            copy.downlinks.clear();
        }
        copy.loaded = mask;
        copy.dirty = false;
        copy
    }

    fn next_id(&mut self, category: &str, is_folder: bool) -> String {
        let prefix = if is_folder {
            format!("F-{}", category)
        } else {
            category.to_string()
        };
        let counter = self.counters.entry(prefix.clone()).or_insert(0);
        *counter += 1;
        format!("{}-{}", prefix, counter)
    }

    fn persist(&mut self, parent: &str, id: String, mut item: Item, now: DateTime<Utc>) {
        item.id = Some(id.clone());
        item.revision = 1;
        item.loaded = FieldMask::full();
        item.created_at = Some(now);
        item.modified_at = Some(now);
        item.dirty = false;
        if item.is_folder {
            item.fields.clear();
        }
        for link in &mut item.downlinks {
            link.title = None;
        }
        self.parents.insert(id.clone(), parent.to_string());
        self.children.entry(parent.to_string()).or_default().push(id.clone());
        self.items.insert(id, item);
    }

    fn check_links(&self, links: &[Link]) -> Outcome<()> {
        for link in links {
            match self.items.get(&link.to) {
                None => return Err(Failure::not_found(format!("link target {}", link.to))),
                Some(target) if target.is_folder => {
                    return Err(Failure::invalid(format!("cannot link to folder {}", link.to)));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn put(&mut self, parent: &str, item: Item) -> Outcome<Item> {
        if let Some(id) = &item.id {
            return Err(Failure::invalid(format!("item already has id {}", id)));
        }
        if self.config.item_configuration(&item.category).is_none() {
            return Err(Failure::new(ErrorCode::InvalidCategory, item.category.clone()));
        }
        let folder = self.get(parent)?;
        if !folder.is_folder {
            return Err(Failure::invalid(format!("{} is not a folder", parent)));
        }
        if folder.category != item.category {
            return Err(Failure::invalid(format!(
                "cannot put a {} item into {}",
                item.category, parent
            )));
        }
        item.validate().map_err(|e| Failure::invalid(e.to_string()))?;
        self.check_links(&item.downlinks)?;

        let id = self.next_id(&item.category, item.is_folder);
        self.persist(parent, id.clone(), item, Utc::now());
        log::debug!("Created {} in {}", id, parent);

        let stored = self.get(&id)?;
        Ok(self.snapshot(stored, FieldMask::full()))
    }

    /// Apply an update. Only the parts the client had loaded are replaced.
    fn update(&mut self, incoming: Item) -> Outcome<Item> {
        let id = incoming
            .id
            .clone()
            .ok_or_else(|| Failure::invalid("item has no id; create it with put_item"))?;
        incoming.validate().map_err(|e| Failure::invalid(e.to_string()))?;
        let loaded = incoming.loaded;
        if let Some(part) = unloaded_edit(&incoming) {
            return Err(Failure::invalid(format!("{} of {} were not loaded and cannot be updated", part, id)));
        }
        if loaded.downlinks {
            self.check_links(&incoming.downlinks)?;
        }

        let stored = self
            .items
            .get_mut(&id)
            .ok_or_else(|| Failure::not_found(format!("item {}", id)))?;
        if stored.revision != incoming.revision {
            return Err(Failure::new(
                ErrorCode::Conflict,
                format!(
                    "{} is at revision {}, update was based on revision {}",
                    id, stored.revision, incoming.revision
                ),
            ));
        }
        if stored.category != incoming.category {
            return Err(Failure::invalid(format!("cannot change the category of {}", id)));
        }

        stored.title = incoming.title;
        if loaded.fields && !stored.is_folder {
            stored.fields = incoming.fields;
        }
        if loaded.labels {
            stored.labels = incoming.labels;
        }
        if loaded.downlinks {
            stored.downlinks = incoming.downlinks.into_iter().map(|l| Link::to(l.to)).collect();
        }
        stored.revision += 1;
        stored.modified_at = Some(Utc::now());
        log::debug!("Updated {} to revision {}", id, stored.revision);

        let stored = self.get(&id)?;
        Ok(self.snapshot(stored, FieldMask::full()))
    }

    fn delete(&mut self, id: &str) -> Outcome<()> {
        let item = self.get(id)?;
        if item.is_folder && !self.children_of(id).is_empty() {
            return Err(Failure::invalid(format!("folder {} is not empty", id)));
        }

        self.items.remove(id);
        self.children.remove(id);
        if let Some(parent) = self.parents.remove(id)
            && let Some(siblings) = self.children.get_mut(&parent)
        {
            siblings.retain(|child| child != id);
        }

        let now = Utc::now();
        for other in self.items.values_mut() {
            if other.has_downlink(id) {
                other.downlinks.retain(|l| l.to != id);
                other.revision += 1;
                other.modified_at = Some(now);
            }
        }
        self.todos.retain(|t| t.item != id);
        log::debug!("Deleted {}", id);
        Ok(())
    }

    /// IDs in depth-first tree order, starting below `from`.
    fn tree_order(&self, from: &str) -> Vec<&str> {
        let mut order = Vec::new();
        let mut stack: Vec<&str> = self.children_of(from).iter().rev().map(String::as_str).collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.children_of(id).iter().rev().map(String::as_str));
        }
        order
    }

    fn search(&self, query: &str, filter: &str, tree_order: bool) -> Outcome<Vec<&Item>> {
        let expr = mrql::parse(query).map_err(|e| Failure::new(ErrorCode::Query, e.to_string()))?;

        let mut candidates: Vec<&Item> = if tree_order {
            self.tree_order(ROOT)
                .into_iter()
                .filter_map(|id| self.items.get(id))
                .collect()
        } else {
            let mut all: Vec<&Item> = self.items.values().collect();
            all.sort_by_key(|item| id_sort_key(item.id.as_deref().unwrap_or_default()));
            all
        };
        candidates.retain(|item| !item.is_folder && passes_label_filter(filter, item) && expr.matches(item, self));
        Ok(candidates)
    }

    fn tree(&self) -> FolderNode {
        let mut root = FolderNode::new(ROOT, self.name.clone());
        self.fill_folder(&mut root, ROOT);
        root
    }

    fn fill_folder(&self, node: &mut FolderNode, id: &str) {
        for child in self.children_of(id) {
            let Some(item) = self.items.get(child) else {
                continue;
            };
            if item.is_folder {
                let mut folder = FolderNode::new(child.clone(), item.title.clone());
                self.fill_folder(&mut folder, child);
                node.folders.push(folder);
            } else {
                node.items.push(TreeItem {
                    id: child.clone(),
                    title: item.title.clone(),
                });
            }
        }
    }

    /// Derive one `param.category` item per source item into a new folder.
    ///
    /// Every input is checked before anything is created, so a failed
    /// execute leaves the project untouched.
    fn execute(&mut self, param: &ExecuteParam) -> Outcome<ExecuteResult> {
        let target = self
            .config
            .item_configuration(&param.category)
            .cloned()
            .ok_or_else(|| Failure::new(ErrorCode::InvalidCategory, param.category.clone()))?;
        if param.name.trim().is_empty() {
            return Err(Failure::invalid("execute needs a folder name"));
        }
        let parent = self.get(&param.parent_folder)?;
        if !parent.is_folder || parent.category != param.category {
            return Err(Failure::invalid(format!(
                "{} is not a {} folder",
                param.parent_folder, param.category
            )));
        }
        if param.sources.is_empty() {
            return Err(Failure::invalid("execute needs at least one source"));
        }

        let mut sources: Vec<String> = Vec::new();
        for source in &param.sources {
            let item = self.get(source)?;
            let expanded: Vec<&str> = if item.is_folder {
                self.tree_order(source)
            } else {
                vec![source.as_str()]
            };
            for id in expanded {
                let is_item = self.items.get(id).is_some_and(|i| !i.is_folder);
                if is_item && !sources.iter().any(|s| s == id) {
                    sources.push(id.to_string());
                }
            }
        }
        if sources.is_empty() {
            return Err(Failure::invalid("no items to execute"));
        }

        let now = Utc::now();
        let folder_id = self.next_id(&param.category, true);
        let mut folder = Item::new_local(&param.category, Vec::new(), true);
        folder.title = param.name.clone();
        self.persist(&param.parent_folder, folder_id.clone(), folder, now);

        let mut created = Vec::new();
        for source_id in &sources {
            let source = self.get(source_id)?;
            let fields = target.fields.iter().map(|spec| derive_field(spec, source)).collect();
            let mut derived = Item::new_local(&param.category, fields, false);
            derived.title = source.title.clone();

            let id = self.next_id(&param.category, false);
            self.persist(&folder_id, id.clone(), derived, now);
            if param.link_sources
                && let Some(source) = self.items.get_mut(source_id)
            {
                source.downlinks.push(Link::to(id.as_str()));
                source.revision += 1;
                source.modified_at = Some(now);
            }
            created.push(id);
        }

        log::info!("Executed {} sources into {}", created.len(), folder_id);
        Ok(ExecuteResult {
            folder: folder_id,
            created,
        })
    }

    fn start_render(&mut self, id: &str) -> Outcome<u64> {
        let item = self.get(id)?;
        let state = RenderState {
            item_id: id.to_string(),
            title: item.title.clone(),
            progress: 0,
        };
        if self.jobs.len() >= MAX_OPEN_JOBS
            && let Some((dropped, _)) = self.jobs.pop_first()
        {
            log::debug!("Dropped render job {} that was never downloaded", dropped);
        }
        self.next_job += 1;
        self.jobs.insert(self.next_job, state);
        log::debug!("Render job {} started for {}", self.next_job, id);
        Ok(self.next_job)
    }

    fn advance_job(&mut self, job_id: u64, step: u8) -> Outcome<JobProgress> {
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| Failure::not_found(format!("job {}", job_id)))?;
        job.progress = job.progress.saturating_add(step.max(1)).min(100);

        let done = job.progress >= 100;
        let job_files = if done {
            vec![JobFile {
                file_id: RENDER_FILE_ID,
                name: format!("{}.pdf", job.item_id),
                url: format!("/rest/1/{}/job/{}/{}", self.name, job_id, RENDER_FILE_ID),
            }]
        } else {
            Vec::new()
        };
        Ok(JobProgress {
            job_id,
            status: if done { "done" } else { "running" }.to_string(),
            progress: job.progress,
            job_files,
        })
    }

    /// Hand out a finished job's file. The job is gone once downloaded.
    fn job_file(&mut self, job_id: u64, file_id: u64) -> Outcome<Vec<u8>> {
        let job = self
            .jobs
            .get(&job_id)
            .ok_or_else(|| Failure::not_found(format!("job {}", job_id)))?;
        if job.progress < 100 {
            return Err(Failure::new(ErrorCode::Job, format!("job {} is still running", job_id)));
        }
        if file_id != RENDER_FILE_ID {
            return Err(Failure::not_found(format!("file {} of job {}", file_id, job_id)));
        }
        let pdf = placeholder_pdf(job);
        self.jobs.remove(&job_id);
        Ok(pdf)
    }

    fn begin_upload(&mut self, file_name: String) -> Outcome<String> {
        if file_name.trim().is_empty() {
            return Err(Failure::invalid("upload needs a file name"));
        }
        if self.uploads.len() >= MAX_PENDING_UPLOADS {
            let oldest = self
                .uploads
                .iter()
                .min_by_key(|(_, u)| u.seq)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                self.uploads.remove(&oldest);
                log::debug!("Dropped unfinished upload {}", oldest);
            }
        }

        let upload_id = generate_token("upload", &file_name, Utc::now());
        self.next_upload += 1;
        self.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                file_name,
                bytes: Vec::new(),
                seq: self.next_upload,
            },
        );
        Ok(upload_id)
    }

    fn upload_chunk(&mut self, upload_id: &str, data: &str) -> Outcome<()> {
        let upload = self
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| Failure::not_found(format!("upload {}", upload_id)))?;
        let bytes = BASE64
            .decode(data)
            .map_err(|e| Failure::invalid(format!("bad chunk for {}: {}", upload_id, e)))?;
        upload.bytes.extend_from_slice(&bytes);
        Ok(())
    }

    fn finish_upload(&mut self, upload_id: &str, sha256: &str) -> Outcome<FileAck> {
        let upload = self
            .uploads
            .remove(upload_id)
            .ok_or_else(|| Failure::not_found(format!("upload {}", upload_id)))?;
        let digest = sha256_hex(&upload.bytes);
        if !digest.eq_ignore_ascii_case(sha256) {
            return Err(Failure::invalid(format!(
                "digest mismatch for {}: received {}, computed {}",
                upload.file_name, sha256, digest
            )));
        }

        self.next_file += 1;
        let ack = FileAck {
            file_id: self.next_file,
            key: generate_token("key", &upload.file_name, Utc::now()),
            file_name: upload.file_name.clone(),
            size: upload.bytes.len() as u64,
            sha256: digest,
        };
        self.files.insert(
            ack.file_id,
            StoredFile {
                file_name: upload.file_name,
                bytes: upload.bytes,
            },
        );
        log::debug!("Stored file {} ({} bytes)", ack.file_id, ack.size);
        Ok(ack)
    }

    fn create_todo(
        &mut self,
        item: String,
        assignees: Vec<String>,
        kind: String,
        text: String,
        due: Option<DateTime<Utc>>,
    ) -> Outcome<u64> {
        self.get(&item)?;
        if assignees.is_empty() {
            return Err(Failure::invalid("todo needs at least one assignee"));
        }
        if text.trim().is_empty() {
            return Err(Failure::invalid("todo text cannot be empty"));
        }
        self.next_todo += 1;
        self.todos.push(Todo {
            id: self.next_todo,
            item,
            assignees,
            kind,
            text,
            due,
            created_at: Utc::now(),
            done: false,
        });
        Ok(self.next_todo)
    }

    fn query_todos(&self, user: &str, query: &TodoQuery) -> Vec<Todo> {
        self.todos
            .iter()
            .filter(|t| query.item.as_ref().is_none_or(|item| &t.item == item))
            .filter(|t| query.include_done || !t.done)
            .filter(|t| query.all_users || t.assignees.iter().any(|a| a == user))
            .cloned()
            .collect()
    }
}

impl Catalog for ProjectState {
    fn category_of(&self, id: &str) -> Option<&str> {
        self.items.get(id).map(|item| item.category.as_str())
    }

    fn linked_from(&self, id: &str) -> Vec<&str> {
        self.items
            .values()
            .filter(|item| item.has_downlink(id))
            .filter_map(|item| item.id.as_deref())
            .collect()
    }
}

/// Sort key that orders `UC-2` before `UC-10`.
fn id_sort_key(id: &str) -> (String, u64) {
    match id.rsplit_once('-') {
        Some((prefix, number)) => (prefix.to_string(), number.parse().unwrap_or(u64::MAX)),
        None => (id.to_string(), 0),
    }
}

/// Comma-separated labels that must all be set; a leading `!` negates.
/// The first part an update carries without having loaded it. Snapshots leave
/// unloaded parts empty, so any content there would be silently dropped.
fn unloaded_edit(item: &Item) -> Option<&'static str> {
    if !item.loaded.fields && !item.fields.is_empty() {
        Some("fields")
    } else if !item.loaded.labels && !item.labels.is_empty() {
        Some("labels")
    } else if !item.loaded.downlinks && !item.downlinks.is_empty() {
        Some("downlinks")
    } else {
        None
    }
}

fn passes_label_filter(filter: &str, item: &Item) -> bool {
    filter
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.strip_prefix('!') {
            Some(label) => !item.has_label(label),
            None => item.has_label(term),
        })
}

/// A field of a derived item, carrying over same-named source content.
fn derive_field(spec: &FieldSpec, source: &Item) -> Field {
    let mut field = spec.empty_field();
    let Some(from) = source.fields.iter().find(|f| f.name == spec.name) else {
        return field;
    };
    match (&mut field.value, &from.value) {
        (FieldValue::RichText(html), FieldValue::RichText(original)) => html.clone_from(original),
        (FieldValue::Raw(data), FieldValue::Raw(original)) => data.clone_from(original),
        (FieldValue::Table(table), FieldValue::Table(original)) => {
            let columns: Vec<String> = table.columns.iter().map(|c| c.field_id.clone()).collect();
            table.rows = original
                .rows
                .iter()
                .map(|row| {
                    row.iter()
                        .filter(|(column, _)| columns.contains(column))
                        .map(|(column, value)| (column.clone(), value.clone()))
                        .collect()
                })
                .collect();
        }
        _ => {}
    }
    field
}

fn placeholder_pdf(job: &RenderState) -> Vec<u8> {
    format!(
        "%PDF-1.4\n% {}: {}\n1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n\
         2 0 obj << /Type /Pages /Kids [] /Count 0 >> endobj\n\
         trailer << /Root 1 0 R >>\n%%EOF\n",
        job.item_id, job.title
    )
    .into_bytes()
}
