//! Wire protocol: one JSON object per line in each direction.

use crate::types::{
    ExecuteParam, ExecuteResult, FieldMask, FileAck, FolderNode, Item, ItemConfig, JobProgress, ServerSettings, Todo,
    TodoQuery,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A request plus the session context it runs in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Session token, absent only for `Login` and `Ping`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Project the request targets, if project-scoped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Audit comment for mutating requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    pub request: Request,
}

/// Request sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Exchange credentials for a session token.
    Login { user: String, token: String },

    /// List the projects visible to the session.
    ListProjects,

    /// Open a project and fetch its schema.
    OpenProject,

    GetItem { id: String },

    /// Create an item under a folder.
    PutItem { parent: String, item: Item },

    /// Persist changes to an existing item.
    UpdateItem { item: Item },

    DeleteItem { id: String },

    /// Run a query and return items.
    Search {
        query: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        filter: String,
        #[serde(default)]
        tree_order: bool,
        mask: FieldMask,
    },

    /// Run a query and return IDs only.
    SearchIds {
        query: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        filter: String,
    },

    ProjectTree,

    /// Bulk derivation, e.g. TC into XTC.
    Execute { param: ExecuteParam },

    /// Start rendering an item to PDF.
    RenderPdf { id: String },

    /// Poll a render job.
    JobStatus { job_id: u64 },

    /// Fetch one output file of a finished job.
    DownloadJobFile { job_id: u64, file_id: u64 },

    BeginUpload { file_name: String },

    /// One base64-encoded chunk of an upload.
    UploadChunk { upload_id: String, data: String },

    /// Complete an upload; the server checks the digest.
    FinishUpload { upload_id: String, sha256: String },

    ServerSettings,

    PutServerSetting { key: String, value: String },

    CreateTodo {
        item: String,
        assignees: Vec<String>,
        kind: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        due: Option<DateTime<Utc>>,
    },

    Todos { query: TodoQuery },

    /// Ping to check the server is alive.
    Ping,
}

impl Request {
    /// Short name of the request, used in logs and the fetch log.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Login { .. } => "login",
            Request::ListProjects => "list_projects",
            Request::OpenProject => "open_project",
            Request::GetItem { .. } => "get_item",
            Request::PutItem { .. } => "put_item",
            Request::UpdateItem { .. } => "update_item",
            Request::DeleteItem { .. } => "delete_item",
            Request::Search { .. } => "search",
            Request::SearchIds { .. } => "search_ids",
            Request::ProjectTree => "project_tree",
            Request::Execute { .. } => "execute",
            Request::RenderPdf { .. } => "render_pdf",
            Request::JobStatus { .. } => "job_status",
            Request::DownloadJobFile { .. } => "download_job_file",
            Request::BeginUpload { .. } => "begin_upload",
            Request::UploadChunk { .. } => "upload_chunk",
            Request::FinishUpload { .. } => "finish_upload",
            Request::ServerSettings => "server_settings",
            Request::PutServerSetting { .. } => "put_server_setting",
            Request::CreateTodo { .. } => "create_todo",
            Request::Todos { .. } => "todos",
            Request::Ping => "ping",
        }
    }

    /// The request's main argument, for the fetch log.
    pub fn subject(&self) -> Option<String> {
        match self {
            Request::GetItem { id } | Request::DeleteItem { id } | Request::RenderPdf { id } => Some(id.clone()),
            Request::PutItem { parent, .. } => Some(parent.clone()),
            Request::UpdateItem { item } => item.id().map(String::from),
            Request::Search { query, .. } | Request::SearchIds { query, .. } => Some(query.clone()),
            Request::Execute { param } => Some(param.sources.join(",")),
            Request::JobStatus { job_id } | Request::DownloadJobFile { job_id, .. } => Some(job_id.to_string()),
            Request::BeginUpload { file_name } => Some(file_name.clone()),
            Request::PutServerSetting { key, .. } => Some(key.clone()),
            Request::CreateTodo { item, .. } => Some(item.clone()),
            _ => None,
        }
    }

    /// Whether the request changes server state (and so carries the comment).
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Request::PutItem { .. }
                | Request::UpdateItem { .. }
                | Request::DeleteItem { .. }
                | Request::Execute { .. }
                | Request::FinishUpload { .. }
                | Request::PutServerSetting { .. }
                | Request::CreateTodo { .. }
        )
    }
}

/// Error category carried by `Response::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Auth,
    NotFound,
    InvalidCategory,
    Conflict,
    Query,
    Job,
    Invalid,
}

/// Response sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Session { token: String },

    Projects { projects: Vec<String> },

    Config { config: ItemConfig },

    Item { item: Item },

    Items { items: Vec<Item> },

    Ids { ids: Vec<String> },

    Tree { root: FolderNode },

    Executed { result: ExecuteResult },

    Job { job_id: u64 },

    Progress { progress: JobProgress },

    /// Base64-encoded file contents.
    Bytes { data: String },

    Upload { upload_id: String },

    File { ack: FileAck },

    Settings { settings: ServerSettings },

    TodoCreated { todo_id: u64 },

    Todos { todos: Vec<Todo> },

    /// Operation succeeded.
    Ok,

    /// Pong response to ping.
    Pong,

    Error { code: ErrorCode, message: String },
}

impl Response {
    /// Create an error response.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}
