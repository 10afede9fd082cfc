//! mreq: a typed client for a requirements-management server.
//!
//! A [`Session`] logs in once and hands out [`Project`] handles. Items are
//! fetched as owned snapshots, edited locally through field handlers, and
//! written back with `put_item` or `update_item`. The server rejects writes
//! based on a stale revision.
//!
//! The [`loopback`] module serves the same protocol from memory, which the
//! `serve` subcommand and the test suite use in place of a real server.
//!
//! # Example
//!
//! ```no_run
//! use mreq::{ConnectionConfig, Session};
//!
//! let config = ConnectionConfig::new("127.0.0.1:5150", "demo", "demo");
//! let session = Session::connect(&config).unwrap();
//! let project = session.open_project("WHEELY_OBSERVABLE").unwrap();
//!
//! let mut req = project.create_item("REQ").unwrap();
//! req.set_title("Door closes by itself");
//! let req = project.put_item("F-REQ-1", &req).unwrap();
//!
//! let found = project.search_for_ids("mrql:category=REQ").unwrap();
//! assert!(found.iter().any(|id| Some(id.as_str()) == req.id()));
//! ```

mod id;

pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod loopback;
pub mod protocol;
pub mod recipes;
pub mod transport;
pub mod types;

// Re-export public API
pub use client::{Project, RenderJob, Search, Session};
pub use config::{ConnectionConfig, Credentials, default_credentials_path};
pub use error::{ClientError, Result};
pub use handlers::{DhfField, Document, RawHandler, RichTextHandler, TableHandler};
pub use protocol::{ErrorCode, Request, Response};
pub use transport::{TcpTransport, Transport};
pub use types::{
    CategoryConfig, Column, ExecuteParam, ExecuteResult, Field, FieldMask, FieldSpec, FieldSpecKind, FieldValue,
    FileAck, FolderNode, Item, ItemConfig, JobFile, JobProgress, Link, Section, ServerSettings, Setting, Table, Todo,
    TodoQuery, TreeItem, UploadProgress, ValidationError,
};
