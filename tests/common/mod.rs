//! Shared test infrastructure for mreq integration tests.
//!
//! Provides TestEnv: a loopback server seeded with the demo project and a
//! session logged in to it.

#![allow(dead_code)]

use mreq::loopback::{self, DEMO_PROJECT, DEMO_TOKEN, DEMO_USER, LoopbackHandle, Repository};
use mreq::{ConnectionConfig, Item, Project, Session};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

/// Test environment with automatic cleanup.
///
/// Field order matters: the session disconnects before the server stops.
pub struct TestEnv {
    pub session: Session,
    pub server: LoopbackHandle,
    pub temp_dir: TempDir,
}

impl TestEnv {
    /// Start a server with the demo repository and log in.
    pub fn new() -> Self {
        Self::with_repository(Repository::demo())
    }

    pub fn with_repository(repository: Repository) -> Self {
        let server = loopback::spawn("127.0.0.1:0", repository).expect("Failed to start loopback server");
        let session = Session::connect(&Self::config_for(&server)).expect("Failed to log in");
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        Self {
            session,
            server,
            temp_dir,
        }
    }

    /// Connection settings for the demo user on this env's server.
    pub fn config(&self) -> ConnectionConfig {
        Self::config_for(&self.server)
    }

    fn config_for(server: &LoopbackHandle) -> ConnectionConfig {
        ConnectionConfig::new(server.address().to_string(), DEMO_USER, DEMO_TOKEN).with_poll_interval(Duration::ZERO)
    }

    /// Open the demo project.
    pub fn project(&self) -> Project<'_> {
        self.session.open_project(DEMO_PROJECT).expect("Failed to open project")
    }

    /// Write a file into the temp dir and return its path.
    pub fn write_file(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, contents).expect("Failed to write file");
        path
    }

    /// Read the server's copy of an item, bypassing the client.
    pub fn server_item(&self, id: &str) -> Option<Item> {
        let repository = self.server.repository();
        let repository = repository.lock().expect("Repository lock poisoned");
        repository.project(DEMO_PROJECT).and_then(|p| p.item(id).cloned())
    }

    /// Bytes stored on the server for an uploaded file.
    pub fn server_file(&self, file_id: u64) -> Option<(String, Vec<u8>)> {
        let repository = self.server.repository();
        let repository = repository.lock().expect("Repository lock poisoned");
        repository
            .project(DEMO_PROJECT)
            .and_then(|p| p.file(file_id))
            .map(|(name, bytes)| (name.to_string(), bytes.to_vec()))
    }

    /// Audit trail entries recorded by the server.
    pub fn audit_reasons(&self) -> Vec<(String, Option<String>)> {
        let repository = self.server.repository();
        let repository = repository.lock().expect("Repository lock poisoned");
        repository
            .audit()
            .iter()
            .map(|entry| (entry.action.clone(), entry.reason.clone()))
            .collect()
    }
}

/// Create and save a requirement with `title` under the requirements folder.
pub fn put_requirement(project: &Project<'_>, title: &str) -> Item {
    let mut req = project.create_item("REQ").expect("Failed to create REQ");
    req.set_title(title);
    project.put_item("F-REQ-1", &req).expect("Failed to put REQ")
}
