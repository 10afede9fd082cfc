//! CLI argument parsing for mreq.

use clap::{Parser, Subcommand};
use mreq::loopback::{DEFAULT_LISTEN, DEMO_PROJECT};
use mreq::recipes::{ATTACHMENT_ITEM, DEFAULT_DOCUMENT};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "mreq",
    about = "Scripted recipes against a requirements-management server",
    version,
    after_help = "Logs are written to: ~/.local/share/mreq/logs/mreq.log"
)]
pub struct Cli {
    /// Credentials file (default: $MREQ_CREDENTIALS, ./credentials.json, then the config dir)
    #[arg(short, long, global = true)]
    pub credentials: Option<PathBuf>,

    /// Connection key within the credentials file
    #[arg(short = 'k', long, global = true, default_value = "clouds5")]
    pub connection: String,

    /// Project to open
    #[arg(short, long, global = true, default_value = DEMO_PROJECT)]
    pub project: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the in-memory demo server in the foreground
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = DEFAULT_LISTEN)]
        listen: String,
    },

    #[command(flatten)]
    Recipe(Recipe),
}

/// Recipes run against an open project.
#[derive(Subcommand)]
pub enum Recipe {
    /// Print every leaf of the project tree as a path
    Tree,

    /// Walk a random test case through label edits without saving
    Labels,

    /// Create a use case with three steps
    CreateUc {
        /// Update, verify, then delete the created item
        #[arg(long)]
        cleanup: bool,
    },

    /// Create a use case ready to hold an image
    AddAttachment,

    /// Remove and restore a spec's test case downlink
    ChangeDownlink,

    /// Create execution records for every test case
    Execute,

    /// List the files attached to an item
    Attachments {
        /// Item ID
        #[arg(default_value = ATTACHMENT_ITEM)]
        id: String,
    },

    /// Describe the sections of a document
    Doc {
        /// Document item ID
        #[arg(default_value = DEFAULT_DOCUMENT)]
        id: String,
    },

    /// Render a document to PDF and download it
    Pdf {
        /// Document item ID
        #[arg(default_value = DEFAULT_DOCUMENT)]
        id: String,

        /// Where to write the PDF
        #[arg(short, long, default_value = "download.pdf")]
        output: PathBuf,
    },

    /// Upload a local file and print its URL
    Upload {
        /// File to upload
        path: PathBuf,
    },

    /// Upload a local file and reference it from an item's Files field
    AttachFile {
        /// File to upload
        path: PathBuf,

        /// Item whose Files field receives the reference
        #[arg(short, long, default_value = ATTACHMENT_ITEM)]
        item: String,
    },

    /// Upload an image and embed it in the first use case
    PlaceImage {
        /// Image to upload
        path: PathBuf,
    },

    /// Print the category relationships as a graphviz digraph
    Relationships,

    /// Read or create the "favorites" server setting
    Favorites,

    /// Create notifications on two use cases and list all todos
    Todos,

    /// Run a search and print the requests sent
    FetchLog,
}
