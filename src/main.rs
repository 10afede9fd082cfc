//! mreq CLI - scripted recipes against a requirements-management server.

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use mreq::loopback::{self, DEMO_PROJECT, DEMO_TOKEN, DEMO_USER, Repository};
use mreq::{Credentials, Project, Session, default_credentials_path, recipes};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

mod cli;

use cli::{Cli, Command, Recipe};

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mreq")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("mreq.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn connect(credentials: Option<PathBuf>, connection: &str) -> Result<Session> {
    let path = credentials.unwrap_or_else(default_credentials_path);
    let credentials =
        Credentials::load(&path).with_context(|| format!("Failed to load credentials from {}", path.display()))?;
    let config = credentials.get(connection)?;
    info!("Connecting to {} as {}", config.server, config.user);
    Session::connect(config).with_context(|| format!("Failed to connect to {}", config.server))
}

fn dump<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_yaml::to_string(value).context("Failed to format output")?;
    print!("{}", text);
    Ok(())
}

fn run_recipe(recipe: Recipe, project: &Project<'_>) -> Result<()> {
    match recipe {
        Recipe::Tree => {
            for path in recipes::tree_paths(project)? {
                println!("{}", path);
            }
        }

        Recipe::Labels => {
            let walk = recipes::walk_labels(project)?;
            println!("Labels of {}:", walk.id.cyan());
            for step in &walk.steps {
                println!("  {}: [{}]", step.message, step.labels.join(", "));
            }
            if walk.needs_save {
                println!("{} {} has unsaved changes", "!".yellow(), walk.id);
            }
        }

        Recipe::CreateUc { cleanup } => {
            let report = recipes::create_use_case(project, cleanup)?;
            println!("{} Created {} \"{}\"", "✓".green(), report.id.cyan(), report.title);
            println!("  Step 3: {}", report.third_step);
            if report.deleted {
                println!("{} Deleted {}", "✓".green(), report.id);
            }
        }

        Recipe::AddAttachment => {
            let id = recipes::add_attachment(project)?;
            println!("{} Created {}", "✓".green(), id.cyan());
        }

        Recipe::ChangeDownlink => {
            let swap = recipes::swap_downlink(project)?;
            println!(
                "{} Removed and restored {} -> {} ({} candidates)",
                "✓".green(),
                swap.id.cyan(),
                swap.link,
                swap.candidates
            );
        }

        Recipe::Execute => {
            let report = recipes::execute_test_cases(project)?;
            println!("{} Created folder {}", "✓".green(), report.result.folder.cyan());
            dump(&report)?;
        }

        Recipe::Attachments { id } => {
            dump(&recipes::list_attachments(project, &id)?)?;
        }

        Recipe::Doc { id } => {
            for section in recipes::describe_document(project, &id)? {
                println!("{} ({})", section.name.bold(), section.kind.dimmed());
                dump(&section)?;
            }
        }

        Recipe::Pdf { id, output } => {
            let report = recipes::render_document(project, &id, &output, |progress| {
                println!("  {} {}%", progress.status, progress.progress);
            })?;
            println!("{} {}", "✓".green(), report.url);
            println!("  Wrote {} bytes to {}", report.bytes, report.path.display());
        }

        Recipe::Upload { path } => {
            let report = recipes::upload_file(project, &path)?;
            println!("{} Uploaded in {} chunks", "✓".green(), report.chunks);
            println!("{}", report.url);
        }

        Recipe::AttachFile { path, item } => {
            let report = recipes::attach_file(project, &path, &item)?;
            println!("{} Attached {} to {}", "✓".green(), report.url, report.item.cyan());
            dump(&report.files)?;
        }

        Recipe::PlaceImage { path } => {
            let placed = recipes::place_image(project, &path)?;
            println!("{} Placed {} in {}", "✓".green(), placed.url, placed.item.cyan());
        }

        Recipe::Relationships => {
            println!("{}", recipes::relationship_graph(project.item_config()));
        }

        Recipe::Favorites => {
            let favorites = recipes::favorites(project.session())?;
            if !favorites.existing {
                println!("{} Stored default favorites", "✓".green());
            }
            dump(&favorites.value)?;
        }

        Recipe::Todos => {
            let report = recipes::notify(project)?;
            println!("{} Created {} todos", "✓".green(), report.created.len());
            dump(&report.todos)?;
        }

        Recipe::FetchLog => {
            for line in recipes::fetch_log(project)? {
                println!("{}", line);
            }
        }
    }

    Ok(())
}

fn serve(listen: &str) -> Result<()> {
    println!(
        "{} Serving {} on {} (user {}, token {})",
        "✓".green(),
        DEMO_PROJECT.cyan(),
        listen,
        DEMO_USER,
        DEMO_TOKEN
    );
    let rt = tokio::runtime::Runtime::new().context("Failed to create runtime")?;
    rt.block_on(loopback::run(listen, Repository::demo()))
        .context("Server error")
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve { listen } => serve(&listen),
        Command::Recipe(recipe) => {
            let session = connect(cli.credentials, &cli.connection)?;
            let project = session
                .open_project(&cli.project)
                .with_context(|| format!("Failed to open project {}", cli.project))?;
            run_recipe(recipe, &project)
        }
    }
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    info!("Command: {:?}", std::env::args().collect::<Vec<_>>());

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
