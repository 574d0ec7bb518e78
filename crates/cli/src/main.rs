// ABOUTME: Command-line front end for the snapdeck engine.
// ABOUTME: Captures widgets, edits stored artifacts, and runs bulk refreshes against a split file store.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use snapdeck_engine::bulk::{self, ProgressObserver};
use snapdeck_engine::{
    capture_selector, sanitize, Artifact, ArtifactStore, Engine, SanitizeOptions,
    SplitFileStore,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Capture fragments of web pages and keep them fresh.
#[derive(Parser, Debug)]
#[command(name = "snapdeck")]
#[command(about = "Capture web page widgets and keep them up to date", long_about = None)]
struct Args {
    /// Directory holding sync.json and local.json.
    #[arg(long, global = true, default_value = "snapdeck-data")]
    store: PathBuf,

    /// Chrome DevTools endpoint (e.g. http://127.0.0.1:9222) enabling the tab stages.
    #[arg(long, global = true)]
    cdp: Option<String>,

    /// Cookie header value passed through on direct fetches. Repeatable.
    #[arg(long, global = true)]
    cookie: Vec<String>,

    /// Request timeout in seconds.
    #[arg(long, global = true, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture the element matching SELECTOR on URL as a new artifact.
    Capture {
        url: String,
        selector: String,
        /// Which match to capture when the selector matches several elements.
        #[arg(long, default_value_t = 0)]
        nth: usize,
        /// Custom display label.
        #[arg(long)]
        label: Option<String>,
    },
    /// List stored artifacts.
    List {
        /// Print JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Refresh every artifact that is not paused.
    Refresh,
    /// Exclude an artifact from bulk refresh.
    Pause { id: String },
    /// Include a paused artifact in bulk refresh again.
    Resume { id: String },
    /// Hide elements matching SELECTOR in an artifact's content, now and on every refresh.
    Exclude { id: String, selector: String },
    /// Set or, without a label, clear an artifact's custom label.
    Label { id: String, label: Option<String> },
    /// Delete an artifact.
    Delete { id: String },
}

struct StderrProgress;

impl ProgressObserver for StderrProgress {
    fn on_progress(&self, completed: usize, total: usize, current: &str) {
        if !current.is_empty() {
            eprintln!("[{}/{}] {}", completed + 1, total, current);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let store = SplitFileStore::new(&args.store);

    match &args.command {
        Command::Capture {
            url,
            selector,
            nth,
            label,
        } => {
            let engine = build_engine(&args, false).await?;
            let page = engine.fetch_page(url).await?;
            let mut artifact = capture_selector(&page, url, selector, *nth)?;
            artifact.custom_label = label.clone();
            let mut artifacts = store.load()?;
            artifacts.push(artifact.clone());
            store.save_all(&artifacts)?;
            println!("{}\t{}", artifact.id, artifact.display_label());
        }
        Command::List { json } => {
            let artifacts = store.load()?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&list_json(&artifacts))?);
            } else if artifacts.is_empty() {
                println!("no artifacts");
            } else {
                for a in &artifacts {
                    let state = if a.refresh_paused { "paused" } else { "active" };
                    println!("{}\t{}\t{}\t{}", a.id, state, a.display_label(), a.url);
                }
            }
        }
        Command::Refresh => {
            let engine = build_engine(&args, true).await?;
            let summary = bulk::refresh_store(&engine, &store, &StderrProgress).await?;
            for failure in &summary.failures {
                eprintln!("failed: {} ({})", failure.label, failure.reason);
            }
            println!("{}", summary);
        }
        Command::Pause { id } => edit(&store, id, |a| a.refresh_paused = true)?,
        Command::Resume { id } => edit(&store, id, |a| a.refresh_paused = false)?,
        Command::Exclude { id, selector } => {
            let selector = selector.trim();
            if selector.is_empty() {
                bail!("selector must not be empty");
            }
            edit(&store, id, |a| {
                if a.exclude(selector) {
                    let opts = SanitizeOptions::default().with_exclusions(&a.excluded_selectors);
                    a.html_cache = sanitize(&a.html_cache, &opts);
                }
            })?
        }
        Command::Label { id, label } => edit(&store, id, |a| {
            a.custom_label = label.clone().filter(|l| !l.trim().is_empty());
        })?,
        Command::Delete { id } => {
            let mut artifacts = store.load()?;
            let index = find_index(&artifacts, id)?;
            let removed = artifacts.remove(index);
            store.save_all(&artifacts)?;
            println!("deleted {}", removed.id);
        }
    }

    Ok(())
}

async fn build_engine(args: &Args, with_tabs: bool) -> Result<Engine> {
    let mut builder = Engine::builder().timeout(Duration::from_secs(args.timeout));
    for cookie in &args.cookie {
        builder = builder.cookie(cookie.clone());
    }
    if let (true, Some(endpoint)) = (with_tabs, args.cdp.as_deref()) {
        builder = builder
            .connect_browser(endpoint)
            .await
            .with_context(|| format!("connecting to browser at {}", endpoint))?;
    }
    Ok(builder.build())
}

/// Resolves an id or a unique id prefix.
fn find_index(artifacts: &[Artifact], id: &str) -> Result<usize> {
    if let Some(i) = artifacts.iter().position(|a| a.id == id) {
        return Ok(i);
    }
    let matches: Vec<usize> = artifacts
        .iter()
        .enumerate()
        .filter(|(_, a)| !id.is_empty() && a.id.starts_with(id))
        .map(|(i, _)| i)
        .collect();
    match matches.as_slice() {
        [only] => Ok(*only),
        [] => Err(anyhow!("no artifact with id {}", id)),
        _ => Err(anyhow!("id prefix {} is ambiguous", id)),
    }
}

fn edit(store: &SplitFileStore, id: &str, change: impl FnOnce(&mut Artifact)) -> Result<()> {
    let mut artifacts = store.load()?;
    let index = find_index(&artifacts, id)?;
    change(&mut artifacts[index]);
    store.save_all(&artifacts)?;
    println!("updated {}", artifacts[index].id);
    Ok(())
}

fn list_json(artifacts: &[Artifact]) -> serde_json::Value {
    let items: Vec<_> = artifacts
        .iter()
        .map(|a| {
            json!({
                "id": a.id,
                "label": a.display_label(),
                "url": a.url,
                "selector": a.selector,
                "paused": a.refresh_paused,
                "lastRefresh": a.last_refresh,
                "excludedSelectors": a.excluded_selectors,
            })
        })
        .collect();
    json!({ "artifacts": items, "total": artifacts.len() })
}
