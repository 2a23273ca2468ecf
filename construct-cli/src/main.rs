//! Construct CLI - Browse Git-hosted model libraries as one merged tree

use clap::{Parser, Subcommand};
use colored::Colorize;
use construct_core::{
    resolve_spec, Collection, Config, ConstructError, ErrorEnvelope, GithubClient, IndexStats,
    ReloadReport, SharedApi, SharedCache, SnapshotStore, SqliteCache, SyncOptions, Synchronizer,
    TreeNode,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "construct")]
#[command(about = "Browse Git-hosted model libraries as one merged tree", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "construct.toml")]
    config: PathBuf,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Access token (overrides the variable named by remote.token_env)
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create construct.toml and the cache directory
    Init,

    /// Reload collections and print their trees
    Sync {
        /// Only reload the collection with this name
        #[arg(short, long)]
        collection: Option<String>,

        /// Skip side-car metadata
        #[arg(long)]
        no_index: bool,
    },

    /// Normalize a repository spec (<owner>/<repo>[/<path>][#<branch>])
    Resolve {
        spec: String,
    },

    /// Download a blob by its API URL
    Blob {
        url: String,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage the local snapshot cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Check that the access token is accepted
    Auth,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove every cached entry
    Clear,
    /// Remove entries not used within cache.evict_after
    Evict,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Init => cmd_init(&cli.config),
        Commands::Sync {
            collection,
            no_index,
        } => cmd_sync(&cli, collection.as_deref(), *no_index).await,
        Commands::Resolve { spec } => cmd_resolve(&cli, spec).await,
        Commands::Blob { url, output } => cmd_blob(&cli, url, output.as_deref()).await,
        Commands::Cache { action } => cmd_cache(&cli, action).await,
        Commands::Auth => cmd_auth(&cli).await,
    };

    if let Err(e) = result {
        if cli.json {
            let envelope = ErrorEnvelope::from(&e);
            match serde_json::to_string_pretty(&envelope) {
                Ok(text) => eprintln!("{}", text),
                Err(_) => eprintln!("Error: {}", e),
            }
        } else {
            eprintln!("{}: {}", "Error".red(), e);
            let hint = ErrorEnvelope::from(&e).hint;
            if !hint.is_empty() {
                eprintln!("{}: {}", "Hint".yellow(), hint);
            }
        }
        std::process::exit(1);
    }
}

/// Load the config file, falling back to defaults when it does not exist
fn load_config(path: &Path) -> construct_core::Result<Config> {
    if path.exists() {
        Config::load(path)
    } else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        Ok(Config::default())
    }
}

fn make_client(cli: &Cli, config: &Config) -> construct_core::Result<GithubClient> {
    let token = cli.token.clone().or_else(|| config.token());
    GithubClient::new(&config.remote.api_url, token, &config.remote.user_agent)
}

fn open_cache(config: &Config) -> construct_core::Result<SqliteCache> {
    SqliteCache::open(&config.cache.path)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> construct_core::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_init(config_path: &Path) -> construct_core::Result<()> {
    if config_path.exists() {
        println!("{} {}", "Exists".yellow(), config_path.display());
    } else {
        std::fs::write(config_path, construct_core::config::DEFAULT_CONFIG)?;
        println!("{} {}", "Created".green(), config_path.display());
    }

    let config = Config::load(config_path)?;
    if let Some(dir) = config.cache.path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
        if add_to_gitignore(dir)? {
            println!("{} {}/ to .gitignore", "Added".green(), dir.display());
        }
    }
    Ok(())
}

/// Append `dir/` to ./.gitignore unless already listed. Returns true if added.
fn add_to_gitignore(dir: &Path) -> construct_core::Result<bool> {
    let entry = format!("{}/", dir.display());
    let gitignore = Path::new(".gitignore");
    let existing = if gitignore.exists() {
        std::fs::read_to_string(gitignore)?
    } else {
        String::new()
    };
    if existing.lines().any(|l| l.trim() == entry) {
        return Ok(false);
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(gitignore)?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "{}", entry)?;
    Ok(true)
}

async fn cmd_sync(cli: &Cli, only: Option<&str>, no_index: bool) -> construct_core::Result<()> {
    let config = load_config(&cli.config)?;
    let mut collections = config.collections()?;
    if let Some(name) = only {
        collections.retain(|c| c.name == name);
        if collections.is_empty() {
            return Err(ConstructError::NotFound {
                resource: "collection".to_string(),
                message: name.to_string(),
            });
        }
    }
    if collections.is_empty() && !cli.json {
        println!("No collections configured in {}", cli.config.display());
        return Ok(());
    }

    let api: SharedApi = Arc::new(make_client(cli, &config)?);
    let cache: SharedCache = Arc::new(open_cache(&config)?);
    let sync = Synchronizer::new(api, cache);
    let options = SyncOptions {
        index: config.sync.index && !no_index,
    };

    let mut reports = Vec::new();
    for collection in &mut collections {
        let mut progress = |msg: &str| tracing::debug!(target: "construct::progress", "{}", msg);
        let report = sync.reload(collection, &options, &mut progress).await?;
        if !cli.json {
            print_collection(collection, &report);
        }
        reports.push(report);
    }

    if cli.json {
        let output: Vec<serde_json::Value> = collections
            .iter()
            .zip(&reports)
            .map(|(collection, report)| {
                serde_json::json!({
                    "collection": collection,
                    "failures": report.failures.iter().map(|f| serde_json::json!({
                        "spec": f.spec,
                        "error": ErrorEnvelope::from(&f.error),
                    })).collect::<Vec<_>>(),
                    "stats": report.stats,
                    "nodes": report.nodes,
                })
            })
            .collect();
        print_json(&output)?;
    }
    Ok(())
}

fn print_collection(collection: &Collection, report: &ReloadReport) {
    println!("{} {}", collection.name.bold(), format!("[{}]", collection.id).dimmed());
    if collection.members.is_empty() {
        print_tree(&collection.children, 1);
    } else {
        for member in &collection.members {
            println!("  {}", member.name.cyan());
            print_tree(&member.children, 2);
        }
    }
    for failure in &report.failures {
        eprintln!("{}: {}: {}", "Warning".yellow(), failure.spec, failure.error);
    }
    print_stats(report.nodes, &report.stats);
}

fn print_stats(nodes: usize, stats: &IndexStats) {
    println!(
        "({} nodes, {} side-cars, {} manifests, {} cache hits)",
        nodes, stats.side_cars_fetched, stats.manifests_applied, stats.cache_hits
    );
}

fn print_tree(tree: &[TreeNode], depth: usize) {
    let indent = "  ".repeat(depth);
    for node in tree {
        match node {
            TreeNode::Tree(dir) => {
                println!("{}{}", indent, format!("{}/", dir.name).blue().bold());
                print_tree(&dir.children, depth + 1);
            }
            TreeNode::Blob(blob) => {
                let facets: Vec<&str> = blob.content_types.keys().map(|ct| ct.as_str()).collect();
                let keywords = blob
                    .meta
                    .as_ref()
                    .and_then(|m| m.get(construct_core::meta::KEYWORDS))
                    .and_then(|k| k.as_str())
                    .map(|k| format!(" {}", k.cyan()))
                    .unwrap_or_default();
                println!(
                    "{}{} {}{}",
                    indent,
                    blob.name,
                    format!("[{}]", facets.join(", ")).dimmed(),
                    keywords
                );
            }
        }
    }
}

async fn cmd_resolve(cli: &Cli, spec: &str) -> construct_core::Result<()> {
    let config = load_config(&cli.config)?;
    let client = make_client(cli, &config)?;
    let resolved = resolve_spec(&client, spec).await?;

    if cli.json {
        print_json(&serde_json::json!({
            "repr": resolved.to_string(),
            "repo": resolved.full_name(),
            "path": resolved.path,
            "branch": resolved.branch,
        }))
    } else {
        println!("{}", resolved.to_string().green());
        Ok(())
    }
}

async fn cmd_blob(cli: &Cli, url: &str, output: Option<&Path>) -> construct_core::Result<()> {
    let config = load_config(&cli.config)?;
    let api: SharedApi = Arc::new(make_client(cli, &config)?);
    let cache: SharedCache = Arc::new(open_cache(&config)?);
    let store = SnapshotStore::new(api, cache);
    let bytes = store.download_raw(url).await?;

    match output {
        Some(path) => {
            std::fs::write(path, &bytes)?;
            if cli.json {
                print_json(&serde_json::json!({ "path": path, "bytes": bytes.len() }))?;
            } else {
                println!("{}: {} ({} bytes)", "Wrote".green(), path.display(), bytes.len());
            }
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

async fn cmd_cache(cli: &Cli, action: &CacheAction) -> construct_core::Result<()> {
    use construct_core::CachePort;

    let config = load_config(&cli.config)?;
    let cache = open_cache(&config)?;

    match action {
        CacheAction::Clear => {
            let count = cache.len().await?;
            cache.clear().await?;
            if cli.json {
                print_json(&serde_json::json!({ "entries_removed": count }))?;
            } else {
                println!("{}: {} entries removed", "Cleared".yellow(), count);
            }
        }
        CacheAction::Evict => {
            let window = config.evict_after();
            let count = cache.evict_older_than(window).await?;
            if cli.json {
                print_json(&serde_json::json!({
                    "entries_removed": count,
                    "evict_after": config.cache.evict_after,
                }))?;
            } else {
                println!(
                    "{}: {} entries not used within {}",
                    "Evicted".yellow(),
                    count,
                    config.cache.evict_after
                );
            }
        }
    }
    Ok(())
}

async fn cmd_auth(cli: &Cli) -> construct_core::Result<()> {
    let config = load_config(&cli.config)?;
    if cli.token.is_none() && config.token().is_none() {
        return Err(ConstructError::RemoteApi {
            status: Some(401),
            message: format!("no token given and ${} is not set", config.remote.token_env),
        });
    }

    let client = make_client(cli, &config)?;
    if !client.verify_token().await? {
        return Err(ConstructError::RemoteApi {
            status: Some(401),
            message: "token rejected".to_string(),
        });
    }
    if cli.json {
        print_json(&serde_json::json!({ "valid": true }))
    } else {
        println!("{}: token accepted", "Auth".green());
        Ok(())
    }
}
