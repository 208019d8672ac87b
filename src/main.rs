use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use kindred::catalog::sqlite::SqliteCatalog;
use kindred::catalog::{publish, Catalog, CatalogItem};
use kindred::config::{Config, EmbedBackend};
use kindred::embed::ollama::OllamaEmbedder;
use kindred::embed::Embedder;
use kindred::recommend::Recommender;
use kindred::store::{EmbeddingStore, ItemId};

#[derive(Parser)]
#[command(
    name = "kindred",
    version,
    about = "Course recommendations from what a learner already finished"
)]
struct Cli {
    /// Directory holding kindred.toml and the embedding store
    #[arg(long, global = true, default_value = ".kindred")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config (and optionally an empty catalog database)
    Init {
        /// Also create the course/progress tables
        #[arg(long)]
        with_catalog: bool,
    },
    /// Recommend items for a learner
    Recommend(RecommendArgs),
    /// Encode one item and add it to the embedding store
    Publish {
        /// Item id
        id: ItemId,
        /// Title (read from the catalog when omitted)
        #[arg(long, requires = "description")]
        title: Option<String>,
        /// Description (read from the catalog when omitted)
        #[arg(long, requires = "title")]
        description: Option<String>,
    },
    /// Encode every catalog item that has no embedding yet
    Backfill,
    /// Show embedding store and catalog statistics
    Status,
}

#[derive(Args)]
struct RecommendArgs {
    /// Learner whose completed items come from the catalog database
    #[arg(long, conflicts_with = "completed")]
    learner: Option<i64>,
    /// Completed item ids, comma-separated
    #[arg(long, value_delimiter = ',')]
    completed: Option<Vec<ItemId>>,
    /// Catalog item ids, comma-separated (default: every catalog item)
    #[arg(long, value_delimiter = ',')]
    all: Option<Vec<ItemId>>,
    /// Number of results
    #[arg(long)]
    top_n: Option<usize>,
    /// Include similarity scores
    #[arg(long)]
    scores: bool,
    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kindred=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let data_dir = cli.data_dir;
    let config = Config::load(&data_dir)?;

    match cli.command {
        Commands::Init { with_catalog } => {
            config.save(&data_dir)?;
            println!("Wrote {}", data_dir.join("kindred.toml").display());
            if with_catalog {
                let path = config.catalog_path(&data_dir);
                SqliteCatalog::create(&path)?;
                println!("Created catalog tables in {}", path.display());
            }
            Ok(())
        }
        Commands::Recommend(args) => cmd_recommend(&data_dir, &config, args),
        Commands::Publish {
            id,
            title,
            description,
        } => {
            let item = match (title, description) {
                (Some(title), Some(description)) => CatalogItem::new(id, title, description),
                _ => open_catalog(&data_dir, &config)?
                    .item(id)?
                    .with_context(|| format!("item {id} is not in the catalog"))?,
            };
            let store = open_store(&data_dir, &config);
            let embedder = build_embedder(&config)?;
            publish::publish(&store, embedder.as_ref(), &item)?;
            println!("Published embedding for item {id} ({} dims)", embedder.dimensions());
            Ok(())
        }
        Commands::Backfill => {
            let store = open_store(&data_dir, &config);
            let catalog = open_catalog(&data_dir, &config)?;
            let embedder = build_embedder(&config)?;
            let stats = publish::backfill(&store, &catalog, embedder.as_ref())?;
            println!(
                "{} items, {} already embedded, {} newly embedded, {} failed",
                stats.total_items, stats.already_embedded, stats.newly_embedded, stats.failed
            );
            Ok(())
        }
        Commands::Status => {
            let store = open_store(&data_dir, &config);
            let snapshot = store.snapshot();
            match store.path() {
                Some(path) => println!("Embedding store: {}", path.display()),
                None => println!("Embedding store: (in memory)"),
            }
            println!("  items:     {}", snapshot.len());
            match snapshot.dimension() {
                Some(d) => println!("  dimension: {d}"),
                None => println!("  dimension: -"),
            }
            println!("  model:     {}", snapshot.model().unwrap_or("-"));
            if let Some(ts) = snapshot.updated_at() {
                println!("  updated:   {}", ts.to_rfc3339());
            }

            let catalog_path = config.catalog_path(&data_dir);
            if catalog_path.exists() {
                let catalog = SqliteCatalog::open(&catalog_path)?;
                let ids = catalog.all_ids()?;
                let missing = ids.iter().filter(|id| !snapshot.contains(**id)).count();
                println!("Catalog: {}", catalog_path.display());
                println!("  items:     {}", catalog.item_count()?);
                println!("  missing embeddings: {missing}");
            } else {
                println!("Catalog: {} (not found)", catalog_path.display());
            }
            Ok(())
        }
    }
}

fn cmd_recommend(data_dir: &Path, config: &Config, args: RecommendArgs) -> Result<()> {
    let top_n = args.top_n.unwrap_or_else(|| config.effective_top_n());
    let recommender = Recommender::new(Arc::new(open_store(data_dir, config)));

    let results = match (args.learner, args.completed) {
        (Some(learner), _) => {
            let catalog = open_catalog(data_dir, config)?;
            recommender.recommend_for_learner(&catalog, learner, top_n)?
        }
        (None, Some(completed)) => {
            let completed: HashSet<ItemId> = completed.into_iter().collect();
            let all: HashSet<ItemId> = match args.all {
                Some(all) => all.into_iter().collect(),
                None => open_catalog(data_dir, config)?.all_ids()?,
            };
            recommender.recommend_scored(&completed, &all, top_n)
        }
        (None, None) => bail!("pass either --learner or --completed"),
    };

    if args.json {
        let out = if args.scores {
            serde_json::to_string_pretty(&results)?
        } else {
            let ids: Vec<ItemId> = results.iter().map(|s| s.id).collect();
            serde_json::to_string(&ids)?
        };
        println!("{out}");
        return Ok(());
    }

    if results.is_empty() {
        println!("No recommendations.");
    }
    for s in &results {
        if args.scores {
            println!("{}\t{:.4}", s.id, s.similarity);
        } else {
            println!("{}", s.id);
        }
    }
    Ok(())
}

/// Recommendations are optional, so a corrupt store is logged and replaced
/// rather than failing the command.
fn open_store(data_dir: &Path, config: &Config) -> EmbeddingStore {
    let store = EmbeddingStore::load_or_empty(config.embeddings_path(data_dir));
    if let EmbedBackend::Ollama { model, .. } = &config.embed.backend {
        store.check_model(model);
    }
    store
}

fn open_catalog(data_dir: &Path, config: &Config) -> Result<SqliteCatalog> {
    SqliteCatalog::open(&config.catalog_path(data_dir))
}

fn build_embedder(config: &Config) -> Result<Box<dyn Embedder>> {
    match &config.embed.backend {
        EmbedBackend::Ollama { model, url } => Ok(Box::new(
            OllamaEmbedder::new(url, model).context("connecting to ollama")?,
        )),
        EmbedBackend::None => {
            bail!("no embedding backend configured; set [embed.backend] in kindred.toml")
        }
    }
}
