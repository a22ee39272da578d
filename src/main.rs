use clap::Parser;
use docsift::{
    ConfigDb,
    DataDir,
    IndexStore,
    Result,
    Settings,
    cli::{Cli, Command, ConfigAction},
    config_db::Setting,
    format,
    ingestion::{self, IngestOptions, IngestReport},
    mcp,
    search,
};
use kdam::BarExt;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCSIFT_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;
    let settings = Settings::resolve(&config_db, &cli.overrides())?;

    match &cli.command {
        Command::Build(args) => {
            let corpus = settings.require_corpus_root()?;
            let store = IndexStore::open(&data_dir, settings.vector_backend)?;
            let indexer = settings.indexer()?;
            let mut progress = progress_bar("Indexing", cli.quiet);
            let report = ingestion::build(
                &store,
                &indexer,
                corpus,
                &IngestOptions::default(),
                args.clean,
                &mut progress,
            )?;
            print_ingest_report(&report);
        }
        Command::Update => {
            let corpus = settings.require_corpus_root()?;
            let store = IndexStore::open(&data_dir, settings.vector_backend)?;
            let indexer = settings.indexer()?;
            let mut progress = progress_bar("Updating", cli.quiet);
            let report = ingestion::update(
                &store,
                &indexer,
                corpus,
                &IngestOptions::default(),
                &mut progress,
            )?;
            print_ingest_report(&report);
        }
        Command::Search(args) => {
            let store = IndexStore::open(&data_dir, settings.vector_backend)?;
            let indexer = settings.indexer()?;
            let response = search::retrieve(&store, &indexer, &args.request())?;
            if args.json {
                println!("{}", format::render_json(&response)?);
            } else {
                print!("{}", format::render_text(&response));
            }
        }
        Command::Stats(args) => {
            let store = IndexStore::open(&data_dir, settings.vector_backend)?;
            cmd_stats(&store, &data_dir, args.json)?;
        }
        Command::Repair => {
            let store = IndexStore::open(&data_dir, settings.vector_backend)?;
            let report = store.repair(&settings.indexer()?)?;
            eprintln!(
                "Removed {}, re-indexed lexical {}, re-embedded {}, failed {}",
                report.removed,
                report.relexed,
                report.reembedded,
                report.failed.len()
            );
        }
        Command::RebuildIndex => {
            let store = IndexStore::open(&data_dir, settings.vector_backend)?;
            let indexer = settings.indexer()?;
            let mut progress = progress_bar("Rebuilding", cli.quiet);
            let report = ingestion::rebuild_index(
                &store,
                &indexer,
                &IngestOptions::default(),
                &mut progress,
            )?;
            print_ingest_report(&report);
        }
        Command::Config { action } => match action {
            ConfigAction::Show { json } => {
                cmd_config_show(&config_db, &settings, &data_dir, *json)?;
            }
            ConfigAction::Set { key, value } => {
                let setting: Setting = key.parse()?;
                config_db.set(setting, value)?;
                println!("Set {key} = {}", value.trim());
            }
            ConfigAction::Unset { key } => {
                let setting: Setting = key.parse()?;
                if config_db.remove_setting(setting.key())? {
                    println!("Cleared {key}");
                } else {
                    println!("{key} was not set");
                }
            }
        },
        Command::Mcp => {
            mcp::run_mcp(&data_dir, &settings)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

/// A progress callback drawing a kdam bar on stderr. The bar is created on
/// the first call, once the total is known.
fn progress_bar(desc: &'static str, quiet: bool) -> impl FnMut(usize, usize) {
    let mut bar: Option<kdam::Bar> = None;
    move |done, total| {
        if quiet || total == 0 {
            return;
        }
        let pb = bar.get_or_insert_with(|| {
            kdam::tqdm!(total = total, desc = desc, unit = " chunks", leave = true)
        });
        pb.update_to(done).ok();
        if done >= total {
            eprintln!();
        }
    }
}

fn print_ingest_report(report: &IngestReport) {
    eprintln!(
        "Documents: {} new, {} changed, {} unchanged, {} removed",
        report.new_docs, report.changed_docs, report.unchanged_docs, report.removed_docs
    );
    eprintln!(
        "Chunks: {} indexed, {} removed",
        report.chunks_indexed, report.chunks_removed
    );
    if !report.failed.is_empty() {
        eprintln!(
            "{} chunk(s) could not be embedded; run `docsift repair` to retry",
            report.failed.len()
        );
    }
}

fn cmd_stats(store: &IndexStore, data_dir: &DataDir, json: bool) -> Result<()> {
    let stats = store.stats()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let c = &stats.consistency;
    println!("Data directory: {}", data_dir.root().display());
    println!("Documents: {}", stats.documents);
    println!("Chunks: {}", stats.chunks);
    println!("Vectors: {} ({} backend)", stats.vectors, stats.backend);
    println!("Lexical rows: {}", stats.lexical_rows);
    if let Some(dim) = stats.dimension {
        println!("Dimension: {dim}");
    }
    println!("Index size: {} bytes", stats.disk_bytes);
    match stats.last_indexed_at {
        Some(ts) => println!("Last indexed: {ts} (unix seconds)"),
        None => println!("Last indexed: never"),
    }
    if c.is_consistent() {
        println!("Consistency: ok");
    } else {
        println!("Consistency: needs `docsift repair`");
        println!("  missing vectors: {}", c.missing_vectors.len());
        println!("  missing lexical rows: {}", c.missing_lexical.len());
        println!("  orphan lexical rows: {}", c.orphan_lexical.len());
        println!("  orphan vectors: {}", c.orphan_vectors.len());
        println!("  torn rows: {}", c.torn.len());
        println!("  stale document summaries: {}", c.stale_documents);
    }
    Ok(())
}

fn cmd_config_show(
    config_db: &ConfigDb,
    settings: &Settings,
    data_dir: &DataDir,
    json: bool,
) -> Result<()> {
    let corpus = settings
        .corpus_root
        .as_ref()
        .map(|p| p.display().to_string());
    let embedder = &settings.embedder;

    if json {
        let stored: serde_json::Map<String, serde_json::Value> = config_db
            .list_settings()?
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();
        let value = serde_json::json!({
            "data_dir": data_dir.root().display().to_string(),
            "corpus_root": corpus,
            "embedder": embedder.kind,
            "embed_url": embedder.url,
            "embed_model": embedder.model,
            "embed_dimension": embedder.dimension,
            "embed_batch_size": settings.batch_size,
            "embed_concurrency": settings.concurrency,
            "embed_max_attempts": settings.retry.max_attempts,
            "vector_backend": settings.vector_backend.as_str(),
            "stored": stored,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("data_dir = {}", data_dir.root().display());
    println!("corpus_root = {}", corpus.as_deref().unwrap_or("(unset)"));
    println!("embedder = {}", embedder.kind);
    println!("embed_url = {}", embedder.url);
    println!("embed_model = {}", embedder.model);
    println!("embed_dimension = {}", embedder.dimension);
    println!("embed_batch_size = {}", settings.batch_size);
    println!("embed_concurrency = {}", settings.concurrency);
    println!("embed_max_attempts = {}", settings.retry.max_attempts);
    println!("vector_backend = {}", settings.vector_backend.as_str());
    Ok(())
}
