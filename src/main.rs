use ragcore::cli::{Cli, Commands, ConfigAction, GraphAction, LibraryAction, ProfileAction};
use ragcore::config::{expand_path, Config};
use ragcore::embedding::create_provider;
use ragcore::entities::{EntityExtractor, GraphBuilder, GraphRegistry, RebuildReport, RuleBasedExtractor};
use ragcore::error::{RagError, Result};
use ragcore::ingest::Importer;
use ragcore::profile::{LibraryType, ProfileDraft, ProfileStore, ProfileUpdate, RetrievalProfile};
use ragcore::retrieval::{cancel_pair, HybridSearcher, RetrievalOutcome, RetrievalReport, SearchRequest};
use ragcore::session::{ConversationContext, Role};
use ragcore::storage::{ChunkStore, Database, Library, SqliteChunkStore, SqliteSnapshotStore};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    match cli.command {
        Commands::Library { action } => cmd_library(cli.config, action)?,
        Commands::Import {
            library,
            path,
            no_graph,
        } => cmd_import(cli.config, &library, &path, no_graph)?,
        Commands::Search {
            query,
            libraries,
            top_k,
            profile,
            session,
            json,
        } => cmd_search(cli.config, &query, &libraries, top_k, profile, session, json)?,
        Commands::Graph { action } => cmd_graph(cli.config, action)?,
        Commands::Profile { action } => cmd_profile(cli.config, action)?,
        Commands::Config { action } => cmd_config(cli.config, action)?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "ragcore=debug" } else { "ragcore=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| RagError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

/// Stores opened over one database
struct App {
    config: Config,
    libraries: Arc<SqliteChunkStore>,
    profiles: ProfileStore,
    graphs: Arc<GraphRegistry>,
    extractor: Arc<RuleBasedExtractor>,
}

impl App {
    fn open(config_path: Option<PathBuf>) -> Result<Self> {
        let config = load_config(config_path)?;
        let db = Arc::new(Database::new(&config.storage.database_path()?)?);

        let libraries = Arc::new(SqliteChunkStore::with_index_dir(
            Arc::clone(&db),
            &config.storage.keyword_index_path()?,
        )?);
        let profiles = ProfileStore::new(Arc::clone(&db))?;
        let graphs = if config.graph.persist_snapshots {
            GraphRegistry::with_persistence(Arc::new(SqliteSnapshotStore::new(db)))
        } else {
            GraphRegistry::new()
        };
        let extractor = Arc::new(
            RuleBasedExtractor::new()?.with_max_entities(config.graph.max_entities_per_chunk),
        );

        Ok(Self {
            config,
            libraries,
            profiles,
            graphs: Arc::new(graphs),
            extractor,
        })
    }

    fn rebuild_graph(&self, library: &Library) -> Result<RebuildReport> {
        let chunks = self.libraries.library_chunks(library.id)?;
        let builder = GraphBuilder::new(Arc::clone(&self.extractor) as Arc<dyn EntityExtractor>);
        self.graphs.rebuild(library.id, &chunks, &builder)
    }

    fn data_dir(&self) -> Result<PathBuf> {
        expand_path(&self.config.storage.data_dir)
    }
}

fn cmd_library(config_path: Option<PathBuf>, action: LibraryAction) -> Result<()> {
    let app = App::open(config_path)?;
    match action {
        LibraryAction::Create {
            name,
            library_type,
            profile,
        } => {
            let library_type: LibraryType = library_type.parse()?;
            let profile_id = match profile {
                Some(profile) => Some(app.profiles.find(&profile)?.id),
                None => None,
            };
            let library = app.libraries.create_library(&name, library_type)?;
            if profile_id.is_some() {
                app.libraries.set_library_profile(library.id, profile_id)?;
            }
            println!("✓ Created library {} ({})", library.name, library.id);
            println!("  Type: {}", library.library_type);
        }
        LibraryAction::List => {
            let libraries = app.libraries.list_libraries()?;
            if libraries.is_empty() {
                println!("No libraries yet. Create one with 'ragcore library create <name>'.");
            }
            for library in libraries {
                let profile = match library.profile_id {
                    Some(id) => app
                        .profiles
                        .get(id)
                        .map(|p| p.profile_key.clone())
                        .unwrap_or_else(|_| "missing".to_string()),
                    None => "type default".to_string(),
                };
                println!(
                    "  {} - {} (profile: {}, created {})",
                    library.name,
                    library.library_type,
                    profile,
                    library.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        LibraryAction::SetProfile { library, profile } => {
            let library = app.libraries.find_library(&library)?;
            let profile_id = match profile {
                Some(profile) => Some(app.profiles.find(&profile)?.id),
                None => None,
            };
            app.libraries.set_library_profile(library.id, profile_id)?;
            println!("✓ Updated profile of {}", library.name);
        }
    }
    Ok(())
}

fn cmd_import(config_path: Option<PathBuf>, library: &str, path: &Path, no_graph: bool) -> Result<()> {
    let app = App::open(config_path)?;
    let library = app.libraries.find_library(library)?;
    let embedder = create_provider(&app.config.embedding);
    let importer = Importer::new(
        Arc::clone(&app.libraries) as Arc<dyn ChunkStore>,
        embedder,
        &app.config.embedding,
        app.config.import.clone(),
    );

    let report = runtime()?.block_on(importer.import_path(library.id, path))?;
    println!("✓ Imported into {}", library.name);
    println!(
        "  Files: {} imported, {} unchanged",
        report.files_imported, report.files_unchanged
    );
    println!("  Chunks: {}", report.chunks_written);
    if report.embeddings_failed > 0 {
        println!(
            "  ⚠ {} chunks have no embedding and are reachable by keyword and graph only",
            report.embeddings_failed
        );
    }
    for (file, reason) in &report.skipped {
        println!("  ⚠ Skipped {}: {}", file, reason);
    }

    if !no_graph && report.files_imported > 0 {
        let rebuilt = app.rebuild_graph(&library)?;
        println!("✓ {}", rebuilt.message);
    }
    Ok(())
}

fn cmd_search(
    config_path: Option<PathBuf>,
    query: &str,
    libraries: &[String],
    top_k: Option<usize>,
    profile: Option<String>,
    session: Option<String>,
    json: bool,
) -> Result<()> {
    let app = App::open(config_path)?;
    let scope: Vec<Library> = libraries
        .iter()
        .map(|name| app.libraries.find_library(name))
        .collect::<Result<_>>()?;

    // Scope is non-empty: clap requires at least one library
    let first = &scope[0];
    let profile: Arc<RetrievalProfile> = match profile {
        Some(profile) => app.profiles.find(&profile)?,
        None => app.profiles.resolve(first.profile_id, first.library_type)?,
    };
    tracing::debug!("Searching with profile {} v{}", profile.profile_key, profile.version);

    let data_dir = app.data_dir()?;
    let mut context = match &session {
        Some(name) => Some(ConversationContext::load_or_new(
            &data_dir,
            name,
            app.config.retrieval.history_turns,
        )?),
        None => None,
    };

    let searcher = HybridSearcher::new(
        Arc::clone(&app.libraries) as Arc<dyn ChunkStore>,
        create_provider(&app.config.embedding),
        Arc::clone(&app.graphs),
        Arc::clone(&app.extractor) as Arc<dyn EntityExtractor>,
        app.config.retrieval.clone(),
    )?;
    let request = SearchRequest::new(
        query,
        scope.iter().map(|l| l.id).collect(),
        top_k.unwrap_or(app.config.retrieval.default_top_k),
    );

    let report = runtime()?.block_on(async {
        let (handle, signal) = cancel_pair();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                handle.cancel();
            }
        });
        let report = searcher
            .search(&request, Arc::clone(&profile), context.as_ref(), Some(signal))
            .await;
        watcher.abort();
        report
    })?;

    if let Some(context) = context.as_mut() {
        let asked = app.extractor.extract_names(query, 6);
        context.push(Role::User, query, asked);
        let mut cited: Vec<String> = Vec::new();
        for fragment in report.outcome.fragments() {
            for entity in fragment.citation.matched_entities.iter().flatten() {
                if !cited.contains(entity) {
                    cited.push(entity.clone());
                }
            }
        }
        let summary = format!("{} cited fragments", report.outcome.fragments().len());
        context.push(Role::Assistant, summary, cited);
        context.save(&data_dir)?;
    }

    if json {
        let out = serde_json::to_string_pretty(&report).map_err(|e| RagError::Json {
            source: e,
            context: "Failed to serialize retrieval report".to_string(),
        })?;
        println!("{}", out);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &RetrievalReport) {
    for channel in report.degraded_channels() {
        println!("⚠ {} channel unavailable, results use the remaining channels", channel);
    }
    if report.summary_fallback {
        println!("⚠ Too few distinct files for a summary, answered as an ordinary question");
    }

    match &report.outcome {
        RetrievalOutcome::Grounded { fragments } => {
            println!(
                "{} fragments ({:?} mode, tier {:?}, profile {} v{})",
                fragments.len(),
                report.mode,
                report.final_tier(),
                report.profile_key,
                report.profile_version
            );
            for (i, fragment) in fragments.iter().enumerate() {
                let citation = &fragment.citation;
                println!(
                    "\n[{}] {} #{}  score {:.3} via {}",
                    i + 1,
                    citation.file_name,
                    citation.chunk_id,
                    citation.score,
                    citation.source_channel
                );
                println!("    {}", citation.snippet.replace('\n', " "));
                if let Some(entities) = &citation.matched_entities {
                    println!("    entities: {}", entities.join(", "));
                }
            }
        }
        RetrievalOutcome::InsufficientEvidence {
            best_score,
            message,
        } => {
            println!("{} (best score {:.3})", message, best_score);
        }
    }
}

fn cmd_graph(config_path: Option<PathBuf>, action: GraphAction) -> Result<()> {
    let app = App::open(config_path)?;
    match action {
        GraphAction::Rebuild { library } => {
            let library = app.libraries.find_library(&library)?;
            let report = app.rebuild_graph(&library)?;
            println!("✓ {} (v{})", report.message, report.version);
        }
        GraphAction::Show {
            library,
            nodes,
            edges,
        } => {
            let library = app.libraries.find_library(&library)?;
            match app.graphs.snapshot(library.id)? {
                Some(snapshot) => {
                    let view = snapshot.view(
                        nodes.unwrap_or(app.config.graph.view_node_limit),
                        edges.unwrap_or(app.config.graph.view_edge_limit),
                    );
                    let out = serde_json::to_string_pretty(&view).map_err(|e| RagError::Json {
                        source: e,
                        context: "Failed to serialize graph view".to_string(),
                    })?;
                    println!("{}", out);
                }
                None => println!(
                    "No graph for {} yet. Run 'ragcore graph rebuild {}'.",
                    library.name, library.name
                ),
            }
        }
    }
    Ok(())
}

/// Profile import file: one draft or a list of drafts
#[derive(Deserialize)]
#[serde(untagged)]
enum DraftFile {
    Many(Vec<ProfileDraft>),
    One(Box<ProfileDraft>),
}

fn cmd_profile(config_path: Option<PathBuf>, action: ProfileAction) -> Result<()> {
    let app = App::open(config_path)?;
    match action {
        ProfileAction::List => {
            for profile in app.profiles.list()? {
                let mut flags = Vec::new();
                if profile.is_default {
                    flags.push("default");
                }
                if profile.is_builtin {
                    flags.push("builtin");
                }
                if !profile.is_active {
                    flags.push("inactive");
                }
                println!(
                    "  {} v{} - {} [{}] {}",
                    profile.profile_key,
                    profile.version,
                    profile.name,
                    profile.library_type,
                    flags.join(", ")
                );
            }
        }
        ProfileAction::Show { profile } => {
            let profile = app.profiles.find(&profile)?;
            let out = serde_json::to_string_pretty(profile.as_ref()).map_err(|e| RagError::Json {
                source: e,
                context: "Failed to serialize profile".to_string(),
            })?;
            println!("{}", out);
        }
        ProfileAction::Import { file } => {
            let content = std::fs::read_to_string(&file).map_err(|e| RagError::Io {
                source: e,
                context: format!("Failed to read profile file: {:?}", file),
            })?;
            let drafts = match serde_json::from_str::<DraftFile>(&content).map_err(|e| {
                RagError::Json {
                    source: e,
                    context: format!("Invalid profile file: {:?}", file),
                }
            })? {
                DraftFile::Many(drafts) => drafts,
                DraftFile::One(draft) => vec![*draft],
            };
            for draft in drafts {
                let profile = app.profiles.upsert(draft)?;
                println!("✓ {} v{}", profile.profile_key, profile.version);
            }
        }
        ProfileAction::SetDefault { profile } => {
            let profile = app.profiles.find(&profile)?;
            app.profiles.set_default(profile.id)?;
            println!("✓ {} is now the default profile", profile.profile_key);
        }
        ProfileAction::SetActive { profile, active } => {
            let profile = app.profiles.find(&profile)?;
            let updated = app.profiles.update(
                profile.id,
                ProfileUpdate {
                    is_active: Some(active),
                    ..ProfileUpdate::default()
                },
            )?;
            println!(
                "✓ {} is now {} (v{})",
                updated.profile_key,
                if active { "active" } else { "inactive" },
                updated.version
            );
        }
        ProfileAction::Delete { profile } => {
            let profile = app.profiles.find(&profile)?;
            app.profiles.delete(profile.id)?;
            println!("✓ Deleted {}", profile.profile_key);
        }
    }
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            let out = toml::to_string_pretty(&config)?;
            println!("{}", out);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| RagError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
        ConfigAction::Path => {
            println!("{}", Config::default_path()?.display());
        }
    }
    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!("Config file not found, using defaults. Run 'ragcore config init' to create one.");
        let mut config = Config::default();
        config.apply_env_overrides();
        return Ok(config);
    }

    Config::load(&path)
}
