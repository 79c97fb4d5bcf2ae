//! CLI subcommand handlers.

use crate::corpus::load_corpus;
use crate::{AskArgs, Commands, ConfigAction};
use deepsift_core::config::load_config;
use deepsift_core::providers::create_provider;
use deepsift_core::{
    ChannelEventSink, DeepsiftConfig, EmbeddingReranker, ExpandedRetrieval,
    ExpandedRetrievalInput, PipelineEvent, SectionIndex,
};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path, quiet: bool) -> anyhow::Result<()> {
    match command {
        Commands::Ask(args) => handle_ask(args, workspace, quiet).await,
        Commands::Config { action } => handle_config(action, workspace).await,
    }
}

async fn handle_ask(args: AskArgs, workspace: &Path, quiet: bool) -> anyhow::Result<()> {
    let mut config = load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    apply_overrides(&mut config, &args);

    let provider = create_provider(&config.llm)?;
    let sections = load_corpus(&args.corpus)?;
    let index = SectionIndex::build(config.search.clone(), sections)?;
    tracing::info!(
        sections = index.indexed_count(),
        model = %config.llm.model,
        "Corpus indexed"
    );

    let (sink, rx) = ChannelEventSink::channel();
    let printer = tokio::spawn(print_events(rx, quiet || args.no_events));

    let search_request = args
        .search_request
        .clone()
        .unwrap_or_else(|| args.question.clone());
    let mut engine = ExpandedRetrieval::new(provider, Arc::new(index))
        .with_event_sink(Arc::new(sink))
        .with_retrieval_config(config.retrieval.clone())
        .with_chat_session(uuid::Uuid::new_v4())
        .with_search_request(search_request);
    if config.search.rerank_model_name.is_some() {
        engine = engine.with_reranker(Arc::new(EmbeddingReranker::new(
            config.search.vector_dimensions,
        )));
    }

    let outcome = engine
        .run(ExpandedRetrievalInput {
            question: Some(args.question.clone()),
            sub_question_id: args.sub_question,
        })
        .await;

    // The sink lives inside the engine; dropping it closes the event channel.
    drop(engine);
    let _ = printer.await;

    let result = outcome?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn apply_overrides(config: &mut DeepsiftConfig, args: &AskArgs) {
    if let Some(model) = &args.model {
        config.llm.model = model.clone();
    }
    if args.stats {
        config.retrieval.enable_retrieval_stats = true;
        config.retrieval.enable_rerank_stats = true;
    }
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<PipelineEvent>, silent: bool) {
    let mut last_query_id = None;
    while let Some(event) = rx.recv().await {
        if silent {
            continue;
        }
        let mut stderr = std::io::stderr().lock();
        let _ = match &event {
            PipelineEvent::QueryToken(piece) => {
                let key = (piece.level, piece.level_question_nr, piece.query_id);
                let written = if last_query_id != Some(key) {
                    write!(
                        stderr,
                        "\n[{}_{} q{}] {}",
                        piece.level, piece.level_question_nr, piece.query_id, piece.sub_query
                    )
                } else {
                    write!(stderr, "{}", piece.sub_query)
                };
                last_query_id = Some(key);
                written
            }
            PipelineEvent::ToolResponse(response) => {
                last_query_id = None;
                writeln!(
                    stderr,
                    "\n[{}_{}] {}",
                    response.level,
                    response.level_question_nr,
                    describe_response(&response.response)
                )
            }
        };
    }
}

fn describe_response(response: &deepsift_core::SearchToolResponse) -> String {
    match response {
        deepsift_core::SearchToolResponse::Summary {
            top_sections,
            rephrased_query,
        } => match rephrased_query {
            Some(q) => format!("{} sections for \"{}\"", top_sections.len(), q),
            None => format!("{} sections", top_sections.len()),
        },
        deepsift_core::SearchToolResponse::FinalContextDocuments { sections } => {
            format!("{} context documents", sections.len())
        }
    }
}

async fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".deepsift");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let default_config = DeepsiftConfig::default();
            let toml_str = toml::to_string_pretty(&default_config)?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}
