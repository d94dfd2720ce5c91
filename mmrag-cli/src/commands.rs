//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use crate::RunArgs;
use mmrag_core::config::{CONFIG_FILE_NAME, EvalOptions, MmragConfig, load_config};
use mmrag_core::dataset::{
    ImageLoader, ImageResolver, load_image_metadata, load_poison_table, load_questions,
    load_text_corpus,
};
use mmrag_core::evaluation::{EvalReport, evaluate_file};
use mmrag_core::{
    GeneratorRegistry, PoolBuilder, PoolStrategy, RagOrchestrator, RunSummary, create_encoder,
    write_results,
};
use std::path::{Path, PathBuf};

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => {
            let (summary, output) = handle_run(args, workspace, config_file).await?;
            print_run_summary(&summary, &output);
            Ok(())
        }
        Commands::Eval {
            results,
            no_plural,
            lenient,
        } => {
            let report = handle_eval(&results, no_plural, lenient, workspace, config_file)?;
            println!("{}", report.render(&results));
            Ok(())
        }
        Commands::Config { action } => handle_config(action, workspace, config_file),
    }
}

fn load(workspace: &Path, config_file: Option<&Path>) -> anyhow::Result<MmragConfig> {
    load_config(Some(workspace), config_file, None)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
}

impl RunArgs {
    fn apply(&self, config: &mut MmragConfig) {
        if let Some(strategy) = self.strategy {
            config.pool.strategy = strategy;
        }
        if let Some(output) = &self.output {
            config.output_path = output.clone();
        }
        if let Some(k) = self.top_k_images {
            config.retrieval.top_k_images = k;
        }
        if let Some(k) = self.top_k_texts {
            config.retrieval.top_k_texts = k;
        }
    }
}

async fn handle_run(
    args: RunArgs,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<(RunSummary, PathBuf)> {
    let mut config = load(workspace, config_file)?;
    args.apply(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    tracing::debug!(
        workspace = %workspace.display(),
        strategy = ?config.pool.strategy,
        encoder = ?config.encoder.kind,
        family = %config.generator.family,
        "Configuration loaded"
    );

    // Joining an absolute path replaces the base, so absolute paths pass through.
    let resolve = |p: &Path| workspace.join(p);
    let dataset = &config.dataset;

    let mut questions = load_questions(&resolve(&dataset.questions_path))?;
    if let Some(limit) = args.limit {
        questions.truncate(limit);
    }
    let metadata = load_image_metadata(&resolve(&dataset.image_metadata_path))?;

    let poison = match (config.pool.strategy, &dataset.poison_metadata_path) {
        (PoolStrategy::PoisonedCaptions, Some(path)) => Some(load_poison_table(&resolve(path))?),
        _ => None,
    };
    let corpus = match (config.pool.strategy, &dataset.text_corpus_path) {
        (PoolStrategy::TextCorpus, Some(path)) => Some(load_text_corpus(&resolve(path))?),
        _ => None,
    };

    let mut pools = PoolBuilder::new(config.pool.strategy, &metadata);
    if let Some(table) = &poison {
        pools = pools.with_poison_table(table);
    }
    if let Some(corpus) = &corpus {
        pools = pools.with_text_corpus(corpus);
    }
    let loader = ImageLoader::new(ImageResolver::new(
        resolve(&dataset.image_dir),
        dataset.image_extensions.clone(),
    ));

    let encoder = create_encoder(&config.encoder)?;
    let generator = GeneratorRegistry::with_defaults().build(&config.generator)?;
    let rag = RagOrchestrator::new(
        encoder.as_ref(),
        generator.as_ref(),
        config.retrieval,
        &config.generator,
    )?;
    let outcome = rag.run_batch(&questions, &pools, &loader, &metadata).await?;

    let output = resolve(&config.output_path);
    write_results(&output, &outcome.records)?;
    Ok((outcome.summary, output))
}

fn print_run_summary(summary: &RunSummary, output: &Path) {
    println!("==== RAG Run ====");
    println!("Questions:       {}", summary.total_questions);
    println!("Answered:        {}", summary.succeeded);
    println!("Failed:          {}", summary.failed);
    println!(
        "Not attempted:   {} (no images: {}, no texts: {})",
        summary.skipped_no_images + summary.skipped_no_texts,
        summary.skipped_no_images,
        summary.skipped_no_texts
    );
    println!("Poisoned:        {}", summary.poisoned);
    println!("Saved results to {}", output.display());
}

fn handle_eval(
    results: &Path,
    no_plural: bool,
    lenient: bool,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<EvalReport> {
    let config = load(workspace, config_file)?;
    let options = EvalOptions {
        plural_tolerant: config.evaluation.plural_tolerant && !no_plural,
        require_model_answer: config.evaluation.require_model_answer && !lenient,
        ..config.evaluation
    };
    Ok(evaluate_file(results, &options)?)
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            std::fs::create_dir_all(workspace)?;
            let config_path = config_file
                .map(Path::to_path_buf)
                .unwrap_or_else(|| workspace.join(CONFIG_FILE_NAME));
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&MmragConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace, config_file)?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}
