//! Subcommand handlers. Results go to stdout; logs go to stderr.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use greenlight_core::config::GreenlightConfig;
use greenlight_core::error::{GreenlightError, Result};
use greenlight_core::{Deidentifier, WorkerPool};
use greenlight_storage::{open_store, CacheStore};
use greenlight_vector::{
    EmbedOutcome, EmbeddingCache, EmbeddingEngine, PolicyDocument, PolicyIndex, PolicySearch,
    SearchOptions,
};
use serde_json::json;
use tracing::{info, warn};

use crate::cli::{CacheAction, ConfigAction, StyleArg};

/// Read a file, or all of stdin when no file is given.
fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => Ok(std::fs::read_to_string(path)?),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_cache(config: &GreenlightConfig) -> Result<Arc<dyn CacheStore>> {
    let data_dir = config.general.resolved_data_dir();
    open_store(&config.cache, &data_dir, &config.embedding.model_name)
}

fn build_engine(config: &GreenlightConfig) -> Result<Arc<EmbeddingEngine>> {
    let store = open_cache(config)?;
    let engine = EmbeddingEngine::from_config(&config.embedding, store)?;
    let model = engine.model_info();
    info!(
        model = %model.name,
        backend = %model.backend,
        dimensions = model.dimensions,
        cache = %model.cache_backend,
        "Embedding engine ready"
    );
    Ok(Arc::new(engine))
}

fn build_deidentifier(config: &GreenlightConfig) -> Result<Arc<Deidentifier>> {
    Ok(Arc::new(Deidentifier::new(config.deid.clone())?))
}

/// Parse JSON-lines policy chunks. Blank lines are skipped.
pub fn parse_policies(content: &str) -> Result<Vec<PolicyDocument>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<PolicyDocument>(line).map_err(|e| {
                GreenlightError::Serialization(format!("policy line {}: {}", i + 1, e))
            })
        })
        .collect()
}

/// Status label and optional reason for embed output.
fn outcome_status(outcome: &EmbedOutcome) -> (&'static str, Option<String>) {
    match outcome {
        EmbedOutcome::Computed(_) => ("computed", None),
        EmbedOutcome::Cached(_) => ("cached", None),
        EmbedOutcome::Degraded { reason, .. } => ("degraded", Some(reason.to_string())),
    }
}

pub async fn deidentify(
    mut config: GreenlightConfig,
    file: Option<PathBuf>,
    as_json: bool,
    style: Option<StyleArg>,
) -> Result<()> {
    if let Some(style) = style {
        config.deid.replacement_style = style.into();
    }
    let text = read_input(file.as_deref())?;
    let deidentifier = build_deidentifier(&config)?;
    let pool = WorkerPool::from_config(&config.workers);

    let result = deidentifier.process_async(&pool, text).await;
    if as_json {
        print_json(&result)?;
    } else {
        print!("{}", result.text);
        if !result.text.ends_with('\n') {
            println!();
        }
    }

    if result.method == greenlight_core::RedactionMethod::Failed {
        return Err(GreenlightError::Deidentification(
            "note could not be de-identified".to_string(),
        ));
    }
    Ok(())
}

pub async fn embed(
    config: GreenlightConfig,
    file: Option<PathBuf>,
    batch_size: Option<usize>,
) -> Result<()> {
    let input = read_input(file.as_deref())?;
    let texts: Vec<String> = input.lines().map(str::to_string).collect();
    let engine = build_engine(&config)?;
    let pool = WorkerPool::from_config(&config.workers);
    let batch_size = batch_size.unwrap_or_else(|| engine.batch_size());

    let outcomes = engine.embed_batch_async(&pool, texts, batch_size).await;
    let degraded = outcomes.iter().filter(|o| o.is_degraded()).count();
    for (index, outcome) in outcomes.iter().enumerate() {
        let (status, reason) = outcome_status(outcome);
        let line = json!({
            "index": index,
            "status": status,
            "reason": reason,
            "vector": outcome.vector(),
        });
        println!("{}", serde_json::to_string(&line)?);
    }
    if degraded > 0 {
        warn!(degraded, total = outcomes.len(), "Some inputs returned zero vectors");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn search(
    config: GreenlightConfig,
    policies: PathBuf,
    query: Option<String>,
    file: Option<PathBuf>,
    limit: Option<usize>,
    min_score: Option<f32>,
    specialty: Option<String>,
) -> Result<()> {
    let documents = parse_policies(&std::fs::read_to_string(&policies)?)?;
    let note = match query {
        Some(q) => q,
        None => read_input(file.as_deref())?,
    };

    let engine = build_engine(&config)?;
    let batch_size = engine.batch_size();
    let search = PolicySearch::new(
        build_deidentifier(&config)?,
        engine,
        PolicyIndex::new(),
        WorkerPool::from_config(&config.workers),
    )
    .with_max_limit(config.search.max_limit);

    let total = documents.len();
    let indexed = search.index_policies(documents, batch_size).await?;
    info!(indexed, total, path = %policies.display(), "Policy file loaded");

    let defaults = SearchOptions::from_config(&config.search);
    let options = SearchOptions {
        limit: limit.unwrap_or(defaults.limit),
        min_score: min_score.unwrap_or(defaults.min_score),
        specialty,
    };
    let response = search.search(&note, &options).await?;
    print_json(&response)
}

pub async fn info(config: GreenlightConfig) -> Result<()> {
    let engine = build_engine(&config)?;
    print_json(&engine.model_info())
}

pub fn cache(config: GreenlightConfig, action: CacheAction) -> Result<()> {
    let cache = EmbeddingCache::new(open_cache(&config)?, &config.embedding.model_name);
    match action {
        CacheAction::Stats => {
            let stats = cache.stats()?;
            print_json(&json!({
                "backend": cache.backend(),
                "model": config.embedding.model_name,
                "entries": stats.entries,
                "total_bytes": stats.total_bytes,
            }))
        }
        CacheAction::Clear => {
            let removed = cache.clear()?;
            info!(removed, model = %config.embedding.model_name, "Embedding cache cleared");
            print_json(&json!({ "removed": removed }))
        }
    }
}

pub fn config(config: GreenlightConfig, config_file: &Path, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        ConfigAction::Init { force } => {
            if config_file.exists() && !force {
                return Err(GreenlightError::Config(format!(
                    "{} already exists (use --force to overwrite)",
                    config_file.display()
                )));
            }
            GreenlightConfig::default().save(config_file)?;
            println!("{}", config_file.display());
            Ok(())
        }
    }
}
