use crate::cli::commands::{Cli, Commands, TargetArgs};
use anyhow::{Context, Result, bail};
use contentforge::config::Config;
use contentforge::error::ForgeError;
use contentforge::generation::{
    ContentKind, GenerationOptions, GenerationPipeline, GenerationRequest, GenerationResult,
    conflict_key,
};
use contentforge::providers::ProviderRegistry;
use contentforge::storage;
use std::fmt::Write as _;
use std::path::PathBuf;

/// Wire registry, record store and blob store from `config`.
pub async fn build_pipeline(config: &Config) -> Result<GenerationPipeline> {
    let registry = ProviderRegistry::from_config(&config.providers)?;
    let records = storage::create_record_store(config).await?;
    let blobs = storage::create_blob_store(config);
    GenerationPipeline::from_config(config, registry, records, blobs)
}

pub async fn dispatch(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Generate {
            target,
            prompt,
            prompt_file,
            providers,
            models,
            title,
            category,
            force,
        } => {
            let payload = read_payload(prompt, prompt_file).await?;
            let request = GenerationRequest::new(target.kind.into(), target.identity(), payload)
                .with_providers(providers)
                .with_options(GenerationOptions {
                    models: models.into_iter().collect(),
                    title,
                    category,
                    force_regenerate: force,
                    ..GenerationOptions::default()
                });

            let pipeline = build_pipeline(&config).await?;
            match pipeline.generate(&request).await {
                Ok(result) => {
                    println!("{}", render_result(&result));
                    Ok(())
                }
                Err(ForgeError::PersistenceFailed { source, result }) => {
                    eprintln!("{}", render_result(&result));
                    bail!("Artifact generated but not stored: {source}")
                }
                Err(e) => Err(e.into()),
            }
        }
        Commands::Show { target } => run_show(&config, &target).await,
        Commands::Providers => {
            let registry = ProviderRegistry::from_config(&config.providers)?;
            print!("{}", render_providers(&config, &registry));
            Ok(())
        }
    }
}

async fn read_payload(prompt: Option<String>, prompt_file: Option<PathBuf>) -> Result<String> {
    match (prompt, prompt_file) {
        (Some(prompt), _) => Ok(prompt),
        (None, Some(path)) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read prompt file: {}", path.display())),
        (None, None) => bail!("Provide --prompt or --prompt-file"),
    }
}

async fn run_show(config: &Config, target: &TargetArgs) -> Result<()> {
    let records = storage::create_record_store(config).await?;
    let identity = target.identity();
    let key = conflict_key(target.kind.into(), &identity);

    match records.find_latest(&key).await? {
        Some(record) => {
            let artifact = record.to_artifact()?;
            println!("{}", serde_json::to_string_pretty(&artifact)?);
        }
        None => println!("No artifact stored for {identity}"),
    }
    Ok(())
}

fn render_result(result: &GenerationResult) -> String {
    let mut out = String::new();
    let source = result
        .source_tag()
        .map_or_else(|| "-".to_string(), ToString::to_string);
    let _ = writeln!(out, "checksum:  {}", result.checksum);
    let _ = writeln!(out, "source:    {source}");
    let _ = writeln!(out, "model:     {}", result.model.as_deref().unwrap_or("-"));
    let _ = writeln!(out, "cache hit: {}", result.cache_hit);
    let _ = writeln!(out, "fallback:  {}", result.used_fallback);
    if let Some(location) = result
        .artifact
        .as_ref()
        .and_then(|artifact| artifact.storage_location.as_deref())
    {
        let _ = writeln!(out, "stored at: {location}");
    }
    if !result.skipped_providers.is_empty() {
        let _ = writeln!(out, "skipped:   {}", result.skipped_providers.join(", "));
    }
    if !result.attempts.is_empty() {
        out.push_str("attempts:\n");
        for attempt in &result.attempts {
            let _ = write!(
                out,
                "  - {} ({}) #{}: {}",
                attempt.provider_id, attempt.model, attempt.attempt, attempt.outcome
            );
            if let Some(detail) = &attempt.error_detail {
                let _ = write!(out, " - {detail}");
            }
            out.push('\n');
        }
    }
    out.trim_end().to_string()
}

fn render_providers(config: &Config, registry: &ProviderRegistry) -> String {
    let mut out = String::new();
    for (kind, order) in [
        (ContentKind::Text, &config.providers.text_order),
        (ContentKind::Image, &config.providers.image_order),
    ] {
        let _ = writeln!(out, "{kind} order:");
        for name in order {
            match registry.get(name) {
                Some(provider) => {
                    let credentials = if provider.has_credentials() {
                        "configured"
                    } else {
                        "missing"
                    };
                    let _ = writeln!(
                        out,
                        "  {:<14} model={:<26} credentials={credentials}",
                        provider.name(),
                        provider.default_model()
                    );
                }
                None => {
                    let _ = writeln!(out, "  {name:<14} (unknown provider)");
                }
            }
        }
    }
    out
}
