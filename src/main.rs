use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use biomapper::config::{Command, Config};
use biomapper::services::{self, DispatchOptions};
use biomapper::{MapperEngine, db};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let (config, command) = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    // Log lines go to stderr so stdout stays a clean report stream
    let _guard;
    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("biomapper.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        _guard = guard;
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    tracing::info!("Biomapper starting up");

    let pool = db::create_pool(&config.database.url).await?;
    tracing::info!("Database pool created successfully");

    let engine = MapperEngine::new(pool, &config).await?;

    if config.cache.expiry_enabled {
        let _maintenance_handle = services::start_cache_maintenance_task(
            engine.cache_service.clone(),
            Some(engine.transitivity_builder.clone()),
            config.cache.expiry_interval_secs,
        );
    }

    run_command(&engine, command).await?;

    Ok(())
}

async fn run_command(engine: &MapperEngine, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Map {
            source_id,
            source_type,
            target_type,
            resource,
            min_confidence,
            timeout,
            no_fallback,
        } => {
            let options = DispatchOptions {
                resource_name: resource,
                no_fallback,
                min_success_rate: None,
                timeout: timeout.map(Duration::from_secs_f64),
                map_options: biomapper::MapOptions {
                    min_confidence,
                    ..Default::default()
                },
            };

            match engine
                .dispatcher
                .map_entity(&source_id, &source_type, &target_type, &options)
                .await?
            {
                Some(result) => {
                    println!(
                        "{}:{} -> {}:{} (confidence {:.3}, via {})",
                        source_type,
                        source_id,
                        result.target_type,
                        result.target_id.as_deref().unwrap_or("-"),
                        result.confidence,
                        result.metadata.get("resource").map(String::as_str).unwrap_or("-"),
                    );
                },
                None => println!("No mapping found for {}:{}", source_type, source_id),
            }
        },

        Command::Batch { source_type, target_type, ids } => {
            let entities: Vec<(String, String)> = ids
                .into_iter()
                .map(|id| (id, source_type.clone()))
                .collect();
            let results = engine
                .dispatcher
                .batch_map_entities(&entities, &target_type, &DispatchOptions::default())
                .await?;

            let mapped = results.iter().filter(|entry| entry.result.is_some()).count();
            for entry in &results {
                match &entry.result {
                    Some(result) => println!(
                        "{} -> {} ({:.3})",
                        entry.source_id,
                        result.target_id.as_deref().unwrap_or("-"),
                        result.confidence
                    ),
                    None => println!("{} -> no mapping", entry.source_id),
                }
            }
            println!("Mapped {}/{} identifiers", mapped, results.len());
        },

        Command::Transitive { extended } => {
            let created = engine.transitivity_builder.build_transitive_mappings().await?;
            let extended_created = if extended {
                engine
                    .transitivity_builder
                    .build_extended_transitive_mappings()
                    .await?
            } else {
                0
            };
            println!("Created {} derived mappings ({} from extended chains)", created + extended_created, extended_created);
        },

        Command::Expire => {
            let deleted = engine.cache_service.delete_expired().await?;
            println!("Deleted {} expired mappings", deleted);
        },

        Command::Stats { days } => {
            let start = days.map(|d| (Utc::now() - ChronoDuration::days(d)).date_naive());
            let stats = engine.cache_service.get_cache_stats(start, None).await?;
            if stats.is_empty() {
                println!("No cache statistics recorded");
            }
            for day in stats {
                println!(
                    "{}  hits={} misses={} ratio={:.2} direct={} derived={} api={} transitive={}",
                    day.stats_date,
                    day.hits,
                    day.misses,
                    day.hit_ratio(),
                    day.direct_lookups,
                    day.derived_lookups,
                    day.api_calls,
                    day.transitive_derivations,
                );
            }
        },

        Command::Resources => {
            let resources = engine.registry_service.get_resources(false, None).await?;
            for resource in resources {
                println!(
                    "{}  type={} priority={} active={}",
                    resource.resource_name,
                    resource.resource_type,
                    resource.priority,
                    resource.is_active,
                );
            }
        },
    }

    Ok(())
}
