//! CLI route: single route table and run context. Dispatches to the coordinator and presentation.

use crate::cli::parse::{Commands, SpecArgs};
use crate::cli::presentation::{
    format_events, format_fingerprint, format_generation_json, format_generation_table,
    GenerationRow,
};
use crate::config::{ConfigLoader, ForgeConfig};
use crate::coordinator::GenerationCoordinator;
use crate::events::{EventBus, JobEvent};
use crate::queue::JobOptions;
use crate::request::{EnginePreference, GenerationSpec, MaterialStyle};
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Runtime context for CLI execution: the loaded configuration and where it came from.
pub struct RunContext {
    config: ForgeConfig,
    config_path: Option<PathBuf>,
}

impl RunContext {
    /// Load configuration from the global file, `config_path` and the environment.
    pub fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let mut loader = ConfigLoader::new();
        if let Some(path) = &config_path {
            loader = loader.with_file(path);
        }
        let config = loader.load().context("Failed to load configuration")?;
        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn from_config(config: ForgeConfig) -> Self {
        Self {
            config,
            config_path: None,
        }
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn execute(&self, command: &Commands) -> Result<String> {
        match command {
            Commands::Generate {
                prompts,
                spec,
                priority,
                max_attempts,
                format,
                events,
            } => {
                let mut options = JobOptions::default().with_priority(*priority);
                if let Some(max_attempts) = max_attempts {
                    options = options.with_max_attempts(*max_attempts);
                }
                let specs = prompts
                    .iter()
                    .map(|prompt| build_spec(prompt, spec))
                    .collect::<Result<Vec<_>>>()?;
                let runtime = tokio::runtime::Runtime::new()
                    .context("Failed to start async runtime")?;
                runtime.block_on(self.handle_generate(specs, options, format, *events))
            }
            Commands::Fingerprint { prompt, spec } => {
                let generation = build_spec(&prompt.join(" "), spec)?;
                generation.validate()?;
                Ok(format_fingerprint(
                    &generation.normalized_prompt(),
                    &generation.fingerprint().to_string(),
                ))
            }
            Commands::Config => Ok(self.config.to_redacted_toml()?),
        }
    }

    async fn handle_generate(
        &self,
        specs: Vec<GenerationSpec>,
        options: JobOptions,
        format: &str,
        show_events: bool,
    ) -> Result<String> {
        let (bus, receiver) = if show_events {
            let (bus, receiver) = EventBus::new_pair();
            (Some(bus), Some(receiver))
        } else {
            (None, None)
        };
        let coordinator = GenerationCoordinator::from_config(&self.config, bus)?;
        coordinator.start();
        info!(jobs = specs.len(), "Generating models");

        let prompts: Vec<String> = specs.iter().map(|s| s.prompt.clone()).collect();
        let outcomes = futures::future::join_all(
            specs
                .into_iter()
                .map(|spec| coordinator.generate_with(spec, options)),
        )
        .await;
        let stats = coordinator.queue().stats();
        coordinator.stop().await;
        debug!(?stats, "Generation finished");

        let rows: Vec<GenerationRow> = prompts
            .into_iter()
            .zip(outcomes)
            .map(|(prompt, outcome)| GenerationRow { prompt, outcome })
            .collect();

        let mut output = match format {
            "json" => format_generation_json(&rows)?,
            "table" | "text" => format_generation_table(&rows, &stats),
            other => return Err(anyhow!("Unknown output format '{}' (use table or json)", other)),
        };
        if let Some(receiver) = receiver {
            let events: Vec<JobEvent> = receiver.try_iter().collect();
            if !events.is_empty() {
                output.push('\n');
                output.push_str(&format_events(&events));
            }
        }
        Ok(output)
    }
}

fn build_spec(prompt: &str, args: &SpecArgs) -> Result<GenerationSpec> {
    let engine: EnginePreference = args.engine.parse().map_err(|e: String| anyhow!(e))?;
    let style: MaterialStyle = args.style.parse().map_err(|e: String| anyhow!(e))?;
    Ok(GenerationSpec::new(prompt)
        .with_engine(engine)
        .with_complexity(args.complexity)
        .with_detail_level(args.detail)
        .with_material_style(style))
}
