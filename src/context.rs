//! Application context: the table and agent built once at startup.
//!
//! Startup runs ingestion, sampling, and agent construction exactly once, in
//! that order. Any failure along the way aborts startup; there is no
//! degraded mode. The resulting [`AppContext`] is immutable and is handed to
//! the HTTP router (or the `ask` command) by reference.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::agent::{create_table_agent, AgentOptions};
use crate::config::Config;
use crate::ingest::load_inspection_table;
use crate::llm::create_model;
use crate::models::InspectionTable;
use crate::progress::IngestProgressReporter;
use crate::sample::sample_with_config;
use crate::traits::{LanguageModel, QueryAgent};

/// Process-lifetime state shared by every request.
#[derive(Clone)]
pub struct AppContext {
    /// The sampled table the agent is bound to.
    pub table: Arc<InspectionTable>,
    pub agent: Arc<dyn QueryAgent>,
}

impl AppContext {
    pub fn new(table: Arc<InspectionTable>, agent: Arc<dyn QueryAgent>) -> Self {
        Self { table, agent }
    }

    /// Load, sample, and bind an agent backed by the configured model.
    pub async fn initialize(
        config: &Config,
        progress: &dyn IngestProgressReporter,
    ) -> Result<Self> {
        let model = create_model(&config.agent)?;
        Self::initialize_with_model(config, progress, model).await
    }

    /// Like [`initialize`](Self::initialize) with a caller-supplied model.
    pub async fn initialize_with_model(
        config: &Config,
        progress: &dyn IngestProgressReporter,
        model: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        let (table, _report) = load_inspection_table(&config.data, progress)
            .await
            .context("Failed to load inspection data")?;

        let sampled = Arc::new(sample_with_config(&table, &config.sampling)?);
        println!(
            "Sampled down to {} records ({}% of {}) for query use.",
            sampled.len(),
            config.sampling.fraction * 100.0,
            table.len()
        );

        tracing::info!(
            model = model.model_name(),
            url = config.agent.base_url(),
            "initializing table agent; the model must already be available"
        );
        let agent = create_table_agent(model, sampled.clone(), AgentOptions::from(&config.agent))
            .context("Failed to initialize table agent")?;

        Ok(Self::new(sampled, Arc::new(agent)))
    }
}

/// `sewerq ask`: build the context and answer one query on stdout.
pub async fn run_ask(
    config: &Config,
    progress: &dyn IngestProgressReporter,
    query: &str,
) -> Result<()> {
    let ctx = AppContext::initialize(config, progress).await?;
    println!("\nQuerying: {}", query);
    let response = ctx.agent.invoke(query).await?;
    println!("\nResponse:");
    println!("{}", response.output_text());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataConfig;
    use crate::progress::NoProgress;
    use crate::traits::ChatMessage;
    use async_trait::async_trait;
    use std::fs;
    use tempfile::TempDir;

    struct EchoModel;

    #[async_trait]
    impl LanguageModel for EchoModel {
        fn model_name(&self) -> &str {
            "echo"
        }

        async fn chat(&self, _messages: &[ChatMessage]) -> Result<String> {
            Ok(r#"{"final_answer": "ok"}"#.to_string())
        }
    }

    fn config_for(dir: &std::path::Path) -> Config {
        let mut config = Config::minimal();
        config.data = DataConfig {
            dir: dir.to_path_buf(),
            shard_count: 1,
            ..DataConfig::default()
        };
        config.sampling.fraction = 0.5;
        config
    }

    #[tokio::test]
    async fn startup_samples_and_binds_agent() {
        let tmp = TempDir::new().unwrap();
        let lines: String = (0..10).map(|i| format!("{{\"n\":{}}}\n", i)).collect();
        fs::write(tmp.path().join("sewer-inspections-part1.jsonl"), lines).unwrap();

        let ctx =
            AppContext::initialize_with_model(&config_for(tmp.path()), &NoProgress, Arc::new(EchoModel))
                .await
                .unwrap();
        assert_eq!(ctx.table.len(), 5);
        let response = ctx.agent.invoke("anything").await.unwrap();
        assert_eq!(response.output_text(), "ok");
    }

    #[tokio::test]
    async fn parse_failure_aborts_startup() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("sewer-inspections-part1.jsonl"),
            "{\"n\":1}\nnot json\n",
        )
        .unwrap();

        let result =
            AppContext::initialize_with_model(&config_for(tmp.path()), &NoProgress, Arc::new(EchoModel))
                .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn disallowed_code_execution_aborts_startup() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("sewer-inspections-part1.jsonl"), "{\"n\":1}\n").unwrap();
        let mut config = config_for(tmp.path());
        config.agent.allow_code_execution = false;

        let err = AppContext::initialize_with_model(&config, &NoProgress, Arc::new(EchoModel))
            .await
            .err()
            .unwrap();
        assert!(format!("{:#}", err).contains("allow_code_execution"));
    }
}
