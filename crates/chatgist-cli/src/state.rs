//! Application state wiring the service to its infra implementations.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use chatgist_core::service::GistService;
use chatgist_infra::audio::FfmpegAudioTools;
use chatgist_infra::config::gemini_api_keys_from_env;
use chatgist_infra::llm::gemini::GeminiModel;
use chatgist_infra::transport::JsonExportTransport;
use chatgist_types::config::GistConfig;

/// The service pinned to the concrete transport, model and audio toolchain.
pub type ConcreteGistService = GistService<JsonExportTransport, GeminiModel, FfmpegAudioTools>;

pub struct AppState {
    pub service: ConcreteGistService,
    pub config: GistConfig,
}

impl AppState {
    /// Open the chat export, read the key pool and wire the service.
    pub async fn init(config: GistConfig, export: &Path) -> anyhow::Result<Self> {
        let transport = JsonExportTransport::open(export)
            .await
            .with_context(|| format!("failed to open chat export {}", export.display()))?;

        let keys = gemini_api_keys_from_env()?;
        let model = GeminiModel::new(keys, &config)?;

        let tools = FfmpegAudioTools::from_config(&config.audio);
        tools
            .ensure_dir()
            .await
            .with_context(|| format!("failed to create audio dir {}", tools.dir().display()))?;

        let service = GistService::new(
            Arc::new(transport),
            Arc::new(model),
            Arc::new(tools),
            &config,
        );
        Ok(Self { service, config })
    }
}
