//! Feature detection, computed once at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use voice_relay_pipeline::InferencePipeline;
use voice_relay_providers::Provider;
use voice_relay_providers::registry::chain_available;

/// What the running server can actually do with its configured providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub voice_mode_enabled: bool,
    pub stt_enabled: bool,
    pub tts_enabled: bool,
    pub ai_completions_enabled: bool,
    /// Configured chain per service, primary first, e.g. `"openai, streamelements"`.
    pub provider_info: BTreeMap<String, String>,
}

impl Capabilities {
    pub fn detect(pipeline: &InferencePipeline) -> Self {
        let stt = pipeline.stt_stage().providers();
        let ai = pipeline.ai_stage().providers();
        let tts = pipeline.tts_stage().providers();

        let stt_enabled = chain_available(stt);
        let tts_enabled = chain_available(tts);
        let ai_completions_enabled = chain_available(ai);

        let mut provider_info = BTreeMap::new();
        provider_info.insert("stt".to_string(), describe(stt));
        provider_info.insert("ai".to_string(), describe(ai));
        provider_info.insert("tts".to_string(), describe(tts));

        let caps = Self {
            voice_mode_enabled: stt_enabled && tts_enabled,
            stt_enabled,
            tts_enabled,
            ai_completions_enabled,
            provider_info,
        };
        caps.log();
        caps
    }

    fn log(&self) {
        info!(
            voice_mode = self.voice_mode_enabled,
            stt = self.stt_enabled,
            tts = self.tts_enabled,
            ai = self.ai_completions_enabled,
            providers = ?self.provider_info,
            "System capabilities detected"
        );
        if !self.ai_completions_enabled {
            warn!("No AI provider configured, replies will be placeholders");
        }
    }
}

fn describe<P: Provider + ?Sized>(chain: &[Arc<P>]) -> String {
    chain
        .iter()
        .map(|p| {
            if p.is_configured() {
                p.id().to_string()
            } else {
                format!("{} (not configured)", p.id())
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
