use clap::Parser;
use std::path::PathBuf;

/// Command line and environment configuration for the server binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "mri-segment")]
#[command(about = "Brain MRI segmentation over HTTP")]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "SEGMENT_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "SEGMENT_PORT", default_value_t = 7860)]
    pub port: u16,

    /// Path of the segmentation model
    #[arg(long, env = "SEGMENT_MODEL", default_value = "model18cls/model.onnx")]
    pub model: PathBuf,

    /// Load the model on the first request instead of at startup
    #[arg(long)]
    pub lazy_load: bool,

    /// Largest accepted request body, in MiB
    #[arg(long, default_value_t = 512)]
    pub max_upload_mb: usize,
}

impl ServerConfig {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}
