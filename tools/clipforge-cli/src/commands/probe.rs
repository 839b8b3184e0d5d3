//! Report audio stream presence for media files.

use std::path::PathBuf;

use clipforge_common::config::AppConfig;
use clipforge_render_engine::{FfprobeProber, MediaProber};

pub async fn run(paths: Vec<PathBuf>, config: AppConfig) -> anyhow::Result<()> {
    let prober = FfprobeProber::from_config(&config.encoder);

    for path in &paths {
        match prober.probe(path).await {
            Ok(report) if report.has_audio => println!("[audio]    {}", path.display()),
            Ok(_) => println!("[no audio] {}", path.display()),
            Err(e) => println!("[error]    {}: {e}", path.display()),
        }
    }

    Ok(())
}
