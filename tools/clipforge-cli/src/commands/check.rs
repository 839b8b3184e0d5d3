//! Check encoder availability and configuration.

use clipforge_common::config::{config_file_path, AppConfig};
use clipforge_render_engine::{EncodingEngine, FfmpegEngine, FfprobeProber};

pub fn run(config: AppConfig) -> anyhow::Result<()> {
    println!("Clipforge System Check");
    println!("{}", "=".repeat(50));

    let config_path = config_file_path();
    if config_path.exists() {
        println!("[OK] Config: {}", config_path.display());
    } else {
        println!("[INFO] Config: defaults ({} not found)", config_path.display());
    }

    let config_ok = match config.validate() {
        Ok(()) => true,
        Err(e) => {
            println!("[FAIL] {e}");
            false
        }
    };

    let engine = FfmpegEngine::from_config(&config.encoder);
    let engine_ok = engine.is_available();
    if engine_ok {
        println!("[OK] Encoder: {}", config.encoder.ffmpeg_path.display());
    } else {
        println!(
            "[FAIL] Encoder not found: {} (set encoder.ffmpeg_path)",
            config.encoder.ffmpeg_path.display()
        );
    }

    let prober_ok = FfprobeProber::from_config(&config.encoder).is_available();
    if prober_ok {
        println!("[OK] Prober: {}", config.encoder.ffprobe_path.display());
    } else {
        println!(
            "[WARN] Prober not found: {} (clips will be treated as silent)",
            config.encoder.ffprobe_path.display()
        );
    }

    let temp_root = config.encoder.temp_root();
    println!("[OK] Temp root: {}", temp_root.display());
    println!(
        "     Output: {} preset={} crf={} {}fps {}, audio {} {}k",
        config.output.video_codec,
        config.output.preset,
        config.output.crf,
        config.output.frame_rate,
        config.output.pixel_format,
        config.output.audio_codec,
        config.output.audio_bitrate_kbps
    );
    println!(
        "     Overlay lanes: {:?}, margin {}px, scale 1/{}",
        config.composition.overlay_lanes,
        config.composition.overlay_margin_px,
        config.composition.overlay_scale_divisor
    );

    println!();
    if engine_ok && config_ok {
        println!("Clipforge is ready to export.");
    } else if !config_ok {
        println!("The configuration is invalid. Exports will fail until it is fixed.");
    } else {
        println!("The encoder is missing. Exports will fail until it is installed.");
    }

    Ok(())
}
