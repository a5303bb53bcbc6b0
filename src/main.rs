use eframe::egui;
use std::path::{Path, PathBuf};

mod app;
mod asset;
mod config;
mod controller;
mod coords;
mod error;
mod export;
mod labels;
mod layout;
mod storage;
mod text;

use app::LabelApp;
use asset::ImageLoader;
use config::AppConfig;
use export::Exporter;
use layout::LayoutEngine;
use storage::{LabelStorage, SidecarStorage};
use text::LabelFont;

const USAGE: &str =
    "Usage: photo-label <image.jpg|png> [--config <file.json>] [--export <out.jpeg>]";

#[derive(Debug, PartialEq)]
struct Args {
    image: PathBuf,
    config: Option<PathBuf>,
    export: Option<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut image = None;
    let mut config = None;
    let mut export = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config = Some(PathBuf::from(args.next().ok_or("--config needs a path")?));
            }
            "--export" => {
                export = Some(PathBuf::from(args.next().ok_or("--export needs a path")?));
            }
            flag if flag.starts_with("--") => return Err(format!("unknown option {flag}")),
            _ if image.is_some() => return Err(format!("unexpected argument {arg}")),
            _ => image = Some(PathBuf::from(&arg)),
        }
    }
    Ok(Args {
        image: image.ok_or("missing image path")?,
        config,
        export,
    })
}

/// Render the stored labels of `image` to `out` without opening a window.
fn export_headless(image: &Path, out: &Path, config: &AppConfig) -> error::Result<()> {
    let asset = ImageLoader::load(image)?;
    let labels = SidecarStorage.load(&asset.key());
    let font = LabelFont::load(config.font_path.as_deref())?;
    Exporter::new(LayoutEngine::new(config.layout.clone()), font)
        .export_to_file(&asset, &labels, out)
}

// ── Main ────────────────────────────────────────────────────────────────────

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}\n{USAGE}");
            std::process::exit(1);
        }
    };

    if !args.image.exists() {
        eprintln!("File not found: {}", args.image.display());
        std::process::exit(1);
    }

    let config = match args.config.as_deref().map(AppConfig::load).transpose() {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    if let Some(out) = &args.export {
        if let Err(e) = export_headless(&args.image, out, &config) {
            eprintln!("Export failed: {e}");
            std::process::exit(1);
        }
        return;
    }

    let title = format!(
        "photo-label — {}",
        args.image
            .file_name()
            .unwrap_or_default()
            .to_str()
            .unwrap_or("")
    );

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_title(&title),
        ..Default::default()
    };

    let image = args.image;
    if let Err(e) = eframe::run_native(
        &title,
        options,
        Box::new(move |cc| Ok(Box::new(LabelApp::new(&cc.egui_ctx, image, config)))),
    ) {
        log::error!("Failed to run eframe: {e}");
        std::process::exit(1);
    }
}
