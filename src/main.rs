mod cli;
mod kms;
mod render;

use std::process::ExitCode;
use std::thread::sleep;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::cli::{Backend, Cli, Command, Renderer, RunArgs};
use crate::kms::compositor::{Compositor, CompositorOptions, OverlayLayout};
use crate::kms::device::Card;
use crate::kms::framebuffer::AllocatorKind;
use crate::kms::inventory::{self, DisplayResources};
use crate::render::{CubeRenderer, PixelSource, SolidColor};

/// Static overlay fill: opaque green in X-R-G-B.
const OVERLAY_COLOR: u32 = 0xFF00_FF00;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let card = match &cli.device {
        Some(path) => Card::open(path)?,
        None => Card::open_default()?,
    };

    match cli.command {
        Command::List => list(&card),
        Command::Run(args) => run_compositor(card, &args),
    }
}

/// Print what the device exposes: resource counts, limits, per-connector
/// modes and per-plane classification.
fn list(card: &Card) -> anyhow::Result<()> {
    // Without universal planes the kernel hides primary/cursor planes.
    card.require_atomic_caps()?;

    let resources = DisplayResources::discover(card).context("error querying resources")?;
    println!(
        "{} connectors, {} CRTCs, {} encoders",
        resources.connectors.len(),
        resources.crtcs.len(),
        resources.encoder_count,
    );
    println!(
        "framebuffer limits: {}x{} min, {}x{} max",
        resources.width_limits.0,
        resources.height_limits.0,
        resources.width_limits.1,
        resources.height_limits.1,
    );

    for conn in &resources.connectors {
        if !conn.connected {
            println!("{}: disconnected", conn.name);
            continue;
        }
        println!("{}: connected, {} modes", conn.name, conn.modes.len());
        for mode in &conn.modes {
            let (width, height) = mode.size();
            println!(
                "  {}: {width}x{height} @{}Hz",
                mode.name().to_string_lossy(),
                mode.vrefresh(),
            );
        }
    }

    for crtc in &resources.crtcs {
        match crtc.current_mode {
            Some(mode) => {
                let (width, height) = mode.size();
                println!("CRTC {:?}: active at {width}x{height}", crtc.handle);
            }
            None => println!("CRTC {:?}: inactive", crtc.handle),
        }
    }

    let planes = inventory::discover_planes(card, &resources).context("error listing planes")?;
    for plane in &planes {
        let bound = match plane.crtc {
            Some(crtc) => format!("bound to {crtc:?}"),
            None => "unbound".to_owned(),
        };
        println!(
            "plane {:?}: {:?}, possible CRTCs {:#b}, {bound}",
            plane.handle, plane.kind, plane.possible_crtcs,
        );
    }

    Ok(())
}

fn run_compositor(card: Card, args: &RunArgs) -> anyhow::Result<()> {
    card.require_atomic_caps()
        .context("atomic KMS is unavailable")?;

    let opts = CompositorOptions {
        backend: match args.backend {
            Backend::Dumb => AllocatorKind::Dumb,
            Backend::Gbm => AllocatorKind::Gbm,
        },
        overlay: args.overlay.then(|| OverlayLayout {
            // The GBM path historically composites a half-size overlay, the
            // dumb path a quarter-size one.
            divisor: match args.backend {
                Backend::Dumb => 4,
                Backend::Gbm => 2,
            },
            ..Default::default()
        }),
        overlay_color: OVERLAY_COLOR,
    };

    let mut compositor =
        Compositor::new(card, &opts).context("error building the display pipeline")?;

    let frames = args.frames.unwrap_or(match args.renderer {
        Renderer::Solid => 1,
        Renderer::Cube => 600,
    });
    let mut source: Box<dyn PixelSource> = match args.renderer {
        Renderer::Solid => Box::new(SolidColor::new(args.color)),
        Renderer::Cube => Box::new(CubeRenderer::new()),
    };

    compositor
        .run(source.as_mut(), frames)
        .context("compositor failed")?;

    if args.hold > 0 {
        info!("holding the last frame for {}s", args.hold);
        sleep(Duration::from_secs(args.hold));
    }

    Ok(())
}
