//! Command-line interface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "okno", about = "Minimal atomic KMS compositor demo", version)]
pub struct Cli {
    /// DRM device node. The first working /dev/dri/cardN is used if unset.
    #[arg(short, long, global = true)]
    pub device: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print connectors, modes and planes.
    List,
    /// Set a mode and scan out rendered frames.
    Run(RunArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Composite an overlay plane in the same atomic transaction.
    #[arg(long)]
    pub overlay: bool,
    /// Buffer allocation backend.
    #[arg(long, value_enum, default_value_t = Backend::Dumb)]
    pub backend: Backend,
    /// Frame content.
    #[arg(long, value_enum, default_value_t = Renderer::Solid)]
    pub renderer: Renderer,
    /// Number of frames to render. Defaults to 1 for solid, 600 for cube.
    #[arg(long)]
    pub frames: Option<u64>,
    /// Primary plane fill color for the solid renderer, XRGB hex.
    #[arg(long, default_value = "FF0000FF", value_parser = parse_color)]
    pub color: u32,
    /// Seconds to keep the last frame on screen before tearing down.
    #[arg(long, default_value_t = 5)]
    pub hold: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Kernel dumb buffer, CPU-mapped.
    Dumb,
    /// Driver buffer object through GBM.
    Gbm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Renderer {
    /// Flat color fill.
    Solid,
    /// Software-rendered rotating cube.
    Cube,
}

fn parse_color(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|err| format!("invalid XRGB color: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_parses_with_and_without_prefix() {
        assert_eq!(parse_color("FF0000FF").unwrap(), 0xFF0000FF);
        assert_eq!(parse_color("0xff00ff00").unwrap(), 0xFF00FF00);
        assert!(parse_color("not-a-color").is_err());
    }
}
