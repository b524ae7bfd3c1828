use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use vision::{VisionCliArgs, VisionConfig};

/// Real-time object detection streamed as annotated MJPEG.
#[derive(Debug, Parser)]
#[command(name = "vision-stream", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the pipeline and serve the stream until Ctrl+C.
    Serve(VisionCliArgs),
    /// Grab one inference frame, run the detector, and print the result as JSON.
    Probe(VisionCliArgs),
}

pub fn handle_command(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve(args) => vision::run(VisionConfig::try_from(args)?),
        Command::Probe(args) => {
            let report = vision::probe(VisionConfig::try_from(args)?)?;
            let json =
                serde_json::to_string_pretty(&report).context("Failed to serialise probe report")?;
            println!("{json}");
            Ok(())
        }
    }
}
