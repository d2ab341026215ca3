//! Command-line front end for mixgraph projects.
//!
//! Usage:
//!   mixgraph render <project> <out.wav>   - Bounce a project to a 16-bit WAV file
//!   mixgraph info <project>               - Print the project as JSON
//!   mixgraph play <project>               - Play a project on the default output device

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mixgraph::{Engine, Project, RenderSettings};

#[derive(Parser)]
#[command(name = "mixgraph", about = "Multitrack mixing engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a project to a WAV file
    Render {
        project: PathBuf,
        output: PathBuf,
        /// First beat to render
        #[arg(long, default_value_t = 0.0)]
        start: f64,
        /// Beat to stop at. By default the whole project is rendered
        #[arg(long, default_value_t = 0.0)]
        end: f64,
        #[arg(long, default_value_t = 44_100.0)]
        sample_rate: f64,
    },
    /// Print a JSON snapshot of a project
    Info { project: PathBuf },
    /// Play a project through the default output device
    Play {
        project: PathBuf,
        /// Seconds to play for
        #[arg(long, default_value_t = 10.0)]
        seconds: f64,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            project,
            output,
            start,
            end,
            sample_rate,
        } => render(
            &project,
            &output,
            &RenderSettings {
                start_beat: start,
                end_beat: end,
                sample_rate,
            },
        ),
        Commands::Info { project } => info(&project),
        Commands::Play { project, seconds } => play(&project, seconds),
    }
}

fn open(path: &Path) -> Result<Project> {
    let project = Project::new();
    project
        .load_from_file(path)
        .with_context(|| format!("Failed to load '{}'", path.display()))?;
    Ok(project)
}

fn render(path: &Path, output: &Path, settings: &RenderSettings) -> Result<()> {
    let project = open(path)?;
    let frames = project
        .render_audio(output, settings)
        .with_context(|| format!("Failed to render to '{}'", output.display()))?;
    println!(
        "Rendered {:.2} seconds to '{}'",
        frames as f64 / settings.sample_rate,
        output.display()
    );
    Ok(())
}

fn info(path: &Path) -> Result<()> {
    let project = open(path)?;
    let json = serde_json::to_string_pretty(&project.snapshot())?;
    println!("{json}");
    Ok(())
}

fn play(path: &Path, seconds: f64) -> Result<()> {
    let project = Arc::new(open(path)?);
    let engine = Engine::with_default_output(Arc::clone(&project))
        .context("Failed to open the default output device")?;

    project.transport().play();
    thread::sleep(Duration::from_secs_f64(seconds.max(0.0)));
    project.transport().pause();

    drop(engine);
    Ok(())
}
