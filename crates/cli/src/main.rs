use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use spatial_session::SessionConfig;
use spatial_store::StoreLayout;
use std::path::PathBuf;

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "roomctl")]
#[command(about = "Inspect and manage persisted spatial rooms", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for output)
    #[arg(long, global = true)]
    quiet: bool,

    /// Rooms root directory (overrides SPATIAL_ROOMS_DIR)
    #[arg(long, global = true)]
    rooms_dir: Option<PathBuf>,

    /// Directory for share bundles (overrides SPATIAL_BUNDLE_DIR)
    #[arg(long, global = true)]
    bundle_dir: Option<PathBuf>,

    /// TOML file with a [session] table
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List rooms in catalog order
    List(ListArgs),

    /// Create an empty room
    Create(CreateArgs),

    /// Rename a room (its directory is kept)
    Rename(RenameArgs),

    /// Delete a room and its files
    Delete(RoomArgs),

    /// Package a room into a shareable bundle directory
    Bundle(RoomArgs),

    /// Decode a room's blobs and print a summary with diagnostics
    Inspect(InspectArgs),

    /// Record and reload a room against the simulated mapping engine
    Simulate(SimulateArgs),
}

#[derive(Args)]
struct ListArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct CreateArgs {
    name: String,
}

#[derive(Args)]
struct RenameArgs {
    /// Room id or current name
    room: String,
    new_name: String,
}

#[derive(Args)]
struct RoomArgs {
    /// Room id or name
    room: String,
}

#[derive(Args)]
struct InspectArgs {
    /// Room id or name
    room: String,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct SimulateArgs {
    /// Name of the room to record
    name: String,

    /// Number of markers to place
    #[arg(long, default_value_t = 3)]
    markers: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let mut layout = StoreLayout::resolve(cli.rooms_dir.clone());
    if let Some(dir) = &cli.bundle_dir {
        layout = layout.with_bundle_dir(dir);
    }
    let config = match &cli.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SessionConfig::default(),
    }
    .with_env_overrides();

    let catalog = commands::open_catalog(layout).await?;
    match cli.command {
        Commands::List(args) => commands::list(&catalog, args.json)?,
        Commands::Create(args) => commands::create(&catalog, &args.name).await?,
        Commands::Rename(args) => commands::rename(&catalog, &args.room, &args.new_name).await?,
        Commands::Delete(args) => commands::delete(&catalog, &args.room).await?,
        Commands::Bundle(args) => commands::bundle(&catalog, &args.room).await?,
        Commands::Inspect(args) => commands::inspect(&catalog, &args.room, args.json).await?,
        Commands::Simulate(args) => {
            commands::simulate(catalog, config, &args.name, args.markers).await?;
        }
    }
    Ok(())
}
