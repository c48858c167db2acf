use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use nbox_contracts::history::HistoryKind;
use nbox_contracts::images::mime_for_path;
use nbox_contracts::prompts::presets::{
    EXTERIOR_ANGLE_PRESETS, EXTERIOR_PREDEFINED_PROMPTS, FLOORPLAN_ROOM_STYLES,
    FLOORPLAN_ROOM_TYPES, INTERIOR_ANGLE_PRESETS, INTERIOR_PREDEFINED_PROMPTS,
};
use nbox_contracts::prompts::{utility_tasks, RenderType, UpscaleTier};
use nbox_contracts::{NboxError, SourceImage};
use nbox_engine::{EngineConfig, SessionController, Workflow, DEFAULT_RENDER_COUNT};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "nbox", version, about = "Architectural render workflows on Gemini image models")]
struct Cli {
    /// History file shared by every command.
    #[arg(long, global = true, env = "NBOX_HISTORY_PATH")]
    history_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Describe an interior photo as a regeneration prompt.
    Describe(DescribeArgs),
    /// Render an exterior or interior from a sketch.
    Render(RenderArgs),
    /// Turn a 2D floorplan into a 3D interior render.
    Floorplan(FloorplanArgs),
    Upscale(UpscaleArgs),
    /// Masked edit: only the white area of the mask changes.
    Edit(EditArgs),
    TextToImage(TextToImageArgs),
    #[command(subcommand)]
    Utility(UtilityCommand),
    #[command(subcommand)]
    History(HistoryCommand),
    /// Print the preset prompts, camera angles and floorplan options.
    Presets,
}

#[derive(Debug, Parser)]
struct DescribeArgs {
    #[arg(long)]
    image: PathBuf,
}

#[derive(Debug, Parser)]
struct RenderArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long, default_value = "exterior")]
    kind: RenderType,
    /// Interior renders describe the image when no prompt is given.
    #[arg(long)]
    prompt: Option<String>,
    #[arg(long, conflicts_with = "angle")]
    reference: Option<PathBuf>,
    /// Camera angle for an angle change of the source image.
    #[arg(long)]
    angle: Option<String>,
    #[arg(long, default_value_t = DEFAULT_RENDER_COUNT)]
    count: usize,
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

#[derive(Debug, Parser)]
struct FloorplanArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long, default_value = FLOORPLAN_ROOM_TYPES[0])]
    room_type: String,
    #[arg(long, default_value = FLOORPLAN_ROOM_STYLES[0])]
    style: String,
    #[arg(long, default_value_t = DEFAULT_RENDER_COUNT)]
    count: usize,
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

#[derive(Debug, Parser)]
struct UpscaleArgs {
    /// Image file to upscale. History is not touched.
    #[arg(long, required_unless_present = "log", conflicts_with = "log")]
    image: Option<PathBuf>,
    /// Upscale an image of a stored render and patch the history in place.
    #[arg(long, requires = "id")]
    log: Option<HistoryKind>,
    #[arg(long)]
    id: Option<i64>,
    #[arg(long, default_value_t = 0)]
    index: usize,
    #[arg(long, default_value = "2k")]
    tier: UpscaleTier,
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

#[derive(Debug, Parser)]
struct EditArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    mask: PathBuf,
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

#[derive(Debug, Parser)]
struct TextToImageArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

#[derive(Debug, Subcommand)]
enum UtilityCommand {
    List,
    Run(UtilityRunArgs),
}

#[derive(Debug, Parser)]
struct UtilityRunArgs {
    #[arg(long)]
    task: String,
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long)]
    second: Option<PathBuf>,
    #[arg(long, default_value = "")]
    prompt: String,
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

#[derive(Debug, Subcommand)]
enum HistoryCommand {
    List(HistoryListArgs),
    Clear(HistoryClearArgs),
    /// Restore a stored result set and write its images.
    Select(HistorySelectArgs),
}

#[derive(Debug, Parser)]
struct HistoryListArgs {
    #[arg(long)]
    log: Option<HistoryKind>,
}

#[derive(Debug, Parser)]
struct HistoryClearArgs {
    #[arg(long)]
    log: HistoryKind,
    /// Skip the confirmation prompt.
    #[arg(long)]
    yes: bool,
}

#[derive(Debug, Parser)]
struct HistorySelectArgs {
    #[arg(long)]
    log: HistoryKind,
    #[arg(long)]
    id: i64,
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nbox_cli=info,nbox_engine=info,nbox_contracts=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            match err.downcast_ref::<NboxError>() {
                Some(nbox_err) => {
                    tracing::debug!(error = %format!("{err:#}"), "command failed");
                    eprintln!("nbox error: {}", nbox_err.user_message());
                }
                None => eprintln!("nbox error: {err:#}"),
            }
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let mut config = EngineConfig::from_env()?;
    if let Some(path) = cli.history_file {
        config.history_path = path;
    }
    match cli.command {
        Command::Presets => {
            print_presets();
            Ok(0)
        }
        Command::Utility(UtilityCommand::List) => {
            print_utilities(config.features_locked);
            Ok(0)
        }
        command => {
            let session = SessionController::from_config(&config);
            dispatch(&session, command)
        }
    }
}

fn dispatch(session: &SessionController, command: Command) -> Result<i32> {
    match command {
        Command::Describe(args) => run_describe(session, args),
        Command::Render(args) => run_render(session, args),
        Command::Floorplan(args) => run_floorplan(session, args),
        Command::Upscale(args) => run_upscale(session, args),
        Command::Edit(args) => run_edit(session, args),
        Command::TextToImage(args) => run_text_to_image(session, args),
        Command::Utility(UtilityCommand::Run(args)) => run_utility(session, args),
        Command::Utility(UtilityCommand::List) => {
            print_utilities(session.features_locked());
            Ok(0)
        }
        Command::History(HistoryCommand::List(args)) => run_history_list(session, args),
        Command::History(HistoryCommand::Clear(args)) => run_history_clear(session, args),
        Command::History(HistoryCommand::Select(args)) => run_history_select(session, args),
        Command::Presets => {
            print_presets();
            Ok(0)
        }
    }
}

fn run_describe(session: &SessionController, args: DescribeArgs) -> Result<i32> {
    let image = load_source_image(&args.image)?;
    let description = session.client().describe(&image)?;
    println!("{description}");
    Ok(0)
}

fn run_render(session: &SessionController, args: RenderArgs) -> Result<i32> {
    if args.kind == RenderType::Floorplan {
        bail!("use the floorplan subcommand for floorplan renders");
    }
    session.switch_workflow(Workflow::from(args.kind))?;
    session.set_render_count(args.count)?;

    let ticket = session.set_source_image(load_source_image(&args.image)?);
    match (&args.prompt, ticket) {
        (Some(prompt), ticket) => {
            if let Some(ticket) = ticket {
                session.dismiss_description(ticket);
            }
            session.set_prompt(prompt.clone());
        }
        (None, Some(ticket)) => {
            if let Some(seeded) = session.describe_source(ticket)? {
                println!("prompt: {seeded}");
            }
        }
        (None, None) => {}
    }
    if let Some(reference) = &args.reference {
        session.set_reference_image(Some(load_source_image(reference)?));
    }

    let images = match &args.angle {
        Some(angle) => {
            session.set_angle_prompt(angle.clone());
            session.generate_angle()?
        }
        None => session.generate()?,
    };
    report_shortfall(session);
    write_outputs(&args.out, args.kind.as_str(), &images)?;
    Ok(0)
}

fn run_floorplan(session: &SessionController, args: FloorplanArgs) -> Result<i32> {
    session.switch_workflow(Workflow::Floorplan)?;
    session.set_render_count(args.count)?;
    session.set_source_image(load_source_image(&args.image)?);
    session.set_floorplan_options(args.room_type, args.style);
    let images = session.generate_floorplan()?;
    report_shortfall(session);
    write_outputs(&args.out, "floorplan", &images)?;
    Ok(0)
}

fn run_upscale(session: &SessionController, args: UpscaleArgs) -> Result<i32> {
    let upscaled = match (&args.image, args.log, args.id) {
        (Some(path), _, _) => {
            let image = load_source_image(path)?;
            session
                .client()
                .upscale(&image, args.tier)?
                .ok_or(NboxError::NoImageProduced)?
        }
        (None, Some(HistoryKind::Edit), _) => bail!("edit history items cannot be upscaled"),
        (None, Some(log), Some(id)) => {
            session.select_history_item(log, id)?;
            session.upscale(args.index, args.tier)?
        }
        _ => bail!("pass --image, or --log with --id"),
    };
    write_outputs(&args.out, &format!("upscale-{}", args.tier), &[upscaled])?;
    Ok(0)
}

fn run_edit(session: &SessionController, args: EditArgs) -> Result<i32> {
    session.stage_edit_image(load_source_image(&args.image)?)?;
    let mask = load_source_image(&args.mask)?;
    let result = session.edit(mask, &args.prompt)?;
    write_outputs(&args.out, "edit", &[result])?;
    Ok(0)
}

fn run_text_to_image(session: &SessionController, args: TextToImageArgs) -> Result<i32> {
    let image = session
        .client()
        .text_to_image(&args.prompt)?
        .ok_or(NboxError::NoImageProduced)?;
    write_outputs(&args.out, "text-to-image", &[image])?;
    Ok(0)
}

fn run_utility(session: &SessionController, args: UtilityRunArgs) -> Result<i32> {
    session.switch_workflow(Workflow::Utilities)?;
    let first = args.image.as_deref().map(load_source_image).transpose()?;
    let second = args.second.as_deref().map(load_source_image).transpose()?;
    let image = session.run_utility(&args.task, first, second, &args.prompt)?;
    write_outputs(&args.out, &args.task, &[image])?;
    Ok(0)
}

fn run_history_list(session: &SessionController, args: HistoryListArgs) -> Result<i32> {
    let history = session.history();
    let kinds = match args.log {
        Some(kind) => vec![kind],
        None => HistoryKind::ALL.to_vec(),
    };
    for kind in kinds {
        println!("{kind} ({} items)", history.len(kind));
        match kind.render_type() {
            Some(render_type) => {
                for item in history.render_log(render_type) {
                    println!(
                        "  {}  {}  {} image(s)  {}",
                        item.id,
                        item.timestamp,
                        item.images.len(),
                        truncate_text(&item.prompt, 72)
                    );
                }
            }
            None => {
                for item in &history.edit {
                    println!(
                        "  {}  {}  {}",
                        item.id,
                        item.timestamp,
                        truncate_text(&item.prompt, 72)
                    );
                }
            }
        }
    }
    Ok(0)
}

fn run_history_clear(session: &SessionController, args: HistoryClearArgs) -> Result<i32> {
    let confirmed = args.yes || confirm(&format!("Clear all {} history?", args.log))?;
    if session.clear_history(args.log, confirmed) {
        println!("{} history cleared", args.log);
    } else {
        println!("cancelled");
    }
    Ok(0)
}

fn run_history_select(session: &SessionController, args: HistorySelectArgs) -> Result<i32> {
    let images = match args.log {
        HistoryKind::Edit => vec![session.restore_edit_history(args.id)?.result_image],
        kind => {
            session.select_history_item(kind, args.id)?;
            session.snapshot().results
        }
    };
    write_outputs(&args.out, &format!("{}-{}", args.log, args.id), &images)?;
    Ok(0)
}

fn print_presets() {
    print_list("Exterior prompts", EXTERIOR_PREDEFINED_PROMPTS);
    print_list("Interior prompts", INTERIOR_PREDEFINED_PROMPTS);
    print_list("Exterior angles", EXTERIOR_ANGLE_PRESETS);
    print_list("Interior angles", INTERIOR_ANGLE_PRESETS);
    print_list("Floorplan room types", FLOORPLAN_ROOM_TYPES);
    print_list("Floorplan styles", FLOORPLAN_ROOM_STYLES);
}

fn print_list(title: &str, items: &[&str]) {
    println!("{title}:");
    for item in items {
        println!("  - {item}");
    }
}

fn print_utilities(features_locked: bool) {
    for task in utility_tasks() {
        let status = if features_locked && task.locked_under_maintenance {
            "  [maintenance]"
        } else {
            ""
        };
        println!(
            "{:<24} {} image(s)  {}{}",
            task.id,
            task.inputs.count(),
            task.name,
            status
        );
        println!("{:<24} {}", "", task.description);
        for preset in task.predefined_prompts {
            println!("{:<24} preset {}: {}", "", preset.label, preset.value);
        }
    }
}

fn report_shortfall(session: &SessionController) {
    if let Some(shortfall) = session.last_shortfall() {
        eprintln!(
            "note: received {} of {} requested images",
            shortfall.received, shortfall.requested
        );
    }
}

fn confirm(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

/// Reads an image file. MIME comes from the extension, else from the leading bytes.
fn load_source_image(path: &Path) -> Result<SourceImage> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mime = match mime_for_path(path) {
        Some(mime) => mime.to_string(),
        None => image::guess_format(&bytes)
            .map(|format| format.to_mime_type().to_string())
            .unwrap_or_else(|_| "application/octet-stream".to_string()),
    };
    Ok(SourceImage::encode(&bytes, &mime)?)
}

fn write_outputs(out_dir: &Path, label: &str, images: &[String]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let stamp = Utc::now().timestamp_millis();
    let mut written = Vec::new();
    for (idx, url) in images.iter().enumerate() {
        let Some(image) = SourceImage::from_data_url(url) else {
            tracing::warn!(index = idx, "skipping result that is not an image data URL");
            continue;
        };
        let bytes = image.decode_bytes()?;
        let path = out_dir.join(format!(
            "{}-{}-{:02}.{}",
            file_label(label),
            stamp,
            idx,
            image.file_extension()
        ));
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        println!("{}", path.display());
        written.push(path);
    }
    Ok(written)
}

fn file_label(label: &str) -> String {
    label
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' { ch } else { '-' })
        .collect()
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
