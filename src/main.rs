use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{info, warn};

use mdlive::config::{self, Config};
use mdlive::convert::{Converter, MarkdownOptions};
use mdlive::input::{InputSource, LiveEditor};
use mdlive::outline::build_outline;
use mdlive::page::HtmlPagePreview;
use mdlive::pipeline::{Engines, Orchestrator, RunOutcome, RunReport};
use mdlive::scheduler::{FrameClock, UpdateScheduler};
use mdlive::surface::StderrNotifier;
use mdlive::tree::RenderedTree;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("MDLIVE_BUILD_GIT_HASH"),
    ", ",
    env!("MDLIVE_BUILD_PROFILE"),
    ")"
);

/// Upper bound on waiting for math in one-shot renders.
const MATH_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

const DEMO_DOCUMENT: &str = include_str!("../demo/demo.md");

#[derive(Parser)]
#[command(
    name = "mdlive",
    version,
    long_version = LONG_VERSION,
    about = "Live Markdown preview with diagrams, music notation and math"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Input Markdown file (for watch mode; use `-` for stdin)
    #[arg(global = true)]
    input: Option<PathBuf>,

    /// Theme name (light or dark)
    #[arg(long, global = true)]
    theme: Option<String>,

    /// Quiet period after the last edit before re-rendering
    #[arg(long, global = true)]
    debounce_ms: Option<u64>,

    /// Log output file path (enables logging in watch mode)
    #[arg(long, global = true)]
    log: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Re-render to an HTML page whenever the input changes
    Watch {
        /// Input Markdown file (use `-` for stdin)
        input: PathBuf,

        /// Output HTML page (default: input with `.html`)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Render Markdown once to an HTML page
    Render {
        /// Input Markdown file (use `-` for stdin)
        input: PathBuf,

        /// Output HTML page (default: input with `.html`)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the heading outline
    Outline {
        /// Input Markdown file (use `-` for stdin)
        input: PathBuf,
    },
    /// Render the built-in demo document
    Demo {
        /// Output HTML page
        #[arg(short, long, default_value = "mdlive-demo.html")]
        output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let watching = matches!(cli.command, None | Some(Command::Watch { .. }));
    if let Some(log_path) = &cli.log {
        let file = match std::fs::File::create(log_path) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("Error: failed to open log file {}: {e}", log_path.display());
                std::process::exit(1);
            }
        };
        env_logger::Builder::from_default_env()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();
    } else if !watching {
        env_logger::init();
    }
    // watch mode + no --log → logger not initialized (stderr carries status lines)

    let config = match config::load_config().and_then(|mut cfg| {
        cfg.merge_cli(cli.theme, cli.debounce_ms);
        cfg.resolve()
    }) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Command::Watch { input, output }) => cmd_watch(&input, output, &config),
        Some(Command::Render { input, output }) => cmd_render(&input, output, &config),
        Some(Command::Outline { input }) => cmd_outline(&input, &config),
        Some(Command::Demo { output }) => {
            render_once(DEMO_DOCUMENT, "mdlive demo", &output, &config).map(|_| ())
        }
        None => match cli.input {
            Some(input) => cmd_watch(&input, None, &config),
            None if mdlive::input::is_stdin_input(None) => cmd_watch(Path::new("-"), None, &config),
            None => {
                eprintln!("Error: input file required (or pipe via stdin)");
                std::process::exit(1);
            }
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn source_for(input: &Path) -> InputSource {
    InputSource::from_arg(Some(input)).unwrap_or_else(|| InputSource::File(input.to_path_buf()))
}

/// `doc.md` → `doc.html`; stdin → `mdlive.html`.
fn default_output(source: &InputSource) -> PathBuf {
    match source {
        InputSource::File(path) => path.with_extension("html"),
        InputSource::Stdin => PathBuf::from("mdlive.html"),
    }
}

fn new_pipeline(preview: HtmlPagePreview, config: &Config) -> Orchestrator<HtmlPagePreview> {
    Orchestrator::new(
        Converter::new(MarkdownOptions::default(), config.max_input_bytes),
        Engines::builtin(),
        preview,
        Box::new(StderrNotifier),
        config.theme,
    )
}

fn summary(report: &RunReport) -> String {
    format!(
        "{} heading(s), {} code block(s), {} diagram(s), {} score(s), {} formula(s)",
        report.outline_entries,
        report.highlight.total(),
        report.diagrams.total(),
        report.notation.total(),
        report.math_queued
    )
}

fn render_once(markdown: &str, title: &str, output: &Path, config: &Config) -> Result<RunReport> {
    let start = Instant::now();
    let preview = HtmlPagePreview::new(output.to_path_buf(), title, config.theme, config.preview_rows);
    let mut pipeline = new_pipeline(preview, config);

    let report = pipeline.run(markdown);
    if let RunOutcome::Aborted { message } = &report.outcome {
        bail!("{message}");
    }
    pipeline.flush_math(MATH_FLUSH_TIMEOUT);

    info!(
        "cmd_render: total pipeline completed in {:.1}ms",
        start.elapsed().as_secs_f64() * 1000.0
    );
    eprintln!("rendered {title} -> {} ({})", output.display(), summary(&report));
    Ok(report)
}

fn cmd_render(input: &Path, output: Option<PathBuf>, config: &Config) -> Result<()> {
    let source = source_for(input);
    let markdown = source.read_all()?;
    if markdown.trim().is_empty() {
        bail!("input is empty or contains only whitespace");
    }
    let output = output.unwrap_or_else(|| default_output(&source));
    render_once(&markdown, source.display_name(), &output, config).map(|_| ())
}

fn cmd_outline(input: &Path, config: &Config) -> Result<()> {
    let markdown = source_for(input).read_all()?;
    let converter = Converter::new(MarkdownOptions::default(), config.max_input_bytes);
    let html = converter.convert(&markdown)?;
    let tree = RenderedTree::parse(&html).context("rendered HTML could not be loaded")?;
    for entry in build_outline(&tree) {
        let indent = "  ".repeat(usize::from(entry.level.saturating_sub(1)));
        println!("{indent}{}  #{}", entry.text, entry.id);
    }
    Ok(())
}

fn cmd_watch(input: &Path, output: Option<PathBuf>, config: &Config) -> Result<()> {
    let source = source_for(input);
    let output = output.unwrap_or_else(|| default_output(&source));
    let mut editor = source.open_editor(config.editor_rows)?;

    let preview = HtmlPagePreview::new(
        output.clone(),
        source.display_name(),
        config.theme,
        config.preview_rows,
    )
    .with_live_reload(config.reload);
    let mut pipeline = new_pipeline(preview, config);
    let clock = FrameClock::new(Instant::now(), config.frame_interval);
    let mut scheduler: UpdateScheduler<()> = UpdateScheduler::new(config.debounce, clock);

    let report = pipeline.run_edit(editor.as_ref());
    if report.is_rendered() {
        eprintln!(
            "watching {} -> {} ({})",
            source.display_name(),
            output.display(),
            summary(&report)
        );
    }

    watch_loop(editor.as_mut(), &mut pipeline, &mut scheduler, config)
}

fn watch_loop(
    editor: &mut dyn LiveEditor,
    pipeline: &mut Orchestrator<HtmlPagePreview>,
    scheduler: &mut UpdateScheduler<()>,
    config: &Config,
) -> Result<()> {
    loop {
        match editor.refresh() {
            Ok(true) => scheduler.schedule(Instant::now(), ()),
            Ok(false) => {}
            Err(e) => warn!("watch: keeping previous text: {e:#}"),
        }
        if scheduler.poll(Instant::now()).is_some() {
            let report = pipeline.run_edit(&*editor);
            if report.is_rendered() {
                eprintln!("updated (run {}): {}", report.generation, summary(&report));
            }
        }
        pipeline.poll_math();

        if editor.is_finished() && !scheduler.is_pending() && !pipeline.math_pending() {
            info!("watch: input finished, exiting");
            return Ok(());
        }

        let now = Instant::now();
        let sleep = scheduler
            .next_deadline()
            .map_or(config.watch_interval, |at| at.saturating_duration_since(now))
            .min(config.watch_interval);
        thread::sleep(sleep);
    }
}
