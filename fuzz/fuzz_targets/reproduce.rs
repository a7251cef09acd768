use std::time::{Duration, Instant};

use log::info;
use mdlive::convert::{Converter, MarkdownOptions};
use mdlive::pipeline::{Engines, Orchestrator};
use mdlive::surface::{LogNotifier, MemoryPreview};
use mdlive::theme::ThemeKey;

fn main() {
    env_logger::init();

    let path = std::env::args().nth(1).unwrap_or_else(|| {
        eprintln!("Usage: reproduce <artifact-file-or-markdown>");
        std::process::exit(1);
    });

    let data = std::fs::read(&path).unwrap_or_else(|e| {
        eprintln!("Failed to read {path}: {e}");
        std::process::exit(1);
    });

    let markdown = match std::str::from_utf8(&data) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Input is not valid UTF-8: {e}");
            std::process::exit(1);
        }
    };

    let iterations = std::env::var("ITERATIONS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1);

    eprintln!("=== Input: {} ({} bytes), {} iteration(s) ===", path, markdown.len(), iterations);

    let mut pipeline = Orchestrator::new(
        Converter::new(MarkdownOptions::default(), usize::MAX),
        Engines::builtin(),
        MemoryPreview::new(),
        Box::new(LogNotifier),
        ThemeKey::Dark,
    );

    for i in 0..iterations {
        let iter_start = Instant::now();
        let report = pipeline.run(markdown);
        let applied = pipeline.flush_math(Duration::from_secs(30));
        info!(
            "iteration {}: {:?}, math applied {}, total {:.1}ms",
            i,
            report.outcome,
            applied,
            iter_start.elapsed().as_secs_f64() * 1000.0
        );
        eprintln!("iteration {i}: {report:#?}");
    }
}
