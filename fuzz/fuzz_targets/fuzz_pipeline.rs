#![no_main]

use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use mdlive::convert::{Converter, MarkdownOptions};
use mdlive::pipeline::{Engines, Orchestrator};
use mdlive::surface::{LogNotifier, MemoryPreview, PreviewSurface};
use mdlive::theme::ThemeKey;
use mdlive::tree::{RenderedTree, TreeError};

fuzz_target!(|data: &[u8]| {
    let Ok(markdown) = std::str::from_utf8(data) else {
        return;
    };

    let mut pipeline = Orchestrator::new(
        Converter::new(MarkdownOptions::default(), 64 * 1024),
        Engines::builtin(),
        MemoryPreview::new(),
        Box::new(LogNotifier),
        ThemeKey::Dark,
    );

    // Engine failures are isolated per stage, so a run never panics.
    let report = pipeline.run(markdown);
    if !report.is_rendered() {
        return;
    }
    pipeline.flush_math(Duration::from_secs(5));

    // Engine markup can push nesting past the depth limit: a clean rejection.
    let html = pipeline.preview().tree().to_html();
    match RenderedTree::parse(&html) {
        Ok(_) | Err(TreeError::TooDeep) => {}
        Err(e) => panic!("rendered tree did not re-parse: {e}"),
    }
});
