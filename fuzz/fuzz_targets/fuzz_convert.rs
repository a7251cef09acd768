#![no_main]

use libfuzzer_sys::fuzz_target;
use mdlive::convert::{ConvertError, markdown_to_html};
use mdlive::outline::build_outline;
use mdlive::tree::{RenderedTree, TreeError};

fuzz_target!(|data: &[u8]| {
    let Ok(markdown) = std::str::from_utf8(data) else {
        return;
    };

    // Conversion must not panic; the only expected failure is the size limit.
    let html = match markdown_to_html(markdown) {
        Ok(html) => html,
        Err(ConvertError::InputTooLarge { .. }) => return,
        Err(e) => panic!("convert failed: {e}"),
    };

    // Produced HTML must load, unless it nests past the depth limit.
    let tree = match RenderedTree::parse(&html) {
        Ok(tree) => tree,
        Err(TreeError::TooDeep) => return,
        Err(e) => panic!("converter output did not parse: {e}\n{html}"),
    };

    // Every outline entry has a usable anchor and a valid level.
    for entry in build_outline(&tree) {
        assert!((1..=6).contains(&entry.level), "bad level {}", entry.level);
        assert!(
            !entry.id.starts_with('-') && !entry.id.ends_with('-'),
            "untrimmed anchor {:?}",
            entry.id
        );
    }
});
