//! Post-processing stages over the rendered tree.
//!
//! Stages run in the order of [`STAGES`]. Highlighting and the two
//! replacement stages target disjoint node sets; math runs last so it also
//! sees anything the earlier stages inserted.

pub mod diagram;
pub mod highlight;
pub mod math;
pub mod notation;

use crate::tree::Selector;

/// How a stage reacts when one of its nodes fails to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Whole run aborted, previous preview kept (converter only).
    Abort,
    /// Offending node replaced by an error panel; the stage continues.
    InlinePanel,
    /// Logged; the node is left as it was.
    LogOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDescriptor {
    pub name: &'static str,
    /// `None` for steps that consume the whole document.
    pub selector: Option<Selector>,
    pub policy: FailurePolicy,
}

pub const CONVERT: StageDescriptor = StageDescriptor {
    name: "convert",
    selector: None,
    policy: FailurePolicy::Abort,
};

/// Post-processing stages in run order.
pub const STAGES: [StageDescriptor; 4] = [
    highlight::DESCRIPTOR,
    diagram::DESCRIPTOR,
    notation::DESCRIPTOR,
    math::DESCRIPTOR,
];

/// Per-stage node counts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    pub rendered: usize,
    pub failed: usize,
}

impl StageReport {
    pub fn total(&self) -> usize {
        self.rendered + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order() {
        let names: Vec<_> = STAGES.iter().map(|s| s.name).collect();
        assert_eq!(names, ["highlight", "diagram", "notation", "math"]);
    }

    #[test]
    fn only_the_converter_aborts() {
        assert_eq!(CONVERT.policy, FailurePolicy::Abort);
        assert!(STAGES.iter().all(|s| s.policy != FailurePolicy::Abort));
        assert!(STAGES.iter().all(|s| s.selector.is_some()));
    }
}
