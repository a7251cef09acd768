//! Detached math typesetting.
//!
//! Math sources are collected from the tree synchronously, typeset on a
//! background worker, and written back by the caller's thread. Results carry
//! the generation of the run that produced their tree; the caller drops any
//! result whose generation is no longer current.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::{FailurePolicy, StageDescriptor};
use crate::engine::{EngineError, MathTypesetter, panic_message};
use crate::tree::{Node, NodePath, RenderedTree, Selector};

pub const DESCRIPTOR: StageDescriptor = StageDescriptor {
    name: "math",
    selector: Some(Selector::Class {
        tag: "span",
        class: MATH_CLASS,
    }),
    policy: FailurePolicy::LogOnly,
};

pub const MATH_CLASS: &str = "math";
pub const DISPLAY_CLASS: &str = "math-display";
/// Added once a span holds typeset markup.
pub const TYPESET_CLASS: &str = "typeset";

#[derive(Debug, Clone, PartialEq)]
pub struct MathJob {
    pub path: NodePath,
    pub latex: String,
    pub display: bool,
}

/// Every untypeset math span, in document order.
pub fn collect_jobs(tree: &RenderedTree) -> Vec<MathJob> {
    let Some(selector) = DESCRIPTOR.selector else {
        return Vec::new();
    };
    tree.select(&selector)
        .into_iter()
        .filter_map(|path| {
            let span = tree.element(&path)?;
            if span.has_class(TYPESET_CLASS) {
                return None;
            }
            Some(MathJob {
                latex: span.text_content(),
                display: span.has_class(DISPLAY_CLASS),
                path,
            })
        })
        .collect()
}

/// Write typeset markup into the span at `path`. Returns false if the node
/// there is no longer a math span.
pub fn apply(tree: &mut RenderedTree, path: &[usize], markup: String) -> bool {
    match tree.element_mut(path) {
        Some(span) if span.tag == "span" && span.has_class(MATH_CLASS) => {
            span.set_content(Node::Raw(markup));
            span.add_class(TYPESET_CLASS);
            true
        }
        _ => false,
    }
}

struct Batch {
    generation: u64,
    jobs: Vec<MathJob>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MathMessage {
    Typeset {
        generation: u64,
        path: NodePath,
        markup: String,
    },
    /// All jobs of `generation` were attempted.
    Done { generation: u64, failed: usize },
}

pub struct MathWorker {
    tx: Option<mpsc::Sender<Batch>>,
    rx: mpsc::Receiver<MathMessage>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MathWorker {
    pub fn spawn(typesetter: Arc<dyn MathTypesetter>) -> Self {
        let (req_tx, req_rx) = mpsc::channel::<Batch>();
        let (res_tx, res_rx) = mpsc::channel::<MathMessage>();
        let handle = thread::spawn(move || worker_loop(typesetter.as_ref(), req_rx, res_tx));
        Self {
            tx: Some(req_tx),
            rx: res_rx,
            handle: Some(handle),
        }
    }

    /// Queue a batch. Returns false if there was nothing to send or the
    /// worker is gone.
    pub fn submit(&self, generation: u64, jobs: Vec<MathJob>) -> bool {
        if jobs.is_empty() {
            return false;
        }
        let count = jobs.len();
        let sent = self
            .tx
            .as_ref()
            .is_some_and(|tx| tx.send(Batch { generation, jobs }).is_ok());
        if sent {
            debug!("math: queued {count} spans for generation {generation}");
        } else {
            warn!("math: worker unavailable, {count} spans left as source");
        }
        sent
    }

    pub fn try_recv(&self) -> Option<MathMessage> {
        self.rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<MathMessage> {
        self.rx.recv_timeout(timeout).ok()
    }
}

impl Drop for MathWorker {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop.
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn typeset_guarded(typesetter: &dyn MathTypesetter, job: &MathJob) -> Result<String, EngineError> {
    panic::catch_unwind(AssertUnwindSafe(|| typesetter.typeset(&job.latex, job.display)))
        .map_err(|payload| EngineError::Panic(panic_message(payload.as_ref())))?
}

fn worker_loop(
    typesetter: &dyn MathTypesetter,
    rx: mpsc::Receiver<Batch>,
    tx: mpsc::Sender<MathMessage>,
) {
    while let Ok(mut batch) = rx.recv() {
        // Drain to latest: an older batch's tree has already been replaced.
        while let Ok(newer) = rx.try_recv() {
            debug!("math: skipping superseded generation {}", batch.generation);
            batch = newer;
        }

        let start = Instant::now();
        let generation = batch.generation;
        let total = batch.jobs.len();
        let mut failed = 0;
        for job in batch.jobs {
            match typeset_guarded(typesetter, &job) {
                Ok(markup) => {
                    let msg = MathMessage::Typeset {
                        generation,
                        path: job.path,
                        markup,
                    };
                    if tx.send(msg).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!("math: {:?} left as source: {e}", job.latex);
                    failed += 1;
                }
            }
        }
        info!(
            "math: generation {generation} completed in {:.1}ms ({total} spans, {failed} failed)",
            start.elapsed().as_secs_f64() * 1000.0
        );
        if tx.send(MathMessage::Done { generation, failed }).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    impl MathTypesetter for Upper {
        fn typeset(&self, latex: &str, display: bool) -> Result<String, EngineError> {
            if latex.contains("fail") {
                return Err(EngineError::Parse("nope".into()));
            }
            if latex.contains("panic") {
                panic!("typesetter blew up");
            }
            Ok(format!("<math display=\"{display}\">{}</math>", latex.to_uppercase()))
        }
    }

    fn tree() -> RenderedTree {
        RenderedTree::parse(
            "<p>a <span class=\"math math-inline\">x</span> b</p>\
             <p><span class=\"math math-display\">y</span></p>",
        )
        .unwrap()
    }

    fn drain(worker: &MathWorker) -> Vec<MathMessage> {
        let mut out = Vec::new();
        while let Some(msg) = worker.recv_timeout(Duration::from_secs(5)) {
            let done = matches!(msg, MathMessage::Done { .. });
            out.push(msg);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn collects_spans_in_order() {
        let jobs = collect_jobs(&tree());
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].latex, "x");
        assert!(!jobs[0].display);
        assert_eq!(jobs[1].path, vec![1, 0]);
        assert!(jobs[1].display);
    }

    #[test]
    fn apply_writes_markup_once() {
        let mut t = tree();
        assert!(apply(&mut t, &[0, 1], "<math>X</math>".into()));
        assert!(t.to_html().contains(
            "<span class=\"math math-inline typeset\"><math>X</math></span>"
        ));
        assert_eq!(collect_jobs(&t).len(), 1);
        assert!(!apply(&mut t, &[0, 0], "<math/>".into()));
    }

    #[test]
    fn worker_typesets_and_reports_done() {
        let worker = MathWorker::spawn(Arc::new(Upper));
        assert!(worker.submit(1, collect_jobs(&tree())));
        let msgs = drain(&worker);
        assert_eq!(msgs.len(), 3);
        assert_eq!(
            msgs[0],
            MathMessage::Typeset {
                generation: 1,
                path: vec![0, 1],
                markup: "<math display=\"false\">X</math>".into()
            }
        );
        assert_eq!(msgs[2], MathMessage::Done { generation: 1, failed: 0 });
    }

    #[test]
    fn failures_and_panics_are_counted_not_sent() {
        let worker = MathWorker::spawn(Arc::new(Upper));
        let jobs = vec![
            MathJob { path: vec![0], latex: "fail".into(), display: false },
            MathJob { path: vec![1], latex: "panic".into(), display: false },
            MathJob { path: vec![2], latex: "ok".into(), display: true },
        ];
        assert!(worker.submit(7, jobs));
        let msgs = drain(&worker);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1], MathMessage::Done { generation: 7, failed: 2 });
    }

    #[test]
    fn empty_batch_is_not_sent() {
        let worker = MathWorker::spawn(Arc::new(Upper));
        assert!(!worker.submit(1, Vec::new()));
        assert!(worker.try_recv().is_none());
    }
}
