//! Continuation flattening.
//!
//! A task's continuation may yield [`Suspend::Call`] to run a nested
//! continuation as a sub-call. The flattener keeps those frames on an
//! explicit stack so that one resume of the task produces exactly one
//! suspension, no matter how deep the call chain is.

use crate::continuation::{Continuation, Step, Suspend};
use crate::cx::Cx;
use crate::error::Result;

/// Frame stack driving one task.
pub(crate) struct Flattener {
    frames: Vec<Box<dyn Continuation>>,
}

impl Flattener {
    pub(crate) fn new(root: Box<dyn Continuation>) -> Self {
        Self { frames: vec![root] }
    }

    /// Pushes a frame that runs before the current top resumes.
    pub(crate) fn push(&mut self, frame: Box<dyn Continuation>) {
        self.frames.push(frame);
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Advances the task to its next suspension.
    ///
    /// Finished frames are popped and their caller resumed in the same step.
    /// The owning task's liveness is checked before every frame step, so a
    /// task closed from inside a nested frame stops descending immediately.
    pub(crate) fn step(&mut self, cx: &mut Cx<'_>) -> Result<Step> {
        loop {
            if !cx.is_alive(cx.task_id()) {
                self.frames.clear();
                return Ok(Step::Done);
            }
            let Some(top) = self.frames.last_mut() else {
                return Ok(Step::Done);
            };
            match top.resume(cx)? {
                Step::Done => {
                    self.frames.pop();
                }
                Step::Yield(Suspend::Call(frame)) => {
                    tracing::trace!(task_id = ?cx.task_id(), depth = self.frames.len() + 1, "call");
                    self.frames.push(frame);
                }
                Step::Yield(suspend) => return Ok(Step::Yield(suspend)),
            }
        }
    }
}
