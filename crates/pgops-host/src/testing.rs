//! Scripted in-process [`Runner`] for tests.
//!
//! Records every [`CommandSpec`] it is asked to run and replays queued
//! outputs; once the queue is exhausted every command succeeds with empty
//! output.

use std::cell::RefCell;
use std::collections::VecDeque;

use crate::process::{CommandSpec, ExecError, ExecOutput, Runner};

/// Recording runner with scripted responses.
#[derive(Default)]
pub struct ScriptedRunner {
    responses: RefCell<VecDeque<ExecOutput>>,
    calls: RefCell<Vec<CommandSpec>>,
    hook: RefCell<Option<Box<dyn FnMut(&CommandSpec)>>>,
}

impl ScriptedRunner {
    /// Creates a runner where every command succeeds with empty output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one response; responses are consumed in call order.
    pub fn push(&self, output: ExecOutput) {
        self.responses.borrow_mut().push_back(output);
    }

    /// All command specs run so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }

    /// Installs a side-effect hook invoked with every spec before the
    /// scripted response is returned. Lets tests emulate what the real
    /// command would have done to the filesystem (pid markers, backup
    /// promotion).
    pub fn set_hook(&self, hook: impl FnMut(&CommandSpec) + 'static) {
        *self.hook.borrow_mut() = Some(Box::new(hook));
    }

    /// Number of recorded invocations whose command line contains `needle`.
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.display().contains(needle))
            .count()
    }
}

impl Runner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> Result<ExecOutput, ExecError> {
        self.calls.borrow_mut().push(spec.clone());
        if let Some(hook) = self.hook.borrow_mut().as_mut() {
            hook(spec);
        }
        Ok(self
            .responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| ExecOutput::ok("")))
    }
}
