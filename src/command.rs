//! The command capability.
//!
//! Builtin utilities and embedder-supplied commands implement
//! [`ShellCommand`] and are dispatched through a [`Registry`]. The
//! executor hands each invocation a [`CommandContext`] exposing shell
//! state, the filesystem, stdin content, limits, and the optional trace
//! sink. Command failures are data (a non-zero `exit_code`), never errors;
//! the `Err` channel is reserved for control flow (`exit`, execution
//! limits).

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::ControlFlow;
use crate::fs::SyncFs;
use crate::interp::state::ShellState;
use crate::limits::ExecLimits;

/// Process-like result of one command invocation.
#[derive(Debug, Clone, Default)]
pub struct CmdResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CmdResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn out(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn fail(stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }
}

/// Structured events for the optional trace sink.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    CommandDispatched { name: String, argc: usize },
    CommandNotFound { name: String },
    LimitExceeded { what: String },
    JobStarted { pid: u32 },
    JobReaped { pid: u32, exit_code: i32 },
}

/// Receives trace events serialized as JSON lines.
pub type TraceSink = Box<dyn Fn(&str) + Send + Sync>;

pub fn emit_trace(sink: Option<&TraceSink>, event: &TraceEvent) {
    if let Some(sink) = sink {
        if let Ok(line) = serde_json::to_string(event) {
            sink(&line);
        }
    }
}

/// Everything a command may touch while running.
pub struct CommandContext<'a> {
    pub state: &'a mut ShellState,
    pub fs: &'a SyncFs,
    pub limits: &'a ExecLimits,
    /// Buffered stdin for this invocation.
    pub stdin: &'a str,
    /// True when `stdin` is a view of the enclosing compound's pending
    /// buffer; consuming commands (`read`) then advance that buffer.
    pub stdin_is_pending: bool,
    pub trace: Option<&'a TraceSink>,
}

impl<'a> CommandContext<'a> {
    pub fn get_var(&self, name: &str) -> Option<&str> {
        self.state.get_var(name)
    }

    pub fn set_var(&mut self, name: &str, value: impl Into<String>) {
        self.state.set_var(name, value);
    }

    pub fn cwd(&self) -> &str {
        &self.state.cwd
    }

    /// Resolve a command operand against the current working directory.
    pub fn resolve_path(&self, path: &str) -> String {
        self.fs.resolve(&self.state.cwd, path)
    }
}

/// One registered command.
pub trait ShellCommand: Send + Sync {
    fn run(&self, ctx: &mut CommandContext<'_>, args: &[String]) -> Result<CmdResult, ControlFlow>;
}

impl<F> ShellCommand for F
where
    F: Fn(&mut CommandContext<'_>, &[String]) -> Result<CmdResult, ControlFlow> + Send + Sync,
{
    fn run(&self, ctx: &mut CommandContext<'_>, args: &[String]) -> Result<CmdResult, ControlFlow> {
        self(ctx, args)
    }
}

/// Pluggable command registry, iterated in registration order.
#[derive(Default)]
pub struct Registry {
    commands: IndexMap<String, Box<dyn ShellCommand>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the shell-intrinsic builtins.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtins::install(&mut registry);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, command: Box<dyn ShellCommand>) {
        self.commands.insert(name.into(), command);
    }

    pub fn get(&self, name: &str) -> Option<&dyn ShellCommand> {
        self.commands.get(name).map(|b| b.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut CommandContext<'_>, _: &[String]) -> Result<CmdResult, ControlFlow> {
        Ok(CmdResult::ok())
    }

    #[test]
    fn registry_keeps_registration_order() {
        let mut registry = Registry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.register(name, Box::new(noop));
        }
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn trace_event_serializes_tagged() {
        let event = TraceEvent::CommandNotFound {
            name: "frobnicate".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"command_not_found\""));
        assert!(json.contains("frobnicate"));
    }
}
