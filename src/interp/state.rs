//! Mutable shell state owned by one interpreter session.
//!
//! One `ShellState` lives for the whole session and is threaded mutably
//! through execution. Subshells and command substitutions never share it:
//! they run against a structural copy ([`ShellState::branch`]) taken at the
//! moment of entry, so no two logical branches can observe each other's
//! mutations.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::ast::FunctionDef;

/// Options toggled by `set`.
#[derive(Debug, Clone, Default)]
pub struct ShellOpts {
    /// `set -e`
    pub errexit: bool,
    /// `set -u`
    pub nounset: bool,
    /// `set -x`
    pub xtrace: bool,
    /// `set -v`
    pub verbose: bool,
    /// `set -o pipefail`
    pub pipefail: bool,
    /// `set -n`
    pub noexec: bool,
    /// `set -f`
    pub noglob: bool,
}

/// A background statement's bookkeeping entry.
#[derive(Debug, Clone)]
pub struct Job {
    pub pid: u32,
    pub exit_code: i32,
    pub reaped: bool,
}

/// Saved binding for one `local` declaration: the previous value (None if
/// the variable was unset before).
type SavedBinding = (String, Option<String>);

#[derive(Debug, Clone)]
pub struct ShellState {
    /// All shell variables. Exported ones additionally appear in command
    /// environments.
    pub vars: HashMap<String, String>,
    pub exported: HashSet<String>,
    pub readonly: HashSet<String>,

    pub functions: HashMap<String, FunctionDef>,
    /// Alias table in definition order.
    pub aliases: IndexMap<String, String>,

    /// `$1`... with `$0` kept separately.
    pub positional: Vec<String>,
    pub script_name: String,

    pub cwd: String,
    pub prev_dir: String,

    pub last_status: i32,
    /// `$_`
    pub last_arg: String,
    /// `$LINENO`
    pub current_line: u32,

    pub opts: ShellOpts,

    /// True while an `if`/`while`/`until` condition list runs; errexit
    /// does not fire there.
    pub in_condition: bool,

    /// One frame per active function call, holding bindings to restore on
    /// return.
    pub local_frames: Vec<Vec<SavedBinding>>,
    pub call_depth: u32,
    pub loop_depth: u32,

    /// Commands dispatched during the current `exec()`.
    pub command_count: u64,

    pub jobs: Vec<Job>,
    pub last_bg_pid: u32,
    pub(crate) next_pid: u32,

    /// Pipeline exit statuses for `$PIPESTATUS`-style reporting.
    pub pipe_statuses: Vec<i32>,

    /// Buffered stdin visible to commands inside a compound whose input
    /// was redirected (or piped); `read` consumes lines from it.
    pub pending_stdin: Option<String>,
}

impl Default for ShellState {
    fn default() -> Self {
        Self {
            vars: HashMap::new(),
            exported: HashSet::new(),
            readonly: HashSet::new(),
            functions: HashMap::new(),
            aliases: IndexMap::new(),
            positional: Vec::new(),
            script_name: "shellbox".to_string(),
            cwd: "/".to_string(),
            prev_dir: "/".to_string(),
            last_status: 0,
            last_arg: String::new(),
            current_line: 1,
            opts: ShellOpts::default(),
            in_condition: false,
            local_frames: Vec::new(),
            call_depth: 0,
            loop_depth: 0,
            command_count: 0,
            jobs: Vec::new(),
            last_bg_pid: 0,
            next_pid: 1000,
            pipe_statuses: Vec::new(),
            pending_stdin: None,
        }
    }
}

impl ShellState {
    /// Consume one line from the pending stdin buffer. Returns the line
    /// and whether any input was available.
    pub fn take_stdin_line(&mut self) -> (String, bool) {
        match self.pending_stdin.as_mut() {
            Some(buffer) if !buffer.is_empty() => {
                let line = match buffer.find('\n') {
                    Some(idx) => {
                        let line = buffer[..idx].to_string();
                        *buffer = buffer[idx + 1..].to_string();
                        line
                    }
                    None => std::mem::take(buffer),
                };
                (line, true)
            }
            _ => (String::new(), false),
        }
    }
}

impl ShellState {
    /// Structural copy for a subshell or command substitution. Mutations in
    /// the branch never propagate back; the caller copies back only the
    /// command count so resource ceilings stay global.
    pub fn branch(&self) -> ShellState {
        let mut copy = self.clone();
        copy.next_pid += 1;
        copy
    }

    pub fn get_var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|s| s.as_str())
    }

    pub fn set_var(&mut self, name: &str, value: impl Into<String>) {
        self.vars.insert(name.to_string(), value.into());
    }

    pub fn unset_var(&mut self, name: &str) {
        self.vars.remove(name);
        self.exported.remove(name);
    }

    pub fn export_var(&mut self, name: &str) {
        self.exported.insert(name.to_string());
    }

    /// Environment map a command sees: exported variables only.
    pub fn exported_env(&self) -> HashMap<String, String> {
        self.vars
            .iter()
            .filter(|(k, _)| self.exported.contains(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Record a local binding in the innermost function frame so it can be
    /// restored when the function returns.
    pub fn save_local(&mut self, name: &str) {
        if let Some(frame) = self.local_frames.last_mut() {
            if frame.iter().any(|(n, _)| n == name) {
                return;
            }
            let previous = self.vars.get(name).cloned();
            frame.push((name.to_string(), previous));
        }
    }

    pub fn push_local_frame(&mut self) {
        self.local_frames.push(Vec::new());
    }

    pub fn pop_local_frame(&mut self) {
        if let Some(frame) = self.local_frames.pop() {
            for (name, previous) in frame.into_iter().rev() {
                match previous {
                    Some(value) => {
                        self.vars.insert(name, value);
                    }
                    None => {
                        self.vars.remove(&name);
                    }
                }
            }
        }
    }

    pub fn allocate_pid(&mut self) -> u32 {
        self.next_pid += 1;
        self.next_pid
    }

    pub fn record_job(&mut self, pid: u32, exit_code: i32) {
        self.jobs.push(Job {
            pid,
            exit_code,
            reaped: false,
        });
        self.last_bg_pid = pid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_isolates_mutations() {
        let mut parent = ShellState::default();
        parent.set_var("X", "1");

        let mut child = parent.branch();
        child.set_var("X", "2");
        child.set_var("Y", "3");
        child.cwd = "/elsewhere".to_string();

        assert_eq!(parent.get_var("X"), Some("1"));
        assert_eq!(parent.get_var("Y"), None);
        assert_eq!(parent.cwd, "/");
    }

    #[test]
    fn exported_env_filters() {
        let mut state = ShellState::default();
        state.set_var("PUBLIC", "yes");
        state.set_var("PRIVATE", "no");
        state.export_var("PUBLIC");

        let env = state.exported_env();
        assert_eq!(env.get("PUBLIC").map(String::as_str), Some("yes"));
        assert!(!env.contains_key("PRIVATE"));
    }

    #[test]
    fn local_frame_restores_previous_values() {
        let mut state = ShellState::default();
        state.set_var("A", "outer");

        state.push_local_frame();
        state.save_local("A");
        state.save_local("B");
        state.set_var("A", "inner");
        state.set_var("B", "fresh");
        assert_eq!(state.get_var("A"), Some("inner"));

        state.pop_local_frame();
        assert_eq!(state.get_var("A"), Some("outer"));
        assert_eq!(state.get_var("B"), None);
    }

    #[test]
    fn job_recording_sets_last_bg_pid() {
        let mut state = ShellState::default();
        let pid = state.allocate_pid();
        state.record_job(pid, 0);
        assert_eq!(state.last_bg_pid, pid);
        assert_eq!(state.jobs.len(), 1);
    }
}
