//! The interpreter/executor.
//!
//! Walks the program tree against mutable shell state: statement lists
//! with `&&`/`||` short-circuiting and background scheduling, buffered
//! pipelines, simple-command dispatch (alias expansion, user functions,
//! the command registry, 127 fallback), compound-command control flow,
//! and scoped redirections. Execution ceilings raise
//! [`ControlFlow::Limit`] and are never swallowed.

pub mod arith_eval;
pub mod cond_eval;
pub mod expand;
pub mod redirect;
pub mod state;

use std::time::Instant;

use crate::alias::{expand_alias, AliasOutcome};
use crate::ast::{
    CaseTerminator, Command, CompoundCommand, ListOp, Pipeline, Script, SimpleCommand, Statement,
    Word,
};
use crate::command::{emit_trace, CmdResult, CommandContext, Registry, TraceEvent, TraceSink};
use crate::error::{ControlFlow, LimitKind};
use crate::fs::SyncFs;
use crate::interp::expand::{expand_word_text, expand_words};
use crate::interp::redirect::{build_plan, route_outputs, RedirPlan};
use crate::interp::state::ShellState;
use crate::limits::ExecLimits;

/// Tree-walking executor. Holds the immutable collaborators; all mutable
/// state lives in the [`ShellState`] threaded through each call.
pub struct Executor<'a> {
    pub fs: &'a SyncFs,
    pub limits: &'a ExecLimits,
    pub registry: &'a Registry,
    pub trace: Option<&'a TraceSink>,
}

impl<'a> Executor<'a> {
    pub fn new(
        fs: &'a SyncFs,
        limits: &'a ExecLimits,
        registry: &'a Registry,
        trace: Option<&'a TraceSink>,
    ) -> Self {
        Self {
            fs,
            limits,
            registry,
            trace,
        }
    }

    // -----------------------------------------------------------------------
    // Script / statement
    // -----------------------------------------------------------------------

    pub fn run_script(
        &self,
        state: &mut ShellState,
        script: &Script,
    ) -> Result<CmdResult, ControlFlow> {
        self.run_statements(state, &script.statements)
    }

    pub fn run_statements(
        &self,
        state: &mut ShellState,
        statements: &[Statement],
    ) -> Result<CmdResult, ControlFlow> {
        let mut acc = CmdResult::ok();

        for statement in statements {
            match self.run_statement(state, statement) {
                Ok(result) => {
                    acc.stdout.push_str(&result.stdout);
                    acc.stderr.push_str(&result.stderr);
                    acc.exit_code = result.exit_code;
                    state.last_status = result.exit_code;
                }
                Err(ControlFlow::Errexit {
                    code,
                    stdout,
                    stderr,
                }) => {
                    acc.stdout.push_str(&stdout);
                    acc.stderr.push_str(&stderr);
                    acc.exit_code = code;
                    state.last_status = code;
                    return Ok(acc);
                }
                Err(mut other) => {
                    other.prepend_output(&acc.stdout, &acc.stderr);
                    return Err(other);
                }
            }
        }

        Ok(acc)
    }

    fn run_statement(
        &self,
        state: &mut ShellState,
        stmt: &Statement,
    ) -> Result<CmdResult, ControlFlow> {
        // Deferred syntax errors fire exactly when reached and stop the
        // script, matching non-interactive shell behavior.
        if let Some(deferred) = &stmt.deferred {
            return Err(ControlFlow::Errexit {
                code: 2,
                stdout: String::new(),
                stderr: format!("{}: {}\n", state.script_name, deferred.message),
            });
        }

        if state.opts.noexec {
            return Ok(CmdResult::ok());
        }

        let mut acc = CmdResult::ok();

        if state.opts.verbose {
            if let Some(source) = &stmt.source_text {
                acc.stderr.push_str(source);
                acc.stderr.push('\n');
            }
        }

        if stmt.background {
            return self.run_background(state, stmt, acc);
        }

        let mut exit_code = 0;
        let mut last_ran = 0usize;
        let mut last_negated = false;

        for (i, pipeline) in stmt.pipelines.iter().enumerate() {
            if i > 0 {
                let proceed = match stmt.operators[i - 1] {
                    ListOp::AndIf => exit_code == 0,
                    ListOp::OrIf => exit_code != 0,
                };
                if !proceed {
                    continue;
                }
            }

            let result = match self.run_pipeline(state, pipeline) {
                Ok(r) => r,
                Err(mut e) => {
                    e.prepend_output(&acc.stdout, &acc.stderr);
                    return Err(e);
                }
            };
            acc.stdout.push_str(&result.stdout);
            acc.stderr.push_str(&result.stderr);
            exit_code = result.exit_code;
            state.last_status = exit_code;
            last_ran = i;
            last_negated = pipeline.negated;
        }

        acc.exit_code = exit_code;

        // errexit: only the final pipeline of a list can trigger it, never
        // a negated pipeline or a condition context.
        let short_circuited = last_ran + 1 < stmt.pipelines.len();
        if state.opts.errexit
            && exit_code != 0
            && !short_circuited
            && !last_negated
            && !state.in_condition
        {
            return Err(ControlFlow::Errexit {
                code: exit_code,
                stdout: acc.stdout,
                stderr: acc.stderr,
            });
        }

        Ok(acc)
    }

    /// `&`: run the pipeline chain against a branched state and account it
    /// as a job. Execution is cooperative, so the work happens at the
    /// point of scheduling; `wait` later reports the recorded status.
    fn run_background(
        &self,
        state: &mut ShellState,
        stmt: &Statement,
        mut acc: CmdResult,
    ) -> Result<CmdResult, ControlFlow> {
        let pid = state.allocate_pid();
        emit_trace(self.trace, &TraceEvent::JobStarted { pid });

        let mut branch = state.branch();
        let foreground = Statement {
            background: false,
            ..stmt.clone()
        };
        let status = match self.run_statement(&mut branch, &foreground) {
            Ok(result) => {
                acc.stdout.push_str(&result.stdout);
                acc.stderr.push_str(&result.stderr);
                result.exit_code
            }
            Err(ControlFlow::Limit(e)) => return Err(ControlFlow::Limit(e)),
            Err(other) => {
                let (out, err) = other.output();
                acc.stdout.push_str(out);
                acc.stderr.push_str(err);
                match other {
                    ControlFlow::Exit { code, .. } => code,
                    _ => 1,
                }
            }
        };
        state.command_count = branch.command_count;
        state.record_job(pid, status);

        // The scheduling statement itself succeeds immediately.
        acc.exit_code = 0;
        Ok(acc)
    }

    // -----------------------------------------------------------------------
    // Pipelines
    // -----------------------------------------------------------------------

    fn run_pipeline(
        &self,
        state: &mut ShellState,
        pipeline: &Pipeline,
    ) -> Result<CmdResult, ControlFlow> {
        let started = Instant::now();

        let mut stdin = String::new();
        let mut acc_stderr = String::new();
        let mut statuses = Vec::with_capacity(pipeline.commands.len());
        let mut final_stdout = String::new();

        for (i, command) in pipeline.commands.iter().enumerate() {
            let result = self.run_command(state, command, &stdin)?;
            statuses.push(result.exit_code);

            let is_last = i + 1 == pipeline.commands.len();
            if is_last {
                final_stdout = result.stdout;
                acc_stderr.push_str(&result.stderr);
            } else {
                // Logical pipe: this stage's output is the next stage's
                // stdin; `|&` folds stderr into the stream too.
                let pipe_stderr = pipeline.stderr_pipes.get(i).copied().unwrap_or(false);
                stdin = if pipe_stderr {
                    format!("{}{}", result.stdout, result.stderr)
                } else {
                    acc_stderr.push_str(&result.stderr);
                    result.stdout
                };
            }
        }

        state.pipe_statuses = statuses.clone();

        let mut exit_code = *statuses.last().unwrap_or(&0);
        if state.opts.pipefail {
            if let Some(&failed) = statuses.iter().rev().find(|&&s| s != 0) {
                exit_code = failed;
            }
        }
        if pipeline.negated {
            exit_code = if exit_code == 0 { 1 } else { 0 };
        }

        if pipeline.timed {
            let elapsed = started.elapsed().as_secs_f64();
            acc_stderr.push_str(&format_timing(elapsed, pipeline.timed_posix));
        }

        Ok(CmdResult {
            stdout: final_stdout,
            stderr: acc_stderr,
            exit_code,
        })
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    fn run_command(
        &self,
        state: &mut ShellState,
        command: &Command,
        stdin: &str,
    ) -> Result<CmdResult, ControlFlow> {
        state.command_count += 1;
        if state.command_count > self.limits.max_commands {
            emit_trace(
                self.trace,
                &TraceEvent::LimitExceeded {
                    what: "commands".into(),
                },
            );
            return Err(ControlFlow::limit(
                LimitKind::Commands,
                format!(
                    "maximum command count ({}) exceeded (possible runaway script)",
                    self.limits.max_commands
                ),
            ));
        }

        match command {
            Command::Simple(simple) => self.run_simple(state, simple, stdin),
            Command::Compound(compound) => self.run_compound(state, compound, stdin),
            Command::FunctionDef(def) => {
                state.functions.insert(def.name.clone(), def.clone());
                Ok(CmdResult::ok())
            }
        }
    }

    fn run_simple(
        &self,
        state: &mut ShellState,
        node: &SimpleCommand,
        stdin: &str,
    ) -> Result<CmdResult, ControlFlow> {
        if let Some(line) = node.line {
            state.current_line = line as u32;
        }

        // Alias expansion first; the resolved node replaces the original
        // for the rest of dispatch.
        let mut in_progress = std::collections::HashSet::new();
        let node = match expand_alias(&state.aliases, node, &mut in_progress) {
            AliasOutcome::Unchanged => node.clone(),
            AliasOutcome::Rewritten(rewritten) => rewritten,
            AliasOutcome::Nested(line) => {
                let script = crate::parser::parse(&line).map_err(|e| ControlFlow::Errexit {
                    code: 2,
                    stdout: String::new(),
                    stderr: format!("{}: {}\n", state.script_name, e),
                })?;
                return self.run_script(state, &script);
            }
            AliasOutcome::ParseFailed(message) => {
                return Ok(CmdResult::fail(
                    format!("{}: {}\n", state.script_name, message),
                    2,
                ))
            }
        };

        // Assignment-only command: mutate state, no dispatch.
        if node.name.is_none() {
            let mut stderr = String::new();
            for assignment in &node.assignments {
                let value = match &assignment.value {
                    Some(word) => {
                        let expanded = expand_word_text(self, state, word)?;
                        stderr.push_str(&expanded.stderr);
                        expanded.text
                    }
                    None => String::new(),
                };
                if state.readonly.contains(&assignment.name) {
                    return Ok(CmdResult::fail(
                        format!(
                            "{}: {}: readonly variable\n",
                            state.script_name, assignment.name
                        ),
                        1,
                    ));
                }
                if assignment.append {
                    let mut current = state
                        .get_var(&assignment.name)
                        .map(|s| s.to_string())
                        .unwrap_or_default();
                    current.push_str(&value);
                    state.set_var(&assignment.name, current);
                } else {
                    state.set_var(&assignment.name, value);
                }
            }
            return Ok(CmdResult {
                stdout: String::new(),
                stderr,
                exit_code: 0,
            });
        }

        // Expand name and arguments into fields.
        let mut all_words: Vec<Word> = Vec::new();
        all_words.push(node.name.clone().unwrap());
        all_words.extend(node.args.iter().cloned());
        let expanded = expand_words(self, state, &all_words)?;

        if expanded.fields.is_empty() {
            // The whole command line expanded away.
            return Ok(CmdResult {
                stdout: String::new(),
                stderr: expanded.stderr,
                exit_code: 0,
            });
        }

        let name = expanded.fields[0].clone();
        let args: Vec<String> = expanded.fields[1..].to_vec();
        state.last_arg = args.last().cloned().unwrap_or_else(|| name.clone());

        let mut pre_stderr = expanded.stderr;

        if state.opts.xtrace {
            pre_stderr.push_str(&format!("+ {}\n", expanded.fields.join(" ")));
        }

        // Redirections.
        let plan = match build_plan(self, state, &node.redirections)? {
            Ok(plan) => plan,
            Err(failure) => {
                let mut result = failure.0;
                result.stderr = format!("{}{}", pre_stderr, result.stderr);
                return Ok(result);
            }
        };
        let mut stdin_is_pending = false;
        let effective_stdin = if let Some(content) = plan.stdin.clone() {
            content
        } else if !stdin.is_empty() {
            stdin.to_string()
        } else if let Some(pending) = &state.pending_stdin {
            stdin_is_pending = true;
            pending.clone()
        } else {
            String::new()
        };

        // Prefix assignments are temporary for the command's duration.
        let saved = self.apply_prefix_assignments(state, &node, &mut pre_stderr)?;

        let outcome = self.dispatch(state, &name, &args, &effective_stdin, stdin_is_pending);

        self.restore_prefix_assignments(state, saved);

        let result = match outcome {
            Ok(result) => result,
            Err(mut e) => {
                e.prepend_output("", &pre_stderr);
                return Err(e);
            }
        };

        let mut routed = route_outputs(self, &plan, result);
        routed.stderr = format!("{}{}", pre_stderr, routed.stderr);
        Ok(routed)
    }

    fn apply_prefix_assignments(
        &self,
        state: &mut ShellState,
        node: &SimpleCommand,
        stderr: &mut String,
    ) -> Result<Vec<(String, Option<String>)>, ControlFlow> {
        let mut saved = Vec::new();
        for assignment in &node.assignments {
            let value = match &assignment.value {
                Some(word) => {
                    let expanded = expand_word_text(self, state, word)?;
                    stderr.push_str(&expanded.stderr);
                    expanded.text
                }
                None => String::new(),
            };
            saved.push((
                assignment.name.clone(),
                state.get_var(&assignment.name).map(|s| s.to_string()),
            ));
            if assignment.append {
                let mut current = state
                    .get_var(&assignment.name)
                    .map(|s| s.to_string())
                    .unwrap_or_default();
                current.push_str(&value);
                state.set_var(&assignment.name, current);
            } else {
                state.set_var(&assignment.name, value);
            }
            state.export_var(&assignment.name);
        }
        Ok(saved)
    }

    fn restore_prefix_assignments(
        &self,
        state: &mut ShellState,
        saved: Vec<(String, Option<String>)>,
    ) {
        for (name, previous) in saved.into_iter().rev() {
            match previous {
                Some(value) => state.set_var(&name, value),
                None => state.unset_var(&name),
            }
        }
    }

    /// Dispatch order: interpreter-owned control builtins, user functions,
    /// registry commands, then 127.
    fn dispatch(
        &self,
        state: &mut ShellState,
        name: &str,
        args: &[String],
        stdin: &str,
        stdin_is_pending: bool,
    ) -> Result<CmdResult, ControlFlow> {
        if let Some(result) = self.dispatch_control(state, name, args)? {
            return Ok(result);
        }

        if let Some(def) = state.functions.get(name).cloned() {
            return self.call_function(state, &def, args, stdin);
        }

        if let Some(command) = self.registry.get(name) {
            emit_trace(
                self.trace,
                &TraceEvent::CommandDispatched {
                    name: name.to_string(),
                    argc: args.len(),
                },
            );
            let mut ctx = CommandContext {
                state,
                fs: self.fs,
                limits: self.limits,
                stdin,
                stdin_is_pending,
                trace: self.trace,
            };
            return command.run(&mut ctx, args);
        }

        emit_trace(
            self.trace,
            &TraceEvent::CommandNotFound {
                name: name.to_string(),
            },
        );
        Ok(CmdResult::fail(
            format!("{}: {}: command not found\n", state.script_name, name),
            crate::limits::NOT_FOUND_EXIT_CODE,
        ))
    }

    /// Builtins inseparable from the executor: control flow, re-entrant
    /// evaluation, job joining, and introspection over dispatch order.
    fn dispatch_control(
        &self,
        state: &mut ShellState,
        name: &str,
        args: &[String],
    ) -> Result<Option<CmdResult>, ControlFlow> {
        match name {
            "exit" => {
                let code = args
                    .first()
                    .and_then(|a| a.parse::<i32>().ok())
                    .unwrap_or(state.last_status);
                Err(ControlFlow::Exit {
                    code,
                    stdout: String::new(),
                    stderr: String::new(),
                })
            }
            "return" => {
                if state.call_depth == 0 {
                    return Ok(Some(CmdResult::fail(
                        format!(
                            "{}: return: can only `return' from a function or sourced script\n",
                            state.script_name
                        ),
                        1,
                    )));
                }
                let code = args
                    .first()
                    .and_then(|a| a.parse::<i32>().ok())
                    .unwrap_or(state.last_status);
                Err(ControlFlow::Return {
                    code,
                    stdout: String::new(),
                    stderr: String::new(),
                })
            }
            "break" | "continue" => {
                if state.loop_depth == 0 {
                    return Ok(Some(CmdResult::ok()));
                }
                let levels = args
                    .first()
                    .and_then(|a| a.parse::<u32>().ok())
                    .unwrap_or(1)
                    .max(1);
                if name == "break" {
                    Err(ControlFlow::Break {
                        levels,
                        stdout: String::new(),
                        stderr: String::new(),
                    })
                } else {
                    Err(ControlFlow::Continue {
                        levels,
                        stdout: String::new(),
                        stderr: String::new(),
                    })
                }
            }
            "eval" => {
                let text = args.join(" ");
                if text.trim().is_empty() {
                    return Ok(Some(CmdResult::ok()));
                }
                let script = match crate::parser::parse(&text) {
                    Ok(s) => s,
                    Err(e) => {
                        return Ok(Some(CmdResult::fail(
                            format!("{}: eval: {}\n", state.script_name, e),
                            2,
                        )))
                    }
                };
                Ok(Some(self.run_script(state, &script)?))
            }
            "source" | "." => {
                let target = match args.first() {
                    Some(t) => t,
                    None => {
                        return Ok(Some(CmdResult::fail(
                            format!("{}: {}: filename argument required\n", state.script_name, name),
                            2,
                        )))
                    }
                };
                let path = self.fs.resolve(&state.cwd, target);
                let content = match self.fs.read_file(&path) {
                    Ok(c) => c,
                    Err(_) => {
                        return Ok(Some(CmdResult::fail(
                            format!(
                                "{}: {}: {}: No such file or directory\n",
                                state.script_name, name, target
                            ),
                            1,
                        )))
                    }
                };
                let script = match crate::parser::parse(&content) {
                    Ok(s) => s,
                    Err(e) => {
                        return Ok(Some(CmdResult::fail(
                            format!("{}: {}: {}\n", state.script_name, target, e),
                            2,
                        )))
                    }
                };
                // Sourced scripts may `return`; they see the caller's
                // positionals unless new ones are given.
                let replaced = if args.len() > 1 {
                    let old = std::mem::replace(&mut state.positional, args[1..].to_vec());
                    Some(old)
                } else {
                    None
                };
                state.call_depth += 1;
                let outcome = self.run_script(state, &script);
                state.call_depth -= 1;
                if let Some(old) = replaced {
                    state.positional = old;
                }
                match outcome {
                    Ok(result) => Ok(Some(result)),
                    Err(ControlFlow::Return {
                        code,
                        stdout,
                        stderr,
                    }) => Ok(Some(CmdResult {
                        stdout,
                        stderr,
                        exit_code: code,
                    })),
                    Err(e) => Err(e),
                }
            }
            "wait" => {
                let mut last = 0;
                let target: Option<u32> = args.first().and_then(|a| a.parse().ok());
                for job in state.jobs.iter_mut() {
                    if target.map(|t| t == job.pid).unwrap_or(true) && !job.reaped {
                        job.reaped = true;
                        last = job.exit_code;
                        emit_trace(
                            self.trace,
                            &TraceEvent::JobReaped {
                                pid: job.pid,
                                exit_code: job.exit_code,
                            },
                        );
                    }
                }
                Ok(Some(CmdResult {
                    exit_code: last,
                    ..CmdResult::ok()
                }))
            }
            "type" => {
                let mut out = String::new();
                let mut status = 0;
                for arg in args {
                    if let Some(value) = state.aliases.get(arg) {
                        out.push_str(&format!("{} is aliased to `{}'\n", arg, value));
                    } else if state.functions.contains_key(arg) {
                        out.push_str(&format!("{} is a function\n", arg));
                    } else if is_control_builtin(arg) || self.registry.contains(arg) {
                        out.push_str(&format!("{} is a shell builtin\n", arg));
                    } else {
                        status = 1;
                    }
                }
                Ok(Some(CmdResult {
                    stdout: out,
                    stderr: String::new(),
                    exit_code: status,
                }))
            }
            _ => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Functions
    // -----------------------------------------------------------------------

    fn call_function(
        &self,
        state: &mut ShellState,
        def: &crate::ast::FunctionDef,
        args: &[String],
        stdin: &str,
    ) -> Result<CmdResult, ControlFlow> {
        if state.call_depth >= self.limits.max_recursion_depth {
            emit_trace(
                self.trace,
                &TraceEvent::LimitExceeded {
                    what: "recursion".into(),
                },
            );
            return Err(ControlFlow::limit(
                LimitKind::RecursionDepth,
                format!(
                    "maximum function recursion depth ({}) exceeded",
                    self.limits.max_recursion_depth
                ),
            ));
        }

        let saved_positional = std::mem::replace(&mut state.positional, args.to_vec());
        state.call_depth += 1;
        state.push_local_frame();

        let outcome = self.run_compound(state, &def.body, stdin);

        state.pop_local_frame();
        state.call_depth -= 1;
        state.positional = saved_positional;

        match outcome {
            Ok(result) => Ok(result),
            Err(ControlFlow::Return {
                code,
                stdout,
                stderr,
            }) => Ok(CmdResult {
                stdout,
                stderr,
                exit_code: code,
            }),
            Err(other) => Err(other),
        }
    }

    // -----------------------------------------------------------------------
    // Compound commands
    // -----------------------------------------------------------------------

    fn run_compound(
        &self,
        state: &mut ShellState,
        compound: &CompoundCommand,
        stdin: &str,
    ) -> Result<CmdResult, ControlFlow> {
        // Compound-level redirections wrap the whole construct.
        let plan = match build_plan(self, state, compound.redirections())? {
            Ok(plan) => plan,
            Err(failure) => return Ok(failure.0),
        };

        // Redirected or piped input becomes the pending stdin buffer for
        // the body, restored on every exit path.
        let body_stdin = plan
            .stdin
            .clone()
            .or_else(|| (!stdin.is_empty()).then(|| stdin.to_string()));
        let saved_stdin = match body_stdin {
            Some(content) => Some(state.pending_stdin.replace(content)),
            None => None,
        };

        let outcome = self.run_compound_body(state, compound, stdin, &plan);

        if let Some(previous) = saved_stdin {
            state.pending_stdin = previous;
        }

        let result = outcome?;
        Ok(route_outputs(self, &plan, result))
    }

    fn run_compound_body(
        &self,
        state: &mut ShellState,
        compound: &CompoundCommand,
        stdin: &str,
        _plan: &RedirPlan,
    ) -> Result<CmdResult, ControlFlow> {
        match compound {
            CompoundCommand::If(node) => {
                let mut acc = CmdResult::ok();
                for (condition, body) in &node.arms {
                    let (cond_result, code) = self.run_condition(state, condition)?;
                    acc.stdout.push_str(&cond_result.stdout);
                    acc.stderr.push_str(&cond_result.stderr);
                    if code == 0 {
                        let taken = self.run_statements(state, body).map_err(|mut e| {
                            e.prepend_output(&acc.stdout, &acc.stderr);
                            e
                        })?;
                        acc.stdout.push_str(&taken.stdout);
                        acc.stderr.push_str(&taken.stderr);
                        acc.exit_code = taken.exit_code;
                        return Ok(acc);
                    }
                }
                if let Some(body) = &node.else_body {
                    let taken = self.run_statements(state, body).map_err(|mut e| {
                        e.prepend_output(&acc.stdout, &acc.stderr);
                        e
                    })?;
                    acc.stdout.push_str(&taken.stdout);
                    acc.stderr.push_str(&taken.stderr);
                    acc.exit_code = taken.exit_code;
                    return Ok(acc);
                }
                acc.exit_code = 0;
                Ok(acc)
            }

            CompoundCommand::While(node) => self.run_loop(state, node, false),
            CompoundCommand::Until(node) => self.run_loop(state, node, true),

            CompoundCommand::For(node) => {
                let items: Vec<String> = match &node.words {
                    Some(words) => {
                        let expanded = expand_words(self, state, words)?;
                        expanded.fields
                    }
                    None => state.positional.clone(),
                };
                self.run_for_items(state, &node.variable, &items, &node.body)
            }

            CompoundCommand::ForArith(node) => {
                let mut acc = CmdResult::ok();
                if let Some(init) = &node.init {
                    arith_or_fail(state, init)?;
                }
                let mut iterations: u64 = 0;
                loop {
                    if let Some(cond) = &node.cond {
                        if arith_or_fail(state, cond)? == 0 {
                            break;
                        }
                    }
                    iterations += 1;
                    if iterations > self.limits.max_loop_iterations {
                        return Err(self.loop_limit());
                    }

                    match self.run_loop_body(state, &node.body, &mut acc)? {
                        LoopSignal::Normal | LoopSignal::Continue => {}
                        LoopSignal::Break => break,
                    }

                    if let Some(step) = &node.step {
                        arith_or_fail(state, step)?;
                    }
                }
                Ok(acc)
            }

            CompoundCommand::Case(node) => {
                let subject = expand_word_text(self, state, &node.subject)?.text;
                let mut acc = CmdResult::ok();
                let mut fall_through = false;

                for arm in &node.arms {
                    let matched = fall_through
                        || {
                            let mut hit = false;
                            for pattern in &arm.patterns {
                                let pat = expand::expand_word_pattern(self, state, pattern)?;
                                if expand::glob_match(&pat, &subject) {
                                    hit = true;
                                    break;
                                }
                            }
                            hit
                        };

                    if !matched {
                        continue;
                    }

                    let result = self.run_statements(state, &arm.body).map_err(|mut e| {
                        e.prepend_output(&acc.stdout, &acc.stderr);
                        e
                    })?;
                    acc.stdout.push_str(&result.stdout);
                    acc.stderr.push_str(&result.stderr);
                    acc.exit_code = result.exit_code;

                    match arm.terminator {
                        CaseTerminator::Break => return Ok(acc),
                        CaseTerminator::FallThrough => {
                            fall_through = true;
                        }
                        CaseTerminator::Continue => {
                            fall_through = false;
                        }
                    }
                }
                Ok(acc)
            }

            CompoundCommand::Subshell(node) => {
                // Isolation: the body runs against a structural copy; only
                // the command count flows back.
                let mut branch = state.branch();
                let outcome = self.run_subshell_body(&mut branch, &node.body, stdin);
                state.command_count = branch.command_count;
                outcome
            }

            CompoundCommand::Group(node) => self.run_statements(state, &node.body),

            CompoundCommand::Arithmetic(node) => {
                if let Some(line) = node.line {
                    state.current_line = line as u32;
                }
                match arith_eval::eval_arith(state, &node.expr) {
                    Ok(value) => Ok(CmdResult {
                        exit_code: if value != 0 { 0 } else { 1 },
                        ..CmdResult::ok()
                    }),
                    Err(e) => Ok(CmdResult::fail(
                        format!("{}: ((: {}\n", state.script_name, e),
                        1,
                    )),
                }
            }

            CompoundCommand::Conditional(node) => {
                if let Some(line) = node.line {
                    state.current_line = line as u32;
                }
                let truth = cond_eval::eval_cond(self, state, &node.expr)?;
                Ok(CmdResult {
                    exit_code: if truth { 0 } else { 1 },
                    ..CmdResult::ok()
                })
            }
        }
    }

    fn run_subshell_body(
        &self,
        branch: &mut ShellState,
        body: &[Statement],
        _stdin: &str,
    ) -> Result<CmdResult, ControlFlow> {
        match self.run_statements(branch, body) {
            Ok(result) => Ok(result),
            // `exit` inside a subshell ends the subshell, not the parent.
            Err(ControlFlow::Exit {
                code,
                stdout,
                stderr,
            }) => Ok(CmdResult {
                stdout,
                stderr,
                exit_code: code,
            }),
            Err(ControlFlow::Limit(e)) => Err(ControlFlow::Limit(e)),
            Err(other) => Err(other),
        }
    }

    fn run_condition(
        &self,
        state: &mut ShellState,
        condition: &[Statement],
    ) -> Result<(CmdResult, i32), ControlFlow> {
        let was = state.in_condition;
        state.in_condition = true;
        let outcome = self.run_statements(state, condition);
        state.in_condition = was;
        let result = outcome?;
        let code = result.exit_code;
        Ok((result, code))
    }

    fn run_loop(
        &self,
        state: &mut ShellState,
        node: &crate::ast::LoopCommand,
        until: bool,
    ) -> Result<CmdResult, ControlFlow> {
        let mut acc = CmdResult::ok();
        let mut iterations: u64 = 0;

        loop {
            let (cond_result, code) = self.run_condition(state, &node.condition)?;
            acc.stdout.push_str(&cond_result.stdout);
            acc.stderr.push_str(&cond_result.stderr);

            let proceed = if until { code != 0 } else { code == 0 };
            if !proceed {
                break;
            }

            iterations += 1;
            if iterations > self.limits.max_loop_iterations {
                return Err(self.loop_limit());
            }

            match self.run_loop_body(state, &node.body, &mut acc)? {
                LoopSignal::Normal | LoopSignal::Continue => {}
                LoopSignal::Break => break,
            }
        }

        // A loop's status is its last body command's status (0 if the body
        // never ran).
        Ok(acc)
    }

    fn run_for_items(
        &self,
        state: &mut ShellState,
        variable: &str,
        items: &[String],
        body: &[Statement],
    ) -> Result<CmdResult, ControlFlow> {
        if !crate::lexer::is_valid_name(variable) {
            return Ok(CmdResult::fail(
                format!(
                    "{}: `{}': not a valid identifier\n",
                    state.script_name, variable
                ),
                1,
            ));
        }

        let mut acc = CmdResult::ok();
        let mut iterations: u64 = 0;

        for item in items {
            iterations += 1;
            if iterations > self.limits.max_loop_iterations {
                return Err(self.loop_limit());
            }
            state.set_var(variable, item.clone());

            match self.run_loop_body(state, body, &mut acc)? {
                LoopSignal::Normal | LoopSignal::Continue => {}
                LoopSignal::Break => break,
            }
        }
        Ok(acc)
    }

    /// Run one loop iteration's body, translating `break`/`continue`
    /// signals at this nesting level and re-raising them for outer loops.
    fn run_loop_body(
        &self,
        state: &mut ShellState,
        body: &[Statement],
        acc: &mut CmdResult,
    ) -> Result<LoopSignal, ControlFlow> {
        state.loop_depth += 1;
        let outcome = self.run_statements(state, body);
        state.loop_depth -= 1;

        match outcome {
            Ok(result) => {
                acc.stdout.push_str(&result.stdout);
                acc.stderr.push_str(&result.stderr);
                acc.exit_code = result.exit_code;
                Ok(LoopSignal::Normal)
            }
            Err(ControlFlow::Break {
                levels,
                stdout,
                stderr,
            }) => {
                acc.stdout.push_str(&stdout);
                acc.stderr.push_str(&stderr);
                if levels > 1 {
                    Err(ControlFlow::Break {
                        levels: levels - 1,
                        stdout: String::new(),
                        stderr: String::new(),
                    })
                } else {
                    Ok(LoopSignal::Break)
                }
            }
            Err(ControlFlow::Continue {
                levels,
                stdout,
                stderr,
            }) => {
                acc.stdout.push_str(&stdout);
                acc.stderr.push_str(&stderr);
                if levels > 1 {
                    Err(ControlFlow::Continue {
                        levels: levels - 1,
                        stdout: String::new(),
                        stderr: String::new(),
                    })
                } else {
                    Ok(LoopSignal::Continue)
                }
            }
            Err(mut other) => {
                other.prepend_output(&acc.stdout, &acc.stderr);
                acc.stdout.clear();
                acc.stderr.clear();
                Err(other)
            }
        }
    }

    fn loop_limit(&self) -> ControlFlow {
        emit_trace(
            self.trace,
            &TraceEvent::LimitExceeded {
                what: "loop iterations".into(),
            },
        );
        ControlFlow::limit(
            LimitKind::LoopIterations,
            format!(
                "maximum loop iterations ({}) exceeded (possible infinite loop)",
                self.limits.max_loop_iterations
            ),
        )
    }
}

enum LoopSignal {
    Normal,
    Break,
    Continue,
}

fn arith_or_fail(
    state: &mut ShellState,
    expr: &crate::ast::ArithExpr,
) -> Result<i64, ControlFlow> {
    arith_eval::eval_arith(state, expr).map_err(|e| ControlFlow::Errexit {
        code: 1,
        stdout: String::new(),
        stderr: format!("{}: ((: {}\n", state.script_name, e),
    })
}

fn is_control_builtin(name: &str) -> bool {
    matches!(
        name,
        "exit" | "return" | "break" | "continue" | "eval" | "source" | "." | "wait" | "type"
    )
}

/// `time` output: bash's default three-line form, or the POSIX `-p` form.
fn format_timing(elapsed: f64, posix: bool) -> String {
    if posix {
        format!("real {:.2}\nuser {:.2}\nsys {:.2}\n", elapsed, 0.0, 0.0)
    } else {
        let minutes = (elapsed / 60.0).floor() as u64;
        let seconds = elapsed - (minutes as f64) * 60.0;
        format!(
            "\nreal\t{}m{:.3}s\nuser\t{}m{:.3}s\nsys\t{}m{:.3}s\n",
            minutes, seconds, 0, 0.0, 0, 0.0
        )
    }
}
