//! Redirection handling.
//!
//! In the buffered execution model a redirection never mutates global
//! descriptor state: each command invocation builds a private
//! [`RedirPlan`] from its redirection list (acquiring stdin content and
//! truncating output targets up front), the command runs against that
//! plan, and [`route_outputs`] delivers the buffered stdout/stderr
//! afterwards. The plan dies with the invocation, so the prior binding is
//! restored on every exit path by construction — normal return, error, or
//! control flow unwinding through the body.

use crate::ast::{RedirOp, RedirTarget, Redirection};
use crate::command::CmdResult;
use crate::error::ControlFlow;
use crate::interp::expand::{expand_word_text, expand_words};
use crate::interp::state::ShellState;
use crate::interp::Executor;

/// Where one output descriptor's buffered content ends up.
#[derive(Debug, Clone, PartialEq)]
pub enum Sink {
    /// The session's stdout stream.
    Stdout,
    /// The session's stderr stream.
    Stderr,
    File { path: String, append: bool },
    Discard,
}

#[derive(Debug, Clone)]
pub struct RedirPlan {
    /// Stdin content acquired from `<`, heredocs, and herestrings; None
    /// means inherit the pipeline stdin.
    pub stdin: Option<String>,
    pub out: Sink,
    pub err: Sink,
    /// Stderr produced while expanding redirection targets.
    pub setup_stderr: String,
}

impl Default for RedirPlan {
    fn default() -> Self {
        Self {
            stdin: None,
            out: Sink::Stdout,
            err: Sink::Stderr,
            setup_stderr: String::new(),
        }
    }
}

/// Failure opening a redirection target: the command must not run and the
/// invocation reports status 1.
pub struct RedirFailure(pub CmdResult);

/// Build the plan for one command's redirection list, in source order.
pub fn build_plan(
    ex: &Executor<'_>,
    state: &mut ShellState,
    redirections: &[Redirection],
) -> Result<Result<RedirPlan, RedirFailure>, ControlFlow> {
    let mut plan = RedirPlan::default();

    for redir in redirections {
        match redir.op {
            RedirOp::Read | RedirOp::ReadWrite => {
                let path = match target_path(ex, state, redir, &mut plan)? {
                    Ok(p) => p,
                    Err(f) => return Ok(Err(f)),
                };
                if path == "/dev/null" {
                    plan.stdin = Some(String::new());
                    continue;
                }
                match ex.fs.read_file(&path) {
                    Ok(content) => plan.stdin = Some(content),
                    Err(_) => {
                        return Ok(Err(RedirFailure(CmdResult::fail(
                            format!(
                                "{}: {}: No such file or directory\n",
                                state.script_name,
                                raw_target(redir)
                            ),
                            1,
                        ))))
                    }
                }
            }

            RedirOp::HereDoc => {
                if let RedirTarget::HereDoc(heredoc) = &redir.target {
                    let content = if heredoc.quoted {
                        match &heredoc.body.pieces[..] {
                            [crate::ast::WordPiece::Literal(s)] => s.clone(),
                            _ => String::new(),
                        }
                    } else {
                        let expanded = expand_word_text(ex, state, &heredoc.body)?;
                        plan.setup_stderr.push_str(&expanded.stderr);
                        expanded.text
                    };
                    let content = if heredoc.strip_tabs {
                        content
                            .lines()
                            .map(|l| l.trim_start_matches('\t'))
                            .collect::<Vec<_>>()
                            .join("\n")
                            + if content.ends_with('\n') { "\n" } else { "" }
                    } else {
                        content
                    };
                    plan.stdin = Some(content);
                }
            }

            RedirOp::HereString => {
                if let RedirTarget::Word(word) = &redir.target {
                    let expanded = expand_word_text(ex, state, word)?;
                    plan.setup_stderr.push_str(&expanded.stderr);
                    plan.stdin = Some(format!("{}\n", expanded.text));
                }
            }

            RedirOp::Write | RedirOp::Clobber | RedirOp::Append => {
                let append = redir.op == RedirOp::Append;
                let path = match target_path(ex, state, redir, &mut plan)? {
                    Ok(p) => p,
                    Err(f) => return Ok(Err(f)),
                };
                let sink = open_sink(ex, state, &path, append)?;
                let sink = match sink {
                    Ok(s) => s,
                    Err(f) => return Ok(Err(f)),
                };
                match redir.fd.unwrap_or(1) {
                    2 => plan.err = sink,
                    _ => plan.out = sink,
                }
            }

            RedirOp::WriteAll | RedirOp::AppendAll => {
                let append = redir.op == RedirOp::AppendAll;
                let path = match target_path(ex, state, redir, &mut plan)? {
                    Ok(p) => p,
                    Err(f) => return Ok(Err(f)),
                };
                let sink = match open_sink(ex, state, &path, append)? {
                    Ok(s) => s,
                    Err(f) => return Ok(Err(f)),
                };
                plan.out = sink.clone();
                plan.err = sink;
            }

            RedirOp::DupWrite => {
                let target = raw_target(redir);
                if let Ok(fd) = target.trim().parse::<i32>() {
                    // Duplicate onto the *current* sink of the target fd;
                    // order matters: `>f 2>&1` sends both to f, `2>&1 >f`
                    // leaves stderr on the original stdout.
                    let source = match fd {
                        2 => plan.err.clone(),
                        _ => plan.out.clone(),
                    };
                    match redir.fd.unwrap_or(1) {
                        2 => plan.err = source,
                        _ => plan.out = source,
                    }
                } else if target.trim() == "-" {
                    match redir.fd.unwrap_or(1) {
                        2 => plan.err = Sink::Discard,
                        _ => plan.out = Sink::Discard,
                    }
                } else {
                    // `>&word` with a non-numeric word behaves like `&>`.
                    let path = match target_path(ex, state, redir, &mut plan)? {
                        Ok(p) => p,
                        Err(f) => return Ok(Err(f)),
                    };
                    let sink = match open_sink(ex, state, &path, false)? {
                        Ok(s) => s,
                        Err(f) => return Ok(Err(f)),
                    };
                    plan.out = sink.clone();
                    plan.err = sink;
                }
            }

            RedirOp::DupRead => {
                let target = raw_target(redir);
                if target.trim() == "-" {
                    plan.stdin = Some(String::new());
                }
                // `<&0` and friends are no-ops in the buffered model.
            }
        }
    }

    Ok(Ok(plan))
}

/// Deliver a command's buffered output through the plan. File sinks are
/// written to the filesystem; the returned result carries only what stays
/// on the session streams.
pub fn route_outputs(
    ex: &Executor<'_>,
    plan: &RedirPlan,
    result: CmdResult,
) -> CmdResult {
    let mut routed = CmdResult {
        stdout: String::new(),
        stderr: plan.setup_stderr.clone(),
        exit_code: result.exit_code,
    };

    deliver(ex, &plan.out, &result.stdout, &mut routed);
    deliver(ex, &plan.err, &result.stderr, &mut routed);
    routed
}

fn deliver(ex: &Executor<'_>, sink: &Sink, content: &str, routed: &mut CmdResult) {
    if content.is_empty() {
        return;
    }
    match sink {
        Sink::Stdout => routed.stdout.push_str(content),
        Sink::Stderr => routed.stderr.push_str(content),
        Sink::Discard => {}
        Sink::File { path, .. } => {
            if let Err(e) = ex.fs.append_file(path, content.as_bytes()) {
                routed.stderr.push_str(&format!("{}\n", e));
                if routed.exit_code == 0 {
                    routed.exit_code = 1;
                }
            }
        }
    }
}

fn target_path(
    ex: &Executor<'_>,
    state: &mut ShellState,
    redir: &Redirection,
    plan: &mut RedirPlan,
) -> Result<Result<String, RedirFailure>, ControlFlow> {
    let word = match &redir.target {
        RedirTarget::Word(w) => w,
        RedirTarget::HereDoc(_) => {
            return Ok(Err(RedirFailure(CmdResult::fail(
                "redirection target missing\n",
                1,
            ))))
        }
    };
    // A target expanding to several fields is ambiguous.
    let expanded = expand_words(ex, state, std::slice::from_ref(word))?;
    plan.setup_stderr.push_str(&expanded.stderr);
    match expanded.fields.len() {
        1 => Ok(Ok(ex.fs.resolve(&state.cwd, &expanded.fields[0]))),
        _ => Ok(Err(RedirFailure(CmdResult::fail(
            format!("{}: ambiguous redirect\n", state.script_name),
            1,
        )))),
    }
}

fn open_sink(
    ex: &Executor<'_>,
    state: &ShellState,
    path: &str,
    append: bool,
) -> Result<Result<Sink, RedirFailure>, ControlFlow> {
    if path == "/dev/null" {
        return Ok(Ok(Sink::Discard));
    }
    if path == "/dev/stdout" {
        return Ok(Ok(Sink::Stdout));
    }
    if path == "/dev/stderr" {
        return Ok(Ok(Sink::Stderr));
    }
    if !append {
        // Truncate at open so `cmd > f` creates/empties f even with no
        // output.
        if let Err(e) = ex.fs.write_file(path, b"") {
            let _ = e;
            return Ok(Err(RedirFailure(CmdResult::fail(
                format!(
                    "{}: {}: No such file or directory\n",
                    state.script_name, path
                ),
                1,
            ))));
        }
    } else if !ex.fs.exists(path) {
        if ex.fs.write_file(path, b"").is_err() {
            return Ok(Err(RedirFailure(CmdResult::fail(
                format!(
                    "{}: {}: No such file or directory\n",
                    state.script_name, path
                ),
                1,
            ))));
        }
    }
    Ok(Ok(Sink::File {
        path: path.to_string(),
        append,
    }))
}

fn raw_target(redir: &Redirection) -> String {
    match &redir.target {
        RedirTarget::Word(w) => w
            .pieces
            .iter()
            .map(|p| match p {
                crate::ast::WordPiece::Literal(s)
                | crate::ast::WordPiece::Glob(s)
                | crate::ast::WordPiece::SingleQuoted(s)
                | crate::ast::WordPiece::Escaped(s) => s.clone(),
                _ => String::new(),
            })
            .collect(),
        RedirTarget::HereDoc(h) => h.delimiter.clone(),
    }
}
