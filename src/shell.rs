//! The `Shell` session: the top-level entry point.
//!
//! A session owns its state (variables, functions, aliases, cwd, jobs) for
//! its whole life; `exec()` can be called many times against the same
//! environment. Parse errors report exit code 2 before anything runs;
//! execution-limit violations map to 126; `exit` carries its code out.

use std::collections::HashMap;
use std::sync::Arc;

use crate::command::{CmdResult, Registry, TraceSink};
use crate::error::ControlFlow;
use crate::fs::{FileSystem, MemFs, SyncFs};
use crate::interp::state::ShellState;
use crate::interp::Executor;
use crate::limits::{ExecLimits, LIMIT_EXIT_CODE, SYNTAX_EXIT_CODE};

/// Result of one `exec()` call.
pub type ExecResult = CmdResult;

/// Session construction options.
#[derive(Default)]
pub struct ShellConfig {
    /// Extra environment variables (exported).
    pub env: Option<HashMap<String, String>>,
    /// Working directory; defaults to `/home/user`.
    pub cwd: Option<String>,
    /// Filesystem backend; defaults to a fresh [`MemFs`].
    pub fs: Option<Arc<dyn FileSystem>>,
    pub limits: Option<ExecLimits>,
    /// Command registry; defaults to the shell-intrinsic builtins.
    pub registry: Option<Registry>,
    pub trace: Option<TraceSink>,
}

pub struct Shell {
    pub fs: Arc<dyn FileSystem>,
    limits: ExecLimits,
    registry: Registry,
    trace: Option<TraceSink>,
    state: ShellState,
}

impl Shell {
    pub async fn new(config: ShellConfig) -> Self {
        let default_layout = config.cwd.is_none();
        let cwd = config.cwd.unwrap_or_else(|| "/home/user".to_string());
        let fs: Arc<dyn FileSystem> = config.fs.unwrap_or_else(|| Arc::new(MemFs::new()));

        init_sandbox(fs.as_ref(), default_layout, &cwd).await;

        let mut state = ShellState {
            cwd: cwd.clone(),
            prev_dir: cwd.clone(),
            ..ShellState::default()
        };

        let home = if default_layout { "/home/user" } else { "/" };
        let defaults = [
            ("HOME", home.to_string()),
            ("PATH", "/usr/bin:/bin".to_string()),
            ("IFS", " \t\n".to_string()),
            ("PWD", cwd.clone()),
            ("OLDPWD", cwd.clone()),
            ("HOSTNAME", "sandbox".to_string()),
            ("OSTYPE", "linux-gnu".to_string()),
        ];
        for (name, value) in defaults {
            state.set_var(name, value);
        }
        for name in ["HOME", "PATH", "PWD", "OLDPWD"] {
            state.export_var(name);
        }

        if let Some(env) = config.env {
            for (name, value) in env {
                state.export_var(&name);
                state.set_var(&name, value);
            }
        }

        Self {
            fs,
            limits: config.limits.unwrap_or_default(),
            registry: config.registry.unwrap_or_else(Registry::with_builtins),
            trace: config.trace,
            state,
        }
    }

    /// Execute a script against the persistent session.
    pub async fn exec(&mut self, script: &str) -> ExecResult {
        if script.trim().is_empty() {
            return ExecResult::ok();
        }

        // The command ceiling is per-exec.
        self.state.command_count = 0;

        let normalized = normalize_script(script);

        let program = match crate::parser::parse(&normalized) {
            Ok(program) => program,
            Err(e) => {
                return ExecResult::fail(
                    format!("{}: syntax error: {}\n", self.state.script_name, e),
                    SYNTAX_EXIT_CODE,
                )
            }
        };

        let fs = SyncFs::new(Arc::clone(&self.fs), tokio::runtime::Handle::current());
        let executor = Executor::new(&fs, &self.limits, &self.registry, self.trace.as_ref());

        let outcome = executor.run_script(&mut self.state, &program);

        match outcome {
            Ok(result) => {
                self.state.last_status = result.exit_code;
                result
            }
            Err(ControlFlow::Exit {
                code,
                stdout,
                stderr,
            }) => {
                self.state.last_status = code;
                ExecResult {
                    stdout,
                    stderr,
                    exit_code: code,
                }
            }
            Err(ControlFlow::Limit(e)) => {
                self.state.last_status = LIMIT_EXIT_CODE;
                ExecResult {
                    stdout: e.stdout,
                    stderr: format!(
                        "{}{}: {}\n",
                        e.stderr, self.state.script_name, e.message
                    ),
                    exit_code: LIMIT_EXIT_CODE,
                }
            }
            Err(other) => {
                let (stdout, stderr) = other.output();
                let code = match &other {
                    ControlFlow::Return { code, .. } => *code,
                    ControlFlow::Unbound { name, .. } => {
                        self.state.last_status = 1;
                        return ExecResult {
                            stdout: stdout.to_string(),
                            stderr: format!(
                                "{}{}: {}: unbound variable\n",
                                stderr, self.state.script_name, name
                            ),
                            exit_code: 1,
                        };
                    }
                    _ => 1,
                };
                self.state.last_status = code;
                ExecResult {
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                    exit_code: code,
                }
            }
        }
    }

    pub fn cwd(&self) -> &str {
        &self.state.cwd
    }

    pub fn get_var(&self, name: &str) -> Option<&str> {
        self.state.get_var(name)
    }

    pub fn set_var(&mut self, name: &str, value: impl Into<String>) {
        self.state.set_var(name, value);
    }

    /// Read a file relative to the session's working directory.
    pub async fn read_file(&self, path: &str) -> Result<String, crate::fs::FsError> {
        let resolved = self.fs.resolve(&self.state.cwd, path);
        self.fs.read_file(&resolved).await
    }

    /// Write a file relative to the session's working directory.
    pub async fn write_file(&self, path: &str, content: &str) -> Result<(), crate::fs::FsError> {
        let resolved = self.fs.resolve(&self.state.cwd, path);
        self.fs.write_file(&resolved, content.as_bytes()).await
    }
}

/// Seed the standard sandbox layout.
async fn init_sandbox(fs: &dyn FileSystem, default_layout: bool, cwd: &str) {
    let _ = fs.mkdir("/bin", true).await;
    let _ = fs.mkdir("/usr/bin", true).await;
    if default_layout {
        let _ = fs.mkdir("/home/user", true).await;
        let _ = fs.mkdir("/tmp", true).await;
    }
    let _ = fs.mkdir("/dev", true).await;
    let _ = fs.write_file("/dev/null", b"").await;
    let _ = fs.write_file("/dev/stdin", b"").await;
    let _ = fs.write_file("/dev/stdout", b"").await;
    let _ = fs.write_file("/dev/stderr", b"").await;
    let _ = fs.mkdir(cwd, true).await;
}

/// Strip leading indentation from embedded scripts while preserving
/// heredoc bodies verbatim.
fn normalize_script(script: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut pending: Vec<(String, bool)> = Vec::new();

    for line in script.split('\n') {
        if let Some((delimiter, strip_tabs)) = pending.last() {
            let candidate = if *strip_tabs {
                line.trim_start_matches('\t')
            } else {
                line
            };
            if candidate == delimiter {
                out.push(line.trim_start().to_string());
                pending.pop();
            } else {
                out.push(line.to_string());
            }
            continue;
        }

        let trimmed = line.trim_start();
        out.push(trimmed.to_string());

        // Register heredoc openers found on this line.
        let chars: Vec<char> = trimmed.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            if chars[i] == '<' && chars.get(i + 1) == Some(&'<') && chars.get(i + 2) != Some(&'<') {
                i += 2;
                let strip_tabs = chars.get(i) == Some(&'-');
                if strip_tabs {
                    i += 1;
                }
                while matches!(chars.get(i), Some(&(' ' | '\t'))) {
                    i += 1;
                }
                let quote = match chars.get(i) {
                    Some(&q) if q == '\'' || q == '"' => {
                        i += 1;
                        Some(q)
                    }
                    _ => None,
                };
                let mut delimiter = String::new();
                while let Some(&c) = chars.get(i) {
                    match quote {
                        Some(q) if c == q => break,
                        None if !(c.is_alphanumeric() || c == '_' || c == '-') => break,
                        _ => {
                            delimiter.push(c);
                            i += 1;
                        }
                    }
                }
                if !delimiter.is_empty() {
                    pending.push((delimiter, strip_tabs));
                }
            } else {
                i += 1;
            }
        }
    }

    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_indentation() {
        assert_eq!(
            normalize_script("  echo hello\n  echo world"),
            "echo hello\necho world"
        );
    }

    #[test]
    fn normalize_preserves_heredoc_body() {
        assert_eq!(
            normalize_script("  cat <<EOF\n  indented\nEOF"),
            "cat <<EOF\n  indented\nEOF"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn session_defaults() {
        let shell = Shell::new(ShellConfig::default()).await;
        assert_eq!(shell.cwd(), "/home/user");
        assert_eq!(shell.get_var("HOME"), Some("/home/user"));
        assert_eq!(shell.get_var("PATH"), Some("/usr/bin:/bin"));
        assert!(shell.fs.exists("/dev/null").await);
        assert!(shell.fs.exists("/tmp").await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exec_empty_is_ok() {
        let mut shell = Shell::new(ShellConfig::default()).await;
        let result = shell.exec("").await;
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exec_syntax_error_is_two() {
        let mut shell = Shell::new(ShellConfig::default()).await;
        let result = shell.exec("if then").await;
        assert_eq!(result.exit_code, 2);
        assert!(result.stderr.contains("syntax error"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn state_persists_across_execs() {
        let mut shell = Shell::new(ShellConfig::default()).await;
        shell.exec("GREETING=hello").await;
        let result = shell.exec("echo $GREETING").await;
        assert_eq!(result.stdout, "hello\n");

        shell.exec("cd /tmp").await;
        assert_eq!(shell.cwd(), "/tmp");
    }

    // -----------------------------------------------------------------------
    // End-to-end behavior
    // -----------------------------------------------------------------------

    async fn sh(script: &str) -> ExecResult {
        let mut shell = Shell::new(ShellConfig::default()).await;
        shell.exec(script).await
    }

    /// A stdin-echoing command registered through the public capability
    /// interface, standing in for the external utility library.
    fn registry_with_cat() -> crate::command::Registry {
        let mut registry = crate::command::Registry::with_builtins();
        fn cat(
            ctx: &mut crate::command::CommandContext<'_>,
            args: &[String],
        ) -> Result<crate::command::CmdResult, crate::error::ControlFlow> {
            if args.is_empty() {
                return Ok(crate::command::CmdResult::out(ctx.stdin.to_string()));
            }
            let mut out = String::new();
            for arg in args {
                let path = ctx.resolve_path(arg);
                match ctx.fs.read_file(&path) {
                    Ok(content) => out.push_str(&content),
                    Err(_) => {
                        return Ok(crate::command::CmdResult::fail(
                            format!("cat: {}: No such file or directory\n", arg),
                            1,
                        ))
                    }
                }
            }
            Ok(crate::command::CmdResult::out(out))
        }
        registry.register("cat", Box::new(cat));
        registry
    }

    async fn sh_with_cat(script: &str) -> ExecResult {
        let mut shell = Shell::new(ShellConfig {
            registry: Some(registry_with_cat()),
            ..Default::default()
        })
        .await;
        shell.exec(script).await
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn for_loop_over_words() {
        let result = sh("for i in a b c; do echo $i; done").await;
        assert_eq!(result.stdout, "a\nb\nc\n");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn arithmetic_expansion_precedence() {
        let result = sh("echo $((1+2*3))").await;
        assert_eq!(result.stdout, "7\n");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn and_or_short_circuit() {
        let result = sh("false && echo no || echo yes").await;
        assert_eq!(result.stdout, "yes\n");
        assert_eq!(result.exit_code, 0);

        let result = sh("true && echo yes").await;
        assert_eq!(result.stdout, "yes\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stray_brace_defers_until_reached() {
        let result = sh("echo before\n}\necho after\n").await;
        assert_eq!(result.stdout, "before\n");
        assert_eq!(result.exit_code, 2);
        assert!(result.stderr.contains("syntax error near unexpected token `}'"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn heredoc_feeds_stdin() {
        let result = sh_with_cat("cat <<EOF\nhello\nEOF\n").await;
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn heredoc_expansion_rules() {
        let result = sh_with_cat("NAME=world\ncat <<EOF\nhi $NAME\nEOF\n").await;
        assert_eq!(result.stdout, "hi world\n");

        let result = sh_with_cat("NAME=world\ncat <<'EOF'\nhi $NAME\nEOF\n").await;
        assert_eq!(result.stdout, "hi $NAME\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pipeline_buffers_between_stages() {
        let result = sh_with_cat("echo one | cat | cat").await;
        assert_eq!(result.stdout, "one\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn negation_parity_executes() {
        assert_eq!(sh("! true").await.exit_code, 1);
        assert_eq!(sh("! ! true").await.exit_code, 0);
        assert_eq!(sh("! false").await.exit_code, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn command_not_found_is_127() {
        let result = sh("no_such_command_anywhere").await;
        assert_eq!(result.exit_code, 127);
        assert!(result.stderr.contains("command not found"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn redirection_to_file_and_back() {
        let result = sh_with_cat("echo data > /tmp/out.txt; cat /tmp/out.txt").await;
        assert_eq!(result.stdout, "data\n");

        let result = sh_with_cat(
            "echo one > /tmp/f; echo two >> /tmp/f; cat /tmp/f",
        )
        .await;
        assert_eq!(result.stdout, "one\ntwo\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stderr_merge_redirection() {
        let result = sh("missing_cmd 2>/dev/null").await;
        assert_eq!(result.stderr, "");
        assert_eq!(result.exit_code, 127);

        let result = sh("missing_cmd 2>&1").await;
        assert!(result.stdout.contains("command not found"));
        assert_eq!(result.stderr, "");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn input_redirection() {
        let result = sh_with_cat("echo payload > /tmp/in; cat < /tmp/in").await;
        assert_eq!(result.stdout, "payload\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn while_read_loop_over_redirected_input() {
        let script = "printf_lines() { echo a; echo b; }\nprintf_lines > /tmp/lines\nwhile read line; do echo got:$line; done < /tmp/lines";
        let result = sh(script).await;
        assert_eq!(result.stdout, "got:a\ngot:b\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn functions_positionals_and_return() {
        let script = "greet() { echo hi $1; return 3; }\ngreet world";
        let result = sh(script).await;
        assert_eq!(result.stdout, "hi world\n");
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn local_variables_restore() {
        let script = "x=outer\nf() { local x=inner; echo $x; }\nf\necho $x";
        let result = sh(script).await;
        assert_eq!(result.stdout, "inner\nouter\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subshell_isolates_state() {
        let script = "x=1\n(x=2; cd /tmp; echo inner:$x)\necho outer:$x\npwd";
        let result = sh(script).await;
        assert_eq!(result.stdout, "inner:2\nouter:1\n/home/user\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn group_shares_state() {
        let script = "x=1\n{ x=2; }\necho $x";
        let result = sh(script).await;
        assert_eq!(result.stdout, "2\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn case_arm_terminators() {
        let script = "case b in a) echo A;; b) echo B;& c) echo C;; d) echo D;; esac";
        let result = sh(script).await;
        // `;&` falls through into the next arm without re-testing.
        assert_eq!(result.stdout, "B\nC\n");

        let script = "case x in x) echo one;;& *) echo two;; esac";
        let result = sh(script).await;
        assert_eq!(result.stdout, "one\ntwo\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn case_glob_patterns() {
        let result = sh("case hello.rs in *.rs) echo rust;; *) echo other;; esac").await;
        assert_eq!(result.stdout, "rust\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn conditional_command_truth() {
        assert_eq!(sh("[[ -n text ]]").await.exit_code, 0);
        assert_eq!(sh("[[ -z text ]]").await.exit_code, 1);
        assert_eq!(sh("[[ abc == a* ]]").await.exit_code, 0);
        assert_eq!(sh("[[ 3 -lt 5 && 5 -lt 7 ]]").await.exit_code, 0);
        assert_eq!(sh("x=abc123; [[ $x =~ ^[a-z]+[0-9]+$ ]]").await.exit_code, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn arithmetic_command_status() {
        assert_eq!(sh("((1))").await.exit_code, 0);
        assert_eq!(sh("((0))").await.exit_code, 1);
        let result = sh("x=4; ((x = x * 2)); echo $x").await;
        assert_eq!(result.stdout, "8\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn c_style_for_loop() {
        let result = sh("for ((i=0; i<3; i++)); do echo $i; done").await;
        assert_eq!(result.stdout, "0\n1\n2\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn while_loop_with_break_continue() {
        let script = "i=0\nwhile true; do i=$((i+1)); if [ $i -eq 2 ]; then continue; fi; if [ $i -ge 4 ]; then break; fi; echo $i; done";
        let result = sh(script).await;
        assert_eq!(result.stdout, "1\n3\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn until_loop() {
        let result = sh("i=0; until [ $i -ge 3 ]; do echo $i; i=$((i+1)); done").await;
        assert_eq!(result.stdout, "0\n1\n2\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn alias_trailing_space_chain() {
        let script = "alias sudo='echo elevated '\nalias ll='echo listing'\nsudo ll /tmp";
        let result = sh(script).await;
        // `ll` expands because `sudo`'s value ends in a space; its own
        // alias text lands in argument position.
        assert_eq!(result.stdout, "elevated echo listing /tmp\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn alias_simple_expansion() {
        let result = sh("alias greet='echo hello'\ngreet world").await;
        assert_eq!(result.stdout, "hello world\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn command_substitution_both_forms() {
        let result = sh("echo $(echo nested)").await;
        assert_eq!(result.stdout, "nested\n");
        let result = sh("echo `echo legacy`").await;
        assert_eq!(result.stdout, "legacy\n");
        let result = sh("echo $(echo $(echo deep))").await;
        assert_eq!(result.stdout, "deep\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn command_substitution_is_isolated() {
        let result = sh("x=1; y=$(x=2; echo $x); echo $x $y").await;
        assert_eq!(result.stdout, "1 2\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn parameter_expansion_operators() {
        assert_eq!(sh("echo ${missing:-fallback}").await.stdout, "fallback\n");
        assert_eq!(sh("x=set; echo ${x:-fallback}").await.stdout, "set\n");
        assert_eq!(sh("echo ${v:=assigned}; echo $v").await.stdout, "assigned\nassigned\n");
        assert_eq!(sh("x=hello; echo ${#x}").await.stdout, "5\n");
        assert_eq!(sh("p=/usr/local/bin; echo ${p##*/}").await.stdout, "bin\n");
        assert_eq!(sh("f=archive.tar.gz; echo ${f%.*}").await.stdout, "archive.tar\n");
        assert_eq!(sh("s=aXbXc; echo ${s/X/-}").await.stdout, "a-bXc\n");
        assert_eq!(sh("s=aXbXc; echo ${s//X/-}").await.stdout, "a-b-c\n");
        assert_eq!(sh("s=hello; echo ${s:1:3}").await.stdout, "ell\n");
        assert_eq!(sh("w=word; echo ${w^}").await.stdout, "Word\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn positional_parameters_and_shift() {
        let result = sh("set -- a b c; echo $1 $2 $#; shift; echo $1 $#").await;
        assert_eq!(result.stdout, "a b 3\nb 2\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn brace_expansion_forms() {
        assert_eq!(sh("echo {a,b,c}").await.stdout, "a b c\n");
        assert_eq!(sh("echo x{1..3}y").await.stdout, "x1y x2y x3y\n");
        assert_eq!(sh("echo {a..c}").await.stdout, "a b c\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn glob_expansion_over_vfs() {
        let script = "cd /tmp; echo one > a.txt; echo two > b.txt; echo hidden > .h.txt; echo *.txt";
        let result = sh(script).await;
        assert_eq!(result.stdout, "a.txt b.txt\n");

        // No matches: the pattern stays literal.
        let result = sh("cd /tmp; echo *.nope").await;
        assert_eq!(result.stdout, "*.nope\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn quoting_protects_globs_and_splitting() {
        let result = sh("echo '*.txt'").await;
        assert_eq!(result.stdout, "*.txt\n");
        let result = sh("x='a b'; echo \"$x\"").await;
        assert_eq!(result.stdout, "a b\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exit_propagates_code() {
        let result = sh("echo first; exit 42; echo never").await;
        assert_eq!(result.stdout, "first\n");
        assert_eq!(result.exit_code, 42);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn errexit_stops_script() {
        let result = sh("set -e\necho one\nfalse\necho two").await;
        assert_eq!(result.stdout, "one\n");
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn nounset_reports_unbound() {
        let result = sh("set -u\necho $undefined_var").await;
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("unbound variable"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pipefail_propagates_failure() {
        let result = sh_with_cat("set -o pipefail\nfalse | cat").await;
        assert_eq!(result.exit_code, 1);
        let result = sh_with_cat("false | cat").await;
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn loop_iteration_ceiling_is_fatal() {
        let mut shell = Shell::new(ShellConfig {
            limits: Some(crate::limits::ExecLimits {
                max_loop_iterations: 50,
                ..Default::default()
            }),
            ..Default::default()
        })
        .await;
        let result = shell.exec("while true; do :; done").await;
        assert_eq!(result.exit_code, 126);
        assert!(result.stderr.contains("loop iterations"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn command_count_ceiling_is_fatal() {
        let mut shell = Shell::new(ShellConfig {
            limits: Some(crate::limits::ExecLimits {
                max_commands: 10,
                ..Default::default()
            }),
            ..Default::default()
        })
        .await;
        let result = shell
            .exec("for i in 1 2 3 4 5 6 7 8 9 10 11 12; do echo $i; done")
            .await;
        assert_eq!(result.exit_code, 126);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn recursion_ceiling_is_fatal() {
        let mut shell = Shell::new(ShellConfig {
            limits: Some(crate::limits::ExecLimits {
                max_recursion_depth: 20,
                ..Default::default()
            }),
            ..Default::default()
        })
        .await;
        let result = shell.exec("f() { f; }\nf").await;
        assert_eq!(result.exit_code, 126);
        assert!(result.stderr.contains("recursion"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn background_jobs_and_wait() {
        let result = sh("sleep_stub() { :; }\nsleep_stub &\nwait\necho done:$?").await;
        assert_eq!(result.stdout, "done:0\n");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn background_pid_variable() {
        let result = sh(": &\necho ${!:+have-pid}").await;
        assert_eq!(result.stdout, "have-pid\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn eval_runs_nested_script() {
        let result = sh("eval 'echo from-eval'").await;
        assert_eq!(result.stdout, "from-eval\n");
        let result = sh("cmd='echo dynamic'; eval $cmd").await;
        assert_eq!(result.stdout, "dynamic\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn source_executes_in_current_shell() {
        let script = "echo 'sourced_var=from-file' > /tmp/lib.sh\nsource /tmp/lib.sh\necho $sourced_var";
        let result = sh(script).await;
        assert_eq!(result.stdout, "from-file\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn nested_subshell_parens() {
        let result = sh("( ( echo deep ) )").await;
        assert_eq!(result.stdout, "deep\n");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tilde_expansion_to_home() {
        let result = sh("echo ~").await;
        assert_eq!(result.stdout, "/home/user\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn special_parameters() {
        let result = sh("false; echo $?").await;
        assert_eq!(result.stdout, "1\n");
        let result = sh("set -- x y; echo $# $1 $2").await;
        assert_eq!(result.stdout, "2 x y\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn if_elif_else_chain() {
        let script = "x=2\nif [ $x -eq 1 ]; then echo one\nelif [ $x -eq 2 ]; then echo two\nelse echo other\nfi";
        let result = sh(script).await;
        assert_eq!(result.stdout, "two\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_builtin_in_conditions() {
        let result = sh("if test -d /tmp; then echo yes; fi").await;
        assert_eq!(result.stdout, "yes\n");
        let result = sh("if [ -f /tmp ]; then echo file; else echo notfile; fi").await;
        assert_eq!(result.stdout, "notfile\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timed_pipeline_reports_on_stderr() {
        let result = sh("time -p true").await;
        assert_eq!(result.exit_code, 0);
        assert!(result.stderr.contains("real"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn type_reports_dispatch_kind() {
        let script = "alias ll='echo l'\ngreet() { :; }\ntype ll greet echo";
        let result = sh(script).await;
        assert!(result.stdout.contains("ll is aliased"));
        assert!(result.stdout.contains("greet is a function"));
        assert!(result.stdout.contains("echo is a shell builtin"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn herestring_redirection() {
        let result = sh_with_cat("cat <<< 'one liner'").await;
        assert_eq!(result.stdout, "one liner\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn overlay_containment_end_to_end() {
        use crate::fs::{FileSystem, MemFs, OverlayFs};
        use std::sync::Arc;

        let backing = Arc::new(MemFs::new());
        backing.mkdir("/home/user", true).await.unwrap();
        backing
            .write_file("/home/user/readme.txt", b"pristine")
            .await
            .unwrap();

        let overlay: Arc<dyn FileSystem> =
            Arc::new(OverlayFs::new(Arc::clone(&backing) as Arc<dyn FileSystem>, "/"));
        let mut shell = Shell::new(ShellConfig {
            fs: Some(overlay),
            registry: Some(registry_with_cat()),
            ..Default::default()
        })
        .await;

        let result = shell.exec("cat readme.txt").await;
        assert_eq!(result.stdout, "pristine");

        shell.exec("echo replaced > readme.txt").await;
        let result = shell.exec("cat readme.txt").await;
        assert_eq!(result.stdout, "replaced\n");

        // The backing store never saw the write.
        assert_eq!(
            backing.read_file("/home/user/readme.txt").await.unwrap(),
            "pristine"
        );
    }
}
