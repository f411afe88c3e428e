//! `test` / `[` — the classic POSIX test expression evaluator over
//! argument vectors, against the virtual filesystem.

use crate::command::{CmdResult, CommandContext};
use crate::error::ControlFlow;
use crate::interp::arith_eval::parse_shell_int;

pub fn builtin_test(
    ctx: &mut CommandContext<'_>,
    args: &[String],
) -> Result<CmdResult, ControlFlow> {
    run_test(ctx, args)
}

pub fn builtin_bracket(
    ctx: &mut CommandContext<'_>,
    args: &[String],
) -> Result<CmdResult, ControlFlow> {
    match args.last().map(String::as_str) {
        Some("]") => run_test(ctx, &args[..args.len() - 1]),
        _ => Ok(CmdResult::fail(
            format!("{}: [: missing `]'\n", ctx.state.script_name),
            2,
        )),
    }
}

fn run_test(ctx: &mut CommandContext<'_>, args: &[String]) -> Result<CmdResult, ControlFlow> {
    let mut parser = TestParser { ctx, args, pos: 0 };
    match parser.parse_or() {
        Ok(value) if parser.pos == args.len() => Ok(CmdResult {
            exit_code: if value { 0 } else { 1 },
            ..CmdResult::ok()
        }),
        Ok(_) => Ok(CmdResult::fail(
            format!("{}: test: too many arguments\n", parser.ctx.state.script_name),
            2,
        )),
        Err(message) => Ok(CmdResult::fail(
            format!("{}: test: {}\n", parser.ctx.state.script_name, message),
            2,
        )),
    }
}

struct TestParser<'c, 'a> {
    ctx: &'c mut CommandContext<'a>,
    args: &'c [String],
    pos: usize,
}

impl TestParser<'_, '_> {
    fn cur(&self) -> Option<&str> {
        self.args.get(self.pos).map(String::as_str)
    }

    fn bump(&mut self) -> Option<&str> {
        let v = self.args.get(self.pos).map(String::as_str);
        if v.is_some() {
            self.pos += 1;
        }
        v
    }

    fn parse_or(&mut self) -> Result<bool, String> {
        let mut left = self.parse_and()?;
        while self.cur() == Some("-o") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = left || right;
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<bool, String> {
        let mut left = self.parse_term()?;
        while self.cur() == Some("-a") {
            self.pos += 1;
            let right = self.parse_term()?;
            left = left && right;
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<bool, String> {
        match self.cur() {
            None => Ok(false),
            Some("!") => {
                self.pos += 1;
                Ok(!self.parse_term()?)
            }
            Some("(") => {
                self.pos += 1;
                let inner = self.parse_or()?;
                if self.bump() != Some(")") {
                    return Err("expected `)'".to_string());
                }
                Ok(inner)
            }
            Some(_) => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<bool, String> {
        let first = self.bump().unwrap_or_default().to_string();

        // Binary operator between two operands?
        if let Some(op) = self.cur() {
            if is_binary_op(op) {
                let op = op.to_string();
                self.pos += 1;
                let right = self
                    .bump()
                    .ok_or_else(|| format!("{}: unary operator expected", op))?
                    .to_string();
                return self.eval_binary(&first, &op, &right);
            }
        }

        // Unary operator with an operand.
        if first.starts_with('-') && first.len() == 2 {
            if let Some(operand) = self.bump() {
                let operand = operand.to_string();
                return Ok(self.eval_unary(&first, &operand));
            }
            // A lone `-x` is just a non-empty string.
            return Ok(true);
        }

        // Bare string: true when non-empty.
        Ok(!first.is_empty())
    }

    fn eval_unary(&mut self, op: &str, operand: &str) -> bool {
        let path = || {
            let cwd = self.ctx.state.cwd.clone();
            self.ctx.fs.resolve(&cwd, operand)
        };
        match op {
            "-z" => operand.is_empty(),
            "-n" => !operand.is_empty(),
            "-e" | "-a" => self.ctx.fs.exists(&path()),
            "-f" => self.ctx.fs.is_file(&path()),
            "-d" => self.ctx.fs.is_dir(&path()),
            "-s" => self
                .ctx
                .fs
                .stat(&path())
                .map(|s| s.size > 0)
                .unwrap_or(false),
            "-L" | "-h" => self
                .ctx
                .fs
                .lstat(&path())
                .map(|s| s.is_symlink)
                .unwrap_or(false),
            "-r" | "-w" => self.ctx.fs.exists(&path()),
            "-x" => self
                .ctx
                .fs
                .stat(&path())
                .map(|s| s.is_dir || s.mode & 0o111 != 0)
                .unwrap_or(false),
            "-v" => self.ctx.state.get_var(operand).is_some(),
            "-t" => false,
            _ => !operand.is_empty(),
        }
    }

    fn eval_binary(&mut self, left: &str, op: &str, right: &str) -> Result<bool, String> {
        match op {
            "=" | "==" => Ok(left == right),
            "!=" => Ok(left != right),
            "<" => Ok(left < right),
            ">" => Ok(left > right),
            "-eq" | "-ne" | "-lt" | "-le" | "-gt" | "-ge" => {
                let l = parse_shell_int(left)
                    .ok_or_else(|| format!("{}: integer expression expected", left))?;
                let r = parse_shell_int(right)
                    .ok_or_else(|| format!("{}: integer expression expected", right))?;
                Ok(match op {
                    "-eq" => l == r,
                    "-ne" => l != r,
                    "-lt" => l < r,
                    "-le" => l <= r,
                    "-gt" => l > r,
                    "-ge" => l >= r,
                    _ => unreachable!(),
                })
            }
            "-nt" | "-ot" | "-ef" => {
                let cwd = self.ctx.state.cwd.clone();
                let lp = self.ctx.fs.resolve(&cwd, left);
                let rp = self.ctx.fs.resolve(&cwd, right);
                let lm = self.ctx.fs.stat(&lp).map(|s| s.mtime);
                let rm = self.ctx.fs.stat(&rp).map(|s| s.mtime);
                Ok(match op {
                    "-nt" => matches!((&lm, &rm), (Ok(a), Ok(b)) if a > b) || (lm.is_ok() && rm.is_err()),
                    "-ot" => matches!((&lm, &rm), (Ok(a), Ok(b)) if a < b) || (lm.is_err() && rm.is_ok()),
                    _ => {
                        let lc = self.ctx.fs.canonicalize(&lp);
                        let rc = self.ctx.fs.canonicalize(&rp);
                        matches!((lc, rc), (Ok(a), Ok(b)) if a == b)
                    }
                })
            }
            _ => Err(format!("{}: binary operator expected", op)),
        }
    }
}

fn is_binary_op(op: &str) -> bool {
    matches!(
        op,
        "=" | "==" | "!=" | "<" | ">" | "-eq" | "-ne" | "-lt" | "-le" | "-gt" | "-ge" | "-nt"
            | "-ot" | "-ef"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Registry;
    use crate::fs::{FileSystem, MemFs, SyncFs};
    use crate::interp::state::ShellState;
    use crate::limits::ExecLimits;
    use std::sync::Arc;

    fn check(args: &[&str], stdin_fs: Option<Arc<MemFs>>) -> i32 {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        let memfs = stdin_fs.unwrap_or_else(|| Arc::new(MemFs::new()));
        let fs = SyncFs::new(memfs, runtime.handle().clone());
        let limits = ExecLimits::default();
        let mut state = ShellState::default();
        let _registry = Registry::new();
        let mut ctx = CommandContext {
            state: &mut state,
            fs: &fs,
            limits: &limits,
            stdin: "",
            stdin_is_pending: false,
            trace: None,
        };
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        builtin_test(&mut ctx, &args).unwrap().exit_code
    }

    #[test]
    fn string_tests() {
        assert_eq!(check(&["-n", "hello"], None), 0);
        assert_eq!(check(&["-z", "hello"], None), 1);
        assert_eq!(check(&["-z", ""], None), 0);
        assert_eq!(check(&["abc", "=", "abc"], None), 0);
        assert_eq!(check(&["abc", "!=", "abc"], None), 1);
    }

    #[test]
    fn numeric_tests() {
        assert_eq!(check(&["3", "-lt", "5"], None), 0);
        assert_eq!(check(&["5", "-le", "5"], None), 0);
        assert_eq!(check(&["7", "-eq", "8"], None), 1);
        assert_eq!(check(&["x", "-eq", "1"], None), 2);
    }

    #[test]
    fn file_tests() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let memfs = Arc::new(MemFs::new());
        runtime.block_on(async {
            memfs.mkdir("/dir", true).await.unwrap();
            memfs.write_file("/dir/file", b"data").await.unwrap();
        });
        assert_eq!(check(&["-f", "/dir/file"], Some(Arc::clone(&memfs))), 0);
        assert_eq!(check(&["-d", "/dir"], Some(Arc::clone(&memfs))), 0);
        assert_eq!(check(&["-e", "/missing"], Some(Arc::clone(&memfs))), 1);
        assert_eq!(check(&["-s", "/dir/file"], Some(memfs)), 0);
    }

    #[test]
    fn connectives_and_negation() {
        assert_eq!(check(&["!", "-z", "x"], None), 1);
        assert_eq!(check(&["-n", "a", "-a", "-n", "b"], None), 0);
        assert_eq!(check(&["-z", "a", "-o", "-n", "b"], None), 0);
        assert_eq!(check(&["(", "-n", "a", ")"], None), 0);
    }

    #[test]
    fn empty_invocation_is_false() {
        assert_eq!(check(&[], None), 1);
    }
}
