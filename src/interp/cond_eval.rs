//! `[[ ... ]]` evaluation: string, numeric, and file tests over the
//! virtual filesystem, pattern matching for `==`/`!=`, and `=~` through
//! `regex-lite` (escapes from the parse stay literal).

use crate::ast::{CondBinaryOp, CondExpr, CondUnaryOp};
use crate::error::ControlFlow;
use crate::interp::arith_eval::parse_shell_int;
use crate::interp::expand::{expand_word_pattern, expand_word_regex, expand_word_text, glob_match};
use crate::interp::state::ShellState;
use crate::interp::Executor;

/// Evaluate to a truth value; errors in operands surface as `ControlFlow`
/// exactly as they would in any other expansion position.
pub fn eval_cond(
    ex: &Executor<'_>,
    state: &mut ShellState,
    expr: &CondExpr,
) -> Result<bool, ControlFlow> {
    match expr {
        CondExpr::Word(word) => {
            let text = expand_word_text(ex, state, word)?.text;
            Ok(!text.is_empty())
        }

        CondExpr::Not(inner) => Ok(!eval_cond(ex, state, inner)?),
        CondExpr::Group(inner) => eval_cond(ex, state, inner),

        CondExpr::And(left, right) => {
            if !eval_cond(ex, state, left)? {
                return Ok(false);
            }
            eval_cond(ex, state, right)
        }
        CondExpr::Or(left, right) => {
            if eval_cond(ex, state, left)? {
                return Ok(true);
            }
            eval_cond(ex, state, right)
        }

        CondExpr::Unary { op, operand } => {
            let text = expand_word_text(ex, state, operand)?.text;
            eval_unary(ex, state, *op, &text)
        }

        CondExpr::Binary { op, left, right } => eval_binary(ex, state, *op, left, right),
    }
}

fn eval_unary(
    ex: &Executor<'_>,
    state: &mut ShellState,
    op: CondUnaryOp,
    operand: &str,
) -> Result<bool, ControlFlow> {
    let path = || ex.fs.resolve(&state.cwd, operand);
    Ok(match op {
        CondUnaryOp::ZeroLength => operand.is_empty(),
        CondUnaryOp::NonZeroLength => !operand.is_empty(),
        CondUnaryOp::VarSet => state.get_var(operand).is_some(),
        CondUnaryOp::Exists => ex.fs.exists(&path()),
        CondUnaryOp::IsFile => ex.fs.is_file(&path()),
        CondUnaryOp::IsDir => ex.fs.is_dir(&path()),
        CondUnaryOp::IsSymlink => ex
            .fs
            .lstat(&path())
            .map(|s| s.is_symlink)
            .unwrap_or(false),
        CondUnaryOp::NonEmptyFile => ex.fs.stat(&path()).map(|s| s.size > 0).unwrap_or(false),
        // The sandbox has no permission model beyond mode bits.
        CondUnaryOp::Readable => ex.fs.exists(&path()),
        CondUnaryOp::Writable => ex.fs.exists(&path()),
        CondUnaryOp::Executable => ex
            .fs
            .stat(&path())
            .map(|s| s.is_dir || s.mode & 0o111 != 0)
            .unwrap_or(false),
        // No terminal is ever attached.
        CondUnaryOp::IsTty => false,
    })
}

fn eval_binary(
    ex: &Executor<'_>,
    state: &mut ShellState,
    op: CondBinaryOp,
    left: &crate::ast::Word,
    right: &crate::ast::Word,
) -> Result<bool, ControlFlow> {
    match op {
        CondBinaryOp::StrEq | CondBinaryOp::StrNe => {
            let subject = expand_word_text(ex, state, left)?.text;
            // The right side is a pattern: quoted parts literal, unquoted
            // glob characters live.
            let pattern = expand_word_pattern(ex, state, right)?;
            let matched = glob_match(&pattern, &subject);
            Ok(if op == CondBinaryOp::StrEq {
                matched
            } else {
                !matched
            })
        }
        CondBinaryOp::Match => {
            let subject = expand_word_text(ex, state, left)?.text;
            let pattern = expand_word_regex(ex, state, right)?;
            match regex_lite::Regex::new(&pattern) {
                Ok(re) => {
                    let matched = re.find(&subject);
                    if let Some(m) = &matched {
                        // BASH_REMATCH[0] equivalent for scripts probing it.
                        state.set_var("BASH_REMATCH", m.as_str().to_string());
                    }
                    Ok(matched.is_some())
                }
                Err(_) => Err(ControlFlow::Errexit {
                    code: 2,
                    stdout: String::new(),
                    stderr: format!(
                        "{}: syntax error in regular expression `{}'\n",
                        state.script_name, pattern
                    ),
                }),
            }
        }
        CondBinaryOp::StrLt | CondBinaryOp::StrGt => {
            let l = expand_word_text(ex, state, left)?.text;
            let r = expand_word_text(ex, state, right)?.text;
            Ok(if op == CondBinaryOp::StrLt {
                l < r
            } else {
                l > r
            })
        }
        CondBinaryOp::NumEq
        | CondBinaryOp::NumNe
        | CondBinaryOp::NumLt
        | CondBinaryOp::NumLe
        | CondBinaryOp::NumGt
        | CondBinaryOp::NumGe => {
            let l = numeric_operand(ex, state, left)?;
            let r = numeric_operand(ex, state, right)?;
            Ok(match op {
                CondBinaryOp::NumEq => l == r,
                CondBinaryOp::NumNe => l != r,
                CondBinaryOp::NumLt => l < r,
                CondBinaryOp::NumLe => l <= r,
                CondBinaryOp::NumGt => l > r,
                CondBinaryOp::NumGe => l >= r,
                _ => unreachable!(),
            })
        }
        CondBinaryOp::NewerThan | CondBinaryOp::OlderThan => {
            let l = expand_word_text(ex, state, left)?.text;
            let r = expand_word_text(ex, state, right)?.text;
            let lm = ex.fs.stat(&ex.fs.resolve(&state.cwd, &l)).map(|s| s.mtime);
            let rm = ex.fs.stat(&ex.fs.resolve(&state.cwd, &r)).map(|s| s.mtime);
            Ok(match (lm, rm, op) {
                (Ok(a), Ok(b), CondBinaryOp::NewerThan) => a > b,
                (Ok(a), Ok(b), CondBinaryOp::OlderThan) => a < b,
                (Ok(_), Err(_), CondBinaryOp::NewerThan) => true,
                (Err(_), Ok(_), CondBinaryOp::OlderThan) => true,
                _ => false,
            })
        }
        CondBinaryOp::SameFile => {
            let l = expand_word_text(ex, state, left)?.text;
            let r = expand_word_text(ex, state, right)?.text;
            let lc = ex.fs.canonicalize(&ex.fs.resolve(&state.cwd, &l));
            let rc = ex.fs.canonicalize(&ex.fs.resolve(&state.cwd, &r));
            Ok(matches!((lc, rc), (Ok(a), Ok(b)) if a == b))
        }
    }
}

fn numeric_operand(
    ex: &Executor<'_>,
    state: &mut ShellState,
    word: &crate::ast::Word,
) -> Result<i64, ControlFlow> {
    let text = expand_word_text(ex, state, word)?.text;
    match parse_shell_int(&text) {
        Some(n) => Ok(n),
        None => {
            // Arithmetic context: a bare name reads through to its value.
            let via_var = state
                .get_var(text.trim())
                .and_then(|v| parse_shell_int(v));
            Ok(via_var.unwrap_or(0))
        }
    }
}
