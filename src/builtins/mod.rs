//! Shell-intrinsic builtins.
//!
//! Only the commands inseparable from shell state live here; utility
//! commands (text processors, archive tools, network clients) are the
//! embedder's concern and arrive through the registry.

mod test_cmd;
mod vars;

use crate::command::{CmdResult, CommandContext, Registry};
use crate::error::ControlFlow;

pub fn install(registry: &mut Registry) {
    registry.register("true", Box::new(builtin_true));
    registry.register(":", Box::new(builtin_true));
    registry.register("false", Box::new(builtin_false));
    registry.register("echo", Box::new(builtin_echo));
    registry.register("pwd", Box::new(builtin_pwd));
    registry.register("cd", Box::new(builtin_cd));
    registry.register("export", Box::new(vars::builtin_export));
    registry.register("unset", Box::new(vars::builtin_unset));
    registry.register("set", Box::new(vars::builtin_set));
    registry.register("shift", Box::new(vars::builtin_shift));
    registry.register("local", Box::new(vars::builtin_local));
    registry.register("readonly", Box::new(vars::builtin_readonly));
    registry.register("alias", Box::new(vars::builtin_alias));
    registry.register("unalias", Box::new(vars::builtin_unalias));
    registry.register("read", Box::new(vars::builtin_read));
    registry.register("test", Box::new(test_cmd::builtin_test));
    registry.register("[", Box::new(test_cmd::builtin_bracket));
}

fn builtin_true(_: &mut CommandContext<'_>, _: &[String]) -> Result<CmdResult, ControlFlow> {
    Ok(CmdResult::ok())
}

fn builtin_false(_: &mut CommandContext<'_>, _: &[String]) -> Result<CmdResult, ControlFlow> {
    Ok(CmdResult {
        exit_code: 1,
        ..CmdResult::ok()
    })
}

fn builtin_echo(_: &mut CommandContext<'_>, args: &[String]) -> Result<CmdResult, ControlFlow> {
    let mut newline = true;
    let mut interpret_escapes = false;
    let mut rest = args;

    // Flag parsing stops at the first non-flag word.
    while let Some(first) = rest.first() {
        match first.as_str() {
            "-n" => {
                newline = false;
                rest = &rest[1..];
            }
            "-e" => {
                interpret_escapes = true;
                rest = &rest[1..];
            }
            "-E" => {
                interpret_escapes = false;
                rest = &rest[1..];
            }
            "-ne" | "-en" => {
                newline = false;
                interpret_escapes = true;
                rest = &rest[1..];
            }
            _ => break,
        }
    }

    let joined = rest.join(" ");
    let mut body = if interpret_escapes {
        let (text, stop) = decode_echo_escapes(&joined);
        if stop {
            newline = false;
        }
        text
    } else {
        joined
    };
    if newline {
        body.push('\n');
    }
    Ok(CmdResult::out(body))
}

/// `echo -e` escapes; returns the decoded text and whether `\c` cut
/// output short.
fn decode_echo_escapes(s: &str) -> (String, bool) {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' && i + 1 < chars.len() {
            let (decoded, consumed) = match chars[i + 1] {
                'n' => ("\n".to_string(), 2),
                't' => ("\t".to_string(), 2),
                'r' => ("\r".to_string(), 2),
                'a' => ("\x07".to_string(), 2),
                'b' => ("\x08".to_string(), 2),
                'f' => ("\x0c".to_string(), 2),
                'v' => ("\x0b".to_string(), 2),
                'e' | 'E' => ("\x1b".to_string(), 2),
                '\\' => ("\\".to_string(), 2),
                'c' => return (out, true),
                '0' => {
                    let mut value = 0u32;
                    let mut n = 2;
                    while n < 5 {
                        match chars.get(i + n) {
                            Some(&d) if d.is_digit(8) => {
                                value = value * 8 + d.to_digit(8).unwrap();
                                n += 1;
                            }
                            _ => break,
                        }
                    }
                    (
                        char::from_u32(value).unwrap_or('\0').to_string(),
                        n,
                    )
                }
                'x' => {
                    let mut value = 0u32;
                    let mut n = 2;
                    while n < 4 {
                        match chars.get(i + n) {
                            Some(&d) if d.is_ascii_hexdigit() => {
                                value = value * 16 + d.to_digit(16).unwrap();
                                n += 1;
                            }
                            _ => break,
                        }
                    }
                    if n == 2 {
                        ("\\x".to_string(), 2)
                    } else {
                        (char::from_u32(value).unwrap_or('\0').to_string(), n)
                    }
                }
                other => (format!("\\{}", other), 2),
            };
            out.push_str(&decoded);
            i += consumed;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    (out, false)
}

fn builtin_pwd(ctx: &mut CommandContext<'_>, _: &[String]) -> Result<CmdResult, ControlFlow> {
    Ok(CmdResult::out(format!("{}\n", ctx.state.cwd)))
}

fn builtin_cd(ctx: &mut CommandContext<'_>, args: &[String]) -> Result<CmdResult, ControlFlow> {
    let target = match args.first().map(String::as_str) {
        None | Some("~") => ctx
            .get_var("HOME")
            .map(|h| h.to_string())
            .unwrap_or_else(|| "/".to_string()),
        Some("-") => {
            let prev = ctx.state.prev_dir.clone();
            let result = change_dir(ctx, &prev)?;
            if result.exit_code == 0 {
                // `cd -` echoes the directory it lands in.
                return Ok(CmdResult {
                    stdout: format!("{}\n", ctx.state.cwd),
                    ..result
                });
            }
            return Ok(result);
        }
        Some(path) => path.to_string(),
    };
    change_dir(ctx, &target)
}

fn change_dir(ctx: &mut CommandContext<'_>, target: &str) -> Result<CmdResult, ControlFlow> {
    let resolved = ctx.resolve_path(target);
    if !ctx.fs.is_dir(&resolved) {
        let reason = if ctx.fs.exists(&resolved) {
            "Not a directory"
        } else {
            "No such file or directory"
        };
        return Ok(CmdResult::fail(
            format!("{}: cd: {}: {}\n", ctx.state.script_name, target, reason),
            1,
        ));
    }
    ctx.state.prev_dir = ctx.state.cwd.clone();
    ctx.state.cwd = resolved.clone();
    let old = ctx.state.prev_dir.clone();
    ctx.set_var("OLDPWD", old);
    ctx.set_var("PWD", resolved);
    Ok(CmdResult::ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_escape_decoding() {
        assert_eq!(decode_echo_escapes(r"a\tb"), ("a\tb".to_string(), false));
        assert_eq!(decode_echo_escapes(r"x\n"), ("x\n".to_string(), false));
        assert_eq!(decode_echo_escapes(r"ab\cxy"), ("ab".to_string(), true));
        assert_eq!(decode_echo_escapes(r"\061"), ("1".to_string(), false));
        assert_eq!(decode_echo_escapes(r"\x41"), ("A".to_string(), false));
    }
}
