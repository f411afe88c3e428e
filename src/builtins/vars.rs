//! Variable, option, and alias builtins.

use crate::command::{CmdResult, CommandContext};
use crate::error::ControlFlow;
use crate::interp::expand::split_ifs;
use crate::lexer::is_valid_name;

pub fn builtin_export(
    ctx: &mut CommandContext<'_>,
    args: &[String],
) -> Result<CmdResult, ControlFlow> {
    if args.is_empty() || args[0] == "-p" {
        let mut names: Vec<&String> = ctx.state.exported.iter().collect();
        names.sort();
        let mut out = String::new();
        for name in names {
            match ctx.state.get_var(name) {
                Some(value) => out.push_str(&format!("declare -x {}=\"{}\"\n", name, value)),
                None => out.push_str(&format!("declare -x {}\n", name)),
            }
        }
        return Ok(CmdResult::out(out));
    }

    for arg in args {
        let (name, value) = match arg.split_once('=') {
            Some((n, v)) => (n, Some(v)),
            None => (arg.as_str(), None),
        };
        if !is_valid_name(name) {
            return Ok(CmdResult::fail(
                format!(
                    "{}: export: `{}': not a valid identifier\n",
                    ctx.state.script_name, arg
                ),
                1,
            ));
        }
        if let Some(value) = value {
            ctx.state.set_var(name, value.to_string());
        }
        ctx.state.export_var(name);
    }
    Ok(CmdResult::ok())
}

pub fn builtin_unset(
    ctx: &mut CommandContext<'_>,
    args: &[String],
) -> Result<CmdResult, ControlFlow> {
    let mut functions_only = false;
    let mut rest = args;
    match args.first().map(String::as_str) {
        Some("-f") => {
            functions_only = true;
            rest = &args[1..];
        }
        Some("-v") => {
            rest = &args[1..];
        }
        _ => {}
    }

    for name in rest {
        if functions_only {
            ctx.state.functions.remove(name);
            continue;
        }
        if ctx.state.readonly.contains(name) {
            return Ok(CmdResult::fail(
                format!(
                    "{}: unset: {}: cannot unset: readonly variable\n",
                    ctx.state.script_name, name
                ),
                1,
            ));
        }
        if ctx.state.vars.contains_key(name) {
            ctx.state.unset_var(name);
        } else {
            ctx.state.functions.remove(name);
        }
    }
    Ok(CmdResult::ok())
}

pub fn builtin_set(
    ctx: &mut CommandContext<'_>,
    args: &[String],
) -> Result<CmdResult, ControlFlow> {
    if args.is_empty() {
        let mut names: Vec<&String> = ctx.state.vars.keys().collect();
        names.sort();
        let mut out = String::new();
        for name in names {
            out.push_str(&format!("{}='{}'\n", name, ctx.state.vars[name]));
        }
        return Ok(CmdResult::out(out));
    }

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        match arg.as_str() {
            "--" => {
                ctx.state.positional = args[i + 1..].to_vec();
                return Ok(CmdResult::ok());
            }
            "-o" | "+o" => {
                let enable = arg.starts_with('-');
                i += 1;
                let option = match args.get(i) {
                    Some(o) => o.as_str(),
                    None => return Ok(CmdResult::ok()),
                };
                if !apply_named_option(ctx, option, enable) {
                    return Ok(CmdResult::fail(
                        format!(
                            "{}: set: {}: invalid option name\n",
                            ctx.state.script_name, option
                        ),
                        2,
                    ));
                }
            }
            flag if flag.starts_with('-') || flag.starts_with('+') => {
                let enable = flag.starts_with('-');
                for c in flag.chars().skip(1) {
                    match c {
                        'e' => ctx.state.opts.errexit = enable,
                        'u' => ctx.state.opts.nounset = enable,
                        'x' => ctx.state.opts.xtrace = enable,
                        'v' => ctx.state.opts.verbose = enable,
                        'f' => ctx.state.opts.noglob = enable,
                        'n' => ctx.state.opts.noexec = enable,
                        _ => {
                            return Ok(CmdResult::fail(
                                format!(
                                    "{}: set: {}{}: invalid option\n",
                                    ctx.state.script_name,
                                    if enable { "-" } else { "+" },
                                    c
                                ),
                                2,
                            ))
                        }
                    }
                }
            }
            _ => {
                // Remaining words rebind the positional parameters.
                ctx.state.positional = args[i..].to_vec();
                return Ok(CmdResult::ok());
            }
        }
        i += 1;
    }
    Ok(CmdResult::ok())
}

fn apply_named_option(ctx: &mut CommandContext<'_>, option: &str, enable: bool) -> bool {
    match option {
        "errexit" => ctx.state.opts.errexit = enable,
        "nounset" => ctx.state.opts.nounset = enable,
        "xtrace" => ctx.state.opts.xtrace = enable,
        "verbose" => ctx.state.opts.verbose = enable,
        "pipefail" => ctx.state.opts.pipefail = enable,
        "noglob" => ctx.state.opts.noglob = enable,
        "noexec" => ctx.state.opts.noexec = enable,
        _ => return false,
    }
    true
}

pub fn builtin_shift(
    ctx: &mut CommandContext<'_>,
    args: &[String],
) -> Result<CmdResult, ControlFlow> {
    let n = args
        .first()
        .and_then(|a| a.parse::<usize>().ok())
        .unwrap_or(1);
    if n > ctx.state.positional.len() {
        return Ok(CmdResult {
            exit_code: 1,
            ..CmdResult::ok()
        });
    }
    ctx.state.positional.drain(..n);
    Ok(CmdResult::ok())
}

pub fn builtin_local(
    ctx: &mut CommandContext<'_>,
    args: &[String],
) -> Result<CmdResult, ControlFlow> {
    if ctx.state.call_depth == 0 {
        return Ok(CmdResult::fail(
            format!(
                "{}: local: can only be used in a function\n",
                ctx.state.script_name
            ),
            1,
        ));
    }
    for arg in args {
        let (name, value) = match arg.split_once('=') {
            Some((n, v)) => (n, Some(v.to_string())),
            None => (arg.as_str(), None),
        };
        if !is_valid_name(name) {
            return Ok(CmdResult::fail(
                format!(
                    "{}: local: `{}': not a valid identifier\n",
                    ctx.state.script_name, arg
                ),
                1,
            ));
        }
        ctx.state.save_local(name);
        match value {
            Some(v) => ctx.state.set_var(name, v),
            None => ctx.state.set_var(name, String::new()),
        }
    }
    Ok(CmdResult::ok())
}

pub fn builtin_readonly(
    ctx: &mut CommandContext<'_>,
    args: &[String],
) -> Result<CmdResult, ControlFlow> {
    for arg in args {
        let (name, value) = match arg.split_once('=') {
            Some((n, v)) => (n, Some(v.to_string())),
            None => (arg.as_str(), None),
        };
        if let Some(v) = value {
            ctx.state.set_var(name, v);
        }
        ctx.state.readonly.insert(name.to_string());
    }
    Ok(CmdResult::ok())
}

pub fn builtin_alias(
    ctx: &mut CommandContext<'_>,
    args: &[String],
) -> Result<CmdResult, ControlFlow> {
    if args.is_empty() {
        let mut out = String::new();
        for (name, value) in &ctx.state.aliases {
            out.push_str(&format!("alias {}='{}'\n", name, value));
        }
        return Ok(CmdResult::out(out));
    }

    let mut out = String::new();
    let mut status = 0;
    for arg in args {
        match arg.split_once('=') {
            Some((name, value)) => {
                ctx.state
                    .aliases
                    .insert(name.to_string(), value.to_string());
            }
            None => match ctx.state.aliases.get(arg) {
                Some(value) => out.push_str(&format!("alias {}='{}'\n", arg, value)),
                None => {
                    status = 1;
                }
            },
        }
    }
    Ok(CmdResult {
        stdout: out,
        stderr: String::new(),
        exit_code: status,
    })
}

pub fn builtin_unalias(
    ctx: &mut CommandContext<'_>,
    args: &[String],
) -> Result<CmdResult, ControlFlow> {
    if args.first().map(String::as_str) == Some("-a") {
        ctx.state.aliases.clear();
        return Ok(CmdResult::ok());
    }
    let mut status = 0;
    for name in args {
        if ctx.state.aliases.shift_remove(name).is_none() {
            status = 1;
        }
    }
    Ok(CmdResult {
        exit_code: status,
        ..CmdResult::ok()
    })
}

pub fn builtin_read(
    ctx: &mut CommandContext<'_>,
    args: &[String],
) -> Result<CmdResult, ControlFlow> {
    let mut rest = args;
    // `-r` (no backslash processing) is the only mode the sandbox
    // distinguishes; input arrives pre-buffered either way.
    while matches!(rest.first().map(String::as_str), Some("-r")) {
        rest = &rest[1..];
    }

    let (line, had_input) = if ctx.stdin_is_pending {
        // Consume from the compound's shared buffer so successive reads
        // see successive lines.
        ctx.state.take_stdin_line()
    } else {
        let line = ctx.stdin.split('\n').next().unwrap_or("").to_string();
        (line, !ctx.stdin.is_empty())
    };

    if rest.is_empty() {
        ctx.set_var("REPLY", line);
    } else {
        let ifs = ctx
            .get_var("IFS")
            .map(|s| s.to_string())
            .unwrap_or_else(|| " \t\n".to_string());
        let mut fields = split_ifs(&line, &ifs);
        let names = rest.to_vec();
        for (i, name) in names.iter().enumerate() {
            if !is_valid_name(name) {
                return Ok(CmdResult::fail(
                    format!(
                        "{}: read: `{}': not a valid identifier\n",
                        ctx.state.script_name, name
                    ),
                    1,
                ));
            }
            let value = if i + 1 == names.len() {
                // The last variable takes the remainder.
                let remainder = fields.split_off(0);
                remainder.join(" ")
            } else if fields.is_empty() {
                String::new()
            } else {
                fields.remove(0)
            };
            ctx.set_var(name.as_str(), value);
        }
    }

    Ok(CmdResult {
        exit_code: if had_input { 0 } else { 1 },
        ..CmdResult::ok()
    })
}
