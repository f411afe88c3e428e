//! Runtime word expansion.
//!
//! Resolves parsed word pieces against shell state: brace expansion, tilde,
//! parameter expansion with its operator suite, command substitution
//! (re-entrant execution against a branched state), arithmetic expansion,
//! field splitting on `IFS`, and pathname expansion over the virtual
//! filesystem. Quote removal falls out of the piece structure.

use rand::Rng;

use crate::ast::{
    BraceItem, CaseDir, ParamExpansion, ParamOp, RemovalEnd, Script, Word, WordPiece,
};
use crate::error::ControlFlow;
use crate::interp::arith_eval::eval_arith;
use crate::interp::state::ShellState;
use crate::interp::Executor;

/// Result of expanding a list of words into command fields.
#[derive(Debug, Clone, Default)]
pub struct ExpandedFields {
    pub fields: Vec<String>,
    /// Stderr produced by command substitutions along the way.
    pub stderr: String,
}

/// Result of expanding one word without splitting or globbing.
#[derive(Debug, Clone, Default)]
pub struct ExpandedText {
    pub text: String,
    pub stderr: String,
}

/// Intermediate fragments: text with quoting provenance, plus explicit
/// field breaks produced by splitting unquoted expansions.
#[derive(Debug, Clone)]
enum Frag {
    Text { s: String, quoted: bool },
    Break,
}

pub fn expand_words(
    ex: &Executor<'_>,
    state: &mut ShellState,
    words: &[Word],
) -> Result<ExpandedFields, ControlFlow> {
    let mut out = ExpandedFields::default();
    for word in words {
        for exploded in explode_braces(word) {
            let frags = expand_to_frags(ex, state, &exploded, &mut out.stderr)?;
            let fields = assemble_fields(&frags);
            for field in fields {
                if field.globbable && !state.opts.noglob {
                    match glob_field(ex, state, &field.pattern) {
                        Some(mut matches) => out.fields.append(&mut matches),
                        None => out.fields.push(field.literal),
                    }
                } else {
                    out.fields.push(field.literal);
                }
            }
        }
    }
    Ok(out)
}

/// Expand a word to a single string: no field splitting, no globbing. Used
/// for assignments, redirection targets, case subjects, and heredocs.
pub fn expand_word_text(
    ex: &Executor<'_>,
    state: &mut ShellState,
    word: &Word,
) -> Result<ExpandedText, ControlFlow> {
    let mut out = ExpandedText::default();
    let frags = expand_to_frags(ex, state, word, &mut out.stderr)?;
    for frag in frags {
        match frag {
            Frag::Text { s, .. } => out.text.push_str(&s),
            // Breaks collapse to the joining space `$*`-style expansion
            // uses between positionals.
            Frag::Break => out.text.push(' '),
        }
    }
    Ok(out)
}

/// Expand a word into a glob/match pattern: quoted pieces have their glob
/// metacharacters neutralized, unquoted pieces keep them live. Used by
/// `case` arms, `[[ == ]]`, and parameter pattern operators.
pub fn expand_word_pattern(
    ex: &Executor<'_>,
    state: &mut ShellState,
    word: &Word,
) -> Result<String, ControlFlow> {
    let mut stderr = String::new();
    let frags = expand_to_frags(ex, state, word, &mut stderr)?;
    let mut pattern = String::new();
    for frag in frags {
        match frag {
            Frag::Text { s, quoted } => {
                if quoted {
                    pattern.push_str(&escape_glob(&s));
                } else {
                    pattern.push_str(&s);
                }
            }
            Frag::Break => pattern.push(' '),
        }
    }
    Ok(pattern)
}

/// Regex source for `=~`: escaped pieces keep their backslash.
pub fn expand_word_regex(
    ex: &Executor<'_>,
    state: &mut ShellState,
    word: &Word,
) -> Result<String, ControlFlow> {
    let mut out = String::new();
    for piece in &word.pieces {
        match piece {
            WordPiece::Escaped(c) => {
                out.push('\\');
                out.push_str(c);
            }
            other => {
                let single = Word {
                    pieces: vec![other.clone()],
                };
                let mut stderr = String::new();
                let frags = expand_to_frags(ex, state, &single, &mut stderr)?;
                for frag in frags {
                    if let Frag::Text { s, .. } = frag {
                        out.push_str(&s);
                    }
                }
            }
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Brace expansion
// ---------------------------------------------------------------------------

/// Expand `Brace` pieces into the cartesian product of plain words.
fn explode_braces(word: &Word) -> Vec<Word> {
    let mut results: Vec<Vec<WordPiece>> = vec![Vec::new()];

    for piece in &word.pieces {
        match piece {
            WordPiece::Brace(items) => {
                let mut next = Vec::new();
                for prefix in &results {
                    for item in items {
                        match item {
                            BraceItem::Word(w) => {
                                for sub in explode_braces(w) {
                                    let mut combined = prefix.clone();
                                    combined.extend(sub.pieces);
                                    next.push(combined);
                                }
                            }
                            BraceItem::NumRange {
                                start,
                                end,
                                step,
                                width,
                            } => {
                                for n in iter_range(*start, *end, *step) {
                                    let mut combined = prefix.clone();
                                    let text = if *width > 0 {
                                        format!("{:0width$}", n, width = *width)
                                    } else {
                                        n.to_string()
                                    };
                                    combined.push(WordPiece::Literal(text));
                                    next.push(combined);
                                }
                            }
                            BraceItem::CharRange { start, end, step } => {
                                for c in iter_range(*start as i64, *end as i64, *step) {
                                    if let Some(c) = char::from_u32(c as u32) {
                                        let mut combined = prefix.clone();
                                        combined.push(WordPiece::Literal(c.to_string()));
                                        next.push(combined);
                                    }
                                }
                            }
                        }
                    }
                }
                results = next;
            }
            other => {
                for r in results.iter_mut() {
                    r.push(other.clone());
                }
            }
        }
    }

    results.into_iter().map(|pieces| Word { pieces }).collect()
}

fn iter_range(start: i64, end: i64, step: i64) -> Vec<i64> {
    let step = step.abs().max(1);
    let mut out = Vec::new();
    if start <= end {
        let mut n = start;
        while n <= end {
            out.push(n);
            n += step;
        }
    } else {
        let mut n = start;
        while n >= end {
            out.push(n);
            n -= step;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Piece expansion
// ---------------------------------------------------------------------------

fn expand_to_frags(
    ex: &Executor<'_>,
    state: &mut ShellState,
    word: &Word,
    stderr: &mut String,
) -> Result<Vec<Frag>, ControlFlow> {
    let mut frags = Vec::new();
    for piece in &word.pieces {
        expand_piece(ex, state, piece, false, stderr, &mut frags)?;
    }
    Ok(frags)
}

fn expand_piece(
    ex: &Executor<'_>,
    state: &mut ShellState,
    piece: &WordPiece,
    in_quotes: bool,
    stderr: &mut String,
    frags: &mut Vec<Frag>,
) -> Result<(), ControlFlow> {
    match piece {
        WordPiece::Literal(s) | WordPiece::Glob(s) => frags.push(Frag::Text {
            s: s.clone(),
            quoted: in_quotes,
        }),
        WordPiece::SingleQuoted(s) => frags.push(Frag::Text {
            s: s.clone(),
            quoted: true,
        }),
        WordPiece::Escaped(c) => frags.push(Frag::Text {
            s: c.clone(),
            quoted: true,
        }),
        WordPiece::DoubleQuoted(inner) => {
            // An empty "" still produces a field.
            if inner.is_empty() {
                frags.push(Frag::Text {
                    s: String::new(),
                    quoted: true,
                });
            }
            for p in inner {
                expand_piece(ex, state, p, true, stderr, frags)?;
            }
        }
        WordPiece::Tilde(user) => {
            let home = match user {
                None => state
                    .get_var("HOME")
                    .map(|h| h.to_string())
                    .unwrap_or_else(|| "~".to_string()),
                Some(name) => format!("/home/{}", name),
            };
            frags.push(Frag::Text {
                s: home,
                quoted: false,
            });
        }
        WordPiece::Param(param) => expand_param(ex, state, param, in_quotes, stderr, frags)?,
        WordPiece::CommandSub { script, .. } => {
            let output = run_command_substitution(ex, state, script, stderr)?;
            push_split_value(state, &output, in_quotes, frags);
        }
        WordPiece::Arith(expr) => match eval_arith(state, expr) {
            Ok(value) => frags.push(Frag::Text {
                s: value.to_string(),
                quoted: in_quotes,
            }),
            Err(e) => {
                return Err(ControlFlow::Errexit {
                    code: 1,
                    stdout: String::new(),
                    stderr: format!("{}: {}\n", state.script_name, e),
                })
            }
        },
        WordPiece::Brace(_) => {
            // Brace pieces are exploded before this point; inside quotes or
            // pattern contexts they read back literally.
            frags.push(Frag::Text {
                s: brace_literal(piece),
                quoted: in_quotes,
            });
        }
    }
    Ok(())
}

fn brace_literal(piece: &WordPiece) -> String {
    match piece {
        WordPiece::Brace(items) => {
            let inner: Vec<String> = items
                .iter()
                .map(|item| match item {
                    BraceItem::Word(w) => w
                        .pieces
                        .iter()
                        .map(|p| match p {
                            WordPiece::Literal(s) | WordPiece::Glob(s) => s.clone(),
                            WordPiece::SingleQuoted(s) => s.clone(),
                            _ => String::new(),
                        })
                        .collect::<String>(),
                    BraceItem::NumRange { start, end, .. } => format!("{}..{}", start, end),
                    BraceItem::CharRange { start, end, .. } => format!("{}..{}", start, end),
                })
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        _ => String::new(),
    }
}

/// Split an unquoted expansion result on `IFS` into break-separated
/// fragments; quoted results stay whole.
fn push_split_value(state: &ShellState, value: &str, in_quotes: bool, frags: &mut Vec<Frag>) {
    if in_quotes {
        frags.push(Frag::Text {
            s: value.to_string(),
            quoted: true,
        });
        return;
    }
    let ifs = state.get_var("IFS").unwrap_or(" \t\n");
    if ifs.is_empty() || value.is_empty() {
        if !value.is_empty() {
            frags.push(Frag::Text {
                s: value.to_string(),
                quoted: false,
            });
        }
        return;
    }
    let parts = split_ifs(value, ifs);
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            frags.push(Frag::Break);
        }
        frags.push(Frag::Text {
            s: part.clone(),
            quoted: false,
        });
    }
}

/// Field splitting on `IFS`: whitespace class members collapse and strip
/// at the ends; other separators delimit even when adjacent.
pub fn split_ifs(value: &str, ifs: &str) -> Vec<String> {
    let ws: Vec<char> = ifs.chars().filter(|c| c.is_whitespace()).collect();
    let hard: Vec<char> = ifs.chars().filter(|c| !c.is_whitespace()).collect();

    let mut fields = Vec::new();
    let mut current = String::new();
    let mut pending = false;

    for c in value.chars() {
        if ws.contains(&c) {
            if pending || !current.is_empty() {
                fields.push(std::mem::take(&mut current));
                pending = false;
            }
        } else if hard.contains(&c) {
            fields.push(std::mem::take(&mut current));
            pending = false;
        } else {
            current.push(c);
            pending = true;
        }
    }
    if pending || !current.is_empty() {
        fields.push(current);
    }
    fields
}

// ---------------------------------------------------------------------------
// Parameter expansion
// ---------------------------------------------------------------------------

fn expand_param(
    ex: &Executor<'_>,
    state: &mut ShellState,
    param: &ParamExpansion,
    in_quotes: bool,
    stderr: &mut String,
    frags: &mut Vec<Frag>,
) -> Result<(), ControlFlow> {
    // `$@` / `$*` produce multiple fields; handle before the scalar path.
    if param.op.is_none() && (param.name == "@" || param.name == "*") {
        expand_positionals(state, &param.name, in_quotes, frags);
        return Ok(());
    }

    let value = lookup_param(state, &param.name);

    let resolved: String = match &param.op {
        None => match value {
            Some(v) => v,
            None => {
                if state.opts.nounset {
                    return Err(ControlFlow::Unbound {
                        name: param.name.clone(),
                        stdout: String::new(),
                        stderr: String::new(),
                    });
                }
                String::new()
            }
        },
        Some(op) => apply_param_op(ex, state, &param.name, value, op, stderr)?,
    };

    push_split_value(state, &resolved, in_quotes, frags);
    Ok(())
}

fn expand_positionals(state: &ShellState, name: &str, in_quotes: bool, frags: &mut Vec<Frag>) {
    let positionals = &state.positional;
    if positionals.is_empty() {
        return;
    }
    if in_quotes && name == "*" {
        // "$*" joins on the first IFS character.
        let sep = state
            .get_var("IFS")
            .unwrap_or(" \t\n")
            .chars()
            .next()
            .map(|c| c.to_string())
            .unwrap_or_default();
        frags.push(Frag::Text {
            s: positionals.join(&sep),
            quoted: true,
        });
        return;
    }
    // "$@" and both unquoted forms: one field per positional.
    for (i, p) in positionals.iter().enumerate() {
        if i > 0 {
            frags.push(Frag::Break);
        }
        frags.push(Frag::Text {
            s: p.clone(),
            quoted: in_quotes,
        });
    }
}

/// Resolve a parameter name (ordinary variable, positional, or special).
fn lookup_param(state: &ShellState, name: &str) -> Option<String> {
    match name {
        "?" => Some(state.last_status.to_string()),
        "#" => Some(state.positional.len().to_string()),
        "$" => Some(std::process::id().to_string()),
        "!" => Some(state.last_bg_pid.to_string()),
        "0" => Some(state.script_name.clone()),
        "_" => Some(state.last_arg.clone()),
        "-" => {
            let mut flags = String::new();
            if state.opts.errexit {
                flags.push('e');
            }
            if state.opts.nounset {
                flags.push('u');
            }
            if state.opts.xtrace {
                flags.push('x');
            }
            if state.opts.verbose {
                flags.push('v');
            }
            Some(flags)
        }
        "RANDOM" => Some(rand::thread_rng().gen_range(0..32768i32).to_string()),
        "LINENO" => Some(state.current_line.to_string()),
        "PIPESTATUS" => Some(
            state
                .pipe_statuses
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(" "),
        ),
        _ if name.chars().all(|c| c.is_ascii_digit()) => {
            let idx: usize = name.parse().ok()?;
            if idx == 0 {
                Some(state.script_name.clone())
            } else {
                state.positional.get(idx - 1).cloned()
            }
        }
        _ => state.get_var(name).map(|s| s.to_string()),
    }
}

fn apply_param_op(
    ex: &Executor<'_>,
    state: &mut ShellState,
    name: &str,
    value: Option<String>,
    op: &ParamOp,
    stderr: &mut String,
) -> Result<String, ControlFlow> {
    let is_unset = value.is_none();
    let is_empty = value.as_deref().map(|v| v.is_empty()).unwrap_or(true);

    match op {
        ParamOp::Default { word, check_empty } => {
            let use_default = if *check_empty { is_empty } else { is_unset };
            if use_default {
                Ok(expand_word_text(ex, state, word)?.text)
            } else {
                Ok(value.unwrap_or_default())
            }
        }
        ParamOp::AssignDefault { word, check_empty } => {
            let use_default = if *check_empty { is_empty } else { is_unset };
            if use_default {
                let default = expand_word_text(ex, state, word)?.text;
                state.set_var(name, default.clone());
                Ok(default)
            } else {
                Ok(value.unwrap_or_default())
            }
        }
        ParamOp::ErrorIfUnset { word, check_empty } => {
            let fail = if *check_empty { is_empty } else { is_unset };
            if fail {
                let message = match word {
                    Some(w) => expand_word_text(ex, state, w)?.text,
                    None => "parameter null or not set".to_string(),
                };
                return Err(ControlFlow::Errexit {
                    code: 1,
                    stdout: String::new(),
                    stderr: format!("{}: {}: {}\n", state.script_name, name, message),
                });
            }
            Ok(value.unwrap_or_default())
        }
        ParamOp::Alternative { word, check_empty } => {
            let use_alt = if *check_empty { !is_empty } else { !is_unset };
            if use_alt {
                Ok(expand_word_text(ex, state, word)?.text)
            } else {
                Ok(String::new())
            }
        }
        ParamOp::Length => {
            if name == "@" || name == "*" {
                return Ok(state.positional.len().to_string());
            }
            Ok(value.unwrap_or_default().chars().count().to_string())
        }
        ParamOp::Substring { offset, length } => {
            let s = value.unwrap_or_default();
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len() as i64;

            let mut start = eval_arith(state, offset).map_err(|e| arith_failure(state, &e))?;
            if start < 0 {
                start += len;
            }
            let start = start.clamp(0, len) as usize;

            let end = match length {
                None => len as usize,
                Some(expr) => {
                    let n = eval_arith(state, expr).map_err(|e| arith_failure(state, &e))?;
                    if n < 0 {
                        // Negative length counts back from the end.
                        ((len + n).max(start as i64)) as usize
                    } else {
                        (start + n as usize).min(len as usize)
                    }
                }
            };
            Ok(chars[start..end.max(start)].iter().collect())
        }
        ParamOp::Remove {
            pattern,
            end,
            greedy,
        } => {
            let s = value.unwrap_or_default();
            let pat = expand_word_pattern(ex, state, pattern)?;
            Ok(remove_pattern(&s, &pat, *end, *greedy))
        }
        ParamOp::Replace {
            pattern,
            replacement,
            all,
            anchor_start,
            anchor_end,
        } => {
            let s = value.unwrap_or_default();
            let pat = expand_word_pattern(ex, state, pattern)?;
            let rep = match replacement {
                Some(w) => expand_word_text(ex, state, w)?.text,
                None => String::new(),
            };
            Ok(replace_pattern(
                &s,
                &pat,
                &rep,
                *all,
                *anchor_start,
                *anchor_end,
            ))
        }
        ParamOp::CaseMod { dir, all } => {
            let s = value.unwrap_or_default();
            Ok(case_modify(&s, *dir, *all))
        }
        ParamOp::Indirect => {
            let target = value.unwrap_or_default();
            let _ = stderr;
            Ok(lookup_param(state, &target).unwrap_or_default())
        }
    }
}

fn arith_failure(state: &ShellState, e: &crate::interp::arith_eval::ArithError) -> ControlFlow {
    ControlFlow::Errexit {
        code: 1,
        stdout: String::new(),
        stderr: format!("{}: {}\n", state.script_name, e),
    }
}

fn case_modify(s: &str, dir: CaseDir, all: bool) -> String {
    if all {
        match dir {
            CaseDir::Upper => s.to_uppercase(),
            CaseDir::Lower => s.to_lowercase(),
        }
    } else {
        let mut chars = s.chars();
        match chars.next() {
            None => String::new(),
            Some(first) => {
                let converted: String = match dir {
                    CaseDir::Upper => first.to_uppercase().collect(),
                    CaseDir::Lower => first.to_lowercase().collect(),
                };
                format!("{}{}", converted, chars.as_str())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Pattern helpers (glob-style matching)
// ---------------------------------------------------------------------------

/// Neutralize glob metacharacters in text that must match literally.
pub fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '*' | '?' | '[' | ']' => {
                out.push('[');
                out.push(c);
                out.push(']');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Glob-style whole-string match.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    match glob::Pattern::new(pattern) {
        Ok(p) => p.matches_with(
            text,
            glob::MatchOptions {
                case_sensitive: true,
                require_literal_separator: false,
                require_literal_leading_dot: false,
            },
        ),
        Err(_) => pattern == text,
    }
}

fn remove_pattern(s: &str, pattern: &str, end: RemovalEnd, greedy: bool) -> String {
    let chars: Vec<char> = s.chars().collect();
    let n = chars.len();
    match end {
        RemovalEnd::Prefix => {
            let candidates: Box<dyn Iterator<Item = usize>> = if greedy {
                Box::new((0..=n).rev())
            } else {
                Box::new(0..=n)
            };
            for cut in candidates {
                let prefix: String = chars[..cut].iter().collect();
                if glob_match(pattern, &prefix) {
                    return chars[cut..].iter().collect();
                }
            }
            s.to_string()
        }
        RemovalEnd::Suffix => {
            let candidates: Box<dyn Iterator<Item = usize>> = if greedy {
                Box::new(0..=n)
            } else {
                Box::new((0..=n).rev())
            };
            for cut in candidates {
                let suffix: String = chars[cut..].iter().collect();
                if glob_match(pattern, &suffix) {
                    return chars[..cut].iter().collect();
                }
            }
            s.to_string()
        }
    }
}

fn replace_pattern(
    s: &str,
    pattern: &str,
    replacement: &str,
    all: bool,
    anchor_start: bool,
    anchor_end: bool,
) -> String {
    let chars: Vec<char> = s.chars().collect();
    let n = chars.len();

    if anchor_start {
        // Longest prefix match.
        for cut in (0..=n).rev() {
            let prefix: String = chars[..cut].iter().collect();
            if glob_match(pattern, &prefix) {
                let rest: String = chars[cut..].iter().collect();
                return format!("{}{}", replacement, rest);
            }
        }
        return s.to_string();
    }
    if anchor_end {
        for cut in 0..=n {
            let suffix: String = chars[cut..].iter().collect();
            if glob_match(pattern, &suffix) {
                let head: String = chars[..cut].iter().collect();
                return format!("{}{}", head, replacement);
            }
        }
        return s.to_string();
    }

    let mut out = String::new();
    let mut i = 0;
    let mut replaced = false;
    while i < n {
        if all || !replaced {
            // Leftmost-longest match starting at i.
            let mut matched = None;
            for j in (i..=n).rev() {
                let slice: String = chars[i..j].iter().collect();
                if glob_match(pattern, &slice) {
                    matched = Some(j);
                    break;
                }
            }
            if let Some(j) = matched {
                if j > i {
                    out.push_str(replacement);
                    replaced = true;
                    i = j;
                    continue;
                }
                // Empty match: substitute once, then emit the char.
                if !replaced {
                    out.push_str(replacement);
                    replaced = true;
                }
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    if !replaced && glob_match(pattern, "") {
        out.push_str(replacement);
    }
    out
}

// ---------------------------------------------------------------------------
// Command substitution
// ---------------------------------------------------------------------------

fn run_command_substitution(
    ex: &Executor<'_>,
    state: &mut ShellState,
    script: &Script,
    stderr: &mut String,
) -> Result<String, ControlFlow> {
    let mut sub = state.branch();
    let outcome = ex.run_script(&mut sub, script);

    // Ceilings are global: the branch's spend counts for the session.
    state.command_count = sub.command_count;

    let (stdout, sub_stderr, status) = match outcome {
        Ok(result) => (result.stdout, result.stderr, result.exit_code),
        Err(ControlFlow::Exit {
            code,
            stdout,
            stderr,
        }) => (stdout, stderr, code),
        Err(ControlFlow::Limit(e)) => return Err(ControlFlow::Limit(e)),
        Err(other) => {
            let (out, err) = other.output();
            (out.to_string(), err.to_string(), state.last_status)
        }
    };

    stderr.push_str(&sub_stderr);
    state.last_status = status;
    Ok(stdout.trim_end_matches('\n').to_string())
}

// ---------------------------------------------------------------------------
// Field assembly and pathname expansion
// ---------------------------------------------------------------------------

struct Field {
    literal: String,
    pattern: String,
    globbable: bool,
    started: bool,
}

impl Field {
    fn new() -> Self {
        Self {
            literal: String::new(),
            pattern: String::new(),
            globbable: false,
            started: false,
        }
    }
}

fn assemble_fields(frags: &[Frag]) -> Vec<Field> {
    let mut fields = Vec::new();
    let mut current = Field::new();

    for frag in frags {
        match frag {
            Frag::Break => {
                if current.started {
                    fields.push(std::mem::replace(&mut current, Field::new()));
                }
            }
            Frag::Text { s, quoted } => {
                current.started = current.started || *quoted || !s.is_empty();
                current.literal.push_str(s);
                if *quoted {
                    current.pattern.push_str(&escape_glob(s));
                } else {
                    current.pattern.push_str(s);
                    if crate::word::has_glob_meta(s) {
                        current.globbable = true;
                    }
                }
            }
        }
    }
    if current.started {
        fields.push(current);
    }
    fields
}

/// Pathname expansion against the virtual filesystem. Returns None when
/// nothing matches (the caller keeps the literal text).
fn glob_field(ex: &Executor<'_>, state: &ShellState, pattern: &str) -> Option<Vec<String>> {
    let mut matches = Vec::new();

    if !pattern.contains('/') {
        // Match within the current directory.
        let entries = ex.fs.read_dir(&state.cwd).ok()?;
        for entry in entries {
            if entry.name.starts_with('.') && !pattern.starts_with('.') {
                continue;
            }
            if glob_match(pattern, &entry.name) {
                matches.push(entry.name);
            }
        }
    } else {
        let absolute = pattern.starts_with('/');
        let full_pattern = if absolute {
            pattern.to_string()
        } else {
            format!("{}/{}", state.cwd.trim_end_matches('/'), pattern)
        };
        let prefix = format!("{}/", state.cwd.trim_end_matches('/'));
        for path in ex.fs.all_paths() {
            if glob_match(&full_pattern, &path) {
                if absolute {
                    matches.push(path);
                } else if let Some(stripped) = path.strip_prefix(&prefix) {
                    matches.push(stripped.to_string());
                }
            }
        }
    }

    if matches.is_empty() {
        None
    } else {
        matches.sort();
        Some(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ifs_splitting_rules() {
        assert_eq!(split_ifs("a b  c", " \t\n"), vec!["a", "b", "c"]);
        assert_eq!(split_ifs("  a  ", " \t\n"), vec!["a"]);
        assert_eq!(split_ifs("a::b", ":"), vec!["a", "", "b"]);
        // A single trailing delimiter yields no empty final field.
        assert_eq!(split_ifs("a:b:", ":"), vec!["a", "b"]);
    }

    #[test]
    fn glob_escaping() {
        assert_eq!(escape_glob("*.txt"), "[*].txt");
        assert!(glob_match(&escape_glob("*.txt"), "*.txt"));
        assert!(!glob_match(&escape_glob("*.txt"), "a.txt"));
    }

    #[test]
    fn pattern_matching() {
        assert!(glob_match("*.rs", "main.rs"));
        assert!(glob_match("a?c", "abc"));
        assert!(glob_match("[0-9]*", "42nd"));
        assert!(!glob_match("*.rs", "main.go"));
    }

    #[test]
    fn prefix_suffix_removal() {
        assert_eq!(
            remove_pattern("/usr/local/bin", "*/", RemovalEnd::Prefix, true),
            "bin"
        );
        assert_eq!(
            remove_pattern("/usr/local/bin", "*/", RemovalEnd::Prefix, false),
            "usr/local/bin"
        );
        assert_eq!(
            remove_pattern("archive.tar.gz", ".*", RemovalEnd::Suffix, true),
            "archive"
        );
        assert_eq!(
            remove_pattern("archive.tar.gz", ".*", RemovalEnd::Suffix, false),
            "archive.tar"
        );
        assert_eq!(
            remove_pattern("hello", "xyz", RemovalEnd::Prefix, false),
            "hello"
        );
    }

    #[test]
    fn replacement() {
        assert_eq!(replace_pattern("aXbXc", "X", "-", false, false, false), "a-bXc");
        assert_eq!(replace_pattern("aXbXc", "X", "-", true, false, false), "a-b-c");
        assert_eq!(
            replace_pattern("hello", "he*", "_", false, true, false),
            "_"
        );
        assert_eq!(
            replace_pattern("hello.rs", "*.rs", "!", false, false, true),
            "!"
        );
    }

    #[test]
    fn case_modification() {
        assert_eq!(case_modify("hello", CaseDir::Upper, false), "Hello");
        assert_eq!(case_modify("hello", CaseDir::Upper, true), "HELLO");
        assert_eq!(case_modify("WORLD", CaseDir::Lower, false), "wORLD");
        assert_eq!(case_modify("WORLD", CaseDir::Lower, true), "world");
    }

    #[test]
    fn brace_explosion() {
        let word = crate::word::parse_word("{a,b}x", crate::word::WordFlags::default()).unwrap();
        let exploded = explode_braces(&word);
        assert_eq!(exploded.len(), 2);

        let word = crate::word::parse_word("{1..3}", crate::word::WordFlags::default()).unwrap();
        let exploded = explode_braces(&word);
        assert_eq!(exploded.len(), 3);
    }

    #[test]
    fn range_iteration() {
        assert_eq!(iter_range(1, 5, 1), vec![1, 2, 3, 4, 5]);
        assert_eq!(iter_range(5, 1, 1), vec![5, 4, 3, 2, 1]);
        assert_eq!(iter_range(0, 10, 5), vec![0, 5, 10]);
    }
}
