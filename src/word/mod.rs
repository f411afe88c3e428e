//! The word/expansion model.
//!
//! `parse_word` splits the literal text of one token into an ordered list
//! of typed pieces (literal, quoting, parameter reference, command
//! substitution, arithmetic expansion, glob, brace, tilde). It is shared by
//! the parser (to find expansion boundaries while scanning) and the
//! interpreter (which resolves the pieces at run time).
//!
//! Nested command substitutions are parsed with a brand-new [`Parser`]
//! instance; a parse failure inside a substitution aborts the entire outer
//! parse.
//!
//! [`Parser`]: crate::parser::Parser

pub mod scan;

use crate::ast::{BraceItem, CaseDir, ParamExpansion, ParamOp, RemovalEnd, Word, WordPiece};
use crate::error::ParseError;

/// Flags controlling how raw token text is split into pieces.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordFlags {
    /// Token was one fully quoted span.
    pub quoted: bool,
    /// ...specifically single-quoted (fully literal).
    pub single_quoted: bool,
    /// Right-hand side of an assignment: tilde after `:`/`=`, no brace
    /// expansion, no glob.
    pub assignment: bool,
    /// Heredoc body: quotes are literal, only `$`, `` ` `` and a narrow
    /// escape set are special.
    pub heredoc: bool,
    /// Brace expansion disabled (always inside `[[ ]]`).
    pub no_brace: bool,
    /// Regex pattern position (`=~` RHS): escapes stay explicit so the
    /// backslash reaches the regex engine.
    pub regex: bool,
}

/// Parse raw token text into a [`Word`].
pub fn parse_word(raw: &str, flags: WordFlags) -> Result<Word, ParseError> {
    if flags.single_quoted {
        return Ok(Word {
            pieces: vec![WordPiece::SingleQuoted(raw.to_string())],
        });
    }
    if flags.quoted {
        let pieces = parse_double_quoted_interior(raw)?;
        return Ok(Word {
            pieces: vec![WordPiece::DoubleQuoted(pieces)],
        });
    }

    let chars: Vec<char> = raw.chars().collect();
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    // Tilde expansion applies at word start, and after `:` or `=` in
    // assignment context.
    let mut tilde_ok = !flags.heredoc;

    while i < chars.len() {
        let c = chars[i];

        if flags.heredoc {
            // Inside a heredoc body only `$`, backticks, and `\$ \` \\`
            // escapes are special; quotes are data.
            match c {
                '\\' if matches!(chars.get(i + 1), Some(&('$' | '`' | '\\'))) => {
                    literal.push(chars[i + 1]);
                    i += 2;
                }
                '$' => {
                    flush_literal(&mut pieces, &mut literal, false);
                    let (piece, next) = parse_dollar(&chars, i, false)?;
                    pieces.push(piece);
                    i = next;
                }
                '`' => {
                    flush_literal(&mut pieces, &mut literal, false);
                    let (piece, next) = parse_backquoted(&chars, i, false)?;
                    pieces.push(piece);
                    i = next;
                }
                _ => {
                    literal.push(c);
                    i += 1;
                }
            }
            continue;
        }

        match c {
            '\'' => {
                flush_literal(&mut pieces, &mut literal, !flags.regex);
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != '\'' {
                    s.push(chars[i]);
                    i += 1;
                }
                i += 1; // closing quote
                pieces.push(WordPiece::SingleQuoted(s));
                tilde_ok = false;
            }
            '"' => {
                flush_literal(&mut pieces, &mut literal, !flags.regex);
                let mut inner = String::new();
                i += 1;
                while i < chars.len() {
                    if chars[i] == '\\' && i + 1 < chars.len() {
                        inner.push(chars[i]);
                        inner.push(chars[i + 1]);
                        i += 2;
                        continue;
                    }
                    if chars[i] == '"' {
                        break;
                    }
                    inner.push(chars[i]);
                    i += 1;
                }
                i += 1; // closing quote
                pieces.push(WordPiece::DoubleQuoted(parse_double_quoted_interior(&inner)?));
                tilde_ok = false;
            }
            '\\' if i + 1 < chars.len() => {
                if chars[i + 1] == '\n' {
                    // Line continuation vanished already in spirit; drop it.
                    i += 2;
                    continue;
                }
                flush_literal(&mut pieces, &mut literal, !flags.regex);
                pieces.push(WordPiece::Escaped(chars[i + 1].to_string()));
                i += 2;
                tilde_ok = false;
            }
            '$' if chars.get(i + 1) == Some(&'\'') => {
                flush_literal(&mut pieces, &mut literal, !flags.regex);
                let (decoded, next) = decode_ansi_c(&chars, i + 2);
                pieces.push(WordPiece::SingleQuoted(decoded));
                i = next;
                tilde_ok = false;
            }
            '$' if chars.get(i + 1) == Some(&'"') => {
                // Locale quoting behaves as plain double quotes.
                i += 1;
            }
            '$' => {
                flush_literal(&mut pieces, &mut literal, !flags.regex);
                let (piece, next) = parse_dollar(&chars, i, false)?;
                pieces.push(piece);
                i = next;
                tilde_ok = false;
            }
            '`' => {
                flush_literal(&mut pieces, &mut literal, !flags.regex);
                let (piece, next) = parse_backquoted(&chars, i, false)?;
                pieces.push(piece);
                i = next;
                tilde_ok = false;
            }
            '~' if tilde_ok && literal.is_empty() => {
                // ~ or ~user, up to the next `/` (or `:` in assignments).
                let mut j = i + 1;
                let mut user = String::new();
                while let Some(&u) = chars.get(j) {
                    if u == '/' || (flags.assignment && u == ':') {
                        break;
                    }
                    if is_word_char(u) {
                        user.push(u);
                        j += 1;
                    } else {
                        break;
                    }
                }
                let terminated = matches!(chars.get(j), None | Some(&'/'))
                    || (flags.assignment && chars.get(j) == Some(&':'));
                if terminated {
                    flush_literal(&mut pieces, &mut literal, !flags.regex);
                    pieces.push(WordPiece::Tilde(if user.is_empty() {
                        None
                    } else {
                        Some(user)
                    }));
                    i = j;
                    tilde_ok = false;
                } else {
                    literal.push(c);
                    i += 1;
                    tilde_ok = false;
                }
            }
            '{' if !flags.no_brace && !flags.assignment && !flags.regex => {
                if let Some((items, next)) = try_brace_expansion(&chars, i, flags)? {
                    flush_literal(&mut pieces, &mut literal, true);
                    pieces.push(WordPiece::Brace(items));
                    i = next;
                    tilde_ok = false;
                } else {
                    literal.push(c);
                    i += 1;
                    tilde_ok = false;
                }
            }
            _ => {
                if flags.assignment && (c == ':' || c == '=') {
                    tilde_ok = true;
                } else {
                    tilde_ok = false;
                }
                literal.push(c);
                i += 1;
            }
        }
    }

    flush_literal(&mut pieces, &mut literal, !flags.regex && !flags.heredoc);
    Ok(Word { pieces })
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'
}

/// Push the pending literal run, classifying it as a glob pattern when it
/// contains unquoted glob metacharacters (and glob detection is wanted).
fn flush_literal(pieces: &mut Vec<WordPiece>, literal: &mut String, detect_glob: bool) {
    if literal.is_empty() {
        return;
    }
    let text = std::mem::take(literal);
    if detect_glob && has_glob_meta(&text) {
        pieces.push(WordPiece::Glob(text));
    } else {
        pieces.push(WordPiece::Literal(text));
    }
}

/// Unquoted glob metacharacters: `*`, `?`, or a balanced `[...]` class.
pub fn has_glob_meta(s: &str) -> bool {
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' | '?' => return true,
            '[' => {
                let mut j = i + 1;
                if chars.get(j) == Some(&'!') || chars.get(j) == Some(&'^') {
                    j += 1;
                }
                if chars.get(j) == Some(&']') {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j < chars.len() {
                    return true;
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    false
}

/// Parse the interior of a double-quoted span: literal runs plus
/// parameter/command/arithmetic expansions. No globbing, no field
/// splitting, no brace expansion; backslash escapes only
/// `"` `\` `$` `` ` `` and newline.
fn parse_double_quoted_interior(inner: &str) -> Result<Vec<WordPiece>, ParseError> {
    let chars: Vec<char> = inner.chars().collect();
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                let next = chars[i + 1];
                match next {
                    '"' | '\\' | '$' | '`' => {
                        literal.push(next);
                        i += 2;
                    }
                    '\n' => {
                        i += 2;
                    }
                    _ => {
                        literal.push('\\');
                        i += 1;
                    }
                }
            }
            '$' => {
                if !literal.is_empty() {
                    pieces.push(WordPiece::Literal(std::mem::take(&mut literal)));
                }
                let (piece, next) = parse_dollar(&chars, i, true)?;
                pieces.push(piece);
                i = next;
            }
            '`' => {
                if !literal.is_empty() {
                    pieces.push(WordPiece::Literal(std::mem::take(&mut literal)));
                }
                let (piece, next) = parse_backquoted(&chars, i, true)?;
                pieces.push(piece);
                i = next;
            }
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }

    if !literal.is_empty() {
        pieces.push(WordPiece::Literal(literal));
    }
    Ok(pieces)
}

/// Parse a `$`-introduced construct at `i`. Returns the piece and the index
/// just past it.
fn parse_dollar(chars: &[char], i: usize, _in_double: bool) -> Result<(WordPiece, usize), ParseError> {
    match chars.get(i + 1) {
        Some(&'(') if chars.get(i + 2) == Some(&'(') => {
            if scan::dollar_dparen_is_command_subst(chars, i) {
                // Command substitution wrapping a subshell: hand the whole
                // span (minus the outer `$(`/`)`) to a fresh parse.
                parse_command_subst(chars, i)
            } else {
                parse_arith_expansion(chars, i)
            }
        }
        Some(&'(') => parse_command_subst(chars, i),
        Some(&'{') => {
            let end = scan::param_brace_end(chars, i + 1).ok_or_else(|| {
                ParseError::new("unexpected EOF while looking for matching `}'", 1, 1)
            })?;
            let inner: String = chars[i + 2..end].iter().collect();
            let expansion = parse_param_interior(&inner)?;
            Ok((WordPiece::Param(expansion), end + 1))
        }
        Some(&c) if c.is_ascii_alphabetic() || c == '_' => {
            let mut j = i + 1;
            let mut name = String::new();
            while let Some(&n) = chars.get(j) {
                if n.is_ascii_alphanumeric() || n == '_' {
                    name.push(n);
                    j += 1;
                } else {
                    break;
                }
            }
            Ok((WordPiece::Param(ParamExpansion::plain(name)), j))
        }
        Some(&c) if matches!(c, '#' | '?' | '$' | '!' | '@' | '*' | '-') || c.is_ascii_digit() => {
            Ok((
                WordPiece::Param(ParamExpansion::plain(c.to_string())),
                i + 2,
            ))
        }
        _ => Ok((WordPiece::Literal("$".to_string()), i + 1)),
    }
}

fn parse_command_subst(chars: &[char], dollar: usize) -> Result<(WordPiece, usize), ParseError> {
    let end = scan::command_subst_end(chars, dollar + 1).ok_or_else(|| {
        ParseError::new("unexpected EOF while looking for matching `)'", 1, 1)
    })?;
    let body: String = chars[dollar + 2..end].iter().collect();
    // A fresh parser instance: no shared state with the enclosing parse,
    // same global ceilings. Failure aborts the outer parse.
    let script = crate::parser::parse(&body)?;
    Ok((
        WordPiece::CommandSub {
            script,
            backquoted: false,
        },
        end + 1,
    ))
}

fn parse_backquoted(
    chars: &[char],
    open: usize,
    in_double: bool,
) -> Result<(WordPiece, usize), ParseError> {
    let end = scan::backquote_end(chars, open).ok_or_else(|| {
        ParseError::new("unexpected EOF while looking for matching ``'", 1, 1)
    })?;
    let raw: String = chars[open + 1..end].iter().collect();
    let body = scan::unescape_backquoted(&raw, in_double);
    let script = crate::parser::parse(&body)?;
    Ok((
        WordPiece::CommandSub {
            script,
            backquoted: true,
        },
        end + 1,
    ))
}

fn parse_arith_expansion(chars: &[char], dollar: usize) -> Result<(WordPiece, usize), ParseError> {
    // Find the `))` closing this expansion, balancing inner parens.
    let mut i = dollar + 3;
    let mut depth = 1usize;
    let mut parens = 0usize;
    let mut end = None;
    while i < chars.len() {
        match chars[i] {
            '(' => {
                if chars.get(i.wrapping_sub(1)) == Some(&'$') && chars.get(i + 1) == Some(&'(') {
                    depth += 1;
                    i += 2;
                    continue;
                }
                parens += 1;
            }
            ')' => {
                if parens > 0 {
                    parens -= 1;
                } else if chars.get(i + 1) == Some(&')') {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(i);
                        break;
                    }
                    i += 2;
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }
    let end = end.ok_or_else(|| {
        ParseError::new("unexpected EOF while looking for matching `)'", 1, 1)
    })?;
    let body: String = chars[dollar + 3..end].iter().collect();
    let expr = crate::parser::arith::parse_arith(&body);
    Ok((WordPiece::Arith(expr), end + 2))
}

/// Decode a `$'...'` ANSI-C span starting just past the opening quote.
/// Returns the decoded text and the index past the closing quote.
fn decode_ansi_c(chars: &[char], start: usize) -> (String, usize) {
    let mut out = String::new();
    let mut i = start;
    while i < chars.len() {
        match chars[i] {
            '\'' => return (out, i + 1),
            '\\' if i + 1 < chars.len() => {
                let (decoded, consumed) = decode_ansi_escape(&chars[i + 1..]);
                out.push_str(&decoded);
                i += 1 + consumed;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    (out, i)
}

fn decode_ansi_escape(rest: &[char]) -> (String, usize) {
    match rest.first() {
        Some(&'n') => ("\n".into(), 1),
        Some(&'t') => ("\t".into(), 1),
        Some(&'r') => ("\r".into(), 1),
        Some(&'a') => ("\x07".into(), 1),
        Some(&'b') => ("\x08".into(), 1),
        Some(&'f') => ("\x0c".into(), 1),
        Some(&'v') => ("\x0b".into(), 1),
        Some(&'e') | Some(&'E') => ("\x1b".into(), 1),
        Some(&'0') => {
            // Up to three octal digits.
            let mut value = 0u32;
            let mut n = 1;
            while n < 4 {
                match rest.get(n) {
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
        Some(&'x') => {
            let mut value = 0u32;
            let mut n = 1;
            while n < 3 {
                match rest.get(n) {
                    Some(&d) if d.is_ascii_hexdigit() => {
                        value = value * 16 + d.to_digit(16).unwrap();
                        n += 1;
                    }
                    _ => break,
                }
            }
            if n == 1 {
                ("\\x".into(), 1)
            } else {
                (char::from_u32(value).unwrap_or('\0').to_string(), n)
            }
        }
        Some(&'\\') => ("\\".into(), 1),
        Some(&'\'') => ("'".into(), 1),
        Some(&'"') => ("\"".into(), 1),
        Some(&c) => (format!("\\{}", c), 1),
        None => ("\\".into(), 0),
    }
}

// ---------------------------------------------------------------------------
// ${...} interior
// ---------------------------------------------------------------------------

/// Parse the text between `${` and `}`.
fn parse_param_interior(inner: &str) -> Result<ParamExpansion, ParseError> {
    let chars: Vec<char> = inner.chars().collect();
    if chars.is_empty() {
        return Ok(ParamExpansion::plain(""));
    }

    // ${#name} — length; bare ${#} is $#.
    if chars[0] == '#' && chars.len() > 1 {
        let name: String = chars[1..].iter().collect();
        return Ok(ParamExpansion {
            name,
            op: Some(ParamOp::Length),
        });
    }

    // ${!name} — indirection.
    if chars[0] == '!' && chars.len() > 1 {
        let name: String = chars[1..].iter().collect();
        if crate::lexer::is_valid_name(&name) {
            return Ok(ParamExpansion {
                name,
                op: Some(ParamOp::Indirect),
            });
        }
    }

    // Parameter name: longest valid name, or one special character.
    let mut i = 0;
    let mut name = String::new();
    if chars[0].is_ascii_alphabetic() || chars[0] == '_' {
        while let Some(&c) = chars.get(i) {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                i += 1;
            } else {
                break;
            }
        }
    } else if chars[0].is_ascii_digit() {
        while let Some(&c) = chars.get(i) {
            if c.is_ascii_digit() {
                name.push(c);
                i += 1;
            } else {
                break;
            }
        }
    } else {
        name.push(chars[0]);
        i = 1;
    }

    if i >= chars.len() {
        return Ok(ParamExpansion::plain(name));
    }

    let rest: String = chars[i..].iter().collect();
    let op = parse_param_op(&rest)?;
    Ok(ParamExpansion { name, op })
}

/// Parse the operator suffix of a `${name...}` expansion.
fn parse_param_op(rest: &str) -> Result<Option<ParamOp>, ParseError> {
    let chars: Vec<char> = rest.chars().collect();
    let word_flags = WordFlags::default();

    let sub_word = |s: &str| parse_word(s, word_flags);

    match chars[0] {
        ':' => match chars.get(1) {
            Some(&'-') => Ok(Some(ParamOp::Default {
                word: sub_word(&rest[2..])?,
                check_empty: true,
            })),
            Some(&'=') => Ok(Some(ParamOp::AssignDefault {
                word: sub_word(&rest[2..])?,
                check_empty: true,
            })),
            Some(&'?') => Ok(Some(ParamOp::ErrorIfUnset {
                word: if rest.len() > 2 {
                    Some(sub_word(&rest[2..])?)
                } else {
                    None
                },
                check_empty: true,
            })),
            Some(&'+') => Ok(Some(ParamOp::Alternative {
                word: sub_word(&rest[2..])?,
                check_empty: true,
            })),
            _ => {
                // ${name:off} / ${name:off:len} — split on the first `:`
                // outside parens and ternary nesting.
                let body = &rest[1..];
                let (off_str, len_str) = split_substring_spec(body);
                let offset = crate::parser::arith::parse_arith(off_str);
                let length = len_str.map(|s| crate::parser::arith::parse_arith(s));
                Ok(Some(ParamOp::Substring { offset, length }))
            }
        },
        '-' => Ok(Some(ParamOp::Default {
            word: sub_word(&rest[1..])?,
            check_empty: false,
        })),
        '=' => Ok(Some(ParamOp::AssignDefault {
            word: sub_word(&rest[1..])?,
            check_empty: false,
        })),
        '?' => Ok(Some(ParamOp::ErrorIfUnset {
            word: if rest.len() > 1 {
                Some(sub_word(&rest[1..])?)
            } else {
                None
            },
            check_empty: false,
        })),
        '+' => Ok(Some(ParamOp::Alternative {
            word: sub_word(&rest[1..])?,
            check_empty: false,
        })),
        '#' => {
            let greedy = chars.get(1) == Some(&'#');
            let pat = if greedy { &rest[2..] } else { &rest[1..] };
            Ok(Some(ParamOp::Remove {
                pattern: sub_word(pat)?,
                end: RemovalEnd::Prefix,
                greedy,
            }))
        }
        '%' => {
            let greedy = chars.get(1) == Some(&'%');
            let pat = if greedy { &rest[2..] } else { &rest[1..] };
            Ok(Some(ParamOp::Remove {
                pattern: sub_word(pat)?,
                end: RemovalEnd::Suffix,
                greedy,
            }))
        }
        '/' => {
            let mut idx = 1;
            let mut all = false;
            let mut anchor_start = false;
            let mut anchor_end = false;
            match chars.get(1) {
                Some(&'/') => {
                    all = true;
                    idx = 2;
                }
                Some(&'#') => {
                    anchor_start = true;
                    idx = 2;
                }
                Some(&'%') => {
                    anchor_end = true;
                    idx = 2;
                }
                _ => {}
            }
            // Pattern runs to the first unescaped `/`.
            let body: Vec<char> = chars[idx..].to_vec();
            let mut split = None;
            let mut j = 0;
            while j < body.len() {
                match body[j] {
                    '\\' => j += 2,
                    '/' => {
                        split = Some(j);
                        break;
                    }
                    _ => j += 1,
                }
            }
            let (pat, rep) = match split {
                Some(s) => {
                    let p: String = body[..s].iter().collect();
                    let r: String = body[s + 1..].iter().collect();
                    (p, Some(r))
                }
                None => (body.iter().collect(), None),
            };
            Ok(Some(ParamOp::Replace {
                pattern: sub_word(&pat)?,
                replacement: match rep {
                    Some(r) => Some(sub_word(&r)?),
                    None => None,
                },
                all,
                anchor_start,
                anchor_end,
            }))
        }
        '^' => {
            let all = chars.get(1) == Some(&'^');
            Ok(Some(ParamOp::CaseMod {
                dir: CaseDir::Upper,
                all,
            }))
        }
        ',' => {
            let all = chars.get(1) == Some(&',');
            Ok(Some(ParamOp::CaseMod {
                dir: CaseDir::Lower,
                all,
            }))
        }
        _ => Ok(None),
    }
}

/// Split a `off[:len]` substring spec at the first top-level `:` that is
/// not part of a ternary (`?:`) and not inside parentheses.
fn split_substring_spec(body: &str) -> (&str, Option<&str>) {
    let mut depth = 0usize;
    let mut ternary = 0usize;
    for (j, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '?' => ternary += 1,
            ':' if depth == 0 => {
                if ternary > 0 {
                    ternary -= 1;
                } else {
                    return (&body[..j], Some(&body[j + 1..]));
                }
            }
            _ => {}
        }
    }
    (body, None)
}

// ---------------------------------------------------------------------------
// Brace expansion
// ---------------------------------------------------------------------------

/// Try to read a brace expansion at `open`. Returns the items and the index
/// past the closing brace, or None when the span is not expandable (no
/// comma or range, unbalanced).
fn try_brace_expansion(
    chars: &[char],
    open: usize,
    flags: WordFlags,
) -> Result<Option<(Vec<BraceItem>, usize)>, ParseError> {
    let mut depth = 1usize;
    let mut i = open + 1;
    let mut in_single = false;
    let mut in_double = false;
    while i < chars.len() {
        let c = chars[i];
        if in_single {
            if c == '\'' {
                in_single = false;
            }
            i += 1;
            continue;
        }
        if in_double {
            if c == '"' {
                in_double = false;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' => in_single = true,
            '"' => in_double = true,
            '\\' => {
                i += 1;
            }
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            _ => {}
        }
        i += 1;
    }
    if depth != 0 {
        return Ok(None);
    }
    let close = i;
    let inner: String = chars[open + 1..close].iter().collect();

    // `{start..end}` / `{start..end..step}` ranges.
    if let Some(item) = parse_brace_range(&inner) {
        return Ok(Some((vec![item], close + 1)));
    }

    // Comma list at depth 0.
    let items = split_brace_list(&inner);
    if items.len() < 2 {
        return Ok(None);
    }
    let mut out = Vec::new();
    for item in items {
        out.push(BraceItem::Word(parse_word(
            &item,
            WordFlags {
                quoted: false,
                single_quoted: false,
                ..flags
            },
        )?));
    }
    Ok(Some((out, close + 1)))
}

fn split_brace_list(inner: &str) -> Vec<String> {
    let chars: Vec<char> = inner.chars().collect();
    let mut items = Vec::new();
    let mut cur = String::new();
    let mut depth = 0usize;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' if i + 1 < chars.len() => {
                cur.push(c);
                cur.push(chars[i + 1]);
                i += 2;
                continue;
            }
            '{' => {
                depth += 1;
                cur.push(c);
            }
            '}' => {
                depth = depth.saturating_sub(1);
                cur.push(c);
            }
            ',' if depth == 0 => {
                items.push(std::mem::take(&mut cur));
                i += 1;
                continue;
            }
            _ => cur.push(c),
        }
        i += 1;
    }
    items.push(cur);
    items
}

fn parse_brace_range(inner: &str) -> Option<BraceItem> {
    let parts: Vec<&str> = inner.split("..").collect();
    if parts.len() != 2 && parts.len() != 3 {
        return None;
    }
    let step = if parts.len() == 3 {
        parts[2].parse::<i64>().ok()?
    } else {
        1
    };

    if let (Ok(start), Ok(end)) = (parts[0].parse::<i64>(), parts[1].parse::<i64>()) {
        let width = if (parts[0].starts_with('0') && parts[0].len() > 1)
            || (parts[1].starts_with('0') && parts[1].len() > 1)
        {
            parts[0].len().max(parts[1].len())
        } else {
            0
        };
        return Some(BraceItem::NumRange {
            start,
            end,
            step,
            width,
        });
    }

    let sc: Vec<char> = parts[0].chars().collect();
    let ec: Vec<char> = parts[1].chars().collect();
    if sc.len() == 1 && ec.len() == 1 && sc[0].is_ascii_alphabetic() && ec[0].is_ascii_alphabetic() {
        return Some(BraceItem::CharRange {
            start: sc[0],
            end: ec[0],
            step,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(raw: &str) -> Word {
        parse_word(raw, WordFlags::default()).unwrap()
    }

    #[test]
    fn plain_literal() {
        let w = word("hello");
        assert_eq!(w.pieces, vec![WordPiece::Literal("hello".into())]);
    }

    #[test]
    fn single_quoted_flag() {
        let w = parse_word(
            "raw $x",
            WordFlags {
                quoted: true,
                single_quoted: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(w.pieces, vec![WordPiece::SingleQuoted("raw $x".into())]);
    }

    #[test]
    fn embedded_quotes() {
        let w = word("a'b c'd");
        assert_eq!(
            w.pieces,
            vec![
                WordPiece::Literal("a".into()),
                WordPiece::SingleQuoted("b c".into()),
                WordPiece::Literal("d".into()),
            ]
        );
    }

    #[test]
    fn simple_parameter() {
        let w = word("$HOME");
        assert_eq!(
            w.pieces,
            vec![WordPiece::Param(ParamExpansion::plain("HOME"))]
        );
    }

    #[test]
    fn special_parameters() {
        for (text, name) in [("$?", "?"), ("$#", "#"), ("$1", "1"), ("$@", "@")] {
            let w = word(text);
            assert_eq!(
                w.pieces,
                vec![WordPiece::Param(ParamExpansion::plain(name))],
                "{}",
                text
            );
        }
    }

    #[test]
    fn braced_parameter_default() {
        let w = word("${name:-fallback}");
        match &w.pieces[0] {
            WordPiece::Param(p) => {
                assert_eq!(p.name, "name");
                match &p.op {
                    Some(ParamOp::Default { word, check_empty }) => {
                        assert!(*check_empty);
                        assert_eq!(word.pieces, vec![WordPiece::Literal("fallback".into())]);
                    }
                    other => panic!("unexpected op: {:?}", other),
                }
            }
            other => panic!("unexpected piece: {:?}", other),
        }
    }

    #[test]
    fn length_and_removal_ops() {
        match &word("${#path}").pieces[0] {
            WordPiece::Param(p) => assert_eq!(p.op, Some(ParamOp::Length)),
            other => panic!("{:?}", other),
        }
        match &word("${path##*/}").pieces[0] {
            WordPiece::Param(p) => match &p.op {
                Some(ParamOp::Remove { end, greedy, .. }) => {
                    assert_eq!(*end, RemovalEnd::Prefix);
                    assert!(greedy);
                }
                other => panic!("{:?}", other),
            },
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn replacement_op() {
        match &word("${v/a/b}").pieces[0] {
            WordPiece::Param(p) => match &p.op {
                Some(ParamOp::Replace {
                    all, anchor_start, ..
                }) => {
                    assert!(!all);
                    assert!(!anchor_start);
                }
                other => panic!("{:?}", other),
            },
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn command_substitution_parses_body() {
        let w = word("$(echo hi)");
        match &w.pieces[0] {
            WordPiece::CommandSub { script, backquoted } => {
                assert!(!backquoted);
                assert_eq!(script.statements.len(), 1);
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn backquoted_substitution() {
        let w = word("`echo hi`");
        match &w.pieces[0] {
            WordPiece::CommandSub { backquoted, .. } => assert!(backquoted),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn nested_substitution_parse_error_propagates() {
        assert!(parse_word("$(if then)", WordFlags::default()).is_err());
    }

    #[test]
    fn arithmetic_expansion() {
        let w = word("$((1+2*3))");
        assert!(matches!(&w.pieces[0], WordPiece::Arith(_)));
    }

    #[test]
    fn dollar_dparen_subshell_is_command_sub() {
        let w = word("$((echo a) 2>/dev/null)");
        assert!(matches!(&w.pieces[0], WordPiece::CommandSub { .. }));
    }

    #[test]
    fn glob_detection() {
        let w = word("*.txt");
        assert_eq!(w.pieces, vec![WordPiece::Glob("*.txt".into())]);
        let w = word("plain");
        assert_eq!(w.pieces, vec![WordPiece::Literal("plain".into())]);
    }

    #[test]
    fn quoted_glob_stays_literal() {
        let w = word("'*.txt'");
        assert_eq!(w.pieces, vec![WordPiece::SingleQuoted("*.txt".into())]);
    }

    #[test]
    fn regex_mode_keeps_escapes() {
        let w = parse_word(
            r"a\.b",
            WordFlags {
                regex: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(
            w.pieces,
            vec![
                WordPiece::Literal("a".into()),
                WordPiece::Escaped(".".into()),
                WordPiece::Literal("b".into()),
            ]
        );
    }

    #[test]
    fn heredoc_mode_quotes_are_literal() {
        let w = parse_word(
            "say 'hi' $name",
            WordFlags {
                heredoc: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(
            w.pieces,
            vec![
                WordPiece::Literal("say 'hi' ".into()),
                WordPiece::Param(ParamExpansion::plain("name")),
            ]
        );
    }

    #[test]
    fn ansi_c_quoting() {
        let w = word(r"$'a\tb\n'");
        assert_eq!(w.pieces, vec![WordPiece::SingleQuoted("a\tb\n".into())]);
    }

    #[test]
    fn brace_list() {
        let w = word("{a,b,c}");
        match &w.pieces[0] {
            WordPiece::Brace(items) => assert_eq!(items.len(), 3),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn brace_numeric_range() {
        let w = word("{1..5}");
        assert_eq!(
            w.pieces,
            vec![WordPiece::Brace(vec![BraceItem::NumRange {
                start: 1,
                end: 5,
                step: 1,
                width: 0
            }])]
        );
    }

    #[test]
    fn no_brace_flag_keeps_literal() {
        let w = parse_word(
            "{a,b}",
            WordFlags {
                no_brace: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(w.pieces, vec![WordPiece::Literal("{a,b}".into())]);
    }

    #[test]
    fn tilde_at_start() {
        let w = word("~/src");
        assert_eq!(
            w.pieces,
            vec![
                WordPiece::Tilde(None),
                WordPiece::Literal("/src".into()),
            ]
        );
    }

    #[test]
    fn double_quoted_interior_expansions() {
        let w = parse_word("x=$HOME y", WordFlags { quoted: true, ..Default::default() }).unwrap();
        match &w.pieces[0] {
            WordPiece::DoubleQuoted(parts) => {
                assert_eq!(parts.len(), 3);
                assert!(matches!(parts[1], WordPiece::Param(_)));
            }
            other => panic!("{:?}", other),
        }
    }
}
