//! Alias expansion.
//!
//! Rewrites a resolved `SimpleCommand` by textual alias substitution:
//! the original node is never mutated, a fresh node (or a nested command
//! line for complex aliases) comes back instead.
//!
//! Rules:
//! 1. Only a command name that is a single unquoted literal word expands.
//! 2. The alias text is re-parsed as a command line and merged with the
//!    original node's assignment prefixes and redirections.
//! 3. An alias value ending in a space makes the next original argument an
//!    expansion candidate too, one level, through the same mechanism.
//! 4. An alias expanding to multiple pipelines or a compound command is
//!    not inlined: the invocation is re-escaped into one command line to
//!    be run as a nested script.
//!
//! Cycle protection uses a caller-owned in-progress set. A name is
//! released on *every* exit path out of the expansion (success, parse
//! failure, complex-alias bailout), so no expansion-suppression state
//! leaks across statements.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::ast::{Command, SimpleCommand, Word, WordPiece};

#[derive(Debug, Clone)]
pub enum AliasOutcome {
    /// No alias applies; use the original node.
    Unchanged,
    /// Expansion produced a new simple command.
    Rewritten(SimpleCommand),
    /// The alias text is a pipeline/compound: run this command line as a
    /// nested script instead.
    Nested(String),
    /// The alias text failed to parse.
    ParseFailed(String),
}

pub fn expand_alias(
    aliases: &IndexMap<String, String>,
    node: &SimpleCommand,
    in_progress: &mut HashSet<String>,
) -> AliasOutcome {
    let name = match node.name.as_ref().and_then(Word::as_literal) {
        Some(n) => n.to_string(),
        None => return AliasOutcome::Unchanged,
    };

    let alias_text = match aliases.get(&name) {
        Some(v) => v.clone(),
        None => return AliasOutcome::Unchanged,
    };

    if in_progress.contains(&name) {
        return AliasOutcome::Unchanged;
    }

    // Single release point: the name leaves the in-progress set however
    // expansion exits.
    in_progress.insert(name.clone());
    let outcome = expand_with_text(aliases, node, &name, &alias_text, in_progress);
    in_progress.remove(&name);
    outcome
}

fn expand_with_text(
    aliases: &IndexMap<String, String>,
    node: &SimpleCommand,
    _name: &str,
    alias_text: &str,
    in_progress: &mut HashSet<String>,
) -> AliasOutcome {
    let expand_next = alias_text.ends_with(' ');

    let parsed = match crate::parser::parse(alias_text) {
        Ok(script) => script,
        Err(e) => return AliasOutcome::ParseFailed(e.to_string()),
    };

    // Anything but exactly one simple command cannot be inlined; rebuild
    // the full command line for a nested run.
    let single = single_simple_command(&parsed);
    let simple = match single {
        Some(simple) => simple,
        None => {
            let mut line = alias_text.trim_end().to_string();
            for arg in &node.args {
                line.push(' ');
                line.push_str(&word_to_shell_text(arg));
            }
            return AliasOutcome::Nested(line);
        }
    };

    let mut rewritten = SimpleCommand {
        name: simple.name.clone(),
        args: simple.args.clone(),
        // Assignment prefixes from the original invocation stay in front.
        assignments: {
            let mut a = node.assignments.clone();
            a.extend(simple.assignments.clone());
            a
        },
        redirections: {
            let mut r = simple.redirections.clone();
            r.extend(node.redirections.clone());
            r
        },
        line: node.line,
    };

    let mut remaining_args = node.args.clone();

    if expand_next && !remaining_args.is_empty() {
        // The next word is itself an alias candidate, expanded through the
        // same mechanism against the same in-progress set.
        let candidate = SimpleCommand {
            assignments: Vec::new(),
            name: Some(remaining_args[0].clone()),
            args: remaining_args[1..].to_vec(),
            redirections: Vec::new(),
            line: node.line,
        };
        match expand_alias(aliases, &candidate, in_progress) {
            AliasOutcome::Rewritten(inner) => {
                if let Some(inner_name) = inner.name {
                    rewritten.args.push(inner_name);
                }
                rewritten.args.extend(inner.args);
                remaining_args = Vec::new();
            }
            AliasOutcome::Nested(line) => return AliasOutcome::Nested(line),
            AliasOutcome::ParseFailed(e) => return AliasOutcome::ParseFailed(e),
            AliasOutcome::Unchanged => {}
        }
    }

    rewritten.args.extend(remaining_args);
    AliasOutcome::Rewritten(rewritten)
}

fn single_simple_command(script: &crate::ast::Script) -> Option<&SimpleCommand> {
    if script.statements.len() != 1 {
        return None;
    }
    let stmt = &script.statements[0];
    if stmt.pipelines.len() != 1 || stmt.pipelines[0].commands.len() != 1 {
        return None;
    }
    match &stmt.pipelines[0].commands[0] {
        Command::Simple(simple) => Some(simple),
        _ => None,
    }
}

/// Re-escape a parsed word back into shell text, for the nested-script
/// path.
pub fn word_to_shell_text(word: &Word) -> String {
    let mut out = String::new();
    for piece in &word.pieces {
        match piece {
            WordPiece::Literal(s) | WordPiece::Glob(s) => {
                for c in s.chars() {
                    if matches!(
                        c,
                        ' ' | '\t'
                            | '"'
                            | '\''
                            | '$'
                            | '`'
                            | '\\'
                            | '*'
                            | '?'
                            | '['
                            | ']'
                            | '{'
                            | '}'
                            | '('
                            | ')'
                            | '<'
                            | '>'
                            | '|'
                            | '&'
                            | ';'
                            | '#'
                            | '!'
                            | '\n'
                    ) {
                        out.push('\\');
                    }
                    out.push(c);
                }
            }
            WordPiece::SingleQuoted(s) => {
                out.push('\'');
                out.push_str(s);
                out.push('\'');
            }
            WordPiece::DoubleQuoted(parts) => {
                out.push('"');
                for part in parts {
                    if let WordPiece::Literal(s) = part {
                        out.push_str(s);
                    } else if let WordPiece::Param(p) = part {
                        out.push_str("${");
                        out.push_str(&p.name);
                        out.push('}');
                    }
                }
                out.push('"');
            }
            WordPiece::Escaped(c) => {
                out.push('\\');
                out.push_str(c);
            }
            WordPiece::Param(p) => {
                out.push_str("${");
                out.push_str(&p.name);
                out.push('}');
            }
            WordPiece::Tilde(user) => {
                out.push('~');
                if let Some(u) = user {
                    out.push_str(u);
                }
            }
            // Substitution bodies cannot round-trip exactly; a placeholder
            // keeps the argument count stable.
            WordPiece::CommandSub { .. } => out.push_str("\"$(:)\""),
            WordPiece::Arith(_) => out.push_str("$((0))"),
            WordPiece::Brace(_) => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn invocation(name: &str, args: &[&str]) -> SimpleCommand {
        SimpleCommand {
            assignments: Vec::new(),
            name: Some(Word::literal(name)),
            args: args.iter().map(|a| Word::literal(*a)).collect(),
            redirections: Vec::new(),
            line: None,
        }
    }

    #[test]
    fn no_alias_unchanged() {
        let table = aliases(&[]);
        let node = invocation("ls", &[]);
        let mut set = HashSet::new();
        assert!(matches!(
            expand_alias(&table, &node, &mut set),
            AliasOutcome::Unchanged
        ));
    }

    #[test]
    fn simple_expansion_keeps_args() {
        let table = aliases(&[("ll", "ls -la")]);
        let node = invocation("ll", &["/tmp"]);
        let mut set = HashSet::new();
        match expand_alias(&table, &node, &mut set) {
            AliasOutcome::Rewritten(cmd) => {
                assert_eq!(cmd.name.as_ref().unwrap().as_literal(), Some("ls"));
                let args: Vec<_> = cmd
                    .args
                    .iter()
                    .filter_map(|w| w.as_literal())
                    .collect();
                assert_eq!(args, vec!["-la", "/tmp"]);
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn quoted_name_does_not_expand() {
        let table = aliases(&[("ll", "ls -la")]);
        let node = SimpleCommand {
            name: Some(Word {
                pieces: vec![WordPiece::SingleQuoted("ll".into())],
            }),
            ..SimpleCommand::default()
        };
        let mut set = HashSet::new();
        assert!(matches!(
            expand_alias(&table, &node, &mut set),
            AliasOutcome::Unchanged
        ));
    }

    #[test]
    fn trailing_space_expands_next_word() {
        let table = aliases(&[("sudo", "run-elevated "), ("ll", "ls -la")]);
        let node = invocation("sudo", &["ll", "/etc"]);
        let mut set = HashSet::new();
        match expand_alias(&table, &node, &mut set) {
            AliasOutcome::Rewritten(cmd) => {
                assert_eq!(
                    cmd.name.as_ref().unwrap().as_literal(),
                    Some("run-elevated")
                );
                let args: Vec<_> = cmd
                    .args
                    .iter()
                    .filter_map(|w| w.as_literal())
                    .collect();
                assert_eq!(args, vec!["ls", "-la", "/etc"]);
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn cycle_protection_stops_self_reference() {
        let table = aliases(&[("ls", "ls -F")]);
        let node = invocation("ls", &["dir"]);
        let mut set = HashSet::new();
        match expand_alias(&table, &node, &mut set) {
            AliasOutcome::Rewritten(cmd) => {
                assert_eq!(cmd.name.as_ref().unwrap().as_literal(), Some("ls"));
                let args: Vec<_> = cmd
                    .args
                    .iter()
                    .filter_map(|w| w.as_literal())
                    .collect();
                assert_eq!(args, vec!["-F", "dir"]);
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn in_progress_name_released_after_pass() {
        let table = aliases(&[("ll", "ls -la")]);
        let node = invocation("ll", &[]);
        let mut set = HashSet::new();
        let _ = expand_alias(&table, &node, &mut set);
        assert!(set.is_empty());

        // Failure paths release too.
        let broken = aliases(&[("bad", "if then")]);
        let node = invocation("bad", &[]);
        let _ = expand_alias(&broken, &node, &mut set);
        assert!(set.is_empty());
    }

    #[test]
    fn complex_alias_becomes_nested_line() {
        let table = aliases(&[("lc", "ls | wc -l")]);
        let node = invocation("lc", &["/tmp"]);
        let mut set = HashSet::new();
        match expand_alias(&table, &node, &mut set) {
            AliasOutcome::Nested(line) => {
                assert!(line.starts_with("ls | wc -l"));
                assert!(line.ends_with("/tmp"));
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn assignments_and_redirections_preserved() {
        let table = aliases(&[("ll", "ls -la")]);
        let mut node = invocation("ll", &[]);
        node.assignments.push(crate::ast::Assignment {
            name: "FOO".into(),
            value: Some(Word::literal("bar")),
            append: false,
        });
        let mut set = HashSet::new();
        match expand_alias(&table, &node, &mut set) {
            AliasOutcome::Rewritten(cmd) => {
                assert_eq!(cmd.assignments.len(), 1);
                assert_eq!(cmd.assignments[0].name, "FOO");
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn word_escaping_round_trip() {
        assert_eq!(word_to_shell_text(&Word::literal("plain")), "plain");
        assert_eq!(word_to_shell_text(&Word::literal("a b")), "a\\ b");
        let quoted = Word {
            pieces: vec![WordPiece::SingleQuoted("x y".into())],
        };
        assert_eq!(word_to_shell_text(&quoted), "'x y'");
    }
}
