//! Tokenizer for shell script text.
//!
//! Converts raw script text into a token stream, tracking quote and
//! operator context. Heredoc bodies are not collected where the operator
//! appears: the operator registers a pending heredoc, and the body is read
//! verbatim only after the newline that terminates the owning statement,
//! then emitted as a `HereDocBody` token.
//!
//! The `((` / `( (` ambiguity is resolved here, once, via the bounded
//! lookahead scanners in [`crate::word::scan`].

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::error::LexError;
use crate::word::scan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Eof,
    Newline,
    Comment,

    // Separators and list operators
    Semi,
    Amp,
    Pipe,
    PipeBoth, // |&
    AndIf,    // &&
    OrIf,     // ||
    Bang,     // !
    DSemi,    // ;;
    SemiAnd,  // ;&
    DSemiAnd, // ;;&

    // Redirection operators
    Less,      // <
    Great,     // >
    DGreat,    // >>
    DLess,     // <<
    DLessDash, // <<-
    TLess,     // <<<
    LessAnd,   // <&
    GreatAnd,  // >&
    LessGreat, // <>
    Clobber,   // >|
    AndGreat,  // &>
    AndDGreat, // &>>

    // Grouping
    LParen,
    RParen,
    LBrace,
    RBrace,
    DLParen,   // ((
    DRParen,   // ))
    DLBracket, // [[
    DRBracket, // ]]

    // Reserved words
    If,
    Then,
    Else,
    Elif,
    Fi,
    For,
    While,
    Until,
    Do,
    Done,
    Case,
    Esac,
    In,
    Function,
    Select,
    Time,
    Coproc,

    // Word classes
    Word,
    Name,
    Number,
    AssignmentWord,

    // Captured heredoc body
    HereDocBody,
}

impl TokenKind {
    pub fn is_reserved(self) -> bool {
        matches!(
            self,
            Self::If
                | Self::Then
                | Self::Else
                | Self::Elif
                | Self::Fi
                | Self::For
                | Self::While
                | Self::Until
                | Self::Do
                | Self::Done
                | Self::Case
                | Self::Esac
                | Self::In
                | Self::Function
                | Self::Select
                | Self::Time
                | Self::Coproc
        )
    }

    pub fn is_redirection(self) -> bool {
        matches!(
            self,
            Self::Less
                | Self::Great
                | Self::DGreat
                | Self::DLess
                | Self::DLessDash
                | Self::TLess
                | Self::LessAnd
                | Self::GreatAnd
                | Self::LessGreat
                | Self::Clobber
                | Self::AndGreat
                | Self::AndDGreat
        )
    }
}

/// One token. `start`/`end` are character offsets into the source text;
/// `quoted`/`single_quoted` record whether the token was one fully quoted
/// span (its `text` then holds the unquoted interior).
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
    pub quoted: bool,
    pub single_quoted: bool,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, start: usize, end: usize, line: usize, column: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            start,
            end,
            line,
            column,
            quoted: false,
            single_quoted: false,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingHeredoc {
    delimiter: String,
    strip_tabs: bool,
    quoted: bool,
}

lazy_static! {
    static ref RESERVED: HashMap<&'static str, TokenKind> = {
        let mut m = HashMap::new();
        m.insert("if", TokenKind::If);
        m.insert("then", TokenKind::Then);
        m.insert("else", TokenKind::Else);
        m.insert("elif", TokenKind::Elif);
        m.insert("fi", TokenKind::Fi);
        m.insert("for", TokenKind::For);
        m.insert("while", TokenKind::While);
        m.insert("until", TokenKind::Until);
        m.insert("do", TokenKind::Do);
        m.insert("done", TokenKind::Done);
        m.insert("case", TokenKind::Case);
        m.insert("esac", TokenKind::Esac);
        m.insert("in", TokenKind::In);
        m.insert("function", TokenKind::Function);
        m.insert("select", TokenKind::Select);
        m.insert("time", TokenKind::Time);
        m.insert("coproc", TokenKind::Coproc);
        m
    };
}

/// Two- and three-character operators, longest first.
const MULTI_CHAR_OPS: &[(&str, TokenKind)] = &[
    (";;&", TokenKind::DSemiAnd),
    ("<<<", TokenKind::TLess),
    ("&>>", TokenKind::AndDGreat),
    ("<<-", TokenKind::DLessDash),
    ("<<", TokenKind::DLess),
    ("[[", TokenKind::DLBracket),
    ("]]", TokenKind::DRBracket),
    ("&&", TokenKind::AndIf),
    ("||", TokenKind::OrIf),
    (";;", TokenKind::DSemi),
    (";&", TokenKind::SemiAnd),
    ("|&", TokenKind::PipeBoth),
    (">>", TokenKind::DGreat),
    ("<&", TokenKind::LessAnd),
    (">&", TokenKind::GreatAnd),
    ("<>", TokenKind::LessGreat),
    (">|", TokenKind::Clobber),
    ("&>", TokenKind::AndGreat),
];

/// Characters that terminate an unquoted word.
pub fn is_word_boundary(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | ';' | '&' | '|' | '(' | ')' | '<' | '>')
}

/// Valid variable/function name: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_name(s: &str) -> bool {
    let mut it = s.chars();
    match it.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            it.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Position of the `=` of an assignment word, when the text left of it is a
/// valid name (with optional trailing `+` for `+=`).
fn assignment_eq_index(s: &str) -> Option<usize> {
    let bytes: Vec<char> = s.chars().collect();
    for (i, &c) in bytes.iter().enumerate() {
        if c == '=' {
            if i == 0 {
                return None;
            }
            let lhs: String = bytes[..i].iter().collect();
            let name = lhs.strip_suffix('+').unwrap_or(&lhs);
            return if is_valid_name(name) { Some(i) } else { None };
        }
        if !(c.is_ascii_alphanumeric() || c == '_' || c == '+') {
            return None;
        }
    }
    None
}

pub struct Lexer {
    src: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
    pending_heredocs: Vec<PendingHeredoc>,
    /// Nesting depth inside `(( ))`; affects `(`, `)`, `;;`, and `#`.
    arith_depth: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            src: input.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            tokens: Vec::new(),
            pending_heredocs: Vec::new(),
            arith_depth: 0,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        while self.pos < self.src.len() {
            if !self.pending_heredocs.is_empty()
                && self.tokens.last().map(|t| t.kind) == Some(TokenKind::Newline)
            {
                self.collect_heredoc_bodies();
                continue;
            }

            self.skip_blank();
            if self.pos >= self.src.len() {
                break;
            }

            let token = self.next_token()?;
            self.tokens.push(token);
        }

        self.tokens.push(Token::new(
            TokenKind::Eof,
            "",
            self.pos,
            self.pos,
            self.line,
            self.column,
        ));
        Ok(self.tokens)
    }

    fn cur(&self) -> Option<char> {
        self.src.get(self.pos).copied()
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.cur()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn bump_n(&mut self, n: usize) {
        for _ in 0..n {
            self.bump();
        }
    }

    fn skip_blank(&mut self) {
        while let Some(c) = self.cur() {
            match c {
                ' ' | '\t' => {
                    self.bump();
                }
                // Line continuation.
                '\\' if self.peek(1) == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                _ => break,
            }
        }
    }

    fn op_token(&mut self, kind: TokenKind, text: &str, start: usize, line: usize, column: usize) -> Token {
        self.bump_n(text.chars().count());
        Token::new(kind, text, start, self.pos, line, column)
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        let line = self.line;
        let column = self.column;

        let c0 = self.cur().expect("next_token called at EOF");
        let c1 = self.peek(1);

        // Comments; inside (( )) a `#` belongs to base#digits notation.
        if c0 == '#' && self.arith_depth == 0 {
            while let Some(c) = self.cur() {
                if c == '\n' {
                    break;
                }
                self.bump();
            }
            let text: String = self.src[start..self.pos].iter().collect();
            return Ok(Token::new(TokenKind::Comment, text, start, self.pos, line, column));
        }

        if c0 == '\n' {
            self.bump();
            return Ok(Token::new(TokenKind::Newline, "\n", start, self.pos, line, column));
        }

        // Heredoc operators register a pending body before returning.
        if c0 == '<' && c1 == Some('<') && self.peek(2) == Some('-') {
            let tok = self.op_token(TokenKind::DLessDash, "<<-", start, line, column);
            self.register_pending_heredoc(true);
            return Ok(tok);
        }
        if c0 == '<' && c1 == Some('<') && self.peek(2) != Some('<') {
            let tok = self.op_token(TokenKind::DLess, "<<", start, line, column);
            self.register_pending_heredoc(false);
            return Ok(tok);
        }

        // `((` and `))` carry their own context tracking.
        if c0 == '(' && c1 == Some('(') {
            if self.arith_depth > 0 {
                self.arith_depth += 1;
                return Ok(self.op_token(TokenKind::LParen, "(", start, line, column));
            }
            // Two subshells, or one arithmetic command? Decide once.
            if scan::looks_like_nested_subshells(&self.src, self.pos + 2)
                || scan::dparen_closes_with_spaced_parens(&self.src, self.pos)
            {
                return Ok(self.op_token(TokenKind::LParen, "(", start, line, column));
            }
            self.arith_depth = 1;
            return Ok(self.op_token(TokenKind::DLParen, "((", start, line, column));
        }
        if c0 == ')' && c1 == Some(')') && self.arith_depth == 1 {
            self.arith_depth = 0;
            return Ok(self.op_token(TokenKind::DRParen, "))", start, line, column));
        }
        if c0 == '(' && self.arith_depth > 0 {
            self.arith_depth += 1;
            return Ok(self.op_token(TokenKind::LParen, "(", start, line, column));
        }
        if c0 == ')' && self.arith_depth > 1 {
            self.arith_depth -= 1;
            return Ok(self.op_token(TokenKind::RParen, ")", start, line, column));
        }

        // Multi-character operators.
        for (text, kind) in MULTI_CHAR_OPS {
            let mut matches = true;
            for (i, ec) in text.chars().enumerate() {
                if self.peek(i) != Some(ec) {
                    matches = false;
                    break;
                }
            }
            if !matches {
                continue;
            }
            // `;;`-family tokens do not exist inside (( )).
            if self.arith_depth > 0 && text.starts_with(';') {
                continue;
            }
            // `[[` / `]]` only at a word boundary.
            if matches!(kind, TokenKind::DLBracket | TokenKind::DRBracket) {
                if let Some(after) = self.peek(text.len()) {
                    if !is_word_boundary(after) {
                        break;
                    }
                }
            }
            return Ok(self.op_token(*kind, text, start, line, column));
        }

        // Single-character operators.
        let single = match c0 {
            '|' => Some(TokenKind::Pipe),
            '&' => Some(TokenKind::Amp),
            ';' => Some(TokenKind::Semi),
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            '<' => Some(TokenKind::Less),
            '>' => Some(TokenKind::Great),
            _ => None,
        };
        if let Some(kind) = single {
            return Ok(self.op_token(kind, &c0.to_string(), start, line, column));
        }

        if c0 == '{' {
            // `{` opens a group only when standing alone before whitespace;
            // otherwise it is word content (brace expansion, `{}`).
            match c1 {
                Some(' ') | Some('\t') | Some('\n') | None => {
                    return Ok(self.op_token(TokenKind::LBrace, "{", start, line, column));
                }
                _ => return self.read_word(start, line, column),
            }
        }
        if c0 == '}' {
            let next_is_word = c1.map(|c| !is_word_boundary(c)).unwrap_or(false);
            if next_is_word {
                return self.read_word(start, line, column);
            }
            return Ok(self.op_token(TokenKind::RBrace, "}", start, line, column));
        }

        if c0 == '!' {
            if c1 == Some('=') {
                return Ok(self.op_token(TokenKind::Word, "!=", start, line, column));
            }
            return Ok(self.op_token(TokenKind::Bang, "!", start, line, column));
        }

        self.read_word(start, line, column)
    }

    /// Read a word token, consuming quoted spans, escapes, and whole
    /// substitution constructs so their internal operators never reach the
    /// token level.
    fn read_word(&mut self, start: usize, line: usize, column: usize) -> Result<Token, LexError> {
        let mut in_single = false;
        let mut in_double = false;
        let mut bracket_depth = 0usize;

        while let Some(c) = self.cur() {
            if !in_single && !in_double {
                // Array-style subscript after a valid name stays in the word
                // (test expressions like `a[0]` and `[` command arguments).
                if c == '[' && bracket_depth > 0 {
                    bracket_depth += 1;
                    self.bump();
                    continue;
                }
                if c == ']' && bracket_depth > 0 {
                    bracket_depth -= 1;
                    self.bump();
                    continue;
                }
                if bracket_depth > 0 {
                    if c == '\n' {
                        break;
                    }
                    self.bump();
                    continue;
                }
                if c == '[' {
                    let so_far: String = self.src[start..self.pos].iter().collect();
                    if is_valid_name(&so_far) {
                        bracket_depth = 1;
                        self.bump();
                        continue;
                    }
                }
                if is_word_boundary(c) {
                    break;
                }
            }

            // ANSI-C quoting $'...' — consumed verbatim, decoded later.
            if c == '$' && self.peek(1) == Some('\'') && !in_single && !in_double {
                self.bump();
                self.bump();
                loop {
                    match self.cur() {
                        None => {
                            return Err(LexError::new(
                                "unexpected EOF while looking for matching `''",
                                line,
                                column,
                            ))
                        }
                        Some('\'') => {
                            self.bump();
                            break;
                        }
                        Some('\\') => {
                            self.bump();
                            self.bump();
                        }
                        Some(_) => {
                            self.bump();
                        }
                    }
                }
                continue;
            }

            // Substitution constructs consumed atomically.
            if c == '$' && !in_single {
                match self.peek(1) {
                    Some('(') => {
                        let end = if self.peek(2) == Some('(')
                            && !scan::dollar_dparen_is_command_subst(&self.src, self.pos)
                        {
                            // $((...)): find the )) closing the expansion.
                            self.arith_expansion_end()
                        } else {
                            scan::command_subst_end(&self.src, self.pos + 1)
                        };
                        match end {
                            Some(end) => {
                                while self.pos <= end {
                                    self.bump();
                                }
                                continue;
                            }
                            None => {
                                return Err(LexError::new(
                                    "unexpected EOF while looking for matching `)'",
                                    line,
                                    column,
                                ))
                            }
                        }
                    }
                    Some('{') => match scan::param_brace_end(&self.src, self.pos + 1) {
                        Some(end) => {
                            while self.pos <= end {
                                self.bump();
                            }
                            continue;
                        }
                        None => {
                            return Err(LexError::new(
                                "unexpected EOF while looking for matching `}'",
                                line,
                                column,
                            ))
                        }
                    },
                    _ => {}
                }
            }

            if c == '`' && !in_single {
                match scan::backquote_end(&self.src, self.pos) {
                    Some(end) => {
                        while self.pos <= end {
                            self.bump();
                        }
                        continue;
                    }
                    None => {
                        return Err(LexError::new(
                            "unexpected EOF while looking for matching ``'",
                            line,
                            column,
                        ))
                    }
                }
            }

            match c {
                '\'' if !in_double => {
                    in_single = !in_single;
                    self.bump();
                }
                '"' if !in_single => {
                    in_double = !in_double;
                    self.bump();
                }
                '\\' if !in_single => {
                    // Keep the pair; escape semantics resolve in the word
                    // parser. Continuation disappears entirely.
                    if self.peek(1) == Some('\n') {
                        self.bump();
                        self.bump();
                        // Splice: remove the pair from the recorded span by
                        // leaving it in place — the word parser drops it too.
                        continue;
                    }
                    self.bump();
                    if self.cur().is_some() {
                        self.bump();
                    }
                }
                _ => {
                    self.bump();
                }
            }
        }

        if in_single || in_double {
            let q = if in_single { "'" } else { "\"" };
            return Err(LexError::new(
                format!("unexpected EOF while looking for matching `{}'", q),
                line,
                column,
            ));
        }

        let raw: String = self.src[start..self.pos].iter().collect();
        self.classify_word(raw, start, line, column)
    }

    /// Index of the second `)` of the `))` closing a `$((...))` expansion
    /// starting at `self.pos` (the `$`).
    fn arith_expansion_end(&self) -> Option<usize> {
        let chars = &self.src;
        let mut i = self.pos + 3;
        let mut depth = 1usize; // (( pairs
        let mut parens = 0usize;
        while i < chars.len() {
            match chars[i] {
                '(' => {
                    if chars.get(i + 1) == Some(&'(') && chars.get(i.wrapping_sub(1)) == Some(&'$') {
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
                            return Some(i + 1);
                        }
                        i += 2;
                        continue;
                    }
                }
                _ => {}
            }
            i += 1;
        }
        None
    }

    /// Attach the final token kind and quote flags to a raw word.
    fn classify_word(&self, mut raw: String, start: usize, line: usize, column: usize) -> Result<Token, LexError> {
        let mut quoted = false;
        let mut single_quoted = false;

        // A word that is exactly one quoted span is stripped here so the
        // parser sees the interior with the quote flags set.
        let cs: Vec<char> = raw.chars().collect();
        if cs.len() >= 2 {
            if cs[0] == '\'' && cs[cs.len() - 1] == '\'' {
                let inner: String = cs[1..cs.len() - 1].iter().collect();
                if !inner.contains('\'') {
                    raw = inner;
                    quoted = true;
                    single_quoted = true;
                }
            } else if cs[0] == '"' && cs[cs.len() - 1] == '"' {
                let inner: String = cs[1..cs.len() - 1].iter().collect();
                let mut unescaped_quote = false;
                let ics: Vec<char> = inner.chars().collect();
                let mut i = 0;
                while i < ics.len() {
                    match ics[i] {
                        '\\' => i += 2,
                        '"' => {
                            unescaped_quote = true;
                            break;
                        }
                        _ => i += 1,
                    }
                }
                if !unescaped_quote {
                    raw = inner;
                    quoted = true;
                }
            }
        }

        if !quoted {
            if let Some(&kind) = RESERVED.get(raw.as_str()) {
                return Ok(Token::new(kind, raw, start, self.pos, line, column));
            }
            if let Some(eq) = assignment_eq_index(&raw) {
                if eq > 0 {
                    return Ok(Token::new(
                        TokenKind::AssignmentWord,
                        raw,
                        start,
                        self.pos,
                        line,
                        column,
                    ));
                }
            }
        }

        if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) && !quoted {
            return Ok(Token::new(TokenKind::Number, raw, start, self.pos, line, column));
        }

        let kind = if !quoted && is_valid_name(&raw) {
            TokenKind::Name
        } else {
            TokenKind::Word
        };
        let mut tok = Token::new(kind, raw, start, self.pos, line, column);
        tok.quoted = quoted;
        tok.single_quoted = single_quoted;
        Ok(tok)
    }

    /// After `<<`/`<<-`, look ahead (without consuming) for the delimiter
    /// word and register the pending heredoc. Quoting or escaping any part
    /// of the delimiter suppresses expansion of the body.
    fn register_pending_heredoc(&mut self, strip_tabs: bool) {
        let mut i = self.pos;
        while matches!(self.src.get(i), Some(&(' ' | '\t'))) {
            i += 1;
        }

        let mut delimiter = String::new();
        let mut quoted = false;
        while let Some(&c) = self.src.get(i) {
            if c.is_whitespace() || matches!(c, ';' | '<' | '>' | '&' | '|' | '(' | ')') {
                break;
            }
            match c {
                '\'' | '"' => {
                    quoted = true;
                    let q = c;
                    i += 1;
                    while let Some(&cc) = self.src.get(i) {
                        if cc == q {
                            i += 1;
                            break;
                        }
                        delimiter.push(cc);
                        i += 1;
                    }
                }
                '\\' => {
                    quoted = true;
                    i += 1;
                    if let Some(&cc) = self.src.get(i) {
                        delimiter.push(cc);
                        i += 1;
                    }
                }
                _ => {
                    delimiter.push(c);
                    i += 1;
                }
            }
        }

        if !delimiter.is_empty() {
            self.pending_heredocs.push(PendingHeredoc {
                delimiter,
                strip_tabs,
                quoted,
            });
        }
    }

    /// Consume raw lines for every pending heredoc, in registration order,
    /// emitting one `HereDocBody` token each. A line equal to the delimiter
    /// (tab-stripped for `<<-`) ends the body and is not part of it.
    fn collect_heredoc_bodies(&mut self) {
        let pending = std::mem::take(&mut self.pending_heredocs);
        for heredoc in pending {
            let start = self.pos;
            let line = self.line;
            let column = self.column;
            let mut body = String::new();

            while self.pos < self.src.len() {
                let line_start = self.pos;
                while self.pos < self.src.len() && self.src[self.pos] != '\n' {
                    self.bump();
                }
                let text: String = self.src[line_start..self.pos].iter().collect();

                let candidate = if heredoc.strip_tabs {
                    text.trim_start_matches('\t')
                } else {
                    text.as_str()
                };
                if candidate == heredoc.delimiter {
                    if self.cur() == Some('\n') {
                        self.bump();
                    }
                    break;
                }

                body.push_str(&text);
                if self.cur() == Some('\n') {
                    body.push('\n');
                    self.bump();
                }
            }

            self.tokens.push(Token::new(
                TokenKind::HereDocBody,
                body,
                start,
                self.pos,
                line,
                column,
            ));
        }
    }
}

/// Tokenize a complete script.
pub fn tokenize(input: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(input).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn simple_command() {
        let toks = tokenize("echo hello world").unwrap();
        assert_eq!(toks.len(), 4);
        assert_eq!(toks[0].kind, TokenKind::Name);
        assert_eq!(toks[0].text, "echo");
        assert_eq!(toks[2].text, "world");
        assert_eq!(toks[3].kind, TokenKind::Eof);
    }

    #[test]
    fn operators() {
        assert_eq!(
            kinds("a && b || c | d |& e"),
            vec![
                TokenKind::Name,
                TokenKind::AndIf,
                TokenKind::Name,
                TokenKind::OrIf,
                TokenKind::Name,
                TokenKind::Pipe,
                TokenKind::Name,
                TokenKind::PipeBoth,
                TokenKind::Name,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn redirections() {
        assert_eq!(
            kinds("cmd > out 2>&1 <infile"),
            vec![
                TokenKind::Name,
                TokenKind::Great,
                TokenKind::Name,
                TokenKind::Number,
                TokenKind::GreatAnd,
                TokenKind::Number,
                TokenKind::Less,
                TokenKind::Name,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn reserved_words() {
        assert_eq!(
            kinds("if true; then echo; fi"),
            vec![
                TokenKind::If,
                TokenKind::Name,
                TokenKind::Semi,
                TokenKind::Then,
                TokenKind::Name,
                TokenKind::Semi,
                TokenKind::Fi,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn quoted_reserved_word_is_plain() {
        let toks = tokenize("'if'").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Word);
        assert_eq!(toks[0].text, "if");
        assert!(toks[0].single_quoted);
    }

    #[test]
    fn assignment_word() {
        let toks = tokenize("FOO=bar BAZ+=x cmd").unwrap();
        assert_eq!(toks[0].kind, TokenKind::AssignmentWord);
        assert_eq!(toks[0].text, "FOO=bar");
        assert_eq!(toks[1].kind, TokenKind::AssignmentWord);
        assert_eq!(toks[1].text, "BAZ+=x");
        assert_eq!(toks[2].kind, TokenKind::Name);
    }

    #[test]
    fn assignment_with_quoted_value() {
        let toks = tokenize(r#"MSG="a b""#).unwrap();
        assert_eq!(toks[0].kind, TokenKind::AssignmentWord);
        assert_eq!(toks[0].text, r#"MSG="a b""#);
    }

    #[test]
    fn double_quoted_word() {
        let toks = tokenize(r#""hello world""#).unwrap();
        assert_eq!(toks[0].kind, TokenKind::Word);
        assert_eq!(toks[0].text, "hello world");
        assert!(toks[0].quoted);
        assert!(!toks[0].single_quoted);
    }

    #[test]
    fn substitution_spans_stay_in_word() {
        let toks = tokenize("echo $(ls | wc -l)").unwrap();
        assert_eq!(toks.len(), 3);
        assert_eq!(toks[1].text, "$(ls | wc -l)");
    }

    #[test]
    fn case_paren_inside_substitution() {
        let toks = tokenize("echo $(case $x in a) echo A;; esac)").unwrap();
        assert_eq!(toks.len(), 3);
        assert_eq!(toks[1].text, "$(case $x in a) echo A;; esac)");
    }

    #[test]
    fn heredoc_body_token() {
        let toks = tokenize("cat <<EOF\nhello\nEOF\n").unwrap();
        let body = toks.iter().find(|t| t.kind == TokenKind::HereDocBody).unwrap();
        assert_eq!(body.text, "hello\n");
    }

    #[test]
    fn heredoc_strip_tabs() {
        let toks = tokenize("cat <<-EOF\n\thello\n\tEOF\n").unwrap();
        let body = toks.iter().find(|t| t.kind == TokenKind::HereDocBody).unwrap();
        assert_eq!(body.text, "\thello\n");
    }

    #[test]
    fn two_heredocs_in_order() {
        let toks = tokenize("cat <<A <<B\none\nA\ntwo\nB\n").unwrap();
        let bodies: Vec<&Token> = toks
            .iter()
            .filter(|t| t.kind == TokenKind::HereDocBody)
            .collect();
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[0].text, "one\n");
        assert_eq!(bodies[1].text, "two\n");
    }

    #[test]
    fn arithmetic_command_tokens() {
        let k = kinds("((1+2))");
        assert_eq!(k[0], TokenKind::DLParen);
        assert_eq!(*k.last().unwrap(), TokenKind::Eof);
        assert_eq!(k[k.len() - 2], TokenKind::DRParen);
    }

    #[test]
    fn nested_subshells_not_arithmetic() {
        let k = kinds("( ( echo hi ) )");
        assert_eq!(k[0], TokenKind::LParen);
        assert_eq!(k[1], TokenKind::LParen);
    }

    #[test]
    fn dparen_spaced_close_reads_as_parens() {
        // Closes `) )` — must not lex as an arithmetic command.
        let k = kinds("((echo a) )");
        assert_eq!(k[0], TokenKind::LParen);
    }

    #[test]
    fn conditional_brackets() {
        let k = kinds("[[ -n x ]]");
        assert_eq!(k[0], TokenKind::DLBracket);
        assert_eq!(k[k.len() - 2], TokenKind::DRBracket);
    }

    #[test]
    fn comment_token() {
        let toks = tokenize("echo hi # trailing").unwrap();
        assert!(toks.iter().any(|t| t.kind == TokenKind::Comment));
    }

    #[test]
    fn unterminated_single_quote_errors() {
        assert!(tokenize("echo 'oops").is_err());
    }

    #[test]
    fn bang_token_and_bang_equals_word() {
        let k = kinds("! true");
        assert_eq!(k[0], TokenKind::Bang);
        let toks = tokenize("!= x").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Word);
        assert_eq!(toks[0].text, "!=");
    }

    #[test]
    fn line_columns_tracked() {
        let toks = tokenize("a\nbb\n").unwrap();
        let b = toks.iter().find(|t| t.text == "bb").unwrap();
        assert_eq!(b.line, 2);
        assert_eq!(b.column, 1);
    }
}
