//! Recursive descent parser.
//!
//! Consumes the token stream and produces the immutable program tree.
//!
//! Grammar (informal):
//!   script      ::= statement*
//!   statement   ::= pipeline (('&&'|'||') pipeline)* ['&']
//!   pipeline    ::= ['time' ['-p']] ('!')* command (('|'|'|&') command)*
//!   command     ::= simple_command | compound_command | function_def
//!   simple_cmd  ::= (assignment)* [word] (word)* (redirection)*
//!
//! A `Parser` instance is ephemeral: one `parse()` call, then discarded.
//! Nested command/backtick substitutions are parsed by brand-new instances
//! (see `word::parse_word`) sharing no state with this one.

pub mod arith;
mod compound;
mod conditional;

use crate::ast::{
    Assignment, Command, HereDoc, ListOp, Pipeline, RedirOp, RedirTarget, Redirection, Script,
    Span, Statement, Word,
};
use crate::error::ParseError;
use crate::lexer::{self, Token, TokenKind};
use crate::limits::{MAX_INPUT_SIZE, MAX_PARSE_ITERATIONS, MAX_TOKENS};
use crate::word::{parse_word, WordFlags};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    input: String,
    iterations: usize,
    /// Scan cursor over `HereDocBody` tokens, claimed in operator order.
    heredoc_claim_pos: usize,
}

impl Parser {
    pub fn new() -> Self {
        Self {
            tokens: Vec::new(),
            pos: 0,
            input: String::new(),
            iterations: 0,
            heredoc_claim_pos: 0,
        }
    }

    /// Parse a complete script. Ceilings on input size and token count are
    /// checked before any grammar work happens.
    pub fn parse(&mut self, input: &str) -> Result<Script, ParseError> {
        if input.len() > MAX_INPUT_SIZE {
            return Err(ParseError::new(
                format!(
                    "input too large: {} bytes exceeds limit of {}",
                    input.len(),
                    MAX_INPUT_SIZE
                ),
                1,
                1,
            ));
        }

        self.input = input.to_string();
        self.tokens = lexer::tokenize(input)?;

        if self.tokens.len() > MAX_TOKENS {
            return Err(ParseError::new(
                format!(
                    "too many tokens: {} exceeds limit of {}",
                    self.tokens.len(),
                    MAX_TOKENS
                ),
                1,
                1,
            ));
        }

        self.pos = 0;
        self.iterations = 0;
        self.heredoc_claim_pos = 0;
        self.parse_script()
    }

    // -----------------------------------------------------------------------
    // Token plumbing
    // -----------------------------------------------------------------------

    pub(crate) fn cur(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    pub(crate) fn peek(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    pub(crate) fn advance(&mut self) -> Token {
        let tok = self.cur().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    pub(crate) fn at(&self, kind: TokenKind) -> bool {
        self.cur().kind == kind
    }

    pub(crate) fn at_any(&self, kinds: &[TokenKind]) -> bool {
        kinds.contains(&self.cur().kind)
    }

    pub(crate) fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, ParseError> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            Err(ParseError::at_token(
                format!("expected {}, got `{}'", what, self.cur().text),
                self.cur(),
            ))
        }
    }

    pub(crate) fn bump_iterations(&mut self) -> Result<(), ParseError> {
        self.iterations += 1;
        if self.iterations > MAX_PARSE_ITERATIONS {
            return Err(ParseError::at_token(
                "maximum parse iterations exceeded (possible infinite loop)",
                self.cur(),
            ));
        }
        Ok(())
    }

    pub(crate) fn skip_newlines(&mut self) {
        while self.at_any(&[
            TokenKind::Newline,
            TokenKind::Comment,
            TokenKind::HereDocBody,
        ]) {
            self.advance();
        }
    }

    /// Skip statement separators. Case-arm terminators are included only
    /// where the caller is inside a case body.
    pub(crate) fn skip_separators(&mut self, include_case_terminators: bool) {
        loop {
            if self.at_any(&[
                TokenKind::Newline,
                TokenKind::Semi,
                TokenKind::Comment,
                TokenKind::HereDocBody,
            ]) {
                self.advance();
                continue;
            }
            if include_case_terminators
                && self.at_any(&[TokenKind::DSemi, TokenKind::SemiAnd, TokenKind::DSemiAnd])
            {
                self.advance();
                continue;
            }
            break;
        }
    }

    // -----------------------------------------------------------------------
    // Word handling
    // -----------------------------------------------------------------------

    /// Reserved words are ordinary words in argument position.
    pub(crate) fn at_word(&self) -> bool {
        let k = self.cur().kind;
        matches!(
            k,
            TokenKind::Word | TokenKind::Name | TokenKind::Number | TokenKind::AssignmentWord
        ) || k.is_reserved()
    }

    pub(crate) fn take_word(&mut self) -> Result<Word, ParseError> {
        self.take_word_with(WordFlags::default())
    }

    pub(crate) fn take_word_with(&mut self, mut flags: WordFlags) -> Result<Word, ParseError> {
        let tok = self.advance();
        flags.quoted = tok.quoted;
        flags.single_quoted = tok.single_quoted;
        parse_word(&tok.text, flags).map_err(|mut e| {
            if e.line == 1 && e.column == 1 {
                e.line = tok.line;
                e.column = tok.column;
            }
            e
        })
    }

    // -----------------------------------------------------------------------
    // Script / statements
    // -----------------------------------------------------------------------

    fn parse_script(&mut self) -> Result<Script, ParseError> {
        let mut statements = Vec::new();
        self.skip_newlines();

        while !self.at(TokenKind::Eof) {
            self.bump_iterations()?;

            if let Some(stmt) = self.unexpected_token_statement()? {
                statements.push(stmt);
                self.skip_separators(false);
                continue;
            }

            let before = self.pos;
            if let Some(stmt) = self.parse_statement()? {
                statements.push(stmt);
            }
            self.skip_separators(false);

            // A case terminator at top level is an immediate syntax error.
            if self.at_any(&[TokenKind::DSemi, TokenKind::SemiAnd, TokenKind::DSemiAnd]) {
                return Err(ParseError::at_token(
                    format!("syntax error near unexpected token `{}'", self.cur().text),
                    self.cur(),
                ));
            }

            if self.pos == before && !self.at(TokenKind::Eof) {
                self.advance();
            }
        }

        Ok(Script { statements })
    }

    /// Tokens that are illegal at statement start. A stray `}` or `)` is
    /// *deferred*: bash only reports it when execution reaches that line,
    /// so it becomes an empty statement carrying the error payload. The
    /// rest are immediate parse errors.
    fn unexpected_token_statement(&mut self) -> Result<Option<Statement>, ParseError> {
        let kind = self.cur().kind;
        let text = self.cur().text.clone();

        let immediate = matches!(
            kind,
            TokenKind::Do
                | TokenKind::Done
                | TokenKind::Then
                | TokenKind::Else
                | TokenKind::Elif
                | TokenKind::Fi
                | TokenKind::Esac
                | TokenKind::Semi
                | TokenKind::Pipe
                | TokenKind::PipeBoth
        );
        if immediate {
            return Err(ParseError::at_token(
                format!("syntax error near unexpected token `{}'", text),
                self.cur(),
            ));
        }

        if matches!(kind, TokenKind::RBrace | TokenKind::RParen) {
            self.advance();
            return Ok(Some(Statement::deferred(
                format!("syntax error near unexpected token `{}'", text),
                text,
            )));
        }

        Ok(None)
    }

    pub(crate) fn at_command_start(&self) -> bool {
        let k = self.cur().kind;
        self.at_word()
            || k.is_redirection()
            || k == TokenKind::Bang
            || matches!(
                k,
                TokenKind::LParen | TokenKind::LBrace | TokenKind::DLParen | TokenKind::DLBracket
            )
    }

    pub(crate) fn parse_statement(&mut self) -> Result<Option<Statement>, ParseError> {
        self.skip_newlines();

        if !self.at_command_start() {
            return Ok(None);
        }

        let start = self.cur().start;

        let mut pipelines = vec![self.parse_pipeline()?];
        let mut operators = Vec::new();

        while self.at_any(&[TokenKind::AndIf, TokenKind::OrIf]) {
            let op = self.advance();
            operators.push(if op.kind == TokenKind::AndIf {
                ListOp::AndIf
            } else {
                ListOp::OrIf
            });
            self.skip_newlines();
            pipelines.push(self.parse_pipeline()?);
        }

        let background = if self.at(TokenKind::Amp) {
            self.advance();
            true
        } else {
            false
        };

        let end = if self.pos > 0 {
            self.tokens[self.pos - 1].end
        } else {
            start
        };
        let source_text: String = self
            .input
            .chars()
            .skip(start)
            .take(end.saturating_sub(start))
            .collect();

        Ok(Some(Statement {
            pipelines,
            operators,
            background,
            deferred: None,
            source_text: Some(source_text),
            span: Some(Span { start, end }),
        }))
    }

    fn parse_pipeline(&mut self) -> Result<Pipeline, ParseError> {
        let mut timed = false;
        let mut timed_posix = false;
        if self.at(TokenKind::Time) {
            self.advance();
            timed = true;
            if self.at_any(&[TokenKind::Word, TokenKind::Name]) && self.cur().text == "-p" {
                self.advance();
                timed_posix = true;
            }
        }

        // Repeated `!` toggles by parity.
        let mut bangs = 0usize;
        while self.at(TokenKind::Bang) {
            self.advance();
            bangs += 1;
        }
        let negated = bangs % 2 == 1;

        let mut commands = vec![self.parse_command()?];
        let mut stderr_pipes = Vec::new();

        while self.at_any(&[TokenKind::Pipe, TokenKind::PipeBoth]) {
            let pipe = self.advance();
            stderr_pipes.push(pipe.kind == TokenKind::PipeBoth);
            self.skip_newlines();
            commands.push(self.parse_command()?);
        }

        Ok(Pipeline {
            commands,
            negated,
            timed,
            timed_posix,
            stderr_pipes,
        })
    }

    fn parse_command(&mut self) -> Result<Command, ParseError> {
        match self.cur().kind {
            TokenKind::If => self.parse_if(),
            TokenKind::For => self.parse_for(),
            TokenKind::While => self.parse_while(),
            TokenKind::Until => self.parse_until(),
            TokenKind::Case => self.parse_case(),
            TokenKind::LParen => self.parse_subshell(),
            TokenKind::LBrace => self.parse_group(),
            TokenKind::DLParen => {
                // `((` that resolves as two spaced `)` is two subshells.
                if self.dparen_closes_with_spaced_parens() {
                    self.parse_nested_subshells_from_dparen()
                } else {
                    self.parse_arith_command()
                }
            }
            TokenKind::DLBracket => self.parse_cond_command(),
            TokenKind::Function => self.parse_function_def(),
            _ => {
                // `name () body` function definition.
                if matches!(self.cur().kind, TokenKind::Name | TokenKind::Word)
                    && self.peek(1).kind == TokenKind::LParen
                    && self.peek(2).kind == TokenKind::RParen
                {
                    return self.parse_function_def();
                }
                self.parse_simple_command()
            }
        }
    }

    /// Token-level twin of the char-level scan: does this `((` close as
    /// two *separate* `)` tokens at depth 0 rather than a `))` token?
    /// Decides nested subshells vs arithmetic command, once.
    fn dparen_closes_with_spaced_parens(&self) -> bool {
        let mut depth = 1i32;
        let mut offset = 1usize;

        while self.pos + offset < self.tokens.len() {
            let tok = self.peek(offset);
            match tok.kind {
                TokenKind::Eof => return false,
                TokenKind::DLParen | TokenKind::LParen => depth += 1,
                TokenKind::DRParen => {
                    depth -= 2;
                    if depth <= 0 {
                        return false;
                    }
                }
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return self.peek(offset + 1).kind == TokenKind::RParen;
                    }
                }
                _ => {}
            }
            offset += 1;
        }
        false
    }

    fn parse_nested_subshells_from_dparen(&mut self) -> Result<Command, ParseError> {
        use crate::ast::{BlockCommand, CompoundCommand};

        self.advance(); // the (( token

        let inner_body = self.parse_compound_list()?;
        self.expect(TokenKind::RParen, "`)'")?;
        self.expect(TokenKind::RParen, "`)'")?;
        let redirections = self.parse_redirections()?;

        let inner = Command::Compound(CompoundCommand::Subshell(BlockCommand {
            body: inner_body,
            redirections: Vec::new(),
        }));
        Ok(Command::Compound(CompoundCommand::Subshell(BlockCommand {
            body: vec![Statement::single(Pipeline::single(inner))],
            redirections,
        })))
    }

    // -----------------------------------------------------------------------
    // Simple commands
    // -----------------------------------------------------------------------

    fn parse_simple_command(&mut self) -> Result<Command, ParseError> {
        let line = self.cur().line;
        let mut assignments = Vec::new();
        let mut name = None;
        let mut args = Vec::new();
        let mut redirections = Vec::new();

        // Leading redirections are legal: `>out cmd`.
        while self.cur().kind.is_redirection() || self.at_fd_redirection() {
            match self.parse_redirection()? {
                Some(r) => redirections.push(r),
                None => break,
            }
        }

        while self.at(TokenKind::AssignmentWord) {
            let tok = self.advance();
            assignments.push(self.split_assignment(&tok)?);
        }

        if self.at_word() {
            name = Some(self.take_word()?);
        }

        loop {
            if self.at_word() {
                args.push(self.take_word()?);
            } else if self.cur().kind.is_redirection() || self.at_fd_redirection() {
                match self.parse_redirection()? {
                    Some(r) => redirections.push(r),
                    None => break,
                }
            } else {
                break;
            }
        }

        Ok(Command::Simple(crate::ast::SimpleCommand {
            assignments,
            name,
            args,
            redirections,
            line: Some(line),
        }))
    }

    fn split_assignment(&mut self, tok: &Token) -> Result<Assignment, ParseError> {
        let text = &tok.text;
        let eq = text.find('=').expect("assignment word without `='");
        let (lhs, rhs) = (&text[..eq], &text[eq + 1..]);
        let (name, append) = match lhs.strip_suffix('+') {
            Some(base) => (base.to_string(), true),
            None => (lhs.to_string(), false),
        };
        let value = parse_word(
            rhs,
            WordFlags {
                assignment: true,
                ..Default::default()
            },
        )?;
        Ok(Assignment {
            name,
            value: Some(value),
            append,
        })
    }

    // -----------------------------------------------------------------------
    // Redirections
    // -----------------------------------------------------------------------

    /// `2>`, `2>&1` — a Number token directly followed by a redirection
    /// operator is a descriptor prefix.
    fn at_fd_redirection(&self) -> bool {
        self.at(TokenKind::Number) && self.peek(1).kind.is_redirection()
    }

    pub(crate) fn parse_redirections(&mut self) -> Result<Vec<Redirection>, ParseError> {
        let mut out = Vec::new();
        while self.cur().kind.is_redirection() || self.at_fd_redirection() {
            self.bump_iterations()?;
            match self.parse_redirection()? {
                Some(r) => out.push(r),
                None => break,
            }
        }
        Ok(out)
    }

    fn parse_redirection(&mut self) -> Result<Option<Redirection>, ParseError> {
        let fd = if self.at_fd_redirection() {
            Some(self.advance().text.parse::<i32>().unwrap_or(0))
        } else {
            None
        };

        let strip_tabs = self.cur().kind == TokenKind::DLessDash;
        let op = match self.cur().kind {
            TokenKind::Less => RedirOp::Read,
            TokenKind::Great => RedirOp::Write,
            TokenKind::DGreat => RedirOp::Append,
            TokenKind::DLess | TokenKind::DLessDash => RedirOp::HereDoc,
            TokenKind::TLess => RedirOp::HereString,
            TokenKind::LessAnd => RedirOp::DupRead,
            TokenKind::GreatAnd => RedirOp::DupWrite,
            TokenKind::LessGreat => RedirOp::ReadWrite,
            TokenKind::Clobber => RedirOp::Clobber,
            TokenKind::AndGreat => RedirOp::WriteAll,
            TokenKind::AndDGreat => RedirOp::AppendAll,
            _ => return Ok(None),
        };
        self.advance();

        if op == RedirOp::HereDoc {
            let delim_tok = if self.at_word() {
                self.advance()
            } else {
                return Err(ParseError::at_token(
                    "expected here-document delimiter",
                    self.cur(),
                ));
            };
            let quoted = delim_tok.quoted || delim_tok.text.contains('\\');
            let delimiter = delim_tok.text.replace('\\', "");

            let body_text = self.claim_heredoc_body();
            let body = if quoted {
                Word {
                    pieces: vec![crate::ast::WordPiece::Literal(body_text)],
                }
            } else {
                parse_word(
                    &body_text,
                    WordFlags {
                        heredoc: true,
                        ..Default::default()
                    },
                )?
            };

            return Ok(Some(Redirection {
                fd,
                op,
                target: RedirTarget::HereDoc(HereDoc {
                    delimiter,
                    body,
                    strip_tabs,
                    quoted,
                }),
            }));
        }

        let target = if self.at_word() {
            self.take_word()?
        } else {
            return Err(ParseError::at_token(
                "expected redirection target",
                self.cur(),
            ));
        };

        Ok(Some(Redirection {
            fd,
            op,
            target: RedirTarget::Word(target),
        }))
    }

    /// The lexer captured heredoc bodies strictly after the newline ending
    /// the owning line and left them in the stream as `HereDocBody` tokens.
    /// Claim the next unclaimed one, in operator order.
    fn claim_heredoc_body(&mut self) -> String {
        let mut idx = self.heredoc_claim_pos.max(self.pos);
        while idx < self.tokens.len() {
            if self.tokens[idx].kind == TokenKind::HereDocBody {
                self.heredoc_claim_pos = idx + 1;
                return self.tokens[idx].text.clone();
            }
            idx += 1;
        }
        String::new()
    }

    // -----------------------------------------------------------------------
    // Statement lists inside compound commands
    // -----------------------------------------------------------------------

    pub(crate) fn parse_compound_list(&mut self) -> Result<Vec<Statement>, ParseError> {
        let mut statements = Vec::new();
        self.skip_newlines();

        while !self.at_any(&[
            TokenKind::Eof,
            TokenKind::Fi,
            TokenKind::Else,
            TokenKind::Elif,
            TokenKind::Then,
            TokenKind::Do,
            TokenKind::Done,
            TokenKind::Esac,
            TokenKind::RParen,
            TokenKind::RBrace,
            TokenKind::DSemi,
            TokenKind::SemiAnd,
            TokenKind::DSemiAnd,
        ]) && self.at_command_start()
        {
            self.bump_iterations()?;
            let before = self.pos;

            if let Some(stmt) = self.parse_statement()? {
                statements.push(stmt);
            }
            self.skip_separators(true);

            if self.pos == before {
                break;
            }
        }

        Ok(statements)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a script with a fresh parser instance.
pub fn parse(input: &str) -> Result<Script, ParseError> {
    Parser::new().parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;

    fn first_command(script: &Script) -> &Command {
        &script.statements[0].pipelines[0].commands[0]
    }

    #[test]
    fn empty_script() {
        let s = parse("").unwrap();
        assert!(s.statements.is_empty());
        let s = parse("\n\n# only a comment\n").unwrap();
        assert!(s.statements.is_empty());
    }

    #[test]
    fn simple_command_with_args() {
        let s = parse("echo hello world").unwrap();
        match first_command(&s) {
            Command::Simple(cmd) => {
                assert_eq!(cmd.name.as_ref().unwrap().as_literal(), Some("echo"));
                assert_eq!(cmd.args.len(), 2);
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn statement_operators() {
        let s = parse("a && b || c").unwrap();
        let stmt = &s.statements[0];
        assert_eq!(stmt.pipelines.len(), 3);
        assert_eq!(stmt.operators, vec![ListOp::AndIf, ListOp::OrIf]);
    }

    #[test]
    fn pipeline_and_stderr_pipe() {
        let s = parse("a | b |& c").unwrap();
        let p = &s.statements[0].pipelines[0];
        assert_eq!(p.commands.len(), 3);
        assert_eq!(p.stderr_pipes, vec![false, true]);
    }

    #[test]
    fn negation_parity() {
        let p = |src: &str| parse(src).unwrap().statements[0].pipelines[0].negated;
        assert!(p("! true"));
        assert!(!p("! ! true"));
        assert!(p("! ! ! true"));
    }

    #[test]
    fn timed_pipeline() {
        let p = &parse("time -p ls | wc").unwrap().statements[0].pipelines[0];
        assert!(p.timed);
        assert!(p.timed_posix);
    }

    #[test]
    fn background_flag() {
        assert!(parse("sleep 1 &").unwrap().statements[0].background);
    }

    #[test]
    fn assignments_before_name() {
        let s = parse("FOO=1 BAR=2 env").unwrap();
        match first_command(&s) {
            Command::Simple(cmd) => {
                assert_eq!(cmd.assignments.len(), 2);
                assert_eq!(cmd.assignments[0].name, "FOO");
                assert!(!cmd.assignments[0].append);
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn append_assignment() {
        let s = parse("PATH+=:/opt/bin true").unwrap();
        match first_command(&s) {
            Command::Simple(cmd) => assert!(cmd.assignments[0].append),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn redirections_with_fd() {
        let s = parse("cmd >out.txt 2>&1").unwrap();
        match first_command(&s) {
            Command::Simple(cmd) => {
                assert_eq!(cmd.redirections.len(), 2);
                assert_eq!(cmd.redirections[0].op, RedirOp::Write);
                assert_eq!(cmd.redirections[1].fd, Some(2));
                assert_eq!(cmd.redirections[1].op, RedirOp::DupWrite);
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn heredoc_attaches_body() {
        let s = parse("cat <<EOF\nhello\nEOF\n").unwrap();
        match first_command(&s) {
            Command::Simple(cmd) => match &cmd.redirections[0].target {
                RedirTarget::HereDoc(h) => {
                    assert_eq!(h.delimiter, "EOF");
                    assert!(!h.quoted);
                    match &h.body.pieces[0] {
                        WordPiece::Literal(text) => assert_eq!(text, "hello\n"),
                        other => panic!("{:?}", other),
                    }
                }
                other => panic!("{:?}", other),
            },
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn quoted_heredoc_delimiter_suppresses_expansion() {
        let s = parse("cat <<'EOF'\n$HOME\nEOF\n").unwrap();
        match first_command(&s) {
            Command::Simple(cmd) => match &cmd.redirections[0].target {
                RedirTarget::HereDoc(h) => {
                    assert!(h.quoted);
                    assert_eq!(h.body.pieces, vec![WordPiece::Literal("$HOME\n".into())]);
                }
                other => panic!("{:?}", other),
            },
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn unquoted_heredoc_body_has_expansions() {
        let s = parse("cat <<EOF\n$HOME\nEOF\n").unwrap();
        match first_command(&s) {
            Command::Simple(cmd) => match &cmd.redirections[0].target {
                RedirTarget::HereDoc(h) => {
                    assert!(matches!(h.body.pieces[0], WordPiece::Param(_)));
                }
                other => panic!("{:?}", other),
            },
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn arithmetic_command_parses() {
        let s = parse("((1+2))").unwrap();
        assert!(matches!(
            first_command(&s),
            Command::Compound(CompoundCommand::Arithmetic(_))
        ));
    }

    #[test]
    fn nested_subshells_parse() {
        let s = parse("( ( echo hi ) )").unwrap();
        match first_command(&s) {
            Command::Compound(CompoundCommand::Subshell(outer)) => {
                let inner = &outer.body[0].pipelines[0].commands[0];
                assert!(matches!(
                    inner,
                    Command::Compound(CompoundCommand::Subshell(_))
                ));
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn deferred_error_for_stray_brace() {
        let s = parse("echo ok\n}\necho more\n").unwrap();
        assert_eq!(s.statements.len(), 3);
        assert!(s.statements[0].deferred.is_none());
        let d = s.statements[1].deferred.as_ref().unwrap();
        assert_eq!(d.token, "}");
        assert!(s.statements[2].deferred.is_none());
    }

    #[test]
    fn stray_semicolon_is_immediate_error() {
        assert!(parse(";").is_err());
        assert!(parse("| cmd").is_err());
    }

    #[test]
    fn source_text_round_trip() {
        let input = "echo one && echo two\necho three\n";
        let s = parse(input).unwrap();
        let span = s.statements[0].span.unwrap();
        let slice: String = input
            .chars()
            .skip(span.start)
            .take(span.end - span.start)
            .collect();
        assert_eq!(slice, "echo one && echo two");
        assert_eq!(
            s.statements[0].source_text.as_deref(),
            Some("echo one && echo two")
        );
        assert_eq!(s.statements[1].source_text.as_deref(), Some("echo three"));
    }

    #[test]
    fn parse_is_idempotent() {
        let input = "for i in a b c; do echo $i; done\nfoo() { bar | baz; }\n";
        let first = parse(input).unwrap();
        let second = parse(input).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn input_size_ceiling() {
        let big = "a".repeat(MAX_INPUT_SIZE + 1);
        assert!(parse(&big).is_err());
    }

    #[test]
    fn token_count_ceiling() {
        let many = "x ".repeat(MAX_TOKENS / 2 + 1);
        assert!(parse(&many).is_err());
    }

    #[test]
    fn nested_substitution_error_aborts_outer_parse() {
        assert!(parse("echo $(if then)").is_err());
    }
}
