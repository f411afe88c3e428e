//! Compound-command sub-parsers: each owns one state machine over the
//! token stream (`if`, `for`, `while`/`until`, `case`, subshell, group,
//! `(( ))`, function definitions).

use super::Parser;
use crate::ast::{
    ArithCommand, BlockCommand, CaseArm, CaseCommand, CaseTerminator, Command, CompoundCommand,
    ForArithCommand, ForCommand, FunctionDef, IfCommand, LoopCommand, Statement,
};
use crate::error::ParseError;
use crate::lexer::TokenKind;
use crate::parser::arith::parse_arith;

impl Parser {
    pub(crate) fn parse_if(&mut self) -> Result<Command, ParseError> {
        self.expect(TokenKind::If, "`if'")?;

        let mut arms = Vec::new();

        let condition = self.parse_compound_list()?;
        self.expect(TokenKind::Then, "`then'")?;
        let body = self.parse_branch_body(&[TokenKind::Fi, TokenKind::Elif, TokenKind::Else])?;
        self.require_nonempty_branch(&body)?;
        arms.push((condition, body));

        while self.at(TokenKind::Elif) {
            self.advance();
            let condition = self.parse_compound_list()?;
            self.expect(TokenKind::Then, "`then'")?;
            let body = self.parse_branch_body(&[TokenKind::Fi, TokenKind::Elif, TokenKind::Else])?;
            self.require_nonempty_branch(&body)?;
            arms.push((condition, body));
        }

        let mut else_body = None;
        if self.at(TokenKind::Else) {
            self.advance();
            let body = self.parse_branch_body(&[TokenKind::Fi])?;
            if body.is_empty() {
                return Err(ParseError::at_token(
                    "syntax error near unexpected token `fi'",
                    self.cur(),
                ));
            }
            else_body = Some(body);
        }

        self.expect(TokenKind::Fi, "`fi'")?;
        let redirections = self.parse_redirections()?;

        Ok(Command::Compound(CompoundCommand::If(IfCommand {
            arms,
            else_body,
            redirections,
        })))
    }

    fn parse_branch_body(&mut self, stop: &[TokenKind]) -> Result<Vec<Statement>, ParseError> {
        let mut body = Vec::new();
        loop {
            if self.at(TokenKind::Eof) || stop.contains(&self.cur().kind) {
                break;
            }
            self.bump_iterations()?;
            let before = self.pos;
            if let Some(stmt) = self.parse_statement()? {
                body.push(stmt);
            }
            self.skip_separators(true);
            if self.pos == before {
                break;
            }
        }
        Ok(body)
    }

    fn require_nonempty_branch(&self, body: &[Statement]) -> Result<(), ParseError> {
        if body.is_empty() {
            return Err(ParseError::at_token(
                format!(
                    "syntax error near unexpected token `{}'",
                    self.cur().text
                ),
                self.cur(),
            ));
        }
        Ok(())
    }

    pub(crate) fn parse_for(&mut self) -> Result<Command, ParseError> {
        self.expect(TokenKind::For, "`for'")?;

        if self.at(TokenKind::DLParen) {
            return self.parse_for_arith();
        }

        // The loop variable may be any word; invalid names surface at run
        // time, matching the shell.
        if !self.at_word() {
            return Err(ParseError::at_token(
                "expected variable name in for loop",
                self.cur(),
            ));
        }
        let variable = self.advance().text;

        self.skip_newlines();

        let mut words = None;
        if self.at(TokenKind::In) {
            self.advance();
            let mut list = Vec::new();
            while self.at_word() {
                list.push(self.take_word()?);
            }
            words = Some(list);
        }

        self.skip_separators(false);
        self.expect(TokenKind::Do, "`do'")?;
        let body = self.parse_compound_list()?;
        self.expect(TokenKind::Done, "`done'")?;
        let redirections = self.parse_redirections()?;

        Ok(Command::Compound(CompoundCommand::For(ForCommand {
            variable,
            words,
            body,
            redirections,
        })))
    }

    /// `for (( init; cond; step ))`: the three expressions are recovered as
    /// raw text from the token stream, then parsed as arithmetic.
    fn parse_for_arith(&mut self) -> Result<Command, ParseError> {
        self.expect(TokenKind::DLParen, "`(('")?;

        let mut sections = [String::new(), String::new(), String::new()];
        let mut section = 0usize;
        let mut dparens = 1usize;
        let mut parens = 0usize;

        while dparens > 0 && !self.at(TokenKind::Eof) {
            self.bump_iterations()?;
            match self.cur().kind {
                TokenKind::Semi => {
                    section = (section + 1).min(2);
                    self.advance();
                }
                TokenKind::DLParen => {
                    dparens += 1;
                    push_expr_text(&mut sections[section], "((");
                    self.advance();
                }
                TokenKind::DRParen => {
                    dparens -= 1;
                    if dparens > 0 {
                        push_expr_text(&mut sections[section], "))");
                    }
                    self.advance();
                }
                TokenKind::LParen => {
                    parens += 1;
                    push_expr_text(&mut sections[section], "(");
                    self.advance();
                }
                TokenKind::RParen => {
                    parens = parens.saturating_sub(1);
                    push_expr_text(&mut sections[section], ")");
                    self.advance();
                }
                _ => {
                    let text = self.advance().text;
                    push_expr_text(&mut sections[section], &text);
                }
            }
        }
        let _ = parens;

        self.skip_newlines();
        if self.at(TokenKind::Semi) {
            self.advance();
        }
        self.skip_newlines();

        // Either `do ... done` or `{ ... }`.
        let body = if self.at(TokenKind::LBrace) {
            self.advance();
            let body = self.parse_compound_list()?;
            self.expect(TokenKind::RBrace, "`}'")?;
            body
        } else {
            self.expect(TokenKind::Do, "`do'")?;
            let body = self.parse_compound_list()?;
            self.expect(TokenKind::Done, "`done'")?;
            body
        };

        let redirections = self.parse_redirections()?;

        let to_expr = |s: &String| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(parse_arith(t))
            }
        };

        Ok(Command::Compound(CompoundCommand::ForArith(
            ForArithCommand {
                init: to_expr(&sections[0]),
                cond: to_expr(&sections[1]),
                step: to_expr(&sections[2]),
                body,
                redirections,
            },
        )))
    }

    pub(crate) fn parse_while(&mut self) -> Result<Command, ParseError> {
        self.expect(TokenKind::While, "`while'")?;
        let (condition, body, redirections) = self.parse_loop_tail()?;
        Ok(Command::Compound(CompoundCommand::While(LoopCommand {
            condition,
            body,
            redirections,
        })))
    }

    pub(crate) fn parse_until(&mut self) -> Result<Command, ParseError> {
        self.expect(TokenKind::Until, "`until'")?;
        let (condition, body, redirections) = self.parse_loop_tail()?;
        Ok(Command::Compound(CompoundCommand::Until(LoopCommand {
            condition,
            body,
            redirections,
        })))
    }

    fn parse_loop_tail(
        &mut self,
    ) -> Result<(Vec<Statement>, Vec<Statement>, Vec<crate::ast::Redirection>), ParseError> {
        let condition = self.parse_compound_list()?;
        self.skip_separators(false);
        self.expect(TokenKind::Do, "`do'")?;
        let body = self.parse_compound_list()?;
        if body.is_empty() {
            return Err(ParseError::at_token(
                "syntax error near unexpected token `done'",
                self.cur(),
            ));
        }
        self.expect(TokenKind::Done, "`done'")?;
        let redirections = self.parse_redirections()?;
        Ok((condition, body, redirections))
    }

    pub(crate) fn parse_case(&mut self) -> Result<Command, ParseError> {
        self.expect(TokenKind::Case, "`case'")?;

        if !self.at_word() {
            return Err(ParseError::at_token("expected word after `case'", self.cur()));
        }
        let subject = self.take_word()?;

        self.skip_newlines();
        self.expect(TokenKind::In, "`in'")?;
        self.skip_newlines();

        let mut arms = Vec::new();

        while !self.at_any(&[TokenKind::Eof, TokenKind::Esac]) {
            self.bump_iterations()?;
            let before = self.pos;

            if self.at_any(&[TokenKind::Newline, TokenKind::Semi]) {
                self.advance();
                continue;
            }

            // Optional `(` before the first pattern.
            if self.at(TokenKind::LParen) {
                self.advance();
            }

            let mut patterns = Vec::new();
            while self.at_word() {
                patterns.push(self.take_word()?);
                if self.at(TokenKind::Pipe) {
                    self.advance();
                } else {
                    break;
                }
            }

            if patterns.is_empty() {
                if self.pos == before {
                    break;
                }
                continue;
            }

            self.expect(TokenKind::RParen, "`)'")?;
            self.skip_newlines();

            let mut body = Vec::new();
            while !self.at_any(&[
                TokenKind::Eof,
                TokenKind::DSemi,
                TokenKind::SemiAnd,
                TokenKind::DSemiAnd,
                TokenKind::Esac,
            ]) {
                self.bump_iterations()?;

                // A new pattern without a terminator before it means an
                // empty action: a syntax error in the shell.
                if self.at_word() && self.peek(1).kind == TokenKind::RParen {
                    return Err(ParseError::at_token(
                        "syntax error near unexpected token `)'",
                        self.cur(),
                    ));
                }

                let inner_before = self.pos;
                if let Some(stmt) = self.parse_statement()? {
                    body.push(stmt);
                }
                self.skip_separators(false);
                if self.pos == inner_before {
                    break;
                }
            }

            let terminator = match self.cur().kind {
                TokenKind::SemiAnd => {
                    self.advance();
                    CaseTerminator::FallThrough
                }
                TokenKind::DSemiAnd => {
                    self.advance();
                    CaseTerminator::Continue
                }
                TokenKind::DSemi => {
                    self.advance();
                    CaseTerminator::Break
                }
                _ => CaseTerminator::Break,
            };

            arms.push(CaseArm {
                patterns,
                body,
                terminator,
            });

            self.skip_newlines();
            if self.pos == before {
                break;
            }
        }

        self.expect(TokenKind::Esac, "`esac'")?;
        let redirections = self.parse_redirections()?;

        Ok(Command::Compound(CompoundCommand::Case(CaseCommand {
            subject,
            arms,
            redirections,
        })))
    }

    pub(crate) fn parse_subshell(&mut self) -> Result<Command, ParseError> {
        self.expect(TokenKind::LParen, "`('")?;
        let body = self.parse_compound_list()?;
        self.expect(TokenKind::RParen, "`)'")?;
        let redirections = self.parse_redirections()?;
        Ok(Command::Compound(CompoundCommand::Subshell(BlockCommand {
            body,
            redirections,
        })))
    }

    pub(crate) fn parse_group(&mut self) -> Result<Command, ParseError> {
        self.expect(TokenKind::LBrace, "`{'")?;
        let body = self.parse_compound_list()?;
        self.expect(TokenKind::RBrace, "`}'")?;
        let redirections = self.parse_redirections()?;
        Ok(Command::Compound(CompoundCommand::Group(BlockCommand {
            body,
            redirections,
        })))
    }

    /// `(( expr ))` — the raw expression text is recovered token by token,
    /// with the same paren-splitting rules used at the `((` decision point.
    pub(crate) fn parse_arith_command(&mut self) -> Result<Command, ParseError> {
        let start = self.expect(TokenKind::DLParen, "`(('")?;

        let mut text = String::new();
        let mut dparens = 1usize;
        let mut parens = 0usize;

        while dparens > 0 && !self.at(TokenKind::Eof) {
            self.bump_iterations()?;
            match self.cur().kind {
                TokenKind::DLParen => {
                    dparens += 1;
                    push_expr_text(&mut text, "((");
                    self.advance();
                }
                TokenKind::DRParen => {
                    if parens >= 2 {
                        parens -= 2;
                        push_expr_text(&mut text, "))");
                        self.advance();
                    } else if parens == 1 {
                        // One of the two parens closes an inner group; the
                        // other closes the command.
                        parens = 0;
                        text.push(')');
                        dparens -= 1;
                        self.advance();
                    } else {
                        dparens -= 1;
                        if dparens > 0 {
                            push_expr_text(&mut text, "))");
                        }
                        self.advance();
                    }
                }
                TokenKind::LParen => {
                    parens += 1;
                    text.push('(');
                    self.advance();
                }
                TokenKind::RParen => {
                    parens = parens.saturating_sub(1);
                    text.push(')');
                    self.advance();
                }
                _ => {
                    let tok = self.advance();
                    push_expr_text(&mut text, &tok.text);
                }
            }
        }

        let expr = parse_arith(text.trim());
        let redirections = self.parse_redirections()?;

        Ok(Command::Compound(CompoundCommand::Arithmetic(
            ArithCommand {
                expr,
                redirections,
                line: Some(start.line),
            },
        )))
    }

    /// Function definitions: `function NAME [()] COMPOUND` or
    /// `NAME () COMPOUND`. The second form rejects `$` in the name.
    pub(crate) fn parse_function_def(&mut self) -> Result<Command, ParseError> {
        let name;
        if self.at(TokenKind::Function) {
            self.advance();
            if self.at_word() {
                name = self.advance().text;
            } else {
                return Err(ParseError::at_token("expected function name", self.cur()));
            }
            if self.at(TokenKind::LParen) {
                self.advance();
                self.expect(TokenKind::RParen, "`)'")?;
            }
        } else {
            name = self.advance().text;
            if name.contains('$') {
                return Err(ParseError::at_token(
                    format!("`{}': not a valid identifier", name),
                    self.cur(),
                ));
            }
            self.expect(TokenKind::LParen, "`('")?;
            self.expect(TokenKind::RParen, "`)'")?;
        }

        self.skip_newlines();

        let body = match self.parse_command()? {
            Command::Compound(compound) => compound,
            _ => {
                return Err(ParseError::at_token(
                    "expected compound command for function body",
                    self.cur(),
                ))
            }
        };

        let redirections = self.parse_redirections()?;

        Ok(Command::FunctionDef(FunctionDef {
            name,
            body: Box::new(body),
            redirections,
        }))
    }

    /// `[[ expr ]]`
    pub(crate) fn parse_cond_command(&mut self) -> Result<Command, ParseError> {
        let start = self.expect(TokenKind::DLBracket, "`[['")?;
        let expr = self.parse_cond_expr()?;
        self.expect(TokenKind::DRBracket, "`]]'")?;
        let redirections = self.parse_redirections()?;
        Ok(Command::Compound(CompoundCommand::Conditional(
            crate::ast::CondCommand {
                expr,
                redirections,
                line: Some(start.line),
            },
        )))
    }
}

/// Append a token's text to reassembled expression text with a separating
/// space where one is needed to keep operators apart.
fn push_expr_text(text: &mut String, tok: &str) {
    if !text.is_empty() && !text.ends_with(' ') && !text.ends_with('(') && tok != ")" {
        text.push(' ');
    }
    text.push_str(tok);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn first(script: &crate::ast::Script) -> &Command {
        &script.statements[0].pipelines[0].commands[0]
    }

    #[test]
    fn if_elif_else() {
        let s = parse("if a; then b; elif c; then d; else e; fi").unwrap();
        match first(&s) {
            Command::Compound(CompoundCommand::If(node)) => {
                assert_eq!(node.arms.len(), 2);
                assert!(node.else_body.is_some());
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn empty_then_branch_is_error() {
        assert!(parse("if a; then fi").is_err());
        assert!(parse("while a; do done").is_err());
    }

    #[test]
    fn for_word_list() {
        let s = parse("for i in a b c; do echo $i; done").unwrap();
        match first(&s) {
            Command::Compound(CompoundCommand::For(node)) => {
                assert_eq!(node.variable, "i");
                assert_eq!(node.words.as_ref().unwrap().len(), 3);
                assert_eq!(node.body.len(), 1);
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn for_without_in_iterates_positionals() {
        let s = parse("for arg; do echo $arg; done").unwrap();
        match first(&s) {
            Command::Compound(CompoundCommand::For(node)) => assert!(node.words.is_none()),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn c_style_for() {
        let s = parse("for ((i=0; i<3; i++)); do echo $i; done").unwrap();
        match first(&s) {
            Command::Compound(CompoundCommand::ForArith(node)) => {
                assert!(node.init.is_some());
                assert!(node.cond.is_some());
                assert!(node.step.is_some());
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn c_style_for_empty_sections() {
        let s = parse("for ((;;)); do break; done").unwrap();
        match first(&s) {
            Command::Compound(CompoundCommand::ForArith(node)) => {
                assert!(node.init.is_none());
                assert!(node.cond.is_none());
                assert!(node.step.is_none());
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn while_and_until() {
        assert!(matches!(
            first(&parse("while true; do x; done").unwrap()),
            Command::Compound(CompoundCommand::While(_))
        ));
        assert!(matches!(
            first(&parse("until false; do x; done").unwrap()),
            Command::Compound(CompoundCommand::Until(_))
        ));
    }

    #[test]
    fn case_terminators() {
        let s = parse("case $x in a) one;; b) two;& c) three;;& d) four;; esac").unwrap();
        match first(&s) {
            Command::Compound(CompoundCommand::Case(node)) => {
                assert_eq!(node.arms.len(), 4);
                assert_eq!(node.arms[0].terminator, CaseTerminator::Break);
                assert_eq!(node.arms[1].terminator, CaseTerminator::FallThrough);
                assert_eq!(node.arms[2].terminator, CaseTerminator::Continue);
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn case_multiple_patterns() {
        let s = parse("case $x in a|b|c) hit;; esac").unwrap();
        match first(&s) {
            Command::Compound(CompoundCommand::Case(node)) => {
                assert_eq!(node.arms[0].patterns.len(), 3);
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn subshell_and_group() {
        assert!(matches!(
            first(&parse("(echo hi)").unwrap()),
            Command::Compound(CompoundCommand::Subshell(_))
        ));
        assert!(matches!(
            first(&parse("{ echo hi; }").unwrap()),
            Command::Compound(CompoundCommand::Group(_))
        ));
    }

    #[test]
    fn function_both_forms() {
        let s = parse("function greet { echo hi; }").unwrap();
        match first(&s) {
            Command::FunctionDef(f) => assert_eq!(f.name, "greet"),
            other => panic!("{:?}", other),
        }

        let s = parse("greet() { echo hi; }").unwrap();
        match first(&s) {
            Command::FunctionDef(f) => assert_eq!(f.name, "greet"),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn function_dollar_name_rejected() {
        assert!(parse("a$b() { echo hi; }").is_err());
    }

    #[test]
    fn arith_command_nested_parens() {
        let s = parse("((x = (1+2)*3))").unwrap();
        match first(&s) {
            Command::Compound(CompoundCommand::Arithmetic(node)) => {
                assert!(matches!(node.expr, crate::ast::ArithExpr::Assign { .. }));
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn conditional_command_parses() {
        let s = parse("[[ -n $x ]]").unwrap();
        assert!(matches!(
            first(&s),
            Command::Compound(CompoundCommand::Conditional(_))
        ));
    }
}
