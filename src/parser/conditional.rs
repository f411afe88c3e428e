//! `[[ ... ]]` conditional expression parser.
//!
//! Words inside the brackets parse with brace expansion disabled; the
//! right-hand side of `=~` parses in regex mode so escapes survive to the
//! regex engine.

use super::Parser;
use crate::ast::{CondBinaryOp, CondExpr, CondUnaryOp};
use crate::error::ParseError;
use crate::lexer::TokenKind;
use crate::word::WordFlags;

fn unary_op(text: &str) -> Option<CondUnaryOp> {
    Some(match text {
        "-e" | "-a" => CondUnaryOp::Exists,
        "-f" => CondUnaryOp::IsFile,
        "-d" => CondUnaryOp::IsDir,
        "-L" | "-h" => CondUnaryOp::IsSymlink,
        "-s" => CondUnaryOp::NonEmptyFile,
        "-r" => CondUnaryOp::Readable,
        "-w" => CondUnaryOp::Writable,
        "-x" => CondUnaryOp::Executable,
        "-z" => CondUnaryOp::ZeroLength,
        "-n" => CondUnaryOp::NonZeroLength,
        "-v" => CondUnaryOp::VarSet,
        "-t" => CondUnaryOp::IsTty,
        _ => return None,
    })
}

fn binary_op_word(text: &str) -> Option<CondBinaryOp> {
    Some(match text {
        "==" | "=" => CondBinaryOp::StrEq,
        "!=" => CondBinaryOp::StrNe,
        "=~" => CondBinaryOp::Match,
        "-eq" => CondBinaryOp::NumEq,
        "-ne" => CondBinaryOp::NumNe,
        "-lt" => CondBinaryOp::NumLt,
        "-le" => CondBinaryOp::NumLe,
        "-gt" => CondBinaryOp::NumGt,
        "-ge" => CondBinaryOp::NumGe,
        "-nt" => CondBinaryOp::NewerThan,
        "-ot" => CondBinaryOp::OlderThan,
        "-ef" => CondBinaryOp::SameFile,
        _ => return None,
    })
}

impl Parser {
    pub(crate) fn parse_cond_expr(&mut self) -> Result<CondExpr, ParseError> {
        self.parse_cond_or()
    }

    fn parse_cond_or(&mut self) -> Result<CondExpr, ParseError> {
        let mut left = self.parse_cond_and()?;
        while self.at(TokenKind::OrIf) {
            self.advance();
            self.skip_newlines();
            let right = self.parse_cond_and()?;
            left = CondExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_cond_and(&mut self) -> Result<CondExpr, ParseError> {
        let mut left = self.parse_cond_not()?;
        while self.at(TokenKind::AndIf) {
            self.advance();
            self.skip_newlines();
            let right = self.parse_cond_not()?;
            left = CondExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_cond_not(&mut self) -> Result<CondExpr, ParseError> {
        self.skip_newlines();
        if self.at(TokenKind::Bang) {
            self.advance();
            let operand = self.parse_cond_not()?;
            return Ok(CondExpr::Not(Box::new(operand)));
        }
        self.parse_cond_primary()
    }

    fn parse_cond_primary(&mut self) -> Result<CondExpr, ParseError> {
        self.skip_newlines();

        if self.at(TokenKind::LParen) {
            self.advance();
            let inner = self.parse_cond_expr()?;
            self.skip_newlines();
            self.expect(TokenKind::RParen, "`)'")?;
            return Ok(CondExpr::Group(Box::new(inner)));
        }

        // Unary file/string test: the operator word followed by an operand.
        if self.at_word() {
            if let Some(op) = unary_op(&self.cur().text) {
                if !self.cur().quoted && self.cond_operand_follows() {
                    self.advance();
                    let operand = self.take_cond_word()?;
                    return Ok(CondExpr::Unary { op, operand });
                }
            }
        }

        if !self.at_word() && !self.at_cond_angle_op() {
            return Err(ParseError::at_token(
                format!("conditional expression expected near `{}'", self.cur().text),
                self.cur(),
            ));
        }

        let left = self.take_cond_word()?;

        // Binary operator?
        if self.at_cond_angle_op() {
            let op = if self.at(TokenKind::Less) {
                CondBinaryOp::StrLt
            } else {
                CondBinaryOp::StrGt
            };
            self.advance();
            let right = self.take_cond_word()?;
            return Ok(CondExpr::Binary { op, left, right });
        }

        if self.at_word() && !self.cur().quoted {
            if let Some(op) = binary_op_word(&self.cur().text) {
                self.advance();
                let right = if op == CondBinaryOp::Match {
                    self.take_word_with(WordFlags {
                        no_brace: true,
                        regex: true,
                        ..Default::default()
                    })?
                } else {
                    self.take_cond_word()?
                };
                return Ok(CondExpr::Binary { op, left, right });
            }
        }

        Ok(CondExpr::Word(left))
    }

    fn take_cond_word(&mut self) -> Result<crate::ast::Word, ParseError> {
        self.take_word_with(WordFlags {
            no_brace: true,
            ..Default::default()
        })
    }

    fn at_cond_angle_op(&self) -> bool {
        self.at(TokenKind::Less) || self.at(TokenKind::Great)
    }

    /// True when a word-like operand follows the current token, so `-f`
    /// reads as a unary operator rather than a literal string.
    fn cond_operand_follows(&self) -> bool {
        let next = self.peek(1).kind;
        matches!(
            next,
            TokenKind::Word | TokenKind::Name | TokenKind::Number | TokenKind::AssignmentWord
        ) || next.is_reserved()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Command, CompoundCommand};
    use crate::parser::parse;

    fn cond(src: &str) -> CondExpr {
        let s = parse(src).unwrap();
        match &s.statements[0].pipelines[0].commands[0] {
            Command::Compound(CompoundCommand::Conditional(c)) => c.expr.clone(),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn unary_file_test() {
        match cond("[[ -f /etc/hosts ]]") {
            CondExpr::Unary { op, .. } => assert_eq!(op, CondUnaryOp::IsFile),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn string_equality_and_pattern() {
        match cond("[[ $x == hello ]]") {
            CondExpr::Binary { op, .. } => assert_eq!(op, CondBinaryOp::StrEq),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn regex_match_keeps_escape() {
        match cond(r"[[ $x =~ ^a\.b$ ]]") {
            CondExpr::Binary { op, right, .. } => {
                assert_eq!(op, CondBinaryOp::Match);
                assert!(right
                    .pieces
                    .iter()
                    .any(|p| matches!(p, crate::ast::WordPiece::Escaped(_))));
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn logical_connectives() {
        match cond("[[ -n $a && -n $b || -n $c ]]") {
            CondExpr::Or(left, _) => assert!(matches!(*left, CondExpr::And(_, _))),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn negation_and_group() {
        match cond("[[ ! ( -z $a ) ]]") {
            CondExpr::Not(inner) => assert!(matches!(*inner, CondExpr::Group(_))),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn numeric_comparison() {
        match cond("[[ 3 -lt 5 ]]") {
            CondExpr::Binary { op, .. } => assert_eq!(op, CondBinaryOp::NumLt),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn bare_word_truthiness() {
        assert!(matches!(cond("[[ $x ]]"), CondExpr::Word(_)));
    }

    #[test]
    fn string_ordering_angle_ops() {
        match cond("[[ abc < abd ]]") {
            CondExpr::Binary { op, .. } => assert_eq!(op, CondBinaryOp::StrLt),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn no_brace_expansion_inside_brackets() {
        match cond("[[ $x == {a,b} ]]") {
            CondExpr::Binary { right, .. } => {
                assert!(matches!(
                    right.pieces[0],
                    crate::ast::WordPiece::Literal(_)
                ));
            }
            other => panic!("{:?}", other),
        }
    }
}
