//! Arithmetic expression parser for `$(( ))`, `(( ))`, C-style `for`
//! headers, and substring specs.
//!
//! Precedence climbing over a private token stream. Unparseable input does
//! not abort the surrounding parse: the shell reports arithmetic syntax
//! errors when the expression is *evaluated*, so bad input folds into
//! [`ArithExpr::Invalid`].

use crate::ast::{ArithAssignOp, ArithBinOp, ArithExpr, ArithUnOp};

#[derive(Debug, Clone, PartialEq)]
enum ATok {
    Num(i64),
    Name(String),
    Op(&'static str),
    LParen,
    RParen,
}

struct ATokenizer<'a> {
    chars: Vec<char>,
    pos: usize,
    src: &'a str,
}

impl<'a> ATokenizer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
            src,
        }
    }

    fn tokenize(mut self) -> Result<Vec<ATok>, String> {
        let mut out = Vec::new();
        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            match c {
                ' ' | '\t' | '\n' | '\r' => {
                    self.pos += 1;
                }
                '(' => {
                    out.push(ATok::LParen);
                    self.pos += 1;
                }
                ')' => {
                    out.push(ATok::RParen);
                    self.pos += 1;
                }
                '0'..='9' => out.push(self.number()?),
                c if c.is_ascii_alphabetic() || c == '_' => out.push(self.name()),
                '$' => {
                    // `$x` and bare `x` evaluate identically here.
                    self.pos += 1;
                    match self.chars.get(self.pos) {
                        Some(&c) if c.is_ascii_alphabetic() || c == '_' => out.push(self.name()),
                        Some(&c) if c.is_ascii_digit() => {
                            let mut name = String::new();
                            name.push(c);
                            self.pos += 1;
                            out.push(ATok::Name(name));
                        }
                        Some(&'{') => {
                            // ${name} — strip the braces.
                            self.pos += 1;
                            let mut name = String::new();
                            while let Some(&c) = self.chars.get(self.pos) {
                                if c == '}' {
                                    self.pos += 1;
                                    break;
                                }
                                name.push(c);
                                self.pos += 1;
                            }
                            out.push(ATok::Name(name));
                        }
                        Some(&c) if matches!(c, '#' | '?' | '$' | '!') => {
                            self.pos += 1;
                            out.push(ATok::Name(c.to_string()));
                        }
                        _ => return Err("unexpected `$'".to_string()),
                    }
                }
                '\'' => {
                    // 'c' — character constant.
                    if let (Some(&ch), Some(&'\'')) =
                        (self.chars.get(self.pos + 1), self.chars.get(self.pos + 2))
                    {
                        out.push(ATok::Num(ch as i64));
                        self.pos += 3;
                    } else {
                        return Err("unterminated character constant".to_string());
                    }
                }
                _ => {
                    let op = self.operator()?;
                    out.push(ATok::Op(op));
                }
            }
        }
        Ok(out)
    }

    fn number(&mut self) -> Result<ATok, String> {
        let start = self.pos;
        while matches!(self.chars.get(self.pos), Some(&c) if c.is_ascii_alphanumeric() || c == '#') {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();

        let value = if let Some(rest) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))
        {
            i64::from_str_radix(rest, 16).map_err(|_| format!("invalid hex constant: {}", text))?
        } else if let Some((base, digits)) = text.split_once('#') {
            let base: u32 = base
                .parse()
                .map_err(|_| format!("invalid arithmetic base: {}", text))?;
            if !(2..=64).contains(&base) {
                return Err(format!("invalid arithmetic base: {}", text));
            }
            parse_base_n(digits, base).ok_or_else(|| format!("invalid number: {}", text))?
        } else if text.len() > 1 && text.starts_with('0') && text.chars().all(|c| c.is_digit(8)) {
            i64::from_str_radix(&text, 8).map_err(|_| format!("invalid octal constant: {}", text))?
        } else {
            text.parse::<i64>()
                .map_err(|_| format!("invalid number: {}", text))?
        };
        Ok(ATok::Num(value))
    }

    fn name(&mut self) -> ATok {
        let start = self.pos;
        while matches!(self.chars.get(self.pos), Some(&c) if c.is_ascii_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        ATok::Name(self.chars[start..self.pos].iter().collect())
    }

    fn operator(&mut self) -> Result<&'static str, String> {
        const OPS: &[&str] = &[
            "<<=", ">>=", "**", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "++", "--", "+=",
            "-=", "*=", "/=", "%=", "&=", "|=", "^=", "+", "-", "*", "/", "%", "<", ">", "!", "~",
            "&", "|", "^", "?", ":", "=", ",",
        ];
        for op in OPS {
            if self.matches(op) {
                self.pos += op.len();
                return Ok(op);
            }
        }
        Err(format!(
            "unexpected character `{}' in: {}",
            self.chars[self.pos], self.src
        ))
    }

    fn matches(&self, op: &str) -> bool {
        op.chars()
            .enumerate()
            .all(|(i, c)| self.chars.get(self.pos + i) == Some(&c))
    }
}

fn parse_base_n(digits: &str, base: u32) -> Option<i64> {
    let mut value: i64 = 0;
    for c in digits.chars() {
        let d = match c {
            '0'..='9' => c as u32 - '0' as u32,
            'a'..='z' => c as u32 - 'a' as u32 + 10,
            'A'..='Z' => c as u32 - 'A' as u32 + 36,
            '@' => 62,
            '_' => 63,
            _ => return None,
        };
        // Bases up to 36 treat upper- and lowercase alike.
        let d = if base <= 36 && (36..62).contains(&d) {
            d - 26
        } else {
            d
        };
        if d >= base {
            return None;
        }
        value = value.checked_mul(base as i64)?.checked_add(d as i64)?;
    }
    Some(value)
}

struct AParser {
    tokens: Vec<ATok>,
    pos: usize,
}

impl AParser {
    fn cur(&self) -> Option<&ATok> {
        self.tokens.get(self.pos)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.cur() == Some(&ATok::Op(op_static(op))) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<ArithExpr, String> {
        self.comma()
    }

    fn comma(&mut self) -> Result<ArithExpr, String> {
        let mut left = self.assignment()?;
        while self.eat_op(",") {
            let right = self.assignment()?;
            left = ArithExpr::Binary {
                op: ArithBinOp::Comma,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn assignment(&mut self) -> Result<ArithExpr, String> {
        let start = self.pos;
        let left = self.ternary()?;

        let assign_op = match self.cur() {
            Some(ATok::Op("=")) => Some(ArithAssignOp::Assign),
            Some(ATok::Op("+=")) => Some(ArithAssignOp::Add),
            Some(ATok::Op("-=")) => Some(ArithAssignOp::Sub),
            Some(ATok::Op("*=")) => Some(ArithAssignOp::Mul),
            Some(ATok::Op("/=")) => Some(ArithAssignOp::Div),
            Some(ATok::Op("%=")) => Some(ArithAssignOp::Mod),
            Some(ATok::Op("<<=")) => Some(ArithAssignOp::Shl),
            Some(ATok::Op(">>=")) => Some(ArithAssignOp::Shr),
            Some(ATok::Op("&=")) => Some(ArithAssignOp::And),
            Some(ATok::Op("|=")) => Some(ArithAssignOp::Or),
            Some(ATok::Op("^=")) => Some(ArithAssignOp::Xor),
            _ => None,
        };

        if let Some(op) = assign_op {
            if let ArithExpr::Var(name) = &left {
                self.pos += 1;
                let value = self.assignment()?;
                return Ok(ArithExpr::Assign {
                    op,
                    name: name.clone(),
                    value: Box::new(value),
                });
            }
            // Not an lvalue: report at evaluation via Invalid upstream.
            self.pos = start;
            let _ = self.ternary()?;
            return Err("attempted assignment to non-variable".to_string());
        }

        Ok(left)
    }

    fn ternary(&mut self) -> Result<ArithExpr, String> {
        let cond = self.binary(0)?;
        if self.eat_op("?") {
            let then = self.assignment()?;
            if !self.eat_op(":") {
                return Err("expected `:' in conditional expression".to_string());
            }
            let otherwise = self.assignment()?;
            return Ok(ArithExpr::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(cond)
    }

    /// Left-associative binary levels, lowest first.
    fn binary(&mut self, level: usize) -> Result<ArithExpr, String> {
        const LEVELS: &[&[(&str, ArithBinOp)]] = &[
            &[("||", ArithBinOp::LogicalOr)],
            &[("&&", ArithBinOp::LogicalAnd)],
            &[("|", ArithBinOp::BitOr)],
            &[("^", ArithBinOp::BitXor)],
            &[("&", ArithBinOp::BitAnd)],
            &[("==", ArithBinOp::Eq), ("!=", ArithBinOp::Ne)],
            &[
                ("<=", ArithBinOp::Le),
                (">=", ArithBinOp::Ge),
                ("<", ArithBinOp::Lt),
                (">", ArithBinOp::Gt),
            ],
            &[("<<", ArithBinOp::Shl), (">>", ArithBinOp::Shr)],
            &[("+", ArithBinOp::Add), ("-", ArithBinOp::Sub)],
            &[
                ("*", ArithBinOp::Mul),
                ("/", ArithBinOp::Div),
                ("%", ArithBinOp::Mod),
            ],
        ];

        if level >= LEVELS.len() {
            return self.power();
        }

        let mut left = self.binary(level + 1)?;
        'outer: loop {
            for (text, op) in LEVELS[level] {
                if self.eat_op(text) {
                    let right = self.binary(level + 1)?;
                    left = ArithExpr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    continue 'outer;
                }
            }
            break;
        }
        Ok(left)
    }

    /// `**` binds tighter than unary minus on the left, and is
    /// right-associative.
    fn power(&mut self) -> Result<ArithExpr, String> {
        let base = self.unary()?;
        if self.eat_op("**") {
            let exponent = self.power()?;
            return Ok(ArithExpr::Binary {
                op: ArithBinOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<ArithExpr, String> {
        if self.eat_op("!") {
            return Ok(ArithExpr::Unary {
                op: ArithUnOp::Not,
                operand: Box::new(self.unary()?),
            });
        }
        if self.eat_op("~") {
            return Ok(ArithExpr::Unary {
                op: ArithUnOp::BitNot,
                operand: Box::new(self.unary()?),
            });
        }
        if self.eat_op("-") {
            return Ok(ArithExpr::Unary {
                op: ArithUnOp::Neg,
                operand: Box::new(self.unary()?),
            });
        }
        if self.eat_op("+") {
            return Ok(ArithExpr::Unary {
                op: ArithUnOp::Pos,
                operand: Box::new(self.unary()?),
            });
        }
        if self.eat_op("++") {
            match self.cur() {
                Some(ATok::Name(name)) => {
                    let name = name.clone();
                    self.pos += 1;
                    return Ok(ArithExpr::IncDec {
                        name,
                        increment: true,
                        prefix: true,
                    });
                }
                _ => return Err("`++' requires a variable".to_string()),
            }
        }
        if self.eat_op("--") {
            match self.cur() {
                Some(ATok::Name(name)) => {
                    let name = name.clone();
                    self.pos += 1;
                    return Ok(ArithExpr::IncDec {
                        name,
                        increment: false,
                        prefix: true,
                    });
                }
                _ => return Err("`--' requires a variable".to_string()),
            }
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<ArithExpr, String> {
        let primary = self.primary()?;
        if let ArithExpr::Var(name) = &primary {
            if self.eat_op("++") {
                return Ok(ArithExpr::IncDec {
                    name: name.clone(),
                    increment: true,
                    prefix: false,
                });
            }
            if self.eat_op("--") {
                return Ok(ArithExpr::IncDec {
                    name: name.clone(),
                    increment: false,
                    prefix: false,
                });
            }
        }
        Ok(primary)
    }

    fn primary(&mut self) -> Result<ArithExpr, String> {
        match self.cur().cloned() {
            Some(ATok::Num(n)) => {
                self.pos += 1;
                Ok(ArithExpr::Number(n))
            }
            Some(ATok::Name(name)) => {
                self.pos += 1;
                Ok(ArithExpr::Var(name))
            }
            Some(ATok::LParen) => {
                self.pos += 1;
                let inner = self.expr()?;
                if self.cur() != Some(&ATok::RParen) {
                    return Err("expected `)'".to_string());
                }
                self.pos += 1;
                Ok(ArithExpr::Group(Box::new(inner)))
            }
            Some(ATok::Op(op)) => Err(format!("unexpected token `{}'", op)),
            Some(ATok::RParen) => Err("unexpected `)'".to_string()),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn op_static(op: &str) -> &'static str {
    // All operators come from the fixed table in `ATokenizer::operator`;
    // map the borrowed text back to the table entry.
    const OPS: &[&str] = &[
        "<<=", ">>=", "**", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "++", "--", "+=",
        "-=", "*=", "/=", "%=", "&=", "|=", "^=", "+", "-", "*", "/", "%", "<", ">", "!", "~",
        "&", "|", "^", "?", ":", "=", ",",
    ];
    OPS.iter().find(|&&o| o == op).copied().unwrap_or("")
}

/// Parse arithmetic text. An empty expression evaluates to 0; unparseable
/// input becomes [`ArithExpr::Invalid`] for a runtime diagnostic.
pub fn parse_arith(input: &str) -> ArithExpr {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return ArithExpr::Number(0);
    }

    let tokens = match ATokenizer::new(trimmed).tokenize() {
        Ok(t) => t,
        Err(message) => {
            return ArithExpr::Invalid {
                text: trimmed.to_string(),
                message,
            }
        }
    };

    let mut parser = AParser { tokens, pos: 0 };
    match parser.expr() {
        Ok(expr) if parser.pos == parser.tokens.len() => expr,
        Ok(_) => ArithExpr::Invalid {
            text: trimmed.to_string(),
            message: "syntax error in expression".to_string(),
        },
        Err(message) => ArithExpr::Invalid {
            text: trimmed.to_string(),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_mul_over_add() {
        // 1+2*3 ⇒ Add(1, Mul(2,3))
        match parse_arith("1+2*3") {
            ArithExpr::Binary { op, right, .. } => {
                assert_eq!(op, ArithBinOp::Add);
                assert!(matches!(
                    *right,
                    ArithExpr::Binary {
                        op: ArithBinOp::Mul,
                        ..
                    }
                ));
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn power_right_assoc() {
        // 2**3**2 ⇒ Pow(2, Pow(3,2))
        match parse_arith("2**3**2") {
            ArithExpr::Binary {
                op: ArithBinOp::Pow,
                right,
                ..
            } => assert!(matches!(
                *right,
                ArithExpr::Binary {
                    op: ArithBinOp::Pow,
                    ..
                }
            )),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn assignment_chain() {
        match parse_arith("x = y = 3") {
            ArithExpr::Assign { name, value, .. } => {
                assert_eq!(name, "x");
                assert!(matches!(*value, ArithExpr::Assign { .. }));
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn ternary_expression() {
        assert!(matches!(
            parse_arith("x > 3 ? 1 : 0"),
            ArithExpr::Ternary { .. }
        ));
    }

    #[test]
    fn inc_dec_forms() {
        assert_eq!(
            parse_arith("i++"),
            ArithExpr::IncDec {
                name: "i".into(),
                increment: true,
                prefix: false
            }
        );
        assert_eq!(
            parse_arith("--i"),
            ArithExpr::IncDec {
                name: "i".into(),
                increment: false,
                prefix: true
            }
        );
    }

    #[test]
    fn numeric_bases() {
        assert_eq!(parse_arith("0x1f"), ArithExpr::Number(31));
        assert_eq!(parse_arith("010"), ArithExpr::Number(8));
        assert_eq!(parse_arith("2#101"), ArithExpr::Number(5));
        assert_eq!(parse_arith("16#ff"), ArithExpr::Number(255));
    }

    #[test]
    fn dollar_variables() {
        assert_eq!(parse_arith("$x + 1"), parse_arith("x + 1"));
        assert_eq!(parse_arith("${x} + 1"), parse_arith("x + 1"));
    }

    #[test]
    fn empty_is_zero() {
        assert_eq!(parse_arith(""), ArithExpr::Number(0));
        assert_eq!(parse_arith("   "), ArithExpr::Number(0));
    }

    #[test]
    fn invalid_preserved_for_runtime() {
        assert!(matches!(parse_arith("1 +"), ArithExpr::Invalid { .. }));
        assert!(matches!(parse_arith("@@"), ArithExpr::Invalid { .. }));
    }

    #[test]
    fn comma_sequencing() {
        assert!(matches!(
            parse_arith("a=1, b=2"),
            ArithExpr::Binary {
                op: ArithBinOp::Comma,
                ..
            }
        ));
    }
}
