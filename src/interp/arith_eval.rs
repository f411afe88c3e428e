//! Arithmetic evaluation for `$(( ))`, `(( ))`, C-style `for`, and
//! substring specs.
//!
//! Evaluation is explicit-`Result`: division by zero and syntax errors
//! preserved from the parse surface as `ArithError`, never as shared flag
//! state.

use crate::ast::{ArithAssignOp, ArithBinOp, ArithExpr, ArithUnOp};
use crate::interp::state::ShellState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArithError {
    pub message: String,
}

impl ArithError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ArithError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Read a variable as an integer the way the shell does: unset or
/// non-numeric reads as 0, a leading base prefix is honored.
fn read_numeric(state: &ShellState, name: &str) -> i64 {
    let raw = match state.get_var(name) {
        Some(v) => v.trim().to_string(),
        None => return 0,
    };
    if raw.is_empty() {
        return 0;
    }
    parse_shell_int(&raw).unwrap_or(0)
}

/// Integer syntax accepted in arithmetic contexts: decimal, `0x` hex,
/// leading-zero octal, `base#digits`, optional sign.
pub fn parse_shell_int(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let value = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some((base, digits)) = body.split_once('#') {
        let base: u32 = base.parse().ok()?;
        if !(2..=64).contains(&base) {
            return None;
        }
        i64::from_str_radix(digits, base.min(36)).ok()?
    } else if body.len() > 1 && body.starts_with('0') && body.chars().all(|c| c.is_digit(8)) {
        i64::from_str_radix(body, 8).ok()?
    } else {
        body.parse::<i64>().ok()?
    };
    Some(if negative { -value } else { value })
}

pub fn eval_arith(state: &mut ShellState, expr: &ArithExpr) -> Result<i64, ArithError> {
    match expr {
        ArithExpr::Number(n) => Ok(*n),
        ArithExpr::Var(name) => Ok(read_numeric(state, name)),
        ArithExpr::Group(inner) => eval_arith(state, inner),

        ArithExpr::Unary { op, operand } => {
            let v = eval_arith(state, operand)?;
            Ok(match op {
                ArithUnOp::Neg => v.wrapping_neg(),
                ArithUnOp::Pos => v,
                ArithUnOp::Not => i64::from(v == 0),
                ArithUnOp::BitNot => !v,
            })
        }

        ArithExpr::IncDec {
            name,
            increment,
            prefix,
        } => {
            let old = read_numeric(state, name);
            let new = if *increment { old + 1 } else { old - 1 };
            state.set_var(name, new.to_string());
            Ok(if *prefix { new } else { old })
        }

        ArithExpr::Binary { op, left, right } => match op {
            // Short-circuit forms evaluate the right side conditionally.
            ArithBinOp::LogicalAnd => {
                if eval_arith(state, left)? == 0 {
                    Ok(0)
                } else {
                    Ok(i64::from(eval_arith(state, right)? != 0))
                }
            }
            ArithBinOp::LogicalOr => {
                if eval_arith(state, left)? != 0 {
                    Ok(1)
                } else {
                    Ok(i64::from(eval_arith(state, right)? != 0))
                }
            }
            ArithBinOp::Comma => {
                eval_arith(state, left)?;
                eval_arith(state, right)
            }
            _ => {
                let l = eval_arith(state, left)?;
                let r = eval_arith(state, right)?;
                apply_binary(*op, l, r)
            }
        },

        ArithExpr::Ternary {
            cond,
            then,
            otherwise,
        } => {
            if eval_arith(state, cond)? != 0 {
                eval_arith(state, then)
            } else {
                eval_arith(state, otherwise)
            }
        }

        ArithExpr::Assign { op, name, value } => {
            let rhs = eval_arith(state, value)?;
            let result = match op {
                ArithAssignOp::Assign => rhs,
                _ => {
                    let current = read_numeric(state, name);
                    let bin = match op {
                        ArithAssignOp::Add => ArithBinOp::Add,
                        ArithAssignOp::Sub => ArithBinOp::Sub,
                        ArithAssignOp::Mul => ArithBinOp::Mul,
                        ArithAssignOp::Div => ArithBinOp::Div,
                        ArithAssignOp::Mod => ArithBinOp::Mod,
                        ArithAssignOp::Shl => ArithBinOp::Shl,
                        ArithAssignOp::Shr => ArithBinOp::Shr,
                        ArithAssignOp::And => ArithBinOp::BitAnd,
                        ArithAssignOp::Or => ArithBinOp::BitOr,
                        ArithAssignOp::Xor => ArithBinOp::BitXor,
                        ArithAssignOp::Assign => unreachable!(),
                    };
                    apply_binary(bin, current, rhs)?
                }
            };
            state.set_var(name, result.to_string());
            Ok(result)
        }

        ArithExpr::Invalid { text, message } => Err(ArithError::new(format!(
            "{}: {}",
            text, message
        ))),
    }
}

fn apply_binary(op: ArithBinOp, l: i64, r: i64) -> Result<i64, ArithError> {
    Ok(match op {
        ArithBinOp::Add => l.wrapping_add(r),
        ArithBinOp::Sub => l.wrapping_sub(r),
        ArithBinOp::Mul => l.wrapping_mul(r),
        ArithBinOp::Div => {
            if r == 0 {
                return Err(ArithError::new("division by 0"));
            }
            l.wrapping_div(r)
        }
        ArithBinOp::Mod => {
            if r == 0 {
                return Err(ArithError::new("division by 0"));
            }
            l.wrapping_rem(r)
        }
        ArithBinOp::Pow => {
            if r < 0 {
                return Err(ArithError::new("exponent less than 0"));
            }
            let mut acc: i64 = 1;
            for _ in 0..r {
                acc = acc.wrapping_mul(l);
            }
            acc
        }
        ArithBinOp::Shl => l.wrapping_shl(r as u32),
        ArithBinOp::Shr => l.wrapping_shr(r as u32),
        ArithBinOp::Lt => i64::from(l < r),
        ArithBinOp::Le => i64::from(l <= r),
        ArithBinOp::Gt => i64::from(l > r),
        ArithBinOp::Ge => i64::from(l >= r),
        ArithBinOp::Eq => i64::from(l == r),
        ArithBinOp::Ne => i64::from(l != r),
        ArithBinOp::BitAnd => l & r,
        ArithBinOp::BitOr => l | r,
        ArithBinOp::BitXor => l ^ r,
        ArithBinOp::LogicalAnd | ArithBinOp::LogicalOr | ArithBinOp::Comma => {
            unreachable!("handled before operand evaluation")
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::arith::parse_arith;

    fn eval(state: &mut ShellState, src: &str) -> Result<i64, ArithError> {
        eval_arith(state, &parse_arith(src))
    }

    #[test]
    fn basic_precedence() {
        let mut s = ShellState::default();
        assert_eq!(eval(&mut s, "1+2*3").unwrap(), 7);
        assert_eq!(eval(&mut s, "(1+2)*3").unwrap(), 9);
        assert_eq!(eval(&mut s, "2**10").unwrap(), 1024);
    }

    #[test]
    fn variables_default_to_zero() {
        let mut s = ShellState::default();
        assert_eq!(eval(&mut s, "missing + 5").unwrap(), 5);
        s.set_var("x", "12");
        assert_eq!(eval(&mut s, "x * 2").unwrap(), 24);
        s.set_var("junk", "not-a-number");
        assert_eq!(eval(&mut s, "junk + 1").unwrap(), 1);
    }

    #[test]
    fn assignment_writes_back() {
        let mut s = ShellState::default();
        assert_eq!(eval(&mut s, "x = 3 + 4").unwrap(), 7);
        assert_eq!(s.get_var("x"), Some("7"));
        assert_eq!(eval(&mut s, "x += 3").unwrap(), 10);
        assert_eq!(s.get_var("x"), Some("10"));
    }

    #[test]
    fn inc_dec_semantics() {
        let mut s = ShellState::default();
        s.set_var("i", "5");
        assert_eq!(eval(&mut s, "i++").unwrap(), 5);
        assert_eq!(s.get_var("i"), Some("6"));
        assert_eq!(eval(&mut s, "++i").unwrap(), 7);
    }

    #[test]
    fn division_by_zero_is_error() {
        let mut s = ShellState::default();
        assert!(eval(&mut s, "1/0").is_err());
        assert!(eval(&mut s, "1%0").is_err());
    }

    #[test]
    fn short_circuit_skips_rhs() {
        let mut s = ShellState::default();
        // The rhs would divide by zero; && must not evaluate it.
        assert_eq!(eval(&mut s, "0 && (1/0)").unwrap(), 0);
        assert_eq!(eval(&mut s, "1 || (1/0)").unwrap(), 1);
    }

    #[test]
    fn ternary_and_comparison() {
        let mut s = ShellState::default();
        assert_eq!(eval(&mut s, "5 > 3 ? 10 : 20").unwrap(), 10);
        assert_eq!(eval(&mut s, "5 < 3 ? 10 : 20").unwrap(), 20);
    }

    #[test]
    fn invalid_reports_at_evaluation() {
        let mut s = ShellState::default();
        assert!(eval(&mut s, "1 +").is_err());
    }
}
