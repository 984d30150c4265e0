// ABOUTME: Restricted arithmetic evaluator for millisecond interval values
// ABOUTME: Accepts integers, whitespace, + - * / and parentheses; nothing else is evaluated

use thiserror::Error;

const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("unexpected character '{0}' at {1}")]
    UnexpectedChar(char, usize),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("number too large at {0}")]
    NumberTooLarge(usize),

    #[error("expression nested too deeply")]
    TooDeep,

    #[error("result is not a finite number")]
    NotFinite,
}

/// Evaluate an arithmetic expression such as `2*60*60*1000` or `(1+2) * 1000`.
///
/// Grammar:
///
/// ```text
/// expr   := term (('+' | '-') term)*
/// term   := factor (('*' | '/') factor)*
/// factor := ('+' | '-') factor | number | '(' expr ')'
/// ```
pub fn evaluate(input: &str) -> Result<f64, ExprError> {
    let mut parser = Parser {
        bytes: input.as_bytes(),
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    parser.skip_ws();
    if let Some(&b) = parser.bytes.get(parser.pos) {
        return Err(ExprError::UnexpectedChar(b as char, parser.pos));
    }
    if !value.is_finite() {
        return Err(ExprError::NotFinite);
    }
    Ok(value)
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|b| b.is_ascii_whitespace())
        {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.bytes.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<f64, ExprError> {
        let mut value = self.term()?;
        while let Some(op @ (b'+' | b'-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            if op == b'+' {
                value += rhs;
            } else {
                value -= rhs;
            }
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, ExprError> {
        let mut value = self.factor()?;
        while let Some(op @ (b'*' | b'/')) = self.peek() {
            self.pos += 1;
            let rhs = self.factor()?;
            if op == b'*' {
                value *= rhs;
            } else {
                value /= rhs;
            }
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<f64, ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::TooDeep);
        }
        let result = match self.peek() {
            None => Err(ExprError::UnexpectedEnd),
            Some(b'+') => {
                self.pos += 1;
                self.factor()
            }
            Some(b'-') => {
                self.pos += 1;
                self.factor().map(|v| -v)
            }
            Some(b'(') => {
                self.pos += 1;
                let value = self.expr()?;
                match self.peek() {
                    Some(b')') => {
                        self.pos += 1;
                        Ok(value)
                    }
                    Some(b) => Err(ExprError::UnexpectedChar(b as char, self.pos)),
                    None => Err(ExprError::UnexpectedEnd),
                }
            }
            Some(b) if b.is_ascii_digit() => self.number(),
            Some(b) => Err(ExprError::UnexpectedChar(b as char, self.pos)),
        };
        self.depth -= 1;
        result
    }

    fn number(&mut self) -> Result<f64, ExprError> {
        let start = self.pos;
        while self.bytes.get(self.pos).is_some_and(u8::is_ascii_digit) {
            self.pos += 1;
        }
        // Only ASCII digits were consumed, so the slice is valid UTF-8.
        let digits = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| ExprError::UnexpectedChar('?', start))?;
        let value: u64 = digits
            .parse()
            .map_err(|_| ExprError::NumberTooLarge(start))?;
        Ok(value as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluates_products() {
        assert_eq!(evaluate("2*60*60*1000"), Ok(7_200_000.0));
        assert_eq!(evaluate("11 * 60 * 60 * 1000"), Ok(39_600_000.0));
    }

    #[test]
    fn test_precedence_and_parentheses() {
        assert_eq!(evaluate("1 + 2 * 3"), Ok(7.0));
        assert_eq!(evaluate("(1 + 2) * 3"), Ok(9.0));
        assert_eq!(evaluate("10 - 4 - 3"), Ok(3.0));
        assert_eq!(evaluate("100 / 4 / 5"), Ok(5.0));
    }

    #[test]
    fn test_unary_signs() {
        assert_eq!(evaluate("-5 + 10"), Ok(5.0));
        assert_eq!(evaluate("+(3)"), Ok(3.0));
        assert_eq!(evaluate("2 * -3"), Ok(-6.0));
    }

    #[test]
    fn test_rejects_non_arithmetic() {
        assert!(matches!(
            evaluate("DROP TABLE"),
            Err(ExprError::UnexpectedChar('D', 0))
        ));
        assert!(evaluate("1; 2").is_err());
        assert!(evaluate("1.5").is_err());
        assert!(evaluate("process.exit()").is_err());
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!(evaluate(""), Err(ExprError::UnexpectedEnd));
        assert_eq!(evaluate("1 +"), Err(ExprError::UnexpectedEnd));
        assert_eq!(evaluate("(1 + 2"), Err(ExprError::UnexpectedEnd));
        assert!(matches!(evaluate("1 2"), Err(ExprError::UnexpectedChar('2', 2))));
        assert!(matches!(evaluate(")"), Err(ExprError::UnexpectedChar(')', 0))));
    }

    #[test]
    fn test_division_by_zero_is_not_finite() {
        assert_eq!(evaluate("1 / 0"), Err(ExprError::NotFinite));
        assert_eq!(evaluate("0 / 0"), Err(ExprError::NotFinite));
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert_eq!(evaluate(&deep), Err(ExprError::TooDeep));
        let ok = format!("{}1{}", "(".repeat(10), ")".repeat(10));
        assert_eq!(evaluate(&ok), Ok(1.0));
    }
}
