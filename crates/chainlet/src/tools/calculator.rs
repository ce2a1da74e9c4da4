use std::iter::Peekable;
use std::str::CharIndices;

use chainlet_core::tool::{Error as ToolError, Tool, ToolResult};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize, JsonSchema)]
pub struct CalculatorToolParameters {
    #[schemars(description = "The arithmetic expression to evaluate, e.g. `(3 + 4) * 2^3`.")]
    expression: String,
}

/// Accepts both the structured parameters and a bare expression string,
/// which is what text-protocol agents pass.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum CalculatorInput {
    Parameters(CalculatorToolParameters),
    Expression(String),
}

impl CalculatorInput {
    fn expression(&self) -> &str {
        match self {
            CalculatorInput::Parameters(params) => &params.expression,
            CalculatorInput::Expression(expression) => expression,
        }
    }
}

/// A tool for evaluating arithmetic expressions.
///
/// Supports `+ - * / % ^` (`**` is accepted for `^`), unary signs and
/// parentheses over floating-point numbers.
pub struct CalculatorTool {
    parameter_schema: Value,
}

impl CalculatorTool {
    /// Creates a new calculator tool.
    #[inline]
    pub fn new() -> Self {
        CalculatorTool {
            parameter_schema: schema_for!(CalculatorToolParameters).to_value(),
        }
    }
}

impl Default for CalculatorTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for CalculatorTool {
    type Input = CalculatorInput;

    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Useful for when you need to answer questions about math. \
         Input should be a single arithmetic expression."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(&self, input: CalculatorInput) -> impl Future<Output = ToolResult> + Send + 'static {
        async move {
            let expression = input.expression();
            trace!("evaluating `{expression}`");
            match evaluate(expression) {
                Ok(value) => Ok(format_number(value)),
                Err(err @ EvalError::Syntax(_)) => {
                    Err(ToolError::invalid_input().with_reason(err.to_string()))
                }
                Err(err) => Err(ToolError::execution_error().with_reason(err.to_string())),
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
enum EvalError {
    #[error("invalid expression: {0}")]
    Syntax(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("the result is not a finite number")]
    NotFinite,
}

fn evaluate(expression: &str) -> Result<f64, EvalError> {
    let mut parser = Parser {
        src: expression,
        chars: expression.char_indices().peekable(),
        depth: 0,
    };
    let value = parser.expr()?;
    parser.skip_whitespace();
    if let Some(&(pos, c)) = parser.chars.peek() {
        return Err(EvalError::Syntax(format!("unexpected `{c}` at {pos}")));
    }
    if !value.is_finite() {
        return Err(EvalError::NotFinite);
    }
    Ok(value)
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

/// A recursive-descent parser that evaluates as it goes.
///
/// ```text
/// expr  := term (('+' | '-') term)*
/// term  := unary (('*' | '/' | '%') unary)*
/// unary := ('+' | '-') unary | power
/// power := atom ('^' unary)?
/// atom  := number | '(' expr ')'
/// ```
///
/// Every recursive rule passes through `unary`, which caps the nesting at
/// [`MAX_DEPTH`].
struct Parser<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
    depth: usize,
}

const MAX_DEPTH: usize = 256;

impl Parser<'_> {
    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.chars.peek().map(|&(_, c)| c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<f64, EvalError> {
        let mut value = self.term()?;
        loop {
            if self.eat('+') {
                value += self.term()?;
            } else if self.eat('-') {
                value -= self.term()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn term(&mut self) -> Result<f64, EvalError> {
        let mut value = self.unary()?;
        loop {
            if self.peek() == Some('*') && !self.at_double_star() {
                self.chars.next();
                value *= self.unary()?;
            } else if self.eat('/') {
                let rhs = self.unary()?;
                if rhs == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                value /= rhs;
            } else if self.eat('%') {
                let rhs = self.unary()?;
                if rhs == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                value %= rhs;
            } else {
                return Ok(value);
            }
        }
    }

    fn unary(&mut self) -> Result<f64, EvalError> {
        if self.depth == MAX_DEPTH {
            return Err(EvalError::Syntax("expression nested too deeply".to_owned()));
        }
        self.depth += 1;
        let value = self.signed();
        self.depth -= 1;
        value
    }

    fn signed(&mut self) -> Result<f64, EvalError> {
        if self.eat('-') {
            Ok(-self.unary()?)
        } else if self.eat('+') {
            self.unary()
        } else {
            self.power()
        }
    }

    fn power(&mut self) -> Result<f64, EvalError> {
        let base = self.atom()?;
        if self.eat('^') {
            return Ok(base.powf(self.unary()?));
        }
        if self.at_double_star() {
            self.chars.next();
            self.chars.next();
            return Ok(base.powf(self.unary()?));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<f64, EvalError> {
        match self.peek() {
            Some('(') => {
                self.chars.next();
                let value = self.expr()?;
                if !self.eat(')') {
                    return Err(EvalError::Syntax("missing `)`".to_owned()));
                }
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) => Err(EvalError::Syntax(format!("unexpected `{c}`"))),
            None => Err(EvalError::Syntax("unexpected end of expression".to_owned())),
        }
    }

    fn number(&mut self) -> Result<f64, EvalError> {
        let Some(&(start, _)) = self.chars.peek() else {
            return Err(EvalError::Syntax("expected a number".to_owned()));
        };
        let mut end = start;
        while let Some((pos, c)) = self
            .chars
            .next_if(|&(_, c)| c.is_ascii_digit() || c == '.' || c == '_')
        {
            end = pos + c.len_utf8();
        }
        let literal = self.src[start..end].replace('_', "");
        literal
            .parse()
            .map_err(|_| EvalError::Syntax(format!("invalid number `{literal}`")))
    }

    fn at_double_star(&mut self) -> bool {
        self.skip_whitespace();
        let mut lookahead = self.chars.clone();
        matches!(
            (lookahead.next(), lookahead.next()),
            (Some((_, '*')), Some((_, '*')))
        )
    }
}
