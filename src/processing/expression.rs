// src/processing/expression.rs
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Deepest formula tree accepted, counted in nodes from the root
pub const MAX_DEPTH: usize = 256;

fn too_deep() -> Error {
    Error::InvalidExpression(format!("formula nested too deeply (limit {MAX_DEPTH})"))
}

/// Node of a band-math formula
///
/// A formula is a small tree of band references, constants and the
/// four arithmetic operators. Formulas can be built in code with the
/// operator overloads:
///
/// ```
/// use spectral_stats::processing::expression::Expression;
///
/// let nir = Expression::band("B8");
/// let red = Expression::band("B4");
/// let ndvi = (nir.clone() - red.clone()) / (nir + red);
/// assert_eq!(ndvi.to_string(), "((B8 - B4) / (B8 + B4))");
/// ```
///
/// or parsed from text, optionally binding formula names to bands or
/// constants:
///
/// ```
/// use std::collections::HashMap;
/// use spectral_stats::processing::expression::{Binding, Expression};
///
/// let bindings = HashMap::from([
///     ("NIR".to_string(), Binding::Band("B8".into())),
///     ("RED".to_string(), Binding::Constant(0.1)),
/// ]);
/// let expr = Expression::parse_with("NIR - RED", &bindings).unwrap();
/// assert_eq!(expr.to_string(), "(B8 - 0.1)");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Expression {
    Band { name: String },
    Constant { value: f64 },
    Add { left: Box<Expression>, right: Box<Expression> },
    Subtract { left: Box<Expression>, right: Box<Expression> },
    Multiply { left: Box<Expression>, right: Box<Expression> },
    Divide { left: Box<Expression>, right: Box<Expression> },
    Negate { expr: Box<Expression> },
}

/// What a formula name stands for when parsing with bindings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Binding {
    Constant(f64),
    Band(String),
}

impl Expression {
    pub fn band(name: impl Into<String>) -> Self {
        Expression::Band { name: name.into() }
    }

    pub fn constant(value: f64) -> Self {
        Expression::Constant { value }
    }

    /// `(a - b) / (a + b)`
    pub fn normalized_difference(a: &str, b: &str) -> Self {
        (Self::band(a) - Self::band(b)) / (Self::band(a) + Self::band(b))
    }

    /// Parse a formula where every identifier is a band name.
    pub fn parse(formula: &str) -> Result<Self> {
        Self::parse_with(formula, &HashMap::new())
    }

    /// Parse a formula, replacing bound identifiers with bands or constants.
    /// Unbound identifiers are taken as band names.
    pub fn parse_with(formula: &str, bindings: &HashMap<String, Binding>) -> Result<Self> {
        let tokens = tokenize(formula)?;
        if tokens.is_empty() {
            return Err(Error::InvalidExpression("empty formula".into()));
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            nesting: 0,
        };
        let (expr, _) = parser.parse_expr()?;
        if let Some(tok) = parser.peek() {
            return Err(Error::InvalidExpression(format!(
                "unexpected {tok:?} after end of expression"
            )));
        }
        Ok(expr.substitute(bindings))
    }

    /// Replace band references named in `bindings`
    pub fn substitute(&self, bindings: &HashMap<String, Binding>) -> Self {
        let sub = |e: &Expression| Box::new(e.substitute(bindings));
        match self {
            Expression::Band { name } => match bindings.get(name) {
                Some(Binding::Band(band)) => Expression::band(band.clone()),
                Some(Binding::Constant(v)) => Expression::constant(*v),
                None => self.clone(),
            },
            Expression::Constant { .. } => self.clone(),
            Expression::Add { left, right } => Expression::Add { left: sub(left), right: sub(right) },
            Expression::Subtract { left, right } => Expression::Subtract { left: sub(left), right: sub(right) },
            Expression::Multiply { left, right } => Expression::Multiply { left: sub(left), right: sub(right) },
            Expression::Divide { left, right } => Expression::Divide { left: sub(left), right: sub(right) },
            Expression::Negate { expr } => Expression::Negate { expr: sub(expr) },
        }
    }

    /// Divide every band reference by `divisor`, e.g. 10000 to turn
    /// Sentinel-2 digital numbers into reflectance.
    pub fn scale_bands(&self, divisor: f64) -> Self {
        let scale = |e: &Expression| Box::new(e.scale_bands(divisor));
        match self {
            Expression::Band { .. } => self.clone() / divisor,
            Expression::Constant { .. } => self.clone(),
            Expression::Add { left, right } => Expression::Add { left: scale(left), right: scale(right) },
            Expression::Subtract { left, right } => Expression::Subtract { left: scale(left), right: scale(right) },
            Expression::Multiply { left, right } => Expression::Multiply { left: scale(left), right: scale(right) },
            Expression::Divide { left, right } => Expression::Divide { left: scale(left), right: scale(right) },
            Expression::Negate { expr } => Expression::Negate { expr: scale(expr) },
        }
    }

    /// Every band name the formula reads
    pub fn referenced_bands(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_bands(&mut out);
        out
    }

    fn collect_bands<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Expression::Band { name } => {
                out.insert(name.as_str());
            }
            Expression::Constant { .. } => {}
            Expression::Add { left, right }
            | Expression::Subtract { left, right }
            | Expression::Multiply { left, right }
            | Expression::Divide { left, right } => {
                left.collect_bands(out);
                right.collect_bands(out);
            }
            Expression::Negate { expr } => expr.collect_bands(out),
        }
    }

    /// Constants must be finite and the tree at most [`MAX_DEPTH`] deep.
    /// Walks the tree with an explicit stack so deep input fails cleanly.
    pub fn validate(&self) -> Result<()> {
        let mut pending = vec![(self, 1usize)];
        while let Some((node, depth)) = pending.pop() {
            if depth > MAX_DEPTH {
                return Err(too_deep());
            }
            match node {
                Expression::Band { name } if name.is_empty() => {
                    return Err(Error::InvalidExpression("empty band name".into()));
                }
                Expression::Constant { value } if !value.is_finite() => {
                    return Err(Error::InvalidExpression(format!(
                        "non-finite constant {value}"
                    )));
                }
                Expression::Band { .. } | Expression::Constant { .. } => {}
                Expression::Add { left, right }
                | Expression::Subtract { left, right }
                | Expression::Multiply { left, right }
                | Expression::Divide { left, right } => {
                    pending.push((left, depth + 1));
                    pending.push((right, depth + 1));
                }
                Expression::Negate { expr } => pending.push((expr, depth + 1)),
            }
        }
        Ok(())
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Band { name } => write!(f, "{name}"),
            Expression::Constant { value } => write!(f, "{value}"),
            Expression::Add { left, right } => write!(f, "({left} + {right})"),
            Expression::Subtract { left, right } => write!(f, "({left} - {right})"),
            Expression::Multiply { left, right } => write!(f, "({left} * {right})"),
            Expression::Divide { left, right } => write!(f, "({left} / {right})"),
            Expression::Negate { expr } => write!(f, "-{expr}"),
        }
    }
}

impl FromStr for Expression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

macro_rules! binary_op {
    ($trait:ident, $method:ident, $variant:ident) => {
        impl $trait for Expression {
            type Output = Expression;

            fn $method(self, rhs: Expression) -> Expression {
                Expression::$variant {
                    left: Box::new(self),
                    right: Box::new(rhs),
                }
            }
        }

        impl $trait<f64> for Expression {
            type Output = Expression;

            fn $method(self, rhs: f64) -> Expression {
                self.$method(Expression::constant(rhs))
            }
        }
    };
}

binary_op!(Add, add, Add);
binary_op!(Sub, sub, Subtract);
binary_op!(Mul, mul, Multiply);
binary_op!(Div, div, Divide);

impl Neg for Expression {
    type Output = Expression;

    fn neg(self) -> Expression {
        Expression::Negate {
            expr: Box::new(self),
        }
    }
}

/// A formula bound to the name of the band it produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandMathExpression {
    pub output: String,
    pub formula: Expression,
}

impl BandMathExpression {
    pub fn new(output: impl Into<String>, formula: Expression) -> Result<Self> {
        let output = output.into();
        if output.trim().is_empty() {
            return Err(Error::InvalidExpression("output band name is empty".into()));
        }
        formula.validate()?;
        Ok(Self { output, formula })
    }

    pub fn parse(
        output: impl Into<String>,
        formula: &str,
        bindings: &HashMap<String, Binding>,
    ) -> Result<Self> {
        Self::new(output, Expression::parse_with(formula, bindings)?)
    }

    pub fn referenced_bands(&self) -> BTreeSet<&str> {
        self.formula.referenced_bands()
    }
}

impl fmt::Display for BandMathExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.output, self.formula)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(formula: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = formula.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            c if c.is_whitespace() => i += 1,
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(chars[i]));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // exponent: 1e-3, 2.5E4
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| Error::InvalidExpression(format!("invalid number `{text}`")))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            c => {
                return Err(Error::InvalidExpression(format!(
                    "unexpected character `{c}` at position {i}"
                )))
            }
        }
    }

    Ok(tokens)
}

/// Recursive descent over `expr = term (('+'|'-') term)*`,
/// `term = factor (('*'|'/') factor)*`,
/// `factor = number | ident | '(' expr ')' | ('-'|'+') factor`.
///
/// Every rule returns the tree depth of what it built. Both that depth and
/// the nesting of `factor` are capped at [`MAX_DEPTH`].
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
}

fn joined_depth(left: usize, right: usize) -> Result<usize> {
    let depth = left.max(right) + 1;
    if depth > MAX_DEPTH {
        return Err(too_deep());
    }
    Ok(depth)
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn parse_expr(&mut self) -> Result<(Expression, usize)> {
        let (mut left, mut depth) = self.parse_term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek() {
            let op = *op;
            self.advance();
            let (right, right_depth) = self.parse_term()?;
            depth = joined_depth(depth, right_depth)?;
            left = if op == '+' { left + right } else { left - right };
        }
        Ok((left, depth))
    }

    fn parse_term(&mut self) -> Result<(Expression, usize)> {
        let (mut left, mut depth) = self.parse_factor()?;
        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek() {
            let op = *op;
            self.advance();
            let (right, right_depth) = self.parse_factor()?;
            depth = joined_depth(depth, right_depth)?;
            left = if op == '*' { left * right } else { left / right };
        }
        Ok((left, depth))
    }

    fn parse_factor(&mut self) -> Result<(Expression, usize)> {
        if self.nesting >= MAX_DEPTH {
            return Err(too_deep());
        }
        self.nesting += 1;
        let factor = self.parse_primary();
        self.nesting -= 1;
        factor
    }

    fn parse_primary(&mut self) -> Result<(Expression, usize)> {
        match self.advance() {
            Some(Token::Number(n)) => Ok((Expression::constant(n), 1)),
            Some(Token::Ident(name)) => Ok((Expression::band(name), 1)),
            Some(Token::LParen) => {
                let expr = self.parse_expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(expr),
                    _ => Err(Error::InvalidExpression("missing closing parenthesis".into())),
                }
            }
            Some(Token::Op('-')) => {
                let (expr, depth) = self.parse_factor()?;
                Ok((-expr, joined_depth(depth, 0)?))
            }
            Some(Token::Op('+')) => self.parse_factor(),
            Some(other) => Err(Error::InvalidExpression(format!(
                "unexpected token {other:?}"
            ))),
            None => Err(Error::InvalidExpression("unexpected end of formula".into())),
        }
    }
}
