//! Recursive-descent parser for the campaign condition language.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! ternary    := or ( '?' ternary ':' ternary )?
//! or         := and ( '||' and )*
//! and        := equality ( '&&' equality )*
//! equality   := relational ( ('==' | '!=') relational )*
//! relational := additive ( ('<' | '<=' | '>' | '>=') additive )*
//! additive   := mult ( ('+' | '-') mult )*
//! mult       := unary ( ('*' | '/' | '%') unary )*
//! unary      := ('!' | '-') unary | primary
//! primary    := number | string | 'true' | 'false' | '(' ternary ')'
//!             | signal-name | window-call | custom-call
//! ```
//!
//! Window calls take a signal name and a literal window argument; a custom
//! call is `custom_function('name', args…)`. Every custom call site gets the
//! next [`InvocationId`] from the campaign-scoped counter at parse time.

use vetra_core::SignalId;

use crate::ast::{Aggregate, BinaryOp, Expression, InvocationId, UnaryOp};
use crate::error::{InspectionError, InspectionResult};
use crate::lexer::{tokenize, Token, TokenKind};
use crate::names::SignalNameMap;

/// Parses one condition expression.
pub fn parse_expression(
    text: &str,
    names: &SignalNameMap,
    next_invocation: &mut InvocationId,
) -> InspectionResult<Expression> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        names,
        next_invocation,
    };
    let expression = parser.ternary()?;
    match parser.peek().kind {
        TokenKind::End => Ok(expression),
        _ => Err(InspectionError::syntax(
            parser.peek().position,
            "trailing input after expression",
        )),
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    names: &'a SignalNameMap,
    next_invocation: &'a mut InvocationId,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if &self.peek().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> InspectionResult<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(InspectionError::syntax(
                self.peek().position,
                format!("expected {what}"),
            ))
        }
    }

    fn ternary(&mut self) -> InspectionResult<Expression> {
        let condition = self.or()?;
        if !self.eat(&TokenKind::Question) {
            return Ok(condition);
        }
        let if_true = self.ternary()?;
        self.expect(&TokenKind::Colon, "':'")?;
        let if_false = self.ternary()?;
        Ok(Expression::Conditional {
            condition: Box::new(condition),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        })
    }

    fn or(&mut self) -> InspectionResult<Expression> {
        let mut left = self.and()?;
        while self.eat(&TokenKind::OrOr) {
            let right = self.and()?;
            left = Expression::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and(&mut self) -> InspectionResult<Expression> {
        let mut left = self.equality()?;
        while self.eat(&TokenKind::AndAnd) {
            let right = self.equality()?;
            left = Expression::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn equality(&mut self) -> InspectionResult<Expression> {
        let mut left = self.relational()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::EqEq => BinaryOp::Equal,
                TokenKind::NotEq => BinaryOp::NotEqual,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.relational()?;
            left = Expression::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn relational(&mut self) -> InspectionResult<Expression> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Less => BinaryOp::Less,
                TokenKind::LessEq => BinaryOp::LessEq,
                TokenKind::Greater => BinaryOp::Greater,
                TokenKind::GreaterEq => BinaryOp::GreaterEq,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.additive()?;
            left = Expression::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn additive(&mut self) -> InspectionResult<Expression> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Subtract,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.multiplicative()?;
            left = Expression::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn multiplicative(&mut self) -> InspectionResult<Expression> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Multiply,
                TokenKind::Slash => BinaryOp::Divide,
                TokenKind::Percent => BinaryOp::Modulo,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = Expression::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn unary(&mut self) -> InspectionResult<Expression> {
        let op = match self.peek().kind {
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Minus => Some(UnaryOp::Negate),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.unary()?;
            return Ok(Expression::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> InspectionResult<Expression> {
        let token = self.advance();
        match token.kind {
            TokenKind::Number(value) => Ok(Expression::Number(value)),
            TokenKind::Text(value) => Ok(Expression::Text(value)),
            TokenKind::LParen => {
                let inner = self.ternary()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Ident(name) => self.ident_or_call(name, token.position),
            _ => Err(InspectionError::syntax(token.position, "expected a value")),
        }
    }

    fn ident_or_call(&mut self, name: String, position: usize) -> InspectionResult<Expression> {
        match name.as_str() {
            "true" => return Ok(Expression::Boolean(true)),
            "false" => return Ok(Expression::Boolean(false)),
            _ => {}
        }
        if self.peek().kind != TokenKind::LParen {
            let signal_id = self.resolve_signal(&name)?;
            return Ok(Expression::Signal(signal_id));
        }
        self.advance();

        if name == "custom_function" {
            return self.custom_call(position);
        }
        if name == "previous" {
            let signal_id = self.signal_argument()?;
            self.expect(&TokenKind::RParen, "')'")?;
            return Ok(Expression::Previous { signal_id });
        }
        if name == "has_received_since" {
            let signal_id = self.signal_argument()?;
            self.expect(&TokenKind::Comma, "','")?;
            let window_ms = self.window_argument()?;
            self.expect(&TokenKind::RParen, "')'")?;
            return Ok(Expression::HasReceivedSince {
                signal_id,
                window_ms,
            });
        }
        if let Some(aggregate) = time_window_aggregate(&name) {
            let signal_id = self.signal_argument()?;
            self.expect(&TokenKind::Comma, "','")?;
            let window_ms = self.window_argument()?;
            self.expect(&TokenKind::RParen, "')'")?;
            return Ok(Expression::TimeWindow {
                aggregate,
                signal_id,
                window_ms,
            });
        }
        if let Some(aggregate) = sample_window_aggregate(&name) {
            let signal_id = self.signal_argument()?;
            self.expect(&TokenKind::Comma, "','")?;
            let samples = self.window_argument()? as usize;
            self.expect(&TokenKind::RParen, "')'")?;
            return Ok(Expression::SampleWindow {
                aggregate,
                signal_id,
                samples: samples.max(1),
            });
        }
        Err(InspectionError::syntax(
            position,
            format!("unknown function '{name}'"),
        ))
    }

    fn custom_call(&mut self, position: usize) -> InspectionResult<Expression> {
        let name_token = self.advance();
        let TokenKind::Text(function_name) = name_token.kind else {
            return Err(InspectionError::syntax(
                name_token.position,
                "custom_function needs a quoted function name",
            ));
        };
        let invocation_id = *self.next_invocation;
        *self.next_invocation += 1;

        let mut args = Vec::new();
        while self.eat(&TokenKind::Comma) {
            args.push(self.ternary()?);
        }
        self.expect(&TokenKind::RParen, "')'")?;
        if function_name.is_empty() {
            return Err(InspectionError::syntax(position, "empty function name"));
        }
        Ok(Expression::CustomFunction {
            name: function_name,
            invocation_id,
            args,
        })
    }

    fn signal_argument(&mut self) -> InspectionResult<SignalId> {
        let token = self.advance();
        let TokenKind::Ident(name) = token.kind else {
            return Err(InspectionError::syntax(
                token.position,
                "expected a signal name",
            ));
        };
        self.resolve_signal(&name)
    }

    fn window_argument(&mut self) -> InspectionResult<u64> {
        let token = self.advance();
        let TokenKind::Number(value) = token.kind else {
            return Err(InspectionError::syntax(
                token.position,
                "expected a numeric window",
            ));
        };
        if !value.is_finite() || value < 0.0 {
            return Err(InspectionError::syntax(
                token.position,
                "window must be a non-negative number",
            ));
        }
        Ok(value as u64)
    }

    fn resolve_signal(&self, name: &str) -> InspectionResult<SignalId> {
        self.names
            .resolve(name)
            .ok_or_else(|| InspectionError::UnknownSignal { name: name.into() })
    }
}

fn time_window_aggregate(name: &str) -> Option<Aggregate> {
    match name {
        "last_window_min" => Some(Aggregate::Min),
        "last_window_max" => Some(Aggregate::Max),
        "last_window_avg" => Some(Aggregate::Avg),
        "last_window_sum" => Some(Aggregate::Sum),
        "last_window_count" => Some(Aggregate::Count),
        _ => None,
    }
}

fn sample_window_aggregate(name: &str) -> Option<Aggregate> {
    match name {
        "sample_window_min" => Some(Aggregate::Min),
        "sample_window_max" => Some(Aggregate::Max),
        "sample_window_avg" => Some(Aggregate::Avg),
        "sample_window_sum" => Some(Aggregate::Sum),
        "sample_window_count" => Some(Aggregate::Count),
        _ => None,
    }
}
