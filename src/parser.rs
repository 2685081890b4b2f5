use std::rc::Rc;

use thiserror::Error;
use tracing::debug;

use crate::Span;
use crate::ast::{
    BlockStatement, Expression, FunctionLiteral, Identifier, InfixOperator, PrefixOperator,
    Program, Statement,
};
use crate::lexer::{Lexer, Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("expected next token to be {expected}, got {found} instead")]
    UnexpectedToken {
        expected: TokenKind,
        found: TokenKind,
        span: Span,
    },
    #[error("no prefix parse function for {kind} found")]
    NoPrefixParseFn { kind: TokenKind, span: Span },
    #[error("could not parse {literal} as integer")]
    InvalidInteger { literal: String, span: Span },
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::UnexpectedToken { span, .. }
            | ParseError::NoPrefixParseFn { span, .. }
            | ParseError::InvalidInteger { span, .. } => *span,
        }
    }
}

// Binding power, lowest to highest. The derived `Ord` follows declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Equals,      // == !=
    LessGreater, // < >
    Sum,         // + -
    Product,     // * /
    Prefix,      // !x -x
    Call,        // f(x)
    Index,       // a[i]
}

fn precedence_of(kind: TokenKind) -> Precedence {
    match kind {
        TokenKind::Eq | TokenKind::NotEq => Precedence::Equals,
        TokenKind::Lt | TokenKind::Gt => Precedence::LessGreater,
        TokenKind::Plus | TokenKind::Minus => Precedence::Sum,
        TokenKind::Asterisk | TokenKind::Slash => Precedence::Product,
        TokenKind::LParen => Precedence::Call,
        TokenKind::LBracket => Precedence::Index,
        _ => Precedence::Lowest,
    }
}

type PrefixParseFn<'src> = fn(&mut Parser<'src>) -> Option<Expression>;
type InfixParseFn<'src> = fn(&mut Parser<'src>, Expression) -> Option<Expression>;

/// Pratt parser with two tokens of lookahead.
///
/// Parsing never aborts. A construct that fails to parse records a
/// [`ParseError`] and is left out of the resulting tree; callers must check
/// [`Parser::errors`] before evaluating the program.
pub struct Parser<'src> {
    lexer: Lexer<'src>,
    current: Token,
    peek: Token,
    errors: Vec<ParseError>,
}

impl<'src> Parser<'src> {
    pub fn new(mut lexer: Lexer<'src>) -> Self {
        let current = lexer.next_token();
        let peek = lexer.next_token();
        Parser {
            lexer,
            current,
            peek,
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<ParseError> {
        self.errors
    }

    pub fn parse_program(&mut self) -> Program {
        let mut program = Program::default();
        while !self.current_is(TokenKind::Eof) {
            if let Some(statement) = self.parse_statement() {
                program.statements.push(statement);
            }
            self.next_token();
        }
        if !self.errors.is_empty() {
            debug!(errors = self.errors.len(), "program parsed with errors");
        }
        program
    }

    // --- Token cursor ---

    fn next_token(&mut self) {
        let next = self.lexer.next_token();
        self.current = std::mem::replace(&mut self.peek, next);
    }

    fn current_is(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn peek_is(&self, kind: TokenKind) -> bool {
        self.peek.kind == kind
    }

    // Advances only when the peek token matches; records an error otherwise.
    fn expect_peek(&mut self, kind: TokenKind) -> Option<()> {
        if self.peek_is(kind) {
            self.next_token();
            Some(())
        } else {
            self.errors.push(ParseError::UnexpectedToken {
                expected: kind,
                found: self.peek.kind,
                span: self.peek.span,
            });
            None
        }
    }

    fn skip_semicolon(&mut self) {
        if self.peek_is(TokenKind::Semicolon) {
            self.next_token();
        }
    }

    fn current_identifier(&self) -> Identifier {
        Identifier(self.current.literal.clone())
    }

    // --- Statements ---

    fn parse_statement(&mut self) -> Option<Statement> {
        match self.current.kind {
            TokenKind::Ident if self.peek_is(TokenKind::Assign) => self.parse_assign_statement(),
            TokenKind::Let => self.parse_let_statement(),
            TokenKind::Return => self.parse_return_statement(),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_let_statement(&mut self) -> Option<Statement> {
        self.expect_peek(TokenKind::Ident)?;
        let name = self.current_identifier();
        self.expect_peek(TokenKind::Assign)?;
        self.next_token();
        let value = self.parse_expression(Precedence::Lowest);
        self.skip_semicolon();
        Some(Statement::Let { name, value: value? })
    }

    fn parse_assign_statement(&mut self) -> Option<Statement> {
        let name = self.current_identifier();
        self.next_token(); // `=`
        self.next_token();
        let value = self.parse_expression(Precedence::Lowest);
        self.skip_semicolon();
        Some(Statement::Assign { name, value: value? })
    }

    fn parse_return_statement(&mut self) -> Option<Statement> {
        self.next_token();
        let value = self.parse_expression(Precedence::Lowest);
        self.skip_semicolon();
        value.map(Statement::Return)
    }

    fn parse_expression_statement(&mut self) -> Option<Statement> {
        let expression = self.parse_expression(Precedence::Lowest);
        self.skip_semicolon();
        expression.map(Statement::Expression)
    }

    // Expects `current` on `{`, leaves it on the matching `}`.
    fn parse_block_statement(&mut self) -> Option<BlockStatement> {
        let mut block = BlockStatement::default();
        self.next_token();
        while !self.current_is(TokenKind::RBrace) && !self.current_is(TokenKind::Eof) {
            if let Some(statement) = self.parse_statement() {
                block.statements.push(statement);
            }
            self.next_token();
        }
        if self.current_is(TokenKind::Eof) {
            self.errors.push(ParseError::UnexpectedToken {
                expected: TokenKind::RBrace,
                found: TokenKind::Eof,
                span: self.current.span,
            });
            return None;
        }
        Some(block)
    }

    // --- Expressions ---

    fn parse_expression(&mut self, precedence: Precedence) -> Option<Expression> {
        let Some(prefix) = Self::prefix_parse_fn(self.current.kind) else {
            self.errors.push(ParseError::NoPrefixParseFn {
                kind: self.current.kind,
                span: self.current.span,
            });
            return None;
        };
        let mut left = prefix(self)?;

        while !self.peek_is(TokenKind::Semicolon) && precedence < precedence_of(self.peek.kind) {
            let Some(infix) = Self::infix_parse_fn(self.peek.kind) else {
                return Some(left);
            };
            self.next_token();
            left = infix(self, left)?;
        }
        Some(left)
    }

    fn prefix_parse_fn(kind: TokenKind) -> Option<PrefixParseFn<'src>> {
        let rule: PrefixParseFn<'src> = match kind {
            TokenKind::Ident => Self::parse_identifier,
            TokenKind::Int => Self::parse_integer_literal,
            TokenKind::String => Self::parse_string_literal,
            TokenKind::True | TokenKind::False => Self::parse_boolean,
            TokenKind::Bang | TokenKind::Minus => Self::parse_prefix_expression,
            TokenKind::LParen => Self::parse_grouped_expression,
            TokenKind::If => Self::parse_if_expression,
            TokenKind::While => Self::parse_while_expression,
            TokenKind::Function => Self::parse_function_literal,
            TokenKind::LBracket => Self::parse_array_literal,
            _ => return None,
        };
        Some(rule)
    }

    fn infix_parse_fn(kind: TokenKind) -> Option<InfixParseFn<'src>> {
        let rule: InfixParseFn<'src> = match kind {
            TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Asterisk
            | TokenKind::Slash
            | TokenKind::Lt
            | TokenKind::Gt
            | TokenKind::Eq
            | TokenKind::NotEq => Self::parse_infix_expression,
            TokenKind::LParen => Self::parse_call_expression,
            TokenKind::LBracket => Self::parse_index_expression,
            _ => return None,
        };
        Some(rule)
    }

    fn parse_identifier(&mut self) -> Option<Expression> {
        Some(Expression::Identifier(self.current_identifier()))
    }

    fn parse_integer_literal(&mut self) -> Option<Expression> {
        match self.current.literal.parse::<i64>() {
            Ok(value) => Some(Expression::Integer(value)),
            Err(_) => {
                self.errors.push(ParseError::InvalidInteger {
                    literal: self.current.literal.clone(),
                    span: self.current.span,
                });
                None
            }
        }
    }

    fn parse_string_literal(&mut self) -> Option<Expression> {
        Some(Expression::String(self.current.literal.clone()))
    }

    fn parse_boolean(&mut self) -> Option<Expression> {
        Some(Expression::Boolean(self.current_is(TokenKind::True)))
    }

    fn parse_prefix_expression(&mut self) -> Option<Expression> {
        let operator = match self.current.kind {
            TokenKind::Bang => PrefixOperator::Bang,
            _ => PrefixOperator::Minus,
        };
        self.next_token();
        let right = self.parse_expression(Precedence::Prefix)?;
        Some(Expression::Prefix {
            operator,
            right: Box::new(right),
        })
    }

    fn parse_grouped_expression(&mut self) -> Option<Expression> {
        self.next_token();
        let expression = self.parse_expression(Precedence::Lowest);
        self.expect_peek(TokenKind::RParen)?;
        expression
    }

    fn parse_if_expression(&mut self) -> Option<Expression> {
        self.expect_peek(TokenKind::LParen)?;
        self.next_token();
        let condition = self.parse_expression(Precedence::Lowest);
        self.expect_peek(TokenKind::RParen)?;
        self.expect_peek(TokenKind::LBrace)?;
        let consequence = self.parse_block_statement()?;

        let alternative = if self.peek_is(TokenKind::Else) {
            self.next_token();
            self.expect_peek(TokenKind::LBrace)?;
            Some(self.parse_block_statement()?)
        } else {
            None
        };

        Some(Expression::If {
            condition: Box::new(condition?),
            consequence,
            alternative,
        })
    }

    fn parse_while_expression(&mut self) -> Option<Expression> {
        self.expect_peek(TokenKind::LParen)?;
        self.next_token();
        let condition = self.parse_expression(Precedence::Lowest);
        self.expect_peek(TokenKind::RParen)?;
        self.expect_peek(TokenKind::LBrace)?;
        let body = self.parse_block_statement()?;
        Some(Expression::While {
            condition: Box::new(condition?),
            body,
        })
    }

    fn parse_function_literal(&mut self) -> Option<Expression> {
        self.expect_peek(TokenKind::LParen)?;
        let parameters = self.parse_function_parameters()?;
        self.expect_peek(TokenKind::LBrace)?;
        let body = self.parse_block_statement()?;
        Some(Expression::Function(Rc::new(FunctionLiteral {
            parameters,
            body,
        })))
    }

    fn parse_function_parameters(&mut self) -> Option<Vec<Identifier>> {
        let mut parameters = Vec::new();
        if self.peek_is(TokenKind::RParen) {
            self.next_token();
            return Some(parameters);
        }

        self.expect_peek(TokenKind::Ident)?;
        parameters.push(self.current_identifier());
        while self.peek_is(TokenKind::Comma) {
            self.next_token();
            self.expect_peek(TokenKind::Ident)?;
            parameters.push(self.current_identifier());
        }
        self.expect_peek(TokenKind::RParen)?;
        Some(parameters)
    }

    fn parse_array_literal(&mut self) -> Option<Expression> {
        self.parse_expression_list(TokenKind::RBracket)
            .map(Expression::Array)
    }

    // Comma separated expressions up to `end`. Fails if any element failed.
    fn parse_expression_list(&mut self, end: TokenKind) -> Option<Vec<Expression>> {
        if self.peek_is(end) {
            self.next_token();
            return Some(Vec::new());
        }

        self.next_token();
        let mut items = vec![self.parse_expression(Precedence::Lowest)];
        while self.peek_is(TokenKind::Comma) {
            self.next_token();
            self.next_token();
            items.push(self.parse_expression(Precedence::Lowest));
        }
        self.expect_peek(end)?;
        items.into_iter().collect()
    }

    fn parse_infix_expression(&mut self, left: Expression) -> Option<Expression> {
        let operator = match self.current.kind {
            TokenKind::Plus => InfixOperator::Plus,
            TokenKind::Minus => InfixOperator::Minus,
            TokenKind::Asterisk => InfixOperator::Asterisk,
            TokenKind::Slash => InfixOperator::Slash,
            TokenKind::Lt => InfixOperator::Lt,
            TokenKind::Gt => InfixOperator::Gt,
            TokenKind::Eq => InfixOperator::Eq,
            _ => InfixOperator::NotEq,
        };
        let precedence = precedence_of(self.current.kind);
        self.next_token();
        let right = self.parse_expression(precedence)?;
        Some(Expression::Infix {
            left: Box::new(left),
            operator,
            right: Box::new(right),
        })
    }

    fn parse_call_expression(&mut self, function: Expression) -> Option<Expression> {
        let arguments = self.parse_expression_list(TokenKind::RParen)?;
        Some(Expression::Call {
            function: Box::new(function),
            arguments,
        })
    }

    fn parse_index_expression(&mut self, left: Expression) -> Option<Expression> {
        self.next_token();
        let index = self.parse_expression(Precedence::Lowest);
        self.expect_peek(TokenKind::RBracket)?;
        Some(Expression::Index {
            left: Box::new(left),
            index: Box::new(index?),
        })
    }
}

/// Lexes and parses `input`, returning the (possibly partial) program along
/// with every error encountered, in source order.
pub fn parse(input: &str) -> (Program, Vec<ParseError>) {
    let mut parser = Parser::new(Lexer::new(input));
    let program = parser.parse_program();
    (program, parser.into_errors())
}
