mod expression;
mod query;
mod statement;

use core::fmt::Display;

use csvql_ast::Statement;
use csvql_core::{Keyword, LocatedToken, Token};
use csvql_lexer::Lexer;

use crate::error::{parse_error, ParserError};

/// SQL Parser
///
/// A recursive-descent parser with one token of lookahead. Parsing a query
/// also builds the symbol table of every query scope.
pub struct Parser {
    tokens: Vec<LocatedToken>,
    index: usize,
}

impl Parser {
    /// Creates a new SQL parser with the given tokens.
    pub fn new_with_tokens(tokens: Vec<LocatedToken>) -> Self {
        Self { tokens, index: 0 }
    }

    /// Creates a new SQL parser for the given sql string.
    pub fn new_with_sql(sql: &str) -> Result<Self, ParserError> {
        let tokens = Lexer::new(sql).tokenize()?;
        Ok(Self::new_with_tokens(tokens))
    }

    /// Parses one statement and expects the input to end after it. An
    /// optional trailing semicolon is consumed.
    pub fn parse_statement(&mut self) -> Result<Statement, ParserError> {
        let statement = match self.peek_token() {
            Some(Token::Keyword(Keyword::SELECT, _)) | Some(Token::LeftParen) => {
                Statement::Query(self.parse_query()?)
            }
            Some(Token::Keyword(Keyword::CREATE, _)) => {
                self.next_token();
                if self.parse_keyword(Keyword::TABLE) {
                    Statement::CreateTable(self.parse_create_table()?)
                } else if self.parse_keyword(Keyword::MAPPING) {
                    Statement::CreateMapping(self.parse_create_mapping()?)
                } else {
                    return self.expected("TABLE or MAPPING");
                }
            }
            Some(Token::Keyword(Keyword::DROP, _)) => {
                self.next_token();
                if self.parse_keyword(Keyword::TABLE) {
                    Statement::DropTable(self.parse_drop_table()?)
                } else if self.parse_keyword(Keyword::MAPPING) {
                    Statement::DropMapping(self.parse_drop_mapping()?)
                } else {
                    return self.expected("TABLE or MAPPING");
                }
            }
            Some(Token::Keyword(Keyword::ALTER, _)) => {
                self.next_token();
                self.parse_alter_table()?
            }
            Some(Token::Keyword(Keyword::EXPLAIN, _)) => {
                self.next_token();
                Statement::Explain(self.parse_explain()?)
            }
            _ => return self.expected("a statement"),
        };
        self.next_token_if_is(&Token::SemiColon);
        if self.peek_token().is_some() {
            return self.expected("the end of the statement");
        }
        Ok(statement)
    }

    /// Reports an unexpected token, with its text and location.
    pub(crate) fn expected<R>(&self, expected: impl Display) -> Result<R, ParserError> {
        match self.tokens.get(self.index) {
            Some(found) => parse_error(format!(
                "Expected: {}, found: '{}' at line {}, column {}",
                expected, found.token, found.location.line, found.location.column
            )),
            None => parse_error(format!("Expected: {}, but reached the end of the input", expected)),
        }
    }

    /// Consumes the next keyword token and returns ok if it matches the
    /// expected keyword, otherwise returns an error.
    pub(crate) fn expect_keyword(&mut self, expected: Keyword) -> Result<(), ParserError> {
        if self.parse_keyword(expected) {
            Ok(())
        } else {
            self.expected(expected)
        }
    }

    /// Consumes the next keyword token and returns true if it matches the
    /// expected keyword, otherwise returns false.
    pub(crate) fn parse_keyword(&mut self, keyword: Keyword) -> bool {
        self.next_token_if(|token| token.is_keyword(keyword)).is_some()
    }

    /// Consumes the next keyword token if the token is one of the expected
    /// keywords.
    pub(crate) fn parse_one_of_keywords(&mut self, keywords: &[Keyword]) -> Option<Keyword> {
        let keyword = self.peek_token().and_then(|token| token.is_one_of_keywords(keywords))?;
        self.next_token();
        Some(keyword)
    }

    /// Consumes the next token and returns ok if it matches the expected
    /// token, otherwise returns an error.
    pub(crate) fn expect_token(&mut self, expected: &Token) -> Result<(), ParserError> {
        if self.next_token_if_is(expected) {
            Ok(())
        } else {
            self.expected(expected)
        }
    }

    /// Returns a reference to the next token without advancing.
    pub(crate) fn peek_token(&self) -> Option<&Token> {
        self.tokens.get(self.index).map(|located| &located.token)
    }

    /// Consumes the next token and returns it.
    pub(crate) fn next_token(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).map(|located| located.token.clone());
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    /// Consumes the next token and returns it if `func` returns true.
    pub(crate) fn next_token_if(&mut self, func: impl FnOnce(&Token) -> bool) -> Option<Token> {
        match self.peek_token() {
            Some(token) if func(token) => self.next_token(),
            _ => None,
        }
    }

    /// Consumes the next token and returns true if it matches the expected
    /// token, otherwise returns false.
    pub(crate) fn next_token_if_is(&mut self, expected: &Token) -> bool {
        self.next_token_if(|token| token == expected).is_some()
    }
}
