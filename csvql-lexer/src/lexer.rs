use core::{iter::Peekable, str::Chars};

use csvql_core::{LexicalError, LocatedToken, Location, Token};

/// SQL Lexer
pub struct Lexer<'a> {
    iter: Peekable<Chars<'a>>,
    location: Location,
}

impl<'a> Lexer<'a> {
    /// Creates a new SQL lexer for the given input string.
    pub fn new(input: &'a str) -> Self {
        Self {
            iter: input.chars().peekable(),
            location: Location::default(),
        }
    }

    /// Returns the current location scanned by the lexer.
    pub fn location(&self) -> Location {
        self.location
    }

    /// Tokenizes the statement and produces a sequence of tokens. Whitespace
    /// and comments are skipped.
    pub fn tokenize(&mut self) -> Result<Vec<LocatedToken>, LexicalError> {
        let mut tokens = vec![];
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Option<LocatedToken>, LexicalError> {
        loop {
            let location = self.location;
            let token = match self.iter.peek() {
                Some(&ch) => match ch {
                    ' ' | '\t' | '\n' | '\r' => {
                        self.next_char();
                        continue;
                    }
                    '\'' => {
                        self.next_char(); // consume the open quote
                        let s = self.tokenize_string_literal()?;
                        let mut chars = s.chars();
                        match (chars.next(), chars.next()) {
                            (Some(c), None) => Some(Token::Char(c)),
                            _ => Some(Token::String(s)),
                        }
                    }
                    '"' => {
                        self.next_char(); // consume the open quote
                        let ident = self.tokenize_delimited_ident()?;
                        Some(Token::ident(ident.to_uppercase(), true))
                    }
                    ch if ch.is_ascii_alphabetic() => {
                        self.next_char();
                        let ident = self.tokenize_ident(ch);
                        // keywords win over plain identifiers
                        Some(
                            Token::keyword(&ident)
                                .unwrap_or_else(|| Token::ident(ident.to_uppercase(), false)),
                        )
                    }
                    ch if ch.is_ascii_digit() || ch == '.' => self.tokenize_number(),
                    _ => match self.tokenize_symbol()? {
                        Some(token) => Some(token),
                        // a comment was skipped, try again
                        None => continue,
                    },
                },
                None => return Ok(None),
            };
            return Ok(token.map(|token| LocatedToken { token, location }));
        }
    }

    /// Reads a string literal after the open quote was consumed. A doubled
    /// quote (`''`) is the escape for an embedded quote.
    fn tokenize_string_literal(&mut self) -> Result<String, LexicalError> {
        let mut s = String::new();
        loop {
            s += &self.next_while(|&ch| ch != '\'');
            match self.next_char() {
                Some('\'') => {
                    if self.next_if_is('\'') {
                        s.push('\'');
                    } else {
                        return Ok(s);
                    }
                }
                _ => return self.tokenize_error("Unterminated string literal"),
            }
        }
    }

    fn tokenize_delimited_ident(&mut self) -> Result<String, LexicalError> {
        let s = self.next_while(|&ch| ch != '"');
        // consume the close quote.
        if self.next_if_is('"') {
            Ok(s)
        } else {
            self.tokenize_error("Expected close delimiter '\"' before EOF")
        }
    }

    fn tokenize_ident(&mut self, first: char) -> String {
        let mut ident = first.to_string();
        let rest = self.next_while(|&ch| ch.is_ascii_alphanumeric() || ch == '_');
        ident.push_str(&rest);
        ident
    }

    fn tokenize_number(&mut self) -> Option<Token> {
        let mut s = self.next_while(|ch| ch.is_ascii_digit());

        // match one period
        if self.next_if_is('.') {
            s.push('.');
        }
        s += &self.next_while(|ch| ch.is_ascii_digit());

        // no number -> Token::Period
        if s == "." {
            return Some(Token::Period);
        }
        Some(Token::Number(s))
    }

    /// Tokenizes a symbol. Returns `Ok(None)` when a comment was consumed.
    fn tokenize_symbol(&mut self) -> Result<Option<Token>, LexicalError> {
        let location = self.location;
        let ch = self.next_char().expect("symbol character peeked");
        let token = match ch {
            ',' => Token::Comma,
            ';' => Token::SemiColon,
            '(' => Token::LeftParen,
            ')' => Token::RightParen,
            '=' => Token::Equal,
            '+' => Token::Plus,
            '%' => Token::Percent,
            '*' => Token::Asterisk,
            '<' => {
                if self.next_if_is('>') {
                    Token::NotEqual
                } else if self.next_if_is('=') {
                    Token::LessThanOrEqual
                } else {
                    Token::LessThan
                }
            }
            '>' => {
                if self.next_if_is('=') {
                    Token::GreaterThanOrEqual
                } else {
                    Token::GreaterThan
                }
            }
            '-' => {
                if self.next_if_is('-') {
                    self.skip_single_line_comment();
                    return Ok(None);
                }
                Token::Minus
            }
            '/' => {
                if self.next_if_is('*') {
                    self.skip_multi_line_comment()?;
                    return Ok(None);
                }
                Token::Slash
            }
            '|' => {
                if self.next_if_is('|') {
                    Token::Concat
                } else {
                    return Err(location.into_error("No token definition matches '|'"));
                }
            }
            other => {
                return Err(
                    location.into_error(format!("No token definition matches '{}'", other))
                );
            }
        };
        Ok(Some(token))
    }

    fn skip_single_line_comment(&mut self) {
        self.next_while(|&ch| ch != '\n');
        self.next_char();
    }

    /// Skips a multi-line comment; comments nest.
    fn skip_multi_line_comment(&mut self) -> Result<(), LexicalError> {
        let mut nested = 1;
        loop {
            match self.next_char() {
                Some('*') if self.next_if_is('/') => {
                    nested -= 1;
                    if nested == 0 {
                        return Ok(());
                    }
                }
                Some('/') if self.next_if_is('*') => nested += 1,
                Some(_) => {}
                None => {
                    return self.tokenize_error("Unexpected EOF while in a multi-line comment");
                }
            }
        }
    }

    fn tokenize_error<R>(&self, message: impl Into<String>) -> Result<R, LexicalError> {
        Err(self.location.into_error(message))
    }

    /// Consumes the next character and records the current location.
    fn next_char(&mut self) -> Option<char> {
        if let Some(ch) = self.iter.next() {
            self.location.advance(ch);
            Some(ch)
        } else {
            None
        }
    }

    /// Consumes the next character if it matches `ch` and returns true if it
    /// matches.
    #[inline]
    fn next_if_is(&mut self, ch: char) -> bool {
        if self.iter.next_if_eq(&ch).is_some() {
            self.location.advance(ch);
            true
        } else {
            false
        }
    }

    /// Grabs the next characters that match the predicate, as a string.
    fn next_while<F: Fn(&char) -> bool>(&mut self, predicate: F) -> String {
        let mut value = String::new();
        while let Some(ch) = self.iter.next_if(&predicate) {
            self.location.advance(ch);
            value.push(ch);
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csvql_core::Keyword;

    macro_rules! tokenize {
        ($input:expr, $expected:expr) => {{
            let mut lexer = Lexer::new($input);
            let got = lexer
                .tokenize()
                .map(|tokens| tokens.into_iter().map(|t| t.token).collect::<Vec<_>>());
            assert_eq!(got, $expected);
        }};
    }

    #[test]
    fn tokenize_whitespace_and_comments() {
        tokenize!(
            "1 -- line comment\n 2 /* block /* nested */ comment */ 3",
            Ok(vec![
                Token::Number("1".into()),
                Token::Number("2".into()),
                Token::Number("3".into()),
            ])
        );
    }

    #[test]
    fn tokenize_number_literal() {
        tokenize!(
            "4711 47.11 .5 0.",
            Ok(vec![
                Token::Number("4711".into()),
                Token::Number("47.11".into()),
                Token::Number(".5".into()),
                Token::Number("0.".into()),
            ])
        );
    }

    #[test]
    fn tokenize_string_literal() {
        tokenize!("'hello'", Ok(vec![Token::String("hello".into())]));
        tokenize!("''", Ok(vec![Token::String("".into())]));
        // a single character becomes a char literal
        tokenize!(";','", Ok(vec![Token::SemiColon, Token::Char(',')]));
        // doubled quote is the escape for an embedded quote
        tokenize!(
            "'it''s null'",
            Ok(vec![Token::String("it's null".into())])
        );
        tokenize!(
            "select 'foo",
            Err(Location {
                line: 1,
                column: 12
            }
            .into_error("Unterminated string literal"))
        );
    }

    #[test]
    fn tokenize_idents_fold_to_upper_case() {
        tokenize!(
            "employees emp \"max birthdate\"",
            Ok(vec![
                Token::ident("EMPLOYEES", false),
                Token::ident("EMP", false),
                Token::ident("MAX BIRTHDATE", true),
            ])
        );
    }

    #[test]
    fn tokenize_keywords() {
        tokenize!(
            "select distinct from",
            Ok(vec![
                Token::Keyword(Keyword::SELECT, "SELECT"),
                Token::Keyword(Keyword::DISTINCT, "DISTINCT"),
                Token::Keyword(Keyword::FROM, "FROM"),
            ])
        );
    }

    #[test]
    fn tokenize_comparison_and_concat() {
        tokenize!(
            "a <> b <= c >= d || e",
            Ok(vec![
                Token::ident("A", false),
                Token::NotEqual,
                Token::ident("B", false),
                Token::LessThanOrEqual,
                Token::ident("C", false),
                Token::GreaterThanOrEqual,
                Token::ident("D", false),
                Token::Concat,
                Token::ident("E", false),
            ])
        );
    }

    #[test]
    fn tokenize_simple_select() {
        tokenize!(
            "SELECT * FROM employees WHERE id = 815;",
            Ok(vec![
                Token::Keyword(Keyword::SELECT, "SELECT"),
                Token::Asterisk,
                Token::Keyword(Keyword::FROM, "FROM"),
                Token::ident("EMPLOYEES", false),
                Token::Keyword(Keyword::WHERE, "WHERE"),
                Token::ident("ID", false),
                Token::Equal,
                Token::Number("815".into()),
                Token::SemiColon,
            ])
        );
    }

    #[test]
    fn unknown_character_is_a_lexical_error() {
        let mut lexer = Lexer::new("select ^");
        let err = lexer.tokenize().unwrap_err();
        assert_eq!(err.line, 1);
        assert_eq!(err.column, 8);
    }

    #[test]
    fn locations_are_tracked() {
        let mut lexer = Lexer::new("select\n  id");
        let tokens = lexer.tokenize().unwrap();
        assert_eq!(tokens[0].location, Location { line: 1, column: 1 });
        assert_eq!(tokens[1].location, Location { line: 2, column: 3 });
    }
}
