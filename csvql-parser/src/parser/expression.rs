use csvql_ast::{
    builtin_function_type, AggregateExpr, AggregateKind, BetweenExpr, BinaryOpExpr,
    BinaryOperator, CastExpr, Expr, FunctionExpr, Identifier, InExpr, LikeExpr, QualifiedAsterisk,
    SymbolInfo, SymbolKind, SymbolTableRef, UnaryOpExpr, UnaryOperator,
};
use csvql_core::{Keyword, Token, Type, Value};

use crate::{error::ParserError, parser::Parser};

/// An identifier or a qualified asterisk, before symbol registration.
pub(crate) enum IdentOrAsterisk {
    /// A possibly qualified identifier.
    Ident {
        /// The table prefix, may be empty.
        prefix: String,
        /// The identifier.
        name: String,
        /// Whether it was double-quoted.
        quoted: bool,
    },
    /// `prefix.*`
    Asterisk {
        /// The table prefix.
        prefix: String,
        /// Whether it was double-quoted.
        quoted: bool,
    },
}

impl Parser {
    /// Parses an expression. The entry point of the precedence ladder, at
    /// the `OR` level.
    pub fn parse_expression(&mut self, scope: &SymbolTableRef) -> Result<Expr, ParserError> {
        let mut lhs = self.parse_and(scope)?;
        while self.parse_keyword(Keyword::OR) {
            let rhs = self.parse_and(scope)?;
            lhs = binary(BinaryOperator::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self, scope: &SymbolTableRef) -> Result<Expr, ParserError> {
        let mut lhs = self.parse_equality(scope)?;
        while self.parse_keyword(Keyword::AND) {
            let rhs = self.parse_equality(scope)?;
            lhs = binary(BinaryOperator::And, lhs, rhs);
        }
        Ok(lhs)
    }

    /// Parses the `= <> LIKE BETWEEN IN IS` level.
    fn parse_equality(&mut self, scope: &SymbolTableRef) -> Result<Expr, ParserError> {
        let mut lhs = self.parse_relation(scope)?;
        loop {
            if self.next_token_if_is(&Token::Equal) {
                let rhs = self.parse_relation(scope)?;
                lhs = binary(BinaryOperator::Eq, lhs, rhs);
            } else if self.next_token_if_is(&Token::NotEqual) {
                let rhs = self.parse_relation(scope)?;
                lhs = binary(BinaryOperator::NotEq, lhs, rhs);
            } else if self.parse_keyword(Keyword::LIKE) {
                let pattern = self.parse_string_literal()?;
                lhs = Expr::Like(LikeExpr {
                    expr: Box::new(lhs),
                    regex: like_pattern_to_regex(&pattern),
                    pattern,
                });
            } else if self.parse_keyword(Keyword::BETWEEN) {
                let low = self.parse_factor(scope)?;
                self.expect_keyword(Keyword::AND)?;
                let high = self.parse_factor(scope)?;
                lhs = Expr::Between(BetweenExpr {
                    expr: Box::new(lhs),
                    low: Box::new(low),
                    high: Box::new(high),
                });
            } else if self.parse_keyword(Keyword::IN) {
                self.expect_token(&Token::LeftParen)?;
                let mut list = vec![];
                while self.peek_token() != Some(&Token::RightParen) {
                    list.push(self.parse_factor(scope)?);
                    if self.next_token_if_is(&Token::Comma)
                        && self.peek_token() == Some(&Token::RightParen)
                    {
                        return self.expected("an expression");
                    }
                }
                self.expect_token(&Token::RightParen)?;
                lhs = Expr::In(InExpr {
                    expr: Box::new(lhs),
                    list,
                });
            } else if self.parse_keyword(Keyword::IS) {
                let op = if self.parse_keyword(Keyword::NOT) {
                    BinaryOperator::IsNot
                } else {
                    BinaryOperator::Is
                };
                let rhs = if self.parse_keyword(Keyword::TRUE) {
                    Value::Boolean(true)
                } else if self.parse_keyword(Keyword::FALSE) {
                    Value::Boolean(false)
                } else if self.parse_keyword(Keyword::NULL)
                    || self.parse_keyword(Keyword::UNKNOWN)
                {
                    Value::Null(Type::Boolean)
                } else {
                    return self.expected("a BOOLEAN value or NULL");
                };
                lhs = binary(op, lhs, Expr::Literal(rhs));
            } else {
                return Ok(lhs);
            }
        }
    }

    fn parse_relation(&mut self, scope: &SymbolTableRef) -> Result<Expr, ParserError> {
        let mut lhs = self.parse_additive(scope)?;
        loop {
            let op = if self.next_token_if_is(&Token::GreaterThan) {
                BinaryOperator::Gt
            } else if self.next_token_if_is(&Token::GreaterThanOrEqual) {
                BinaryOperator::GtEq
            } else if self.next_token_if_is(&Token::LessThan) {
                BinaryOperator::Lt
            } else if self.next_token_if_is(&Token::LessThanOrEqual) {
                BinaryOperator::LtEq
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_additive(scope)?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn parse_additive(&mut self, scope: &SymbolTableRef) -> Result<Expr, ParserError> {
        let mut lhs = self.parse_multiplicative(scope)?;
        loop {
            let op = if self.next_token_if_is(&Token::Plus) {
                BinaryOperator::Add
            } else if self.next_token_if_is(&Token::Minus) {
                BinaryOperator::Subtract
            } else if self.next_token_if_is(&Token::Concat) {
                BinaryOperator::Concat
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_multiplicative(scope)?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn parse_multiplicative(&mut self, scope: &SymbolTableRef) -> Result<Expr, ParserError> {
        let mut lhs = self.parse_factor(scope)?;
        loop {
            let op = if self.next_token_if_is(&Token::Asterisk) {
                BinaryOperator::Multiply
            } else if self.next_token_if_is(&Token::Slash) {
                BinaryOperator::Divide
            } else if self.next_token_if_is(&Token::Percent) {
                BinaryOperator::Modulo
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_factor(scope)?;
            lhs = binary(op, lhs, rhs);
        }
    }

    /// Parses an expression factor: a parenthesized expression, an
    /// identifier or function call, an aggregate call, a literal, a unary
    /// operation or a datetime special.
    pub(crate) fn parse_factor(&mut self, scope: &SymbolTableRef) -> Result<Expr, ParserError> {
        match self.peek_token() {
            Some(Token::LeftParen) => {
                self.next_token();
                let expr = self.parse_expression(scope)?;
                self.expect_token(&Token::RightParen)?;
                Ok(expr)
            }
            Some(Token::Ident(ident)) => {
                if builtin_function_type(&ident.value).is_some() {
                    let name = ident.value.clone();
                    self.next_token();
                    self.parse_function_call(scope, name)
                } else {
                    self.parse_identifier_factor(scope)
                }
            }
            Some(Token::Keyword(keyword, _)) => match *keyword {
                Keyword::SUM
                | Keyword::COUNT
                | Keyword::AVG
                | Keyword::MIN
                | Keyword::MAX
                | Keyword::ARBITRARY => self.parse_aggregate(scope),
                Keyword::TRUE => {
                    self.next_token();
                    Ok(Expr::Literal(Value::Boolean(true)))
                }
                Keyword::FALSE => {
                    self.next_token();
                    Ok(Expr::Literal(Value::Boolean(false)))
                }
                Keyword::NULL => {
                    self.next_token();
                    Ok(Expr::Literal(Value::Null(Type::None)))
                }
                Keyword::NOT => {
                    self.next_token();
                    let expr = self.parse_factor(scope)?;
                    Ok(unary(UnaryOperator::Not, expr))
                }
                Keyword::CAST => {
                    self.next_token();
                    self.expect_token(&Token::LeftParen)?;
                    let expr = self.parse_expression(scope)?;
                    self.expect_keyword(Keyword::AS)?;
                    let (target, _) = self.parse_type()?;
                    self.expect_token(&Token::RightParen)?;
                    Ok(Expr::Cast(CastExpr {
                        expr: Box::new(expr),
                        target,
                    }))
                }
                Keyword::DATE => self.parse_datetime_literal(Type::Date),
                Keyword::TIME => self.parse_datetime_literal(Type::Time),
                Keyword::TIMESTAMP => self.parse_datetime_literal(Type::Timestamp),
                Keyword::CURRENT_DATE | Keyword::CURRENT_TIME | Keyword::CURRENT_TIMESTAMP => {
                    let name = match keyword {
                        Keyword::CURRENT_DATE => "CURRENT_DATE",
                        Keyword::CURRENT_TIME => "CURRENT_TIME",
                        _ => "CURRENT_TIMESTAMP",
                    };
                    self.next_token();
                    // an optional empty argument list
                    if self.next_token_if_is(&Token::LeftParen) {
                        self.expect_token(&Token::RightParen)?;
                    }
                    Ok(Expr::Function(FunctionExpr {
                        name: name.into(),
                        args: vec![],
                        ty: builtin_function_type(name).unwrap(),
                    }))
                }
                Keyword::EXTRACT => self.parse_extract(scope),
                _ => self.expected("an expression"),
            },
            Some(Token::Number(_)) => {
                let number = match self.next_token() {
                    Some(Token::Number(number)) => number,
                    _ => unreachable!(),
                };
                self.parse_number_literal(&number)
            }
            Some(Token::String(_)) => {
                let value = match self.next_token() {
                    Some(Token::String(value)) => value,
                    _ => unreachable!(),
                };
                Ok(Expr::Literal(Value::String(value)))
            }
            Some(Token::Char(_)) => {
                let value = match self.next_token() {
                    Some(Token::Char(value)) => value,
                    _ => unreachable!(),
                };
                Ok(Expr::Literal(Value::String(value.to_string())))
            }
            Some(Token::Minus) => {
                self.next_token();
                let expr = self.parse_factor(scope)?;
                Ok(unary(UnaryOperator::Minus, expr))
            }
            Some(Token::Plus) => {
                self.next_token();
                let expr = self.parse_factor(scope)?;
                Ok(unary(UnaryOperator::Plus, expr))
            }
            _ => self.expected("an expression"),
        }
    }

    /// Parses an identifier or qualified asterisk factor, registering a
    /// plain symbol for identifiers on first sight.
    fn parse_identifier_factor(&mut self, scope: &SymbolTableRef) -> Result<Expr, ParserError> {
        match self.parse_qualified_identifier_or_asterisk()? {
            IdentOrAsterisk::Asterisk { prefix, quoted } => {
                Ok(Expr::QualifiedAsterisk(QualifiedAsterisk { prefix, quoted }))
            }
            IdentOrAsterisk::Ident {
                prefix,
                name,
                quoted,
            } => Ok(Expr::Identifier(self.register_identifier(
                scope, prefix, name, quoted,
            ))),
        }
    }

    /// Builds an [`Identifier`], registering a plain symbol under the
    /// qualified name unless one exists already.
    pub(crate) fn register_identifier(
        &mut self,
        scope: &SymbolTableRef,
        prefix: String,
        name: String,
        quoted: bool,
    ) -> Identifier {
        let symbol_name = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };
        if !scope.borrow().has_symbol(&symbol_name) {
            let mut info = SymbolInfo::new(symbol_name.clone(), SymbolKind::Plain);
            info.prefix = prefix.clone();
            info.identifier = name.clone();
            scope.borrow_mut().add_symbol(info.into_ref());
        }
        let info = scope
            .borrow()
            .find_symbol(&symbol_name)
            .expect("symbol was just registered");
        Identifier {
            prefix,
            identifier: name,
            quoted,
            info,
        }
    }

    /// Parses `name(arg, ...)` for a known scalar function.
    fn parse_function_call(
        &mut self,
        scope: &SymbolTableRef,
        name: String,
    ) -> Result<Expr, ParserError> {
        self.expect_token(&Token::LeftParen)?;
        let mut args = vec![];
        while self.peek_token() != Some(&Token::RightParen) {
            args.push(self.parse_expression(scope)?);
            self.next_token_if_is(&Token::Comma);
        }
        self.expect_token(&Token::RightParen)?;

        if !scope.borrow().has_symbol(&name) {
            scope
                .borrow_mut()
                .add_symbol(SymbolInfo::new(name.clone(), SymbolKind::Function).into_ref());
        }
        let ty = builtin_function_type(&name).expect("caller checked the function name");
        Ok(Expr::Function(FunctionExpr { name, args, ty }))
    }

    /// Parses `EXTRACT(<field> FROM <expr>)` into a call of the `EXTRACT`
    /// function with the field encoded as 1 = SECOND up to 6 = YEAR.
    fn parse_extract(&mut self, scope: &SymbolTableRef) -> Result<Expr, ParserError> {
        self.expect_keyword(Keyword::EXTRACT)?;
        self.expect_token(&Token::LeftParen)?;
        let field = match self.parse_one_of_keywords(&[
            Keyword::SECOND,
            Keyword::MINUTE,
            Keyword::HOUR,
            Keyword::DAY,
            Keyword::MONTH,
            Keyword::YEAR,
        ]) {
            Some(Keyword::SECOND) => 1,
            Some(Keyword::MINUTE) => 2,
            Some(Keyword::HOUR) => 3,
            Some(Keyword::DAY) => 4,
            Some(Keyword::MONTH) => 5,
            Some(Keyword::YEAR) => 6,
            _ => return self.expected("SECOND/MINUTE/HOUR/DAY/MONTH/YEAR"),
        };
        self.expect_keyword(Keyword::FROM)?;
        let expr = self.parse_expression(scope)?;
        self.expect_token(&Token::RightParen)?;
        Ok(Expr::Function(FunctionExpr {
            name: "EXTRACT".into(),
            args: vec![Expr::Literal(Value::Int(field)), expr],
            ty: Type::Int,
        }))
    }

    fn parse_aggregate(&mut self, scope: &SymbolTableRef) -> Result<Expr, ParserError> {
        let mut kind = match self.parse_one_of_keywords(&[
            Keyword::SUM,
            Keyword::COUNT,
            Keyword::AVG,
            Keyword::MIN,
            Keyword::MAX,
            Keyword::ARBITRARY,
        ]) {
            Some(Keyword::SUM) => AggregateKind::Sum,
            Some(Keyword::COUNT) => AggregateKind::Count,
            Some(Keyword::AVG) => AggregateKind::Avg,
            Some(Keyword::MIN) => AggregateKind::Min,
            Some(Keyword::MAX) => AggregateKind::Max,
            Some(Keyword::ARBITRARY) => AggregateKind::Arbitrary,
            _ => return self.expected("an aggregate function"),
        };
        self.expect_token(&Token::LeftParen)?;
        let mut expr = None;
        if kind == AggregateKind::Count && self.next_token_if_is(&Token::Asterisk) {
            kind = AggregateKind::CountStar;
        }
        if kind != AggregateKind::CountStar {
            // the quantifier is accepted but has no effect on evaluation
            if !self.parse_keyword(Keyword::DISTINCT) {
                self.parse_keyword(Keyword::ALL);
            }
            expr = Some(Box::new(self.parse_expression(scope)?));
        }
        self.expect_token(&Token::RightParen)?;
        Ok(Expr::Aggregate(AggregateExpr { kind, expr }))
    }

    fn parse_datetime_literal(&mut self, ty: Type) -> Result<Expr, ParserError> {
        self.next_token(); // consume the type keyword
        let text = self.parse_string_literal()?;
        match Value::parse_typed(&text, ty) {
            Ok(value) => Ok(Expr::Literal(value)),
            Err(err) => self.expected(format!("a valid {} literal ({})", ty, err)),
        }
    }

    fn parse_number_literal(&mut self, number: &str) -> Result<Expr, ParserError> {
        if number.contains('.') {
            match number.parse::<f64>() {
                Ok(real) => Ok(Expr::Literal(Value::Real(real))),
                Err(_) => self.expected("a real literal"),
            }
        } else {
            match number.parse::<i64>() {
                Ok(int) => Ok(Expr::Literal(Value::Int(int))),
                Err(_) => self.expected("an integer literal"),
            }
        }
    }

    /// Parses a string literal; a single-character literal counts.
    pub(crate) fn parse_string_literal(&mut self) -> Result<String, ParserError> {
        match self.peek_token() {
            Some(Token::String(_)) => match self.next_token() {
                Some(Token::String(value)) => Ok(value),
                _ => unreachable!(),
            },
            Some(Token::Char(_)) => match self.next_token() {
                Some(Token::Char(value)) => Ok(value.to_string()),
                _ => unreachable!(),
            },
            _ => self.expected("a string literal"),
        }
    }

    /// Parses an identifier, quoted or not. Returns the (upper-cased) text
    /// and whether it was quoted.
    pub(crate) fn parse_quoted_identifier(&mut self) -> Result<(String, bool), ParserError> {
        match self.peek_token() {
            Some(Token::Ident(_)) => match self.next_token() {
                Some(Token::Ident(ident)) => Ok((ident.value, ident.quoted)),
                _ => unreachable!(),
            },
            _ => self.expected("an identifier"),
        }
    }

    /// Parses `[prefix.]identifier` or `[prefix.]*`.
    pub(crate) fn parse_qualified_identifier_or_asterisk(
        &mut self,
    ) -> Result<IdentOrAsterisk, ParserError> {
        let (mut name, mut quoted) = self.parse_quoted_identifier()?;
        let mut prefix = String::new();
        if self.next_token_if_is(&Token::Period) {
            prefix = name;
            if self.next_token_if_is(&Token::Asterisk) {
                return Ok(IdentOrAsterisk::Asterisk { prefix, quoted });
            }
            let (n, q) = self.parse_quoted_identifier()?;
            name = n;
            quoted = q;
        }
        Ok(IdentOrAsterisk::Ident {
            prefix,
            name,
            quoted,
        })
    }

    /// Parses `[prefix.]identifier`.
    pub(crate) fn parse_qualified_identifier_parts(
        &mut self,
    ) -> Result<(String, String, bool), ParserError> {
        match self.parse_qualified_identifier_or_asterisk()? {
            IdentOrAsterisk::Ident {
                prefix,
                name,
                quoted,
            } => Ok((prefix, name, quoted)),
            IdentOrAsterisk::Asterisk { .. } => self.expected("an identifier"),
        }
    }

    /// Parses a type name, returning the type and the declared length for
    /// string types (0 when none was given).
    pub(crate) fn parse_type(&mut self) -> Result<(Type, u32), ParserError> {
        let keyword = match self.parse_one_of_keywords(&[
            Keyword::BOOL,
            Keyword::BOOLEAN,
            Keyword::INT,
            Keyword::INTEGER,
            Keyword::REAL,
            Keyword::STRING,
            Keyword::CHAR,
            Keyword::CHARACTER,
            Keyword::DATE,
            Keyword::TIME,
            Keyword::TIMESTAMP,
        ]) {
            Some(keyword) => keyword,
            None => return self.expected("a type"),
        };
        match keyword {
            Keyword::BOOL | Keyword::BOOLEAN => Ok((Type::Boolean, 0)),
            Keyword::INT | Keyword::INTEGER => Ok((Type::Int, 0)),
            Keyword::REAL => Ok((Type::Real, 0)),
            Keyword::STRING => {
                let length = self.parse_optional_length()?;
                Ok((Type::String, length))
            }
            Keyword::CHAR | Keyword::CHARACTER => {
                // CHAR, CHAR(n) and CHAR VARYING(n) all map to strings
                if self.parse_keyword(Keyword::VARYING) {
                    self.expect_token(&Token::LeftParen)?;
                    let length = self.parse_length()?;
                    self.expect_token(&Token::RightParen)?;
                    Ok((Type::String, length))
                } else {
                    let length = self.parse_optional_length()?;
                    Ok((Type::String, length))
                }
            }
            Keyword::DATE => Ok((Type::Date, 0)),
            Keyword::TIME => Ok((Type::Time, 0)),
            Keyword::TIMESTAMP => Ok((Type::Timestamp, 0)),
            _ => unreachable!(),
        }
    }

    fn parse_optional_length(&mut self) -> Result<u32, ParserError> {
        if self.next_token_if_is(&Token::LeftParen) {
            let length = self.parse_length()?;
            self.expect_token(&Token::RightParen)?;
            Ok(length)
        } else {
            Ok(0)
        }
    }

    fn parse_length(&mut self) -> Result<u32, ParserError> {
        match self.peek_token() {
            Some(Token::Number(_)) => {
                let number = match self.next_token() {
                    Some(Token::Number(number)) => number,
                    _ => unreachable!(),
                };
                number
                    .parse::<u32>()
                    .map_err(|_| ParserError::Parse(format!("invalid length '{}'", number)))
            }
            _ => self.expected("a length"),
        }
    }

    /// Parses a constant for a DEFAULT clause.
    pub(crate) fn parse_literal_value(&mut self) -> Result<Value, ParserError> {
        match self.peek_token() {
            Some(Token::Number(_)) => {
                let number = match self.next_token() {
                    Some(Token::Number(number)) => number,
                    _ => unreachable!(),
                };
                match self.parse_number_literal(&number)? {
                    Expr::Literal(value) => Ok(value),
                    _ => unreachable!(),
                }
            }
            Some(Token::String(_)) | Some(Token::Char(_)) => {
                Ok(Value::String(self.parse_string_literal()?))
            }
            Some(Token::Keyword(Keyword::TRUE, _)) => {
                self.next_token();
                Ok(Value::Boolean(true))
            }
            Some(Token::Keyword(Keyword::FALSE, _)) => {
                self.next_token();
                Ok(Value::Boolean(false))
            }
            Some(Token::Keyword(Keyword::DATE, _)) => self.parse_datetime_value(Type::Date),
            Some(Token::Keyword(Keyword::TIME, _)) => self.parse_datetime_value(Type::Time),
            Some(Token::Keyword(Keyword::TIMESTAMP, _)) => {
                self.parse_datetime_value(Type::Timestamp)
            }
            _ => self.expected("a constant"),
        }
    }

    fn parse_datetime_value(&mut self, ty: Type) -> Result<Value, ParserError> {
        match self.parse_datetime_literal(ty)? {
            Expr::Literal(value) => Ok(value),
            _ => unreachable!(),
        }
    }
}

fn binary(op: BinaryOperator, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary(BinaryOpExpr {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    })
}

fn unary(op: UnaryOperator, expr: Expr) -> Expr {
    Expr::Unary(UnaryOpExpr {
        op,
        expr: Box::new(expr),
    })
}

/// Translates a SQL LIKE pattern to a regular expression: `%` matches any
/// sequence, `_` any single character; the regex metacharacters `. * ? ( )`
/// are escaped.
pub(crate) fn like_pattern_to_regex(pattern: &str) -> String {
    let mut regex = String::new();
    for c in pattern.chars() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            '.' | '*' | '?' | '(' | ')' => {
                regex.push('\\');
                regex.push(c);
            }
            c => regex.push(c),
        }
    }
    regex
}
