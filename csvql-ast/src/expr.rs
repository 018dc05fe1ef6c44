use core::fmt;

use csvql_core::{Type, Value};

use crate::{
    error::SemanticError,
    operator::{BinaryOperator, UnaryOperator},
    symbol::SymbolRef,
    utils::{display_comma_separated, escape_single_quote_string},
};

/// SQL expression type.
#[derive(Clone, Debug)]
pub enum Expr {
    /// A literal value, such as a string, a number or a date.
    Literal(Value),
    /// Identifier, e.g. a column name, optionally qualified with a table
    /// name or alias.
    Identifier(Identifier),
    /// Qualified wildcard, e.g. `emp.*`, or the unqualified `*`.
    QualifiedAsterisk(QualifiedAsterisk),
    /// Unary operation, e.g. `NOT active` or `-1`.
    Unary(UnaryOpExpr),
    /// CAST an expression to a different type, e.g. `CAST(id AS REAL)`.
    Cast(CastExpr),
    /// Binary operation, e.g. `1 + 1` or `id > 100`.
    Binary(BinaryOpExpr),
    /// `<expr> LIKE 'pattern'`.
    Like(LikeExpr),
    /// `<expr> BETWEEN <low> AND <high>`.
    Between(BetweenExpr),
    /// `<expr> IN (val1, val2, ...)`.
    In(InExpr),
    /// Scalar function call, e.g. `UPPER(last_name)`.
    Function(FunctionExpr),
    /// Aggregate function call, e.g. `COUNT(id)` or `COUNT(*)`.
    Aggregate(AggregateExpr),
}

impl Expr {
    /// Infers the type of the expression. Identifiers read the type resolved
    /// into their symbol, so the enclosing symbol table has to be typed
    /// first.
    pub fn type_of(&self) -> Result<Type, SemanticError> {
        match self {
            Expr::Literal(value) => Ok(value.ty()),
            Expr::Identifier(ident) => Ok(ident.info.borrow().ty),
            Expr::QualifiedAsterisk(_) => Ok(Type::None),
            Expr::Unary(unary) => unary.type_of(),
            Expr::Cast(cast) => Ok(cast.target),
            Expr::Binary(binary) => binary.type_of(),
            Expr::Like(like) => {
                let ty = like.expr.type_of()?;
                if ty != Type::String {
                    return Err(SemanticError::TypeMismatch(format!(
                        "LIKE needs a string operand, not {}",
                        ty
                    )));
                }
                Ok(Type::Boolean)
            }
            Expr::Between(between) => between.type_of(),
            Expr::In(in_expr) => in_expr.type_of(),
            Expr::Function(function) => Ok(function.ty),
            Expr::Aggregate(aggregate) => aggregate.type_of(),
        }
    }

    /// Collects all identifiers referenced by the expression, deduplicated
    /// by their qualified name and sorted for a stable variable order.
    pub fn collect_identifiers(&self) -> Vec<Identifier> {
        fn walk(expr: &Expr, out: &mut Vec<Identifier>) {
            match expr {
                Expr::Literal(_) | Expr::QualifiedAsterisk(_) => {}
                Expr::Identifier(ident) => out.push(ident.clone()),
                Expr::Unary(unary) => walk(&unary.expr, out),
                Expr::Cast(cast) => walk(&cast.expr, out),
                Expr::Binary(binary) => {
                    walk(&binary.lhs, out);
                    walk(&binary.rhs, out);
                }
                Expr::Like(like) => walk(&like.expr, out),
                Expr::Between(between) => {
                    walk(&between.expr, out);
                    walk(&between.low, out);
                    walk(&between.high, out);
                }
                Expr::In(in_expr) => {
                    walk(&in_expr.expr, out);
                    for item in &in_expr.list {
                        walk(item, out);
                    }
                }
                Expr::Function(function) => {
                    for arg in &function.args {
                        walk(arg, out);
                    }
                }
                Expr::Aggregate(aggregate) => {
                    if let Some(arg) = &aggregate.expr {
                        walk(arg, out);
                    }
                }
            }
        }

        let mut identifiers = vec![];
        walk(self, &mut identifiers);
        identifiers.sort_by(|a, b| a.qualified_identifier().cmp(&b.qualified_identifier()));
        identifiers.dedup_by(|a, b| a.qualified_identifier() == b.qualified_identifier());
        identifiers
    }

    /// Returns true if the expression is an aggregate function call.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Expr::Aggregate(_))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Literal(value) => write!(f, "{}", display_literal(value)),
            Self::Identifier(ident) => write!(f, "{}", ident),
            Self::QualifiedAsterisk(asterisk) => write!(f, "{}", asterisk),
            Self::Unary(expr) => write!(f, "{}", expr),
            Self::Cast(expr) => write!(f, "{}", expr),
            Self::Binary(expr) => write!(f, "{}", expr),
            Self::Like(expr) => write!(f, "{}", expr),
            Self::Between(expr) => write!(f, "{}", expr),
            Self::In(expr) => write!(f, "{}", expr),
            Self::Function(expr) => write!(f, "{}", expr),
            Self::Aggregate(expr) => write!(f, "{}", expr),
        }
    }
}

/// Renders a value in its SQL literal form (as opposed to the output stream
/// form): strings are quoted and escaped, date/time values carry their type
/// prefix.
pub(crate) fn display_literal(value: &Value) -> impl fmt::Display + '_ {
    struct Literal<'a>(&'a Value);

    impl<'a> fmt::Display for Literal<'a> {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            match self.0 {
                Value::Null(_) => f.write_str("NULL"),
                Value::Boolean(true) => f.write_str("TRUE"),
                Value::Boolean(false) => f.write_str("FALSE"),
                Value::Int(i) => write!(f, "{}", i),
                Value::Real(r) => write!(f, "{:?}", r),
                Value::String(s) => write!(f, "'{}'", escape_single_quote_string(s)),
                Value::Date(_) => write!(f, "DATE'{}'", self.0),
                Value::Time(_) => write!(f, "TIME'{}'", self.0),
                Value::Timestamp(_) => write!(f, "TIMESTAMP'{}'", self.0),
            }
        }
    }

    Literal(value)
}

/// An identifier with its resolved symbol.
#[derive(Clone, Debug)]
pub struct Identifier {
    /// Optional table name or alias prefix.
    pub prefix: String,
    /// The identifier itself.
    pub identifier: String,
    /// Whether the identifier was written double-quoted.
    pub quoted: bool,
    /// The symbol this identifier resolves through.
    pub info: SymbolRef,
}

impl Identifier {
    /// Returns `prefix.identifier`, or just the identifier without a prefix.
    pub fn qualified_identifier(&self) -> String {
        if self.prefix.is_empty() {
            self.identifier.clone()
        } else {
            format!("{}.{}", self.prefix, self.identifier)
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if !self.prefix.is_empty() {
            write!(f, "{}.", self.prefix)?;
        }
        if self.quoted {
            write!(f, "\"{}\"", self.identifier)
        } else {
            f.write_str(&self.identifier)
        }
    }
}

/// Qualified wildcard, e.g. `emp.*`; an empty prefix is the plain `*`.
#[derive(Clone, Debug)]
pub struct QualifiedAsterisk {
    /// Optional table name or alias prefix.
    pub prefix: String,
    /// Whether the prefix was written double-quoted.
    pub quoted: bool,
}

impl fmt::Display for QualifiedAsterisk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.prefix.is_empty() {
            f.write_str("*")
        } else {
            write!(f, "{}.*", self.prefix)
        }
    }
}

/// Unary operation, e.g. `NOT active`.
#[derive(Clone, Debug)]
pub struct UnaryOpExpr {
    /// The operator.
    pub op: UnaryOperator,
    /// The operand.
    pub expr: Box<Expr>,
}

impl UnaryOpExpr {
    fn type_of(&self) -> Result<Type, SemanticError> {
        let operand = self.expr.type_of()?;
        match self.op {
            UnaryOperator::Not => {
                if operand != Type::Boolean {
                    return Err(SemanticError::TypeMismatch(format!(
                        "NOT needs a boolean operand, not {}",
                        operand
                    )));
                }
                Ok(Type::Boolean)
            }
            UnaryOperator::Plus | UnaryOperator::Minus => {
                if !operand.is_numeric() {
                    return Err(SemanticError::TypeMismatch(format!(
                        "unary {} needs a numeric operand, not {}",
                        self.op, operand
                    )));
                }
                Ok(operand)
            }
        }
    }
}

impl fmt::Display for UnaryOpExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.op {
            UnaryOperator::Not => write!(f, "NOT {}", self.expr),
            op => write!(f, "{}{}", op, self.expr),
        }
    }
}

/// CAST an expression to a different type.
#[derive(Clone, Debug)]
pub struct CastExpr {
    /// The operand.
    pub expr: Box<Expr>,
    /// The target type.
    pub target: Type,
}

impl fmt::Display for CastExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CAST({} AS {})", self.expr, self.target)
    }
}

/// Binary operation, e.g. `1 + 1` or `id > 100`.
#[derive(Clone, Debug)]
pub struct BinaryOpExpr {
    /// The operator.
    pub op: BinaryOperator,
    /// Left operand.
    pub lhs: Box<Expr>,
    /// Right operand.
    pub rhs: Box<Expr>,
}

impl BinaryOpExpr {
    fn type_of(&self) -> Result<Type, SemanticError> {
        let lhs = self.lhs.type_of()?;
        let rhs = self.rhs.type_of()?;
        let mismatch = || {
            SemanticError::TypeMismatch(format!(
                "cannot apply '{}' to {} and {}",
                self.op, lhs, rhs
            ))
        };
        match self.op {
            BinaryOperator::Concat => {
                if lhs != Type::String && rhs != Type::String {
                    return Err(mismatch());
                }
                Ok(Type::String)
            }
            op if op.is_arithmetic() => Type::common_numeric(lhs, rhs).ok_or_else(mismatch),
            op if op.is_comparison() => {
                if !Type::comparable(lhs, rhs) {
                    return Err(mismatch());
                }
                Ok(Type::Boolean)
            }
            BinaryOperator::And | BinaryOperator::Or => {
                if lhs != Type::Boolean || rhs != Type::Boolean {
                    return Err(mismatch());
                }
                Ok(Type::Boolean)
            }
            BinaryOperator::Is | BinaryOperator::IsNot => Ok(Type::Boolean),
            _ => unreachable!("all binary operators covered"),
        }
    }
}

impl fmt::Display for BinaryOpExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op, self.rhs)
    }
}

/// `<expr> LIKE 'pattern'`. The SQL pattern is kept for printing; the
/// translated regular expression is what gets compiled and evaluated.
#[derive(Clone, Debug)]
pub struct LikeExpr {
    /// The operand.
    pub expr: Box<Expr>,
    /// The SQL pattern as written, e.g. `%son_`.
    pub pattern: String,
    /// The pattern translated to a regular expression, e.g. `.*son.`.
    pub regex: String,
}

impl fmt::Display for LikeExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} LIKE '{}'",
            self.expr,
            escape_single_quote_string(&self.pattern)
        )
    }
}

/// `<expr> BETWEEN <low> AND <high>`.
#[derive(Clone, Debug)]
pub struct BetweenExpr {
    /// The tested operand.
    pub expr: Box<Expr>,
    /// Lower bound.
    pub low: Box<Expr>,
    /// Upper bound.
    pub high: Box<Expr>,
}

impl BetweenExpr {
    fn type_of(&self) -> Result<Type, SemanticError> {
        let ty = self.expr.type_of()?;
        let low = self.low.type_of()?;
        let high = self.high.type_of()?;
        if !Type::comparable(ty, low) || !Type::comparable(ty, high) {
            return Err(SemanticError::TypeMismatch(format!(
                "cannot apply BETWEEN to {}, {} and {}",
                ty, low, high
            )));
        }
        Ok(Type::Boolean)
    }
}

impl fmt::Display for BetweenExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} BETWEEN {} AND {}", self.expr, self.low, self.high)
    }
}

/// `<expr> IN (val1, val2, ...)`.
#[derive(Clone, Debug)]
pub struct InExpr {
    /// The tested operand.
    pub expr: Box<Expr>,
    /// The candidate list.
    pub list: Vec<Expr>,
}

impl InExpr {
    fn type_of(&self) -> Result<Type, SemanticError> {
        let ty = self.expr.type_of()?;
        for item in &self.list {
            let item_ty = item.type_of()?;
            if !Type::comparable(ty, item_ty) {
                return Err(SemanticError::TypeMismatch(format!(
                    "cannot apply IN to {} and {}",
                    ty, item_ty
                )));
            }
        }
        Ok(Type::Boolean)
    }
}

impl fmt::Display for InExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} IN ({})", self.expr, display_comma_separated(&self.list))
    }
}

/// Scalar function call, e.g. `EXTRACT(6,birth_date)` after desugaring.
#[derive(Clone, Debug)]
pub struct FunctionExpr {
    /// The (upper-cased) function name.
    pub name: String,
    /// The arguments.
    pub args: Vec<Expr>,
    /// The return type, resolved at parse time.
    pub ty: Type,
}

impl fmt::Display for FunctionExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}({})", self.name, display_comma_separated(&self.args))
    }
}

/// The aggregate functions.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AggregateKind {
    /// `COUNT(x)`, skipping nulls.
    Count,
    /// `COUNT(*)`, counting rows.
    CountStar,
    /// `SUM(x)`.
    Sum,
    /// `AVG(x)`.
    Avg,
    /// `MIN(x)`.
    Min,
    /// `MAX(x)`.
    Max,
    /// `ARBITRARY(x)`, the first non-null value.
    Arbitrary,
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Count | Self::CountStar => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Arbitrary => "ARBITRARY",
        })
    }
}

/// Aggregate function call, e.g. `COUNT(id)` or `COUNT(*)`.
#[derive(Clone, Debug)]
pub struct AggregateExpr {
    /// Which aggregate to run.
    pub kind: AggregateKind,
    /// The argument; `None` only for `COUNT(*)`.
    pub expr: Option<Box<Expr>>,
}

impl AggregateExpr {
    fn type_of(&self) -> Result<Type, SemanticError> {
        match self.kind {
            AggregateKind::Count | AggregateKind::CountStar => Ok(Type::Int),
            _ => match &self.expr {
                Some(expr) => expr.type_of(),
                None => Ok(Type::None),
            },
        }
    }
}

impl fmt::Display for AggregateExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.expr {
            Some(expr) => write!(f, "{}({})", self.kind, expr),
            None => write!(f, "{}(*)", self.kind),
        }
    }
}

/// Returns the return type of a built-in scalar function, or `None` for an
/// unknown function name.
pub fn builtin_function_type(name: &str) -> Option<Type> {
    Some(match name {
        "CURRENT_DATE" => Type::Date,
        "CURRENT_TIME" => Type::Time,
        "CURRENT_TIMESTAMP" => Type::Timestamp,
        "EXTRACT" => Type::Int,
        "POW" | "POWER" => Type::Real,
        "UPPER" | "LOWER" => Type::String,
        "CHAR_LENGTH" | "CHARACTER_LENGTH" => Type::Int,
        "VERSION" => Type::String,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{SymbolInfo, SymbolKind};
    use std::{cell::RefCell, rc::Rc};

    fn int(i: i64) -> Expr {
        Expr::Literal(Value::Int(i))
    }

    fn ident(name: &str, ty: Type) -> Expr {
        let mut info = SymbolInfo::new(name, SymbolKind::Plain);
        info.ty = ty;
        info.identifier = name.to_string();
        Expr::Identifier(Identifier {
            prefix: String::new(),
            identifier: name.to_string(),
            quoted: false,
            info: Rc::new(RefCell::new(info)),
        })
    }

    fn binary(op: BinaryOperator, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary(BinaryOpExpr {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    #[test]
    fn arithmetic_inference() {
        assert_eq!(
            binary(BinaryOperator::Add, int(1), int(2)).type_of(),
            Ok(Type::Int)
        );
        assert_eq!(
            binary(BinaryOperator::Add, int(1), Expr::Literal(Value::Real(1.0))).type_of(),
            Ok(Type::Real)
        );
        assert!(binary(BinaryOperator::Add, int(1), Expr::Literal(Value::Boolean(true)))
            .type_of()
            .is_err());
    }

    #[test]
    fn comparison_yields_boolean() {
        assert_eq!(
            binary(BinaryOperator::Gt, ident("ID", Type::Int), int(100)).type_of(),
            Ok(Type::Boolean)
        );
        assert!(binary(
            BinaryOperator::Gt,
            ident("NAME", Type::String),
            int(100)
        )
        .type_of()
        .is_err());
    }

    #[test]
    fn concat_needs_a_string_side() {
        assert_eq!(
            binary(
                BinaryOperator::Concat,
                ident("NAME", Type::String),
                int(100)
            )
            .type_of(),
            Ok(Type::String)
        );
        assert!(binary(BinaryOperator::Concat, int(1), int(2)).type_of().is_err());
    }

    #[test]
    fn logical_connectives_need_booleans() {
        let cmp = binary(BinaryOperator::Lt, int(1), int(2));
        assert_eq!(
            binary(BinaryOperator::And, cmp.clone(), cmp.clone()).type_of(),
            Ok(Type::Boolean)
        );
        assert!(binary(BinaryOperator::And, cmp, int(1)).type_of().is_err());
    }

    #[test]
    fn collect_identifiers_dedups() {
        let expr = binary(
            BinaryOperator::And,
            binary(BinaryOperator::Gt, ident("ID", Type::Int), int(100)),
            binary(BinaryOperator::Lt, ident("ID", Type::Int), int(9999)),
        );
        let identifiers = expr.collect_identifiers();
        assert_eq!(identifiers.len(), 1);
        assert_eq!(identifiers[0].identifier, "ID");
    }

    #[test]
    fn printer_reproduces_sql() {
        let expr = binary(
            BinaryOperator::Add,
            int(7),
            Expr::Literal(Value::String("it's".into())),
        );
        assert_eq!(expr.to_string(), "7 + 'it''s'");

        let like = Expr::Like(LikeExpr {
            expr: Box::new(ident("NAME", Type::String)),
            pattern: "%son_".into(),
            regex: ".*son.".into(),
        });
        assert_eq!(like.to_string(), "NAME LIKE '%son_'");
    }
}
