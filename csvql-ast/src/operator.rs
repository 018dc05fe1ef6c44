use core::fmt;

/// Binary operators.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BinaryOperator {
    /// Plus, e.g. `a + b`
    Add,
    /// Minus, e.g. `a - b`
    Subtract,
    /// Multiply, e.g. `a * b`
    Multiply,
    /// Divide, e.g. `a / b`
    Divide,
    /// Modulo, e.g. `a % b`
    Modulo,
    /// String concat, e.g. `a || b`
    Concat,
    /// Equal, e.g. `a = b`
    Eq,
    /// Not equal, e.g. `a <> b`
    NotEq,
    /// Greater than, e.g. `a > b`
    Gt,
    /// Greater or equal, e.g. `a >= b`
    GtEq,
    /// Less than, e.g. `a < b`
    Lt,
    /// Less or equal, e.g. `a <= b`
    LtEq,
    /// Logical and, e.g. `a AND b`
    And,
    /// Logical or, e.g. `a OR b`
    Or,
    /// `a IS b`, with a boolean or typed-null literal on the right
    Is,
    /// `a IS NOT b`, with a boolean or typed-null literal on the right
    IsNot,
}

impl BinaryOperator {
    /// Returns true for `+ - * / %`.
    pub fn is_arithmetic(&self) -> bool {
        use BinaryOperator::*;
        matches!(self, Add | Subtract | Multiply | Divide | Modulo)
    }

    /// Returns true for the relational operators.
    pub fn is_comparison(&self) -> bool {
        use BinaryOperator::*;
        matches!(self, Eq | NotEq | Gt | GtEq | Lt | LtEq)
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::Concat => "||",
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Is => "IS",
            Self::IsNot => "IS NOT",
        })
    }
}

/// Unary operators.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum UnaryOperator {
    /// Plus, e.g. `+1`
    Plus,
    /// Minus, e.g. `-1`
    Minus,
    /// Not, e.g. `NOT TRUE`
    Not,
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Not => "NOT",
        })
    }
}
