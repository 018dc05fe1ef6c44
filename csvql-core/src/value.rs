use core::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
};

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::types::Type;

/// An error raised by an operation on [`Value`]s.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    /// The operand types do not fit the operation.
    #[error("type mismatch between {0} and {1}")]
    TypeMismatch(Type, Type),
    /// A CAST between incompatible types.
    #[error("cannot cast {0} to {1}")]
    InvalidCast(Type, Type),
    /// A string could not be parsed as the requested type.
    #[error("cannot parse '{0}' as {1}")]
    Parse(String, Type),
}

/// A tagged SQL value.
///
/// Nulls are typed: `Value::Null(Type::Int)` is a null integer. Operations
/// propagate nulls according to SQL three-valued logic.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Value {
    /// A null of the given type.
    Null(Type),
    /// A boolean value.
    Boolean(bool),
    /// A 64-bit integer value.
    Int(i64),
    /// A 64-bit floating point value.
    Real(f64),
    /// A string value.
    String(String),
    /// A date value.
    Date(NaiveDate),
    /// A time of day value.
    Time(NaiveTime),
    /// A date and time value.
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Returns the type tag of the value.
    pub fn ty(&self) -> Type {
        match self {
            Value::Null(ty) => *ty,
            Value::Boolean(_) => Type::Boolean,
            Value::Int(_) => Type::Int,
            Value::Real(_) => Type::Real,
            Value::String(_) => Type::String,
            Value::Date(_) => Type::Date,
            Value::Time(_) => Type::Time,
            Value::Timestamp(_) => Type::Timestamp,
        }
    }

    /// Returns true if the value is a (typed) null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null(_))
    }

    /// Returns the boolean payload, if the value is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer payload, if the value is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the value as a float, coercing integers.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Parses a string as a value of the given type, following the CSV field
    /// rules: an empty string is a typed null, booleans accept
    /// `true|false|1|0` case-insensitively, dates are `YYYY-MM-DD`, times
    /// `HH:MM:SS` and timestamps `YYYY-MM-DDTHH:MM:SS`.
    pub fn parse_typed(input: &str, ty: Type) -> Result<Value, ValueError> {
        if input.is_empty() {
            return Ok(Value::Null(ty));
        }
        let parse_err = || ValueError::Parse(input.to_string(), ty);
        match ty {
            Type::Int => input
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| parse_err()),
            Type::Real => input
                .parse::<f64>()
                .map(Value::Real)
                .map_err(|_| parse_err()),
            Type::Boolean => match input.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Value::Boolean(true)),
                "false" | "0" => Ok(Value::Boolean(false)),
                _ => Err(parse_err()),
            },
            Type::String => Ok(Value::String(input.to_string())),
            Type::Date => NaiveDate::parse_from_str(input, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| parse_err()),
            Type::Time => NaiveTime::parse_from_str(input, "%H:%M:%S")
                .map(Value::Time)
                .map_err(|_| parse_err()),
            Type::Timestamp => NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S")
                .map(Value::Timestamp)
                .map_err(|_| parse_err()),
            Type::None => Err(parse_err()),
        }
    }

    fn numeric_pair(&self, rhs: &Value) -> Result<Type, ValueError> {
        Type::common_numeric(self.ty(), rhs.ty())
            .ok_or(ValueError::TypeMismatch(self.ty(), rhs.ty()))
    }

    /// Adds two numeric values, propagating nulls.
    pub fn add(&self, rhs: &Value) -> Result<Value, ValueError> {
        let ty = self.numeric_pair(rhs)?;
        match (self, rhs) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
            (a, b) if a.is_null() || b.is_null() => Ok(Value::Null(ty)),
            (a, b) => Ok(Value::Real(a.as_real().unwrap() + b.as_real().unwrap())),
        }
    }

    /// Subtracts two numeric values, propagating nulls.
    pub fn sub(&self, rhs: &Value) -> Result<Value, ValueError> {
        let ty = self.numeric_pair(rhs)?;
        match (self, rhs) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_sub(*b))),
            (a, b) if a.is_null() || b.is_null() => Ok(Value::Null(ty)),
            (a, b) => Ok(Value::Real(a.as_real().unwrap() - b.as_real().unwrap())),
        }
    }

    /// Multiplies two numeric values, propagating nulls.
    pub fn mul(&self, rhs: &Value) -> Result<Value, ValueError> {
        let ty = self.numeric_pair(rhs)?;
        match (self, rhs) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_mul(*b))),
            (a, b) if a.is_null() || b.is_null() => Ok(Value::Null(ty)),
            (a, b) => Ok(Value::Real(a.as_real().unwrap() * b.as_real().unwrap())),
        }
    }

    /// Divides two numeric values. Division by zero yields a typed null for
    /// both the integer and the real path.
    pub fn div(&self, rhs: &Value) -> Result<Value, ValueError> {
        let ty = self.numeric_pair(rhs)?;
        match (self, rhs) {
            (Value::Int(_), Value::Int(0)) => Ok(Value::Null(Type::Int)),
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a / b)),
            (a, b) if a.is_null() || b.is_null() => Ok(Value::Null(ty)),
            (a, b) => {
                let divisor = b.as_real().unwrap();
                if divisor == 0.0 {
                    Ok(Value::Null(Type::Real))
                } else {
                    Ok(Value::Real(a.as_real().unwrap() / divisor))
                }
            }
        }
    }

    /// Takes the remainder of two numeric values. A zero divisor yields a
    /// typed null, like division.
    pub fn modulo(&self, rhs: &Value) -> Result<Value, ValueError> {
        let ty = self.numeric_pair(rhs)?;
        match (self, rhs) {
            (Value::Int(_), Value::Int(0)) => Ok(Value::Null(Type::Int)),
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a % b)),
            (a, b) if a.is_null() || b.is_null() => Ok(Value::Null(ty)),
            (a, b) => {
                let divisor = b.as_real().unwrap();
                if divisor == 0.0 {
                    Ok(Value::Null(Type::Real))
                } else {
                    Ok(Value::Real(a.as_real().unwrap() % divisor))
                }
            }
        }
    }

    /// Concatenates two values into a string. At least one side has to be a
    /// string; the other side is rendered with its output format.
    pub fn concat(&self, rhs: &Value) -> Result<Value, ValueError> {
        if self.ty() != Type::String && rhs.ty() != Type::String {
            return Err(ValueError::TypeMismatch(self.ty(), rhs.ty()));
        }
        if self.is_null() || rhs.is_null() {
            return Ok(Value::Null(Type::String));
        }
        Ok(Value::String(format!("{}{}", self, rhs)))
    }

    /// Negates a numeric value.
    pub fn neg(&self) -> Result<Value, ValueError> {
        match self {
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Real(r) => Ok(Value::Real(-r)),
            Value::Null(ty) if ty.is_numeric() => Ok(Value::Null(*ty)),
            _ => Err(ValueError::TypeMismatch(self.ty(), self.ty())),
        }
    }

    /// Compares two values. `Ok(None)` signals an unknown result because one
    /// of the sides is null; numeric types coerce to the wider type, all
    /// other cross-type comparisons fail with a type mismatch.
    pub fn compare(&self, rhs: &Value) -> Result<Option<Ordering>, ValueError> {
        if !Type::comparable(self.ty(), rhs.ty()) {
            return Err(ValueError::TypeMismatch(self.ty(), rhs.ty()));
        }
        if self.is_null() || rhs.is_null() {
            return Ok(None);
        }
        let ordering = match (self, rhs) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Time(a), Value::Time(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (a, b) => {
                // mixed numeric pair, compare as reals
                let (a, b) = (a.as_real().unwrap(), b.as_real().unwrap());
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            }
        };
        Ok(Some(ordering))
    }

    /// Logical AND with three-valued logic: `NULL AND FALSE` is `FALSE`,
    /// `NULL AND TRUE` is `NULL`.
    pub fn and(&self, rhs: &Value) -> Result<Value, ValueError> {
        match (self.as_tribool()?, rhs.as_tribool()?) {
            (Some(false), _) | (_, Some(false)) => Ok(Value::Boolean(false)),
            (Some(true), Some(true)) => Ok(Value::Boolean(true)),
            _ => Ok(Value::Null(Type::Boolean)),
        }
    }

    /// Logical OR with three-valued logic: `NULL OR TRUE` is `TRUE`,
    /// `NULL OR FALSE` is `NULL`.
    pub fn or(&self, rhs: &Value) -> Result<Value, ValueError> {
        match (self.as_tribool()?, rhs.as_tribool()?) {
            (Some(true), _) | (_, Some(true)) => Ok(Value::Boolean(true)),
            (Some(false), Some(false)) => Ok(Value::Boolean(false)),
            _ => Ok(Value::Null(Type::Boolean)),
        }
    }

    /// Logical NOT with three-valued logic; `NOT NULL` stays null.
    pub fn not(&self) -> Result<Value, ValueError> {
        match self.as_tribool()? {
            Some(b) => Ok(Value::Boolean(!b)),
            None => Ok(Value::Null(Type::Boolean)),
        }
    }

    fn as_tribool(&self) -> Result<Option<bool>, ValueError> {
        match self {
            Value::Boolean(b) => Ok(Some(*b)),
            Value::Null(_) => Ok(None),
            _ => Err(ValueError::TypeMismatch(self.ty(), Type::Boolean)),
        }
    }

    /// Casts the value to the target type. Nulls keep their nullness and
    /// change their tag; strings parse with the CSV field rules.
    pub fn cast(&self, target: Type) -> Result<Value, ValueError> {
        if self.ty() == target {
            return Ok(self.clone());
        }
        if self.is_null() {
            return Ok(Value::Null(target));
        }
        match (self, target) {
            (Value::Int(i), Type::Real) => Ok(Value::Real(*i as f64)),
            (Value::Real(r), Type::Int) => Ok(Value::Int(*r as i64)),
            (Value::Boolean(b), Type::Int) => Ok(Value::Int(i64::from(*b))),
            (Value::Int(i), Type::Boolean) => Ok(Value::Boolean(*i != 0)),
            (_, Type::String) => Ok(Value::String(self.to_string())),
            (Value::String(s), _) => Value::parse_typed(s, target),
            (Value::Date(d), Type::Timestamp) => {
                Ok(Value::Timestamp(d.and_hms_opt(0, 0, 0).unwrap()))
            }
            (Value::Timestamp(ts), Type::Date) => Ok(Value::Date(ts.date())),
            (Value::Timestamp(ts), Type::Time) => Ok(Value::Time(ts.time())),
            _ => Err(ValueError::InvalidCast(self.ty(), target)),
        }
    }

    /// Extracts a date/time field: 1 = second up to 6 = year.
    pub fn extract_field(&self, field: i64) -> Result<Value, ValueError> {
        let (date, time) = match self {
            Value::Date(d) => (Some(*d), None),
            Value::Time(t) => (None, Some(*t)),
            Value::Timestamp(ts) => (Some(ts.date()), Some(ts.time())),
            Value::Null(ty) if matches!(ty, Type::Date | Type::Time | Type::Timestamp) => {
                return Ok(Value::Null(Type::Int))
            }
            _ => return Err(ValueError::InvalidCast(self.ty(), Type::Int)),
        };
        let field_value = match field {
            1 => time.map(|t| i64::from(t.second())),
            2 => time.map(|t| i64::from(t.minute())),
            3 => time.map(|t| i64::from(t.hour())),
            4 => date.map(|d| i64::from(d.day())),
            5 => date.map(|d| i64::from(d.month())),
            6 => date.map(|d| i64::from(d.year())),
            _ => None,
        };
        match field_value {
            Some(v) => Ok(Value::Int(v)),
            None => Err(ValueError::InvalidCast(self.ty(), Type::Int)),
        }
    }
}

impl fmt::Display for Value {
    /// Renders the value with the output formats of the result stream:
    /// `NULL` for nulls, `true`/`false` for booleans, `%f` for reals,
    /// `YYYY-MM-DD` dates, `HH:MM:SS` times and `YYYY-MM-DDThh:mm:ss`
    /// timestamps. Strings render without quotes.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null(_) => f.write_str("NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{:.6}", r),
            Value::String(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Time(t) => write!(f, "{}", t.format("%H:%M:%S")),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%dT%H:%M:%S")),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null(a), Value::Null(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a.to_bits() == b.to_bits(),
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Value::Null(ty) => ty.hash(state),
            Value::Boolean(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Real(r) => r.to_bits().hash(state),
            Value::String(s) => s.hash(state),
            Value::Date(d) => d.hash(state),
            Value::Time(t) => t.hash(state),
            Value::Timestamp(ts) => ts.hash(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> Value {
        Value::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    #[test]
    fn typed_nulls() {
        let null = Value::Null(Type::Int);
        assert!(null.is_null());
        assert_eq!(null.ty(), Type::Int);
        assert_eq!(null.to_string(), "NULL");
    }

    #[test]
    fn arithmetic_promotion() {
        assert_eq!(Value::Int(7).mul(&Value::Int(5)).unwrap(), Value::Int(35));
        assert_eq!(
            Value::Int(35).div(&Value::Int(4)).unwrap(),
            Value::Int(8) // integer division truncates
        );
        assert_eq!(
            Value::Real(1.5).add(&Value::Int(1)).unwrap(),
            Value::Real(2.5)
        );
        assert!(Value::String("a".into()).add(&Value::Int(1)).is_err());
    }

    #[test]
    fn division_by_zero_is_null() {
        assert_eq!(
            Value::Int(1).div(&Value::Int(0)).unwrap(),
            Value::Null(Type::Int)
        );
        assert_eq!(
            Value::Real(1.0).div(&Value::Real(0.0)).unwrap(),
            Value::Null(Type::Real)
        );
        assert_eq!(
            Value::Int(1).modulo(&Value::Int(0)).unwrap(),
            Value::Null(Type::Int)
        );
    }

    #[test]
    fn null_propagation() {
        let null = Value::Null(Type::Int);
        assert_eq!(Value::Int(1).add(&null).unwrap(), Value::Null(Type::Int));
        assert_eq!(Value::Int(1).compare(&null).unwrap(), None);
    }

    #[test]
    fn three_valued_logic() {
        let null = Value::Null(Type::Boolean);
        let t = Value::Boolean(true);
        let f = Value::Boolean(false);
        assert_eq!(null.and(&f).unwrap(), Value::Boolean(false));
        assert_eq!(null.and(&t).unwrap(), Value::Null(Type::Boolean));
        assert_eq!(null.or(&t).unwrap(), Value::Boolean(true));
        assert_eq!(null.or(&f).unwrap(), Value::Null(Type::Boolean));
        assert_eq!(null.not().unwrap(), Value::Null(Type::Boolean));
    }

    #[test]
    fn concat_needs_one_string() {
        assert_eq!(
            Value::String("a".into())
                .concat(&Value::Int(1))
                .unwrap(),
            Value::String("a1".into())
        );
        assert!(Value::Int(1).concat(&Value::Int(2)).is_err());
        assert_eq!(
            Value::String("a".into())
                .concat(&Value::Null(Type::String))
                .unwrap(),
            Value::Null(Type::String)
        );
    }

    #[test]
    fn numeric_comparison_coerces() {
        assert_eq!(
            Value::Int(2).compare(&Value::Real(2.0)).unwrap(),
            Some(Ordering::Equal)
        );
        assert!(date(2020, 1, 1).compare(&Value::Int(1)).is_err());
    }

    #[test]
    fn csv_field_parsing() {
        assert_eq!(Value::parse_typed("", Type::Int), Ok(Value::Null(Type::Int)));
        assert_eq!(Value::parse_typed("-42", Type::Int), Ok(Value::Int(-42)));
        assert_eq!(
            Value::parse_typed("TRUE", Type::Boolean),
            Ok(Value::Boolean(true))
        );
        assert_eq!(
            Value::parse_typed("0", Type::Boolean),
            Ok(Value::Boolean(false))
        );
        assert_eq!(Value::parse_typed("1969-05-17", Type::Date), Ok(date(1969, 5, 17)));
        assert!(Value::parse_typed("17.05.1969", Type::Date).is_err());
    }

    #[test]
    fn output_formats() {
        assert_eq!(Value::Real(1.5).to_string(), "1.500000");
        assert_eq!(date(1969, 5, 17).to_string(), "1969-05-17");
        assert_eq!(
            Value::Timestamp(
                NaiveDate::from_ymd_opt(2003, 4, 15)
                    .unwrap()
                    .and_hms_opt(8, 30, 0)
                    .unwrap()
            )
            .to_string(),
            "2003-04-15T08:30:00"
        );
    }

    #[test]
    fn extract_fields() {
        let ts = Value::Timestamp(
            NaiveDate::from_ymd_opt(1970, 9, 23)
                .unwrap()
                .and_hms_opt(8, 9, 11)
                .unwrap(),
        );
        assert_eq!(ts.extract_field(1).unwrap(), Value::Int(11));
        assert_eq!(ts.extract_field(3).unwrap(), Value::Int(8));
        assert_eq!(ts.extract_field(6).unwrap(), Value::Int(1970));
        assert!(ts.extract_field(7).is_err());
    }
}
