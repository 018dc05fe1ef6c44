use chrono::Local;
use csvql_core::{Type, Value};

use crate::error::CsvqlError;

/// A scalar function callable from the stack machine.
pub trait ScalarFunction {
    /// The (upper-cased) function name.
    fn name(&self) -> &'static str;

    /// Evaluates the function over the given arguments.
    fn call(&self, args: &[Value]) -> Result<Value, CsvqlError>;
}

/// The registry of scalar functions. Compiled expressions reference
/// functions by their id in this registry.
pub struct FunctionRegistry {
    functions: Vec<Box<dyn ScalarFunction>>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl FunctionRegistry {
    /// Creates a registry with all built-in functions registered.
    pub fn with_builtins() -> Self {
        let mut registry = FunctionRegistry { functions: vec![] };
        registry.register(Box::new(CurrentDateFunction));
        registry.register(Box::new(CurrentTimeFunction));
        registry.register(Box::new(CurrentTimestampFunction));
        registry.register(Box::new(ExtractFunction));
        registry.register(Box::new(PowerFunction));
        registry.register(Box::new(UpperFunction));
        registry.register(Box::new(LowerFunction));
        registry.register(Box::new(CharLengthFunction));
        registry.register(Box::new(VersionFunction));
        registry
    }

    /// Registers a function.
    pub fn register(&mut self, function: Box<dyn ScalarFunction>) {
        self.functions.push(function);
    }

    /// Returns the id of the named function.
    pub fn id_of(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name() == name)
    }

    /// Returns true if the named function is registered.
    pub fn has_function(&self, name: &str) -> bool {
        self.id_of(name).is_some()
    }

    /// Calls the function with the given id.
    pub fn call(&self, id: usize, args: &[Value]) -> Result<Value, CsvqlError> {
        let function = self
            .functions
            .get(id)
            .ok_or_else(|| CsvqlError::evaluation(format!("unknown function id {}", id)))?;
        function.call(args)
    }
}

fn expect_args(name: &str, args: &[Value], count: usize) -> Result<(), CsvqlError> {
    if args.len() != count {
        return Err(CsvqlError::evaluation(format!(
            "{} expects {} parameter(s), got {}",
            name,
            count,
            args.len()
        )));
    }
    Ok(())
}

struct CurrentDateFunction;

impl ScalarFunction for CurrentDateFunction {
    fn name(&self) -> &'static str {
        "CURRENT_DATE"
    }

    fn call(&self, args: &[Value]) -> Result<Value, CsvqlError> {
        expect_args(self.name(), args, 0)?;
        Ok(Value::Date(Local::now().date_naive()))
    }
}

struct CurrentTimeFunction;

impl ScalarFunction for CurrentTimeFunction {
    fn name(&self) -> &'static str {
        "CURRENT_TIME"
    }

    fn call(&self, args: &[Value]) -> Result<Value, CsvqlError> {
        expect_args(self.name(), args, 0)?;
        Ok(Value::Time(Local::now().time()))
    }
}

struct CurrentTimestampFunction;

impl ScalarFunction for CurrentTimestampFunction {
    fn name(&self) -> &'static str {
        "CURRENT_TIMESTAMP"
    }

    fn call(&self, args: &[Value]) -> Result<Value, CsvqlError> {
        expect_args(self.name(), args, 0)?;
        Ok(Value::Timestamp(Local::now().naive_local()))
    }
}

/// `EXTRACT(field, value)` with the field encoded as 1 = SECOND up to
/// 6 = YEAR, the way the parser desugars `EXTRACT(field FROM value)`.
struct ExtractFunction;

impl ScalarFunction for ExtractFunction {
    fn name(&self) -> &'static str {
        "EXTRACT"
    }

    fn call(&self, args: &[Value]) -> Result<Value, CsvqlError> {
        expect_args(self.name(), args, 2)?;
        let field = args[0]
            .as_int()
            .ok_or_else(|| CsvqlError::evaluation("EXTRACT needs an integer field code"))?;
        Ok(args[1].extract_field(field)?)
    }
}

struct PowerFunction;

impl ScalarFunction for PowerFunction {
    fn name(&self) -> &'static str {
        "POW"
    }

    fn call(&self, args: &[Value]) -> Result<Value, CsvqlError> {
        expect_args(self.name(), args, 2)?;
        if args[0].is_null() || args[1].is_null() {
            return Ok(Value::Null(Type::Real));
        }
        match (args[0].as_real(), args[1].as_real()) {
            (Some(base), Some(exponent)) => Ok(Value::Real(base.powf(exponent))),
            _ => Err(CsvqlError::evaluation("POW needs numeric parameters")),
        }
    }
}

struct UpperFunction;

impl ScalarFunction for UpperFunction {
    fn name(&self) -> &'static str {
        "UPPER"
    }

    fn call(&self, args: &[Value]) -> Result<Value, CsvqlError> {
        expect_args(self.name(), args, 1)?;
        match &args[0] {
            Value::String(s) => Ok(Value::String(s.to_uppercase())),
            Value::Null(_) => Ok(Value::Null(Type::String)),
            other => Err(CsvqlError::evaluation(format!(
                "UPPER needs a string parameter, not {}",
                other.ty()
            ))),
        }
    }
}

struct LowerFunction;

impl ScalarFunction for LowerFunction {
    fn name(&self) -> &'static str {
        "LOWER"
    }

    fn call(&self, args: &[Value]) -> Result<Value, CsvqlError> {
        expect_args(self.name(), args, 1)?;
        match &args[0] {
            Value::String(s) => Ok(Value::String(s.to_lowercase())),
            Value::Null(_) => Ok(Value::Null(Type::String)),
            other => Err(CsvqlError::evaluation(format!(
                "LOWER needs a string parameter, not {}",
                other.ty()
            ))),
        }
    }
}

struct CharLengthFunction;

impl ScalarFunction for CharLengthFunction {
    fn name(&self) -> &'static str {
        "CHAR_LENGTH"
    }

    fn call(&self, args: &[Value]) -> Result<Value, CsvqlError> {
        expect_args(self.name(), args, 1)?;
        match &args[0] {
            Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
            Value::Null(_) => Ok(Value::Null(Type::Int)),
            other => Err(CsvqlError::evaluation(format!(
                "CHAR_LENGTH needs a string parameter, not {}",
                other.ty()
            ))),
        }
    }
}

struct VersionFunction;

impl ScalarFunction for VersionFunction {
    fn name(&self) -> &'static str {
        "VERSION"
    }

    fn call(&self, args: &[Value]) -> Result<Value, CsvqlError> {
        expect_args(self.name(), args, 0)?;
        Ok(Value::String(format!(
            "csvql {}",
            env!("CARGO_PKG_VERSION")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn registry_resolves_builtins() {
        let registry = FunctionRegistry::with_builtins();
        assert!(registry.has_function("EXTRACT"));
        assert!(registry.has_function("UPPER"));
        assert!(!registry.has_function("NOPE"));
    }

    #[test]
    fn extract_uses_field_codes() {
        let registry = FunctionRegistry::with_builtins();
        let id = registry.id_of("EXTRACT").unwrap();
        let date = Value::Date(NaiveDate::from_ymd_opt(1969, 5, 17).unwrap());
        assert_eq!(
            registry.call(id, &[Value::Int(6), date.clone()]).unwrap(),
            Value::Int(1969)
        );
        assert_eq!(
            registry.call(id, &[Value::Int(5), date]).unwrap(),
            Value::Int(5)
        );
    }

    #[test]
    fn string_functions() {
        let registry = FunctionRegistry::with_builtins();
        let upper = registry.id_of("UPPER").unwrap();
        assert_eq!(
            registry
                .call(upper, &[Value::String("fürstenberg".into())])
                .unwrap(),
            Value::String("FÜRSTENBERG".into())
        );
        let length = registry.id_of("CHAR_LENGTH").unwrap();
        assert_eq!(
            registry
                .call(length, &[Value::String("Mark".into())])
                .unwrap(),
            Value::Int(4)
        );
    }
}
