use csvql_ast::AggregateKind;
use csvql_core::{Type, Value};

use crate::error::CsvqlError;

/// The step/finalize contract every aggregation implements. One instance
/// accumulates the values of one group (or of the whole input when there is
/// no GROUP BY).
pub trait AggregationFunction {
    /// Resets the accumulated state.
    fn init(&mut self);

    /// Feeds one value into the aggregation.
    fn step(&mut self, value: &Value) -> Result<(), CsvqlError>;

    /// Produces the aggregated value.
    fn finalize(&mut self) -> Value;

    /// The display name of the aggregation.
    fn name(&self) -> &'static str;

    /// True when the consumer should drop the produced column; used for
    /// grouping keys that are not part of the select list.
    fn suppress(&self) -> bool {
        false
    }

    /// Creates a fresh instance with the same configuration.
    fn clone_box(&self) -> Box<dyn AggregationFunction>;
}

/// Creates the aggregation for the given kind over the given input type.
/// SUM and AVG are only defined for numeric input.
pub fn create_aggregation(
    kind: AggregateKind,
    ty: Type,
) -> Result<Box<dyn AggregationFunction>, CsvqlError> {
    match kind {
        AggregateKind::Count => Ok(Box::new(CountAggregation { count: None })),
        AggregateKind::CountStar => Ok(Box::new(CountStarAggregation { count: 0 })),
        AggregateKind::Sum => {
            if !ty.is_numeric() {
                return Err(CsvqlError::evaluation(format!(
                    "SUM is not defined for {} values",
                    ty
                )));
            }
            Ok(Box::new(SumAggregation { ty, sum: None }))
        }
        AggregateKind::Avg => {
            if !ty.is_numeric() {
                return Err(CsvqlError::evaluation(format!(
                    "AVG is not defined for {} values",
                    ty
                )));
            }
            Ok(Box::new(AvgAggregation {
                ty,
                sum: None,
                count: 0,
            }))
        }
        AggregateKind::Min => Ok(Box::new(MinMaxAggregation {
            ty,
            min: true,
            best: None,
        })),
        AggregateKind::Max => Ok(Box::new(MinMaxAggregation {
            ty,
            min: false,
            best: None,
        })),
        AggregateKind::Arbitrary => Ok(Box::new(ArbitraryAggregation { ty, first: None })),
    }
}

/// Creates the pass-through pseudo aggregation used for grouping keys.
pub(crate) fn create_path_through(suppress: bool) -> Box<dyn AggregationFunction> {
    Box::new(PathThroughAggregation {
        value: None,
        suppress,
    })
}

/// `COUNT(x)`: counts non-null values; without any input the result is a
/// null integer.
struct CountAggregation {
    count: Option<i64>,
}

impl AggregationFunction for CountAggregation {
    fn init(&mut self) {
        self.count = None;
    }

    fn step(&mut self, value: &Value) -> Result<(), CsvqlError> {
        if !value.is_null() {
            *self.count.get_or_insert(0) += 1;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Value {
        match self.count {
            Some(count) => Value::Int(count),
            None => Value::Null(Type::Int),
        }
    }

    fn name(&self) -> &'static str {
        "COUNT"
    }

    fn clone_box(&self) -> Box<dyn AggregationFunction> {
        Box::new(CountAggregation { count: None })
    }
}

/// `COUNT(*)`: counts rows, nulls included; an empty input counts 0.
struct CountStarAggregation {
    count: i64,
}

impl AggregationFunction for CountStarAggregation {
    fn init(&mut self) {
        self.count = 0;
    }

    fn step(&mut self, _value: &Value) -> Result<(), CsvqlError> {
        self.count += 1;
        Ok(())
    }

    fn finalize(&mut self) -> Value {
        Value::Int(self.count)
    }

    fn name(&self) -> &'static str {
        "COUNT_STAR"
    }

    fn clone_box(&self) -> Box<dyn AggregationFunction> {
        Box::new(CountStarAggregation { count: 0 })
    }
}

struct SumAggregation {
    ty: Type,
    sum: Option<Value>,
}

impl AggregationFunction for SumAggregation {
    fn init(&mut self) {
        self.sum = None;
    }

    fn step(&mut self, value: &Value) -> Result<(), CsvqlError> {
        if value.is_null() {
            return Ok(());
        }
        self.sum = Some(match self.sum.take() {
            Some(sum) => sum.add(value)?,
            None => value.clone(),
        });
        Ok(())
    }

    fn finalize(&mut self) -> Value {
        self.sum.take().unwrap_or(Value::Null(self.ty))
    }

    fn name(&self) -> &'static str {
        "SUM"
    }

    fn clone_box(&self) -> Box<dyn AggregationFunction> {
        Box::new(SumAggregation {
            ty: self.ty,
            sum: None,
        })
    }
}

/// `AVG(x)`: the division follows the input type, so integer averages
/// truncate and `SUM(x) / COUNT(x) = AVG(x)` holds for both paths.
struct AvgAggregation {
    ty: Type,
    sum: Option<Value>,
    count: i64,
}

impl AggregationFunction for AvgAggregation {
    fn init(&mut self) {
        self.sum = None;
        self.count = 0;
    }

    fn step(&mut self, value: &Value) -> Result<(), CsvqlError> {
        if value.is_null() {
            return Ok(());
        }
        self.count += 1;
        self.sum = Some(match self.sum.take() {
            Some(sum) => sum.add(value)?,
            None => value.clone(),
        });
        Ok(())
    }

    fn finalize(&mut self) -> Value {
        match self.sum.take() {
            Some(sum) if self.count > 0 => sum
                .div(&Value::Int(self.count))
                .unwrap_or(Value::Null(self.ty)),
            _ => Value::Null(self.ty),
        }
    }

    fn name(&self) -> &'static str {
        "AVG"
    }

    fn clone_box(&self) -> Box<dyn AggregationFunction> {
        Box::new(AvgAggregation {
            ty: self.ty,
            sum: None,
            count: 0,
        })
    }
}

struct MinMaxAggregation {
    ty: Type,
    min: bool,
    best: Option<Value>,
}

impl AggregationFunction for MinMaxAggregation {
    fn init(&mut self) {
        self.best = None;
    }

    fn step(&mut self, value: &Value) -> Result<(), CsvqlError> {
        if value.is_null() {
            return Ok(());
        }
        self.best = Some(match self.best.take() {
            None => value.clone(),
            Some(best) => {
                let keep_new = match best.compare(value)? {
                    Some(ordering) => {
                        if self.min {
                            ordering == std::cmp::Ordering::Greater
                        } else {
                            ordering == std::cmp::Ordering::Less
                        }
                    }
                    None => false,
                };
                if keep_new {
                    value.clone()
                } else {
                    best
                }
            }
        });
        Ok(())
    }

    fn finalize(&mut self) -> Value {
        self.best.take().unwrap_or(Value::Null(self.ty))
    }

    fn name(&self) -> &'static str {
        if self.min {
            "MIN"
        } else {
            "MAX"
        }
    }

    fn clone_box(&self) -> Box<dyn AggregationFunction> {
        Box::new(MinMaxAggregation {
            ty: self.ty,
            min: self.min,
            best: None,
        })
    }
}

/// `ARBITRARY(x)`: the first non-null value wins.
struct ArbitraryAggregation {
    ty: Type,
    first: Option<Value>,
}

impl AggregationFunction for ArbitraryAggregation {
    fn init(&mut self) {
        self.first = None;
    }

    fn step(&mut self, value: &Value) -> Result<(), CsvqlError> {
        if self.first.is_none() && !value.is_null() {
            self.first = Some(value.clone());
        }
        Ok(())
    }

    fn finalize(&mut self) -> Value {
        self.first.take().unwrap_or(Value::Null(self.ty))
    }

    fn name(&self) -> &'static str {
        "ARBITRARY"
    }

    fn clone_box(&self) -> Box<dyn AggregationFunction> {
        Box::new(ArbitraryAggregation {
            ty: self.ty,
            first: None,
        })
    }
}

/// Passes the first value through unchanged; carries the grouping key of a
/// bucket. With `suppress` set the consumer drops the produced column.
struct PathThroughAggregation {
    value: Option<Value>,
    suppress: bool,
}

impl AggregationFunction for PathThroughAggregation {
    fn init(&mut self) {
        self.value = None;
    }

    fn step(&mut self, value: &Value) -> Result<(), CsvqlError> {
        if self.value.is_none() {
            self.value = Some(value.clone());
        }
        Ok(())
    }

    fn finalize(&mut self) -> Value {
        self.value.take().unwrap_or(Value::Null(Type::None))
    }

    fn name(&self) -> &'static str {
        "PATH_THROUGH"
    }

    fn suppress(&self) -> bool {
        self.suppress
    }

    fn clone_box(&self) -> Box<dyn AggregationFunction> {
        Box::new(PathThroughAggregation {
            value: None,
            suppress: self.suppress,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_skips_nulls_and_is_null_on_empty_input() {
        let mut count = create_aggregation(AggregateKind::Count, Type::Int).unwrap();
        count.init();
        assert_eq!(count.name(), "COUNT");
        count.step(&Value::Int(1)).unwrap();
        count.step(&Value::Null(Type::Int)).unwrap();
        count.step(&Value::Int(3)).unwrap();
        assert_eq!(count.finalize(), Value::Int(2));

        let mut empty = count.clone_box();
        empty.init();
        assert_eq!(empty.finalize(), Value::Null(Type::Int));
    }

    #[test]
    fn count_star_counts_rows_and_is_zero_on_empty_input() {
        let mut count = create_aggregation(AggregateKind::CountStar, Type::Int).unwrap();
        count.init();
        assert_eq!(count.name(), "COUNT_STAR");
        count.step(&Value::Null(Type::Int)).unwrap();
        count.step(&Value::Int(2)).unwrap();
        assert_eq!(count.finalize(), Value::Int(2));

        let mut empty = count.clone_box();
        empty.init();
        assert_eq!(empty.finalize(), Value::Int(0));
    }

    #[test]
    fn sum_and_avg_require_numeric_types() {
        assert!(create_aggregation(AggregateKind::Sum, Type::String).is_err());
        assert!(create_aggregation(AggregateKind::Avg, Type::Date).is_err());
        assert!(create_aggregation(AggregateKind::Sum, Type::Real).is_ok());
    }

    #[test]
    fn sum_accumulates() {
        let mut sum = create_aggregation(AggregateKind::Sum, Type::Int).unwrap();
        sum.init();
        for v in [4711, 815, 42] {
            sum.step(&Value::Int(v)).unwrap();
        }
        assert_eq!(sum.finalize(), Value::Int(5568));

        let mut empty = sum.clone_box();
        empty.init();
        assert_eq!(empty.finalize(), Value::Null(Type::Int));
    }

    #[test]
    fn avg_divides_like_sum_over_count() {
        let mut avg = create_aggregation(AggregateKind::Avg, Type::Int).unwrap();
        avg.init();
        for v in [4711, 815, 42] {
            avg.step(&Value::Int(v)).unwrap();
        }
        assert_eq!(avg.finalize(), Value::Int(5568 / 3));

        let mut real = create_aggregation(AggregateKind::Avg, Type::Real).unwrap();
        real.init();
        real.step(&Value::Real(1.0)).unwrap();
        real.step(&Value::Real(2.0)).unwrap();
        assert_eq!(real.finalize(), Value::Real(1.5));
    }

    #[test]
    fn min_max_over_dates() {
        let early = Value::parse_typed("1963-03-06", Type::Date).unwrap();
        let late = Value::parse_typed("1970-09-23", Type::Date).unwrap();
        let mut min = create_aggregation(AggregateKind::Min, Type::Date).unwrap();
        let mut max = create_aggregation(AggregateKind::Max, Type::Date).unwrap();
        min.init();
        max.init();
        for v in [&late, &early] {
            min.step(v).unwrap();
            max.step(v).unwrap();
        }
        assert_eq!(min.finalize(), early);
        assert_eq!(max.finalize(), late);
    }

    #[test]
    fn arbitrary_takes_the_first_non_null() {
        let mut arbitrary = create_aggregation(AggregateKind::Arbitrary, Type::String).unwrap();
        arbitrary.init();
        arbitrary.step(&Value::Null(Type::String)).unwrap();
        arbitrary.step(&Value::String("Mark".into())).unwrap();
        arbitrary.step(&Value::String("Lars".into())).unwrap();
        assert_eq!(arbitrary.finalize(), Value::String("Mark".into()));
    }

    #[test]
    fn path_through_keeps_the_first_value() {
        let mut path = create_path_through(false);
        path.init();
        path.step(&Value::Int(4711)).unwrap();
        path.step(&Value::Int(42)).unwrap();
        assert_eq!(path.finalize(), Value::Int(4711));
        assert!(!path.suppress());
        assert!(create_path_through(true).suppress());
    }
}
