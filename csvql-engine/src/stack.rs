use std::cmp::Ordering;

use csvql_core::{Type, Value};
use regex::Regex;

use crate::{error::CsvqlError, function::FunctionRegistry};

/// One instruction of a compiled scalar expression.
#[derive(Clone, Debug)]
pub enum Instruction {
    /// Push a constant.
    Push(Value),
    /// Push the variable with the given id.
    PushVar(usize),
    /// Pop two values, push their sum.
    Add,
    /// Pop two values, push their difference.
    Sub,
    /// Pop two values, push their product.
    Mul,
    /// Pop two values, push their quotient; division by zero pushes null.
    Div,
    /// Pop two values, push the remainder; a zero divisor pushes null.
    Mod,
    /// Pop two values, push the concatenated string.
    Concat,
    /// Pop two values, push the comparison result.
    Eq,
    /// Pop two values, push the comparison result.
    Neq,
    /// Pop two values, push the comparison result.
    Gt,
    /// Pop two values, push the comparison result.
    Ge,
    /// Pop two values, push the comparison result.
    Lt,
    /// Pop two values, push the comparison result.
    Le,
    /// Pop two values, push the three-valued conjunction.
    And,
    /// Pop two values, push the three-valued disjunction.
    Or,
    /// Pop one value, push the three-valued negation.
    Not,
    /// Pop one value, push the arithmetic negation.
    Neg,
    /// Pop one value, push whether it matches the referenced pattern.
    Like(usize),
    /// Pop high, low and the operand, push `low <= operand <= high`.
    Between,
    /// Pop the list values and the operand, push the membership result.
    In(usize),
    /// Pop one value, push whether it is the given literal.
    Is(Value),
    /// Pop one value, push whether it is not the given literal.
    IsNot(Value),
    /// Pop one value, push it cast to the type.
    Cast(Type),
    /// Pop the arguments, push the function call result.
    Call(usize, usize),
}

/// The per-row variable bindings a stack machine evaluates against.
#[derive(Debug, Default)]
pub struct VariableStore {
    values: Vec<Value>,
}

impl VariableStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        VariableStore::default()
    }

    /// Binds the variable with the given id.
    pub fn set(&mut self, id: usize, value: Value) {
        if self.values.len() <= id {
            self.values.resize(id + 1, Value::Null(Type::None));
        }
        self.values[id] = value;
    }

    fn get(&self, id: usize) -> Result<&Value, CsvqlError> {
        self.values
            .get(id)
            .ok_or_else(|| CsvqlError::evaluation(format!("unbound variable {}", id)))
    }
}

/// A compiled scalar expression: an instruction sequence plus the LIKE
/// patterns it references. Evaluation leaves exactly one value on the
/// stack.
#[derive(Debug, Default)]
pub struct StackMachine {
    instructions: Vec<Instruction>,
    regexes: Vec<Regex>,
}

impl StackMachine {
    /// Creates an empty machine.
    pub fn new() -> Self {
        StackMachine::default()
    }

    /// Appends an instruction.
    pub fn add_instruction(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Registers a LIKE pattern (already translated to a regex) and returns
    /// its id. The pattern has to match the whole operand.
    pub fn add_pattern(&mut self, regex: &str) -> Result<usize, CsvqlError> {
        let compiled = Regex::new(&format!("^(?:{})$", regex))
            .map_err(|err| CsvqlError::evaluation(format!("invalid LIKE pattern: {}", err)))?;
        self.regexes.push(compiled);
        Ok(self.regexes.len() - 1)
    }

    /// The instruction sequence.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Executes the instruction sequence against the store and returns the
    /// resulting value.
    pub fn evaluate(
        &self,
        store: &VariableStore,
        functions: &FunctionRegistry,
    ) -> Result<Value, CsvqlError> {
        let mut stack: Vec<Value> = Vec::with_capacity(8);
        for instruction in &self.instructions {
            match instruction {
                Instruction::Push(value) => stack.push(value.clone()),
                Instruction::PushVar(id) => stack.push(store.get(*id)?.clone()),
                Instruction::Add => {
                    let (lhs, rhs) = pop_two(&mut stack)?;
                    stack.push(lhs.add(&rhs)?);
                }
                Instruction::Sub => {
                    let (lhs, rhs) = pop_two(&mut stack)?;
                    stack.push(lhs.sub(&rhs)?);
                }
                Instruction::Mul => {
                    let (lhs, rhs) = pop_two(&mut stack)?;
                    stack.push(lhs.mul(&rhs)?);
                }
                Instruction::Div => {
                    let (lhs, rhs) = pop_two(&mut stack)?;
                    stack.push(lhs.div(&rhs)?);
                }
                Instruction::Mod => {
                    let (lhs, rhs) = pop_two(&mut stack)?;
                    stack.push(lhs.modulo(&rhs)?);
                }
                Instruction::Concat => {
                    let (lhs, rhs) = pop_two(&mut stack)?;
                    stack.push(lhs.concat(&rhs)?);
                }
                Instruction::Eq => {
                    let (lhs, rhs) = pop_two(&mut stack)?;
                    stack.push(compare(&lhs, &rhs, |o| o == Ordering::Equal)?);
                }
                Instruction::Neq => {
                    let (lhs, rhs) = pop_two(&mut stack)?;
                    stack.push(compare(&lhs, &rhs, |o| o != Ordering::Equal)?);
                }
                Instruction::Gt => {
                    let (lhs, rhs) = pop_two(&mut stack)?;
                    stack.push(compare(&lhs, &rhs, |o| o == Ordering::Greater)?);
                }
                Instruction::Ge => {
                    let (lhs, rhs) = pop_two(&mut stack)?;
                    stack.push(compare(&lhs, &rhs, |o| o != Ordering::Less)?);
                }
                Instruction::Lt => {
                    let (lhs, rhs) = pop_two(&mut stack)?;
                    stack.push(compare(&lhs, &rhs, |o| o == Ordering::Less)?);
                }
                Instruction::Le => {
                    let (lhs, rhs) = pop_two(&mut stack)?;
                    stack.push(compare(&lhs, &rhs, |o| o != Ordering::Greater)?);
                }
                Instruction::And => {
                    let (lhs, rhs) = pop_two(&mut stack)?;
                    stack.push(lhs.and(&rhs)?);
                }
                Instruction::Or => {
                    let (lhs, rhs) = pop_two(&mut stack)?;
                    stack.push(lhs.or(&rhs)?);
                }
                Instruction::Not => {
                    let value = pop_one(&mut stack)?;
                    stack.push(value.not()?);
                }
                Instruction::Neg => {
                    let value = pop_one(&mut stack)?;
                    stack.push(value.neg()?);
                }
                Instruction::Like(id) => {
                    let value = pop_one(&mut stack)?;
                    let regex = self
                        .regexes
                        .get(*id)
                        .ok_or_else(|| CsvqlError::evaluation("unknown LIKE pattern id"))?;
                    match &value {
                        Value::Null(_) => stack.push(Value::Null(Type::Boolean)),
                        Value::String(s) => stack.push(Value::Boolean(regex.is_match(s))),
                        other => {
                            return Err(CsvqlError::evaluation(format!(
                                "LIKE needs a string operand, not {}",
                                other.ty()
                            )))
                        }
                    }
                }
                Instruction::Between => {
                    let high = pop_one(&mut stack)?;
                    let low = pop_one(&mut stack)?;
                    let value = pop_one(&mut stack)?;
                    let lower = compare(&value, &low, |o| o != Ordering::Less)?;
                    let upper = compare(&value, &high, |o| o != Ordering::Greater)?;
                    stack.push(lower.and(&upper)?);
                }
                Instruction::In(arity) => {
                    let mut list = Vec::with_capacity(*arity);
                    for _ in 0..*arity {
                        list.push(pop_one(&mut stack)?);
                    }
                    let value = pop_one(&mut stack)?;
                    let mut result = Value::Boolean(false);
                    for item in list.iter().rev() {
                        result = result.or(&compare(&value, item, |o| o == Ordering::Equal)?)?;
                    }
                    stack.push(result);
                }
                Instruction::Is(literal) => {
                    let value = pop_one(&mut stack)?;
                    stack.push(Value::Boolean(is_literal(&value, literal)));
                }
                Instruction::IsNot(literal) => {
                    let value = pop_one(&mut stack)?;
                    stack.push(Value::Boolean(!is_literal(&value, literal)));
                }
                Instruction::Cast(ty) => {
                    let value = pop_one(&mut stack)?;
                    stack.push(value.cast(*ty)?);
                }
                Instruction::Call(id, arity) => {
                    let mut args = vec![Value::Null(Type::None); *arity];
                    for slot in args.iter_mut().rev() {
                        *slot = pop_one(&mut stack)?;
                    }
                    stack.push(functions.call(*id, &args)?);
                }
            }
        }
        match (stack.pop(), stack.is_empty()) {
            (Some(value), true) => Ok(value),
            _ => Err(CsvqlError::evaluation(
                "expression did not evaluate to exactly one value",
            )),
        }
    }
}

fn pop_one(stack: &mut Vec<Value>) -> Result<Value, CsvqlError> {
    stack
        .pop()
        .ok_or_else(|| CsvqlError::evaluation("stack underflow"))
}

fn pop_two(stack: &mut Vec<Value>) -> Result<(Value, Value), CsvqlError> {
    let rhs = pop_one(stack)?;
    let lhs = pop_one(stack)?;
    Ok((lhs, rhs))
}

/// Applies a comparison; an unknown ordering (a null operand) yields a null
/// boolean.
fn compare(
    lhs: &Value,
    rhs: &Value,
    predicate: impl FnOnce(Ordering) -> bool,
) -> Result<Value, CsvqlError> {
    match lhs.compare(rhs)? {
        Some(ordering) => Ok(Value::Boolean(predicate(ordering))),
        None => Ok(Value::Null(Type::Boolean)),
    }
}

/// `IS` never yields null: `x IS NULL` is true for any typed null, `x IS
/// TRUE` is true only for boolean true.
fn is_literal(value: &Value, literal: &Value) -> bool {
    match literal {
        Value::Null(_) => value.is_null(),
        Value::Boolean(b) => matches!(value, Value::Boolean(v) if v == b),
        other => value == other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluate(machine: &StackMachine) -> Value {
        machine
            .evaluate(&VariableStore::new(), &FunctionRegistry::with_builtins())
            .unwrap()
    }

    #[test]
    fn arithmetic_sequence() {
        // 7 * 5 / 4
        let mut machine = StackMachine::new();
        machine.add_instruction(Instruction::Push(Value::Int(7)));
        machine.add_instruction(Instruction::Push(Value::Int(5)));
        machine.add_instruction(Instruction::Mul);
        machine.add_instruction(Instruction::Push(Value::Int(4)));
        machine.add_instruction(Instruction::Div);
        assert_eq!(evaluate(&machine), Value::Int(8));
    }

    #[test]
    fn division_by_zero_pushes_null() {
        let mut machine = StackMachine::new();
        machine.add_instruction(Instruction::Push(Value::Int(1)));
        machine.add_instruction(Instruction::Push(Value::Int(0)));
        machine.add_instruction(Instruction::Div);
        assert_eq!(evaluate(&machine), Value::Null(Type::Int));
    }

    #[test]
    fn comparisons_with_null_are_null() {
        let mut machine = StackMachine::new();
        machine.add_instruction(Instruction::Push(Value::Int(1)));
        machine.add_instruction(Instruction::Push(Value::Null(Type::Int)));
        machine.add_instruction(Instruction::Eq);
        assert_eq!(evaluate(&machine), Value::Null(Type::Boolean));
    }

    #[test]
    fn variables_come_from_the_store() {
        let mut machine = StackMachine::new();
        machine.add_instruction(Instruction::PushVar(0));
        machine.add_instruction(Instruction::Push(Value::Int(100)));
        machine.add_instruction(Instruction::Gt);
        let mut store = VariableStore::new();
        store.set(0, Value::Int(815));
        let result = machine
            .evaluate(&store, &FunctionRegistry::with_builtins())
            .unwrap();
        assert_eq!(result, Value::Boolean(true));
    }

    #[test]
    fn between_is_inclusive() {
        for (value, expected) in [(100, true), (9999, true), (99, false), (10000, false)] {
            let mut machine = StackMachine::new();
            machine.add_instruction(Instruction::Push(Value::Int(value)));
            machine.add_instruction(Instruction::Push(Value::Int(100)));
            machine.add_instruction(Instruction::Push(Value::Int(9999)));
            machine.add_instruction(Instruction::Between);
            assert_eq!(evaluate(&machine), Value::Boolean(expected));
        }
    }

    #[test]
    fn in_list_membership() {
        let mut machine = StackMachine::new();
        machine.add_instruction(Instruction::Push(Value::Int(2)));
        machine.add_instruction(Instruction::Push(Value::Int(1)));
        machine.add_instruction(Instruction::Push(Value::Int(2)));
        machine.add_instruction(Instruction::Push(Value::Int(3)));
        machine.add_instruction(Instruction::In(3));
        assert_eq!(evaluate(&machine), Value::Boolean(true));
    }

    #[test]
    fn like_matches_whole_strings() {
        let mut machine = StackMachine::new();
        let id = machine.add_pattern(".*berg").unwrap();
        machine.add_instruction(Instruction::Push(Value::String("Fürstenberg".into())));
        machine.add_instruction(Instruction::Like(id));
        assert_eq!(evaluate(&machine), Value::Boolean(true));

        let mut machine = StackMachine::new();
        let id = machine.add_pattern("berg").unwrap();
        machine.add_instruction(Instruction::Push(Value::String("Fürstenberg".into())));
        machine.add_instruction(Instruction::Like(id));
        assert_eq!(evaluate(&machine), Value::Boolean(false));
    }

    #[test]
    fn is_never_yields_null() {
        let mut machine = StackMachine::new();
        machine.add_instruction(Instruction::Push(Value::Null(Type::Int)));
        machine.add_instruction(Instruction::Is(Value::Null(Type::Boolean)));
        assert_eq!(evaluate(&machine), Value::Boolean(true));

        let mut machine = StackMachine::new();
        machine.add_instruction(Instruction::Push(Value::Null(Type::Boolean)));
        machine.add_instruction(Instruction::IsNot(Value::Boolean(true)));
        assert_eq!(evaluate(&machine), Value::Boolean(true));
    }

    #[test]
    fn call_pops_arguments_in_order(){
        let mut machine = StackMachine::new();
        let registry = FunctionRegistry::with_builtins();
        let pow = registry.id_of("POW").unwrap();
        machine.add_instruction(Instruction::Push(Value::Int(2)));
        machine.add_instruction(Instruction::Push(Value::Int(10)));
        machine.add_instruction(Instruction::Call(pow, 2));
        let result = machine.evaluate(&VariableStore::new(), &registry).unwrap();
        assert_eq!(result, Value::Real(1024.0));
    }
}
