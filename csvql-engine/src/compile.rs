use csvql_ast::{BinaryOperator, Expr, SymbolRef, UnaryOperator};

use crate::{
    error::CsvqlError,
    function::FunctionRegistry,
    stack::{Instruction, StackMachine, VariableStore},
};

/// A scalar expression compiled into a stack machine, together with the
/// variable mapping: the qualified name of every referenced identifier and
/// the variable id it was assigned.
pub struct CompiledExpression {
    /// The compiled machine.
    pub machine: StackMachine,
    /// `(qualified name, variable id)` pairs, one per distinct identifier.
    pub variables: Vec<(String, usize)>,
}

/// Compiles an expression by postorder traversal. Aggregate calls cannot be
/// compiled; they are handled by the grouping and aggregation operators.
pub fn compile_expression(
    expr: &Expr,
    functions: &FunctionRegistry,
) -> Result<CompiledExpression, CsvqlError> {
    let mut compiled = CompiledExpression {
        machine: StackMachine::new(),
        variables: vec![],
    };
    emit(expr, functions, &mut compiled)?;
    Ok(compiled)
}

fn emit(
    expr: &Expr,
    functions: &FunctionRegistry,
    compiled: &mut CompiledExpression,
) -> Result<(), CsvqlError> {
    match expr {
        Expr::Literal(value) => {
            compiled.machine.add_instruction(Instruction::Push(value.clone()));
        }
        Expr::Identifier(identifier) => {
            let name = identifier.qualified_identifier();
            let id = match compiled.variables.iter().find(|(n, _)| *n == name) {
                Some((_, id)) => *id,
                None => {
                    let id = compiled.variables.len();
                    compiled.variables.push((name, id));
                    id
                }
            };
            compiled.machine.add_instruction(Instruction::PushVar(id));
        }
        Expr::QualifiedAsterisk(_) => {
            return Err(CsvqlError::evaluation(
                "a wildcard cannot be part of a scalar expression",
            ));
        }
        Expr::Unary(unary) => {
            emit(&unary.expr, functions, compiled)?;
            match unary.op {
                UnaryOperator::Not => compiled.machine.add_instruction(Instruction::Not),
                UnaryOperator::Minus => compiled.machine.add_instruction(Instruction::Neg),
                UnaryOperator::Plus => {}
            }
        }
        Expr::Cast(cast) => {
            emit(&cast.expr, functions, compiled)?;
            compiled
                .machine
                .add_instruction(Instruction::Cast(cast.target));
        }
        Expr::Binary(binary) => {
            // IS carries its literal inside the instruction
            if matches!(binary.op, BinaryOperator::Is | BinaryOperator::IsNot) {
                let literal = match binary.rhs.as_ref() {
                    Expr::Literal(value) => value.clone(),
                    _ => {
                        return Err(CsvqlError::evaluation(
                            "IS needs a boolean or null literal on the right side",
                        ))
                    }
                };
                emit(&binary.lhs, functions, compiled)?;
                let instruction = if binary.op == BinaryOperator::Is {
                    Instruction::Is(literal)
                } else {
                    Instruction::IsNot(literal)
                };
                compiled.machine.add_instruction(instruction);
                return Ok(());
            }
            emit(&binary.lhs, functions, compiled)?;
            emit(&binary.rhs, functions, compiled)?;
            let instruction = match binary.op {
                BinaryOperator::Add => Instruction::Add,
                BinaryOperator::Subtract => Instruction::Sub,
                BinaryOperator::Multiply => Instruction::Mul,
                BinaryOperator::Divide => Instruction::Div,
                BinaryOperator::Modulo => Instruction::Mod,
                BinaryOperator::Concat => Instruction::Concat,
                BinaryOperator::Eq => Instruction::Eq,
                BinaryOperator::NotEq => Instruction::Neq,
                BinaryOperator::Gt => Instruction::Gt,
                BinaryOperator::GtEq => Instruction::Ge,
                BinaryOperator::Lt => Instruction::Lt,
                BinaryOperator::LtEq => Instruction::Le,
                BinaryOperator::And => Instruction::And,
                BinaryOperator::Or => Instruction::Or,
                BinaryOperator::Is | BinaryOperator::IsNot => unreachable!("handled above"),
            };
            compiled.machine.add_instruction(instruction);
        }
        Expr::Like(like) => {
            emit(&like.expr, functions, compiled)?;
            let id = compiled.machine.add_pattern(&like.regex)?;
            compiled.machine.add_instruction(Instruction::Like(id));
        }
        Expr::Between(between) => {
            emit(&between.expr, functions, compiled)?;
            emit(&between.low, functions, compiled)?;
            emit(&between.high, functions, compiled)?;
            compiled.machine.add_instruction(Instruction::Between);
        }
        Expr::In(in_expr) => {
            emit(&in_expr.expr, functions, compiled)?;
            for item in &in_expr.list {
                emit(item, functions, compiled)?;
            }
            compiled
                .machine
                .add_instruction(Instruction::In(in_expr.list.len()));
        }
        Expr::Function(function) => {
            for arg in &function.args {
                emit(arg, functions, compiled)?;
            }
            let name = canonical_function_name(&function.name);
            let id = functions.id_of(name).ok_or_else(|| {
                CsvqlError::evaluation(format!("unknown function '{}'", function.name))
            })?;
            compiled
                .machine
                .add_instruction(Instruction::Call(id, function.args.len()));
        }
        Expr::Aggregate(_) => {
            return Err(CsvqlError::evaluation(
                "aggregate functions cannot be part of a scalar expression",
            ));
        }
    }
    Ok(())
}

fn canonical_function_name(name: &str) -> &str {
    match name {
        "POWER" => "POW",
        "CHARACTER_LENGTH" => "CHAR_LENGTH",
        other => other,
    }
}

/// Resolves the compiled variables against the input schema, returning
/// `(variable id, column index)` pairs. A variable matches a column symbol
/// by name, qualified identifier or bare identifier.
pub(crate) fn bind_variables(
    compiled: &CompiledExpression,
    input_symbols: &[SymbolRef],
) -> Result<Vec<(usize, usize)>, CsvqlError> {
    let mut bindings = vec![];
    for (name, id) in &compiled.variables {
        let index = variable_index(name, input_symbols).ok_or_else(|| {
            CsvqlError::evaluation(format!("variable '{}' not found in context", name))
        })?;
        bindings.push((*id, index));
    }
    Ok(bindings)
}

pub(crate) fn variable_index(name: &str, input_symbols: &[SymbolRef]) -> Option<usize> {
    input_symbols.iter().position(|info| {
        let info = info.borrow();
        info.name == name || info.qualified_identifier == name || info.identifier == name
    })
}

/// Copies the bound row columns into the variable store.
pub(crate) fn fill_variable_store(
    store: &mut VariableStore,
    bindings: &[(usize, usize)],
    row: &[csvql_core::Value],
) {
    for (variable, column) in bindings {
        store.set(*variable, row[*column].clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csvql_ast::SymbolTable;
    use csvql_core::Value;
    use csvql_parser::Parser;

    fn compile(sql: &str) -> CompiledExpression {
        let scope = SymbolTable::create();
        let mut parser = Parser::new_with_sql(sql).unwrap();
        let expr = parser.parse_expression(&scope).unwrap();
        compile_expression(&expr, &FunctionRegistry::with_builtins()).unwrap()
    }

    fn run(sql: &str) -> Value {
        let compiled = compile(sql);
        compiled
            .machine
            .evaluate(&VariableStore::new(), &FunctionRegistry::with_builtins())
            .unwrap()
    }

    #[test]
    fn constant_folding_matches_direct_interpretation() {
        assert_eq!(run("7 * 5 / 4"), Value::Int(8));
        assert_eq!(run("3 + 4"), Value::Int(7));
        assert_eq!(run("1 = 1 AND 2 < 3"), Value::Boolean(true));
        assert_eq!(run("'a' || 'b' || 'c'"), Value::String("abc".into()));
        assert_eq!(run("CAST(1 AS REAL)"), Value::Real(1.0));
        assert_eq!(run("1 IN (2, 3)"), Value::Boolean(false));
        assert_eq!(run("'Mark' LIKE 'Mar_'"), Value::Boolean(true));
        assert_eq!(run("NULL IS NULL"), Value::Boolean(true));
        assert_eq!(run("EXTRACT(YEAR FROM DATE'1969-05-17')"), Value::Int(1969));
    }

    #[test]
    fn variables_are_deduplicated() {
        let compiled = compile("ID > 100 AND ID < 9999");
        assert_eq!(compiled.variables.len(), 1);
        assert_eq!(compiled.variables[0].0, "ID");
    }

    #[test]
    fn aggregates_do_not_compile() {
        let scope = SymbolTable::create();
        let mut parser = Parser::new_with_sql("COUNT(ID)").unwrap();
        let expr = parser.parse_expression(&scope).unwrap();
        assert!(compile_expression(&expr, &FunctionRegistry::with_builtins()).is_err());
    }
}
