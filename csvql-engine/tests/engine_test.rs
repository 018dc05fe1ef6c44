use std::{fs, path::Path};

use csvql_engine::{CsvqlError, Database, ExecutionEngine};
use tempfile::TempDir;

const EMPLOYEES_CSV: &str = "\
815,'Mark','Fürstenberg',1969-05-17,2003-04-15
4711,'Lars','Fürstenberg',1970-09-23,2010-02-01
9227,'Angelica','Tello de Fürstenberg',1963-03-06,2003-06-15
";

const SALARIES_CSV: &str = "\
815,5000.0,2003-04-15,2012-12-31
4711,12000.0,2010-02-01,2012-12-31
9227,450.0,2003-06-15,2012-12-31
";

fn write_file(dir: &Path, name: &str, content: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path.to_string_lossy().into_owned()
}

fn engine_with_fixtures(dir: &TempDir) -> ExecutionEngine {
    let employees = write_file(dir.path(), "employees.csv", EMPLOYEES_CSV);
    let salaries = write_file(dir.path(), "salaries.csv", SALARIES_CSV);

    let mut engine = ExecutionEngine::new(Database::in_memory());
    engine.set_files(vec![employees, salaries]);
    let mut sink = Vec::new();
    engine
        .execute(
            "CREATE TABLE employees(id INT, first_name STRING(64), last_name STRING(64), \
             birth_date DATE, hire_date DATE)",
            &mut sink,
        )
        .unwrap();
    engine
        .execute(
            "CREATE TABLE salaries(id INT, salary REAL, from_date DATE, to_date DATE)",
            &mut sink,
        )
        .unwrap();
    engine
        .execute("CREATE MAPPING employees('employees\\.csv')", &mut sink)
        .unwrap();
    engine
        .execute("CREATE MAPPING salaries('salaries\\.csv')", &mut sink)
        .unwrap();
    engine
}

fn run(engine: &mut ExecutionEngine, sql: &str) -> (i64, String) {
    let mut output = Vec::new();
    let count = engine.execute(sql, &mut output).unwrap();
    (count, String::from_utf8(output).unwrap())
}

#[test]
fn filter_and_projection() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_with_fixtures(&dir);
    let (count, output) = run(
        &mut engine,
        "SELECT id,(first_name || ' ' || last_name) as name,birth_date birthday, \
         7 * 5 / 4 as calc FROM employees emp WHERE id BETWEEN 100 AND 9999 AND \
         emp.birth_date > DATE'1960-01-01'",
    );
    assert_eq!(count, 3);
    assert_eq!(
        output,
        "#ID,NAME,BIRTHDAY,CALC\n\
         815,'Mark Fürstenberg',1969-05-17,8\n\
         4711,'Lars Fürstenberg',1970-09-23,8\n\
         9227,'Angelica Tello de Fürstenberg',1963-03-06,8\n"
    );
}

#[test]
fn group_by_with_aggregates() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_with_fixtures(&dir);
    // one extra row with a null id, which COUNT has to skip
    write_file(
        dir.path(),
        "employees.csv",
        &format!(
            "{}{}",
            EMPLOYEES_CSV, ",'Fred','Fürstenberg',1971-04-01,2011-03-01\n"
        ),
    );

    let (count, output) = run(
        &mut engine,
        "SELECT count(id) as count,last_name,max(birth_date) as \"max birthdate\",\
         min(hire_date) as \"min hire\" FROM employees group by last_name order by last_name",
    );
    assert_eq!(count, 2);
    assert_eq!(
        output,
        "#COUNT,LAST_NAME,MAX BIRTHDATE,MIN HIRE\n\
         2,'Fürstenberg',1971-04-01,2003-04-15\n\
         1,'Tello de Fürstenberg',1963-03-06,2003-06-15\n"
    );
}

#[test]
fn inner_hash_join() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_with_fixtures(&dir);

    // the plan picks the hash join for an identifier equi-join
    let (_, plan) = run(
        &mut engine,
        "EXPLAIN EXEC SELECT * FROM employees emp INNER JOIN salaries sal ON emp.id = sal.id",
    );
    assert!(plan.contains("InnerHashJoinOperator"), "plan was: {}", plan);

    let (count, output) = run(
        &mut engine,
        "SELECT * FROM employees emp INNER JOIN salaries sal ON emp.id = sal.id",
    );
    assert_eq!(count, 3);
    for id in ["815", "4711", "9227"] {
        assert_eq!(
            output.lines().filter(|line| line.starts_with(id)).count(),
            1,
            "employee {} missing from: {}",
            id,
            output
        );
    }
    assert!(output.contains("4711,'Lars','Fürstenberg',1970-09-23,2010-02-01,4711,12000.000000"));
}

#[test]
fn non_equi_join_uses_nested_loops() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_with_fixtures(&dir);
    let (_, plan) = run(
        &mut engine,
        "EXPLAIN EXEC SELECT * FROM employees emp INNER JOIN salaries sal ON emp.id <> sal.id",
    );
    assert!(plan.contains("InnerJoinOperatorNode"), "plan was: {}", plan);

    let (count, _) = run(
        &mut engine,
        "SELECT * FROM employees emp INNER JOIN salaries sal ON emp.id <> sal.id",
    );
    // every employee pairs with the two other salaries
    assert_eq!(count, 6);
}

#[test]
fn hash_join_equals_filtered_cross_product() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_with_fixtures(&dir);
    let (hash_count, hash_output) = run(
        &mut engine,
        "SELECT emp.id, sal.salary FROM employees emp INNER JOIN salaries sal \
         ON emp.id = sal.id order by emp.id",
    );
    let (cross_count, cross_output) = run(
        &mut engine,
        "SELECT emp.id, sal.salary FROM employees emp CROSS JOIN salaries sal \
         WHERE emp.id = sal.id order by emp.id",
    );
    assert_eq!(hash_count, cross_count);
    assert_eq!(hash_output, cross_output);
}

#[test]
fn union_preserves_all_rows() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_with_fixtures(&dir);
    let (count, output) = run(
        &mut engine,
        "SELECT * FROM employees WHERE id < 4700 UNION \
         (SELECT * FROM employees WHERE id >= 4700)",
    );
    assert_eq!(count, 3);
    for id in ["815", "4711", "9227"] {
        assert_eq!(
            output.lines().filter(|line| line.starts_with(id)).count(),
            1
        );
    }
    // the left side comes first
    assert!(output.lines().nth(1).unwrap().starts_with("815"));
}

#[test]
fn limit_with_offset() {
    let dir = TempDir::new().unwrap();
    let six_rows = "\
1,'A','A',1960-01-01,2000-01-01
2,'B','B',1960-01-01,2000-01-01
3,'C','C',1960-01-01,2000-01-01
4,'D','D',1960-01-01,2000-01-01
5,'E','E',1960-01-01,2000-01-01
6,'F','F',1960-01-01,2000-01-01
";
    let mut engine = engine_with_fixtures(&dir);
    let employees = write_file(dir.path(), "employees.csv", six_rows);
    let salaries = dir.path().join("salaries.csv").to_string_lossy().into_owned();
    engine.set_files(vec![employees, salaries]);

    let (count, output) = run(
        &mut engine,
        "SELECT id FROM employees order by id limit 3 offset 3",
    );
    assert_eq!(count, 3);
    assert_eq!(output, "#ID\n4\n5\n6\n");
}

#[test]
fn constant_select_over_system_dual() {
    let mut engine = ExecutionEngine::new(Database::in_memory());
    let mut output = Vec::new();
    let count = engine
        .execute("SELECT 3+4 FROM SYSTEM_DUAL", &mut output)
        .unwrap();
    assert_eq!(count, 1);
    let text = String::from_utf8(output).unwrap();
    assert!(text.ends_with("7\n"), "output was: {}", text);
}

#[test]
fn identical_queries_yield_identical_output() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_with_fixtures(&dir);
    let sql = "SELECT id, last_name FROM employees WHERE id > 100 order by id";
    let (_, first) = run(&mut engine, sql);
    // keyword case and whitespace do not matter
    let (_, second) = run(
        &mut engine,
        "select   id, last_name from employees where id > 100 ORDER BY id",
    );
    assert_eq!(first, second);
}

#[test]
fn aggregation_identities() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_with_fixtures(&dir);
    let (count, output) = run(
        &mut engine,
        "SELECT count(*) as rows, sum(id) as total, count(id) as ids, avg(id) as average \
         FROM employees",
    );
    assert_eq!(count, 1);
    let line = output.lines().nth(1).unwrap();
    // COUNT(*) = 3, SUM = 14753, AVG = SUM / COUNT
    assert_eq!(line, format!("3,{},3,{}", 14753, 14753 / 3));
}

#[test]
fn subqueries_in_from() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_with_fixtures(&dir);
    let (count, output) = run(
        &mut engine,
        "SELECT id FROM (SELECT id FROM employees WHERE id > 1000) AS sub WHERE id < 5000",
    );
    assert_eq!(count, 1);
    assert_eq!(output, "#ID\n4711\n");
}

#[test]
fn explain_ast_dumps_the_tree() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_with_fixtures(&dir);
    let (count, output) = run(&mut engine, "EXPLAIN AST SELECT id FROM employees");
    assert_eq!(count, 0);
    assert!(output.contains("QuerySpecification"));
    assert!(output.contains("TableIdentifier EMPLOYEES"));
}

#[test]
fn malformed_rows_are_skipped_not_fatal() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_with_fixtures(&dir);
    let broken = format!("{}oops,not,a,valid,row\n", EMPLOYEES_CSV);
    let employees = write_file(dir.path(), "employees.csv", &broken);
    let salaries = dir.path().join("salaries.csv").to_string_lossy().into_owned();
    engine.set_files(vec![employees, salaries]);

    let (count, _) = run(&mut engine, "SELECT id FROM employees");
    assert_eq!(count, 3);
}

#[test]
fn missing_mapping_aborts_the_query() {
    let mut engine = ExecutionEngine::new(Database::in_memory());
    let mut sink = Vec::new();
    engine
        .execute("CREATE TABLE lonely(id INT)", &mut sink)
        .unwrap();
    let err = engine
        .execute("SELECT id FROM lonely", &mut sink)
        .unwrap_err();
    assert!(matches!(err, CsvqlError::Catalog(_)));
}

#[test]
fn ddl_round_trip_with_persistence() {
    let dir = TempDir::new().unwrap();
    let db_dir = dir.path().join("db");
    {
        let mut engine = ExecutionEngine::new(Database::open(&db_dir).unwrap());
        let mut sink = Vec::new();
        engine
            .execute("CREATE TABLE employees(id INT, last_name STRING(64))", &mut sink)
            .unwrap();
        engine
            .execute("CREATE MAPPING employees('employees\\.csv', ';', true)", &mut sink)
            .unwrap();
    }
    // a fresh engine over the same directory sees the catalog
    let employees = write_file(dir.path(), "employees.csv", "id;last_name\n815;'Mark'\n");
    let mut engine = ExecutionEngine::new(Database::open(&db_dir).unwrap());
    engine.set_files(vec![employees]);
    let (count, output) = run(&mut engine, "SELECT last_name FROM employees");
    assert_eq!(count, 1);
    assert_eq!(output, "#LAST_NAME\n'Mark'\n");

    let mut sink = Vec::new();
    engine.execute("DROP TABLE employees", &mut sink).unwrap();
    let err = engine.execute("SELECT * FROM employees", &mut sink).unwrap_err();
    assert!(matches!(err, CsvqlError::Semantic(_)));
}

#[test]
fn cancelled_scans_join_their_ingest_thread() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_with_fixtures(&dir);
    // limit 1 drops the scan before the file is exhausted
    let mut big = String::new();
    for i in 0..5000 {
        big.push_str(&format!("{},'A','B',1960-01-01,2000-01-01\n", i));
    }
    let employees = write_file(dir.path(), "employees.csv", &big);
    let salaries = dir.path().join("salaries.csv").to_string_lossy().into_owned();
    engine.set_files(vec![employees, salaries]);

    let (count, _) = run(&mut engine, "SELECT id FROM employees limit 1");
    assert_eq!(count, 1);
}
