use std::fs;

use csvql_engine::{Database, ExecutionEngine};
use tempfile::TempDir;

const PEOPLE_CSV: &str = "\
1,'Anna',10.0
2,'Bert',
3,'Carla',8.5
4,'Dora',10.0
";

fn engine_with_people(dir: &TempDir) -> ExecutionEngine {
    let path = dir.path().join("people.csv");
    fs::write(&path, PEOPLE_CSV).unwrap();

    let mut engine = ExecutionEngine::new(Database::in_memory());
    engine.set_files(vec![path.to_string_lossy().into_owned()]);
    let mut sink = Vec::new();
    engine
        .execute(
            "CREATE TABLE people(id INT, name STRING(32), score REAL)",
            &mut sink,
        )
        .unwrap();
    engine
        .execute("CREATE MAPPING people('people\\.csv')", &mut sink)
        .unwrap();
    engine
}

fn run(engine: &mut ExecutionEngine, sql: &str) -> (i64, String) {
    let mut output = Vec::new();
    let count = engine.execute(sql, &mut output).unwrap();
    (count, String::from_utf8(output).unwrap())
}

#[test]
fn is_null_filters_typed_nulls() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_with_people(&dir);
    let (count, output) = run(&mut engine, "SELECT id FROM people WHERE score IS NULL");
    assert_eq!(count, 1);
    assert_eq!(output, "#ID\n2\n");

    let (count, output) = run(
        &mut engine,
        "SELECT id FROM people WHERE score IS NOT NULL order by id desc",
    );
    assert_eq!(count, 3);
    assert_eq!(output, "#ID\n4\n3\n1\n");
}

#[test]
fn null_comparisons_do_not_match() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_with_people(&dir);
    // Bert's null score is neither > 0 nor <= 0
    let (count, _) = run(
        &mut engine,
        "SELECT id FROM people WHERE score > 0.0 OR score <= 0.0",
    );
    assert_eq!(count, 3);
}

#[test]
fn nulls_propagate_through_projections() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_with_people(&dir);
    let (count, output) = run(
        &mut engine,
        "SELECT id, score * 2.0 as doubled FROM people order by id",
    );
    assert_eq!(count, 4);
    assert_eq!(
        output,
        "#ID,DOUBLED\n1,20.000000\n2,NULL\n3,17.000000\n4,20.000000\n"
    );
}

#[test]
fn count_star_counts_null_rows() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_with_people(&dir);
    let (_, output) = run(
        &mut engine,
        "SELECT count(*) as all_rows, count(score) as scored FROM people",
    );
    assert_eq!(output, "#ALL_ROWS,SCORED\n4,3\n");
}

#[test]
fn like_and_in_predicates() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_with_people(&dir);
    let (count, output) = run(
        &mut engine,
        "SELECT name FROM people WHERE name LIKE 'C%'",
    );
    assert_eq!(count, 1);
    assert_eq!(output, "#NAME\n'Carla'\n");

    let (count, output) = run(
        &mut engine,
        "SELECT id FROM people WHERE id IN (1, 3) order by id",
    );
    assert_eq!(count, 2);
    assert_eq!(output, "#ID\n1\n3\n");
}

#[test]
fn multi_key_sort_orders_nulls_per_direction() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_with_people(&dir);
    // descending scores put the null first, ties break by ascending id
    let (count, output) = run(
        &mut engine,
        "SELECT id, score FROM people order by score desc, id asc",
    );
    assert_eq!(count, 4);
    assert_eq!(
        output,
        "#ID,SCORE\n2,NULL\n1,10.000000\n4,10.000000\n3,8.500000\n"
    );
}

#[test]
fn between_and_cast_in_predicates() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine_with_people(&dir);
    let (count, output) = run(
        &mut engine,
        "SELECT id FROM people WHERE CAST(id AS REAL) BETWEEN 2.0 AND 3.0 order by id",
    );
    assert_eq!(count, 2);
    assert_eq!(output, "#ID\n2\n3\n");
}
