use std::{
    fs::File,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use crossbeam_channel::Sender;
use csvql_core::{Type, Value};
use tracing::{debug, warn};

use crate::{
    block::{Block, BlockManager},
    error::CsvqlError,
};

/// The CSV options of one mapped file.
#[derive(Clone, Copy, Debug)]
pub struct CsvReadOptions {
    /// The field delimiter.
    pub delimiter: char,
    /// Whether the first line is a header to skip.
    pub skip_first_line: bool,
}

/// Decodes one field according to its declared column type. An empty field
/// is a typed null; string fields may be single-quoted with `''` as the
/// escape for an embedded quote (double quoting is handled by the CSV
/// tokenizer itself).
fn decode_field(field: &str, ty: Type) -> Result<Value, CsvqlError> {
    if ty == Type::String {
        if field.len() >= 2 && field.starts_with('\'') && field.ends_with('\'') {
            let inner = &field[1..field.len() - 1];
            return Ok(Value::String(inner.replace("''", "'")));
        }
        if field.is_empty() {
            return Ok(Value::Null(Type::String));
        }
        return Ok(Value::String(field.to_string()));
    }
    Ok(Value::parse_typed(field, ty)?)
}

/// Spawns the dedicated ingest thread of one table scan. The thread runs
/// the CSV tokenizer over the mapped file, decodes each record against the
/// declared column types and appends the values to blocks; full blocks are
/// pushed into the bounded channel. Malformed rows are logged with their
/// line number and skipped. The cancel flag is observed at row boundaries.
pub(crate) fn spawn_csv_ingest(
    path: &Path,
    types: Vec<Type>,
    options: CsvReadOptions,
    manager: Arc<BlockManager>,
    sender: Sender<Block>,
    cancel: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, CsvqlError> {
    let file = File::open(path)?;
    let path = path.to_path_buf();
    let reader = csv::ReaderBuilder::new()
        .delimiter(options.delimiter as u8)
        .has_headers(options.skip_first_line)
        .escape(Some(b'\\'))
        .flexible(true)
        .from_reader(file);

    let handle = std::thread::spawn(move || {
        ingest(reader, &path, &types, &manager, &sender, &cancel);
    });
    Ok(handle)
}

fn ingest(
    mut reader: csv::Reader<File>,
    path: &Path,
    types: &[Type],
    manager: &BlockManager,
    sender: &Sender<Block>,
    cancel: &AtomicBool,
) {
    let mut block = manager.create_block();
    let mut record = csv::StringRecord::new();
    let mut row: Vec<Value> = Vec::with_capacity(types.len());

    loop {
        if cancel.load(Ordering::Relaxed) {
            debug!(file = %path.display(), "csv ingest cancelled");
            return;
        }
        let line = reader.position().line();
        match reader.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {
                row.clear();
                if record.len() != types.len() {
                    warn!(
                        file = %path.display(),
                        line,
                        expected = types.len(),
                        got = record.len(),
                        "skipping row with wrong field count"
                    );
                    continue;
                }
                let mut failed = false;
                for (field, &ty) in record.iter().zip(types) {
                    match decode_field(field, ty) {
                        Ok(value) => row.push(value),
                        Err(err) => {
                            warn!(file = %path.display(), line, %err, "skipping malformed row");
                            failed = true;
                            break;
                        }
                    }
                }
                if failed {
                    continue;
                }
                for value in &row {
                    if !block.add_value(value) {
                        block.mark_next_block();
                        if sender.send(block).is_err() {
                            // the consumer is gone, stop producing
                            return;
                        }
                        block = manager.create_block();
                        block.add_value(value);
                    }
                }
                block.next_row();
            }
            Err(err) => {
                warn!(file = %path.display(), line, %err, "skipping unreadable row");
            }
        }
    }
    block.end_blocks();
    let _ = sender.send(block);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::io::Write;

    fn run_ingest(content: &str, types: Vec<Type>, options: CsvReadOptions) -> Vec<Block> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let manager = Arc::new(BlockManager::default());
        let (sender, receiver) = bounded(16);
        let handle = spawn_csv_ingest(
            file.path(),
            types,
            options,
            manager,
            sender,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();
        handle.join().unwrap();
        receiver.try_iter().collect()
    }

    fn decode_rows(blocks: &[Block]) -> Vec<Vec<Value>> {
        let mut rows = vec![];
        let mut row = vec![];
        for block in blocks {
            let mut pos = 0;
            loop {
                match block.decode_at(&mut pos).unwrap() {
                    crate::block::Decoded::Value(v) => row.push(v),
                    crate::block::Decoded::RowEnd => rows.push(std::mem::take(&mut row)),
                    crate::block::Decoded::NeedMore => break,
                    crate::block::Decoded::End => return rows,
                }
            }
        }
        rows
    }

    #[test]
    fn typed_fields_are_decoded() {
        let blocks = run_ingest(
            "815,'Mark',1969-05-17,true,47.11\n",
            vec![
                Type::Int,
                Type::String,
                Type::Date,
                Type::Boolean,
                Type::Real,
            ],
            CsvReadOptions {
                delimiter: ',',
                skip_first_line: false,
            },
        );
        let rows = decode_rows(&blocks);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], Value::Int(815));
        assert_eq!(rows[0][1], Value::String("Mark".into()));
        assert_eq!(rows[0][3], Value::Boolean(true));
        assert_eq!(rows[0][4], Value::Real(47.11));
    }

    #[test]
    fn empty_fields_are_typed_nulls() {
        let blocks = run_ingest(
            ",x\n",
            vec![Type::Int, Type::String],
            CsvReadOptions {
                delimiter: ',',
                skip_first_line: false,
            },
        );
        let rows = decode_rows(&blocks);
        assert_eq!(rows[0][0], Value::Null(Type::Int));
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let blocks = run_ingest(
            "1,a\nnot-a-number,b\n3,c\n",
            vec![Type::Int, Type::String],
            CsvReadOptions {
                delimiter: ',',
                skip_first_line: false,
            },
        );
        let rows = decode_rows(&blocks);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], Value::Int(1));
        assert_eq!(rows[1][0], Value::Int(3));
    }

    #[test]
    fn header_lines_are_skipped() {
        let blocks = run_ingest(
            "id;name\n815;Mark\n",
            vec![Type::Int, Type::String],
            CsvReadOptions {
                delimiter: ';',
                skip_first_line: true,
            },
        );
        let rows = decode_rows(&blocks);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], Value::Int(815));
    }

    #[test]
    fn quoted_strings_lose_their_quotes() {
        let blocks = run_ingest(
            "'it''s ok'\n",
            vec![Type::String],
            CsvReadOptions {
                delimiter: ',',
                skip_first_line: false,
            },
        );
        let rows = decode_rows(&blocks);
        assert_eq!(rows[0][0], Value::String("it's ok".into()));
    }
}
