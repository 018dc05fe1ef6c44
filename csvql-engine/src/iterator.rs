use std::{
    cmp::Ordering,
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    mem,
    sync::Arc,
};

use ahash::AHashMap;
use csvql_ast::SortOrder;
use csvql_core::Value;
use indexmap::IndexMap;

use crate::{
    aggregate::AggregationFunction,
    block::{Block, BlockManager, BlockProvider, Decoded, Row},
    error::CsvqlError,
    operators::RowOperator,
};

/// The lifecycle of an iterator; `next_row` after `Ended` stays `None`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum IteratorState {
    Unstarted,
    Running,
    Ended,
}

enum RowStep {
    Row(Row),
    NeedMore,
    End,
}

/// Decodes the next row out of a sequence of blocks, accumulating a row
/// that straddles blocks in `partial`.
fn decode_row(
    blocks: &[Block],
    block_index: &mut usize,
    pos: &mut usize,
    partial: &mut Row,
) -> Result<RowStep, CsvqlError> {
    loop {
        let block = match blocks.get(*block_index) {
            Some(block) => block,
            None => return Ok(RowStep::NeedMore),
        };
        match block.decode_at(pos)? {
            Decoded::Value(value) => partial.push(value),
            Decoded::RowEnd => return Ok(RowStep::Row(mem::take(partial))),
            Decoded::End => return Ok(RowStep::End),
            Decoded::NeedMore => {
                *block_index += 1;
                *pos = 0;
            }
        }
    }
}

/// Encodes a row into the current block, handing full blocks to `full` and
/// continuing in a fresh one from the manager.
fn encode_row(
    row: &Row,
    current: &mut Block,
    manager: &BlockManager,
    full: &mut Vec<Block>,
) -> Result<(), CsvqlError> {
    for value in row {
        if !current.add_value(value) {
            current.mark_next_block();
            full.push(mem::replace(current, manager.create_block()));
            if !current.add_value(value) {
                return Err(CsvqlError::evaluation(
                    "value does not fit into an empty block",
                ));
            }
        }
    }
    current.next_row();
    Ok(())
}

/// The basic one-pass iterator: reads values out of the blocks of a
/// [`BlockProvider`] and yields rows.
pub struct BlockIterator<P: BlockProvider> {
    provider: P,
    manager: Arc<BlockManager>,
    current: Option<Block>,
    pos: usize,
    partial: Row,
    state: IteratorState,
}

impl<P: BlockProvider> BlockIterator<P> {
    /// Creates an iterator over the blocks of the provider.
    pub fn new(provider: P, manager: Arc<BlockManager>) -> Self {
        BlockIterator {
            provider,
            manager,
            current: None,
            pos: 0,
            partial: vec![],
            state: IteratorState::Unstarted,
        }
    }

    /// The wrapped block provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Returns the next row, or `None` permanently once the end-of-blocks
    /// marker was reached.
    pub fn next_row(&mut self) -> Result<Option<Row>, CsvqlError> {
        if self.state == IteratorState::Ended {
            return Ok(None);
        }
        self.state = IteratorState::Running;
        loop {
            if self.current.is_none() {
                match self.provider.next_block()? {
                    Some(block) => self.current = Some(block),
                    None => {
                        self.state = IteratorState::Ended;
                        return Ok(None);
                    }
                }
            }
            let step = {
                let block = self.current.as_ref().expect("block was just fetched");
                block.decode_at(&mut self.pos)?
            };
            match step {
                Decoded::Value(value) => self.partial.push(value),
                Decoded::RowEnd => return Ok(Some(mem::take(&mut self.partial))),
                Decoded::End => {
                    if let Some(block) = self.current.take() {
                        self.manager.release_block(block);
                    }
                    self.state = IteratorState::Ended;
                    return Ok(None);
                }
                Decoded::NeedMore => {
                    if let Some(block) = self.current.take() {
                        self.manager.release_block(block);
                    }
                    self.pos = 0;
                }
            }
        }
    }
}

impl<P: BlockProvider> Drop for BlockIterator<P> {
    fn drop(&mut self) {
        if let Some(block) = self.current.take() {
            self.manager.release_block(block);
        }
    }
}

/// Reads every row of its input into blocks and supports `rewind`; the
/// replay side of a nested-loop cross join.
pub struct CachingBlockIterator {
    input: Box<dyn RowOperator>,
    manager: Arc<BlockManager>,
    blocks: Vec<Block>,
    building_block: Option<Block>,
    building: bool,
    block_index: usize,
    pos: usize,
    partial: Row,
}

impl CachingBlockIterator {
    /// Creates a caching iterator over the rows of the input operator.
    pub fn new(input: Box<dyn RowOperator>, manager: Arc<BlockManager>) -> Self {
        let building_block = manager.create_block();
        CachingBlockIterator {
            input,
            manager,
            blocks: vec![],
            building_block: Some(building_block),
            building: true,
            block_index: 0,
            pos: 0,
            partial: vec![],
        }
    }

    /// The wrapped input operator.
    pub fn input(&self) -> &dyn RowOperator {
        self.input.as_ref()
    }

    /// Returns the next row. The first pass pulls from the input while
    /// filling the cache; later passes replay the cache.
    pub fn next_row(&mut self) -> Result<Option<Row>, CsvqlError> {
        if self.building {
            match self.input.next_row()? {
                Some(row) => {
                    let current = self
                        .building_block
                        .as_mut()
                        .expect("cache block exists while building");
                    encode_row(&row, current, &self.manager, &mut self.blocks)?;
                    return Ok(Some(row));
                }
                None => {
                    let mut current = self
                        .building_block
                        .take()
                        .expect("cache block exists while building");
                    current.end_blocks();
                    self.blocks.push(current);
                    self.building = false;
                    return Ok(None);
                }
            }
        }
        match decode_row(
            &self.blocks,
            &mut self.block_index,
            &mut self.pos,
            &mut self.partial,
        )? {
            RowStep::Row(row) => Ok(Some(row)),
            RowStep::NeedMore | RowStep::End => Ok(None),
        }
    }

    /// Restarts the iteration from the first cached row. When called before
    /// the input was exhausted, the remaining input is drained into the
    /// cache first.
    pub fn rewind(&mut self) -> Result<(), CsvqlError> {
        while self.building {
            self.next_row()?;
        }
        self.block_index = 0;
        self.pos = 0;
        self.partial.clear();
        Ok(())
    }
}

impl Drop for CachingBlockIterator {
    fn drop(&mut self) {
        if let Some(block) = self.building_block.take() {
            self.manager.release_block(block);
        }
        for block in self.blocks.drain(..) {
            self.manager.release_block(block);
        }
    }
}

/// Materializes all input rows, sorts them by a list of
/// `(column index, direction)` keys and replays them in order. Nulls sort
/// last for ascending keys and first for descending keys.
pub struct SortingBlockIterator {
    input: Box<dyn RowOperator>,
    orders: Vec<(usize, SortOrder)>,
    sorted: Option<std::vec::IntoIter<Row>>,
}

impl SortingBlockIterator {
    /// Creates a sorting iterator over the rows of the input operator.
    pub fn new(input: Box<dyn RowOperator>, orders: Vec<(usize, SortOrder)>) -> Self {
        SortingBlockIterator {
            input,
            orders,
            sorted: None,
        }
    }

    /// The wrapped input operator.
    pub fn input(&self) -> &dyn RowOperator {
        self.input.as_ref()
    }

    /// Returns the next row in sort order; the whole input is materialized
    /// on the first call.
    pub fn next_row(&mut self) -> Result<Option<Row>, CsvqlError> {
        if self.sorted.is_none() {
            let mut rows = vec![];
            while let Some(row) = self.input.next_row()? {
                rows.push(row);
            }
            let orders = self.orders.clone();
            rows.sort_by(|a, b| {
                for (index, order) in &orders {
                    let ordering = compare_nulls_last(&a[*index], &b[*index]);
                    let ordering = match order {
                        SortOrder::Ascending => ordering,
                        SortOrder::Descending => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
            self.sorted = Some(rows.into_iter());
        }
        Ok(self.sorted.as_mut().and_then(|rows| rows.next()))
    }
}

/// Compares two column values with nulls greater than everything, so that
/// ascending order puts them last.
fn compare_nulls_last(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a
            .compare(b)
            .ok()
            .flatten()
            .unwrap_or(Ordering::Equal),
    }
}

/// Builds a hash table over the input rows keyed by one column position and
/// iterates the rows matching a probe key; the right side of an inner hash
/// join. Rows with a null key can never match and are not kept.
pub struct HashingBlockIterator {
    input: Box<dyn RowOperator>,
    key_index: usize,
    built: bool,
    table: AHashMap<Value, Vec<Row>>,
    context: Option<(Value, usize)>,
}

impl HashingBlockIterator {
    /// Creates a hashing iterator keyed on the given column position.
    pub fn new(input: Box<dyn RowOperator>, key_index: usize) -> Self {
        HashingBlockIterator {
            input,
            key_index,
            built: false,
            table: AHashMap::new(),
            context: None,
        }
    }

    /// The wrapped input operator.
    pub fn input(&self) -> &dyn RowOperator {
        self.input.as_ref()
    }

    fn ensure_built(&mut self) -> Result<(), CsvqlError> {
        if self.built {
            return Ok(());
        }
        while let Some(row) = self.input.next_row()? {
            let key = row[self.key_index].clone();
            if key.is_null() {
                continue;
            }
            self.table.entry(key).or_default().push(row);
        }
        self.built = true;
        Ok(())
    }

    /// Sets the probe key; the following [`next_key_value_row`] calls yield
    /// the matching rows in input order.
    ///
    /// [`next_key_value_row`]: HashingBlockIterator::next_key_value_row
    pub fn set_context_for_key(&mut self, key: &Value) -> Result<(), CsvqlError> {
        self.ensure_built()?;
        self.context = Some((key.clone(), 0));
        Ok(())
    }

    /// Returns the next row matching the probe key.
    pub fn next_key_value_row(&mut self) -> Option<Row> {
        let (key, index) = self.context.as_mut()?;
        if key.is_null() {
            return None;
        }
        let row = self.table.get(key)?.get(*index)?.clone();
        *index += 1;
        Some(row)
    }

    /// Frees the hash table after the last row was delivered.
    pub fn reset(&mut self) {
        self.table = AHashMap::new();
        self.context = None;
    }
}

/// The composite grouping key: per-value hashes are combined by rotating
/// each by its key position and folding with XOR.
#[derive(Clone, Debug, PartialEq, Eq)]
struct GroupKey(Vec<Value>);

impl Hash for GroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut combined: u64 = 0;
        for (position, value) in self.0.iter().enumerate() {
            let mut hasher = DefaultHasher::new();
            value.hash(&mut hasher);
            combined ^= hasher.finish().rotate_left(position as u32);
        }
        state.write_u64(combined);
    }
}

/// Bucketizes the input rows by a set of key columns and runs a list of
/// aggregation functions per bucket, producing one output row per group.
/// Groups are emitted in insertion order of their first key occurrence.
pub struct GroupingBlockIterator {
    input: Box<dyn RowOperator>,
    grouping_indices: Vec<usize>,
    output_columns: Vec<usize>,
    prototypes: Vec<Box<dyn AggregationFunction>>,
    groups: Option<std::vec::IntoIter<Row>>,
}

impl GroupingBlockIterator {
    /// Creates a grouping iterator.
    ///
    /// `grouping_indices` are the input columns forming the composite key;
    /// `output_columns[i]` is the input column feeding `prototypes[i]`.
    pub fn new(
        input: Box<dyn RowOperator>,
        grouping_indices: Vec<usize>,
        output_columns: Vec<usize>,
        prototypes: Vec<Box<dyn AggregationFunction>>,
    ) -> Self {
        GroupingBlockIterator {
            input,
            grouping_indices,
            output_columns,
            prototypes,
            groups: None,
        }
    }

    /// The wrapped input operator.
    pub fn input(&self) -> &dyn RowOperator {
        self.input.as_ref()
    }

    /// Returns the next group row; the whole input is consumed on the first
    /// call.
    pub fn next_row(&mut self) -> Result<Option<Row>, CsvqlError> {
        if self.groups.is_none() {
            let mut buckets: IndexMap<GroupKey, Vec<Box<dyn AggregationFunction>>> =
                IndexMap::new();
            while let Some(row) = self.input.next_row()? {
                let key = GroupKey(
                    self.grouping_indices
                        .iter()
                        .map(|&index| row[index].clone())
                        .collect(),
                );
                let functions = buckets.entry(key).or_insert_with(|| {
                    self.prototypes
                        .iter()
                        .map(|prototype| {
                            let mut function = prototype.clone_box();
                            function.init();
                            function
                        })
                        .collect()
                });
                for (function, &column) in functions.iter_mut().zip(&self.output_columns) {
                    function.step(&row[column])?;
                }
            }
            let mut rows = Vec::with_capacity(buckets.len());
            for (_, mut functions) in buckets {
                let mut row = vec![];
                for function in &mut functions {
                    let value = function.finalize();
                    if !function.suppress() {
                        row.push(value);
                    }
                }
                rows.push(row);
            }
            self.groups = Some(rows.into_iter());
        }
        Ok(self.groups.as_mut().and_then(|groups| groups.next()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{create_aggregation, create_path_through};
    use csvql_ast::{AggregateKind, SymbolRef};
    use csvql_core::Type;

    /// A row operator over a fixed row list, for iterator tests.
    struct FixedRows {
        rows: std::vec::IntoIter<Row>,
    }

    impl FixedRows {
        fn new(rows: Vec<Row>) -> Box<dyn RowOperator> {
            Box::new(FixedRows {
                rows: rows.into_iter(),
            })
        }
    }

    impl RowOperator for FixedRows {
        fn next_row(&mut self) -> Result<Option<Row>, CsvqlError> {
            Ok(self.rows.next())
        }

        fn column_infos(&self) -> Vec<SymbolRef> {
            vec![]
        }

        fn dump(&self, output: &mut String) {
            output.push_str("FixedRows\n");
        }
    }

    fn int_rows(values: &[i64]) -> Vec<Row> {
        values.iter().map(|&v| vec![Value::Int(v)]).collect()
    }

    #[test]
    fn block_iterator_reads_rows_across_blocks() {
        struct TwoBlocks {
            blocks: std::vec::IntoIter<Block>,
        }
        impl BlockProvider for TwoBlocks {
            fn next_block(&mut self) -> Result<Option<Block>, CsvqlError> {
                Ok(self.blocks.next())
            }
        }

        let manager = Arc::new(BlockManager::new(64));
        // a row of two strings that cannot share one 64-byte block
        let mut first = manager.create_block();
        assert!(first.add_value(&Value::String("x".repeat(30))));
        assert!(!first.add_value(&Value::String("y".repeat(30))));
        first.mark_next_block();
        let mut second = manager.create_block();
        assert!(second.add_value(&Value::String("y".repeat(30))));
        second.next_row();
        second.end_blocks();

        let provider = TwoBlocks {
            blocks: vec![first, second].into_iter(),
        };
        let mut iterator = BlockIterator::new(provider, manager.clone());
        let row = iterator.next_row().unwrap().unwrap();
        assert_eq!(row.len(), 2);
        assert!(iterator.next_row().unwrap().is_none());
        // `None` is permanent
        assert!(iterator.next_row().unwrap().is_none());
        assert_eq!(manager.active_blocks(), 0);
    }

    #[test]
    fn caching_iterator_replays_after_rewind() {
        let manager = Arc::new(BlockManager::default());
        let mut iterator = CachingBlockIterator::new(FixedRows::new(int_rows(&[1, 2, 3])), manager);
        let mut first_pass = vec![];
        while let Some(row) = iterator.next_row().unwrap() {
            first_pass.push(row);
        }
        assert_eq!(first_pass, int_rows(&[1, 2, 3]));

        iterator.rewind().unwrap();
        let mut second_pass = vec![];
        while let Some(row) = iterator.next_row().unwrap() {
            second_pass.push(row);
        }
        assert_eq!(second_pass, first_pass);
    }

    #[test]
    fn sorting_iterator_orders_with_null_handling() {
        let rows = vec![
            vec![Value::Int(2)],
            vec![Value::Null(Type::Int)],
            vec![Value::Int(1)],
        ];
        let mut ascending = SortingBlockIterator::new(
            FixedRows::new(rows.clone()),
            vec![(0, SortOrder::Ascending)],
        );
        let mut got = vec![];
        while let Some(row) = ascending.next_row().unwrap() {
            got.push(row[0].clone());
        }
        assert_eq!(
            got,
            vec![Value::Int(1), Value::Int(2), Value::Null(Type::Int)]
        );

        let mut descending =
            SortingBlockIterator::new(FixedRows::new(rows), vec![(0, SortOrder::Descending)]);
        let mut got = vec![];
        while let Some(row) = descending.next_row().unwrap() {
            got.push(row[0].clone());
        }
        assert_eq!(
            got,
            vec![Value::Null(Type::Int), Value::Int(2), Value::Int(1)]
        );
    }

    #[test]
    fn hashing_iterator_finds_rows_by_key() {
        let rows = vec![
            vec![Value::Int(815), Value::String("a".into())],
            vec![Value::Int(4711), Value::String("b".into())],
            vec![Value::Int(815), Value::String("c".into())],
            vec![Value::Null(Type::Int), Value::String("d".into())],
        ];
        let mut iterator = HashingBlockIterator::new(FixedRows::new(rows), 0);

        iterator.set_context_for_key(&Value::Int(815)).unwrap();
        let matches: Vec<Value> = std::iter::from_fn(|| iterator.next_key_value_row())
            .map(|row| row[1].clone())
            .collect();
        assert_eq!(
            matches,
            vec![Value::String("a".into()), Value::String("c".into())]
        );

        // a null probe key never matches
        iterator
            .set_context_for_key(&Value::Null(Type::Int))
            .unwrap();
        assert!(iterator.next_key_value_row().is_none());

        iterator.set_context_for_key(&Value::Int(1)).unwrap();
        assert!(iterator.next_key_value_row().is_none());
    }

    #[test]
    fn grouping_iterator_keeps_first_occurrence_order() {
        let rows = vec![
            vec![Value::String("b".into()), Value::Int(1)],
            vec![Value::String("a".into()), Value::Int(2)],
            vec![Value::String("b".into()), Value::Int(3)],
        ];
        let prototypes = vec![
            create_path_through(false),
            create_aggregation(AggregateKind::Sum, Type::Int).unwrap(),
        ];
        let mut iterator =
            GroupingBlockIterator::new(FixedRows::new(rows), vec![0], vec![0, 1], prototypes);
        let mut got = vec![];
        while let Some(row) = iterator.next_row().unwrap() {
            got.push(row);
        }
        assert_eq!(
            got,
            vec![
                vec![Value::String("b".into()), Value::Int(4)],
                vec![Value::String("a".into()), Value::Int(2)],
            ]
        );
    }

    #[test]
    fn suppressed_group_columns_produce_no_output() {
        let rows = vec![
            vec![Value::String("a".into()), Value::Int(2)],
            vec![Value::String("b".into()), Value::Int(3)],
        ];
        let prototypes = vec![
            create_aggregation(AggregateKind::CountStar, Type::Int).unwrap(),
            create_path_through(true),
        ];
        let mut iterator =
            GroupingBlockIterator::new(FixedRows::new(rows), vec![0], vec![1, 0], prototypes);
        let mut got = vec![];
        while let Some(row) = iterator.next_row().unwrap() {
            got.push(row);
        }
        assert_eq!(got, vec![vec![Value::Int(1)], vec![Value::Int(1)]]);
    }
}
