use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use chrono::{Datelike, Timelike};
use csvql_core::{Type, Value};

use crate::error::CsvqlError;

/// One materialized tuple flowing between operators.
pub type Row = Vec<Value>;

/// The default block capacity, roughly 1 MB.
pub const DEFAULT_BLOCK_CAPACITY: usize = 1024 * 1024;

const ROW_MARKER: u8 = 0xF0;
const END_MARKER: u8 = 0xF1;

const TAG_BOOLEAN: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_REAL: u8 = 0x03;
const TAG_STRING: u8 = 0x04;
const TAG_DATE: u8 = 0x05;
const TAG_TIME: u8 = 0x06;
const TAG_TIMESTAMP: u8 = 0x07;
const TAG_NONE: u8 = 0x08;

/// Produces blocks on demand; the seam between an operator that builds
/// blocks and the iterator that reads rows out of them.
pub trait BlockProvider {
    /// Returns the next block, or `None` when no more blocks will come.
    fn next_block(&mut self) -> Result<Option<Block>, CsvqlError>;
}

/// The result of decoding one item out of a block.
#[derive(Debug)]
pub(crate) enum Decoded {
    /// A column value.
    Value(Value),
    /// The row is complete.
    RowEnd,
    /// The block data is exhausted; the sequence continues in the next
    /// block when [`Block::continues_in_next`] is set.
    NeedMore,
    /// The end-of-blocks marker.
    End,
}

/// A fixed-capacity, append-only buffer of encoded rows. Values are written
/// as a packed `(type tag | null flag | value bytes)` sequence per column,
/// rows are terminated by a row marker and the last block of a sequence by
/// an end-of-blocks marker.
#[derive(Debug)]
pub struct Block {
    data: Vec<u8>,
    capacity: usize,
    next_block: bool,
    active: Option<Arc<AtomicUsize>>,
}

impl Drop for Block {
    fn drop(&mut self) {
        // a block counts as live until it is dropped, wherever that happens
        if let Some(active) = &self.active {
            active.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

impl Block {
    fn new(capacity: usize, active: Option<Arc<AtomicUsize>>) -> Self {
        Block {
            data: Vec::with_capacity(capacity.min(64 * 1024)),
            capacity,
            next_block: false,
            active,
        }
    }

    /// Appends a value. Returns false when the value does not fit any more;
    /// in that case nothing is appended and the caller has to mark the
    /// block as continued and move on to a fresh block.
    pub fn add_value(&mut self, value: &Value) -> bool {
        let needed = 2 + payload_size(value);
        // keep room for a trailing row and end marker
        if self.data.len() + needed + 2 > self.capacity {
            return false;
        }
        if let Value::Null(ty) = value {
            self.data.push(type_tag(*ty));
            self.data.push(1);
            return true;
        }
        self.data.push(type_tag(value.ty()));
        self.data.push(0);
        match value {
            Value::Boolean(b) => self.data.push(u8::from(*b)),
            Value::Int(i) => self.data.extend_from_slice(&i.to_le_bytes()),
            Value::Real(r) => self.data.extend_from_slice(&r.to_bits().to_le_bytes()),
            Value::String(s) => {
                self.data
                    .extend_from_slice(&(s.len() as u32).to_le_bytes());
                self.data.extend_from_slice(s.as_bytes());
            }
            Value::Date(d) => self
                .data
                .extend_from_slice(&d.num_days_from_ce().to_le_bytes()),
            Value::Time(t) => self
                .data
                .extend_from_slice(&t.num_seconds_from_midnight().to_le_bytes()),
            Value::Timestamp(ts) => self
                .data
                .extend_from_slice(&ts.and_utc().timestamp().to_le_bytes()),
            Value::Null(_) => unreachable!("nulls were handled above"),
        }
        true
    }

    /// Terminates the current row.
    pub fn next_row(&mut self) {
        self.data.push(ROW_MARKER);
    }

    /// Terminates the block sequence.
    pub fn end_blocks(&mut self) {
        self.data.push(END_MARKER);
    }

    /// Marks that the current row continues in the next block.
    pub fn mark_next_block(&mut self) {
        self.next_block = true;
    }

    /// Whether the last row of this block continues in the next block.
    pub fn continues_in_next(&self) -> bool {
        self.next_block
    }

    /// The number of encoded bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// The capacity of the block in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Decodes the item at `*pos`, advancing the position.
    pub(crate) fn decode_at(&self, pos: &mut usize) -> Result<Decoded, CsvqlError> {
        if *pos >= self.data.len() {
            return Ok(Decoded::NeedMore);
        }
        let marker = self.data[*pos];
        *pos += 1;
        match marker {
            ROW_MARKER => Ok(Decoded::RowEnd),
            END_MARKER => Ok(Decoded::End),
            tag => {
                let ty = tag_type(tag)?;
                let is_null = self.read_u8(pos)? == 1;
                if is_null {
                    return Ok(Decoded::Value(Value::Null(ty)));
                }
                let value = match ty {
                    Type::Boolean => Value::Boolean(self.read_u8(pos)? == 1),
                    Type::Int => Value::Int(i64::from_le_bytes(self.read_array(pos)?)),
                    Type::Real => {
                        Value::Real(f64::from_bits(u64::from_le_bytes(self.read_array(pos)?)))
                    }
                    Type::String => {
                        let len = u32::from_le_bytes(self.read_array(pos)?) as usize;
                        let bytes = self.read_slice(pos, len)?;
                        Value::String(String::from_utf8_lossy(bytes).into_owned())
                    }
                    Type::Date => {
                        let days = i32::from_le_bytes(self.read_array(pos)?);
                        chrono::NaiveDate::from_num_days_from_ce_opt(days)
                            .map(Value::Date)
                            .ok_or_else(|| CsvqlError::evaluation("corrupt date in block"))?
                    }
                    Type::Time => {
                        let seconds = u32::from_le_bytes(self.read_array(pos)?);
                        chrono::NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0)
                            .map(Value::Time)
                            .ok_or_else(|| CsvqlError::evaluation("corrupt time in block"))?
                    }
                    Type::Timestamp => {
                        let seconds = i64::from_le_bytes(self.read_array(pos)?);
                        chrono::DateTime::from_timestamp(seconds, 0)
                            .map(|ts| Value::Timestamp(ts.naive_utc()))
                            .ok_or_else(|| CsvqlError::evaluation("corrupt timestamp in block"))?
                    }
                    Type::None => Value::Null(Type::None),
                };
                Ok(Decoded::Value(value))
            }
        }
    }

    fn read_u8(&self, pos: &mut usize) -> Result<u8, CsvqlError> {
        let byte = *self
            .data
            .get(*pos)
            .ok_or_else(|| CsvqlError::evaluation("truncated value in block"))?;
        *pos += 1;
        Ok(byte)
    }

    fn read_slice(&self, pos: &mut usize, len: usize) -> Result<&[u8], CsvqlError> {
        let slice = self
            .data
            .get(*pos..*pos + len)
            .ok_or_else(|| CsvqlError::evaluation("truncated value in block"))?;
        *pos += len;
        Ok(slice)
    }

    fn read_array<const N: usize>(&self, pos: &mut usize) -> Result<[u8; N], CsvqlError> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.read_slice(pos, N)?);
        Ok(array)
    }
}

fn payload_size(value: &Value) -> usize {
    match value {
        Value::Null(_) => 0,
        Value::Boolean(_) => 1,
        Value::Int(_) | Value::Real(_) | Value::Timestamp(_) => 8,
        Value::Date(_) | Value::Time(_) => 4,
        Value::String(s) => 4 + s.len(),
    }
}

fn type_tag(ty: Type) -> u8 {
    match ty {
        Type::Boolean => TAG_BOOLEAN,
        Type::Int => TAG_INT,
        Type::Real => TAG_REAL,
        Type::String => TAG_STRING,
        Type::Date => TAG_DATE,
        Type::Time => TAG_TIME,
        Type::Timestamp => TAG_TIMESTAMP,
        Type::None => TAG_NONE,
    }
}

fn tag_type(tag: u8) -> Result<Type, CsvqlError> {
    Ok(match tag {
        TAG_BOOLEAN => Type::Boolean,
        TAG_INT => Type::Int,
        TAG_REAL => Type::Real,
        TAG_STRING => Type::String,
        TAG_DATE => Type::Date,
        TAG_TIME => Type::Time,
        TAG_TIMESTAMP => Type::Timestamp,
        TAG_NONE => Type::None,
        _ => return Err(CsvqlError::evaluation("unknown type tag in block")),
    })
}

/// The single allocation authority for blocks during a query. Tracks the
/// number of live blocks and the high-water mark.
#[derive(Debug)]
pub struct BlockManager {
    block_capacity: usize,
    total_blocks: AtomicUsize,
    active_blocks: Arc<AtomicUsize>,
    max_used_blocks: AtomicUsize,
}

impl Default for BlockManager {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_CAPACITY)
    }
}

impl BlockManager {
    /// Creates a manager handing out blocks of the given capacity.
    pub fn new(block_capacity: usize) -> Self {
        BlockManager {
            block_capacity,
            total_blocks: AtomicUsize::new(0),
            active_blocks: Arc::new(AtomicUsize::new(0)),
            max_used_blocks: AtomicUsize::new(0),
        }
    }

    /// Allocates a fresh block.
    pub fn create_block(&self) -> Block {
        self.total_blocks.fetch_add(1, Ordering::Relaxed);
        let active = self.active_blocks.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_used_blocks.fetch_max(active, Ordering::Relaxed);
        Block::new(self.block_capacity, Some(self.active_blocks.clone()))
    }

    /// Returns a block to the manager, freeing it.
    pub fn release_block(&self, block: Block) {
        drop(block);
    }

    /// The number of blocks created over the lifetime of the manager.
    pub fn total_blocks(&self) -> usize {
        self.total_blocks.load(Ordering::Relaxed)
    }

    /// The number of currently live blocks.
    pub fn active_blocks(&self) -> usize {
        self.active_blocks.load(Ordering::Relaxed)
    }

    /// The peak number of simultaneously live blocks.
    pub fn max_used_blocks(&self) -> usize {
        self.max_used_blocks.load(Ordering::Relaxed)
    }

    /// The capacity of the blocks handed out by this manager.
    pub fn block_capacity(&self) -> usize {
        self.block_capacity
    }
}
