//! Register arrays: named, fixed-bitwidth stateful cell storage.
//!
//! Cells are read and written in place by the dataplane through a mutex.
//! [`RegisterArray::resized`] and [`RegisterArray::rewidened`] keep sharing
//! the storage of the array they were derived from and only record the new
//! layout. [`RegisterArray::committed`] migrates the shared storage in place
//! when the generation is published, so writes made through an older
//! generation land in the migrated cells. [`RegisterArray::cleared`] and
//! [`RegisterArray::rehashed`] build fresh storage instead.

use crate::hash::{pack_fields, HashAlgorithm};
use crate::packet::width_mask;
use flexbm_common::{HasNamedObject, NamedObject};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

pub const MAX_BITWIDTH: u32 = 64;

/// Largest cell count a register array may declare.
pub const MAX_REGISTER_SIZE: usize = 1 << 24;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("Index {index} out of range for register array '{name}' of size {size}")]
    IndexOutOfRange {
        name: String,
        index: usize,
        size: usize,
    },
}

/// Layout change not yet applied to the shared storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Migration {
    Resize(usize),
    Rewiden(u32),
}

#[derive(Debug)]
struct Cells {
    bitwidth: u32,
    values: Vec<u64>,
}

#[derive(Debug)]
pub struct RegisterArray {
    named: NamedObject,
    size: usize,
    bitwidth: u32,
    cells: Arc<Mutex<Cells>>,
    pending: Vec<Migration>,
    extra: Map<String, Value>,
}

impl RegisterArray {
    /// Creates a zero-initialized array. Callers validate
    /// `1 <= size <= MAX_REGISTER_SIZE` and `1 <= bitwidth <= 64`.
    pub fn new(named: NamedObject, size: usize, bitwidth: u32) -> Self {
        Self::from_cells(named, bitwidth, vec![0; size], Map::new())
    }

    fn from_cells(
        named: NamedObject,
        bitwidth: u32,
        values: Vec<u64>,
        extra: Map<String, Value>,
    ) -> Self {
        Self {
            named,
            size: values.len(),
            bitwidth,
            cells: Arc::new(Mutex::new(Cells { bitwidth, values })),
            pending: Vec::new(),
            extra,
        }
    }

    /// Same storage under a new layout.
    fn migrated(&self, size: usize, bitwidth: u32, step: Migration) -> Self {
        let mut pending = self.pending.clone();
        pending.push(step);
        Self {
            named: self.named.clone(),
            size,
            bitwidth,
            cells: Arc::clone(&self.cells),
            pending,
            extra: self.extra.clone(),
        }
    }

    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = extra;
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn bitwidth(&self) -> u32 {
        self.bitwidth
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Whether a resize or rewiden still waits for [`Self::committed`].
    pub fn has_pending_layout(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn read(&self, index: usize) -> Result<u64, RegisterError> {
        if index >= self.size {
            return Err(self.out_of_range(index, self.size));
        }
        let cells = self.cells.lock();
        Ok(self.view(&cells, index))
    }

    /// Writes `value` truncated to the array's bitwidth.
    pub fn write(&self, index: usize, value: u64) -> Result<(), RegisterError> {
        let mut cells = self.cells.lock();
        let mask = width_mask(self.bitwidth.min(cells.bitwidth));
        let size = self.size.min(cells.values.len());
        match cells.values.get_mut(index).filter(|_| index < size) {
            Some(cell) => {
                *cell = value & mask;
                Ok(())
            }
            None => Err(self.out_of_range(index, size)),
        }
    }

    /// Zeroes every cell in place.
    pub fn reset(&self) {
        self.cells.lock().values.iter_mut().for_each(|cell| *cell = 0);
    }

    pub fn snapshot(&self) -> Vec<u64> {
        let cells = self.cells.lock();
        (0..self.size).map(|i| self.view(&cells, i)).collect()
    }

    /// Value of cell `index` under this array's layout, replaying pending
    /// migrations over the shared storage.
    fn view(&self, cells: &Cells, index: usize) -> u64 {
        let mut value = cells.values.get(index).copied().unwrap_or(0);
        let mut width = cells.bitwidth;
        for step in &self.pending {
            match *step {
                Migration::Resize(size) if index >= size => value = 0,
                Migration::Resize(_) => {}
                Migration::Rewiden(new_width) => {
                    if new_width < width {
                        value &= width_mask(new_width);
                    }
                    width = new_width;
                }
            }
        }
        value & width_mask(self.bitwidth)
    }

    /// Layout with `new_size` cells: the first `min(old, new)` values are
    /// kept, new cells are zero.
    pub fn resized(&self, new_size: usize) -> Self {
        self.migrated(new_size, self.bitwidth, Migration::Resize(new_size))
    }

    /// Layout declared with `new_bitwidth`. Widening keeps raw values.
    /// Narrowing truncates every cell so that no stored value exceeds the
    /// declared bitwidth.
    pub fn rewidened(&self, new_bitwidth: u32) -> Self {
        self.migrated(self.size, new_bitwidth, Migration::Rewiden(new_bitwidth))
    }

    /// Applies pending migrations to the shared storage and returns the
    /// array with none left. Must run under the writer lock of the context
    /// that publishes this array.
    pub fn committed(&self) -> Self {
        let mut cells = self.cells.lock();
        let values: Vec<u64> = (0..self.size).map(|i| self.view(&cells, i)).collect();
        cells.values = values;
        cells.bitwidth = self.bitwidth;
        Self {
            named: self.named.clone(),
            size: self.size,
            bitwidth: self.bitwidth,
            cells: Arc::clone(&self.cells),
            pending: Vec::new(),
            extra: self.extra.clone(),
        }
    }

    /// Array of the same shape with every cell zero.
    pub fn cleared(&self) -> Self {
        Self::from_cells(
            self.named.clone(),
            self.bitwidth,
            vec![0; self.size],
            self.extra.clone(),
        )
    }

    /// Rebuilds this array's contents from the recorded value log.
    ///
    /// For each live slot `i < min(last_pos[0], recording.size)` the value
    /// `v = recording[i]` is kept when its counting slot
    /// `counting[H1(v) % counting.size]` is non-zero, and then marks
    /// `self[Hk(v) % self.size] = 1` for each target hash. Values are hashed
    /// as big-endian bytes of the recording array's bitwidth.
    pub fn rehashed(&self, inputs: &RehashInputs<'_>) -> Self {
        let recording = inputs.recording.snapshot();
        let counting = inputs.counting.snapshot();
        let cursor = inputs.last_pos.snapshot().first().copied().unwrap_or(0);
        let live = usize::try_from(cursor).unwrap_or(usize::MAX).min(recording.len());

        let len = self.size;
        let mut cells = vec![0u64; len];
        let one = 1 & width_mask(self.bitwidth);
        for &value in &recording[..live] {
            let bytes = pack_fields(&[(value, inputs.recording.bitwidth())]);
            if !counting.is_empty() {
                let slot = slot_index(inputs.counting_hash, &bytes, counting.len());
                if counting[slot] == 0 {
                    continue;
                }
            }
            for hash in inputs.target_hashes {
                cells[slot_index(hash, &bytes, len)] = one;
            }
        }
        Self::from_cells(self.named.clone(), self.bitwidth, cells, self.extra.clone())
    }

    fn out_of_range(&self, index: usize, size: usize) -> RegisterError {
        RegisterError::IndexOutOfRange {
            name: self.named.name().to_string(),
            index,
            size,
        }
    }
}

impl HasNamedObject for RegisterArray {
    fn named(&self) -> &NamedObject {
        &self.named
    }
}

/// Source arrays and hashes for [`RegisterArray::rehashed`].
#[derive(Debug, Clone, Copy)]
pub struct RehashInputs<'a> {
    pub recording: &'a RegisterArray,
    pub last_pos: &'a RegisterArray,
    pub counting: &'a RegisterArray,
    pub counting_hash: HashAlgorithm,
    pub target_hashes: [HashAlgorithm; 3],
}

fn slot_index(hash: HashAlgorithm, bytes: &[u8], size: usize) -> usize {
    (hash.compute(bytes) % size as u64) as usize
}
