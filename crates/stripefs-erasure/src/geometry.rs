//! Striped block group geometry
//!
//! Pure functions over `(L, C, D)` mapping a block group's total length
//! to per-column byte lengths and internal block identities. Both the
//! reading and the writing side of a transfer derive these independently,
//! so the layout here is part of the wire contract.

use stripefs_common::ExtendedBlock;

/// Number of cells a group of `data_size` bytes occupies
#[must_use]
pub const fn cells_in_group(data_size: u64, cell_size: usize) -> u64 {
    data_size.div_ceil(cell_size as u64)
}

/// Minimum number of source columns a decode needs: every cell-bearing
/// column, capped at `data_units`. Groups shorter than a full stripe row
/// have columns that never received a cell; those contribute zero-stripes
/// instead of reads.
#[must_use]
pub fn min_required_sources(data_size: u64, cell_size: usize, data_units: usize) -> usize {
    cells_in_group(data_size, cell_size).min(data_units as u64) as usize
}

/// Byte length of internal block `index` in a group of `data_size` bytes.
///
/// Complete stripe rows give every column an equal share; the last,
/// possibly partial row is laid out cell by cell across the data columns.
/// Parity columns (`index >= data_units`) are as long as column 0.
#[must_use]
pub fn internal_block_length(
    data_size: u64,
    cell_size: usize,
    data_units: usize,
    index: usize,
) -> u64 {
    if data_size == 0 {
        return 0;
    }
    let cell = cell_size as u64;
    let stripe = cell * data_units as u64;

    let last_stripe_len = data_size % stripe;
    if last_stripe_len == 0 {
        // Group ends on a stripe boundary; equal share for every column.
        return data_size / data_units as u64;
    }

    let num_stripes = data_size.div_ceil(stripe);
    (num_stripes - 1) * cell + last_cell_size(last_stripe_len, cell, data_units, index)
}

/// Contribution of the last (partial) stripe row to column `index`.
fn last_cell_size(last_stripe_len: u64, cell: u64, data_units: usize, index: usize) -> u64 {
    let mut size = last_stripe_len as i64;
    if index < data_units {
        size -= index as i64 * cell as i64;
    }
    // Parity columns keep the full last_stripe_len and clamp to one cell,
    // which makes them exactly as long as column 0.
    size.clamp(0, cell as i64) as u64
}

/// Derive the identity of internal block `index` from its group.
///
/// The low bits of a group's block id are reserved for the internal
/// index, so `group id + index` is the column's id on every node.
#[must_use]
pub fn construct_internal_block(
    group: &ExtendedBlock,
    cell_size: usize,
    data_units: usize,
    index: usize,
) -> ExtendedBlock {
    ExtendedBlock {
        pool_id: group.pool_id.clone(),
        block_id: group.block_id + index as u64,
        generation_stamp: group.generation_stamp,
        num_bytes: internal_block_length(group.num_bytes, cell_size, data_units, index),
    }
}
