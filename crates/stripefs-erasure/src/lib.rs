//! StripeFS Erasure - striped block group geometry and Reed-Solomon codec
//!
//! A logical block of `L` bytes is striped across `D` data columns in
//! `C`-byte cells, with `P` parity columns computed per stripe row:
//!
//! ```text
//! | <- block group -> |
//!  blk_0      blk_1      blk_2      ...   blk_D .. blk_D+P-1
//! +------+   +------+   +------+         +--------+
//! |cell_0|   |cell_1|   |cell_2|   ...   | parity |
//! +------+   +------+   +------+         +--------+
//! |cell_D|   | ...  |   | ...  |         |  ...   |
//! +------+   +------+   +------+         +--------+
//! ```
//!
//! [`geometry`] computes the byte length and identity of each internal
//! block (column); [`codec`] regenerates missing columns from any `D`
//! surviving ones.

pub mod codec;
pub mod geometry;

pub use codec::{CodecError, ErasureCodec, RsCodec};
pub use geometry::{
    cells_in_group, construct_internal_block, internal_block_length, min_required_sources,
};
