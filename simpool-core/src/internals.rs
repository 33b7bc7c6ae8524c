//! The internals of simpool-core.
//!
//! The internals provide the bookkeeping of the pool: its metadata records, the arena storing them, and the ordered
//! sets indexing them.

mod bit_mask;
mod block;
mod node_arena;
mod ordered_blocks;


pub(crate) use block::{Block, BlockStack};
pub(crate) use node_arena::NodeArena;
pub(crate) use ordered_blocks::OrderedBlocks;
