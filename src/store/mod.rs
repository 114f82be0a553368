//! The in-memory relational store.
//!
//! A [`File`] owns ordered [`DataBlock`]s, a block owns ordered
//! [`Category`]s, and a category owns its rows. Cross-category semantics
//! (cascading updates and erases over link groups) live on the data block,
//! which is the smallest owner that can see both sides of a link.

pub mod category;
pub(crate) mod cell;
pub mod datablock;
pub mod file;
pub mod row;

pub use category::{Category, Find, Rows};
pub use datablock::DataBlock;
pub use file::File;
pub use row::{FromCif, RowId, RowRef};
