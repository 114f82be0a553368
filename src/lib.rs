//! cifdb: a relational in-memory store for CIF and mmCIF files.
//!
//! Three-layer design:
//! - **Layer 1 (parse)**: tokenizer and grammar driver turn bytes into
//!   semantic events; [`File::parse`] builds the store from them.
//! - **Layer 2 (store)**: [`File`] → [`DataBlock`] → [`Category`] → rows,
//!   queried with composable [`query::Condition`]s and mutated through
//!   cascade-aware operations that honor dictionary link groups.
//! - **Layer 3 (validate/write)**: dictionaries compile into a shared
//!   [`Validator`]; the serializer writes the store back as CIF with
//!   correct quoting.
//!
//! ```ignore
//! use cifdb::{query::key, File};
//!
//! let f = File::parse(bytes)?;
//! let atoms = f.front().unwrap().get("atom_site").unwrap();
//! for row in atoms.find(&key("label_asym_id").is("A")) {
//!     let x: f64 = row.get("Cartn_x").unwrap();
//! }
//! ```

pub mod error;
pub mod parse;
pub mod query;
pub mod store;
pub mod text;
pub mod token;
pub mod validate;
pub(crate) mod write;

pub use error::{Error, Result};
pub use store::{Category, DataBlock, File, FromCif, RowId, RowRef};
pub use validate::{parse_dictionary, Primitive, Validator, ValidatorFactory};
