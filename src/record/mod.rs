//! Record-level access to tables: shredding nested records into columns and
//! materializing them back.

mod builder;
mod materializer;
mod shredder;

pub use builder::CSTableBuilder;
pub use materializer::RecordMaterializer;
pub use shredder::RecordShredder;
