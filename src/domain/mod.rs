pub mod list;
pub mod names;
pub mod row;

pub use list::{ListKind, SourceList};
pub use names::{name_set, NameKey, NameSet};
pub use row::{PageKind, RawRow, Row, RowIndex};
