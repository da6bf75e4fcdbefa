pub mod classify;
pub mod index;
pub mod project;
pub mod reorder;
pub mod style;

pub use classify::{classify, Classification};
pub use index::build_index;
pub use project::{project, AuthorVerdicts, RowEffect, PLACEHOLDER_LABEL};
pub use reorder::{render_order, reorder};
pub use style::{highlight_style_map, is_default_style, resolve_style, RawColor, StyleMap};
