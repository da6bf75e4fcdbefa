pub mod state;
pub mod transfer;

pub use state::{
    ensure_defaults, full_state, FullState, HideMode, LocalState, RowHighlights, SyncSettings,
    WritableList, DEFAULT_API_BASE_URL,
};
pub use transfer::{apply_import, build_export, parse_import, ExportData, TransferError};
