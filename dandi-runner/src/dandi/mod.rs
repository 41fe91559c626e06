// Dataset access layer: read-only view over local snapshot files, the
// remote archive API, and the disk cache.

pub mod api;
pub mod interface;
pub mod store;
pub mod types;

pub use api::DandiApiClient;
pub use interface::{DandiInterface, FindQuery};
pub use store::SnapshotStore;
pub use types::{AssetDetail, DandisetRecord, NeurodataObjectRecord, NwbFileRecord, SubjectInfo};
