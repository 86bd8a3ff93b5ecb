//! rollcall-core — Domain types and persistence for face attendance.
//!
//! Face encodings with tolerance-based matching, the filesystem encoding
//! store, and the append-only attendance journal.

pub mod journal;
pub mod store;
pub mod types;
pub mod vision;

pub use journal::{AttendanceJournal, JournalError};
pub use store::{EncodingStore, StoreError};
pub use types::{Encoding, FaceRegion, RegisteredFace};
pub use vision::{Vision, VisionError};
