//! quiz-core: resumable, encrypted, expiring persistence for a multi-step
//! questionnaire.
//!
//! # Design principles
//! - Memory is the source of truth; persistence trails it asynchronously.
//! - Reads never fail: bad or stale entries are evicted and read as absent.
//! - Session key material stays in process memory and is zeroized on drop.
//!
//! # Module layout
//! - `backend`        : raw key/value backends (memory, one-file-per-key)
//! - `clock`          : injectable wall clock
//! - `crypto`         : AES-256-GCM sealing + per-process key management
//! - `secure_store`   : TTL envelopes, optional encryption and validation
//! - `session`        : session, answers and the persisted projection
//! - `state_machine`  : quiz progression rules
//! - `quiz_store`     : shared container publishing snapshots on change
//! - `navigation`     : step guard and selection helpers
//! - `persistence`    : background writer and startup load
//! - `hydration`      : one-shot "state restored" gate
//! - `quiz`           : read-only quiz content model and loader
//! - `report`         : CSV export
//! - `settings`       : configuration file
//! - `paths`          : data locations
//! - `error`          : error types

pub mod backend;
pub mod clock;
pub mod crypto;
pub mod error;
pub mod hydration;
pub mod navigation;
pub mod paths;
pub mod persistence;
pub mod quiz;
pub mod quiz_store;
pub mod report;
pub mod secure_store;
pub mod session;
pub mod settings;
pub mod state_machine;

pub use error::{BackendError, ConfigError, CryptoError, QuizError, StoreError, ValidationError};
pub use persistence::PersistenceAdapter;
pub use quiz_store::QuizStore;
pub use secure_store::SecureStore;
pub use settings::KeepSettings;
