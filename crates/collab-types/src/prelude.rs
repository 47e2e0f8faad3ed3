pub use crate::error::{CollabResult, Error};
pub use crate::principal::{AnonymousAuthSource, AuthSource, Principal};
pub use crate::types::{topic_name, DocumentId, ProjectId, Sequence, Timestamp};
pub use tracing::{debug, debug_span, error, error_span, info, info_span, trace, warn, warn_span};
