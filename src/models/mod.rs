//! Domain models for civic-report.
//!
//! - [`User`]: a registered citizen or administrator. Only its
//!   [`UserSummary`] (id + name) is embedded in other records.
//! - [`Issue`]: a citizen-submitted report. Its severity is derived from the
//!   title and description by [`crate::severity`], never supplied by clients.
//! - [`Comment`]: a message attached to an issue.

mod issue;
mod user;

pub use issue::*;
pub use user::*;
