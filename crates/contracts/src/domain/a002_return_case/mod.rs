pub mod aggregate;
pub mod error;
pub mod events;
pub mod permissions;
pub mod request;
pub mod response;

pub use aggregate::{CaseState, ReturnCase, ReturnCaseId};
pub use error::CaseError;
pub use events::CaseRowEvent;
pub use permissions::{derive, PermissionSet};
