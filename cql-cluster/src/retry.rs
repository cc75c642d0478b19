mod conviction_policy;
mod reconnection_policy;
mod retry_policy;

pub use crate::retry::conviction_policy::*;
pub use crate::retry::reconnection_policy::*;
pub use crate::retry::retry_policy::*;
