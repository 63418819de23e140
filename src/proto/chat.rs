//! Chat delivery commands. Messages and blobs travel as arrays under the
//! command name.

use serde::{Deserialize, Serialize};

/// Incremental history request; zero means "from the beginning".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadMessages {
    #[serde(default)]
    pub from_dt: u64,
}
