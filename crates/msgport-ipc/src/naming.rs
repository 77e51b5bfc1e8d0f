use std::fmt;
use std::ops::RangeInclusive;

/// Names of the two queues backing one IPC connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueuePair {
    /// Queue the connecting side receives on.
    pub client: String,
    /// Queue the accepting side receives on.
    pub server: String,
}

/// Derives per-connection queue names from an endpoint name and an id.
pub trait QueueNaming: fmt::Debug + Send + Sync {
    fn connection_names(&self, endpoint: &str, id: u32) -> QueuePair;

    /// Ids a connecting port may claim.
    fn id_range(&self) -> RangeInclusive<u32>;
}

/// `{endpoint}#Client#{id}` / `{endpoint}#Server#{id}` with ids `1..=99`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumberedNaming;

impl QueueNaming for NumberedNaming {
    fn connection_names(&self, endpoint: &str, id: u32) -> QueuePair {
        QueuePair {
            client: format!("{endpoint}#Client#{id}"),
            server: format!("{endpoint}#Server#{id}"),
        }
    }

    fn id_range(&self) -> RangeInclusive<u32> {
        1..=99
    }
}
