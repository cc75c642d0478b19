use derive_more::Constructor;

use crate::routing::Murmur3Token;

/// Routing information of a query being executed.
#[derive(Constructor, Clone, Copy, Debug, Default)]
pub struct Request<'a> {
    pub keyspace: Option<&'a str>,
    pub token: Option<Murmur3Token>,
    pub routing_key: Option<&'a [u8]>,
}
