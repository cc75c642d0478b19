//! Routing tokens and shard mapping.

use derive_more::{Constructor, Display};
use std::convert::TryFrom;
use std::num::NonZeroU16;

use crate::error::Error;

pub type Shard = u32;
pub type ShardCount = NonZeroU16;

/// A token on the ring. Only Murmur3 tokens are supported for now.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Default, Debug, Hash, Constructor, Display)]
pub struct Murmur3Token {
    pub value: i64,
}

impl TryFrom<String> for Murmur3Token {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Murmur3Token::try_from(value.as_str())
    }
}

impl TryFrom<&str> for Murmur3Token {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value
            .parse()
            .map_err(|error| format!("Error parsing token: {error}").into())
            .map(Murmur3Token::new)
    }
}

impl From<i64> for Murmur3Token {
    fn from(value: i64) -> Self {
        Murmur3Token::new(value)
    }
}

/// Sharding information advertised by a connection to a shard-per-core node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Constructor)]
pub struct ShardInfo {
    /// Shard this particular connection is bound to.
    pub shard: u16,
    pub nr_shards: ShardCount,
    pub msb_ignore: u8,
}

impl ShardInfo {
    #[inline]
    pub fn sharder(&self) -> Sharder {
        Sharder::new(self.nr_shards, self.msb_ignore)
    }
}

/// Maps tokens to shards of a single node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Constructor)]
pub struct Sharder {
    pub nr_shards: ShardCount,
    pub msb_ignore: u8,
}

impl Sharder {
    pub fn shard_of(&self, token: Murmur3Token) -> Shard {
        let mut biased_token = (token.value as u64).wrapping_add(1u64 << 63);
        biased_token <<= self.msb_ignore;
        (((biased_token as u128) * (self.nr_shards.get() as u128)) >> 64) as Shard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_token() {
        assert_eq!(
            Murmur3Token::try_from("-42").unwrap(),
            Murmur3Token::new(-42)
        );
        assert!(Murmur3Token::try_from("token").is_err());
    }

    #[test]
    fn should_map_extreme_tokens_to_edge_shards() {
        let sharder = Sharder::new(ShardCount::new(4).unwrap(), 0);

        assert_eq!(sharder.shard_of(Murmur3Token::new(i64::MIN)), 0);
        assert_eq!(sharder.shard_of(Murmur3Token::new(i64::MAX)), 3);
        assert_eq!(sharder.shard_of(Murmur3Token::new(0)), 2);
    }
}
