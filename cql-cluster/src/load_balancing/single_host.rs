use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::cluster::HostInfo;
use crate::load_balancing::{HostStream, SelectedHost, SimpleSelectedHost};
use crate::routing::Murmur3Token;

const SINGLE_HOST_ATTEMPTS: usize = 5;
const SINGLE_HOST_DELAY: Duration = Duration::from_millis(200);

/// Host sequence for queries targeting a specific host: yields the host a few times, with a
/// short delay between repetitions.
pub fn single_host(host: Arc<HostInfo>, token: Option<Murmur3Token>) -> HostStream {
    single_host_with(host, token, SINGLE_HOST_ATTEMPTS, SINGLE_HOST_DELAY)
}

pub fn single_host_with(
    host: Arc<HostInfo>,
    token: Option<Murmur3Token>,
    attempts: usize,
    delay: Duration,
) -> HostStream {
    stream::unfold(0, move |attempt| {
        let host = host.clone();
        async move {
            if attempt >= attempts {
                return None;
            }

            if attempt > 0 {
                sleep(delay).await;
            }

            let selected: Box<dyn SelectedHost> = Box::new(SimpleSelectedHost::new(host, token));
            Some((selected, attempt + 1))
        }
    })
    .boxed()
}
