use arc_swap::ArcSwap;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cluster::HostInfo;
use crate::load_balancing::{HostSelectionPolicy, HostStream, Request, SelectedHost, SimpleSelectedHost};

/// Simple round-robin host selection. Each request starts with the next host and continues with
/// the rest of the hosts which are up.
#[derive(Default)]
pub struct RoundRobinHostSelectionPolicy {
    hosts: ArcSwap<Vec<Arc<HostInfo>>>,
    prev_idx: AtomicUsize,
}

impl RoundRobinHostSelectionPolicy {
    pub fn new() -> Self {
        Default::default()
    }
}

impl HostSelectionPolicy for RoundRobinHostSelectionPolicy {
    fn pick(&self, request: &Request) -> HostStream {
        let hosts = self.hosts.load_full();
        let len = hosts.len();
        let start = if len == 0 {
            0
        } else {
            self.prev_idx.fetch_add(1, Ordering::Relaxed) % len
        };

        let token = request.token;
        stream::iter(
            (0..len)
                .map(move |offset| hosts[(start + offset) % len].clone())
                .filter(|host| host.is_up())
                .map(move |host| Box::new(SimpleSelectedHost::new(host, token)) as Box<dyn SelectedHost>),
        )
        .boxed()
    }

    fn add_host(&self, host: Arc<HostInfo>) {
        self.hosts.rcu(|hosts| {
            hosts
                .iter()
                .filter(|existing| existing.host_id() != host.host_id())
                .cloned()
                .chain(std::iter::once(host.clone()))
                .collect_vec()
        });
    }

    fn remove_host(&self, host: &HostInfo) {
        self.hosts.rcu(|hosts| {
            hosts
                .iter()
                .filter(|existing| existing.host_id() != host.host_id())
                .cloned()
                .collect_vec()
        });
    }
}
