use derivative::Derivative;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use rand::rng;
use rand::seq::SliceRandom;
use std::sync::{Arc, RwLock};

use crate::cluster::HostInfo;
use crate::load_balancing::{HostSelectionPolicy, HostStream, Request, SelectedHost, SimpleSelectedHost};

/// Pure random host selection.
#[derive(Default, Derivative)]
#[derivative(Debug)]
pub struct RandomHostSelectionPolicy {
    #[derivative(Debug = "ignore")]
    hosts: RwLock<Vec<Arc<HostInfo>>>,
}

impl RandomHostSelectionPolicy {
    pub fn new() -> Self {
        Default::default()
    }
}

impl HostSelectionPolicy for RandomHostSelectionPolicy {
    fn pick(&self, request: &Request) -> HostStream {
        let mut hosts = self
            .hosts
            .read()
            .unwrap()
            .iter()
            .filter(|host| host.is_up())
            .cloned()
            .collect_vec();

        hosts.shuffle(&mut rng());

        let token = request.token;
        stream::iter(
            hosts
                .into_iter()
                .map(move |host| Box::new(SimpleSelectedHost::new(host, token)) as Box<dyn SelectedHost>),
        )
        .boxed()
    }

    fn add_host(&self, host: Arc<HostInfo>) {
        let mut hosts = self.hosts.write().unwrap();
        hosts.retain(|existing| existing.host_id() != host.host_id());
        hosts.push(host);
    }

    fn remove_host(&self, host: &HostInfo) {
        self.hosts
            .write()
            .unwrap()
            .retain(|existing| existing.host_id() != host.host_id());
    }
}
