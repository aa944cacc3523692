mod fixtures;
mod test_bootstrap;
mod test_cluster;
mod test_restart;
