pub mod utils;

#[cfg(test)]
mod test_concurrency;
#[cfg(test)]
mod test_provisioning;
