pub mod data_server;
pub mod lock;
pub mod operation;

#[cfg(test)]
pub(crate) mod test_backend;
