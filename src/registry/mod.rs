pub mod network;
pub mod token;

pub use network::{chain_id_for_network, NetworkInfo};
pub use token::{TokenRecord, TokenRegistry};
