pub mod extract;
pub mod token_broker;
