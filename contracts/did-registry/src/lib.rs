pub mod audit;
pub mod contract;
pub mod document;
pub mod error;
pub mod guardian;
pub mod invariants;
pub mod msg;
pub mod recovery;
pub mod state;

pub use crate::error::{ContractError, ErrorKind};
