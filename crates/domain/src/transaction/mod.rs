pub mod model;
pub mod repository;

pub use model::{
    CreateTransactionResult, TransactionRecord, TransactionStatus, TransferRequest,
};
pub use repository::TransactionRepository;
