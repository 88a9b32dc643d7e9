pub mod attestor;
pub mod chain;
pub mod clock;
pub mod replay;
pub mod signature;

pub use attestor::{Attestor, AttestorError, ContractAttestor, MemoryAttestor};
pub use chain::{
    ChainError, ChainReader, ChainVerifier, EthersChainReader, MemoryChain, TransactionError,
    TransactionInfo, TransferReceipt,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use replay::{Admission, ReplayGuard};
pub use signature::recover_signer;
