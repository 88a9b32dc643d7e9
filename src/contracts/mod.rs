pub mod erc20;
pub mod payment_verifier;

pub use erc20::{IERC20Calls, TransferCall, IERC20};
pub use payment_verifier::PaymentVerifier;
