pub mod flow;
pub mod payment;

pub use flow::{ConfirmationPolicy, PayFlow};
pub use payment::{PaymentClient, PaymentExecutor};
