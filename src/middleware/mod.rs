pub mod pipeline;
pub mod routes;
pub mod x402;

pub use pipeline::{VerificationPipeline, VerifiedPayment};
pub use routes::RouteTable;
pub use x402::{x402_middleware_layer, X402Middleware, PAYMENT_HEADER};
