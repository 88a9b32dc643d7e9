pub mod amount;
pub mod challenge;
pub mod proof;
pub mod response;

pub use amount::*;
pub use challenge::*;
pub use proof::*;
pub use response::*;
