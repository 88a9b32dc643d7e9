pub mod content;
pub mod health;

pub use content::*;
pub use health::*;
