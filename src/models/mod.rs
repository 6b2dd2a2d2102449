pub mod generation;
pub mod payment;
pub mod response;
pub mod user;

pub use generation::*;
pub use payment::*;
pub use response::*;
pub use user::*;
