pub mod catalog;
pub mod order;
pub mod voucher;

pub use catalog::*;
pub use order::*;
pub use voucher::*;
