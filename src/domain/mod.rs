mod account;
mod balance;
mod budget;
mod category;
mod ledger;
mod money;
mod transaction;
mod user;

pub use account::*;
pub use balance::*;
pub use budget::*;
pub use category::*;
pub use ledger::*;
pub use money::*;
pub use transaction::*;
pub use user::*;
