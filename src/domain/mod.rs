mod account;
mod integrity;
mod ledger;
mod money;
mod transaction;

pub use account::*;
pub use integrity::*;
pub use ledger::*;
pub use money::*;
pub use transaction::*;
