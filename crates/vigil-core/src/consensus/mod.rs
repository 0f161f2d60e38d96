pub mod key_block;
pub mod signatures;
pub mod validator_set;

pub use key_block::*;
pub use signatures::*;
pub use validator_set::*;
