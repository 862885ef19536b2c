pub mod constants;
pub mod did;
pub mod keypair;
pub mod verify;

pub use keypair::Keypair;
