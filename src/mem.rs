pub mod bank;
pub mod datastore;
pub mod range;

pub use bank::Bank;
pub use datastore::Datastore;
pub use range::Range;
