#[macro_use]
pub mod print;
