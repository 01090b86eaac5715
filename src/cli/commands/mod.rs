pub mod inspect;
pub mod migrate;
pub mod register;
pub mod scan;
