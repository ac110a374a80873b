pub mod gateway;
pub mod instances;
pub mod storage;
