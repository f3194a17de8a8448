pub mod rates;
pub mod scenario;
pub mod terms;
