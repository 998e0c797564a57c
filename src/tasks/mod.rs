pub mod measurement;
pub mod power;
pub mod ui;
