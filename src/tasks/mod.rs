pub mod dispatcher;
pub mod power;
