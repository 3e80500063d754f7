pub mod live;
pub mod risk;
