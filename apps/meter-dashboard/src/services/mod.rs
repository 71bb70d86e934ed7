pub mod catalog;
pub mod live;
pub mod upstream;
pub mod views;
