pub mod model;
pub mod practice;
pub mod repository;
