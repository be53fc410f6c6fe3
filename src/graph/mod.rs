pub mod model;
pub mod db;

pub use db::ResourceDatabase;
