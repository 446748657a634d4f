pub mod config;
pub mod db;
pub mod embed;
pub mod enrich;
pub mod error;
pub mod models;
pub mod normalize;
pub mod profile;
pub mod provider;
pub mod score;
pub mod search;
pub mod sponsor;
