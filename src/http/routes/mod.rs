pub mod db;
pub mod health;
pub mod internal;
pub mod ollama;
