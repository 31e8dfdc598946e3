pub mod configs;
pub mod events;
pub mod health;
