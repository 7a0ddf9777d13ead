pub mod events;
pub mod vote;
