pub mod evaluate;
pub mod events;
