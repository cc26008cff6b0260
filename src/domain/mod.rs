// Domain layer - Wire protocol, shot records and alarm models
pub mod alarm;
pub mod board_event;
pub mod parameters;
pub mod protocol;
pub mod shot;
pub mod trajectory;
