// Application layer - Shot pipeline, board session and alarm state
pub mod alarm_classifier;
pub mod monitor_service;
pub mod monitor_session;
pub mod parameter_calculator;
pub mod reassembler;
pub mod shot_converter;
pub mod shot_repository;
