//! Integration tests for the forge generation scheduler

mod config_loading;
mod coordinator;
mod job_queue;
