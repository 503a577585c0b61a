pub mod activity_logs;
