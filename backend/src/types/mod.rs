mod id;

pub use id::ActivityLogId;
