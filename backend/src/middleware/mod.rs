pub mod auth;
pub mod causer;
pub mod request_id;

pub use auth::{auth, require_admin};
pub use causer::resolve_causer;
pub use request_id::{request_id, RequestId, REQUEST_ID_HEADER};
